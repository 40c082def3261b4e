pub mod local;
pub mod memory;

#[cfg(test)]
mod tests_local;

pub use local::{DirectoryRemoteProvider, LocalStore};
pub use memory::{MemoryRemoteProvider, MemoryStore};
