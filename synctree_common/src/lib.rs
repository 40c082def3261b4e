pub mod config;
pub mod error;
pub mod path;
pub mod store;
pub mod types;

pub use config::*;
pub use error::*;
pub use path::*;
pub use store::*;
pub use types::*;
