use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Whether a synchronization compares two states or three
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncType {
    /// Local compared directly with remote
    TwoWay,
    /// Local and remote each compared with a common ancestor
    ThreeWay,
}

/// Which snapshot a state handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateSide {
    Local,
    Ancestor,
    Remote,
}

/// Identifier produced by a content classifier (e.g. `text/plain`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentTypeId(pub String);

impl ContentTypeId {
    pub const TEXT: &'static str = "text/plain";
    pub const BINARY: &'static str = "application/octet-stream";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn text() -> Self {
        Self::new(Self::TEXT)
    }

    pub fn binary() -> Self {
        Self::new(Self::BINARY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one compare/merge session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// BLAKE3 hash value (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    pub fn of(content: &[u8]) -> Self {
        blake3::hash(content).into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_displays_as_hex() {
        let hash = Blake3Hash::of(b"abc");
        let shown = hash.to_string();
        assert_eq!(shown.len(), 64);
        assert_eq!(shown, blake3::hash(b"abc").to_hex().to_string());
        assert_ne!(hash, Blake3Hash::of(b"abd"));
    }
}
