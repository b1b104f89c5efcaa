use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque symbol naming one of the two ledgers this node bridges.
///
/// Exactly two [`ChainId`]s exist per running instance (enforced at
/// config load, see [`super::ConfigError::WrongChainCount`]); one is
/// designated base, the other quote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(symbol: impl Into<String>) -> Self {
        ChainId(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        ChainId(s.to_string())
    }
}
