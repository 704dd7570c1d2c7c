//! Application Server identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommsError;

/// Identity of one Application Server: `(host, port)`.
///
/// Immutable once built and cheap to clone, so it can be shared freely
/// between the WM and SCM sides. Ordering is lexicographic on host, then
/// port, which lets ids key sorted maps; only equality is load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId {
    host: String,
    port: u16,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerId {
    type Err = CommsError;

    /// Parse a `host:port` string, e.g. from a configured server list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CommsError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(CommsError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| CommsError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}
