//! Protocol-level peer addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::S5bError;

/// Addressable identity of a peer, proxy or local account (`node@domain/resource`).
///
/// The engine treats identities as opaque strings; only a minimal shape
/// check is performed so malformed advertised hosts can be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    /// Wrap a full address.
    pub fn new(full: impl Into<String>) -> Self {
        Self(full.into())
    }

    /// Full textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain part (between `@` and `/`).
    pub fn domain(&self) -> &str {
        let rest = match self.0.split_once('@') {
            Some((_, rest)) => rest,
            None => &self.0,
        };
        rest.split('/').next().unwrap_or_default()
    }

    /// Address without the resource part.
    pub fn bare(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// A usable address has a non-empty domain and no whitespace.
    pub fn is_valid(&self) -> bool {
        !self.domain().is_empty() && !self.0.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Jid {
    type Err = S5bError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let jid = Self::new(s);
        if jid.is_valid() {
            Ok(jid)
        } else {
            Err(S5bError::Protocol(format!("Invalid address: {s:?}")))
        }
    }
}

impl From<&str> for Jid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
