//! The online directory: which identities are connected, and from where.
//!
//! The relay builds one from its session table after every join and leave.
//! Clients never patch their copy; they swap it for each new broadcast.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub identity: String,
    pub address: IpAddr,
}

impl DirectoryEntry {
    pub fn new(identity: impl Into<String>, address: IpAddr) -> Self {
        Self {
            identity: identity.into(),
            address,
        }
    }
}

/// Ordered list of `(identity, address)` pairs.
///
/// Serialises as a bare JSON array of `{"identity", "address"}` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.identity.as_str())
    }

    pub fn address_of(&self, identity: &str) -> Option<IpAddr> {
        self.entries
            .iter()
            .find(|entry| entry.identity == identity)
            .map(|entry| entry.address)
    }

    /// Reverse lookup used to attribute incoming peer datagrams.
    pub fn identity_of(&self, address: IpAddr) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.address == address)
            .map(|entry| entry.identity.as_str())
    }
}

impl FromIterator<DirectoryEntry> for Directory {
    fn from_iter<I: IntoIterator<Item = DirectoryEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
