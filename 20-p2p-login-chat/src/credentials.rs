//! Credential storage behind the relay's `register` / `verify` calls.
//!
//! The relay treats secrets as opaque strings. Clients send a digest of the
//! operator's password (see [`derive_secret`]), never the password itself.

use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    Taken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Accepted,
    Mismatch,
    Unknown,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to access credential file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credential file {path} is not a JSON object of username to secret")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait CredentialStore: Send {
    fn contains(&self, username: &str) -> Result<bool, CredentialError>;

    fn register(&mut self, username: &str, secret: &str) -> Result<Registration, CredentialError>;

    fn verify(&self, username: &str, secret: &str) -> Result<Verification, CredentialError>;
}

/// Secret presented by a client in place of the typed password.
pub fn derive_secret(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

fn check(stored: Option<&String>, secret: &str) -> Verification {
    match stored {
        Some(expected) if expected == secret => Verification::Accepted,
        Some(_) => Verification::Mismatch,
        None => Verification::Unknown,
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentials {
    users: HashMap<String, String>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentials {
    fn contains(&self, username: &str) -> Result<bool, CredentialError> {
        Ok(self.users.contains_key(username))
    }

    fn register(&mut self, username: &str, secret: &str) -> Result<Registration, CredentialError> {
        if self.users.contains_key(username) {
            return Ok(Registration::Taken);
        }
        self.users.insert(username.to_string(), secret.to_string());
        Ok(Registration::Registered)
    }

    fn verify(&self, username: &str, secret: &str) -> Result<Verification, CredentialError> {
        Ok(check(self.users.get(username), secret))
    }
}

/// JSON file of `{"username": "secret"}`, loaded once and rewritten on every
/// registration.
#[derive(Debug)]
pub struct FileCredentials {
    path: PathBuf,
    users: BTreeMap<String, String>,
}

impl FileCredentials {
    /// Opens the store at `path`. A missing file is an empty store; it is
    /// created on the first registration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();
        let users = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CredentialError::Format {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "credential file missing, starting empty");
                BTreeMap::new()
            }
            Err(source) => return Err(CredentialError::Io { path, source }),
        };

        info!(path = %path.display(), users = users.len(), "loaded credentials");
        Ok(Self { path, users })
    }

    fn persist(&self) -> Result<(), CredentialError> {
        let encoded =
            serde_json::to_vec_pretty(&self.users).map_err(|source| CredentialError::Format {
                path: self.path.clone(),
                source,
            })?;
        fs::write(&self.path, encoded).map_err(|source| CredentialError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl CredentialStore for FileCredentials {
    fn contains(&self, username: &str) -> Result<bool, CredentialError> {
        Ok(self.users.contains_key(username))
    }

    fn register(&mut self, username: &str, secret: &str) -> Result<Registration, CredentialError> {
        if self.users.contains_key(username) {
            return Ok(Registration::Taken);
        }

        self.users.insert(username.to_string(), secret.to_string());
        if let Err(err) = self.persist() {
            self.users.remove(username);
            return Err(err);
        }
        Ok(Registration::Registered)
    }

    fn verify(&self, username: &str, secret: &str) -> Result<Verification, CredentialError> {
        Ok(check(self.users.get(username), secret))
    }
}
