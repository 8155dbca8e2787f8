use std::io;

use thiserror::Error;

use crate::{credentials::CredentialError, protocol};

/// Why a connection never became a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("expected `register` or `login`, got {0:?}")]
    UnknownChoice(String),
    #[error("invalid username {0:?}")]
    InvalidUsername(String),
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),
    #[error("username {0:?} is not registered")]
    UnknownUser(String),
    #[error("secret did not match for {0:?}")]
    SecretMismatch(String),
    #[error("relay is at its session limit")]
    RelayFull,
    #[error("connection closed during handshake")]
    Closed,
    #[error("handshake timed out")]
    TimedOut,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

impl HandshakeError {
    /// Diagnostic line sent to the client before its connection is closed.
    pub fn reply(&self) -> Option<&'static str> {
        match self {
            HandshakeError::UnknownChoice(_) => Some(protocol::UNKNOWN_CHOICE),
            HandshakeError::InvalidUsername(_) => Some(protocol::INVALID_USERNAME),
            HandshakeError::UsernameTaken(_) => Some(protocol::USERNAME_TAKEN),
            HandshakeError::UnknownUser(_) => Some(protocol::UNKNOWN_USER),
            HandshakeError::SecretMismatch(_) => Some(protocol::SECRET_MISMATCH),
            HandshakeError::RelayFull => Some(protocol::RELAY_FULL),
            HandshakeError::Credentials(_) => Some(protocol::RELAY_ERROR),
            HandshakeError::Closed | HandshakeError::TimedOut | HandshakeError::Io(_) => None,
        }
    }
}
