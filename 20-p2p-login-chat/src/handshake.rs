//! Per-connection authentication, run before a connection may join the relay.

use std::{io, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};

use crate::{
    credentials::{CredentialStore, Registration, Verification},
    error::HandshakeError,
    identity,
    protocol::{self, LineReader, read_line, write_line},
};

/// Credential store shared by every pending handshake.
pub type SharedCredentials = Arc<Mutex<Box<dyn CredentialStore>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Register,
    Login,
}

impl Choice {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "register" => Some(Choice::Register),
            "login" => Some(Choice::Login),
            _ => None,
        }
    }
}

/// Walks a new connection through the register-or-login dialogue and returns
/// the authenticated username.
///
/// Nothing is written on failure; the caller sends [`HandshakeError::reply`]
/// and closes the connection. A rejected registration leaves the store
/// untouched.
pub async fn authenticate<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut W,
    credentials: &SharedCredentials,
) -> Result<String, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(writer, protocol::CHOICE_PROMPT).await?;
    let answer = next_line(reader).await?;
    let choice =
        Choice::parse(&answer).ok_or_else(|| HandshakeError::UnknownChoice(answer.clone()))?;

    write_line(writer, protocol::USERNAME_PROMPT).await?;
    let username = identity::normalize(&next_line(reader).await?);

    match choice {
        Choice::Register => register(reader, writer, credentials, username).await,
        Choice::Login => login(reader, writer, credentials, username).await,
    }
}

async fn register<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut W,
    credentials: &SharedCredentials,
    username: String,
) -> Result<String, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !identity::is_valid_username(&username) {
        return Err(HandshakeError::InvalidUsername(username));
    }
    if credentials.lock().await.contains(&username)? {
        return Err(HandshakeError::UsernameTaken(username));
    }

    write_line(writer, protocol::SECRET_PROMPT).await?;
    let secret = next_line(reader).await?;

    // Someone may have claimed the name while we waited for the secret.
    match register_blocking(credentials, &username, secret.trim()).await? {
        Registration::Registered => {
            write_line(writer, protocol::REGISTERED).await?;
            Ok(username)
        }
        Registration::Taken => Err(HandshakeError::UsernameTaken(username)),
    }
}

/// Runs the registration on the blocking pool, since a file-backed store
/// writes through to disk.
async fn register_blocking(
    credentials: &SharedCredentials,
    username: &str,
    secret: &str,
) -> Result<Registration, HandshakeError> {
    let credentials = Arc::clone(credentials);
    let username = username.to_string();
    let secret = secret.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        credentials.blocking_lock().register(&username, &secret)
    })
    .await
    .map_err(io::Error::other)??;
    Ok(outcome)
}

async fn login<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut W,
    credentials: &SharedCredentials,
    username: String,
) -> Result<String, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !credentials.lock().await.contains(&username)? {
        return Err(HandshakeError::UnknownUser(username));
    }

    write_line(writer, protocol::SECRET_PROMPT).await?;
    let secret = next_line(reader).await?;

    let outcome = credentials.lock().await.verify(&username, secret.trim())?;
    match outcome {
        Verification::Accepted => {
            write_line(writer, protocol::LOGGED_IN).await?;
            Ok(username)
        }
        Verification::Mismatch => Err(HandshakeError::SecretMismatch(username)),
        Verification::Unknown => Err(HandshakeError::UnknownUser(username)),
    }
}

async fn next_line<R>(reader: &mut LineReader<R>) -> Result<String, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    read_line(reader).await?.ok_or(HandshakeError::Closed)
}
