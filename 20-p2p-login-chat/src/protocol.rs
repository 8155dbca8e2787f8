use std::{io, net::IpAddr};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::directory::Directory;

/// Leading character of a control line that carries a directory payload.
///
/// Every other line the relay sends is either fixed relay wording or starts
/// with a username, and usernames may not contain control characters.
pub const DIRECTORY_MARKER: char = '\u{1e}';

pub const CHOICE_PROMPT: &str = "Welcome to this chatroom! Do you want to login or register: ";
pub const USERNAME_PROMPT: &str = "Please write your username: ";
pub const SECRET_PROMPT: &str = "Your username is valid. Please enter password.";
pub const REGISTERED: &str = "You are now registered.";
pub const LOGGED_IN: &str = "You are now logged in.";

pub const UNKNOWN_CHOICE: &str = "You need to either login or register. Please try again.";
pub const INVALID_USERNAME: &str = "Invalid username. Please try again.";
pub const USERNAME_TAKEN: &str = "Username already taken. Please try again.";
pub const UNKNOWN_USER: &str = "Username not registered. Please try again.";
pub const SECRET_MISMATCH: &str = "Password did not match username. Please try again.";
pub const RELAY_FULL: &str = "The chatroom is full. Please try again later.";
pub const RELAY_ERROR: &str = "The server could not process your request. Please try again later.";
pub const SHUTTING_DOWN: &str = "The chat server is shutting down.";

pub const BANNER: &[&str] = &[
    "Connected to the chat server.",
    "To exit the chatroom type ':q'",
    "To list all online users type ':l'",
    "To send a p2p message type '@username: message'",
];

pub type LineReader<R> = FramedRead<R, LinesCodec>;

/// A line received from the relay on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    Text(String),
    Directory(Directory),
}

impl ServerLine {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        match line.strip_prefix(DIRECTORY_MARKER) {
            Some(payload) => Ok(ServerLine::Directory(serde_json::from_str(payload)?)),
            None => Ok(ServerLine::Text(line.to_string())),
        }
    }
}

pub fn encode_directory(directory: &Directory) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(directory)?;
    let mut line = String::with_capacity(payload.len() + DIRECTORY_MARKER.len_utf8());
    line.push(DIRECTORY_MARKER);
    line.push_str(&payload);
    Ok(line)
}

pub fn joined_notice(username: &str, address: IpAddr) -> String {
    format!("{username} (IP: {address}) connected")
}

pub fn chat_line(username: &str, address: IpAddr, text: &str) -> String {
    format!("{username} (IP: {address}) said: {text}")
}

pub fn offline_notice(username: &str, address: IpAddr) -> String {
    format!("{username} (IP: {address}) is offline")
}

/// Wraps a byte stream in newline framing. Lines longer than `max_length`
/// bytes surface as an `InvalidData` error from [`read_line`].
pub fn line_reader<R: AsyncRead>(reader: R, max_length: usize) -> LineReader<R> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(max_length))
}

/// Reads the next line without its terminator. `Ok(None)` means the peer
/// closed the stream. Cancel safe, so it can sit in a `select!` branch.
pub async fn read_line<R>(reader: &mut LineReader<R>) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    match reader.next().await {
        Some(Ok(line)) => Ok(Some(line)),
        Some(Err(err)) => Err(to_io_error(err)),
        None => Ok(None),
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per line so a line never reaches the peer split around another.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(err) => err,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line exceeds the read buffer")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryEntry;

    #[tokio::test]
    async fn lines_cross_a_stream_intact() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = line_reader(reader, 64);

        write_line(&mut writer, "login").await.expect("write first");
        write_line(&mut writer, "alice").await.expect("write second");
        drop(writer);

        assert_eq!(read_line(&mut reader).await.expect("read"), Some("login".into()));
        assert_eq!(read_line(&mut reader).await.expect("read"), Some("alice".into()));
        assert_eq!(read_line(&mut reader).await.expect("read"), None);
    }

    #[tokio::test]
    async fn overlong_line_is_invalid_data() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = line_reader(reader, 8);

        write_line(&mut writer, "this line is far too long")
            .await
            .expect("write");

        let err = read_line(&mut reader).await.expect_err("line should be rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn directory_lines_are_told_apart_from_text() {
        let directory: Directory = vec![DirectoryEntry::new("alice", [10, 0, 0, 5].into())]
            .into_iter()
            .collect();
        let encoded = encode_directory(&directory).expect("encode");

        assert!(encoded.starts_with(DIRECTORY_MARKER));
        assert_eq!(
            ServerLine::parse(&encoded).expect("parse"),
            ServerLine::Directory(directory)
        );

        // Chat that happens to look like JSON stays text.
        let chat = chat_line("bob", [10, 0, 0, 6].into(), "[1, 2, 3]");
        assert_eq!(
            ServerLine::parse(&chat).expect("parse"),
            ServerLine::Text(chat.clone())
        );
        assert_eq!(
            ServerLine::parse("[\"alice\"]").expect("parse"),
            ServerLine::Text("[\"alice\"]".into())
        );
    }

    #[test]
    fn malformed_directory_payload_is_an_error() {
        let line = format!("{DIRECTORY_MARKER}not json");
        assert!(ServerLine::parse(&line).is_err());
    }
}
