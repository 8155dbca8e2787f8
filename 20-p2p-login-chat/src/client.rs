use std::{
    io,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        TcpSocket, TcpStream, UdpSocket,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    console::ConsoleCommand,
    credentials::derive_secret,
    directory::Directory,
    protocol::{self, LineReader, ServerLine, line_reader, read_line, write_line},
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    /// Local address for both sockets. Unspecified lets the OS choose.
    pub local_ip: IpAddr,
    /// Well-known peer-channel port, identical on every client.
    pub peer_port: u16,
    pub read_buffer: usize,
    /// Upper bound on connecting and on each send.
    pub io_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

/// One operator's connection to the relay plus their peer-channel socket.
pub struct PeerClient {
    state: ClientState,
    directory: Directory,
    awaiting_secret: bool,
    /// Set after an overlong console line; the codec then reports one spurious end.
    console_overflowed: bool,
    control: LineReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: UdpSocket,
    config: ClientConfig,
}

impl PeerClient {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        debug!(state = ?ClientState::Connecting, server = %config.server, "opening sockets");

        let peer = UdpSocket::bind((config.local_ip, config.peer_port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind peer channel on {}:{}",
                    config.local_ip, config.peer_port
                )
            })?;

        let stream = timeout(config.io_timeout, open_control(&config))
            .await
            .with_context(|| format!("timed out connecting to {}", config.server))?
            .with_context(|| format!("failed to connect to {}", config.server))?;

        info!("connected to {}", config.server);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            state: ClientState::Authenticating,
            directory: Directory::default(),
            awaiting_secret: false,
            console_overflowed: false,
            control: line_reader(reader, config.read_buffer),
            writer,
            peer,
            config,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.peer.local_addr()
    }

    /// Multiplexes the control stream, the peer channel and `console` until
    /// the operator quits or the relay hangs up. Everything meant for the
    /// operator is written to `output`.
    pub async fn run<C, O>(mut self, console: C, mut output: O) -> Result<()>
    where
        C: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut console = line_reader(console, self.config.read_buffer);
        let mut datagram = vec![0u8; self.config.read_buffer];

        while self.state != ClientState::Closed {
            select! {
                line = read_line(&mut self.control) => {
                    self.handle_control(line, &mut output).await?;
                }
                received = self.peer.recv_from(&mut datagram) => {
                    self.handle_datagram(received, &datagram, &mut output).await?;
                }
                input = read_line(&mut console) => {
                    self.handle_console(input, &mut output).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_control<O>(
        &mut self,
        line: io::Result<Option<String>>,
        output: &mut O,
    ) -> Result<()>
    where
        O: AsyncWrite + Unpin,
    {
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                write_line(output, "*** server closed the connection").await?;
                self.transition(ClientState::Closed);
                return Ok(());
            }
            Err(error) => {
                warn!(?error, "control stream failed");
                write_line(output, "*** lost connection to the server").await?;
                self.transition(ClientState::Closed);
                return Ok(());
            }
        };

        match ServerLine::parse(&line) {
            Ok(ServerLine::Directory(directory)) => {
                self.directory = directory;
                if self.state == ClientState::Authenticating {
                    self.transition(ClientState::Active);
                }
                write_line(output, &format_peers(&self.directory)).await?;
            }
            Ok(ServerLine::Text(text)) => {
                write_line(output, &format!("[Server] {text}")).await?;
                if self.state == ClientState::Authenticating && text == protocol::SECRET_PROMPT {
                    self.awaiting_secret = true;
                }
            }
            Err(error) => warn!(?error, "ignoring malformed directory payload"),
        }

        Ok(())
    }

    async fn handle_datagram<O>(
        &self,
        received: io::Result<(usize, SocketAddr)>,
        buffer: &[u8],
        output: &mut O,
    ) -> Result<()>
    where
        O: AsyncWrite + Unpin,
    {
        let (len, from) = match received {
            Ok(received) => received,
            Err(error) => {
                warn!(?error, "failed to receive peer datagram");
                return Ok(());
            }
        };

        let address = from.ip().to_canonical();
        let text = String::from_utf8_lossy(&buffer[..len]);
        let sender = self.directory.identity_of(address).unwrap_or("unknown");
        write_line(output, &format!("[P2P] {sender} (IP: {address}) says: {text}")).await?;
        Ok(())
    }

    async fn handle_console<O>(
        &mut self,
        input: io::Result<Option<String>>,
        output: &mut O,
    ) -> Result<()>
    where
        O: AsyncWrite + Unpin,
    {
        let line = match input {
            Ok(Some(line)) => line,
            Ok(None) if self.console_overflowed => {
                self.console_overflowed = false;
                return Ok(());
            }
            Ok(None) => {
                debug!("console closed");
                return self.quit(output).await;
            }
            Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                self.console_overflowed = true;
                write_line(output, &format!("*** {error}")).await?;
                return Ok(());
            }
            Err(error) => return Err(error).context("failed to read console input"),
        };

        // The relay only ever sees a digest of what the operator typed here.
        if self.awaiting_secret {
            self.awaiting_secret = false;
            return self.send_control(&derive_secret(line.trim())).await;
        }

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(error) => {
                write_line(output, &format!("*** {error}")).await?;
                return Ok(());
            }
        };

        match command {
            ConsoleCommand::Quit => self.quit(output).await?,
            ConsoleCommand::List => write_line(output, &format_peers(&self.directory)).await?,
            ConsoleCommand::Direct { to, text } => self.send_direct(&to, &text, output).await?,
            ConsoleCommand::Chat(text) => self.send_control(&text).await?,
        }

        Ok(())
    }

    async fn send_control(&mut self, text: &str) -> Result<()> {
        timeout(self.config.io_timeout, write_line(&mut self.writer, text))
            .await
            .context("timed out sending to the server")?
            .context("failed to send message to the server")
    }

    async fn send_direct<O>(&self, to: &str, text: &str, output: &mut O) -> Result<()>
    where
        O: AsyncWrite + Unpin,
    {
        let Some(address) = self.directory.address_of(to) else {
            write_line(output, &format!("User ({to}) not found")).await?;
            return Ok(());
        };

        let target = SocketAddr::new(address, self.config.peer_port);
        match timeout(self.config.io_timeout, self.peer.send_to(text.as_bytes(), target)).await {
            Ok(Ok(_)) => debug!(%target, to, "sent peer message"),
            Ok(Err(error)) => warn!(%target, ?error, "unable to send p2p message to {to}"),
            Err(_) => warn!(%target, "timed out sending p2p message to {to}"),
        }
        Ok(())
    }

    async fn quit<O>(&mut self, output: &mut O) -> Result<()>
    where
        O: AsyncWrite + Unpin,
    {
        write_line(output, "*** leaving chat").await?;
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown control connection cleanly");
        }
        self.transition(ClientState::Closed);
        Ok(())
    }

    fn transition(&mut self, next: ClientState) {
        debug!(from = ?self.state, to = ?next, "client state change");
        self.state = next;
    }
}

async fn open_control(config: &ClientConfig) -> io::Result<TcpStream> {
    if config.local_ip.is_unspecified() {
        return TcpStream::connect(config.server).await;
    }

    let socket = match config.local_ip {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(config.local_ip, 0))?;
    socket.connect(config.server).await
}

fn format_peers(directory: &Directory) -> String {
    if directory.is_empty() {
        return "Online peers: none".to_string();
    }
    let names: Vec<&str> = directory.identities().collect();
    format!("Online peers: {}", names.join(", "))
}
