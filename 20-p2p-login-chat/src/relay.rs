use std::{
    future::Future,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tokio::{
    io::AsyncWrite,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex, mpsc},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    credentials::CredentialStore,
    error::HandshakeError,
    handshake::{self, SharedCredentials},
    protocol::{self, LineReader, line_reader, read_line, write_line},
    sessions::{OUTBOX_CAPACITY, Outbox, SessionId, SessionRecord, SessionTable},
};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub max_sessions: usize,
    /// Longest control line accepted from a client, in bytes.
    pub read_buffer: usize,
    pub handshake_timeout: Duration,
    /// A session whose line cannot be written within this long is dropped.
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            read_buffer: 2048,
            handshake_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Relay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Relay {
    pub fn new<S>(listener: TcpListener, credentials: S, config: RelayConfig) -> Self
    where
        S: CredentialStore + 'static,
    {
        Self {
            listener,
            state: Arc::new(RelayState::new(Box::new(credentials), config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &RelayState) {
    info!("relay shutting down");
    state.sessions.lock().await.close_all(protocol::SHUTTING_DOWN);
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

struct RelayState {
    sessions: Mutex<SessionTable>,
    credentials: SharedCredentials,
    next_id: AtomicU64,
    config: RelayConfig,
}

impl RelayState {
    fn new(credentials: Box<dyn CredentialStore>, config: RelayConfig) -> Self {
        Self {
            sessions: Mutex::new(SessionTable::new()),
            credentials: Arc::new(Mutex::new(credentials)),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn is_full(&self) -> bool {
        self.sessions.lock().await.len() >= self.config.max_sessions
    }

    /// Commits an authenticated connection to the session set. The capacity
    /// check and the insert happen under one lock.
    async fn join(
        &self,
        username: &str,
        address: IpAddr,
        outbox: Outbox,
    ) -> Result<SessionId, HandshakeError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.config.max_sessions {
            return Err(HandshakeError::RelayFull);
        }

        let id = self.next_id();
        sessions.admit(id, SessionRecord::new(username, address, outbox));
        Ok(id)
    }

    async fn relay_chat(&self, id: SessionId, text: &str) {
        self.sessions.lock().await.relay_chat(id, text);
    }

    async fn leave(&self, id: SessionId) {
        if !self.sessions.lock().await.depart(id) {
            debug!(id, "session was already removed");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<RelayState>,
) -> Result<()> {
    let address = peer.ip().to_canonical();
    let (reader, writer) = stream.into_split();
    let mut reader = line_reader(reader, state.config.read_buffer);
    let mut writer = writer;

    let username = match perform_handshake(&mut reader, &mut writer, &state).await {
        Ok(username) => username,
        Err(err) => {
            reject(&mut writer, peer, err).await;
            return Ok(());
        }
    };

    // Queued ahead of the join so it precedes the first directory, and only
    // written once the join has succeeded.
    let (outbox, mut inbox) = mpsc::channel(OUTBOX_CAPACITY);
    queue_banner(&outbox);

    let id = match state.join(&username, address, outbox).await {
        Ok(id) => id,
        Err(err) => {
            reject(&mut writer, peer, err).await;
            return Ok(());
        }
    };

    run_session(&state, id, &mut reader, &mut writer, &mut inbox).await;
    state.leave(id).await;

    Ok(())
}

async fn perform_handshake(
    reader: &mut LineReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    state: &RelayState,
) -> Result<String, HandshakeError> {
    if state.is_full().await {
        return Err(HandshakeError::RelayFull);
    }

    match timeout(
        state.config.handshake_timeout,
        handshake::authenticate(reader, writer, &state.credentials),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::TimedOut),
    }
}

async fn reject<W>(writer: &mut W, peer: SocketAddr, err: HandshakeError)
where
    W: AsyncWrite + Unpin,
{
    info!(peer = %peer, reason = %err, "handshake rejected");
    if let Some(reply) = err.reply() {
        if let Err(error) = write_line(writer, reply).await {
            debug!(?error, "failed to deliver handshake rejection");
        }
    }
}

fn queue_banner(outbox: &Outbox) {
    for line in protocol::BANNER {
        if outbox.try_send(line.to_string()).is_err() {
            warn!("outbox cannot hold the banner");
            return;
        }
    }
}

/// Relays the session's chat and drains its outbox until either side goes
/// away. Read errors, write errors and writes that stall past
/// `write_timeout` all count as a disconnect.
async fn run_session(
    state: &RelayState,
    id: SessionId,
    reader: &mut LineReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    inbox: &mut mpsc::Receiver<String>,
) {
    let write_timeout = state.config.write_timeout;
    loop {
        select! {
            incoming = read_line(reader) => match incoming {
                Ok(Some(text)) => {
                    if !text.trim().is_empty() {
                        state.relay_chat(id, &text).await;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(id, ?err, "failed to read from session");
                    break;
                }
            },
            outgoing = inbox.recv() => match outgoing {
                Some(line) => match timeout(write_timeout, write_line(writer, &line)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(id, ?err, "failed to deliver line to session");
                        break;
                    }
                    Err(_) => {
                        warn!(id, "session stopped reading, dropping it");
                        break;
                    }
                },
                // Removed from the table; nothing more will be queued.
                None => break,
            },
        }
    }
}
