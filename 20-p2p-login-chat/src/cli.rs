use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::{client::ClientConfig, relay::RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server that authenticates users and relays chat.
    Server(ServerArgs),
    /// Join a relay and chat, publicly or directly with peers.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:12000")]
    pub listen: SocketAddr,

    /// JSON file holding registered users.
    #[arg(long, default_value = "users.json")]
    pub credentials: PathBuf,

    /// Maximum number of sessions online at once.
    #[arg(long, default_value_t = 10)]
    pub max_sessions: usize,

    /// Longest line accepted from a client, in bytes.
    #[arg(long, default_value_t = 2048)]
    pub read_buffer: usize,

    /// Seconds a connection may take to finish logging in or registering.
    #[arg(long, default_value_t = 120)]
    pub handshake_timeout: u64,

    /// Seconds a session may take to accept one line before it is dropped.
    #[arg(long, default_value_t = 10)]
    pub write_timeout: u64,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_sessions: self.max_sessions,
            read_buffer: self.read_buffer,
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
            write_timeout: Duration::from_secs(self.write_timeout),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:12000")]
    pub server: SocketAddr,

    /// Local IP both sockets bind to; peers reach us here.
    #[arg(long, default_value = "0.0.0.0")]
    pub local_ip: IpAddr,

    /// Peer-channel UDP port, the same for every client.
    #[arg(long, default_value_t = 13000)]
    pub peer_port: u16,

    /// Longest line or datagram read, in bytes.
    #[arg(long, default_value_t = 2048)]
    pub read_buffer: usize,

    /// Milliseconds to wait on connecting and on each send.
    #[arg(long, default_value_t = 2000)]
    pub io_timeout_ms: u64,
}

impl ClientArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server: self.server,
            local_ip: self.local_ip,
            peer_port: self.peer_port,
            read_buffer: self.read_buffer,
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_ports() {
        let cli = Cli::try_parse_from(["p2p_login_chat", "client"]).unwrap();
        let Command::Client(args) = cli.command else {
            panic!("expected client subcommand");
        };
        let config = args.client_config();
        assert_eq!(config.server, "127.0.0.1:12000".parse().unwrap());
        assert_eq!(config.peer_port, 13000);
        assert_eq!(config.io_timeout, Duration::from_secs(2));

        let cli = Cli::try_parse_from(["p2p_login_chat", "server", "--max-sessions", "3"]).unwrap();
        let Command::Server(args) = cli.command else {
            panic!("expected server subcommand");
        };
        assert_eq!(args.listen.port(), 12000);
        assert_eq!(args.relay_config().max_sessions, 3);
        assert_eq!(args.relay_config().write_timeout, Duration::from_secs(10));
    }
}
