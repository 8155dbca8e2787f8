//! Login-protected chat room with a peer-to-peer side channel.
//!
//! A relay server authenticates users over TCP, relays their public chat, and
//! keeps every client's copy of the online directory current. Clients use that
//! directory to message each other directly over UDP, without the relay.
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`relay`] accepts connections, runs each handshake on its own task, and
//!   owns the shared state.
//! - [`handshake`] is the register-or-login dialogue.
//! - [`sessions`] tracks open sessions, broadcasts, and publishes the
//!   directory on every join and leave.
//! - [`client`] multiplexes console input, the control stream and peer
//!   datagrams for a terminal user.
//! - [`console`] parses operator commands (`:q`, `:l`, `@name: text`).
//! - [`directory`] and [`protocol`] define what travels on the wire.
//! - [`credentials`] stores registered users; [`identity`] holds the
//!   username rules.

pub mod cli;
pub mod client;
pub mod console;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod protocol;
pub mod relay;
pub mod sessions;
