//! Authoritative set of open sessions on the relay.
//!
//! Every membership change goes through [`SessionTable`], so the directory it
//! publishes never contains a connection that has not finished its handshake
//! or that has already gone away.

use std::{collections::BTreeMap, net::IpAddr};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::{
    directory::{Directory, DirectoryEntry},
    protocol::{chat_line, encode_directory, joined_notice, offline_notice},
};

pub type SessionId = u64;

/// Lines queued for delivery to one session's connection.
pub type Outbox = mpsc::Sender<String>;

/// Lines a session may have queued but not yet written. A session that falls
/// this far behind is dropped.
pub const OUTBOX_CAPACITY: usize = 128;

#[derive(Debug)]
pub struct SessionRecord {
    pub username: String,
    pub address: IpAddr,
    outbox: Outbox,
}

impl SessionRecord {
    pub fn new(username: impl Into<String>, address: IpAddr, outbox: Outbox) -> Self {
        Self {
            username: username.into(),
            address,
            outbox,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, SessionRecord>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn directory(&self) -> Directory {
        self.sessions
            .values()
            .map(|record| DirectoryEntry::new(record.username.clone(), record.address))
            .collect()
    }

    /// Adds a freshly authenticated session, tells everyone else, and
    /// republishes the directory to all sessions including the new one.
    pub fn admit(&mut self, id: SessionId, record: SessionRecord) {
        let notice = joined_notice(&record.username, record.address);
        info!(id, username = %record.username, address = %record.address, "session joined");

        self.sessions.insert(id, record);
        let mut departed = self.broadcast(&notice, Some(id));
        departed.extend(self.publish_directory());
        self.settle(departed);
    }

    /// Removes a session whose connection ended. Returns `false` if the
    /// session was already gone (for instance dropped by a failed broadcast).
    pub fn depart(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(record) => {
                self.settle(vec![(id, record)]);
                true
            }
            None => false,
        }
    }

    /// Relays one chat line from `sender` to every other session.
    pub fn relay_chat(&mut self, sender: SessionId, text: &str) {
        let Some(record) = self.sessions.get(&sender) else {
            debug!(sender, "dropping chat from a session that already left");
            return;
        };

        let line = chat_line(&record.username, record.address, text);
        info!(sender, username = %record.username, %text, "relaying chat");
        let departed = self.broadcast(&line, Some(sender));
        self.settle(departed);
    }

    /// Sends `line` to every session but `exclude` and returns the sessions
    /// that could not take it, either closed or with a full outbox. Those are
    /// already removed from the table and must be announced through
    /// [`Self::settle`].
    fn broadcast(
        &mut self,
        line: &str,
        exclude: Option<SessionId>,
    ) -> Vec<(SessionId, SessionRecord)> {
        let failed: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter(|(id, record)| match record.outbox.try_send(line.to_string()) {
                Ok(()) => false,
                Err(TrySendError::Full(_)) => {
                    warn!(id = **id, username = %record.username, "outbox full");
                    true
                }
                Err(TrySendError::Closed(_)) => true,
            })
            .map(|(id, _)| *id)
            .collect();

        failed
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id).map(|record| (id, record)))
            .collect()
    }

    fn publish_directory(&mut self) -> Vec<(SessionId, SessionRecord)> {
        let directory = self.directory();
        match encode_directory(&directory) {
            Ok(line) => {
                debug!(entries = directory.len(), "publishing directory");
                self.broadcast(&line, None)
            }
            Err(error) => {
                warn!(?error, "failed to encode directory");
                Vec::new()
            }
        }
    }

    /// Announces each departed session and republishes the directory. A
    /// broadcast can fail on further sessions, which are announced in turn.
    fn settle(&mut self, mut departed: Vec<(SessionId, SessionRecord)>) {
        while let Some((id, record)) = departed.pop() {
            info!(id, username = %record.username, address = %record.address, "session left");
            let notice = offline_notice(&record.username, record.address);
            departed.extend(self.broadcast(&notice, None));
            departed.extend(self.publish_directory());
        }
    }

    /// Sends a final line to every session and forgets them all. Dropping
    /// the outboxes ends each session task once its queue is flushed.
    pub fn close_all(&mut self, farewell: &str) {
        for record in self.sessions.values() {
            let _ = record.outbox.try_send(farewell.to_string());
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::protocol::{DIRECTORY_MARKER, ServerLine};

    fn ip(last: u8) -> IpAddr {
        [10, 0, 0, last].into()
    }

    fn join(table: &mut SessionTable, id: SessionId, name: &str) -> Receiver<String> {
        join_with_capacity(table, id, name, OUTBOX_CAPACITY)
    }

    fn join_with_capacity(
        table: &mut SessionTable,
        id: SessionId,
        name: &str,
        capacity: usize,
    ) -> Receiver<String> {
        let (outbox, inbox) = mpsc::channel(capacity);
        table.admit(id, SessionRecord::new(name, ip(id as u8), outbox));
        inbox
    }

    fn drain(inbox: &mut Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = inbox.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn directories(lines: &[String]) -> Vec<Vec<String>> {
        lines
            .iter()
            .filter(|line| line.starts_with(DIRECTORY_MARKER))
            .map(|line| match ServerLine::parse(line).unwrap() {
                ServerLine::Directory(directory) => {
                    directory.identities().map(str::to_string).collect()
                }
                ServerLine::Text(_) => unreachable!(),
            })
            .collect()
    }

    fn texts(lines: &[String]) -> Vec<&str> {
        lines
            .iter()
            .filter(|line| !line.starts_with(DIRECTORY_MARKER))
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn join_notifies_others_and_publishes_to_all() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        assert_eq!(directories(&drain(&mut alice)), vec![vec!["alice"]]);

        let mut bob = join(&mut table, 2, "bob");

        let alice_lines = drain(&mut alice);
        assert_eq!(texts(&alice_lines), vec!["bob (IP: 10.0.0.2) connected"]);
        assert_eq!(directories(&alice_lines), vec![vec!["alice", "bob"]]);

        let bob_lines = drain(&mut bob);
        assert!(texts(&bob_lines).is_empty());
        assert_eq!(directories(&bob_lines), vec![vec!["alice", "bob"]]);
    }

    #[test]
    fn chat_reaches_everyone_but_the_sender() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        let mut bob = join(&mut table, 2, "bob");
        let mut carol = join(&mut table, 3, "carol");
        drain(&mut alice);
        drain(&mut bob);
        drain(&mut carol);

        table.relay_chat(1, "hello");

        assert!(drain(&mut alice).is_empty());
        assert_eq!(drain(&mut bob), vec!["alice (IP: 10.0.0.1) said: hello"]);
        assert_eq!(drain(&mut carol), vec!["alice (IP: 10.0.0.1) said: hello"]);
    }

    #[test]
    fn chat_does_not_republish_the_directory() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        let mut bob = join(&mut table, 2, "bob");
        drain(&mut alice);
        drain(&mut bob);

        table.relay_chat(2, "one");
        table.relay_chat(2, "two");

        assert!(directories(&drain(&mut alice)).is_empty());
    }

    #[test]
    fn leaving_removes_exactly_that_entry() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        let _bob = join(&mut table, 2, "bob");
        let mut carol = join(&mut table, 3, "carol");
        drain(&mut alice);
        drain(&mut carol);

        assert!(table.depart(2));
        assert!(!table.depart(2));

        let lines = drain(&mut alice);
        assert_eq!(texts(&lines), vec!["bob (IP: 10.0.0.2) is offline"]);
        assert_eq!(directories(&lines), vec![vec!["alice", "carol"]]);
        assert_eq!(directories(&drain(&mut carol)), vec![vec!["alice", "carol"]]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn failed_delivery_drops_only_that_session() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        let bob = join(&mut table, 2, "bob");
        let mut carol = join(&mut table, 3, "carol");
        drain(&mut alice);
        drain(&mut carol);

        // Bob's connection task is gone, so his outbox is closed.
        drop(bob);
        table.relay_chat(1, "still there?");

        assert!(!table.contains(2));
        let carol_lines = drain(&mut carol);
        assert_eq!(
            texts(&carol_lines),
            vec![
                "alice (IP: 10.0.0.1) said: still there?",
                "bob (IP: 10.0.0.2) is offline",
            ]
        );
        assert_eq!(directories(&carol_lines), vec![vec!["alice", "carol"]]);
        assert_eq!(
            texts(&drain(&mut alice)),
            vec!["bob (IP: 10.0.0.2) is offline"]
        );
    }

    #[test]
    fn session_that_stops_draining_is_dropped() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        // Bob's only slot is taken by his first directory and never read.
        let _bob = join_with_capacity(&mut table, 2, "bob", 1);
        drain(&mut alice);

        table.relay_chat(1, "are you reading?");

        assert!(!table.contains(2));
        assert_eq!(table.len(), 1);
        let lines = drain(&mut alice);
        assert_eq!(texts(&lines), vec!["bob (IP: 10.0.0.2) is offline"]);
        assert_eq!(directories(&lines), vec![vec!["alice"]]);
    }

    #[test]
    fn directory_tracks_open_sessions_one_to_one() {
        let mut table = SessionTable::new();
        let _alice = join(&mut table, 1, "alice");
        let _bob = join(&mut table, 2, "bob");
        assert_eq!(table.directory().len(), 2);

        table.depart(1);
        let directory = table.directory();
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.address_of("bob"), Some(ip(2)));
        assert_eq!(directory.address_of("alice"), None);
    }

    #[test]
    fn close_all_sends_farewell_and_empties() {
        let mut table = SessionTable::new();
        let mut alice = join(&mut table, 1, "alice");
        drain(&mut alice);

        table.close_all("bye");

        assert!(table.is_empty());
        assert_eq!(drain(&mut alice), vec!["bye"]);
        assert!(alice.try_recv().is_err());
    }
}
