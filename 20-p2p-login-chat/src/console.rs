//! Operator console commands.

use anyhow::{Result, anyhow};

use crate::identity;

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `:q`
    Quit,
    /// `:l`
    List,
    /// `@name:text`, sent straight to the peer over the datagram channel.
    Direct { to: String, text: String },
    /// Anything else goes to the relay as typed.
    Chat(String),
}

impl ConsoleCommand {
    /// Parses one console line. Blank lines yield `Ok(None)`; a malformed
    /// direct message is an error meant for the operator.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        match trimmed {
            ":q" => return Ok(Some(ConsoleCommand::Quit)),
            ":l" => return Ok(Some(ConsoleCommand::List)),
            _ => {}
        }

        let Some(rest) = trimmed.strip_prefix('@') else {
            return Ok(Some(ConsoleCommand::Chat(line.to_string())));
        };

        let (to, text) = rest
            .split_once(':')
            .ok_or_else(|| anyhow!("direct messages look like '@username: message'"))?;
        let to = identity::normalize(to);
        if to.is_empty() {
            return Err(anyhow!("direct message is missing a username"));
        }
        let text = text.trim_start();
        if text.is_empty() {
            return Err(anyhow!("direct message to {to} is empty"));
        }

        Ok(Some(ConsoleCommand::Direct {
            to,
            text: text.to_string(),
        }))
    }
}
