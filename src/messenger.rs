use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::SendError, sources::Attachment};

/// Platform limit on attachments per message.
pub const MAX_BATCH_SIZE: usize = 10;

/// Chat a post can be delivered to. Numeric id or `@channelname`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(pub String);

impl Destination {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Telegram accepts signed integers and public `@usernames`.
    pub fn is_valid_id(id: &str) -> bool {
        let id = id.trim();
        id.parse::<i64>().is_ok()
            || (id.len() > 1
                && id.starts_with('@')
                && id[1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationInfo {
    pub id: Destination,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
}

/// Messaging platform as seen by the dispatch pipeline, router and commands.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Who we are logged in as. Fails when the credentials are rejected.
    async fn identity(&self) -> Result<BotIdentity, SendError>;

    /// `None` when the chat does not exist or is not reachable by the bot.
    async fn get_destination(&self, id: &Destination) -> Option<DestinationInfo>;

    /// Sends up to [`MAX_BATCH_SIZE`] attachments as one message.
    async fn send(
        &self,
        destination: &Destination,
        attachments: Vec<Attachment>,
        caption: Option<&str>,
        suppress_link_preview: bool,
    ) -> Result<(), SendError>;

    async fn send_text(&self, destination: &Destination, text: &str) -> Result<(), SendError> {
        self.send(destination, vec![], Some(text), true).await
    }
}
