use std::collections::HashMap;

use crate::messenger::{Destination, Messenger};

/// Maps post authors to the chat their images go to.
pub struct Router {
    channels: HashMap<String, Destination>,
    default: Destination,
}

impl Router {
    pub fn new(channels: HashMap<String, Destination>, default: Destination) -> Self {
        let channels = channels
            .into_iter()
            .map(|(author, dest)| (author.trim().to_owned(), dest))
            .collect();
        Self { channels, default }
    }

    pub fn default_destination(&self) -> &Destination {
        &self.default
    }

    /// Mapping entries sorted by author, for listing.
    pub fn entries(&self) -> Vec<(&str, &Destination)> {
        let mut entries: Vec<_> = self
            .channels
            .iter()
            .map(|(author, dest)| (author.as_str(), dest))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Mapped chat of `author` if it is still reachable, the default otherwise.
    pub async fn resolve(&self, author: &str, messenger: &dyn Messenger) -> Destination {
        let Some(mapped) = self.channels.get(author.trim()) else {
            tracing::debug!(author, "author not mapped, using default destination");
            return self.default.clone();
        };

        if messenger.get_destination(mapped).await.is_some() {
            mapped.clone()
        } else {
            tracing::warn!(author, chat = %mapped, "destination not found, falling back to default");
            self.default.clone()
        }
    }
}
