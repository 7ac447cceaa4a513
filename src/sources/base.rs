use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::{DownloadError, FeedError};

/// Feed timestamps carry no zone; they are compared as written by the site.
pub type Timestamp = NaiveDateTime;

/// Format used by the blog API and by the persisted watermark.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

pub fn parse_timestamp(s: &str) -> Result<Timestamp, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
}

pub fn format_timestamp(t: &Timestamp) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Drops query string and fragment (tracking parameters) from a URL.
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Generic blog post, as fetched from a `FeedSource` within one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub id: u64,
    /// Canonical post page. Already stripped of app-only path segments.
    pub url: String,
    pub author: String,
    pub title: String,
    pub published_at: Timestamp,
    /// Image URLs in page order. Empty when the feed did not embed the body,
    /// in which case the page has to be scraped.
    pub images: Vec<String>,
}

/// Downloaded image, kept in memory until its batch is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Current snapshot of recent posts. An empty vec is a valid answer and
    /// is distinct from a transport error.
    async fn get_recent_posts(&self) -> Result<Vec<Post>, FeedError>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Ordered, deduplicated image URLs of the post page.
    async fn fetch_images(&self, page_url: &str) -> Result<Vec<String>, FeedError>;
}

#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Attachment, DownloadError>;
}
