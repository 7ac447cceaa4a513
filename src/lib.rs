//! Polls a blog diary feed and reposts the images of new posts to Telegram.

use std::time::Duration;

pub mod commands;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messenger;
pub mod poller;
pub mod router;
pub mod sources;
pub mod telegram;
pub mod watermark;

/// HTTP client shared by every outbound call.
pub fn build_http_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(request_timeout.min(Duration::from_secs(10)))
        .timeout(request_timeout)
        .build()
}
