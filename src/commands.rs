//! Read-only chat commands: `/ping`, `/status`, `/channels`.

use std::{sync::Arc, time::Duration, time::Instant};

use crate::{
    messenger::Messenger,
    poller::{PollStatus, Poller},
    router::Router,
    telegram::TelegramClient,
};

const LONG_POLL: Duration = Duration::from_secs(25);
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Ping,
    Status,
    Channels,
}

impl Command {
    /// Accepts `/cmd`, `/cmd@botname` and `!cmd`, case-insensitively.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.strip_prefix('/').or_else(|| word.strip_prefix('!'))?;
        let name = word.split('@').next().unwrap_or(word).to_lowercase();

        match name.as_str() {
            "ping" => Some(Command::Ping),
            "status" => Some(Command::Status),
            "channels" => Some(Command::Channels),
            _ => None,
        }
    }
}

pub struct CommandContext {
    pub messenger: Arc<dyn Messenger>,
    pub router: Arc<Router>,
    pub poller: Arc<Poller>,
}

pub fn format_status(status: &PollStatus, running: bool) -> String {
    let last_check = status
        .last_check
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".into());

    [
        "🤖 Bot Status: Online".to_owned(),
        format!("⏱️ Last Check: {last_check}"),
        format!("📝 Last Post Date: {}", status.watermark),
        format!("📦 Posts Dispatched: {}", status.posts_dispatched),
        format!("🔄 Check Task Running: {running}"),
        format!("⏳ Check Interval: {} seconds", status.interval.as_secs()),
    ]
    .join("\n")
}

pub async fn respond(command: Command, ctx: &CommandContext) -> String {
    match command {
        Command::Ping => {
            let started = Instant::now();
            match ctx.messenger.identity().await {
                Ok(_) => format!("Pong! Latency: {} ms", started.elapsed().as_millis()),
                Err(e) => format!("Pong? Platform unreachable: {e}"),
            }
        }
        Command::Status => {
            let status = ctx
                .poller
                .status()
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            format_status(&status, ctx.poller.is_running())
        }
        Command::Channels => {
            let mut lines = vec!["📢 Active Channels:".to_owned()];
            for (author, dest) in ctx.router.entries() {
                let line = match ctx.messenger.get_destination(dest).await {
                    Some(info) => format!("✅ {author}: {}", info.name),
                    None => format!("❌ {author}: Not Found"),
                };
                lines.push(line);
            }

            let default = ctx.router.default_destination();
            let name = match ctx.messenger.get_destination(default).await {
                Some(info) => info.name,
                None => default.to_string(),
            };
            lines.push(format!("Default Channel: #{name}"));
            lines.join("\n")
        }
    }
}

/// Answers commands until the task is aborted. Transport errors are retried.
pub async fn run_listener(client: Arc<TelegramClient>, ctx: CommandContext) {
    let mut offset = 0;

    loop {
        let updates = match client.get_updates(offset, LONG_POLL).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "cannot fetch updates");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if update.from_bot {
                continue;
            }
            let Some(command) = Command::parse(&update.text) else {
                continue;
            };

            tracing::debug!(?command, chat = %update.chat, "answering command");
            let reply = respond(command, &ctx).await;
            if let Err(e) = ctx.messenger.send_text(&update.chat, &reply).await {
                tracing::warn!(chat = %update.chat, error = %e, "cannot answer command");
            }
        }
    }
}
