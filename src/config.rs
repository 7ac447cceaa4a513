use std::{collections::HashMap, ffi::OsString, fs, io::ErrorKind, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, messenger::Destination};

const CHANNEL_PREFIX: &str = "CHANNEL_";

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Config {
    /// Watermark file. Can be redefined on the command line.
    pub state: Option<String>,
    pub interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub download_concurrency: Option<usize>,

    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub default_chat_id: Option<String>,
    /// author name -> chat id
    #[serde(default)]
    pub channels: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub api_url: String,
    pub site_base: String,
    pub limit: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: "https://sakurazaka46.com/s/s46app/api/json/diary".into(),
            site_base: "https://sakurazaka46.com".into(),
            limit: 3,
        }
    }
}

/// Environment pairs usable by [`Config::apply_env`]. Variables whose name or
/// value is not valid UTF-8 are skipped.
pub fn utf8_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter().filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
        (Ok(key), Ok(value)) => Some((key, value)),
        (key, _) => {
            tracing::debug!(key = ?key, "skipping non utf-8 environment variable");
            None
        }
    })
}

/// Fully resolved configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub token: String,
    pub default_chat: Destination,
    pub channels: HashMap<String, Destination>,
    pub feed: FeedConfig,
    pub state: Option<String>,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub download_concurrency: usize,
}

impl Config {
    /// Reads a TOML config. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file, using environment only");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let cfg = String::from_utf8_lossy(&bytes);
        Ok(toml::from_str(&cfg)?)
    }

    /// Applies `BOT_TOKEN`, `DEFAULT_CHANNEL_ID`, `CHECK_INTERVAL` and every
    /// `CHANNEL_<NAME>` (underscores in the name become spaces).
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim();
            match key.as_str() {
                "BOT_TOKEN" => self.telegram.token = Some(value.to_owned()),
                "DEFAULT_CHANNEL_ID" => self.telegram.default_chat_id = Some(value.to_owned()),
                "CHECK_INTERVAL" => match value.parse() {
                    Ok(secs) => self.interval_secs = Some(secs),
                    Err(_) => tracing::warn!(value, "ignoring invalid CHECK_INTERVAL"),
                },
                _ => {
                    let Some(name) = key.strip_prefix(CHANNEL_PREFIX) else {
                        continue;
                    };
                    if name.is_empty() || !Destination::is_valid_id(value) {
                        tracing::warn!(%key, "ignoring channel variable without a valid chat id");
                        continue;
                    }
                    self.telegram
                        .channels
                        .insert(name.replace('_', " "), value.to_owned());
                }
            }
        }
    }

    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let token = self
            .telegram
            .token
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("BOT_TOKEN"))?;
        let default_chat = self
            .telegram
            .default_chat_id
            .filter(|id| Destination::is_valid_id(id))
            .map(Destination)
            .ok_or(ConfigError::Missing("DEFAULT_CHANNEL_ID"))?;

        let channels = self
            .telegram
            .channels
            .into_iter()
            .map(|(author, id)| (author, Destination(id)))
            .collect();

        Ok(Settings {
            token,
            default_chat,
            channels,
            feed: self.feed,
            state: self.state,
            interval: Duration::from_secs(self.interval_secs.unwrap_or(5).max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.unwrap_or(30).max(1)),
            download_concurrency: self.download_concurrency.unwrap_or(4).max(1),
        })
    }
}
