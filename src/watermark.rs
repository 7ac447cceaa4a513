use std::{
    fmt, fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::PersistError,
    sources::{format_timestamp, parse_timestamp, Timestamp},
};

/// `published_at` of the last fully dispatched post.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub Timestamp);

impl Watermark {
    /// Value used when nothing was ever dispatched: `2000/01/01 00:00:00`.
    pub fn epoch() -> Self {
        let t = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self(t)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.0
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(&self.0))
    }
}

impl Serialize for Watermark {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(&self.0))
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_timestamp(&s).map(Watermark).map_err(serde::de::Error::custom)
    }
}

pub trait WatermarkStore: Send + Sync {
    /// Last persisted watermark, or [`Watermark::epoch`] if none exists yet.
    fn load(&self) -> Result<Watermark, PersistError>;

    /// Overwrites the persisted watermark.
    fn save(&self, watermark: Watermark) -> Result<(), PersistError>;
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    last_post_date: Watermark,
}

/// JSON file store. Writes go to a temp file next to the target and are
/// renamed over it, so a crash never leaves a half-written file.
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> Result<Watermark, PersistError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Watermark::epoch()),
            Err(e) => return Err(self.io_err(e)),
        };

        let state: StateFile =
            serde_json::from_slice(&bytes).map_err(|source| PersistError::Decode {
                path: self.path.clone(),
                source,
            })?;
        Ok(state.last_post_date)
    }

    fn save(&self, watermark: Watermark) -> Result<(), PersistError> {
        let json = serde_json::to_vec(&StateFile {
            last_post_date: watermark,
        })
        .map_err(PersistError::Encode)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&json).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        Ok(())
    }
}

/// Non-durable store, for dry runs and tests.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new(initial: Option<Watermark>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self) -> Result<Watermark, PersistError> {
        let value = self.value.lock().unwrap_or_else(|e| e.into_inner());
        Ok(value.unwrap_or_default())
    }

    fn save(&self, watermark: Watermark) -> Result<(), PersistError> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(watermark);
        Ok(())
    }
}
