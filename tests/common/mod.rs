#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use diaryrelay::{
    dispatch::Dispatcher,
    error::{DownloadError, FeedError, PersistError, SendError},
    messenger::{BotIdentity, Destination, DestinationInfo, Messenger},
    router::Router,
    sources::{parse_timestamp, Attachment, FeedSource, ImageDownloader, ImageFetcher, Post},
    watermark::{MemoryWatermarkStore, Watermark, WatermarkStore},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Sent {
        chat: String,
        files: Vec<String>,
        caption: Option<String>,
        suppress_link_preview: bool,
    },
    Saved(Watermark),
}

pub type Log = Arc<Mutex<Vec<Event>>>;

pub fn ts(s: &str) -> Watermark {
    Watermark(parse_timestamp(s).unwrap())
}

pub fn post(id: u64, author: &str, t: &str, images: Vec<String>) -> Post {
    Post {
        id,
        url: format!("https://blog.example/diary/detail/{id}?ima=0000"),
        author: author.into(),
        title: format!("post {id}"),
        published_at: parse_timestamp(t).unwrap(),
        images,
    }
}

pub fn image_urls(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("https://img.example/{i}.jpg")).collect()
}

pub fn sends(log: &Log) -> Vec<Event> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::Sent { .. }))
        .cloned()
        .collect()
}

pub fn saves(log: &Log) -> Vec<Watermark> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Saved(w) => Some(*w),
            _ => None,
        })
        .collect()
}

pub struct FakeMessenger {
    pub log: Log,
    pub alive: HashSet<String>,
    /// Zero-based indexes of `send` calls that fail.
    pub failing_sends: HashSet<usize>,
    calls: AtomicUsize,
}

impl FakeMessenger {
    pub fn new(log: Log, alive: &[&str]) -> Self {
        Self {
            log,
            alive: alive.iter().map(|s| s.to_string()).collect(),
            failing_sends: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn identity(&self) -> Result<BotIdentity, SendError> {
        Ok(BotIdentity {
            id: 1,
            username: "diary_bot".into(),
        })
    }

    async fn get_destination(&self, id: &Destination) -> Option<DestinationInfo> {
        self.alive.contains(id.as_str()).then(|| DestinationInfo {
            id: id.clone(),
            name: format!("chat{id}"),
        })
    }

    async fn send(
        &self,
        destination: &Destination,
        attachments: Vec<Attachment>,
        caption: Option<&str>,
        suppress_link_preview: bool,
    ) -> Result<(), SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_sends.contains(&call) {
            return Err(SendError::Api {
                code: 400,
                description: "Bad Request: group send failed".into(),
            });
        }

        self.log.lock().unwrap().push(Event::Sent {
            chat: destination.0.clone(),
            files: attachments.into_iter().map(|a| a.file_name).collect(),
            caption: caption.map(str::to_owned),
            suppress_link_preview,
        });
        Ok(())
    }
}

/// Downloads succeed except for `failing` URLs. Earlier images take longer,
/// so concurrent downloads finish out of order.
pub struct FakeDownloader {
    pub failing: HashSet<String>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeDownloader {
    pub fn new(failing: &[String]) -> Self {
        Self {
            failing: failing.iter().cloned().collect(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageDownloader for FakeDownloader {
    async fn download(&self, url: &str) -> Result<Attachment, DownloadError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let file_name = url.rsplit('/').next().unwrap_or_default().to_owned();
        let n: u64 = file_name.trim_end_matches(".jpg").parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(n))).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(DownloadError::Status(404));
        }
        Ok(Attachment {
            file_name,
            bytes: url.as_bytes().to_vec(),
        })
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub pages: HashMap<String, Vec<String>>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch_images(&self, page_url: &str) -> Result<Vec<String>, FeedError> {
        self.calls.lock().unwrap().push(page_url.to_owned());
        self.pages
            .get(page_url)
            .cloned()
            .ok_or(FeedError::Status(404))
    }
}

/// Memory store that logs every save and can be told to fail.
pub struct RecordingStore {
    inner: MemoryWatermarkStore,
    log: Log,
    pub failures_left: AtomicUsize,
}

impl RecordingStore {
    pub fn new(log: Log, initial: Option<Watermark>) -> Self {
        Self {
            inner: MemoryWatermarkStore::new(initial),
            log,
            failures_left: AtomicUsize::new(0),
        }
    }
}

impl WatermarkStore for RecordingStore {
    fn load(&self) -> Result<Watermark, PersistError> {
        self.inner.load()
    }

    fn save(&self, watermark: Watermark) -> Result<(), PersistError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PersistError::Io {
                path: "last_post.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.log.lock().unwrap().push(Event::Saved(watermark));
        self.inner.save(watermark)
    }
}

/// Feed returning queued snapshots, then empty ones.
#[derive(Default)]
pub struct FakeFeed {
    pub snapshots: Mutex<VecDeque<Result<Vec<Post>, FeedError>>>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeFeed {
    pub fn with(snapshots: Vec<Result<Vec<Post>, FeedError>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn get_recent_posts(&self) -> Result<Vec<Post>, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.snapshots
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }
}

pub struct Harness {
    pub log: Log,
    pub messenger: Arc<FakeMessenger>,
    pub downloader: Arc<FakeDownloader>,
    pub fetcher: Arc<FakeFetcher>,
    pub store: Arc<RecordingStore>,
}

impl Harness {
    pub fn new(failing_images: &[String]) -> Self {
        let log: Log = Arc::default();
        Self {
            messenger: Arc::new(FakeMessenger::new(log.clone(), &["-100", "-1"])),
            downloader: Arc::new(FakeDownloader::new(failing_images)),
            fetcher: Arc::new(FakeFetcher::default()),
            store: Arc::new(RecordingStore::new(log.clone(), None)),
            log,
        }
    }

    pub fn with_failing_sends(mut self, calls: &[usize]) -> Self {
        Arc::get_mut(&mut self.messenger)
            .expect("messenger not shared yet")
            .failing_sends = calls.iter().copied().collect();
        self
    }

    pub fn router() -> Arc<Router> {
        let mut channels = HashMap::new();
        channels.insert("Author One".to_owned(), Destination::new("-100"));
        channels.insert("Author Gone".to_owned(), Destination::new("-999"));
        Arc::new(Router::new(channels, Destination::new("-1")))
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.messenger.clone(),
            self.fetcher.clone(),
            self.downloader.clone(),
            Self::router(),
            self.store.clone(),
        )
        .with_persist_backoff(Duration::from_millis(1))
    }
}
