//! Delivers one post: images, batching, caption, then the watermark.

use std::{sync::Arc, time::Duration};

use futures::{pin_mut, stream, StreamExt};

use crate::{
    error::{DispatchError, PersistError},
    messenger::{Destination, Messenger, MAX_BATCH_SIZE},
    router::Router,
    sources::{clean_url, format_timestamp, Attachment, ImageDownloader, ImageFetcher, Post},
    watermark::{Watermark, WatermarkStore},
};

/// Attempts made to persist the watermark before giving up.
pub const PERSIST_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub post_id: u64,
    pub destination: Option<Destination>,
    pub images_found: usize,
    pub images_downloaded: usize,
    /// URLs that could not be downloaded, in list order.
    pub failed_images: Vec<String>,
    pub batches_sent: usize,
    pub batches_failed: usize,
    /// Attachments of successfully sent batches.
    pub images_sent: usize,
}

pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    fetcher: Arc<dyn ImageFetcher>,
    downloader: Arc<dyn ImageDownloader>,
    router: Arc<Router>,
    store: Arc<dyn WatermarkStore>,
    download_concurrency: usize,
    persist_backoff: Duration,
}

/// Text sent with the first batch of a post.
pub fn caption_for(post: &Post) -> String {
    format!(
        "👤 {}\n📝 {}\n🕒 {}\n🔗 {}",
        post.author,
        post.title,
        format_timestamp(&post.published_at),
        clean_url(&post.url)
    )
}

impl Dispatcher {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        fetcher: Arc<dyn ImageFetcher>,
        downloader: Arc<dyn ImageDownloader>,
        router: Arc<Router>,
        store: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            messenger,
            fetcher,
            downloader,
            router,
            store,
            download_concurrency: 4,
            persist_backoff: Duration::from_millis(500),
        }
    }

    /// Number of image downloads kept in flight. Send order is unaffected.
    pub fn with_download_concurrency(mut self, n: usize) -> Self {
        self.download_concurrency = n.max(1);
        self
    }

    pub fn with_persist_backoff(mut self, backoff: Duration) -> Self {
        self.persist_backoff = backoff;
        self
    }

    /// Image and send failures are logged and counted, never returned: the
    /// post counts as processed and `watermark` moves to its timestamp either
    /// way. Only a watermark that cannot be persisted is an error.
    #[tracing::instrument(skip_all, fields(post_id = post.id, author = %post.author))]
    pub async fn dispatch(
        &self,
        post: &Post,
        watermark: &mut Watermark,
    ) -> Result<DispatchReport, DispatchError> {
        tracing::info!(url = %post.url, "processing post");

        let mut report = DispatchReport {
            post_id: post.id,
            ..Default::default()
        };

        let images = self.resolve_images(post).await;
        report.images_found = images.len();

        let destination = self.router.resolve(&post.author, self.messenger.as_ref()).await;
        report.destination = Some(destination.clone());

        if images.is_empty() {
            tracing::info!("no images found in post");
        } else {
            self.send_images(post, &images, &destination, &mut report).await;

            if report.images_downloaded == 0 {
                tracing::warn!(
                    images = images.len(),
                    "no image of the post could be downloaded, skipping it anyway"
                );
            }
            tracing::info!(
                sent = report.images_sent,
                found = report.images_found,
                chat = %destination,
                "uploaded images"
            );
        }

        self.advance(post, watermark).await?;
        Ok(report)
    }

    async fn resolve_images(&self, post: &Post) -> Vec<String> {
        if !post.images.is_empty() {
            return post.images.clone();
        }

        match self.fetcher.fetch_images(&post.url).await {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(error = %e, "cannot scrape post page for images");
                vec![]
            }
        }
    }

    async fn send_images(
        &self,
        post: &Post,
        images: &[String],
        destination: &Destination,
        report: &mut DispatchReport,
    ) {
        let mut caption = Some(caption_for(post));
        let mut batch: Vec<Attachment> = Vec::with_capacity(MAX_BATCH_SIZE);

        // Downloads overlap, but `buffered` yields results in list order.
        let downloads = stream::iter(images.to_vec())
            .map(|url| {
                let downloader = Arc::clone(&self.downloader);
                async move {
                    let result = downloader.download(&url).await;
                    (url, result)
                }
            })
            .buffered(self.download_concurrency);
        pin_mut!(downloads);

        while let Some((url, result)) = downloads.next().await {
            match result {
                Ok(attachment) => {
                    report.images_downloaded += 1;
                    batch.push(attachment);
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "failed to download image");
                    report.failed_images.push(url);
                    continue;
                }
            }

            if batch.len() == MAX_BATCH_SIZE {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(MAX_BATCH_SIZE));
                self.flush(destination, full, caption.take(), report).await;
            }
        }

        if !batch.is_empty() {
            self.flush(destination, batch, caption.take(), report).await;
        }
    }

    async fn flush(
        &self,
        destination: &Destination,
        batch: Vec<Attachment>,
        caption: Option<String>,
        report: &mut DispatchReport,
    ) {
        let count = batch.len();
        match self
            .messenger
            .send(destination, batch, caption.as_deref(), true)
            .await
        {
            Ok(()) => {
                report.batches_sent += 1;
                report.images_sent += count;
            }
            Err(e) => {
                report.batches_failed += 1;
                tracing::error!(chat = %destination, count, error = %e, "failed to send batch");
            }
        }
    }

    async fn advance(&self, post: &Post, watermark: &mut Watermark) -> Result<(), DispatchError> {
        let next = Watermark(post.published_at);
        if next <= *watermark {
            tracing::debug!(%watermark, "post is not newer than the watermark, keeping it");
            return Ok(());
        }

        self.persist(next).await?;
        *watermark = next;
        tracing::debug!(%watermark, "watermark advanced");
        Ok(())
    }

    async fn persist(&self, watermark: Watermark) -> Result<(), DispatchError> {
        let mut attempt = 1;
        loop {
            match self.save(watermark).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= PERSIST_ATTEMPTS => {
                    return Err(DispatchError::Persist {
                        attempts: attempt,
                        source,
                    })
                }
                Err(e) => {
                    tracing::error!(attempt, %watermark, error = %e, "failed to persist watermark, retrying");
                    tokio::time::sleep(self.persist_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Stores do blocking file I/O (write + fsync), keep it off the workers.
    async fn save(&self, watermark: Watermark) -> Result<(), PersistError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(watermark)).await?
    }
}
