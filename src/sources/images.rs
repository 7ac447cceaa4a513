use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{Attachment, ImageDownloader, ImageFetcher};
use crate::error::{DownloadError, FeedError};

lazy_static! {
    static ref IMG_SELECTOR: Selector = Selector::parse("img[src]").expect("static selector");
    /// Body of a diary entry on the site; a generic `article` otherwise.
    static ref POST_BODY_SELECTOR: Selector =
        Selector::parse(".box-article, article").expect("static selector");
}

/// Every `img[src]` of `html` in document order, resolved against `base`,
/// first occurrence wins.
pub fn extract_images(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_fragment(html);
    collect_images(document.select(&IMG_SELECTOR), base)
}

/// Like [`extract_images`] for a full post page, limited to the post body so
/// that site chrome (logo, navigation, other members' thumbnails) is left
/// out. Pages without a recognizable body are scanned whole.
pub fn extract_post_images(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    match document.select(&POST_BODY_SELECTOR).next() {
        Some(body) => collect_images(body.select(&IMG_SELECTOR), base),
        None => {
            tracing::debug!("no post body container, scanning the whole page");
            collect_images(document.select(&IMG_SELECTOR), base)
        }
    }
}

fn collect_images<'a>(elements: impl Iterator<Item = ElementRef<'a>>, base: &Url) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();

    for element in elements {
        let Some(src) = element.value().attr("src") else {
            continue;
        };
        let src = src.trim();
        if src.is_empty() {
            continue;
        }

        let resolved = match base.join(src) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url.to_string(),
            Ok(url) => {
                tracing::debug!(%url, "skipping non-http image source");
                continue;
            }
            Err(e) => {
                tracing::debug!(src, error = %e, "skipping unresolvable image source");
                continue;
            }
        };

        if !images.contains(&resolved) {
            images.push(resolved);
        }
    }

    images
}

/// File name used for the upload: last path segment of the image URL.
pub fn file_name_for(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "image.jpg".to_owned())
}

/// Scrapes a post page for its images.
pub struct HtmlImageFetcher {
    client: Client,
    base: Url,
}

impl HtmlImageFetcher {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl ImageFetcher for HtmlImageFetcher {
    async fn fetch_images(&self, page_url: &str) -> Result<Vec<String>, FeedError> {
        let res = self.client.get(page_url).send().await?;
        if !res.status().is_success() {
            return Err(FeedError::Status(res.status().as_u16()));
        }
        let html = res.text().await?;

        Ok(extract_post_images(&html, &self.base))
    }
}

pub struct HttpImageDownloader {
    client: Client,
}

impl HttpImageDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    async fn download(&self, url: &str) -> Result<Attachment, DownloadError> {
        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(DownloadError::Status(res.status().as_u16()));
        }
        let bytes = res.bytes().await?;

        Ok(Attachment {
            file_name: file_name_for(url),
            bytes: bytes.to_vec(),
        })
    }
}
