use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{clean_url, images::extract_images, parse_timestamp, FeedSource, Post};
use crate::error::FeedError;

lazy_static! {
    /// Links returned by the API point at the app (`/s/s46app/...`), not the site.
    static ref APP_SEGMENT: Regex = Regex::new(r"/s/(\w+)app/").expect("static regex");
}

pub struct DiaryClient {
    client: Client,
    api_url: String,
    site_base: Url,
    /// Number of posts requested per poll.
    limit: u32,
}

#[derive(Deserialize)]
struct DiaryResponse {
    #[serde(default)]
    blog: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawBlog {
    id: RawId,
    link: String,
    creator: String,
    title: String,
    pubdate: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn parse(&self) -> Option<u64> {
        match self {
            RawId::Number(n) => Some(*n),
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl DiaryClient {
    pub fn new(client: Client, api_url: String, site_base: Url, limit: u32) -> Self {
        Self {
            client,
            api_url,
            site_base,
            limit,
        }
    }

    fn decode(&self, body: &str) -> Result<Vec<Post>, FeedError> {
        let data: DiaryResponse = serde_json::from_str(body)?;

        let mut posts = Vec::with_capacity(data.blog.len());
        for entry in data.blog {
            match serde_json::from_value::<RawBlog>(entry) {
                Ok(raw) => {
                    if let Some(post) = self.to_post(raw) {
                        posts.push(post);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed blog entry"),
            }
        }

        Ok(posts)
    }

    fn to_post(&self, raw: RawBlog) -> Option<Post> {
        let Some(id) = raw.id.parse() else {
            tracing::warn!(link = %raw.link, "skipping blog entry with invalid id");
            return None;
        };
        let published_at = match parse_timestamp(&raw.pubdate) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(id, pubdate = %raw.pubdate, error = %e, "skipping blog entry with invalid date");
                return None;
            }
        };

        let images = match raw.content.as_deref() {
            Some(html) if html.contains("<img") => extract_images(html, &self.site_base),
            _ => vec![],
        };

        Some(Post {
            id,
            url: normalize_link(&raw.link),
            author: raw.creator.trim().to_owned(),
            title: raw.title,
            published_at,
            images,
        })
    }
}

/// Site URL of a post given the link the app API returns.
pub fn normalize_link(link: &str) -> String {
    APP_SEGMENT.replace(clean_url(link), "/s/$1/").into_owned()
}

#[async_trait]
impl FeedSource for DiaryClient {
    async fn get_recent_posts(&self) -> Result<Vec<Post>, FeedError> {
        let limit = self.limit.to_string();
        let res = self
            .client
            .get(&self.api_url)
            .query(&[("cd", "blog"), ("get", "B"), ("getnum", limit.as_str()), ("st", "0")])
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(FeedError::Status(res.status().as_u16()));
        }

        let body = res.text().await?;
        self.decode(&body)
    }
}
