//! Decides which posts of a feed snapshot still have to be dispatched.

use crate::{sources::Post, watermark::Watermark};

#[derive(Debug, PartialEq, Eq)]
pub enum Detection {
    /// The feed returned nothing at all.
    NoPosts,
    /// Every post is at or below the watermark.
    UpToDate,
    /// Posts to dispatch, oldest first.
    New(Vec<Post>),
}

/// On the first run only the newest post is returned, whatever the watermark,
/// so that state gets seeded without backfilling history. Otherwise every post
/// newer than `watermark`, ascending by `(published_at, id)`.
pub fn detect(posts: &[Post], watermark: Watermark, is_first_run: bool) -> Detection {
    if posts.is_empty() {
        return Detection::NoPosts;
    }

    let mut new_posts: Vec<Post> = if is_first_run {
        posts
            .iter()
            .max_by_key(|p| (p.published_at, p.id))
            .cloned()
            .into_iter()
            .collect()
    } else {
        posts
            .iter()
            .filter(|p| p.published_at > watermark.timestamp())
            .cloned()
            .collect()
    };

    if new_posts.is_empty() {
        return Detection::UpToDate;
    }

    new_posts.sort_by_key(|p| (p.published_at, p.id));
    Detection::New(new_posts)
}
