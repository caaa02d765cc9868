//! Tracked review comment lifecycle
//!
//! A run's results live in a single comment on the review thread. The comment
//! is found again on later runs through a marker embedding a stable UUID, and
//! updated in place; it is only created when no marked comment exists.

pub mod retry;
pub mod strategy;
pub mod truncate;

pub use retry::{classify, ErrorClass, RetryPolicy};
pub use strategy::PostStrategy;
pub use truncate::{truncate_body, TRUNCATION_SUFFIX};

use crate::cancel::CancelToken;
use crate::config::DEFAULT_COMMENT_MAX_SIZE;
use crate::error::{ApiError, Error, Result};
use std::future::Future;
use tracing::{debug, info, warn};

/// Result of a single platform call.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Events whose threads can carry a review comment.
pub const SUPPORTED_EVENTS: &[&str] = &["pull_request", "pull_request_target"];

/// Comments requested per page when searching for the marker.
pub const PAGE_SIZE: u32 = 100;

/// Upper bound on pages searched, in case the platform keeps paging.
pub const MAX_PAGES: u32 = 50;

/// The hidden marker identifying the tracked comment for `uuid`.
pub fn marker(uuid: &str) -> String {
    format!("<!-- test-summary-uuid: {} -->", uuid)
}

/// UUID extended with a job discriminator, so that parallel jobs reporting
/// to the same thread each keep their own comment.
pub fn discriminated_uuid(uuid: &str, discriminator: Option<&str>) -> String {
    match discriminator.map(str::trim).filter(|d| !d.is_empty()) {
        Some(discriminator) => format!("{}-{}", uuid, discriminator),
        None => uuid.to_string(),
    }
}

/// Smallest size limit that still holds the marker line for `uuid` and
/// the truncation notice.
pub fn min_comment_size(uuid: &str) -> usize {
    marker(uuid).len() + 1 + TRUNCATION_SUFFIX.len()
}

/// `body` led by the marker for `uuid` and cut to `max_size` bytes.
///
/// Only the text after the marker line is ever truncated, so the comment
/// stays findable however small the limit.
pub fn tracked_body(uuid: &str, body: &str, max_size: usize) -> Result<String> {
    let minimum = min_comment_size(uuid);
    if max_size < minimum {
        return Err(Error::Config(format!(
            "comment size limit {} cannot hold the marker; need at least {}",
            max_size, minimum
        )));
    }

    let marker = marker(uuid);
    let content = match body.strip_prefix(&marker) {
        Some(rest) => rest.strip_prefix('\n').unwrap_or(rest),
        None => body,
    };
    if content.is_empty() {
        return Ok(marker);
    }
    let content = truncate_body(content, max_size - marker.len() - 1);
    Ok(format!("{}\n{}", marker, content))
}

/// The review thread a comment belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    /// Name of the event that triggered the run, e.g. `pull_request`.
    pub event: String,
}

impl ThreadRef {
    pub fn is_complete(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty() && self.number > 0
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_EVENTS.contains(&self.event.as_str())
    }
}

/// A comment as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub body: String,
}

/// Paging information accompanying a page of comments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// The following page, if the platform reports one.
    pub next_page: Option<u32>,
}

/// The calls the manager needs from a review platform.
pub trait PlatformClient: Send + Sync {
    /// Fetch page `page` (1-based) of the thread's comments.
    fn list_comments(
        &self,
        thread: &ThreadRef,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = ApiResult<(Vec<Comment>, PageInfo)>> + Send;

    fn create_comment(
        &self,
        thread: &ThreadRef,
        body: &str,
    ) -> impl Future<Output = ApiResult<Comment>> + Send;

    fn update_comment(
        &self,
        thread: &ThreadRef,
        comment_id: u64,
        body: &str,
    ) -> impl Future<Output = ApiResult<Comment>> + Send;
}

/// What `post_or_update` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOutcome {
    Created(u64),
    Updated(u64),
}

impl CommentOutcome {
    pub fn id(&self) -> u64 {
        match self {
            CommentOutcome::Created(id) | CommentOutcome::Updated(id) => *id,
        }
    }
}

/// Creates or updates the single tracked comment on a thread.
pub struct CommentManager<C> {
    client: C,
    retry: RetryPolicy,
    max_size: usize,
    page_size: u32,
    max_pages: u32,
}

impl<C: PlatformClient> CommentManager<C> {
    pub fn new(client: C) -> Self {
        CommentManager {
            client,
            retry: RetryPolicy::default(),
            max_size: DEFAULT_COMMENT_MAX_SIZE,
            page_size: PAGE_SIZE,
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Ensure the thread carries exactly one comment for `uuid` with `body`.
    ///
    /// Validation happens before any network call. The body is prefixed with
    /// the marker when it lacks one and truncated to the size limit.
    pub async fn post_or_update(
        &self,
        cancel: &CancelToken,
        thread: Option<&ThreadRef>,
        uuid: &str,
        body: &str,
    ) -> Result<CommentOutcome> {
        let thread = thread
            .filter(|t| t.is_complete())
            .ok_or(Error::MissingThread)?;
        if !thread.is_supported() {
            return Err(Error::UnsupportedEvent(thread.event.clone()));
        }
        if uuid.trim().is_empty() {
            return Err(Error::EmptyUuid);
        }

        let marker = marker(uuid);
        let body = tracked_body(uuid, body, self.max_size)?;

        let client = &self.client;
        match self.find_existing(cancel, thread, &marker).await? {
            Some(existing) => {
                let id = existing.id;
                let body = body.as_str();
                let updated = self
                    .retry
                    .run("update comment", cancel, move || {
                        client.update_comment(thread, id, body)
                    })
                    .await?;
                info!(comment_id = updated.id, uuid, "updated tracked comment");
                Ok(CommentOutcome::Updated(updated.id))
            }
            None => {
                let body = body.as_str();
                let created = self
                    .retry
                    .run("create comment", cancel, move || {
                        client.create_comment(thread, body)
                    })
                    .await?;
                info!(comment_id = created.id, uuid, "created tracked comment");
                Ok(CommentOutcome::Created(created.id))
            }
        }
    }

    /// Page through the thread looking for a comment containing `marker`.
    async fn find_existing(
        &self,
        cancel: &CancelToken,
        thread: &ThreadRef,
        marker: &str,
    ) -> Result<Option<Comment>> {
        let client = &self.client;
        let per_page = self.page_size;
        let mut page = 1;
        for _ in 0..self.max_pages {
            let (comments, info) = self
                .retry
                .run("list comments", cancel, move || {
                    client.list_comments(thread, page, per_page)
                })
                .await?;

            if let Some(found) = comments.into_iter().find(|c| c.body.contains(marker)) {
                debug!(comment_id = found.id, page, "found tracked comment");
                return Ok(Some(found));
            }

            match info.next_page {
                Some(next) if next > page => page = next,
                _ => return Ok(None),
            }
        }
        warn!(max_pages = self.max_pages, "stopped searching for tracked comment at page limit");
        Ok(None)
    }
}
