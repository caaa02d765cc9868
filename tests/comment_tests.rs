//! Comment lifecycle tests against a scripted in-memory platform
//!
//! Time is paused so retry backoff completes instantly while still being
//! observable through `tokio::time::Instant`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use gotcha::cancel::CancelToken;
use gotcha::comment::{
    discriminated_uuid, marker, min_comment_size, ApiResult, Comment, CommentManager,
    CommentOutcome, PageInfo, PlatformClient, RetryPolicy, ThreadRef, TRUNCATION_SUFFIX,
};
use gotcha::error::{ApiError, Error};

/// In-memory review thread with injectable failures
#[derive(Default)]
struct MockPlatform {
    comments: Mutex<Vec<Comment>>,
    next_id: AtomicU64,
    list_calls: AtomicU32,
    create_calls: AtomicU32,
    update_calls: AtomicU32,
    list_failures: Mutex<VecDeque<ApiError>>,
    create_failures: Mutex<VecDeque<ApiError>>,
    update_failures: Mutex<VecDeque<ApiError>>,
    hang_on_list: bool,
}

impl MockPlatform {
    fn new() -> Self {
        MockPlatform {
            next_id: AtomicU64::new(1000),
            ..MockPlatform::default()
        }
    }

    fn with_comments(self, bodies: impl IntoIterator<Item = String>) -> Self {
        {
            let mut comments = self.comments.lock().unwrap();
            for body in bodies {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                comments.push(Comment { id, body });
            }
        }
        self
    }

    fn fail_list(self, errors: impl IntoIterator<Item = ApiError>) -> Self {
        self.list_failures.lock().unwrap().extend(errors);
        self
    }

    fn fail_create(self, errors: impl IntoIterator<Item = ApiError>) -> Self {
        self.create_failures.lock().unwrap().extend(errors);
        self
    }

    fn fail_update(self, errors: impl IntoIterator<Item = ApiError>) -> Self {
        self.update_failures.lock().unwrap().extend(errors);
        self
    }

    fn comments(&self) -> Vec<Comment> {
        self.comments.lock().unwrap().clone()
    }

    fn calls(&self) -> (u32, u32, u32) {
        (
            self.list_calls.load(Ordering::SeqCst),
            self.create_calls.load(Ordering::SeqCst),
            self.update_calls.load(Ordering::SeqCst),
        )
    }
}

fn take_failure(queue: &Mutex<VecDeque<ApiError>>) -> Option<ApiError> {
    queue.lock().unwrap().pop_front()
}

impl PlatformClient for MockPlatform {
    fn list_comments(
        &self,
        _thread: &ThreadRef,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = ApiResult<(Vec<Comment>, PageInfo)>> + Send {
        async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_list {
                std::future::pending::<()>().await;
            }
            if let Some(error) = take_failure(&self.list_failures) {
                return Err(error);
            }
            let comments = self.comments.lock().unwrap();
            let start = ((page.max(1) - 1) * per_page) as usize;
            let end = (start + per_page as usize).min(comments.len());
            let items = comments.get(start..end).unwrap_or_default().to_vec();
            let next_page = (end < comments.len()).then_some(page + 1);
            Ok((items, PageInfo { next_page }))
        }
    }

    fn create_comment(
        &self,
        _thread: &ThreadRef,
        body: &str,
    ) -> impl Future<Output = ApiResult<Comment>> + Send {
        async move {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = take_failure(&self.create_failures) {
                return Err(error);
            }
            let comment = Comment {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                body: body.to_string(),
            };
            self.comments.lock().unwrap().push(comment.clone());
            Ok(comment)
        }
    }

    fn update_comment(
        &self,
        _thread: &ThreadRef,
        comment_id: u64,
        body: &str,
    ) -> impl Future<Output = ApiResult<Comment>> + Send {
        async move {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = take_failure(&self.update_failures) {
                return Err(error);
            }
            let mut comments = self.comments.lock().unwrap();
            match comments.iter_mut().find(|c| c.id == comment_id) {
                Some(comment) => {
                    comment.body = body.to_string();
                    Ok(comment.clone())
                }
                None => Err(ApiError::with_status(404, "Not Found")),
            }
        }
    }
}

fn thread() -> ThreadRef {
    ThreadRef {
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        number: 42,
        event: "pull_request".to_string(),
    }
}

fn filler(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Looks good to me #{}", i)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_creates_then_updates_same_comment() {
    let manager = CommentManager::new(MockPlatform::new());
    let cancel = CancelToken::new();
    let thread = thread();

    let first = manager
        .post_or_update(&cancel, Some(&thread), "run-1", "first body")
        .await
        .unwrap();
    let second = manager
        .post_or_update(&cancel, Some(&thread), "run-1", "second body")
        .await
        .unwrap();

    assert!(matches!(first, CommentOutcome::Created(_)));
    assert_eq!(second, CommentOutcome::Updated(first.id()));

    let comments = manager.client().comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].body, format!("{}\nsecond body", marker("run-1")));
    assert_eq!(manager.client().calls(), (2, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_existing_marker_not_duplicated() {
    let manager = CommentManager::new(MockPlatform::new());
    let cancel = CancelToken::new();
    let body = format!("{}\n## Test Results", marker("run-1"));

    manager
        .post_or_update(&cancel, Some(&thread()), "run-1", &body)
        .await
        .unwrap();
    assert_eq!(manager.client().comments()[0].body, body);
}

#[tokio::test(start_paused = true)]
async fn test_finds_marker_on_later_page() {
    let mut bodies = filler(25);
    bodies.push(format!("{}\nold results", marker("run-1")));
    let client = MockPlatform::new().with_comments(bodies);
    let manager = CommentManager::new(client).with_paging(10, 50);

    let outcome = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "new results")
        .await
        .unwrap();

    assert!(matches!(outcome, CommentOutcome::Updated(_)));
    assert_eq!(manager.client().calls(), (3, 0, 1));
    assert_eq!(manager.client().comments().len(), 26);
}

#[tokio::test(start_paused = true)]
async fn test_page_limit_bounds_search() {
    let mut bodies = filler(25);
    bodies.push(format!("{}\nold results", marker("run-1")));
    let client = MockPlatform::new().with_comments(bodies);
    let manager = CommentManager::new(client).with_paging(10, 2);

    let outcome = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "new results")
        .await
        .unwrap();

    assert!(matches!(outcome, CommentOutcome::Created(_)));
    assert_eq!(manager.client().calls(), (2, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_other_uuid_is_left_alone() {
    let client = MockPlatform::new().with_comments(vec![format!("{}\nmacos", marker("run-1-macos"))]);
    let manager = CommentManager::new(client);
    let uuid = discriminated_uuid("run-1", Some("linux"));

    let outcome = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), &uuid, "linux results")
        .await
        .unwrap();

    assert!(matches!(outcome, CommentOutcome::Created(_)));
    let comments = manager.client().comments();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].body, format!("{}\nmacos", marker("run-1-macos")));
    assert!(comments[1].body.starts_with(&marker("run-1-linux")));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    let client = MockPlatform::new().fail_list([
        ApiError::with_status(503, "Service Unavailable"),
        ApiError::new("request timed out"),
    ]);
    let manager = CommentManager::new(client);

    let start = tokio::time::Instant::now();
    let outcome = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "body")
        .await
        .unwrap();

    assert!(matches!(outcome, CommentOutcome::Created(_)));
    assert_eq!(manager.client().calls(), (3, 1, 0));
    // Backoff of 1s then 2s
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let client = MockPlatform::new().fail_create(vec![
        ApiError::with_status(502, "Bad Gateway");
        3
    ]);
    let manager = CommentManager::new(client);

    let err = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "body")
        .await
        .unwrap_err();

    match err {
        Error::ApiRetriesExhausted {
            operation,
            attempts,
            source,
        } => {
            assert_eq!(operation, "create comment");
            assert_eq!(attempts, 3);
            assert_eq!(source.status, Some(502));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(manager.client().calls(), (1, 3, 0));
    assert!(manager.client().comments().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_custom_retry_policy() {
    let client = MockPlatform::new().fail_create(vec![ApiError::with_status(500, "oops"); 5]);
    let manager = CommentManager::new(client).with_retry_policy(RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(10),
    });

    let err = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "body")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ApiRetriesExhausted { attempts: 5, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_not_retried() {
    let client = MockPlatform::new()
        .with_comments(vec![format!("{}\nold", marker("run-1"))])
        .fail_update([ApiError::with_status(403, "Resource not accessible by integration")]);
    let manager = CommentManager::new(client);

    let start = tokio::time::Instant::now();
    let err = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "new")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::ApiPermanent {
            operation: "update comment",
            ..
        }
    ));
    assert_eq!(manager.client().calls(), (1, 0, 1));
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_hanging_call() {
    let client = MockPlatform {
        hang_on_list: true,
        ..MockPlatform::new()
    };
    let manager = CommentManager::new(client);
    let cancel = CancelToken::new();
    let thread = thread();

    let (result, _) = tokio::join!(
        manager.post_or_update(&cancel, Some(&thread), "run-1", "body"),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(
        result,
        Err(Error::Cancelled {
            operation: "list comments"
        })
    ));
    assert_eq!(manager.client().calls(), (1, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff() {
    let client = MockPlatform::new().fail_list([ApiError::with_status(503, "busy")]);
    let manager = CommentManager::new(client).with_retry_policy(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_secs(60),
    });
    let cancel = CancelToken::new();
    let thread = thread();

    let (result, _) = tokio::join!(
        manager.post_or_update(&cancel, Some(&thread), "run-1", "body"),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(Error::Cancelled { .. })));
    assert_eq!(manager.client().calls(), (1, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_makes_no_calls() {
    let manager = CommentManager::new(MockPlatform::new());
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = manager
        .post_or_update(&cancel, Some(&thread()), "run-1", "body")
        .await;
    assert!(matches!(result, Err(Error::Cancelled { .. })));
    assert_eq!(manager.client().calls(), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_validation_happens_before_network() {
    let manager = CommentManager::new(MockPlatform::new());
    let cancel = CancelToken::new();

    let err = manager
        .post_or_update(&cancel, None, "run-1", "body")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingThread));

    let incomplete = ThreadRef {
        owner: String::new(),
        ..thread()
    };
    let err = manager
        .post_or_update(&cancel, Some(&incomplete), "run-1", "body")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingThread));

    let push = ThreadRef {
        event: "push".to_string(),
        ..thread()
    };
    let err = manager
        .post_or_update(&cancel, Some(&push), "run-1", "body")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedEvent(ref event) if event == "push"));

    let err = manager
        .post_or_update(&cancel, Some(&thread()), "   ", "body")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyUuid));

    assert_eq!(manager.client().calls(), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_body_truncated() {
    let manager = CommentManager::new(MockPlatform::new()).with_max_size(300);
    let body: String = (0..100).map(|i| format!("line {}\n", i)).collect();

    manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", &body)
        .await
        .unwrap();

    let stored = &manager.client().comments()[0].body;
    assert!(stored.len() <= 300);
    assert!(stored.starts_with(&marker("run-1")));
    assert!(stored.ends_with(TRUNCATION_SUFFIX));
}

#[tokio::test(start_paused = true)]
async fn test_small_limit_still_updates_single_comment() {
    let limit = min_comment_size("run-1") + 20;
    let manager = CommentManager::new(MockPlatform::new()).with_max_size(limit);
    let cancel = CancelToken::new();
    let body = "result line\n".repeat(42);

    let first = manager
        .post_or_update(&cancel, Some(&thread()), "run-1", &body)
        .await
        .unwrap();
    let second = manager
        .post_or_update(&cancel, Some(&thread()), "run-1", &body)
        .await
        .unwrap();

    assert_eq!(second, CommentOutcome::Updated(first.id()));
    let comments = manager.client().comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.len() <= limit);
    assert!(comments[0].body.starts_with(&marker("run-1")));
}

#[tokio::test(start_paused = true)]
async fn test_limit_too_small_for_marker() {
    let manager =
        CommentManager::new(MockPlatform::new()).with_max_size(min_comment_size("run-1") - 1);

    let err = manager
        .post_or_update(&CancelToken::new(), Some(&thread()), "run-1", "body")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(manager.client().calls(), (0, 0, 0));
}
