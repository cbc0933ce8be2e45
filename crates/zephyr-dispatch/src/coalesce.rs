//! Single-flight coalescing of identical GET requests.
//!
//! The first request for a key spawns the work; requests arriving while it
//! runs, or within the retention window after it finished, await the same
//! result. The work is a spawned task, so it completes even if every
//! waiting caller goes away.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{FutureExt, Shared};
use http::header::{AUTHORIZATION, COOKIE};
use http::{HeaderMap, Method, StatusCode, Version};
use http_body_util::Full;
use tracing::{debug, error};
use zephyr_core::{into_parts, BoxFuture, RequestContext, Response};

/// A finished response that every coalesced caller rebuilds its own copy of.
#[derive(Debug)]
struct Snapshot {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl Snapshot {
    async fn capture(response: Response) -> Self {
        let (parts, body) = into_parts(response).await;
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    fn failed() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"Internal Server Error"),
        }
    }

    fn to_response(&self) -> Response {
        let mut response = Response::new(Full::new(self.body.clone()));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

type SharedResult = Shared<BoxFuture<'static, Arc<Snapshot>>>;

#[derive(Clone)]
struct Pending {
    id: u64,
    result: SharedResult,
}

/// Whether a caller started the work or joined it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// This caller ran the work.
    Leader,
    /// This caller awaited another caller's work.
    Joined,
}

/// Deduplicates concurrent identical requests.
#[derive(Clone)]
pub struct Coalescer {
    pending: Arc<DashMap<String, Pending>>,
    retention: Duration,
    next_id: Arc<AtomicU64>,
}

impl Coalescer {
    /// Creates a coalescer keeping finished results joinable for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            retention,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns true for GET requests without credentials.
    ///
    /// ```
    /// use http::Method;
    /// use zephyr_core::RequestContext;
    /// use zephyr_dispatch::Coalescer;
    ///
    /// let anonymous = RequestContext::builder(Method::GET, "/widgets").build();
    /// let signed_in = RequestContext::builder(Method::GET, "/me")
    ///     .header("authorization", "Bearer abc")
    ///     .build();
    ///
    /// assert!(Coalescer::is_eligible(&anonymous));
    /// assert!(!Coalescer::is_eligible(&signed_in));
    /// ```
    pub fn is_eligible(ctx: &RequestContext) -> bool {
        ctx.method() == Method::GET
            && !ctx.headers().contains_key(AUTHORIZATION)
            && !ctx.headers().contains_key(COOKIE)
    }

    /// Derives the key from method, path and query.
    pub fn key(ctx: &RequestContext) -> String {
        match ctx.query_string() {
            Some(query) if !query.is_empty() => {
                format!("{} {}?{}", ctx.method(), ctx.path(), query)
            }
            _ => format!("{} {}", ctx.method(), ctx.path()),
        }
    }

    /// Runs `produce` for `key` unless identical work is pending, and
    /// returns this caller's copy of the response.
    pub async fn run<F, Fut>(&self, key: String, produce: F) -> (Response, Flight)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let (result, flight) = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().result.clone(), Flight::Joined),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let result = spawn_work(produce());
                entry.insert(Pending {
                    id,
                    result: result.clone(),
                });
                self.schedule_removal(key.clone(), id, result.clone());
                (result, Flight::Leader)
            }
        };

        if flight == Flight::Joined {
            debug!(%key, "joined in-flight request");
        }
        (result.await.to_response(), flight)
    }

    /// Returns the number of keys currently joinable.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn schedule_removal(&self, key: String, id: u64, result: SharedResult) {
        let pending = Arc::clone(&self.pending);
        let retention = self.retention;
        tokio::spawn(async move {
            result.await;
            tokio::time::sleep(retention).await;
            pending.remove_if(&key, |_, entry| entry.id == id);
        });
    }
}

impl std::fmt::Debug for Coalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("pending", &self.pending.len())
            .field("retention", &self.retention)
            .finish()
    }
}

fn spawn_work<Fut>(work: Fut) -> SharedResult
where
    Fut: Future<Output = Response> + Send + 'static,
{
    let handle = tokio::spawn(async move { Snapshot::capture(work.await).await });
    let joined: BoxFuture<'static, Arc<Snapshot>> = Box::pin(async move {
        match handle.await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(join_error) => {
                error!(error = %join_error, "coalesced request failed");
                Arc::new(Snapshot::failed())
            }
        }
    });
    joined.shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use zephyr_core::ResponseExt;

    fn counting_work(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Response> {
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Response::text(StatusCode::OK, "widgets")
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_run() {
        let coalescer = Coalescer::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, second) = tokio::join!(
            coalescer.run("GET /widgets".into(), counting_work(&calls, Duration::from_millis(10))),
            coalescer.run("GET /widgets".into(), counting_work(&calls, Duration::from_millis(10))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.1, Flight::Leader);
        assert_eq!(second.1, Flight::Joined);
        let (_, a) = into_parts(first.0).await;
        let (_, b) = into_parts(second.0).await;
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_window() {
        let coalescer = Coalescer::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer
            .run("k".into(), counting_work(&calls, Duration::ZERO))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_, flight) = coalescer
            .run("k".into(), counting_work(&calls, Duration::ZERO))
            .await;
        assert_eq!(flight, Flight::Joined);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coalescer.pending(), 0);
        let (_, flight) = coalescer
            .run("k".into(), counting_work(&calls, Duration::ZERO))
            .await;
        assert_eq!(flight, Flight::Leader);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_completes_when_caller_gives_up() {
        let coalescer = Coalescer::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let abandoned = coalescer.run("k".into(), counting_work(&calls, Duration::from_millis(500)));
        let _ = tokio::time::timeout(Duration::from_millis(10), abandoned).await;

        let (response, flight) = coalescer
            .run("k".into(), counting_work(&calls, Duration::ZERO))
            .await;
        assert_eq!(flight, Flight::Joined);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_work_yields_500() {
        let coalescer = Coalescer::new(Duration::from_millis(10));
        let (response, _) = coalescer
            .run("boom".into(), || async {
                if true {
                    panic!("handler bug");
                }
                Response::empty(StatusCode::OK)
            })
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_key_includes_query() {
        let ctx = RequestContext::builder(Method::GET, "/widgets?color=red").build();
        assert_eq!(Coalescer::key(&ctx), "GET /widgets?color=red");
        let ctx = RequestContext::builder(Method::GET, "/widgets").build();
        assert_eq!(Coalescer::key(&ctx), "GET /widgets");
        let cookie = RequestContext::builder(Method::GET, "/widgets")
            .header("cookie", "sid=1")
            .build();
        assert!(!Coalescer::is_eligible(&cookie));
        let post = RequestContext::builder(Method::POST, "/widgets").build();
        assert!(!Coalescer::is_eligible(&post));
    }
}
