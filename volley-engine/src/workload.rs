//! Workload contract and per-iteration context

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use volley_http::{HttpClient, HttpMethod, HttpResponse, RequestOptions};
use volley_metrics::{builtin, MetricSink, TagSet};

/// User code executed once per iteration by every virtual user
///
/// Returning `Err` (or panicking) marks the iteration failed; the virtual
/// user keeps going with its next iteration either way.
#[async_trait::async_trait]
pub trait Workload: Send + Sync + 'static {
    async fn run(&self, ctx: IterationContext) -> anyhow::Result<()>;
}

/// [`Workload`] wrapping an async closure, see [`workload_fn`]
pub struct FnWorkload<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> Workload for FnWorkload<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: IterationContext) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }
}

/// Adapt an async closure into a [`Workload`]
///
/// ```ignore
/// let workload = workload_fn(|ctx| async move {
///     let res = ctx.get("/health").await;
///     ctx.check("status is 200", res.status == 200);
///     Ok(())
/// });
/// ```
pub fn workload_fn<F, Fut>(f: F) -> FnWorkload<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnWorkload { f }
}

/// Handle given to a workload for one iteration
///
/// Cheap to clone; clones share the same check list.
#[derive(Clone)]
pub struct IterationContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    vu_id: u64,
    iteration: u64,
    http: Arc<dyn HttpClient>,
    sink: Arc<MetricSink>,
    tags: TagSet,
    checks: Mutex<Vec<(String, bool)>>,
}

impl IterationContext {
    pub(crate) fn new(
        vu_id: u64,
        iteration: u64,
        http: Arc<dyn HttpClient>,
        sink: Arc<MetricSink>,
        tags: TagSet,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                vu_id,
                iteration,
                http,
                sink,
                tags,
                checks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Ordinal of the virtual user running this iteration
    pub fn vu_id(&self) -> u64 {
        self.inner.vu_id
    }

    /// Zero-based iteration number within this virtual user
    pub fn iteration(&self) -> u64 {
        self.inner.iteration
    }

    /// Run-wide tags applied to every sample
    pub fn tags(&self) -> &TagSet {
        &self.inner.tags
    }

    /// Sink for custom metrics
    pub fn metrics(&self) -> &MetricSink {
        &self.inner.sink
    }

    /// Issue a request and record `http_reqs`, `http_req_duration` and
    /// `http_req_failed` for it
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        options: RequestOptions,
    ) -> HttpResponse {
        let mut tags = self.inner.tags.clone();
        for (key, value) in &options.tags {
            tags.insert(key.as_str(), value.as_str());
        }
        if tags.get("name").is_none() {
            tags.insert("name", url);
        }
        tags.insert("method", method.as_str());

        let response = self.inner.http.request(method, url, options).await;
        tags.insert("status", response.status.to_string());

        let sink = &self.inner.sink;
        sink.add_counter(builtin::HTTP_REQS, &tags, 1.0);
        sink.add_trend(
            builtin::HTTP_REQ_DURATION,
            &tags,
            response.duration.as_secs_f64() * 1000.0,
        );
        sink.add_rate(builtin::HTTP_REQ_FAILED, &tags, response.is_failed());

        response
    }

    pub async fn get(&self, url: &str) -> HttpResponse {
        self.request(HttpMethod::Get, url, RequestOptions::new()).await
    }

    pub async fn post(&self, url: &str, body: impl Into<Vec<u8>>) -> HttpResponse {
        self.request(HttpMethod::Post, url, RequestOptions::new().body(body))
            .await
    }

    /// Record a named assertion; returns `passed`
    pub fn check(&self, name: impl Into<String>, passed: bool) -> bool {
        self.inner.checks.lock().push((name.into(), passed));
        passed
    }

    /// Record several assertions; returns whether all passed
    pub fn check_all(&self, checks: &[(&str, bool)]) -> bool {
        let mut recorded = self.inner.checks.lock();
        recorded.extend(checks.iter().map(|(name, passed)| (name.to_string(), *passed)));
        checks.iter().all(|(_, passed)| *passed)
    }

    /// Think time inside an iteration
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub(crate) fn take_checks(&self) -> Vec<(String, bool)> {
        std::mem::take(&mut *self.inner.checks.lock())
    }
}

impl std::fmt::Debug for IterationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationContext")
            .field("vu_id", &self.inner.vu_id)
            .field("iteration", &self.inner.iteration)
            .field("tags", &self.inner.tags)
            .finish()
    }
}
