//! The attempt loop: one logical request, up to `max_attempts` physical attempts.

use futures::future::BoxFuture;
use http::Method;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::classify::{AttemptFailure, AttemptOutcome, RetryClassifier};
use crate::status::describe;
use crate::transport::TransportError;
use crate::{HttpRetryError, Response, Result};

/// Decision taken after one classified attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt follows.
    pub should_retry: bool,
    /// How long to wait before it.
    pub wait: Option<Duration>,
}

impl RetryDecision {
    /// Stop and surface the outcome.
    pub const STOP: Self = Self {
        should_retry: false,
        wait: None,
    };

    /// Retry after `wait`.
    pub fn retry_after(wait: Duration) -> Self {
        Self {
            should_retry: true,
            wait: Some(wait),
        }
    }
}

/// Suspends an async attempt loop between attempts.
pub trait AsyncSleeper: Send + Sync {
    /// Sleep for `duration` without blocking the executor.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl AsyncSleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Suspends a blocking attempt loop between attempts.
pub trait Sleeper: Send + Sync {
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Longest uninterrupted blocking sleep while a cancellation token is attached.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-request context carried through the loop.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    /// Request method.
    pub method: &'a Method,
    /// Request URL, for logs.
    pub url: &'a url::Url,
    /// Optional caller cancellation.
    pub cancel: Option<&'a CancellationToken>,
}

/// Drives attempts, classification and backoff for one logical request.
#[derive(Debug, Clone)]
pub struct AttemptLoop {
    max_attempts: u32,
    backoff: BackoffPolicy,
    classifier: RetryClassifier,
}

impl AttemptLoop {
    /// Create a loop. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff: BackoffPolicy, classifier: RetryClassifier) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            classifier,
        }
    }

    /// Maximum physical attempts per logical request.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the classifier.
    pub fn classifier(&self) -> &RetryClassifier {
        &self.classifier
    }

    /// Get the backoff policy.
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Decide what follows attempt `attempt` (0-based).
    pub fn decide(&self, attempt: u32, outcome: &AttemptOutcome) -> RetryDecision {
        match outcome {
            AttemptOutcome::Retriable { server_wait, .. } if attempt < self.max_attempts - 1 => {
                RetryDecision::retry_after(self.backoff.compute_wait(attempt, *server_wait))
            }
            _ => RetryDecision::STOP,
        }
    }

    /// Run the loop, suspending on `sleeper` between attempts.
    pub async fn run<F, Fut>(
        &self,
        ctx: AttemptContext<'_>,
        sleeper: &dyn AsyncSleeper,
        mut send: F,
    ) -> Result<Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Response, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            if ctx.cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(HttpRetryError::Cancelled { attempts: attempt });
            }

            debug!(method = %ctx.method, url = %ctx.url, attempt = attempt + 1, "Sending request");

            let result = match ctx.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(HttpRetryError::Cancelled { attempts: attempt + 1 }),
                    result = send() => result,
                },
                None => send().await,
            };

            let outcome = self.classifier.classify(ctx.method, result);
            let decision = self.decide(attempt, &outcome);
            if !decision.should_retry {
                return finish(ctx, outcome, attempt + 1);
            }

            let wait = decision.wait.unwrap_or_default();
            log_retry(ctx, &outcome, attempt, self.max_attempts, wait);

            match ctx.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(HttpRetryError::Cancelled { attempts: attempt + 1 }),
                    _ = sleeper.sleep(wait) => {}
                },
                None => sleeper.sleep(wait).await,
            }

            attempt += 1;
        }
    }

    /// Run the loop, blocking the calling thread between attempts.
    pub fn run_blocking<F>(&self, ctx: AttemptContext<'_>, sleeper: &dyn Sleeper, mut send: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, TransportError>,
    {
        let mut attempt = 0;
        loop {
            if ctx.cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(HttpRetryError::Cancelled { attempts: attempt });
            }

            debug!(method = %ctx.method, url = %ctx.url, attempt = attempt + 1, "Sending request");

            let outcome = self.classifier.classify(ctx.method, send());
            let decision = self.decide(attempt, &outcome);
            if !decision.should_retry {
                return finish(ctx, outcome, attempt + 1);
            }

            let wait = decision.wait.unwrap_or_default();
            log_retry(ctx, &outcome, attempt, self.max_attempts, wait);

            match ctx.cancel {
                Some(token) => {
                    if sleep_unless_cancelled(sleeper, token, wait) {
                        return Err(HttpRetryError::Cancelled { attempts: attempt + 1 });
                    }
                }
                None => sleeper.sleep(wait),
            }

            attempt += 1;
        }
    }
}

/// Sleep in short slices, returning `true` if the token fired.
fn sleep_unless_cancelled(sleeper: &dyn Sleeper, token: &CancellationToken, wait: Duration) -> bool {
    let deadline = Instant::now().checked_add(wait);
    loop {
        if token.is_cancelled() {
            return true;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => CANCEL_POLL_INTERVAL,
        };
        if remaining.is_zero() {
            return false;
        }
        sleeper.sleep(remaining.min(CANCEL_POLL_INTERVAL));
    }
}

fn finish(ctx: AttemptContext<'_>, outcome: AttemptOutcome, attempts: u32) -> Result<Response> {
    match &outcome {
        AttemptOutcome::Success(response) => {
            debug!(method = %ctx.method, url = %ctx.url, status = %response.status(), attempts, "Request completed");
        }
        AttemptOutcome::Retriable { failure, .. } => {
            warn!(method = %ctx.method, url = %ctx.url, attempts, error = %failure, "Retry budget exhausted");
        }
        AttemptOutcome::Terminal(failure) => {
            debug!(method = %ctx.method, url = %ctx.url, attempts, error = %failure, "Request failed, not retrying");
        }
    }
    outcome.into_result(attempts)
}

fn log_retry(ctx: AttemptContext<'_>, outcome: &AttemptOutcome, attempt: u32, max_attempts: u32, wait: Duration) {
    let reason = match outcome {
        AttemptOutcome::Retriable {
            failure: AttemptFailure::Status(response),
            ..
        } => describe(response.status().as_u16()).to_string(),
        AttemptOutcome::Retriable {
            failure: AttemptFailure::Transport(e),
            ..
        } => e.to_string(),
        _ => return,
    };

    warn!(
        method = %ctx.method,
        url = %ctx.url,
        attempt = attempt + 1,
        max_attempts,
        wait_ms = wait.as_millis() as u64,
        reason = %reason,
        "Retrying request"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FailureKind;
    use http::{header, HeaderMap, HeaderValue, StatusCode};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<Duration>>>);

    impl Recording {
        fn waits(&self) -> Vec<Duration> {
            self.0.lock().clone()
        }
    }

    impl AsyncSleeper for Recording {
        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.0.lock().push(duration);
            Box::pin(async {})
        }
    }

    impl Sleeper for Recording {
        fn sleep(&self, duration: Duration) {
            self.0.lock().push(duration);
        }
    }

    type Step = std::result::Result<Response, TransportError>;

    fn url() -> url::Url {
        url::Url::parse("https://api.example.com/items").unwrap()
    }

    fn status(code: u16, retry_after: Option<&'static str>) -> Step {
        let mut headers = HeaderMap::new();
        if let Some(value) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from_static(value));
        }
        Ok(Response::new(StatusCode::from_u16(code).unwrap(), headers, "body", url()))
    }

    fn script(steps: Vec<Step>) -> (Arc<Mutex<VecDeque<Step>>>, Arc<Mutex<u32>>) {
        (Arc::new(Mutex::new(steps.into())), Arc::new(Mutex::new(0)))
    }

    fn engine(max_attempts: u32) -> AttemptLoop {
        AttemptLoop::new(max_attempts, BackoffPolicy::default(), RetryClassifier::default())
    }

    async fn run_script(method: Method, max_attempts: u32, steps: Vec<Step>) -> (Result<Response>, u32, Vec<Duration>) {
        let (steps, calls) = script(steps);
        let sleeper = Recording::default();
        let url = url();
        let ctx = AttemptContext {
            method: &method,
            url: &url,
            cancel: None,
        };

        let result = engine(max_attempts)
            .run(ctx, &sleeper, || {
                *calls.lock() += 1;
                let step = steps.lock().pop_front().expect("script exhausted");
                async move { step }
            })
            .await;

        let calls = *calls.lock();
        (result, calls, sleeper.waits())
    }

    #[test]
    fn test_decide_respects_budget() {
        let engine = engine(3);
        let outcome = RetryClassifier::default().classify(&Method::GET, status(500, None));

        assert!(engine.decide(0, &outcome).should_retry);
        assert!(engine.decide(1, &outcome).should_retry);
        assert_eq!(engine.decide(2, &outcome), RetryDecision::STOP);
        assert_eq!(engine.decide(9, &outcome), RetryDecision::STOP);
        assert_eq!(engine.decide(u32::MAX, &outcome), RetryDecision::STOP);
    }

    #[test]
    fn test_single_attempt_budget_never_retries() {
        let engine = engine(0);
        assert_eq!(engine.max_attempts(), 1);

        let outcome = RetryClassifier::default().classify(&Method::GET, status(503, Some("1")));
        assert_eq!(engine.decide(0, &outcome), RetryDecision::STOP);
    }

    #[tokio::test]
    async fn test_retry_after_waits_are_not_exponential() {
        let steps = vec![
            status(503, Some("2")),
            status(503, Some("2")),
            status(503, Some("2")),
            status(503, Some("2")),
            status(200, None),
        ];
        let (result, calls, waits) = run_script(Method::GET, 5, steps).await;

        assert_eq!(result.unwrap().status(), StatusCode::OK);
        assert_eq!(calls, 5);
        assert_eq!(waits, vec![Duration::from_secs(2); 4]);
    }

    #[tokio::test]
    async fn test_budget_exhausted_reports_attempts() {
        let steps = vec![status(500, None), status(500, None), status(500, None)];
        let (result, calls, waits) = run_script(Method::GET, 3, steps).await;

        let err = result.unwrap_err();
        assert!(err.is_retry_exhausted());
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.status_code(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(calls, 3);
        assert_eq!(waits.len(), 2);
        assert!(waits[0] >= Duration::from_millis(800) && waits[0] < Duration::from_secs(1));
        assert!(waits[1] >= Duration::from_millis(1600) && waits[1] < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_post_is_not_retried() {
        let (result, calls, waits) = run_script(Method::POST, 5, vec![status(500, None)]).await;

        match result.unwrap_err() {
            HttpRetryError::Status { status, attempts, message } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(attempts, 1);
                assert_eq!(message, "body");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls, 1);
        assert!(waits.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_stops_immediately() {
        let (result, calls, _) = run_script(Method::GET, 5, vec![status(404, None)]).await;
        assert_eq!(result.unwrap_err().attempts(), Some(1));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_post_retries_connect_failures() {
        let steps = vec![
            Err(TransportError::new(FailureKind::Connect, "connection refused")),
            status(201, None),
        ];
        let (result, calls, waits) = run_script(Method::POST, 3, steps).await;

        assert_eq!(result.unwrap().status(), StatusCode::CREATED);
        assert_eq!(calls, 2);
        assert_eq!(waits.len(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_budget() {
        let steps = (0..2)
            .map(|_| Err(TransportError::new(FailureKind::ReadTimeout, "timed out")))
            .collect();
        let (result, calls, _) = run_script(Method::GET, 2, steps).await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let token = CancellationToken::new();
        token.cancel();
        let url = url();
        let ctx = AttemptContext {
            method: &Method::GET,
            url: &url,
            cancel: Some(&token),
        };

        let result = engine(3)
            .run(ctx, &Recording::default(), || async { status(200, None) })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), Some(0));
    }

    #[tokio::test]
    async fn test_cancelled_during_attempt() {
        let token = CancellationToken::new();
        let url = url();
        let ctx = AttemptContext {
            method: &Method::GET,
            url: &url,
            cancel: Some(&token),
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let sleeper = Recording::default();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine(3).run(ctx, &sleeper, futures::future::pending::<Step>),
        )
        .await
        .expect("cancellation should abort the in-flight attempt");

        match result.unwrap_err() {
            HttpRetryError::Cancelled { attempts } => assert_eq!(attempts, 1),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let token = CancellationToken::new();
        let url = url();
        let ctx = AttemptContext {
            method: &Method::GET,
            url: &url,
            cancel: Some(&token),
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = engine(3)
            .run(ctx, &TokioSleeper, || async { status(503, Some("30")) })
            .await;

        match result.unwrap_err() {
            HttpRetryError::Cancelled { attempts } => assert_eq!(attempts, 1),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_blocking_loop_matches_async_semantics() {
        let (steps, calls) = script(vec![status(429, Some("3")), status(502, None), status(200, None)]);
        let sleeper = Recording::default();
        let url = url();
        let ctx = AttemptContext {
            method: &Method::PUT,
            url: &url,
            cancel: None,
        };

        let result = engine(3).run_blocking(ctx, &sleeper, || {
            *calls.lock() += 1;
            steps.lock().pop_front().expect("script exhausted")
        });

        assert!(result.unwrap().is_success());
        assert_eq!(*calls.lock(), 3);
        let waits = sleeper.waits();
        assert_eq!(waits[0], Duration::from_secs(3));
        assert!(waits[1] >= Duration::from_millis(1600) && waits[1] < Duration::from_secs(2));
    }

    #[test]
    fn test_blocking_cancelled_during_backoff() {
        let token = CancellationToken::new();
        let url = url();
        let ctx = AttemptContext {
            method: &Method::GET,
            url: &url,
            cancel: Some(&token),
        };

        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let started = Instant::now();
        let result = engine(3).run_blocking(ctx, &ThreadSleeper, || status(503, Some("30")));
        handle.join().unwrap();

        assert!(result.unwrap_err().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
