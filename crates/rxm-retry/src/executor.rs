use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use rxm_types::{ErrorInfo, OperationResult, RemoteResponse};

use crate::policy::RetryPolicy;

// ---------------------------------------------------------------------------
// Sleeper — the executor's only clock dependency
// ---------------------------------------------------------------------------

pub trait Sleeper: Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Production sleeper; yields to the runtime for the backoff window.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Decides whether a failure is worth another attempt.
pub type RetryClassifier = Arc<dyn Fn(&ErrorInfo) -> bool + Send + Sync>;

fn panic_info(payload: Box<dyn Any + Send>) -> ErrorInfo {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    };
    ErrorInfo::new("panic", message)
}

// ---------------------------------------------------------------------------
// RetryableQueryExecutor
// ---------------------------------------------------------------------------

/// Runs a remote operation until it succeeds or the policy's attempts run out.
///
/// Every failure is retried unless a classifier says otherwise. Concurrent
/// calls are independent: nothing is cached or deduplicated, and no timeout
/// is applied to a single attempt.
pub struct RetryableQueryExecutor<S = TokioSleeper> {
    policy: RetryPolicy,
    sleeper: S,
    classifier: Option<RetryClassifier>,
}

impl RetryableQueryExecutor<TokioSleeper> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, TokioSleeper)
    }
}

impl Default for RetryableQueryExecutor<TokioSleeper> {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl<S: Sleeper> RetryableQueryExecutor<S> {
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        RetryableQueryExecutor { policy: policy.validated(), sleeper, classifier: None }
    }

    /// Stop retrying as soon as `classifier` returns `false` for a failure.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&ErrorInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, returning the first success or the last failure.
    ///
    /// A panic inside the operation counts as a failed attempt with code
    /// `panic`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OperationResult<T>>,
    {
        let max_attempts = self.policy.max_attempts;
        let context = self.policy.context.as_deref().unwrap_or("-");
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = AssertUnwindSafe(op())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| OperationResult::Failure(panic_info(payload)));

            let err = match outcome {
                OperationResult::Success(data) => {
                    if attempt > 1 {
                        tracing::debug!(context, attempt, "operation succeeded after retry");
                    }
                    return OperationResult::Success(data);
                }
                OperationResult::Failure(err) => err,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    context,
                    attempt,
                    max_attempts,
                    code = %err.code,
                    message = %err.message,
                    "operation failed, attempts exhausted"
                );
                return OperationResult::Failure(err);
            }

            if let Some(classifier) = &self.classifier {
                if !classifier(&err) {
                    tracing::warn!(
                        context,
                        attempt,
                        code = %err.code,
                        message = %err.message,
                        "operation failed with non-retryable error"
                    );
                    return OperationResult::Failure(err);
                }
            }

            let delay = self.policy.delay_before(attempt + 1);
            tracing::warn!(
                context,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                code = %err.code,
                message = %err.message,
                "operation failed, retrying"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    /// [`run`](Self::run) for operations that return the backend's
    /// `{ data, error }` pair.
    pub async fn run_remote<T, F, Fut>(&self, mut op: F) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResponse<T>>,
    {
        self.run(|| op().map(OperationResult::from)).await
    }

    /// [`run`](Self::run) for operations that return a plain `Result`.
    pub async fn run_result<T, E, F, Fut>(&self, mut op: F) -> OperationResult<T>
    where
        E: Into<ErrorInfo>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(|| op().map(OperationResult::from)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use rxm_types::RxmError;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingSleeper {
        delays: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingSleeper {
        fn delays(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    fn executor(
        max_attempts: u32,
        base_delay_ms: u64,
    ) -> (RetryableQueryExecutor<RecordingSleeper>, RecordingSleeper) {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::new(max_attempts, base_delay_ms).unwrap().with_context("test");
        (RetryableQueryExecutor::with_sleeper(policy, sleeper.clone()), sleeper)
    }

    async fn always_panics() -> OperationResult<()> {
        panic!("always")
    }

    fn fail<T>(n: u32) -> OperationResult<T> {
        OperationResult::Failure(ErrorInfo::new("network", format!("attempt {n} failed")))
    }

    #[tokio::test]
    async fn always_failing_op_runs_max_attempts() {
        for n in 1..=5u32 {
            let (exec, _) = executor(n, 10);
            let calls = AtomicU32::new(0);
            let res: OperationResult<()> = exec
                .run(|| async {
                    let k = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    fail(k)
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), n);
            // The failure from the final attempt is the one returned.
            assert_eq!(res.failure().unwrap().message, format!("attempt {n} failed"));
        }
    }

    #[tokio::test]
    async fn stops_on_first_success() {
        let (exec, sleeper) = executor(5, 100);
        let calls = AtomicU32::new(0);
        let res = exec
            .run(|| async {
                let k = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if k == 3 { OperationResult::Success("stock") } else { fail(k) }
            })
            .await;
        assert_eq!(res, OperationResult::Success("stock"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn backoff_is_base_times_attempt() {
        let (exec, sleeper) = executor(4, 1000);
        let _: OperationResult<()> = exec.run(|| async { fail(0) }).await;
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[tokio::test]
    async fn single_attempt_is_pass_through() {
        let (exec, sleeper) = executor(1, 1000);
        let calls = AtomicU32::new(0);
        let res: OperationResult<()> = exec
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                fail(1)
            })
            .await;
        assert!(res.is_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());

        let res = exec.run(|| async { OperationResult::Success(7) }).await;
        assert_eq!(res.success(), Some(7));
    }

    #[tokio::test]
    async fn panics_become_failures_and_are_retried() {
        let (exec, _) = executor(3, 1);
        let calls = AtomicU32::new(0);
        let res = exec
            .run(|| async {
                let k = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if k == 1 {
                    panic!("connection reset");
                }
                OperationResult::Success(k)
            })
            .await;
        assert_eq!(res.success(), Some(2));

        let res = exec.run(always_panics).await;
        let err = res.failure().unwrap();
        assert_eq!(err.code, "panic");
        assert_eq!(err.message, "always");
    }

    #[tokio::test]
    async fn classifier_short_circuits_permanent_errors() {
        let (exec, sleeper) = executor(5, 10);
        let exec = exec.with_classifier(|e| e.code != "23505");
        let calls = AtomicU32::new(0);
        let res: OperationResult<()> = exec
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                OperationResult::Failure(ErrorInfo::new("23505", "duplicate key"))
            })
            .await;
        assert!(res.is_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn remote_and_result_shapes() {
        let (exec, _) = executor(2, 1);
        let calls = AtomicU32::new(0);
        let res = exec
            .run_remote(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    RemoteResponse { data: None, error: Some(ErrorInfo::new("503", "unavailable")) }
                } else {
                    RemoteResponse { data: Some(vec![1, 2]), error: None }
                }
            })
            .await;
        assert_eq!(res.success(), Some(vec![1, 2]));

        let res: OperationResult<u8> =
            exec.run_result(|| async { Err::<u8, _>(RxmError::Storage("io".into())) }).await;
        assert_eq!(res.failure().unwrap().code, "storage");
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_virtual_clock() {
        let exec = RetryableQueryExecutor::new(RetryPolicy::new(3, 1000).unwrap());
        let start = tokio::time::Instant::now();
        let res: OperationResult<()> = exec.run(|| async { fail(0) }).await;
        assert!(res.is_failure());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(5100), "elapsed {elapsed:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_calls_retry_independently() {
        let exec = Arc::new(RetryableQueryExecutor::new(RetryPolicy::new(3, 1).unwrap()));
        let mut handles = Vec::new();
        for i in 0..50u32 {
            let exec = exec.clone();
            handles.push(tokio::spawn(async move {
                let calls = AtomicU32::new(0);
                let res = exec
                    .run(|| async {
                        tokio::time::sleep(Duration::from_millis(rand::random::<u64>() % 5)).await;
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            fail(1)
                        } else {
                            OperationResult::Success(i)
                        }
                    })
                    .await;
                (res.success(), calls.load(Ordering::SeqCst))
            }));
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap(), (Some(i as u32), 2));
        }
    }
}
