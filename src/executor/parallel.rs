use super::types::ParallelOptions;
use super::RequestExecutor;
use crate::error::{BoxError, ExecutorError, ExecutorResult};
use crate::logging::log_request_operation;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// One named unit of work for [`RequestExecutor::execute_parallel`]
pub type Fetcher<T> = BoxFuture<'static, Result<T, BoxError>>;

impl RequestExecutor {
    /// Run every fetcher concurrently under one shared deadline
    ///
    /// With `partial`, a failed or unfinished fetcher maps to `None` and the
    /// call succeeds. Without it, the first failure (or the deadline) rejects
    /// the whole call. Fetchers run as spawned tasks and are never aborted:
    /// on rejection the remaining ones keep running and their results are
    /// discarded.
    pub async fn execute_parallel<K, T, I>(
        &self,
        fetchers: I,
        options: ParallelOptions,
    ) -> ExecutorResult<HashMap<String, Option<T>>>
    where
        I: IntoIterator<Item = (K, Fetcher<T>)>,
        K: Into<String>,
        T: Send + 'static,
    {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or_else(|| self.config.request_timeout());
        // `None` when the timeout is too large to represent: wait indefinitely
        let deadline = started.checked_add(timeout);

        let mut results: HashMap<String, Option<T>> = HashMap::new();
        let mut pending: FuturesUnordered<_> = fetchers
            .into_iter()
            .map(|(name, fetcher)| {
                let name: String = name.into();
                results.insert(name.clone(), None);
                let handle = tokio::spawn(fetcher);
                async move { (name, handle.await) }
            })
            .collect();

        let outcome = loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, pending.next()).await,
                None => Ok(pending.next().await),
            };
            let (name, joined) = match next {
                Ok(Some(done)) => done,
                Ok(None) => break Ok(()),
                Err(_) => {
                    let unfinished = pending.len();
                    if options.partial {
                        warn!(
                            request_id = %request_id,
                            unfinished = unfinished,
                            timeout_ms = timeout.as_millis() as u64,
                            "Parallel fetch deadline reached, returning partial results"
                        );
                        break Ok(());
                    }
                    break Err(ExecutorError::timeout("parallel fetch", timeout));
                }
            };

            let fetched = match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ExecutorError::Handler(e)),
                Err(join_error) => Err(ExecutorError::from(join_error)),
            };

            match fetched {
                Ok(value) => {
                    results.insert(name, Some(value));
                }
                Err(e) if options.partial => {
                    warn!(
                        request_id = %request_id,
                        fetcher = %name,
                        error = %e,
                        "Fetcher failed, recording empty result"
                    );
                }
                Err(e) => break Err(e),
            }
        };

        log_request_operation(
            "execute_parallel",
            &request_id.to_string(),
            None,
            "BYPASS",
            started.elapsed().as_millis() as u64,
            outcome.as_ref().err().map(ExecutorError::kind),
        );

        outcome.map(|()| results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::ResilienceConfig;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn executor() -> RequestExecutor {
        let config = ResilienceConfig {
            cache_sweep_interval_seconds: 0,
            ..Default::default()
        };
        RequestExecutor::new(Arc::new(CacheManager::new(config.clone())), config)
    }

    fn ok(value: u32) -> Fetcher<u32> {
        async move { Ok(value) }.boxed()
    }

    fn failing(message: &'static str) -> Fetcher<u32> {
        async move { Err::<u32, BoxError>(message.into()) }.boxed()
    }

    #[tokio::test]
    async fn test_all_fetchers_succeed() {
        let results = executor()
            .execute_parallel(
                vec![("users", ok(3)), ("projects", ok(5)), ("tasks", ok(8))],
                ParallelOptions::strict(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results["users"], Some(3));
        assert_eq!(results["tasks"], Some(8));
    }

    #[tokio::test]
    async fn test_partial_failure_becomes_none() {
        let results = executor()
            .execute_parallel(
                vec![
                    ("users", ok(3)),
                    ("projects", failing("projects backend down")),
                    ("tasks", ok(8)),
                ],
                ParallelOptions::partial(),
            )
            .await
            .unwrap();

        assert_eq!(results["users"], Some(3));
        assert_eq!(results["projects"], None);
        assert_eq!(results["tasks"], Some(8));
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_on_first_failure() {
        let err = executor()
            .execute_parallel(
                vec![("users", ok(3)), ("projects", failing("projects backend down"))],
                ParallelOptions::strict(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "handler");
        assert!(err.to_string().contains("projects backend down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_rejection_does_not_cancel_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow: Fetcher<u32> = async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        }
        .boxed();

        let result = executor()
            .execute_parallel(
                vec![("slow", slow), ("broken", failing("boom"))],
                ParallelOptions::strict(),
            )
            .await;
        assert!(result.is_err());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline() {
        let slow = || -> Fetcher<u32> {
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(0)
            }
            .boxed()
        };

        let partial = executor()
            .execute_parallel(
                vec![("fast", ok(1)), ("slow", slow())],
                ParallelOptions::partial().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert_eq!(partial["fast"], Some(1));
        assert_eq!(partial["slow"], None);

        let err = executor()
            .execute_parallel(
                vec![("fast", ok(1)), ("slow", slow())],
                ParallelOptions::strict().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout { timeout_ms: 100, .. }));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_waits_for_every_fetcher() {
        let results = executor()
            .execute_parallel(
                vec![("users", ok(3)), ("projects", failing("down"))],
                ParallelOptions::partial().with_timeout(Duration::MAX),
            )
            .await
            .unwrap();
        assert_eq!(results["users"], Some(3));
        assert_eq!(results["projects"], None);
    }

    async fn explode() -> Result<u32, BoxError> {
        panic!("fetcher exploded")
    }

    #[tokio::test]
    async fn test_panicking_fetcher_is_unknown_error() {
        let panicking: Fetcher<u32> = explode().boxed();
        let err = executor()
            .execute_parallel(vec![("bad", panicking)], ParallelOptions::strict())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown");
    }
}
