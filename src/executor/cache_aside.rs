use super::types::{ExecuteOptions, Outcome, RequestContext, ResponseMeta};
use super::RequestExecutor;
use crate::constants::CacheStatus;
use crate::error::{BoxError, ExecutorError, ExecutorResult};
use crate::logging::log_request_operation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, warn};

impl RequestExecutor {
    /// Cache-aside execution of `handler`
    ///
    /// A hit skips the handler entirely. On a miss the handler runs through the
    /// handler circuit breaker under the request timeout, and a successful
    /// result is written back to the cache without waiting.
    ///
    /// When the timeout fires the handler future is dropped; work it already
    /// handed to another system is not recalled.
    pub async fn execute<Req, T, H, Fut, E>(
        &self,
        key: &str,
        request: Req,
        handler: H,
        options: ExecuteOptions<Req>,
    ) -> Outcome<T>
    where
        H: FnOnce(Req, RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
        T: Serialize + DeserializeOwned,
    {
        let context = RequestContext::new(Some(key));

        if let Some(validator) = &options.validator {
            if let Err(reason) = validator(&request) {
                let error = ExecutorError::Validation(reason);
                return self.finish(&context, CacheStatus::Miss, Err(error), 0);
            }
        }

        if options.caches() {
            if let Some(raw) = self.cache.get(key).await {
                match serde_json::from_str::<T>(&raw) {
                    Ok(value) => {
                        debug!(key = key, request_id = %context.request_id, "Serving from cache");
                        return self.finish(&context, CacheStatus::Hit, Ok(value), raw.len());
                    }
                    Err(e) => {
                        warn!(key = key, error = %e, "Undecodable cache entry, evicting");
                        self.cache.delete(key).await;
                    }
                }
            }
        }

        let timeout = options.timeout.unwrap_or_else(|| self.config.request_timeout());
        let handler_context = context.clone();
        let result: ExecutorResult<T> = self
            .handler_breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, handler(request, handler_context)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(ExecutorError::handler(e)),
                    Err(_) => Err(ExecutorError::timeout("handler", timeout)),
                }
            })
            .await
            .map_err(ExecutorError::from);

        let value = match result {
            Ok(value) => value,
            Err(e) => return self.finish(&context, CacheStatus::Miss, Err(e), 0),
        };

        let payload = match serde_json::to_string(&value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = key, error = %e, "Result not serializable, skipping write-back");
                return self.finish(&context, CacheStatus::Miss, Ok(value), 0);
            }
        };
        let payload_bytes = payload.len();

        if options.caches() {
            let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
            self.spawn_write_back(key, payload, ttl);
        }

        self.finish(&context, CacheStatus::Miss, Ok(value), payload_bytes)
    }

    fn finish<T>(
        &self,
        context: &RequestContext,
        cache_status: CacheStatus,
        result: ExecutorResult<T>,
        payload_bytes: usize,
    ) -> Outcome<T> {
        let elapsed_ms = context.elapsed_ms();
        log_request_operation(
            "execute",
            &context.request_id.to_string(),
            context.key.as_deref(),
            cache_status.as_str(),
            elapsed_ms,
            result.as_ref().err().map(ExecutorError::kind),
        );

        Outcome {
            result,
            meta: ResponseMeta {
                request_id: context.request_id,
                cache_status,
                elapsed_ms,
                payload_bytes,
                compress_hint: payload_bytes > self.config.compression_threshold_bytes,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::ResilienceConfig;
    use crate::resilience::CircuitState;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Project {
        id: u64,
        name: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("project {0} not found")]
    struct NotFound(u64);

    fn executor(config: ResilienceConfig) -> RequestExecutor {
        let cache = Arc::new(CacheManager::new(config.clone()));
        RequestExecutor::new(cache, config)
    }

    fn test_config() -> ResilienceConfig {
        ResilienceConfig {
            cache_sweep_interval_seconds: 0,
            ..Default::default()
        }
    }

    async fn settle(executor: &RequestExecutor) {
        while executor.pending_cache_writes() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let executor = executor(test_config());
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in [CacheStatus::Miss, CacheStatus::Hit] {
            let counter = Arc::clone(&calls);
            let outcome = executor
                .execute(
                    "project:7",
                    7_u64,
                    |id, _ctx| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, NotFound>(Project {
                            id,
                            name: "Apollo".into(),
                        })
                    },
                    ExecuteOptions::default(),
                )
                .await;
            assert_eq!(outcome.meta.cache_status, expected);
            assert_eq!(outcome.result.unwrap().name, "Apollo");
            settle(&executor).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_handler() {
        let executor = executor(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let outcome: Outcome<Project> = executor
            .execute(
                "project:0",
                0_u64,
                |id, _ctx| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Project, _>(NotFound(id))
                },
                ExecuteOptions::default().with_validator(|id: &u64| {
                    if *id == 0 {
                        Err("id must be positive".into())
                    } else {
                        Ok(())
                    }
                }),
            )
            .await;

        assert!(matches!(outcome.result, Err(ExecutorError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_keeps_original_type() {
        let executor = executor(test_config());
        let outcome: Outcome<Project> = executor
            .execute(
                "project:9",
                9_u64,
                |id, _ctx| async move { Err::<Project, _>(NotFound(id)) },
                ExecuteOptions::default(),
            )
            .await;

        let err = outcome.result.unwrap_err();
        assert_eq!(err.kind(), "handler");
        let source = err.handler_source().unwrap();
        assert_eq!(source.downcast_ref::<NotFound>().map(|e| e.0), Some(9));
        assert_eq!(outcome.meta.cache_status, CacheStatus::Miss);
        assert_eq!(outcome.meta.payload_bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let executor = executor(test_config());
        let outcome: Outcome<Project> = executor
            .execute(
                "project:slow",
                (),
                |_, _ctx| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, NotFound>(Project {
                        id: 1,
                        name: "late".into(),
                    })
                },
                ExecuteOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .await;

        assert!(matches!(
            outcome.result,
            Err(ExecutorError::Timeout { timeout_ms: 50, .. })
        ));
    }

    #[tokio::test]
    async fn test_mutating_operations_bypass_cache() {
        let executor = executor(test_config());
        let outcome = executor
            .execute(
                "project:new",
                (),
                |_, ctx| async move { Ok::<_, NotFound>(ctx.key.unwrap_or_default()) },
                ExecuteOptions::default().mutating(),
            )
            .await;

        assert_eq!(outcome.result.unwrap(), "project:new");
        assert_eq!(executor.pending_cache_writes(), 0);
        assert!(!executor.cache().exists("project:new").await);
    }

    #[tokio::test]
    async fn test_undecodable_entry_falls_through_to_handler() {
        let executor = executor(test_config());
        executor
            .cache()
            .set("project:3", "{not json", Duration::from_secs(60))
            .await;

        let outcome = executor
            .execute(
                "project:3",
                3_u64,
                |id, _ctx| async move {
                    Ok::<_, NotFound>(Project {
                        id,
                        name: "Gemini".into(),
                    })
                },
                ExecuteOptions::default(),
            )
            .await;

        assert_eq!(outcome.meta.cache_status, CacheStatus::Miss);
        assert_eq!(outcome.result.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_compression_hint_for_large_payloads() {
        let executor = executor(ResilienceConfig {
            compression_threshold_bytes: 16,
            ..test_config()
        });
        let outcome = executor
            .execute(
                "blob",
                (),
                |_, _ctx| async { Ok::<_, NotFound>("x".repeat(64)) },
                ExecuteOptions::default(),
            )
            .await;

        assert!(outcome.meta.compress_hint);
        assert!(outcome
            .meta
            .headers()
            .contains(&("Content-Encoding", "gzip".to_string())));
    }

    #[tokio::test]
    async fn test_breaker_opens_after_repeated_handler_failures() {
        let executor = executor(ResilienceConfig {
            circuit_failure_threshold: 2,
            ..test_config()
        });

        for _ in 0..2 {
            let outcome: Outcome<Project> = executor
                .execute(
                    "project:x",
                    1_u64,
                    |id, _ctx| async move { Err::<Project, _>(NotFound(id)) },
                    ExecuteOptions::default(),
                )
                .await;
            assert_eq!(outcome.result.unwrap_err().kind(), "handler");
        }
        assert_eq!(executor.handler_breaker().state(), CircuitState::Open);

        let outcome: Outcome<Project> = executor
            .execute(
                "project:x",
                1_u64,
                |id, _ctx| async move { Err::<Project, _>(NotFound(id)) },
                ExecuteOptions::default(),
            )
            .await;
        assert!(matches!(
            outcome.result,
            Err(ExecutorError::CircuitOpen { .. })
        ));
    }
}
