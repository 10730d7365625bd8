//! End-to-end request execution scenarios

mod common;

use common::*;
use futures::FutureExt;
use resilient_cache::executor::ndjson_headers;
use resilient_cache::{
    BatchOptions, CacheStatus, CircuitState, ExecuteOptions, ExecutorError, Fetcher,
    ParallelOptions, ResilienceConfig, StreamOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
}

#[tokio::test]
async fn test_seeded_entry_is_served_as_hit() {
    let executor = executor_with(test_config());
    let ann = User {
        name: "Ann".to_string(),
    };
    executor
        .cache()
        .set_json("user:42", &ann, Duration::from_secs(60))
        .await;
    assert_eq!(executor.cache().get_json::<User>("user:42").await, Some(ann.clone()));

    let calls = CallCounter::new();
    let handler_calls = calls.clone();
    let outcome = executor
        .execute(
            "user:42",
            42_u64,
            |_, _ctx| async move {
                handler_calls.hit();
                Ok::<_, BackendUnavailable>(User {
                    name: "someone else".to_string(),
                })
            },
            ExecuteOptions::default(),
        )
        .await;

    assert_eq!(outcome.meta.cache_status, CacheStatus::Hit);
    assert!(outcome
        .meta
        .headers()
        .contains(&("X-Cache", "HIT".to_string())));
    assert_eq!(outcome.result.unwrap(), ann);
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_miss_writes_back_for_next_call() {
    let executor = executor_with(test_config());
    let calls = CallCounter::new();

    for expected in [CacheStatus::Miss, CacheStatus::Hit] {
        let handler_calls = calls.clone();
        let outcome = executor
            .execute(
                "tenant:9",
                9_u64,
                |id, ctx| async move {
                    handler_calls.hit();
                    assert_eq!(ctx.key.as_deref(), Some("tenant:9"));
                    Ok::<_, BackendUnavailable>(json!({ "tenant": id }))
                },
                ExecuteOptions::default(),
            )
            .await;
        assert_eq!(outcome.meta.cache_status, expected);
        assert_eq!(outcome.result.unwrap(), json!({ "tenant": 9 }));
        settle_writes(&executor).await;
    }

    assert_eq!(calls.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_handler_trips_circuit_then_probes() {
    let executor = executor_with(ResilienceConfig {
        circuit_failure_threshold: 3,
        circuit_open_duration_ms: 1_000,
        ..test_config()
    });
    let calls = CallCounter::new();

    let run = || {
        let handler_calls = calls.clone();
        executor.execute(
            "report:1",
            (),
            move |_, _ctx| async move {
                handler_calls.hit();
                Err::<User, _>(BackendUnavailable)
            },
            ExecuteOptions::default(),
        )
    };

    for attempt in 1..=3 {
        let outcome = run().await;
        assert_eq!(outcome.result.unwrap_err().kind(), "handler", "call {attempt}");
    }

    let outcome = run().await;
    assert!(matches!(
        outcome.result,
        Err(ExecutorError::CircuitOpen { .. })
    ));
    assert_eq!(calls.count(), 3);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    let probe = run().await;
    assert_eq!(calls.count(), 4);
    assert_eq!(probe.result.unwrap_err().kind(), "handler");
    assert_eq!(executor.handler_breaker().state(), CircuitState::Open);
}

#[tokio::test]
async fn test_stream_of_250_items_in_chunks_of_100() {
    let executor = executor_with(ResilienceConfig {
        stream_chunk_size: 100,
        ..test_config()
    });
    let producer =
        futures::stream::iter((0..250).map(|n| Ok::<_, BackendUnavailable>(json!({ "seq": n }))));
    let mut body = Vec::new();

    let summary = executor
        .stream_to_writer(producer, &mut body, StreamOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.lines, 250);

    let lines: Vec<serde_json::Value> = String::from_utf8(body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 250);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line["seq"], i);
    }
    assert!(ndjson_headers().contains(&("Content-Type", "application/x-ndjson")));
}

#[tokio::test]
async fn test_oversized_batch_rejected_without_invoking_handler() {
    let executor = executor_with(test_config());
    let calls = CallCounter::new();
    let handler_calls = calls.clone();

    let err = executor
        .execute_batch(
            (0..150).collect::<Vec<u32>>(),
            move |n| {
                handler_calls.hit();
                async move { Ok::<_, BackendUnavailable>(n) }
            },
            BatchOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Validation(_)));
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_batch_preserves_order_across_chunks() {
    let executor = executor_with(test_config());
    let outcome = executor
        .execute_batch(
            (1..=47).collect::<Vec<u32>>(),
            |n| async move { Ok::<_, BackendUnavailable>(n * n) },
            BatchOptions {
                chunk_size: Some(5),
                chunk_timeout: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 47);
    assert_eq!(outcome.chunks_processed, 10);
    assert_eq!(
        outcome.results,
        (1..=47).map(|n| n * n).collect::<Vec<u32>>()
    );
}

#[tokio::test]
async fn test_parallel_fetch_partial_and_strict() {
    let executor = executor_with(test_config());
    let fetchers = || -> Vec<(&'static str, Fetcher<serde_json::Value>)> {
        vec![
            ("profile", async { Ok(json!({"name": "Ann"})) }.boxed()),
            ("projects", async { Ok(json!([1, 2, 3])) }.boxed()),
            (
                "billing",
                async { Err(Box::new(BackendUnavailable) as resilient_cache::BoxError) }.boxed(),
            ),
        ]
    };

    let partial = executor
        .execute_parallel(fetchers(), ParallelOptions::partial())
        .await
        .unwrap();
    assert_eq!(partial.len(), 3);
    assert_eq!(partial["profile"], Some(json!({"name": "Ann"})));
    assert_eq!(partial["projects"], Some(json!([1, 2, 3])));
    assert_eq!(partial["billing"], None);

    let err = executor
        .execute_parallel(fetchers(), ParallelOptions::strict())
        .await
        .unwrap_err();
    let source = err.handler_source().unwrap();
    assert!(source.downcast_ref::<BackendUnavailable>().is_some());
}

#[tokio::test]
async fn test_degraded_durable_cache_is_invisible_to_callers() {
    let executor = executor_with(unreachable_durable_config());
    let calls = CallCounter::new();

    for expected in [CacheStatus::Miss, CacheStatus::Hit] {
        let handler_calls = calls.clone();
        let outcome = executor
            .execute(
                "dashboard:7",
                (),
                |_, _ctx| async move {
                    handler_calls.hit();
                    Ok::<_, BackendUnavailable>(json!({"widgets": 4}))
                },
                ExecuteOptions::default(),
            )
            .await;
        assert_eq!(outcome.meta.cache_status, expected);
        assert!(outcome.result.is_ok());
        settle_writes(&executor).await;
    }
    assert_eq!(calls.count(), 1);
}
