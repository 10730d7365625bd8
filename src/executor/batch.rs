use super::types::{BatchOptions, BatchOutcome};
use super::RequestExecutor;
use crate::error::{BoxError, ExecutorError, ExecutorResult};
use crate::logging::log_error;
use futures::future::try_join_all;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl RequestExecutor {
    /// Run `handler` over `items` one chunk at a time
    ///
    /// Items within a chunk run concurrently; chunks run strictly in sequence,
    /// each under its own deadline. The first failing chunk stops the batch and
    /// the outputs of the chunks before it are returned alongside the error.
    ///
    /// Oversized batches and a zero chunk size are rejected up front.
    pub async fn execute_batch<I, T, H, Fut, E>(
        &self,
        items: Vec<I>,
        handler: H,
        options: BatchOptions,
    ) -> ExecutorResult<BatchOutcome<T>>
    where
        H: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let max = self.config.max_batch_size;
        if items.len() > max {
            return Err(ExecutorError::Validation(format!(
                "batch of {} items exceeds the maximum of {max}",
                items.len()
            )));
        }

        let chunk_size = options.chunk_size.unwrap_or(self.config.batch_chunk_size);
        if chunk_size == 0 {
            return Err(ExecutorError::Validation(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        let chunk_timeout = options
            .chunk_timeout
            .unwrap_or_else(|| self.config.request_timeout());

        let total_items = items.len();
        let total_chunks = total_items.div_ceil(chunk_size);
        let mut results = Vec::with_capacity(total_items);
        let mut chunks_processed = 0;
        let mut pending = items.into_iter().peekable();

        while pending.peek().is_some() {
            let chunk: Vec<I> = pending.by_ref().take(chunk_size).collect();
            let index = chunks_processed;

            match self.run_chunk(chunk, &handler, index, chunk_timeout).await {
                Ok(outputs) => {
                    results.extend(outputs);
                    chunks_processed += 1;
                    debug!(chunk = index, total_chunks = total_chunks, "Batch chunk complete");
                }
                Err(error) => {
                    warn!(
                        chunk = index,
                        total_chunks = total_chunks,
                        completed_items = results.len(),
                        error = %error,
                        "Batch chunk failed, skipping remaining chunks"
                    );
                    log_error(
                        "executor",
                        "execute_batch",
                        &error.to_string(),
                        Some(&format!("chunk {index} of {total_chunks}")),
                    );
                    return Ok(BatchOutcome {
                        results,
                        error: Some(error),
                        chunks_processed,
                        total_chunks,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        info!(
            items = total_items,
            chunks = chunks_processed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );

        Ok(BatchOutcome {
            results,
            error: None,
            chunks_processed,
            total_chunks,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_chunk<I, T, H, Fut, E>(
        &self,
        chunk: Vec<I>,
        handler: &H,
        index: usize,
        chunk_timeout: std::time::Duration,
    ) -> ExecutorResult<Vec<T>>
    where
        H: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let calls = chunk.into_iter().map(|item| async move {
            self.handler_breaker
                .call(|| async move { handler(item).await.map_err(ExecutorError::handler) })
                .await
                .map_err(ExecutorError::from)
        });

        match tokio::time::timeout(chunk_timeout, try_join_all(calls)).await {
            Ok(outputs) => outputs,
            Err(_) => Err(ExecutorError::timeout(format!("batch chunk {index}"), chunk_timeout)),
        }
    }
}
