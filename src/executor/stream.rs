use super::types::{StreamOptions, StreamSummary};
use super::RequestExecutor;
use crate::constants::{content_types, headers};
use crate::error::{BoxError, ExecutorError, ExecutorResult};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Response headers for an ND-JSON streaming body
pub fn ndjson_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        (headers::CONTENT_TYPE, content_types::NDJSON),
        (headers::TRANSFER_ENCODING, "chunked"),
    ]
}

struct StreamState<S> {
    producer: Pin<Box<S>>,
    stream_id: Uuid,
    chunk_size: usize,
    emitted: usize,
    yield_pending: bool,
    finished: bool,
}

impl RequestExecutor {
    /// Turn a lazy producer into a stream of ND-JSON lines
    ///
    /// Each item is serialized as soon as it is produced and emitted as one
    /// line ending in `\n`. After every `chunk_size` items the stream yields to
    /// the scheduler once. A producer error is emitted as the final `Err`;
    /// lines already emitted stand.
    pub fn execute_stream<S, T, E>(
        &self,
        producer: S,
        options: StreamOptions,
    ) -> impl Stream<Item = ExecutorResult<String>> + Send + 'static
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let state = StreamState {
            producer: Box::pin(producer),
            stream_id: Uuid::new_v4(),
            chunk_size: options
                .chunk_size
                .unwrap_or(self.config.stream_chunk_size)
                .max(1),
            emitted: 0,
            yield_pending: false,
            finished: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            if state.yield_pending {
                state.yield_pending = false;
                tokio::task::yield_now().await;
            }

            let item = match state.producer.next().await {
                Some(Ok(item)) => serde_json::to_string(&item)
                    .map(|mut line| {
                        line.push('\n');
                        line
                    })
                    .map_err(|e| ExecutorError::Unknown(format!("item not serializable: {e}"))),
                Some(Err(e)) => Err(ExecutorError::handler(e)),
                None => {
                    info!(
                        stream_id = %state.stream_id,
                        emitted = state.emitted,
                        "Stream complete"
                    );
                    return None;
                }
            };

            match &item {
                Ok(_) => {
                    state.emitted += 1;
                    if state.emitted % state.chunk_size == 0 {
                        debug!(
                            stream_id = %state.stream_id,
                            emitted = state.emitted,
                            "Stream chunk emitted, yielding"
                        );
                        state.yield_pending = true;
                    }
                }
                Err(e) => {
                    warn!(
                        stream_id = %state.stream_id,
                        emitted = state.emitted,
                        error = %e,
                        "Stream terminated by producer error"
                    );
                    state.finished = true;
                }
            }

            Some((item, state))
        })
    }

    /// Drain [`execute_stream`](Self::execute_stream) into `writer`
    ///
    /// Flushes after every chunk and once more at the end. Returns the first
    /// producer error after flushing what was already written.
    pub async fn stream_to_writer<S, T, E, W>(
        &self,
        producer: S,
        writer: &mut W,
        options: StreamOptions,
    ) -> ExecutorResult<StreamSummary>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let chunk_size = options
            .chunk_size
            .unwrap_or(self.config.stream_chunk_size)
            .max(1);
        let lines = self.execute_stream(producer, options);
        futures::pin_mut!(lines);

        let mut written = 0;
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    writer.flush().await.map_err(write_failed)?;
                    return Err(e);
                }
            };
            writer.write_all(line.as_bytes()).await.map_err(write_failed)?;
            written += 1;
            if written % chunk_size == 0 {
                writer.flush().await.map_err(write_failed)?;
            }
        }
        writer.flush().await.map_err(write_failed)?;

        Ok(StreamSummary {
            lines: written,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn write_failed(error: std::io::Error) -> ExecutorError {
    ExecutorError::Unknown(format!("stream write failed: {error}"))
}
