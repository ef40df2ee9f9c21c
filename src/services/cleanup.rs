//! Post-response cleanup of delivered files.
//!
//! The download handler wraps the file stream in [`CleanupOnComplete`].
//! Cleanup is scheduled only when the stream reports its end, i.e. after the
//! last chunk has been handed to hyper. A body dropped early (client gone,
//! response discarded) or a stream that fails leaves both files in place so
//! the download can be retried.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::services::storage::Storage;

#[derive(Debug)]
struct CleanupRequest {
    input: String,
    output: String,
}

/// Sender side of the cleanup queue. Cheap to clone.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<CleanupRequest>,
}

impl CleanupQueue {
    /// Spawn the task that executes cleanups against `storage`.
    pub fn start(storage: Arc<Storage>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<CleanupRequest>();

        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let storage = Arc::clone(&storage);
                // jobs share no files, so their cleanups may overlap
                tokio::spawn(async move {
                    storage.cleanup(&request.input, &request.output).await;
                });
            }
            tracing::debug!("Cleanup queue closed");
        });

        (Self { tx }, handle)
    }

    /// Queue deletion of a job's raw and processed files.
    pub fn schedule(&self, input: &str, output: &str) {
        let request = CleanupRequest {
            input: input.to_string(),
            output: output.to_string(),
        };
        if self.tx.send(request).is_err() {
            tracing::error!(input = %input, output = %output, "Cleanup queue closed, files left on disk");
        }
    }

    /// Wrap a download stream so that `input` and `output` are deleted once
    /// the stream has been read to its end.
    pub fn on_complete<S>(&self, stream: S, input: &str, output: &str) -> CleanupOnComplete<S> {
        CleanupOnComplete {
            inner: stream,
            pending: Some((self.clone(), input.to_string(), output.to_string())),
        }
    }
}

/// Stream adapter returned by [`CleanupQueue::on_complete`].
pub struct CleanupOnComplete<S> {
    inner: S,
    pending: Option<(CleanupQueue, String, String)>,
}

impl<S, T, E> Stream for CleanupOnComplete<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(item) => item,
            Poll::Pending => return Poll::Pending,
        };

        match &item {
            None => {
                if let Some((queue, input, output)) = self.pending.take() {
                    queue.schedule(&input, &output);
                }
            }
            Some(Err(_)) => {
                if let Some((_, _, output)) = self.pending.take() {
                    tracing::warn!(output = %output, "Download stream failed, keeping files");
                }
            }
            Some(Ok(_)) => {}
        }

        Poll::Ready(item)
    }
}
