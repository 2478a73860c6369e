//! Pull-based sequence of log lines and the fan-in that feeds it.

use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Error;
use crate::types::LogLine;

/// Capacity of the exchange point between source workers and the consumer.
/// One slot keeps every source at most one element ahead of the consumer.
pub const DEFAULT_EXCHANGE_CAPACITY: usize = 1;

/// Single-consumer sequence of results produced by concurrent workers.
///
/// Each pull yields an element, a per-source error, or `None` once every
/// worker has finished. Dropping the iterator cancels every worker; use
/// [`LogIterator::stop`] to also wait for them to retire.
pub struct LogIterator<T = LogLine> {
    rx: ReceiverStream<Result<T, Error>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<T> LogIterator<T> {
    /// Pull the next result, `None` once exhausted.
    pub async fn recv(&mut self) -> Option<Result<T, Error>> {
        self.rx.next().await
    }

    /// Blocking variant of [`LogIterator::recv`] for consumers outside the runtime.
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<Result<T, Error>> {
        self.rx.as_mut().blocking_recv()
    }

    /// Cancel every worker and wait for all of them to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl<T> Stream for LogIterator<T> {
    type Item = Result<T, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl<T> Drop for LogIterator<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Producer side of a [`LogIterator`].
///
/// Every clone keeps the iterator open: the consumer only sees exhaustion
/// once all mergers and all workers they spawned are gone.
pub struct Merger<T> {
    tx: mpsc::Sender<Result<T, Error>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<T> Clone for Merger<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

/// Create a connected merger/iterator pair.
pub fn channel<T>(capacity: usize, cancel: CancellationToken) -> (Merger<T>, LogIterator<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let tracker = TaskTracker::new();
    let merger = Merger {
        tx,
        cancel: cancel.clone(),
        tracker: tracker.clone(),
    };
    let iter = LogIterator {
        rx: ReceiverStream::new(rx),
        cancel,
        tracker,
    };
    (merger, iter)
}

/// Fan a fixed set of sources into one iterator.
pub fn merge<T, S, I>(sources: I) -> LogIterator<T>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, Error>> + Send + 'static,
    I: IntoIterator<Item = S>,
{
    let (merger, iter) = channel(DEFAULT_EXCHANGE_CAPACITY, CancellationToken::new());
    for source in sources {
        merger.add(source);
    }
    iter
}

impl<T: Send + 'static> Merger<T> {
    /// Start a worker forwarding `source` until it ends or yields an error.
    pub fn add<S>(&self, source: S)
    where
        S: Stream<Item = Result<T, Error>> + Send + 'static,
    {
        self.tracker.spawn(self.clone().pump(source));
    }

    /// Run a task tied to this merger's lifetime. The task keeps the iterator
    /// open for as long as it holds a merger.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Forward `source` on the current task; returns once it is drained,
    /// fails, or the merge is cancelled.
    pub async fn pump<S>(self, source: S)
    where
        S: Stream<Item = Result<T, Error>> + Send,
    {
        let mut source = std::pin::pin!(source);
        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = source.next() => item,
            };
            let Some(item) = item else { break };
            let terminal = item.is_err();
            if !self.send(item).await || terminal {
                break;
            }
        }
    }

    /// Deliver one result to the consumer. Returns false once the consumer
    /// is gone or the merge was cancelled.
    pub async fn send(&self, item: Result<T, Error>) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
