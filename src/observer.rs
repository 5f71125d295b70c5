use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tonic::Status;

use crate::error::Error;

/// Buffers a server-streaming RPC behind explicit flow-control credit so
/// that a slow consumer never causes the producer to drop messages already
/// sent by the server. The bounded channel capacity *is* the credit window:
/// the background task can only push `capacity` messages ahead of the
/// consumer before it blocks, mirroring "request one more on every
/// delivery" flow control with an initial window of `capacity`.
///
/// Generic over any `Stream<Item = Result<T, Status>>` rather than
/// `tonic::Streaming<T>` directly so the buffering logic can be exercised
/// against plain channel-backed fakes in tests.
pub struct Observer<T> {
    rx: Mutex<mpsc::Receiver<Result<T, Status>>>,
    pending: AtomicBool,
    task: tokio::task::JoinHandle<()>,
    /// Set by `close()` before the draining task is aborted, so that the
    /// `None` a pending `recv()` eventually wakes up with (once the abort
    /// drops the task's sender) is attributed to client-initiated
    /// cancellation rather than reported as clean stream exhaustion.
    closed: AtomicBool,
}

impl<T> Observer<T>
where
    T: Send + 'static,
{
    /// Spawns a task draining `stream` into an internal buffer with the
    /// given initial credit (capacity of the internal channel).
    pub fn new<S>(mut stream: S, initial_credit: u32) -> Self
    where
        S: futures_core::Stream<Item = Result<T, Status>> + Send + Unpin + 'static,
    {
        let capacity = usize::try_from(initial_credit.max(1)).unwrap_or(16);
        let (tx, rx) = mpsc::channel(capacity);

        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        Self {
            rx: Mutex::new(rx),
            pending: AtomicBool::new(false),
            task,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the next buffered message, awaiting the server if none is
    /// buffered yet. `Ok(None)` signals clean stream completion. Calling
    /// this again before a prior call resolves is an `Error::IllegalState`.
    pub async fn next_element(&self) -> Result<Option<T>, Error> {
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::IllegalState);
        }

        let result = {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        self.pending.store(false, Ordering::Release);

        match result {
            // The draining task's sender was dropped because `close()` ran,
            // not because the server stream ended cleanly: surface the
            // cancellation rather than a silent end-of-stream.
            None if self.closed.load(Ordering::Acquire) => Err(Self::closed_error()),
            None => Ok(None),
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(status)) => Err(Error::transport_fatal(
                None,
                crate::error::StateLabel::Poller,
                None,
                status,
            )),
        }
    }

    /// Cancels the underlying RPC ("closed by client") and stops buffering.
    /// Any `next_element()` call already blocked on the now-aborted task, or
    /// made afterwards, resolves with a transport-cancelled error instead of
    /// silently reporting exhaustion. Idempotent: closing twice is a no-op
    /// on the second call.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();
    }

    fn closed_error() -> Error {
        Error::transport_fatal(
            None,
            crate::error::StateLabel::Poller,
            None,
            Status::cancelled("closed by client"),
        )
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::ReceiverStream;

    fn fake_stream(
        items: Vec<Result<i32, Status>>,
    ) -> ReceiverStream<Result<i32, Status>> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_every_message_before_completion() {
        let observer = Observer::new(fake_stream(vec![Ok(1), Ok(2), Ok(3)]), 2);
        assert_eq!(observer.next_element().await.unwrap(), Some(1));
        assert_eq!(observer.next_element().await.unwrap(), Some(2));
        assert_eq!(observer.next_element().await.unwrap(), Some(3));
        assert_eq!(observer.next_element().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn surfaces_a_transport_error_after_any_buffered_items() {
        let observer = Observer::new(
            fake_stream(vec![Ok(1), Err(Status::unavailable("down"))]),
            4,
        );
        assert_eq!(observer.next_element().await.unwrap(), Some(1));
        let err = observer.next_element().await.unwrap_err();
        assert!(matches!(err, Error::TransportFatal { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn double_call_without_awaiting_first_is_illegal_state() {
        use std::sync::Arc;

        // No items ever arrive, so the first call stays pending indefinitely
        // and the second call is guaranteed to observe the pending flag set.
        let observer = Arc::new(Observer::new(fake_stream(vec![]), 1));
        let o2 = observer.clone();
        let first = tokio::spawn(async move { o2.next_element().await });
        tokio::task::yield_now().await;
        let second = observer.next_element().await;
        assert!(matches!(second, Err(Error::IllegalState)));
        first.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_is_idempotent() {
        let observer = Observer::new(fake_stream(vec![Ok(1)]), 1);
        observer.close();
        observer.close();
    }
}
