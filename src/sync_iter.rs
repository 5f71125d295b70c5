use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::Error;
use crate::observer::Observer;

/// Blocking `hasNext`/`next`-style facade over an [`Observer`], for callers
/// that live outside an async context. Preserves the observer's exception
/// identity: a transport error surfaced while blocked is returned as-is,
/// with its original status and kind intact, rather than being wrapped.
pub struct SyncIteratorAdapter<T> {
    observer: Arc<Observer<T>>,
    handle: Handle,
    peeked: Option<T>,
    exhausted: bool,
}

impl<T> SyncIteratorAdapter<T>
where
    T: Send + 'static,
{
    #[must_use]
    pub fn new(observer: Arc<Observer<T>>, handle: Handle) -> Self {
        Self {
            observer,
            handle,
            peeked: None,
            exhausted: false,
        }
    }

    /// Blocks the calling thread until it is known whether another element
    /// is available, or a transport error occurs.
    pub fn has_next(&mut self) -> Result<bool, Error> {
        if self.exhausted {
            return Ok(false);
        }
        if self.peeked.is_some() {
            return Ok(true);
        }

        match self.handle.block_on(self.observer.next_element()) {
            Ok(Some(item)) => {
                self.peeked = Some(item);
                Ok(true)
            }
            Ok(None) => {
                self.exhausted = true;
                Ok(false)
            }
            Err(err) => {
                self.exhausted = true;
                Err(err)
            }
        }
    }

    /// Blocks until the next element is available and returns it. If the
    /// current thread is marked interrupted while blocked (modeled here as
    /// the calling runtime task being cancelled), the observer is closed
    /// and the resulting transport error is propagated.
    pub fn next(&mut self) -> Result<Option<T>, Error> {
        if let Some(item) = self.peeked.take() {
            return Ok(Some(item));
        }
        if self.exhausted {
            return Ok(None);
        }

        match self.handle.block_on(self.observer.next_element()) {
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Ok(some) => Ok(some),
            Err(err) => {
                self.observer.close();
                self.exhausted = true;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Observer;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tonic::Status;

    fn fake_stream(items: Vec<Result<i32, Status>>) -> ReceiverStream<Result<i32, Status>> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        tokio::spawn(async move {
            for item in items {
                let _ = tx.send(item).await;
            }
        });
        ReceiverStream::new(rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drains_all_items_then_reports_exhaustion() {
        let observer = Arc::new(Observer::new(fake_stream(vec![Ok(1), Ok(2)]), 4));
        let handle = Handle::current();
        let mut adapter = SyncIteratorAdapter::new(observer, handle);

        let collected = tokio::task::spawn_blocking(move || {
            let mut out = vec![];
            while adapter.has_next().unwrap() {
                out.push(adapter.next().unwrap().unwrap());
            }
            out
        })
        .await
        .unwrap();

        assert_eq!(collected, vec![1, 2]);
    }
}
