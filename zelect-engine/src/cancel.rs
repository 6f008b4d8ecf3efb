//! Cooperative cancellation of a running election.

use tokio::sync::watch;

/// Creates a connected cancellation pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Requests cancellation. Dropping the handle does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observed by the engine at each suspension point.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that can never fire.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once cancellation has been requested.
    ///
    /// If the handle is dropped without cancelling this never completes.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_cancel_wakes_waiter() {
        let (handle, signal) = cancellation();
        let mut waiter_signal = signal.clone();
        let mut waiter = task::spawn(async move { waiter_signal.cancelled().await });

        assert_pending!(waiter.poll());
        assert!(!signal.is_cancelled());

        handle.cancel();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_dropped_handle_never_cancels() {
        let (handle, mut signal) = cancellation();
        drop(handle);
        let mut waiter = task::spawn(async move { signal.cancelled().await });
        assert_pending!(waiter.poll());
    }

    #[test]
    fn test_never_signal() {
        let mut signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let mut waiter = task::spawn(async move { signal.cancelled().await });
        assert_pending!(waiter.poll());
    }
}
