// Cooperative Cancellation Channel
//
// One pair per job: the registry keeps the handle, the driver polls the
// token at the top of every iteration. The same pair doubles as the
// daemon-wide shutdown signal.

use tokio::sync::watch;

/// Cancellation signal sender
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal the paired tokens
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Hand out another token observing this handle
    pub fn subscribe(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cancellation signal receiver (cloneable)
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Check if cancellation has been signaled
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the cancellation signal.
    ///
    /// Also resolves when the handle is dropped, which only happens when
    /// the job left the registry; callers treat both the same way.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.changed().await;
    }
}

/// Create a cancellation channel pair
pub fn cancel_channel() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}
