//! Cooperative shutdown signal shared by the long-running loops.

use std::time::Duration;

use tokio::sync::watch;

pub type CancelRx = watch::Receiver<bool>;

pub fn is_cancelled(rx: &CancelRx) -> bool {
    *rx.borrow()
}

/// Resolves once cancellation was requested or the sender is gone.
pub async fn cancelled(rx: &mut CancelRx) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
pub async fn sleep_or_cancel(duration: Duration, rx: &mut CancelRx) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancelled(rx) => false,
    }
}
