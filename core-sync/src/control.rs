//! Cooperative pause/cancel handle shared between a running sync and its callers
//!
//! The orchestrator only consults the handle between pages, so a page that
//! is being fetched or written always completes before a request is honored.
//! The coordinator uses the same handle to stop a run that outlived its time
//! budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What the orchestrator should do at the next page boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Pause,
    Cancel,
    /// The run exceeded its time budget
    Expire,
}

#[derive(Debug, Clone)]
pub struct SyncControl {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    expired: Arc<AtomicBool>,
}

impl SyncControl {
    pub fn new() -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(pause),
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the run at its next page boundary and report it as timed out
    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Request a pause; returns false if one was already requested
    pub fn pause(&self) -> bool {
        self.pause.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Clear a pause request; returns false if none was pending
    pub fn resume(&self) -> bool {
        self.pause.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Expiry wins over cancellation, which wins over a pending pause
    pub fn checkpoint(&self) -> Checkpoint {
        if self.is_expired() {
            Checkpoint::Expire
        } else if self.is_cancelled() {
            Checkpoint::Cancel
        } else if self.is_paused() {
            Checkpoint::Pause
        } else {
            Checkpoint::Continue
        }
    }

    /// Wait while paused
    ///
    /// Returns `false` if the sync was cancelled while waiting.
    pub async fn wait_while_paused(&self) -> bool {
        let mut paused = self.pause.subscribe();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return !self.is_cancelled();
                    }
                }
            }
        }
    }
}

impl Default for SyncControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_checkpoint_priority() {
        let control = SyncControl::new();
        assert_eq!(control.checkpoint(), Checkpoint::Continue);

        assert!(control.pause());
        assert!(!control.pause());
        assert_eq!(control.checkpoint(), Checkpoint::Pause);

        control.cancel();
        assert_eq!(control.checkpoint(), Checkpoint::Cancel);

        control.expire();
        assert_eq!(control.checkpoint(), Checkpoint::Expire);
    }

    #[tokio::test]
    async fn test_expire_releases_paused_wait() {
        let control = SyncControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        control.expire();
        assert!(!waiter.await.unwrap());
        assert!(control.is_cancelled());
        assert!(control.is_expired());
    }

    #[test]
    fn test_resume_without_pause() {
        let control = SyncControl::new();
        assert!(!control.resume());
        control.pause();
        assert!(control.resume());
        assert!(!control.is_paused());
    }

    #[tokio::test]
    async fn test_wait_returns_on_resume() {
        let control = SyncControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_returns_on_cancel() {
        let control = SyncControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        control.cancel();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_without_pause_is_immediate() {
        let control = SyncControl::new();
        assert!(control.wait_while_paused().await);
    }
}
