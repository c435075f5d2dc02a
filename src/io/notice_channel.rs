//! Typed channel for user-facing recorder notices
//!
//! Provides a non-blocking way to hand notices to the UI side.
//! Uses a bounded mpsc channel so a stalled consumer cannot grow memory.

use crate::domain::events::RecorderNotice;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Sender handle for notices
///
/// Non-blocking - if the channel is full, notices are dropped.
#[derive(Debug, Clone)]
pub struct NoticeSender {
    tx: mpsc::Sender<RecorderNotice>,
}

impl NoticeSender {
    pub fn new(tx: mpsc::Sender<RecorderNotice>) -> Self {
        Self { tx }
    }

    /// Queue a notice; returns false when it was dropped
    pub fn send(&self, notice: RecorderNotice) -> bool {
        match self.tx.try_send(notice) {
            Ok(()) => true,
            Err(TrySendError::Full(notice)) => {
                warn!(notice = %notice.as_str(), "notice_dropped: channel full");
                false
            }
            Err(TrySendError::Closed(notice)) => {
                debug!(notice = %notice.as_str(), "notice_dropped: no consumer");
                false
            }
        }
    }
}

/// Create a new notice channel pair
pub fn create_notice_channel(buffer_size: usize) -> (NoticeSender, mpsc::Receiver<RecorderNotice>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (NoticeSender::new(tx), rx)
}

/// Stand-in UI consumer: surfaces every notice in the log
pub async fn run_notice_logger(
    mut rx: mpsc::Receiver<RecorderNotice>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            notice = rx.recv() => {
                match notice {
                    Some(notice) => {
                        warn!(
                            notice = %notice.as_str(),
                            message = %notice.message(),
                            "user_notice"
                        );
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::samples::AuthorizationStatus;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (sender, mut rx) = create_notice_channel(4);
        let notice =
            RecorderNotice::AuthorizationRevoked { status: AuthorizationStatus::Restricted };

        assert!(sender.send(notice.clone()));
        assert_eq!(rx.recv().await, Some(notice));
    }

    #[test]
    fn test_full_channel_drops() {
        let (sender, _rx) = create_notice_channel(1);
        let notice = RecorderNotice::PersistenceFailed {
            operation: "append_location",
            error: "disk full".into(),
        };

        assert!(sender.send(notice.clone()));
        assert!(!sender.send(notice));
    }

    #[test]
    fn test_closed_channel_drops() {
        let (sender, rx) = create_notice_channel(1);
        drop(rx);
        assert!(!sender.send(RecorderNotice::AuthorizationRevoked {
            status: AuthorizationStatus::Denied
        }));
    }
}
