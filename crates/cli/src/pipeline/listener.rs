//! Bridges listener callbacks from the synchronizer thread onto a tokio channel.

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{ErrorCode, FrameListener, SensorFrame};
use tokio::sync::mpsc;
use tracing::warn;

/// Listener callback forwarded to the async consumer
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Startup,
    Frame(SensorFrame),
    Error { code: ErrorCode, message: String },
    Closed,
}

/// Forwards callbacks with `try_send`
///
/// The synchronizer thread never waits on the consumer: when the channel is
/// full the event is dropped and counted.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::Sender<StreamEvent>,
    overflowed: AtomicU64,
}

impl ChannelListener {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            overflowed: AtomicU64::new(0),
        }
    }

    /// Events dropped because the channel was full
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    fn forward(&self, event: StreamEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
            }
            // Consumer already gone; nothing left to notify
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl FrameListener for ChannelListener {
    fn on_startup(&self) {
        self.forward(StreamEvent::Startup);
    }

    fn on_frame(&self, frame: &SensorFrame) {
        self.forward(StreamEvent::Frame(frame.clone()));
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        self.forward(StreamEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    fn on_close(&self) {
        // Closed must not be lost to a full channel
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(StreamEvent::Closed)
        {
            let tx = self.tx.clone();
            let spawned = std::thread::Builder::new()
                .name("close-notify".to_string())
                .spawn(move || {
                    let _ = tx.blocking_send(event);
                });
            if let Err(e) = spawned {
                warn!(error = %e, "Could not deliver close notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use contracts::Seq;

    use super::*;

    #[test]
    fn test_forwards_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let listener = ChannelListener::new(tx);

        listener.on_startup();
        listener.on_frame(&SensorFrame::zeroed(Seq(7)));
        listener.on_error(ErrorCode::SequenceGap, "gap");

        assert!(matches!(rx.try_recv(), Ok(StreamEvent::Startup)));
        match rx.try_recv() {
            Ok(StreamEvent::Frame(frame)) => assert_eq!(frame.sequence, Seq(7)),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx.try_recv(),
            Ok(StreamEvent::Error {
                code: ErrorCode::SequenceGap,
                ..
            })
        ));
    }

    #[test]
    fn test_full_channel_counts_overflow() {
        let (tx, _rx) = mpsc::channel(1);
        let listener = ChannelListener::new(tx);

        listener.on_frame(&SensorFrame::zeroed(Seq(1)));
        listener.on_frame(&SensorFrame::zeroed(Seq(2)));
        listener.on_frame(&SensorFrame::zeroed(Seq(3)));

        assert_eq!(listener.overflowed(), 2);
    }

    #[test]
    fn test_close_survives_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let listener = ChannelListener::new(tx);

        listener.on_frame(&SensorFrame::zeroed(Seq(1)));
        listener.on_close();

        assert!(matches!(rx.blocking_recv(), Some(StreamEvent::Frame(_))));
        assert!(matches!(rx.blocking_recv(), Some(StreamEvent::Closed)));
    }
}
