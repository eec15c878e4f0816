// THEORY:
// The `broadcast` module fans per-tick DSL blocks out to live subscribers
// without ever letting a subscriber slow the analysis loop. Delivery is
// best-effort: each subscriber gets its own bounded channel, sends use
// `try_send`, and a full or closed channel retires that subscriber on the
// spot. Frames that do get through always arrive in strict capture order.

use tokio::sync::mpsc;
use tracing::debug;

/// One tick's wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct DslEnvelope {
    pub frame_num: u64,
    pub timestamp: f64,
    pub dsl_block: String,
}

pub struct DslBroadcaster {
    subscribers: Vec<mpsc::Sender<DslEnvelope>>,
    buffer: usize,
}

impl DslBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self { subscribers: Vec::new(), buffer: buffer.max(1) }
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&mut self) -> mpsc::Receiver<DslEnvelope> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.push(tx);
        rx
    }

    /// Pushes one envelope to every live subscriber. Never blocks; a
    /// subscriber that cannot keep up is dropped.
    pub fn publish(&mut self, envelope: DslEnvelope) {
        self.subscribers.retain(|tx| match tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(frame = envelope.frame_num, "slow subscriber dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(frame_num: u64) -> DslEnvelope {
        DslEnvelope {
            frame_num,
            timestamp: frame_num as f64,
            dsl_block: format!("FRAME {frame_num} @ 00:00:00.000\n"),
        }
    }

    #[tokio::test]
    async fn frames_arrive_in_capture_order() {
        let mut b = DslBroadcaster::new(8);
        let mut rx = b.subscribe();
        for n in 1..=3 {
            b.publish(envelope(n));
        }
        for n in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().frame_num, n);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_not_awaited() {
        let mut b = DslBroadcaster::new(2);
        let _slow = b.subscribe();
        let mut live = b.subscribe();
        assert_eq!(b.subscriber_count(), 2);

        // The slow receiver never drains; its buffer fills after two frames.
        for n in 1..=3 {
            b.publish(envelope(n));
            assert_eq!(live.recv().await.unwrap().frame_num, n);
        }
        assert_eq!(b.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned() {
        let mut b = DslBroadcaster::new(4);
        let rx = b.subscribe();
        drop(rx);
        b.publish(envelope(1));
        assert_eq!(b.subscriber_count(), 0);
    }
}
