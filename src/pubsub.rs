//! Pub/Sub (spec §4.5): fans Mirror messages out to subscribers with
//! per-subscriber acknowledgement and a timeout-bounded kill switch.
//!
//! Grounded in the same shape as the uplink's send-then-await-ack loop
//! (`forwarder::uplink::send_batch`) combined with a broadcast-style
//! registry (`forwarder::local_fanout`) — except here each subscriber gets
//! its own channel so a slow one can be killed without touching the rest.

use crate::error::PubSubError;
use dns_mirror_proto::MirrorMessage;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

struct Delivery {
    message: MirrorMessage,
    ack: oneshot::Sender<()>,
}

/// A live subscription. Call [`Subscription::next`] to receive the next
/// message; calling it *is* the acknowledgement the Mirror is waiting for.
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn next(&mut self) -> Option<MirrorMessage> {
        let delivery = self.rx.recv().await?;
        let _ = delivery.ack.send(());
        Some(delivery.message)
    }
}

#[derive(Default)]
pub struct PubSub {
    subscribers: HashMap<String, mpsc::Sender<Delivery>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, id: impl Into<String>) -> Result<Subscription, PubSubError> {
        let id = id.into();
        if self.subscribers.contains_key(&id) {
            return Err(PubSubError::AlreadySubscribed(id));
        }
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.insert(id.clone(), tx);
        Ok(Subscription { id, rx })
    }

    pub fn unsubscribe(&mut self, id: &str) {
        self.subscribers.remove(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers `message` to every subscriber concurrently, waiting up to
    /// `ack_timeout` for each one's acknowledgement. Subscribers that miss
    /// the deadline (or whose channel is gone) are removed; the Mirror
    /// continues regardless.
    pub async fn publish(&mut self, message: MirrorMessage, ack_timeout: Duration) {
        if self.subscribers.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        let waits = self.subscribers.iter().map(|(id, tx)| {
            let message = message.clone();
            let tx = tx.clone();
            async move {
                let (ack_tx, ack_rx) = oneshot::channel();
                let delivery = Delivery { message, ack: ack_tx };
                if tx.send(delivery).await.is_err() {
                    return Err(id.clone());
                }
                match tokio::time::timeout(ack_timeout, ack_rx).await {
                    Ok(Ok(())) => Ok(()),
                    _ => Err(id.clone()),
                }
            }
        });

        for result in futures_util::future::join_all(waits).await {
            if let Err(id) = result {
                warn!(subscriber = id, "subscriber missed ack deadline, terminating");
                dead.push(id);
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_mirror_proto::TaskId;

    #[tokio::test]
    async fn duplicate_subscribe_is_an_error() {
        let mut ps = PubSub::new();
        let _sub = ps.subscribe("projector").unwrap();
        assert!(matches!(
            ps.subscribe("projector"),
            Err(PubSubError::AlreadySubscribed(_))
        ));
    }

    #[tokio::test]
    async fn publish_is_delivered_and_acked() {
        let mut ps = PubSub::new();
        let mut sub = ps.subscribe("projector").unwrap();

        let publish = tokio::spawn(async move {
            let mut ps = ps;
            ps.publish(MirrorMessage::Eos, Duration::from_millis(500)).await;
            ps
        });

        let msg = sub.next().await.unwrap();
        assert!(matches!(msg, MirrorMessage::Eos));
        let ps = publish.await.unwrap();
        assert_eq!(ps.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_is_terminated_others_unaffected() {
        let mut ps = PubSub::new();
        let mut fast = ps.subscribe("fast").unwrap();
        let _slow = ps.subscribe("slow").unwrap(); // never calls next()

        let msg = MirrorMessage::TaskUpdated(TaskId::new("f", "t"), Default::default());
        ps.publish(msg, Duration::from_millis(20)).await;

        assert_eq!(ps.subscriber_count(), 1);
        // the fast subscriber's delivery is still sitting in its channel
        assert!(fast.next().await.is_some());
    }
}
