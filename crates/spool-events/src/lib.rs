use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    no_receivers: AtomicU64,
}

/// Counter snapshot exposed on the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub no_receivers: u64,
    pub receivers: usize,
}

/// In-process bus backed by a tokio broadcast channel. Publishing never
/// blocks; a receiver that falls behind observes `RecvError::Lagged` and
/// misses events instead of applying backpressure to the publisher.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
    counters: Arc<Counters>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Subscribe to a filtered view of the bus that forwards only events
    /// whose kind starts with any of the provided prefixes.
    pub fn subscribe_filtered(&self, prefixes: Vec<String>) -> broadcast::Receiver<Envelope> {
        let (ftx, frx) = broadcast::channel(64);
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(env) => {
                        if prefixes.iter().any(|p| env.kind.starts_with(p.as_str())) {
                            if ftx.send(env).is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        frx
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        let env = Envelope {
            time: chrono_now(),
            kind: kind.to_string(),
            payload,
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(env) {
            Ok(n) => {
                self.counters.delivered.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.no_receivers.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            no_receivers: self.counters.no_receivers.load(Ordering::Relaxed),
            receivers: self.tx.receiver_count(),
        }
    }
}

fn chrono_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish("job.received", &json!({"token": "t"}));
        let env = rx.recv().await.expect("envelope");
        assert_eq!(env.kind, "job.received");
        assert_eq!(env.payload["token"], "t");
        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn publish_without_receivers_is_counted_not_fatal() {
        let bus = Bus::new(8);
        bus.publish("job.received", &json!({}));
        assert_eq!(bus.stats().no_receivers, 1);
    }

    #[tokio::test]
    async fn filtered_subscription_drops_other_kinds() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe_filtered(vec!["job.".to_string()]);
        bus.publish("printer.seen", &json!({}));
        bus.publish("job.offered", &json!({"token": "x"}));
        let env = rx.recv().await.expect("envelope");
        assert_eq!(env.kind, "job.offered");
    }
}
