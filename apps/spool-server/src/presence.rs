use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Point-in-time view of one serial's polling presence.
#[derive(Clone, Debug, Serialize)]
pub struct PresenceView {
    pub serial: String,
    pub last_seen: String,
    pub age_ms: i64,
    pub online: bool,
    pub address: String,
}

#[derive(Clone)]
struct Seen {
    at: DateTime<Utc>,
    address: String,
}

/// Last-contact bookkeeping per serial. Updated on every poll, read by the
/// query surface. A serial with no record has simply never polled.
pub struct PresenceTracker {
    inner: Mutex<HashMap<String, Seen>>,
}

impl PresenceTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
        })
    }

    pub async fn mark_seen(&self, serial: &str, address: &str, now: DateTime<Utc>) {
        let mut guard = self.inner.lock().await;
        guard.insert(
            serial.to_string(),
            Seen {
                at: now,
                address: address.to_string(),
            },
        );
    }

    pub async fn view(&self, serial: &str, now: DateTime<Utc>, window: Duration) -> Option<PresenceView> {
        let guard = self.inner.lock().await;
        guard.get(serial).map(|seen| to_view(serial, seen, now, window))
    }

    /// All serials ever seen, most recent first.
    pub async fn snapshot(&self, now: DateTime<Utc>, window: Duration) -> Vec<PresenceView> {
        let guard = self.inner.lock().await;
        let mut views: Vec<PresenceView> = guard
            .iter()
            .map(|(serial, seen)| to_view(serial, seen, now, window))
            .collect();
        views.sort_by_key(|v| v.age_ms);
        views
    }
}

fn to_view(serial: &str, seen: &Seen, now: DateTime<Utc>, window: Duration) -> PresenceView {
    let age_ms = (now - seen.at).num_milliseconds().max(0);
    PresenceView {
        serial: serial.to_string(),
        last_seen: seen
            .at
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        age_ms,
        online: age_ms <= window.as_millis() as i64,
        address: seen.address.clone(),
    }
}
