use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Ring capacity per serial; the oldest entries fall off.
pub const HISTORY_CAP: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub at: String,
    pub tenant: String,
    pub stage: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

/// Bounded append-only log of externally visible lifecycle events, one
/// ring per serial.
pub struct HistoryLog {
    inner: Mutex<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl HistoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        serial: &str,
        at: DateTime<Utc>,
        tenant: &str,
        stage: &str,
        token: &str,
        customer: Option<String>,
        order: Option<String>,
    ) {
        let entry = HistoryEntry {
            at: at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            tenant: tenant.to_string(),
            stage: stage.to_string(),
            token: token.to_string(),
            customer,
            order,
        };
        let mut guard = self.inner.lock().await;
        let ring = guard.entry(serial.to_string()).or_default();
        if ring.len() == HISTORY_CAP {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Newest first.
    pub async fn snapshot(&self, serial: &str) -> Vec<HistoryEntry> {
        let guard = self.inner.lock().await;
        guard
            .get(serial)
            .map(|ring| ring.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}
