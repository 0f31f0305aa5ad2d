use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::json;
use spool_topics as topics;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::registry::Binding;
use crate::tasks::TaskHandle;
use crate::{util, AppState};

/// Remote source of `(tenant, serial)` bindings. The periodic task pulls
/// it every five minutes; the intake path may trigger an early pull
/// through a 30-second read-through cache when it meets an unknown
/// tenant. On any fetch error the last successful mapping is retained.
pub struct BindingsSource {
    url: Option<String>,
    client: reqwest::Client,
    cache_ttl: Duration,
    fetched_at: Mutex<Option<Instant>>,
}

impl BindingsSource {
    pub fn from_env() -> Arc<Self> {
        Self::with_url(
            std::env::var("SPOOL_BINDINGS_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        )
    }

    pub fn with_url(url: Option<String>) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(util::http_timeout())
            .build()
            .expect("reqwest client");
        Arc::new(Self {
            url,
            client,
            cache_ttl: Duration::from_secs(util::env_u64("SPOOL_BINDINGS_CACHE_SECS", 30)),
            fetched_at: Mutex::new(None),
        })
    }

    /// Fetch the mapping and swap it into the registry. Returns the number
    /// of bindings applied.
    pub async fn refresh(&self, state: &AppState) -> anyhow::Result<usize> {
        let url = self
            .url
            .as_deref()
            .context("SPOOL_BINDINGS_URL is not configured")?;
        let bindings: Vec<Binding> = self
            .client
            .get(url)
            .send()
            .await
            .context("bindings fetch")?
            .error_for_status()
            .context("bindings fetch status")?
            .json()
            .await
            .context("bindings body")?;
        let applied = state.registry().replace_all(&bindings).await;
        *self.fetched_at.lock().await = Some(Instant::now());
        state.bus().publish(
            topics::TOPIC_BINDINGS_RELOADED,
            &json!({"bindings": applied, "source": url}),
        );
        info!(bindings = applied, "device bindings reloaded");
        Ok(applied)
    }

    /// Read-through refresh for the intake path: at most one fetch per
    /// cache window, errors only logged. Callers re-check the registry
    /// afterwards.
    pub async fn ensure_fresh(&self, state: &AppState) {
        if self.url.is_none() {
            return;
        }
        {
            let guard = self.fetched_at.lock().await;
            if let Some(at) = *guard {
                if at.elapsed() < self.cache_ttl {
                    return;
                }
            }
        }
        if let Err(err) = self.refresh(state).await {
            warn!(%err, "on-demand bindings refresh failed; keeping last mapping");
        }
    }
}

/// Seed the registry before the first remote fetch: an optional JSON file
/// of bindings named by `SPOOL_BINDINGS_FILE`.
pub async fn load_initial(state: &AppState) {
    let Some(path) = std::env::var("SPOOL_BINDINGS_FILE")
        .ok()
        .filter(|s| !s.is_empty())
    else {
        return;
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<Binding>>(&bytes) {
            Ok(bindings) => {
                let applied = state.registry().replace_all(&bindings).await;
                info!(path = %path, bindings = applied, "fallback bindings loaded");
            }
            Err(err) => warn!(path = %path, %err, "fallback bindings unparsable"),
        },
        Err(err) => warn!(path = %path, %err, "fallback bindings unreadable"),
    }
}

/// Periodic refresh task. The first tick fires immediately, covering the
/// startup fetch; fetch errors leave the previous mapping in place.
pub fn start(state: AppState) -> TaskHandle {
    TaskHandle::new(
        "bindings.refresh",
        tokio::spawn(async move {
            let period = Duration::from_secs(
                util::env_u64("SPOOL_BINDINGS_REFRESH_SECS", 300).max(5),
            );
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let source = state.bindings();
                if source.url.is_none() {
                    continue;
                }
                if let Err(err) = source.refresh(&state).await {
                    warn!(%err, "periodic bindings refresh failed; keeping last mapping");
                }
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_without_url_is_an_error_not_a_panic() {
        let state = AppState::builder().build();
        let err = state.bindings().refresh(&state).await.unwrap_err();
        assert!(err.to_string().contains("SPOOL_BINDINGS_URL"));
    }

    #[tokio::test]
    async fn ensure_fresh_without_url_is_a_no_op() {
        let state = AppState::builder().build();
        state.bindings().ensure_fresh(&state).await;
        assert!(state.registry().snapshot().await.is_empty());
    }
}
