use spool_topics as topics;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::tasks::TaskHandle;
use crate::{util, AppState};

/// Forward job lifecycle events to an optional remote audit store. The
/// forwarder consumes the bus at its own pace; when the sink is slow the
/// subscription lags and events are dropped, dispatch is never blocked.
pub fn start(state: &AppState) -> Option<TaskHandle> {
    let url = std::env::var("SPOOL_AUDIT_URL")
        .ok()
        .filter(|s| !s.is_empty())?;
    let client = reqwest::Client::builder()
        .timeout(util::http_timeout())
        .build()
        .ok()?;
    let mut rx = state.bus().subscribe();
    info!(sink = %url, "audit forwarding enabled");
    Some(TaskHandle::new(
        "audit.forward",
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(env) => {
                        if !env.kind.starts_with(topics::PREFIX_JOB) {
                            continue;
                        }
                        if let Err(err) = client.post(&url).json(&env).send().await {
                            debug!(%err, kind = %env.kind, "audit sink unreachable; event dropped");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "audit sink lagging; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }),
    ))
}
