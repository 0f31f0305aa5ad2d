use std::time::Duration;

pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

pub fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true")
    )
}

/// How long an `offered` job may sit before the sweeper rewinds it.
pub fn offer_timeout() -> Duration {
    Duration::from_secs(env_u64("SPOOL_OFFER_TIMEOUT_SECS", 10))
}

/// How long a `sent` job may sit unconfirmed before the sweeper rewinds it.
pub fn sent_timeout() -> Duration {
    Duration::from_secs(env_u64("SPOOL_SENT_TIMEOUT_SECS", 20))
}

pub fn sweep_interval() -> Duration {
    Duration::from_secs(env_u64("SPOOL_SWEEP_INTERVAL_SECS", 3).max(1))
}

/// Three times the expected 5-second poll period, so one missed poll does
/// not flap a printer offline.
pub fn online_window() -> Duration {
    Duration::from_secs(env_u64("SPOOL_ONLINE_WINDOW_SECS", 15))
}

pub fn render_concurrency() -> usize {
    env_u64("SPOOL_RENDER_CONCURRENCY", 2).max(1) as usize
}

/// Timeout applied to every outbound HTTP call (config fetch, audit sink).
pub fn http_timeout() -> Duration {
    Duration::from_secs(env_u64("SPOOL_HTTP_TIMEOUT_SECS", 20).max(1))
}
