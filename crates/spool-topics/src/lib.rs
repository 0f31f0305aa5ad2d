//! Canonical event topic constants shared across the spool services.
//!
//! This crate centralizes the string constants used when publishing
//! dispatch lifecycle events so the server, the audit forwarder, and the
//! tests stay in sync. Keep the list alphabetized within sections and
//! favor dot.case names.

// Job lifecycle
pub const TOPIC_JOB_COMPLETED: &str = "job.completed";
pub const TOPIC_JOB_OFFERED: &str = "job.offered";
pub const TOPIC_JOB_RECEIVED: &str = "job.received";
pub const TOPIC_JOB_REJECTED: &str = "job.rejected";
pub const TOPIC_JOB_REQUEUED: &str = "job.requeued";
pub const TOPIC_JOB_SENT: &str = "job.sent";

// Rendering
pub const TOPIC_RENDER_COMPLETED: &str = "job.render.completed";
pub const TOPIC_RENDER_FAILED: &str = "job.render.failed";

// Devices / configuration
pub const TOPIC_BINDINGS_RELOADED: &str = "bindings.reloaded";
pub const TOPIC_PRINTER_SEEN: &str = "printer.seen";

/// Prefix that selects every job lifecycle topic, including render
/// outcomes. The audit forwarder filters on this.
pub const PREFIX_JOB: &str = "job.";

#[cfg(test)]
mod tests {
    #[test]
    fn topics_are_dot_case_and_unique() {
        let all = [
            super::TOPIC_JOB_COMPLETED,
            super::TOPIC_JOB_OFFERED,
            super::TOPIC_JOB_RECEIVED,
            super::TOPIC_JOB_REJECTED,
            super::TOPIC_JOB_REQUEUED,
            super::TOPIC_JOB_SENT,
            super::TOPIC_RENDER_COMPLETED,
            super::TOPIC_RENDER_FAILED,
            super::TOPIC_BINDINGS_RELOADED,
            super::TOPIC_PRINTER_SEEN,
        ];
        let mut seen = std::collections::BTreeSet::new();
        for topic in all {
            assert!(
                topic
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '.'),
                "topic {topic} is not dot.case"
            );
            assert!(seen.insert(topic), "duplicate topic {topic}");
        }
    }

    #[test]
    fn job_prefix_selects_lifecycle_and_render_topics() {
        assert!(super::TOPIC_JOB_OFFERED.starts_with(super::PREFIX_JOB));
        assert!(super::TOPIC_RENDER_FAILED.starts_with(super::PREFIX_JOB));
        assert!(!super::TOPIC_PRINTER_SEEN.starts_with(super::PREFIX_JOB));
    }
}
