use chrono::Utc;
use serde_json::json;
use spool_topics as topics;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::jobs::Job;
use crate::tasks::TaskHandle;
use crate::{util, AppState};

/// Publish and record one rewound job. Shared by the periodic sweeper and
/// the opportunistic sweep on the poll path. The sweep snapshot still
/// names the serial whose offer went stale; the entry lands there and
/// nowhere else.
pub(crate) async fn note_requeued(state: &AppState, job: &Job, stuck_stage: &str) {
    info!(
        token = %job.token,
        tenant = %job.tenant,
        stuck = stuck_stage,
        "job requeued after timeout"
    );
    state.bus().publish(
        topics::TOPIC_JOB_REQUEUED,
        &json!({
            "token": job.token.clone(),
            "tenant": job.tenant.clone(),
            "serial": job.offered_by.clone(),
            "stuck": stuck_stage,
        }),
    );
    if let Some(serial) = job.offered_by.as_deref() {
        state
            .history()
            .record(
                serial,
                Utc::now(),
                &job.tenant,
                "requeued",
                &job.token,
                job.meta.customer_name.clone(),
                job.meta.order_number.clone(),
            )
            .await;
    }
}

/// Periodic liveness guarantee: every stuck `offered`/`sent` job is
/// eventually rewound to `queued` and re-offered until confirmed. Skips a
/// tick instead of queueing behind the selector when the store lock is
/// held.
pub fn start(state: AppState) -> TaskHandle {
    TaskHandle::new(
        "jobs.sweep",
        tokio::spawn(async move {
            let mut ticker = interval(util::sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let rewound = match state.jobs().try_sweep(
                    Utc::now(),
                    util::offer_timeout(),
                    util::sent_timeout(),
                ) {
                    Some(rewound) => rewound,
                    None => {
                        debug!("job store busy; skipping sweep tick");
                        continue;
                    }
                };
                for (job, stuck_stage) in &rewound {
                    note_requeued(&state, job, stuck_stage).await;
                }
            }
        }),
    )
}
