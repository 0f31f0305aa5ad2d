use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Job state machine. Timestamps live inside the variants so an
/// `offered_at` without `Offered` (or the reverse) is unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Offered { at: DateTime<Utc> },
    Sent { at: DateTime<Utc> },
    Done,
    Failed,
}

impl JobStatus {
    pub fn stage(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Offered { .. } => "offered",
            JobStatus::Sent { .. } => "sent",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn offered_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Offered { at } => Some(*at),
            _ => None,
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Sent { at } => Some(*at),
            _ => None,
        }
    }
}

/// Opaque passthrough metadata from the order payload, kept for
/// observability only.
#[derive(Clone, Debug, Default)]
pub struct OrderMeta {
    pub customer_name: Option<String>,
    pub order_number: Option<String>,
    pub order_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Job {
    pub token: String,
    pub tenant: String,
    pub content: Option<Bytes>,
    pub status: JobStatus,
    /// Serial the current offer went to. Set by `select_for_serial`,
    /// cleared on requeue; history attribution for the token-only fetch
    /// and confirm paths hangs off this.
    pub offered_by: Option<String>,
    pub received_at: DateTime<Utc>,
    pub meta: OrderMeta,
}

/// Outcome of a printer fetching a token's content.
pub enum FetchOutcome {
    /// Token is not indexed (completed, administratively removed, or never
    /// existed) or the job already failed rendering.
    NotFound,
    /// Job exists but rendering has not attached content yet; the printer
    /// should keep polling.
    NotReady,
    Ready {
        job: Job,
        content: Bytes,
        /// The printer skipped the offer handshake and fetched a job that
        /// was still queued. Served anyway, but worth logging.
        was_queued: bool,
    },
}

#[derive(Default)]
struct Queues {
    // FIFO token order per tenant. Tokens leave only on `done` or
    // administrative removal; offered/sent jobs stay in place.
    queues: HashMap<String, Vec<String>>,
    jobs: HashMap<String, Job>,
    // Round-robin cursor per serial. Lives under the same lock as the
    // queues so selection's read-scan-commit is one critical section.
    cursors: HashMap<String, usize>,
}

/// Per-tenant job queues, the global token index, and the round-robin
/// cursors. One lock guards the whole store; every critical section is a
/// short scan over small queues and nothing awaits while holding it.
pub struct JobStore {
    inner: Mutex<Queues>,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Queues::default()),
        })
    }

    /// Append a queued, content-less job and return its token.
    pub async fn create(&self, tenant: &str, meta: OrderMeta, now: DateTime<Utc>) -> String {
        let token = mint_token(now);
        let job = Job {
            token: token.clone(),
            tenant: tenant.to_string(),
            content: None,
            status: JobStatus::Queued,
            offered_by: None,
            received_at: now,
            meta,
        };
        let mut guard = self.inner.lock().await;
        guard
            .queues
            .entry(tenant.to_string())
            .or_default()
            .push(token.clone());
        guard.jobs.insert(token.clone(), job);
        token
    }

    /// Attach rendered content. Idempotent: a second attachment (or an
    /// attachment to a vanished token) is silently dropped — content is
    /// immutable once set.
    pub async fn attach_content(&self, token: &str, content: Bytes) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.jobs.get_mut(token) {
            Some(job) if job.content.is_none() => {
                job.content = Some(content);
                true
            }
            _ => false,
        }
    }

    /// Transition to `failed`, but only from queued-and-content-less; a
    /// render error that loses the race against an attachment is ignored.
    pub async fn mark_render_failed(&self, token: &str) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.jobs.get_mut(token) {
            Some(job) if job.status == JobStatus::Queued && job.content.is_none() => {
                job.status = JobStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// The central scheduling operation. Reads the serial's round-robin
    /// cursor, scans its tenants from there, and commits the advanced
    /// cursor, all inside the one store lock so concurrent polls for the
    /// same serial serialize cleanly and no advance is ever lost. The
    /// first content-ready queued job (FIFO within its tenant) is
    /// transitioned to `offered` and stamped with the offering serial.
    /// Nothing moves on a miss, the cursor included.
    pub async fn select_for_serial(
        &self,
        serial: &str,
        tenants: &[String],
        now: DateTime<Utc>,
    ) -> Option<Job> {
        if tenants.is_empty() {
            return None;
        }
        let n = tenants.len();
        let mut guard = self.inner.lock().await;
        // A registry swap may have shrunk the tenant list since this
        // cursor was written; normalize rather than reset.
        let start = guard.cursors.get(serial).copied().unwrap_or(0) % n;
        for i in 0..n {
            let tenant = &tenants[(start + i) % n];
            let Some(queue) = guard.queues.get(tenant) else {
                continue;
            };
            let candidate = queue
                .iter()
                .find(|token| {
                    guard
                        .jobs
                        .get(token.as_str())
                        .map(|j| j.status == JobStatus::Queued && j.content.is_some())
                        .unwrap_or(false)
                })
                .cloned();
            if let Some(token) = candidate {
                if let Some(job) = guard.jobs.get_mut(&token) {
                    job.status = JobStatus::Offered { at: now };
                    job.offered_by = Some(serial.to_string());
                    let offered = job.clone();
                    guard.cursors.insert(serial.to_string(), (start + i + 1) % n);
                    return Some(offered);
                }
            }
        }
        None
    }

    /// Transition for a fetch: `offered -> sent` (or the tolerated
    /// `queued -> sent` when content is already attached).
    pub async fn begin_send(&self, token: &str, now: DateTime<Utc>) -> FetchOutcome {
        let mut guard = self.inner.lock().await;
        let Some(job) = guard.jobs.get_mut(token) else {
            return FetchOutcome::NotFound;
        };
        let Some(content) = job.content.clone() else {
            return match job.status {
                JobStatus::Failed => FetchOutcome::NotFound,
                _ => FetchOutcome::NotReady,
            };
        };
        let was_queued = job.status == JobStatus::Queued;
        job.status = JobStatus::Sent { at: now };
        FetchOutcome::Ready {
            job: job.clone(),
            content,
            was_queued,
        }
    }

    /// Positive confirmation: the job leaves its queue for good. The
    /// returned copy carries the terminal `done` state.
    pub async fn confirm(&self, token: &str) -> Option<Job> {
        let mut guard = self.inner.lock().await;
        let mut job = guard.jobs.remove(token)?;
        if let Some(queue) = guard.queues.get_mut(&job.tenant) {
            queue.retain(|t| t != token);
        }
        job.status = JobStatus::Done;
        Some(job)
    }

    /// Negative confirmation: back to `queued` with both timestamps
    /// cleared. Content is kept, so the job is immediately re-offerable.
    /// The returned snapshot still names the serial the offer went to;
    /// the stored job forgets it until the next offer.
    pub async fn reject(&self, token: &str) -> Option<Job> {
        let mut guard = self.inner.lock().await;
        let job = guard.jobs.get_mut(token)?;
        job.status = JobStatus::Queued;
        let snapshot = job.clone();
        job.offered_by = None;
        Some(snapshot)
    }

    pub async fn peek(&self, token: &str) -> Option<Job> {
        let guard = self.inner.lock().await;
        guard.jobs.get(token).cloned()
    }

    /// Administrative removal, regardless of state.
    pub async fn remove(&self, token: &str) -> Option<Job> {
        self.confirm(token).await
    }

    /// Rewind jobs stuck mid-transaction: `offered` older than
    /// `offer_timeout` and `sent` older than `sent_timeout` go back to
    /// `queued`. Returns the rewound jobs with the stage they were stuck
    /// in.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        offer_timeout: Duration,
        sent_timeout: Duration,
    ) -> Vec<(Job, &'static str)> {
        let mut guard = self.inner.lock().await;
        Self::sweep_locked(&mut guard, None, now, offer_timeout, sent_timeout)
    }

    /// Sweep restricted to the given tenants; used by the poll path to
    /// recover a serial's own queues opportunistically.
    pub async fn sweep_tenants(
        &self,
        tenants: &[String],
        now: DateTime<Utc>,
        offer_timeout: Duration,
        sent_timeout: Duration,
    ) -> Vec<(Job, &'static str)> {
        let mut guard = self.inner.lock().await;
        Self::sweep_locked(&mut guard, Some(tenants), now, offer_timeout, sent_timeout)
    }

    /// Non-blocking sweep for the periodic task: if the store lock is
    /// contended this tick is skipped rather than queued behind the
    /// selector.
    pub fn try_sweep(
        &self,
        now: DateTime<Utc>,
        offer_timeout: Duration,
        sent_timeout: Duration,
    ) -> Option<Vec<(Job, &'static str)>> {
        let mut guard = self.inner.try_lock().ok()?;
        Some(Self::sweep_locked(
            &mut guard,
            None,
            now,
            offer_timeout,
            sent_timeout,
        ))
    }

    fn sweep_locked(
        guard: &mut Queues,
        tenants: Option<&[String]>,
        now: DateTime<Utc>,
        offer_timeout: Duration,
        sent_timeout: Duration,
    ) -> Vec<(Job, &'static str)> {
        let offer_timeout =
            chrono::Duration::from_std(offer_timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let sent_timeout =
            chrono::Duration::from_std(sent_timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let mut rewound = Vec::new();
        for job in guard.jobs.values_mut() {
            if let Some(list) = tenants {
                if !list.iter().any(|t| t == &job.tenant) {
                    continue;
                }
            }
            let stuck_stage = match job.status {
                JobStatus::Offered { at } if now - at > offer_timeout => "offered",
                JobStatus::Sent { at } if now - at > sent_timeout => "sent",
                _ => continue,
            };
            job.status = JobStatus::Queued;
            let snapshot = job.clone();
            job.offered_by = None;
            rewound.push((snapshot, stuck_stage));
        }
        rewound
    }

    /// FIFO view of one tenant's queue.
    pub async fn queue_snapshot(&self, tenant: &str) -> Vec<Job> {
        let guard = self.inner.lock().await;
        guard
            .queues
            .get(tenant)
            .map(|queue| {
                queue
                    .iter()
                    .filter_map(|token| guard.jobs.get(token).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn job_count(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }
}

fn mint_token(now: DateTime<Utc>) -> String {
    // Monotonic-ish time component plus a random suffix; collision
    // resistant for the lifetime of the process.
    format!(
        "{}-{}",
        now.timestamp_millis(),
        Uuid::new_v4().simple()
    )
}
