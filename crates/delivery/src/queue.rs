//! Delayed delivery queue — a job store with per-job timers feeding a
//! bounded pool of worker tasks. Workers re-validate campaign state,
//! consult the quota tracker, and push messages through the outbound
//! sender, with bounded exponential retry on transport failure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reclaim_core::alerts::{make_alert, AlertSeverity, AlertSink};
use reclaim_core::config::DeliveryConfig;
use reclaim_core::types::OutboundSender;
use reclaim_core::{ReclaimError, ReclaimResult};

use crate::clock::Clock;
use crate::job::{EnqueueJob, Job, JobStatus};
use crate::quota::QuotaTracker;

/// Verdict of the pre-send re-validation.
#[derive(Debug)]
pub enum StageCheck {
    /// Instance still active, stage still current: deliver this body.
    Proceed { to: String, body: String },
    /// An earlier stage of the instance has not resolved yet; retry
    /// shortly without consuming an attempt, keeping message order.
    Deferred,
    /// Instance cancelled/completed or stage superseded since scheduling.
    Stale,
}

/// Campaign-side callbacks invoked by the worker pool.
pub trait DeliveryHooks: Send + Sync {
    /// Re-validate the owning instance and render the message. Runs after
    /// the job is claimed and before any quota is consumed.
    fn before_send(&self, job: &Job) -> ReclaimResult<StageCheck>;

    /// The stage message was accepted by the channel.
    fn stage_delivered(&self, instance_id: Uuid, stage: u32);

    /// The job exhausted its attempts and is permanently Failed.
    fn stage_failed(&self, job: &Job);
}

pub struct DeliveryQueue {
    jobs: DashMap<Uuid, Job>,
    stage_index: DashMap<(String, Uuid, u32), Uuid>,
    timers: parking_lot::Mutex<BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>>,
    timer_added: Notify,
    due_tx: mpsc::Sender<Uuid>,
    due_rx: tokio::sync::Mutex<mpsc::Receiver<Uuid>>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
    alerts: Arc<dyn AlertSink>,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryConfig, clock: Arc<dyn Clock>, alerts: Arc<dyn AlertSink>) -> Arc<Self> {
        let (due_tx, due_rx) = mpsc::channel(64);
        Arc::new(Self {
            jobs: DashMap::new(),
            stage_index: DashMap::new(),
            timers: parking_lot::Mutex::new(BinaryHeap::new()),
            timer_added: Notify::new(),
            due_tx,
            due_rx: tokio::sync::Mutex::new(due_rx),
            clock,
            config,
            alerts,
        })
    }

    /// Persists a Pending job and arms its timer. Idempotent on
    /// `(recipient_id, instance_id, stage)`: an existing Pending, Active,
    /// or Done job for the stage makes this a no-op (a Done stage is never
    /// re-enqueued; Failed and Cancelled stages may be rescheduled).
    pub fn enqueue(&self, request: EnqueueJob) -> Uuid {
        let key = (
            request.recipient_id.clone(),
            request.instance_id,
            request.stage,
        );
        if let Some(existing) = self.stage_index.get(&key) {
            if let Some(job) = self.jobs.get(existing.value()) {
                if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                    debug!(
                        job_id = %job.id,
                        instance = %request.instance_id,
                        stage = request.stage,
                        "duplicate enqueue ignored"
                    );
                    metrics::counter!("delivery.duplicate_enqueues").increment(1);
                    return job.id;
                }
            }
        }

        let now = self.clock.now();
        let job = Job {
            id: Uuid::new_v4(),
            recipient_id: request.recipient_id,
            instance_id: request.instance_id,
            stage: request.stage,
            template_id: request.template_id,
            not_before: request.not_before,
            attempts: 0,
            max_attempts: request.max_attempts,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;
        debug!(
            job_id = %id,
            instance = %job.instance_id,
            stage = job.stage,
            not_before = %job.not_before,
            "job enqueued"
        );
        self.jobs.insert(id, job);
        self.stage_index.insert(key, id);
        self.arm_timer(request.not_before, id);
        metrics::counter!("delivery.enqueued").increment(1);
        id
    }

    /// Transitions a Pending/Active job to Cancelled. Best-effort: a job
    /// mid-send finishes its send, but its stage-advance re-checks the
    /// instance.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Cancelled;
                job.updated_at = self.clock.now();
                info!(job_id = %job_id, "job cancelled");
                metrics::counter!("delivery.cancelled").increment(1);
                return true;
            }
        }
        false
    }

    /// Cancels every non-terminal job matching the predicate; returns the
    /// number cancelled.
    pub fn cancel_by_key<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let mut cancelled = 0;
        let now = self.clock.now();
        for mut entry in self.jobs.iter_mut() {
            if !entry.status.is_terminal() && predicate(entry.value()) {
                entry.status = JobStatus::Cancelled;
                entry.updated_at = now;
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "jobs cancelled by key");
            metrics::counter!("delivery.cancelled").increment(cancelled as u64);
        }
        cancelled
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.get(&job_id).map(|j| j.clone())
    }

    pub fn jobs_for_instance(&self, instance_id: Uuid) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|j| j.instance_id == instance_id)
            .map(|j| j.clone())
            .collect()
    }

    pub fn count_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Spawns the timer dispatcher plus the worker pool. Tasks run until
    /// the handles are dropped/aborted at shutdown.
    pub fn start(
        self: &Arc<Self>,
        hooks: Arc<dyn DeliveryHooks>,
        sender: Arc<dyn OutboundSender>,
        quota: Arc<QuotaTracker>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);
        handles.push(tokio::spawn(self.clone().dispatch_loop()));
        for worker_id in 0..self.config.workers {
            handles.push(tokio::spawn(self.clone().worker_loop(
                worker_id,
                hooks.clone(),
                sender.clone(),
                quota.clone(),
            )));
        }
        info!(workers = self.config.workers, "delivery queue started");
        handles
    }

    fn arm_timer(&self, at: DateTime<Utc>, id: Uuid) {
        self.timers.lock().push(Reverse((at, id)));
        self.timer_added.notify_one();
    }

    /// Sleeps until the earliest `not_before`, then feeds due job ids to
    /// the workers. Per-job timers, no polling.
    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let now = self.clock.now();
            let (due, next_deadline) = {
                let mut timers = self.timers.lock();
                let mut due = Vec::new();
                let mut next = None;
                while let Some(Reverse((at, id))) = timers.peek().copied() {
                    if at <= now {
                        timers.pop();
                        due.push(id);
                    } else {
                        next = Some(at);
                        break;
                    }
                }
                (due, next)
            };

            for id in due {
                if self.due_tx.send(id).await.is_err() {
                    return;
                }
            }

            match next_deadline {
                Some(at) => {
                    let wait = (at - self.clock.now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.timer_added.notified() => {}
                    }
                }
                None => self.timer_added.notified().await,
            }
        }
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        hooks: Arc<dyn DeliveryHooks>,
        sender: Arc<dyn OutboundSender>,
        quota: Arc<QuotaTracker>,
    ) {
        debug!(worker_id, "delivery worker started");
        loop {
            let id = {
                let mut rx = self.due_rx.lock().await;
                match rx.recv().await {
                    Some(id) => id,
                    None => return,
                }
            };
            self.process_job(id, &hooks, &sender, &quota).await;
        }
    }

    /// One delivery attempt. Every failure path is contained here; nothing
    /// propagates out of the worker loop.
    async fn process_job(
        &self,
        id: Uuid,
        hooks: &Arc<dyn DeliveryHooks>,
        sender: &Arc<dyn OutboundSender>,
        quota: &Arc<QuotaTracker>,
    ) {
        // Claim: Pending -> Active, atomically per job.
        let job = {
            let Some(mut entry) = self.jobs.get_mut(&id) else {
                return;
            };
            if entry.status != JobStatus::Pending {
                return;
            }
            if entry.not_before > self.clock.now() {
                // A stale timer entry for a job that was since requeued.
                return;
            }
            entry.status = JobStatus::Active;
            entry.updated_at = self.clock.now();
            entry.clone()
        };

        // Re-validate ownership before consuming quota or an attempt.
        let (to, body) = match hooks.before_send(&job) {
            Ok(StageCheck::Proceed { to, body }) => (to, body),
            Ok(StageCheck::Deferred) => {
                let delay = ChronoDuration::seconds(self.config.not_connected_requeue_secs as i64);
                debug!(job_id = %id, instance = %job.instance_id, stage = job.stage, "stage awaiting predecessor, deferring");
                metrics::counter!("delivery.sequence_deferred").increment(1);
                self.requeue(id, self.clock.now() + delay);
                return;
            }
            Ok(StageCheck::Stale) | Err(ReclaimError::StaleStage { .. }) => {
                debug!(job_id = %id, instance = %job.instance_id, stage = job.stage, "stale stage, cancelling job");
                metrics::counter!("delivery.stale_cancelled").increment(1);
                self.finish(id, JobStatus::Cancelled);
                return;
            }
            Err(e) => {
                self.handle_attempt_failure(id, hooks, &e);
                return;
            }
        };

        if !quota.try_reserve() {
            // Backpressure, not a failure: no attempt consumed.
            let next = quota.next_window_start();
            debug!(job_id = %id, next_window = %next, "quota window full, deferring job");
            metrics::counter!("delivery.quota_deferred").increment(1);
            self.requeue(id, next);
            return;
        }

        match sender.send(&to, &body).await {
            Ok(receipt) => {
                info!(
                    job_id = %id,
                    instance = %job.instance_id,
                    stage = job.stage,
                    message_id = %receipt.message_id,
                    "stage message delivered"
                );
                metrics::counter!("delivery.delivered").increment(1);
                self.finish(id, JobStatus::Done);
                hooks.stage_delivered(job.instance_id, job.stage);
            }
            Err(ReclaimError::NotConnected) => {
                // The reservation never reached the transport; give it back
                // and keep the job effectively Pending until reconnection.
                quota.release();
                let delay = ChronoDuration::seconds(self.config.not_connected_requeue_secs as i64);
                warn!(job_id = %id, "channel not connected, deferring job");
                metrics::counter!("delivery.not_connected_deferred").increment(1);
                self.requeue(id, self.clock.now() + delay);
            }
            Err(e) => {
                self.handle_attempt_failure(id, hooks, &e);
            }
        }
    }

    /// A consumed attempt failed: backoff-requeue while attempts remain,
    /// otherwise mark Failed and alert.
    fn handle_attempt_failure(
        &self,
        id: Uuid,
        hooks: &Arc<dyn DeliveryHooks>,
        error: &ReclaimError,
    ) {
        let now = self.clock.now();
        let (job, retry_at) = {
            let Some(mut entry) = self.jobs.get_mut(&id) else {
                return;
            };
            entry.attempts += 1;
            entry.updated_at = now;
            if entry.attempts < entry.max_attempts {
                let backoff = ChronoDuration::seconds(
                    (self.config.retry_base_secs * (1 << (entry.attempts - 1))) as i64,
                );
                entry.status = JobStatus::Pending;
                entry.not_before = now + backoff;
                (entry.clone(), Some(entry.not_before))
            } else {
                entry.status = JobStatus::Failed;
                (entry.clone(), None)
            }
        };

        match retry_at {
            Some(at) => {
                warn!(
                    job_id = %id,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_at = %at,
                    error = %error,
                    "delivery attempt failed, retrying"
                );
                metrics::counter!("delivery.retries").increment(1);
                self.arm_timer(at, id);
            }
            None => {
                error!(
                    job_id = %id,
                    instance = %job.instance_id,
                    stage = job.stage,
                    attempts = job.attempts,
                    error = %error,
                    "job permanently failed"
                );
                metrics::counter!("delivery.failed").increment(1);
                self.alerts.raise(make_alert(
                    AlertSeverity::Critical,
                    "delivery",
                    format!(
                        "job {id} for recipient {} failed after {} attempts: {error}",
                        job.recipient_id, job.attempts
                    ),
                ));
                hooks.stage_failed(&job);
            }
        }
    }

    fn requeue(&self, id: Uuid, not_before: DateTime<Utc>) {
        let armed = {
            if let Some(mut entry) = self.jobs.get_mut(&id) {
                if entry.status == JobStatus::Active {
                    entry.status = JobStatus::Pending;
                    entry.not_before = not_before;
                    entry.updated_at = self.clock.now();
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };
        if armed {
            self.arm_timer(not_before, id);
        }
    }

    fn finish(&self, id: Uuid, status: JobStatus) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            // A cancellation that raced the send keeps its terminal state.
            if !entry.status.is_terminal() {
                entry.status = status;
                entry.updated_at = self.clock.now();
            }
        }
    }
}
