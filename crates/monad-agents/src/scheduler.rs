// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Long-lived job scheduler: dequeue pending jobs, run them through the
//! reasoning engine, and apply retry with exponential back-off.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use monad_store::{Job, JobStatus, Store, StoredMessage};

use crate::{agents::AgentRegistry, reasoning::StepOutcome, ReasoningEngine};

/// A job is retried at most this many times before it fails for good.
const MAX_RETRIES: u32 = 3;
/// Back-off base: the k-th retry waits 5·2^k seconds.
const RETRY_BASE_SECS: i64 = 5;

pub struct JobScheduler {
    store: Arc<dyn Store>,
    agents: Arc<AgentRegistry>,
    engine: Arc<ReasoningEngine>,
    poll_interval: Duration,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        agents: Arc<AgentRegistry>,
        engine: Arc<ReasoningEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            agents,
            engine,
            poll_interval,
        }
    }

    /// Service loop: poll the queue until `shutdown` fires.  Runnable jobs
    /// are claimed one at a time and executed concurrently, each on its own
    /// task.
    pub async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        info!(poll_secs = self.poll_interval.as_secs(), "job scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("job scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            // Claim every currently runnable job; each claim flips the job
            // to inProgress before its task starts, so a rescan never picks
            // it up again.
            while let Some(job) = self.claim_next().await {
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    scheduler.execute(job).await;
                });
            }
        }
    }

    /// Claim and execute a single runnable job to completion.  Returns the
    /// job id, or `None` when nothing is runnable.
    pub async fn run_once(&self) -> Option<String> {
        let job = self.claim_next().await?;
        let id = job.id.clone();
        self.execute(job).await;
        Some(id)
    }

    /// Dequeue rule: among pending jobs with `next_run_at ≤ now`, pick the
    /// highest priority, breaking ties by earliest creation.  The
    /// `pending → inProgress` transition persists before execution begins.
    async fn claim_next(&self) -> Option<Job> {
        let jobs = match self.store.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "job queue poll failed");
                return None;
            }
        };
        let now = Utc::now();
        let mut runnable: Vec<Job> = jobs
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending && j.next_run_at <= now)
            .collect();
        runnable.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        let mut job = runnable.into_iter().next()?;

        job.status = JobStatus::InProgress;
        if let Err(e) = self.store.save_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to claim job");
            return None;
        }
        Some(job)
    }

    async fn execute(&self, mut job: Job) {
        info!(job_id = %job.id, agent = %job.agent_id, "job started");

        let outcome = match self.agents.get(&job.agent_id) {
            Some(agent) => {
                // The sender half lives for the whole run; scheduler-driven
                // jobs are cancelled only by process shutdown.
                let (_keep_alive, mut cancel) = oneshot::channel();
                self.engine.run(&job, agent, &mut cancel).await
            }
            None => StepOutcome::Error(format!("unknown agent: {}", job.agent_id)),
        };

        match outcome {
            StepOutcome::Complete(_) => {
                job.status = JobStatus::Completed;
                job.push_log("completed");
                info!(job_id = %job.id, "job completed");
            }
            StepOutcome::NeedInformation(detail) => {
                job.status = JobStatus::Completed;
                job.push_log(format!("needs information: {detail}"));
                info!(job_id = %job.id, "job completed awaiting user information");
            }
            StepOutcome::Error(reason) => {
                self.apply_retry(&mut job, &reason).await;
            }
        }

        if let Err(e) = self.store.save_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist job outcome");
        }
    }

    async fn apply_retry(&self, job: &mut Job, reason: &str) {
        if job.retry_count < MAX_RETRIES {
            job.retry_count += 1;
            job.status = JobStatus::Pending;
            let delay = RETRY_BASE_SECS * (1 << job.retry_count);
            job.next_run_at = Utc::now() + chrono::Duration::seconds(delay);
            job.push_log(format!(
                "retry {} in {delay}s: {reason}",
                job.retry_count
            ));
            warn!(job_id = %job.id, retry = job.retry_count, delay_secs = delay, "job retry scheduled");
        } else {
            job.status = JobStatus::Failed;
            job.push_log(format!("failed: {reason}"));
            let prefix: String = job.id.chars().take(8).collect();
            let notice =
                StoredMessage::system(&job.session_id, format!("Job [{prefix}] Failed: {reason}"));
            if let Err(e) = self.store.append_message(&notice).await {
                warn!(job_id = %job.id, error = %e, "failed to append failure notice");
            }
            warn!(job_id = %job.id, "job failed permanently");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
