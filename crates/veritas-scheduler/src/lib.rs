// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The tick-driven job scheduler: dispatches recurring intelligence-
//! collection jobs against a monthly request budget.
//!
//! [`Scheduler::tick`] never blocks on job execution — it only decides
//! which jobs are eligible, reserves their estimated budget, and hands
//! them to a bounded worker pool (a [`tokio::sync::Semaphore`]-guarded set
//! of `tokio::spawn` tasks) keyed by job handle in a per-handle state table.
//! The actual collection → report → store → enqueue work is supplied by an
//! injected [`JobRunner`] so this crate never needs a dependency on
//! `veritas-store`, `veritas-consensus`, or `veritas-webhook` — only
//! `veritas-daemon`'s `Core` wires those together, breaking the cycle by
//! passing a handle one-way instead of depending on every downstream crate
//! directly.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use veritas_audit::AuditPipeline;
use veritas_config::SchedulerConfig;
use veritas_core::{AuditEvent, ScheduledJob, SchedulerUsage, Severity};
use veritas_error::{ErrorCode, VeritasError};

/// Runs one scheduled job to completion: collection, report generation,
/// persistence, and webhook enqueue are all the runner's responsibility.
///
/// Implemented by `veritas-daemon`'s `Core`, which alone holds handles to
/// the store, consensus engine, and webhook dispatcher this requires.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute one run of `job`, returning an opaque summary on success
    /// (folded into the `scheduler.run` audit event's payload).
    async fn run_job(&self, job: &ScheduledJob) -> Result<serde_json::Value, VeritasError>;
}

/// Per-job state tracked across ticks.
#[derive(Debug, Clone, Default)]
struct JobState {
    last_completed_at: Option<DateTime<Utc>>,
    in_flight: bool,
    consecutive_failures: u32,
    next_eligible_at: Option<DateTime<Utc>>,
}

/// Maximum backoff applied between retries of a failing job, in seconds.
const MAX_RETRY_BACKOFF_SECONDS: u64 = 3600;

/// The scheduler's job registry, usage ledger, and dispatch logic.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, (ScheduledJob, JobState)>>,
    usage: Mutex<SchedulerUsage>,
    usage_file_path: PathBuf,
    monthly_cap: u64,
    kill_switch_on_cap: bool,
    page_cap: u32,
    permits: Arc<Semaphore>,
    audit: Arc<AuditPipeline>,
    runner: Arc<dyn JobRunner>,
}

impl Scheduler {
    /// Build a scheduler from `config`, loading persisted usage from
    /// `usage_file_path` if present (starting fresh otherwise), and
    /// registering `jobs` as the initial job set.
    pub async fn new(
        config: &SchedulerConfig,
        usage_file_path: impl Into<PathBuf>,
        jobs: Vec<ScheduledJob>,
        audit: Arc<AuditPipeline>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self, VeritasError> {
        let usage_file_path = usage_file_path.into();
        let usage = load_usage(&usage_file_path, &month_key(Utc::now())).await?;

        let mut registry = HashMap::new();
        for job in jobs {
            registry.insert(job.handle.clone(), (job, JobState::default()));
        }

        Ok(Self {
            jobs: Mutex::new(registry),
            usage: Mutex::new(usage),
            usage_file_path,
            monthly_cap: config.monthly_request_cap,
            kill_switch_on_cap: config.kill_switch_on_cap,
            page_cap: config.page_cap,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            audit,
            runner,
        })
    }

    /// Register (or replace) a job in the registry.
    pub async fn register(&self, job: ScheduledJob) {
        self.jobs
            .lock()
            .await
            .entry(job.handle.clone())
            .and_modify(|(existing, _)| *existing = job.clone())
            .or_insert((job, JobState::default()));
    }

    /// Remove a job from the registry. An in-flight run for `handle`, if
    /// any, is unaffected — it completes and persists its result normally;
    /// it simply has no registry entry left to update on completion.
    pub async fn deregister(&self, handle: &str) {
        self.jobs.lock().await.remove(handle);
    }

    /// Current usage snapshot, for diagnostics and the `/health` endpoint.
    pub async fn usage_snapshot(&self) -> SchedulerUsage {
        self.usage.lock().await.clone()
    }

    /// Run one scheduler tick: roll over month-scoped usage if needed,
    /// honor the kill-switch, and dispatch every eligible job onto the
    /// worker pool. Returns without waiting for dispatched jobs to finish.
    pub async fn tick(&self) {
        let now = Utc::now();
        self.roll_over_month_if_needed(now).await;

        let capped = {
            let usage = self.usage.lock().await;
            self.kill_switch_on_cap && usage.is_capped(self.monthly_cap)
        };
        if capped {
            self.audit
                .emit(
                    AuditEvent::new("scheduler.capped", Severity::Warning)
                        .with_payload(serde_json::json!({ "monthly_cap": self.monthly_cap })),
                )
                .await;
            return;
        }

        let eligible: Vec<ScheduledJob> = {
            let mut jobs = self.jobs.lock().await;
            let mut ready = Vec::new();
            for (job, state) in jobs.values_mut() {
                if state.in_flight {
                    continue;
                }
                if let Some(next_eligible) = state.next_eligible_at {
                    if now < next_eligible {
                        continue;
                    }
                }
                let due = state
                    .last_completed_at
                    .map(|last| now >= last + chrono::Duration::seconds(job.interval_seconds as i64))
                    .unwrap_or(true);
                if !due {
                    continue;
                }

                let estimate = job.requests_estimate(self.page_cap);
                let would_exceed = {
                    let usage = self.usage.lock().await;
                    usage.would_exceed(estimate, self.monthly_cap)
                };
                if would_exceed {
                    self.audit
                        .emit(
                            AuditEvent::new("scheduler.budget_skip", Severity::Info)
                                .with_payload(serde_json::json!({
                                    "handle": job.handle,
                                    "estimate": estimate,
                                })),
                        )
                        .await;
                    continue;
                }

                state.in_flight = true;
                {
                    let mut usage = self.usage.lock().await;
                    usage.requests_used += estimate;
                }
                ready.push(job.clone());
            }
            ready
        };

        if !eligible.is_empty() {
            if let Err(err) = self.persist_usage().await {
                tracing::warn!(error = %err, "failed to persist scheduler usage after reservation");
            }
        }

        for job in eligible {
            self.dispatch(job).await;
        }
    }

    async fn roll_over_month_if_needed(&self, now: DateTime<Utc>) {
        let current = month_key(now);
        let changed = {
            let mut usage = self.usage.lock().await;
            if usage.month_key != current {
                usage.roll_over(current);
                true
            } else {
                false
            }
        };
        if changed {
            if let Err(err) = self.persist_usage().await {
                tracing::warn!(error = %err, "failed to persist scheduler usage after month rollover");
            }
        }
    }

    async fn dispatch(&self, job: ScheduledJob) {
        let permit = Arc::clone(&self.permits);
        let audit = Arc::clone(&self.audit);
        let runner = Arc::clone(&self.runner);
        let jobs = self.jobs_handle();
        let handle = job.handle.clone();

        tokio::spawn(async move {
            let _permit = permit.acquire_owned().await;
            let outcome = runner.run_job(&job).await;
            let now = Utc::now();

            match outcome {
                Ok(summary) => {
                    audit
                        .emit(
                            AuditEvent::new("scheduler.run", Severity::Info).with_payload(
                                serde_json::json!({ "handle": handle, "status": "ok", "result": summary }),
                            ),
                        )
                        .await;
                    let mut jobs = jobs.lock().await;
                    if let Some((_, state)) = jobs.get_mut(&handle) {
                        state.in_flight = false;
                        state.last_completed_at = Some(now);
                        state.consecutive_failures = 0;
                        state.next_eligible_at = None;
                    }
                }
                Err(err) => {
                    audit
                        .emit(
                            AuditEvent::new("scheduler.run", Severity::Error).with_payload(
                                serde_json::json!({ "handle": handle, "status": "failed", "error": err.to_string() }),
                            ),
                        )
                        .await;
                    let mut jobs = jobs.lock().await;
                    if let Some((_, state)) = jobs.get_mut(&handle) {
                        state.in_flight = false;
                        state.consecutive_failures += 1;
                        let backoff = 2u64
                            .saturating_pow(state.consecutive_failures)
                            .min(MAX_RETRY_BACKOFF_SECONDS);
                        state.next_eligible_at = Some(now + chrono::Duration::seconds(backoff as i64));
                    }
                }
            }
        });
    }

    fn jobs_handle(&self) -> &Mutex<HashMap<String, (ScheduledJob, JobState)>> {
        &self.jobs
    }

    async fn persist_usage(&self) -> Result<(), VeritasError> {
        let usage = self.usage.lock().await.clone();
        save_usage(&self.usage_file_path, &usage).await
    }
}

fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

async fn load_usage(path: &Path, current_month: &str) -> Result<SchedulerUsage, VeritasError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice::<SchedulerUsage>(&bytes).map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to parse scheduler usage file")
                .with_source(e)
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(SchedulerUsage::new(current_month.to_string()))
        }
        Err(e) => Err(VeritasError::new(
            ErrorCode::PersistenceFailed,
            "failed to read scheduler usage file",
        )
        .with_source(e)),
    }
}

/// Write `usage` to `path` atomically: serialize to a sibling temp file,
/// then rename over the destination so a crash mid-write never leaves a
/// truncated or partially-written usage file behind.
async fn save_usage(path: &Path, usage: &SchedulerUsage) -> Result<(), VeritasError> {
    let bytes = serde_json::to_vec_pretty(usage).map_err(|e| {
        VeritasError::new(ErrorCode::Internal, "failed to serialize scheduler usage").with_source(e)
    })?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| {
        VeritasError::new(ErrorCode::PersistenceFailed, "failed to write scheduler usage temp file")
            .with_source(e)
    })?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        VeritasError::new(ErrorCode::PersistenceFailed, "failed to rename scheduler usage file into place")
            .with_source(e)
    })?;
    Ok(())
}

/// A running scheduler tick loop, spawned once at startup.
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Spawn a background task that calls [`Scheduler::tick`] every
    /// `tick_interval`, forever, until the handle is dropped or aborted.
    #[must_use]
    pub fn spawn(scheduler: Arc<Scheduler>, tick_interval: std::time::Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                scheduler.tick().await;
            }
        });
        Self { task }
    }

    /// A handle whose tick loop never runs, for when the scheduler is
    /// configured disabled. `shutdown()` on the result is a harmless no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            task: tokio::spawn(std::future::ready(())),
        }
    }

    /// Stop the tick loop. The current tick (if any) is not interrupted
    /// mid-flight jobs it already dispatched — those worker tasks run
    /// independently and are unaffected by this call.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use veritas_store::Store;

    async fn test_audit() -> Arc<AuditPipeline> {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        Arc::new(AuditPipeline::new(store, 100))
    }

    fn job(handle: &str, interval_seconds: u64) -> ScheduledJob {
        ScheduledJob {
            handle: handle.to_string(),
            interval_seconds,
            window_days: 1,
            max_posts: 10,
            query: None,
        }
    }

    struct CountingRunner {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run_job(&self, _job: &ScheduledJob) -> Result<serde_json::Value, VeritasError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(VeritasError::new(ErrorCode::Internal, "simulated failure"))
            } else {
                Ok(serde_json::json!({ "collected": 1 }))
            }
        }
    }

    #[tokio::test]
    async fn tick_dispatches_a_due_job_and_marks_it_completed() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: Arc::clone(&calls), fail: false });
        let config = SchedulerConfig {
            enabled: true,
            monthly_request_cap: 1000,
            ..Default::default()
        };
        let scheduler = Scheduler::new(
            &config,
            dir.path().join("usage.json"),
            vec![job("acct-1", 60)],
            test_audit().await,
            runner,
        )
        .await
        .unwrap();

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let jobs = scheduler.jobs.lock().await;
        let (_, state) = jobs.get("acct-1").unwrap();
        assert!(!state.in_flight);
        assert!(state.last_completed_at.is_some());
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn job_not_yet_due_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: Arc::clone(&calls), fail: false });
        let config = SchedulerConfig { enabled: true, monthly_request_cap: 1000, ..Default::default() };
        let scheduler = Scheduler::new(
            &config,
            dir.path().join("usage.json"),
            vec![job("acct-1", 3600)],
            test_audit().await,
            runner,
        )
        .await
        .unwrap();

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_run_increments_failure_counter_and_backs_off() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: Arc::clone(&calls), fail: true });
        let config = SchedulerConfig { enabled: true, monthly_request_cap: 1000, ..Default::default() };
        let scheduler = Scheduler::new(
            &config,
            dir.path().join("usage.json"),
            vec![job("acct-1", 1)],
            test_audit().await,
            runner,
        )
        .await
        .unwrap();

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let jobs = scheduler.jobs.lock().await;
        let (_, state) = jobs.get("acct-1").unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert!(state.next_eligible_at.is_some());
        assert!(!state.in_flight);
    }

    #[tokio::test]
    async fn budget_exceeding_job_is_skipped_without_reserving_usage() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: Arc::clone(&calls), fail: false });
        let config = SchedulerConfig { enabled: true, monthly_request_cap: 1, page_cap: 1, ..Default::default() };
        let scheduler = Scheduler::new(
            &config,
            dir.path().join("usage.json"),
            vec![job("huge", 60)],
            test_audit().await,
            runner,
        )
        .await
        .unwrap();

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.usage_snapshot().await.requests_used, 0);
    }

    #[tokio::test]
    async fn kill_switch_capped_usage_skips_every_job() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: Arc::clone(&calls), fail: false });
        let usage_path = dir.path().join("usage.json");
        let mut usage = SchedulerUsage::new(month_key(Utc::now()));
        usage.requests_used = 1000;
        usage.kill_switch_armed = true;
        save_usage(&usage_path, &usage).await.unwrap();

        let config = SchedulerConfig { enabled: true, monthly_request_cap: 100, ..Default::default() };
        let scheduler = Scheduler::new(
            &config,
            &usage_path,
            vec![job("acct-1", 1)],
            test_audit().await,
            runner,
        )
        .await
        .unwrap();

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn usage_persists_and_reloads_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let mut usage = SchedulerUsage::new("2026-01".to_string());
        usage.requests_used = 42;
        save_usage(&path, &usage).await.unwrap();

        let reloaded = load_usage(&path, "2026-01").await.unwrap();
        assert_eq!(reloaded.requests_used, 42);
        assert_eq!(reloaded.month_key, "2026-01");
    }

    #[tokio::test]
    async fn deregistered_job_is_no_longer_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: Arc::clone(&calls), fail: false });
        let config = SchedulerConfig { enabled: true, monthly_request_cap: 1000, ..Default::default() };
        let scheduler = Scheduler::new(
            &config,
            dir.path().join("usage.json"),
            vec![job("acct-1", 1)],
            test_audit().await,
            runner,
        )
        .await
        .unwrap();

        scheduler.deregister("acct-1").await;
        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
