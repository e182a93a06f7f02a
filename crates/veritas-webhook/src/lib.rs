// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The webhook dispatcher: at-least-once delivery of event payloads to
//! configured URLs, backed by a durable "queue file" that is rewritten in
//! full on every drain cycle.
//!
//! The durable-write pattern — serialize with `serde_json`, write via
//! `tokio::fs`, then atomically replace the destination with a rename — so
//! a crash mid-write never corrupts the queue. Backoff-with-jitter is
//! exponential with clock-derived jitter (no `rand` dependency), following
//! the `backoff(n) = min(base * 2^(n-1), max) ± 20%` formula this delivery
//! loop requires.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use veritas_audit::AuditPipeline;
use veritas_config::WebhookConfig;
use veritas_core::{AuditEvent, DeadLetterEntry, Severity, WebhookItem};
use veritas_error::{ErrorCode, VeritasError};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct QueueFile {
    next_sequence: u64,
    items: Vec<WebhookItem>,
}

/// Durable, at-least-once webhook delivery.
pub struct Dispatcher {
    queue: Mutex<QueueFile>,
    queue_file_path: PathBuf,
    dead_letter_file_path: PathBuf,
    urls: Vec<String>,
    base_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
    client: reqwest::Client,
    delivery_timeout: Duration,
    audit: Arc<AuditPipeline>,
}

impl Dispatcher {
    /// Build a dispatcher from `config`, loading any durable queue snapshot
    /// already on disk (starting empty if none exists).
    pub async fn new(config: &WebhookConfig, audit: Arc<AuditPipeline>) -> Result<Self, VeritasError> {
        let queue_file_path = PathBuf::from(&config.queue_file_path);
        let queue = load_queue(&queue_file_path).await?;

        Ok(Self {
            queue: Mutex::new(queue),
            queue_file_path,
            dead_letter_file_path: PathBuf::from(&config.dead_letter_file_path),
            urls: config.urls.clone(),
            base_backoff: Duration::from_secs(config.base_backoff_seconds),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
            max_attempts: config.max_attempts,
            client: reqwest::Client::new(),
            delivery_timeout: Duration::from_secs(config.delivery_timeout_seconds),
            audit,
        })
    }

    /// Enqueue `payload` for delivery to every configured destination URL,
    /// each as its own durable [`WebhookItem`] with a fresh monotonically
    /// increasing sequence number.
    pub async fn enqueue_event(&self, payload: &serde_json::Value) -> Result<(), VeritasError> {
        let payload_bytes = serde_json::to_vec(payload).map_err(|e| {
            VeritasError::new(ErrorCode::Internal, "failed to serialize webhook payload").with_source(e)
        })?;
        let now = Utc::now();

        {
            let mut queue = self.queue.lock().await;
            for url in &self.urls {
                let sequence = queue.next_sequence;
                queue.next_sequence += 1;
                queue.items.push(WebhookItem {
                    sequence,
                    url: url.clone(),
                    payload_bytes: payload_bytes.clone(),
                    attempts: 0,
                    next_attempt_at: now,
                    first_failed_at: None,
                    last_error: None,
                });
            }
        }

        self.persist_queue().await
    }

    /// Number of items currently queued for delivery or retry.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.items.len()
    }

    /// Run one drain cycle: attempt delivery of every item whose
    /// `next_attempt_at` has elapsed, then atomically persist the updated
    /// queue snapshot. Best-effort FIFO within this cycle; ordering across
    /// retries is not guaranteed.
    pub async fn drain(&self) {
        let now = Utc::now();
        let due: Vec<WebhookItem> = {
            let queue = self.queue.lock().await;
            queue.items.iter().filter(|i| now >= i.next_attempt_at).cloned().collect()
        };

        for item in due {
            let outcome = self.attempt_delivery(&item).await;
            self.apply_outcome(item, outcome).await;
        }

        if let Err(err) = self.persist_queue().await {
            tracing::warn!(error = %err, "failed to persist webhook queue after drain cycle");
        }
    }

    async fn attempt_delivery(&self, item: &WebhookItem) -> Result<(), String> {
        let body: serde_json::Value = serde_json::from_slice(&item.payload_bytes).unwrap_or(serde_json::Value::Null);
        let response = self
            .client
            .post(&item.url)
            .json(&body)
            .timeout(self.delivery_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("destination returned status {}", response.status()))
        }
    }

    async fn apply_outcome(&self, mut item: WebhookItem, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => {
                self.remove_item(item.sequence).await;
                self.audit
                    .emit(
                        AuditEvent::new("webhook.delivered", Severity::Info).with_payload(serde_json::json!({
                            "sequence": item.sequence,
                            "url": item.url,
                        })),
                    )
                    .await;
            }
            Err(error) => {
                item.attempts += 1;
                if item.first_failed_at.is_none() {
                    item.first_failed_at = Some(Utc::now());
                }
                item.last_error = Some(error.clone());

                if item.attempts >= self.max_attempts {
                    self.remove_item(item.sequence).await;
                    if let Err(e) = self.append_dead_letter(&item, &error).await {
                        tracing::warn!(error = %e, "failed to append dead-letter entry");
                    }
                    self.audit
                        .emit(
                            AuditEvent::new("webhook.dead_lettered", Severity::Error).with_payload(
                                serde_json::json!({
                                    "sequence": item.sequence,
                                    "url": item.url,
                                    "attempts": item.attempts,
                                    "last_error": error,
                                }),
                            ),
                        )
                        .await;
                } else {
                    item.next_attempt_at = Utc::now()
                        + chrono::Duration::from_std(compute_backoff(
                            self.base_backoff,
                            self.max_backoff,
                            item.attempts,
                        ))
                        .unwrap_or(chrono::Duration::zero());
                    self.replace_item(item).await;
                }
            }
        }
    }

    async fn remove_item(&self, sequence: u64) {
        let mut queue = self.queue.lock().await;
        queue.items.retain(|i| i.sequence != sequence);
    }

    async fn replace_item(&self, updated: WebhookItem) {
        let mut queue = self.queue.lock().await;
        if let Some(slot) = queue.items.iter_mut().find(|i| i.sequence == updated.sequence) {
            *slot = updated;
        }
    }

    async fn append_dead_letter(&self, item: &WebhookItem, final_error: &str) -> Result<(), VeritasError> {
        let digest = hex_sha256(&item.payload_bytes);
        let now = Utc::now();
        let entry = DeadLetterEntry {
            url: item.url.clone(),
            payload_digest: digest,
            final_error: final_error.to_string(),
            total_attempts: item.attempts,
            first_attempted_at: item.first_failed_at.unwrap_or(now),
            dead_lettered_at: now,
        };
        append_dead_letter_line(&self.dead_letter_file_path, &entry).await
    }

    async fn persist_queue(&self) -> Result<(), VeritasError> {
        let snapshot = self.queue.lock().await.clone();
        save_queue(&self.queue_file_path, &snapshot).await
    }
}

/// `backoff(n) = min(base * 2^(n-1), max)`, jittered by up to ±20% using a
/// clock-derived pseudo-random source (no `rand` dependency).
fn compute_backoff(base: Duration, max: Duration, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1);
    let nominal_ms = (base.as_millis() as u64)
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(max.as_millis() as u64);

    let jitter_range = (nominal_ms as f64 * 0.2) as u64;
    if jitter_range == 0 {
        return Duration::from_millis(nominal_ms);
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let pseudo = nanos.wrapping_mul(attempts as u64 + 1);
    let jitter = pseudo % (2 * jitter_range + 1);
    let signed_jitter = jitter as i64 - jitter_range as i64;
    Duration::from_millis((nominal_ms as i64 + signed_jitter).max(0) as u64)
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

async fn load_queue(path: &Path) -> Result<QueueFile, VeritasError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to parse webhook queue file").with_source(e)
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueFile::default()),
        Err(e) => Err(
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to read webhook queue file").with_source(e),
        ),
    }
}

async fn save_queue(path: &Path, queue: &QueueFile) -> Result<(), VeritasError> {
    let bytes = serde_json::to_vec_pretty(queue).map_err(|e| {
        VeritasError::new(ErrorCode::Internal, "failed to serialize webhook queue").with_source(e)
    })?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| {
        VeritasError::new(ErrorCode::PersistenceFailed, "failed to write webhook queue temp file").with_source(e)
    })?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        VeritasError::new(ErrorCode::PersistenceFailed, "failed to rename webhook queue file into place")
            .with_source(e)
    })?;
    Ok(())
}

async fn append_dead_letter_line(path: &Path, entry: &DeadLetterEntry) -> Result<(), VeritasError> {
    use tokio::io::AsyncWriteExt;

    let mut line = serde_json::to_vec(entry).map_err(|e| {
        VeritasError::new(ErrorCode::Internal, "failed to serialize dead-letter entry").with_source(e)
    })?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to open dead-letter file").with_source(e)
        })?;
    file.write_all(&line).await.map_err(|e| {
        VeritasError::new(ErrorCode::PersistenceFailed, "failed to append dead-letter entry").with_source(e)
    })?;
    Ok(())
}

/// A running webhook drain loop, spawned once at startup, separate from
/// the scheduler's tick loop.
pub struct DispatcherHandle {
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Spawn a background task that calls [`Dispatcher::drain`] every
    /// `drain_interval`, forever, until the handle is dropped or aborted.
    #[must_use]
    pub fn spawn(dispatcher: Arc<Dispatcher>, drain_interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(drain_interval);
            loop {
                interval.tick().await;
                dispatcher.drain().await;
            }
        });
        Self { task }
    }

    /// Stop the drain loop. A cycle already in flight runs to completion —
    /// aborting only prevents the next cycle from starting.
    pub fn shutdown(self) {
        self.task.abort();
    }
}
