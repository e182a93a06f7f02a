// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The audit event pipeline: every component's notable actions flow through
//! [`AuditPipeline::emit`], landing in a bounded in-memory ring buffer for
//! fast [`AuditPipeline::tail`] reads and durably in `veritas-store` for
//! historical [`AuditPipeline::query`].
//!
//! Durable writes never block or fail the emitting component: a write
//! failure is logged and swallowed, matching the contract that audit
//! logging is best-effort with respect to the primary request path.

use std::collections::VecDeque;
use tokio::sync::RwLock;
use veritas_core::AuditEvent;
use veritas_error::VeritasError;
use veritas_store::Store;

/// The audit pipeline: a bounded ring buffer in front of durable storage.
pub struct AuditPipeline {
    ring: RwLock<VecDeque<AuditEvent>>,
    capacity: usize,
    store: Store,
}

impl AuditPipeline {
    /// Construct a pipeline backed by `store`, retaining at most `capacity`
    /// events in the in-memory ring buffer.
    #[must_use]
    pub fn new(store: Store, capacity: usize) -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            store,
        }
    }

    /// Record `event`: push it into the ring buffer (evicting the oldest
    /// entry if full) and durably persist it.
    ///
    /// Persistence failures are logged at `warn` and otherwise ignored —
    /// callers on the hot path should not `.await` this directly if they
    /// need true fire-and-forget semantics; wrap the call in
    /// `tokio::spawn` to decouple it from request latency.
    pub async fn emit(&self, event: AuditEvent) {
        {
            let mut ring = self.ring.write().await;
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        if let Err(err) = self.store.record_audit_event(&event).await {
            tracing::warn!(
                event_type = %event.event_type,
                error = %err,
                "failed to durably persist audit event"
            );
        }
    }

    /// Return the most recent `n` events from the in-memory ring buffer,
    /// oldest first.
    pub async fn tail(&self, n: usize) -> Vec<AuditEvent> {
        let ring = self.ring.read().await;
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Query durable storage for up to `limit` events, optionally filtered
    /// to one `event_type`, most recent first. Unlike [`Self::tail`], this
    /// reaches events evicted from the in-memory ring buffer.
    pub async fn query(
        &self,
        event_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, VeritasError> {
        self.store.query_audit_events(event_type, limit).await
    }

    /// Current number of events held in the in-memory ring buffer.
    pub async fn len(&self) -> usize {
        self.ring.read().await.len()
    }

    /// Returns `true` if the in-memory ring buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.ring.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::Severity;

    async fn test_pipeline(capacity: usize) -> AuditPipeline {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        AuditPipeline::new(store, capacity)
    }

    #[tokio::test]
    async fn emit_then_tail_returns_the_event() {
        let pipeline = test_pipeline(10).await;
        pipeline
            .emit(AuditEvent::new("detection.completed", Severity::Info))
            .await;
        let tail = pipeline.tail(5).await;
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, "detection.completed");
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_when_full() {
        let pipeline = test_pipeline(2).await;
        pipeline.emit(AuditEvent::new("a", Severity::Info)).await;
        pipeline.emit(AuditEvent::new("b", Severity::Info)).await;
        pipeline.emit(AuditEvent::new("c", Severity::Info)).await;

        let tail = pipeline.tail(10).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].event_type, "b");
        assert_eq!(tail[1].event_type, "c");
    }

    #[tokio::test]
    async fn tail_respects_requested_count() {
        let pipeline = test_pipeline(10).await;
        for name in ["a", "b", "c"] {
            pipeline.emit(AuditEvent::new(name, Severity::Info)).await;
        }
        let tail = pipeline.tail(2).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].event_type, "b");
        assert_eq!(tail[1].event_type, "c");
    }

    #[tokio::test]
    async fn query_reaches_events_evicted_from_ring_buffer() {
        let pipeline = test_pipeline(1).await;
        pipeline.emit(AuditEvent::new("old", Severity::Info)).await;
        pipeline.emit(AuditEvent::new("new", Severity::Info)).await;

        assert_eq!(pipeline.tail(10).await.len(), 1);
        let queried = pipeline.query(None, 10).await.unwrap();
        assert_eq!(queried.len(), 2);
    }

    #[tokio::test]
    async fn query_filters_by_event_type() {
        let pipeline = test_pipeline(10).await;
        pipeline.emit(AuditEvent::new("a.b", Severity::Info)).await;
        pipeline.emit(AuditEvent::new("c.d", Severity::Warning)).await;

        let filtered = pipeline.query(Some("a.b"), 10).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].event_type, "a.b");
    }

    #[tokio::test]
    async fn empty_pipeline_reports_empty() {
        let pipeline = test_pipeline(10).await;
        assert!(pipeline.is_empty().await);
        assert_eq!(pipeline.len().await, 0);
    }
}
