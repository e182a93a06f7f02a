// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Fixed-window rate limiting and a daily spend-point ledger.
//!
//! [`Guard`] admits or rejects a request for a `(client_id, bucket)` pair
//! using a fixed-window counter per spec, then checks the request's point
//! cost against a per-client daily spend cap. Both counters live in-process
//! behind [`tokio::sync::Mutex`]-guarded maps; a shared-cache backend (e.g.
//! Redis, selected via `cache_url`) is out of scope for this crate and
//! would implement the same [`Guard`] surface against external storage.

use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use veritas_config::{AppConfig, RateLimitConfig};

/// The outcome of a single [`Guard::authorize`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Why the request was rejected, if it was.
    pub reason: Option<RejectReason>,
    /// Seconds until the caller may retry, present only on rejection.
    pub retry_after_seconds: Option<u64>,
    /// Requests remaining in the current window after this decision.
    pub remaining_requests: u64,
    /// Spend points remaining today after this decision.
    pub remaining_spend_points: u64,
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The bucket's fixed-window request limit was exceeded.
    RateLimited,
    /// The client's daily spend cap would be exceeded.
    SpendCapExceeded,
}

/// In-process fixed-window rate limiter and spend-point ledger.
pub struct Guard {
    buckets: HashMap<String, RateLimitConfig>,
    daily_spend_cap_points: u64,
    windows: Mutex<HashMap<(String, String, i64), u64>>,
    spend: Mutex<HashMap<(String, String), u64>>,
}

impl Guard {
    /// Build a guard from the rate-limit and spend-cap settings in `config`.
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            buckets: config.rate_limit.clone().into_iter().collect(),
            daily_spend_cap_points: config.daily_spend_cap_points,
            windows: Mutex::new(HashMap::new()),
            spend: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_config(&self, bucket: &str) -> RateLimitConfig {
        self.buckets
            .get(bucket)
            .cloned()
            .or_else(|| self.buckets.get("default").cloned())
            .unwrap_or(RateLimitConfig {
                window_seconds: 60,
                max_requests: 30,
                cost_points: 1,
            })
    }

    /// Authorize one request from `client_id` against `bucket`, evaluated
    /// at time `now`, debiting the bucket's own configured `cost_points`.
    ///
    /// Admits the request, increments the window counter and the daily
    /// spend ledger, and returns a [`Decision`]. Rejects (without mutating
    /// either counter) when the bucket's window is exhausted or the day's
    /// spend cap would be exceeded.
    pub async fn authorize(&self, client_id: &str, bucket: &str, now: DateTime<Utc>) -> Decision {
        let cost_points = self.bucket_config(bucket).cost_points;
        self.authorize_with_cost(client_id, bucket, cost_points, now).await
    }

    /// Authorize one request from `client_id` against `bucket`'s fixed
    /// window, but debit the spend ledger by the caller-supplied
    /// `cost_points` instead of the bucket's own configured cost.
    ///
    /// This is what detection handlers call: the bucket (`text`, `media`,
    /// `batch`, `intel`) governs the window/`max_requests` admission gate,
    /// while `cost_points` comes from the per-operation cost table
    /// (`{text: 1, image: 3, audio: 4, video: 6, batch: 5, intel: 8}`),
    /// since one bucket covers several operations with different costs
    /// (e.g. `media` covers image/audio/video at 3/4/6 points each).
    pub async fn authorize_with_cost(
        &self,
        client_id: &str,
        bucket: &str,
        cost_points: u64,
        now: DateTime<Utc>,
    ) -> Decision {
        let cfg = self.bucket_config(bucket);
        let window_index = now.timestamp() / cfg.window_seconds as i64;
        let day_key = format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day());

        let mut windows = self.windows.lock().await;
        let window_key = (client_id.to_string(), bucket.to_string(), window_index);
        let current_count = *windows.get(&window_key).unwrap_or(&0);

        if current_count >= cfg.max_requests {
            let elapsed_in_window = now.timestamp() - window_index * cfg.window_seconds as i64;
            let retry_after = (cfg.window_seconds as i64 - elapsed_in_window).max(0) as u64;
            return Decision {
                allowed: false,
                reason: Some(RejectReason::RateLimited),
                retry_after_seconds: Some(retry_after),
                remaining_requests: 0,
                remaining_spend_points: self.spend_remaining(client_id, &day_key).await,
            };
        }

        // The window counter is the admission gate: it is incremented here
        // and never rolled back, even if the spend check below rejects. Only
        // the spend ledger debit is provisional.
        windows.insert(window_key, current_count + 1);
        drop(windows);

        let mut spend = self.spend.lock().await;
        let spend_key = (client_id.to_string(), day_key.clone());
        let spend_used = *spend.get(&spend_key).unwrap_or(&0);

        if spend_used + cost_points > self.daily_spend_cap_points {
            return Decision {
                allowed: false,
                reason: Some(RejectReason::SpendCapExceeded),
                retry_after_seconds: Some(seconds_until_next_day(now)),
                remaining_requests: cfg.max_requests - (current_count + 1),
                remaining_spend_points: self.daily_spend_cap_points.saturating_sub(spend_used),
            };
        }

        spend.insert(spend_key, spend_used + cost_points);

        Decision {
            allowed: true,
            reason: None,
            retry_after_seconds: None,
            remaining_requests: cfg.max_requests - (current_count + 1),
            remaining_spend_points: self
                .daily_spend_cap_points
                .saturating_sub(spend_used + cost_points),
        }
    }

    async fn spend_remaining(&self, client_id: &str, day_key: &str) -> u64 {
        let spend = self.spend.lock().await;
        let used = *spend
            .get(&(client_id.to_string(), day_key.to_string()))
            .unwrap_or(&0);
        self.daily_spend_cap_points.saturating_sub(used)
    }

    /// Clear all window and spend state for `client_id`. Intended for
    /// administrative resets and tests, not normal request handling.
    pub async fn reset(&self, client_id: &str) {
        self.windows.lock().await.retain(|(id, _, _), _| id != client_id);
        self.spend.lock().await.retain(|(id, _), _| id != client_id);
    }
}

fn seconds_until_next_day(now: DateTime<Utc>) -> u64 {
    let next_midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    (next_midnight - now).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config_with_bucket(window_seconds: u64, max_requests: u64, cost_points: u64) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.rate_limit = std::collections::BTreeMap::from([(
            "text".to_string(),
            RateLimitConfig {
                window_seconds,
                max_requests,
                cost_points,
            },
        )]);
        cfg.daily_spend_cap_points = 1000;
        cfg
    }

    #[tokio::test]
    async fn admits_requests_under_the_limit() {
        let guard = Guard::new(&config_with_bucket(60, 3, 1));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for _ in 0..3 {
            let decision = guard.authorize("client-a", "text", now).await;
            assert!(decision.allowed);
        }
    }

    #[tokio::test]
    async fn rejects_once_window_is_exhausted() {
        let guard = Guard::new(&config_with_bucket(60, 2, 1));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        guard.authorize("client-a", "text", now).await;
        guard.authorize("client-a", "text", now).await;
        let third = guard.authorize("client-a", "text", now).await;
        assert!(!third.allowed);
        assert_eq!(third.reason, Some(RejectReason::RateLimited));
        assert!(third.retry_after_seconds.unwrap() <= 60);
    }

    #[tokio::test]
    async fn separate_clients_have_independent_windows() {
        let guard = Guard::new(&config_with_bucket(60, 1, 1));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = guard.authorize("client-a", "text", now).await;
        let b = guard.authorize("client-b", "text", now).await;
        assert!(a.allowed);
        assert!(b.allowed);
    }

    #[tokio::test]
    async fn new_window_resets_the_counter() {
        let guard = Guard::new(&config_with_bucket(60, 1, 1));
        let first = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next_window = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        assert!(guard.authorize("client-a", "text", first).await.allowed);
        assert!(guard.authorize("client-a", "text", next_window).await.allowed);
    }

    #[tokio::test]
    async fn rejects_when_spend_cap_would_be_exceeded() {
        let mut config = config_with_bucket(60, 100, 600);
        config.daily_spend_cap_points = 1000;
        let guard = Guard::new(&config);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(guard.authorize("client-a", "text", now).await.allowed);
        let second = guard.authorize("client-a", "text", now).await;
        assert!(!second.allowed);
        assert_eq!(second.reason, Some(RejectReason::SpendCapExceeded));
    }

    #[tokio::test]
    async fn unknown_bucket_falls_back_to_default() {
        let guard = Guard::new(&AppConfig::default());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let decision = guard.authorize("client-a", "nonexistent-bucket", now).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn reset_clears_client_state() {
        let guard = Guard::new(&config_with_bucket(60, 1, 1));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(guard.authorize("client-a", "text", now).await.allowed);
        assert!(!guard.authorize("client-a", "text", now).await.allowed);
        guard.reset("client-a").await;
        assert!(guard.authorize("client-a", "text", now).await.allowed);
    }

    #[test]
    fn seconds_until_next_day_is_bounded_by_a_day() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let secs = seconds_until_next_day(now);
        assert!(secs <= 86_400);
        assert!(secs > 0);
    }
}
