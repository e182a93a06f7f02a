// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! SQLite-backed persistence for [`AnalysisRecord`]s and [`AuditEvent`]s.
//!
//! [`Store`] owns one `sqlx::SqlitePool` and creates its schema on open
//! (idempotent `CREATE TABLE IF NOT EXISTS` plus the indexing contract:
//! `(content_type, created_at)`, `(source, created_at)`, and an exact-match
//! index on `content_hash` for analysis records; `event_type`, `severity`,
//! `actor_id`, and `created_at` for audit events). `veritas-audit` uses the
//! same pool, via this crate's audit methods, as the durable backing store
//! behind its in-memory ring buffer.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;
use veritas_core::{AnalysisRecord, AnalysisSource, AuditEvent, ContentType, Severity};
use veritas_error::{ErrorCode, VeritasError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_records (
    analysis_id TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    is_ai_generated INTEGER NOT NULL,
    confidence REAL NOT NULL,
    model_prediction TEXT,
    result_payload TEXT NOT NULL,
    source TEXT NOT NULL,
    source_url TEXT,
    filename TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analysis_content_type_created_at
    ON analysis_records(content_type, created_at);
CREATE INDEX IF NOT EXISTS idx_analysis_source_created_at
    ON analysis_records(source, created_at);
CREATE INDEX IF NOT EXISTS idx_analysis_content_hash
    ON analysis_records(content_hash);

CREATE TABLE IF NOT EXISTS audit_events (
    event_id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    actor_id TEXT,
    request_id TEXT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_created_at ON audit_events(created_at);
CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_events(event_type);
CREATE INDEX IF NOT EXISTS idx_audit_severity ON audit_events(severity);
CREATE INDEX IF NOT EXISTS idx_audit_actor_id ON audit_events(actor_id);
"#;

/// A handle to the analysis/audit persistence layer.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Filters accepted by [`Store::list_analyses`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to one content modality.
    pub content_type: Option<ContentType>,
    /// Restrict to one originating source.
    pub source: Option<AnalysisSource>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Maximum rows to return, most recent first.
    pub limit: u32,
    /// Rows to skip before `limit` is applied, most recent first.
    pub offset: u32,
}

/// One day's bucket in a [`DashboardSummary`] timeline.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimelineBucket {
    /// `YYYY-MM-DD` day key.
    pub day: String,
    /// Total analyses recorded that day.
    pub total: u64,
    /// Analyses flagged `is_ai_generated` that day.
    pub ai_detected: u64,
    /// Analyses not flagged `is_ai_generated` that day.
    pub human_detected: u64,
}

/// One entry in a [`DashboardSummary`]'s `top_models` ranking.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelRank {
    /// Model family name.
    pub model: String,
    /// Number of analyses attributed to this model.
    pub count: u64,
}

/// One count in a [`DashboardSummary`]'s `by_type` or `by_source` breakdown.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CategoryCount {
    /// The category key (a [`ContentType`] or [`AnalysisSource`] wire name).
    pub key: String,
    /// Number of analyses in this category.
    pub count: u64,
}

/// A dashboard alert, emitted by the rules in [`Store::dashboard`]'s
/// documentation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardAlert {
    /// The alert rule that fired (`ai_rate_spike` or `volume_drop`).
    pub kind: &'static str,
    /// Human-readable detail for the alert.
    pub detail: String,
}

/// Aggregated analytics over a time window, per the `/analyze/dashboard`
/// contract.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardSummary {
    /// Zero-filled per-day counts across the requested window.
    pub timeline: Vec<TimelineBucket>,
    /// Most frequently attributed model predictions, descending by count,
    /// ties broken lexicographically.
    pub top_models: Vec<ModelRank>,
    /// Breakdown of the window's analyses by content modality.
    pub by_type: Vec<CategoryCount>,
    /// Breakdown of the window's analyses by originating source.
    pub by_source: Vec<CategoryCount>,
    /// Total analyses in the window.
    pub total_analyses: u64,
    /// Total analyses flagged `is_ai_generated` in the window.
    pub total_flagged: u64,
    /// `ai_detected_window / max(total_analyses_window, 1)`.
    pub ai_rate_window: f64,
    /// Analyses in the window not flagged `is_ai_generated`.
    pub human_detected_window: u64,
    /// Mean `confidence` across the window's analyses (`0.0` if empty).
    pub average_confidence_window: f64,
    /// Alerts raised by the `ai_rate_spike` / `volume_drop` rules.
    pub alerts_window: Vec<DashboardAlert>,
}

impl Store {
    /// Open (creating if necessary) the SQLite database at `database_url`
    /// and ensure its schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, VeritasError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| {
                VeritasError::new(ErrorCode::PersistenceFailed, "failed to open database")
                    .with_source(e)
                    .with_context("database_url", database_url)
            })?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to initialize schema")
                .with_source(e)
        })?;

        Ok(Self { pool })
    }

    /// Build a store directly over an existing pool (used by tests and by
    /// callers that want to share a pool across multiple stores).
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Access the underlying connection pool, for crates (e.g.
    /// `veritas-audit`) that share it directly.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- Analysis records ---------------------------------------------------

    /// Insert or replace an [`AnalysisRecord`].
    pub async fn put_analysis(&self, record: &AnalysisRecord) -> Result<(), VeritasError> {
        sqlx::query(
            "INSERT OR REPLACE INTO analysis_records
             (analysis_id, content_type, content_hash, is_ai_generated, confidence,
              model_prediction, result_payload, source, source_url, filename, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.analysis_id.to_string())
        .bind(record.content_type.as_str())
        .bind(&record.content_hash)
        .bind(record.is_ai_generated)
        .bind(record.confidence)
        .bind(&record.model_prediction)
        .bind(record.result_payload.to_string())
        .bind(record.source.as_str())
        .bind(&record.source_url)
        .bind(&record.filename)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to store analysis record")
                .with_source(e)
        })?;
        Ok(())
    }

    /// Fetch one [`AnalysisRecord`] by its ID.
    pub async fn get_analysis(&self, id: Uuid) -> Result<Option<AnalysisRecord>, VeritasError> {
        let row = sqlx::query("SELECT * FROM analysis_records WHERE analysis_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                VeritasError::new(ErrorCode::PersistenceFailed, "failed to fetch analysis record")
                    .with_source(e)
            })?;
        row.map(|r| row_to_analysis(&r)).transpose()
    }

    /// Fetch the most recent [`AnalysisRecord`] with an exact `content_hash`
    /// match, used for deduplication.
    pub async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<AnalysisRecord>, VeritasError> {
        let row = sqlx::query(
            "SELECT * FROM analysis_records WHERE content_hash = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to query by content_hash")
                .with_source(e)
        })?;
        row.map(|r| row_to_analysis(&r)).transpose()
    }

    /// Insert `record`, unless a record with the same `(content_type,
    /// content_hash)` was already stored within `dedup_window` of
    /// `record.created_at` — in which case the existing `analysis_id` is
    /// returned and no new row is written.
    ///
    /// This is the idempotent entry point detection handlers should call;
    /// [`Self::put_analysis`] remains available for callers (e.g. the
    /// scheduler, replaying a known-fresh record) that have already done
    /// their own dedup check.
    pub async fn put(
        &self,
        record: &AnalysisRecord,
        dedup_window: chrono::Duration,
    ) -> Result<Uuid, VeritasError> {
        if let Some(existing) = self.find_by_content_hash(&record.content_hash).await? {
            if existing.content_type == record.content_type
                && record.created_at.signed_duration_since(existing.created_at) <= dedup_window
            {
                return Ok(existing.analysis_id);
            }
        }
        self.put_analysis(record).await?;
        Ok(record.analysis_id)
    }

    /// List [`AnalysisRecord`]s matching `filter`, most recent first.
    pub async fn list_analyses(&self, filter: &ListFilter) -> Result<Vec<AnalysisRecord>, VeritasError> {
        let mut sql = String::from("SELECT * FROM analysis_records WHERE 1 = 1");
        push_filter_clauses(&mut sql, filter);
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        query = bind_filter_clauses(query, filter);
        let limit: i64 = if filter.limit == 0 { 100 } else { filter.limit as i64 };
        query = query.bind(limit).bind(filter.offset as i64);

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to list analysis records")
                .with_source(e)
        })?;
        rows.iter().map(row_to_analysis).collect()
    }

    /// Count [`AnalysisRecord`]s matching `filter`, ignoring `limit`/`offset`.
    pub async fn count_analyses(&self, filter: &ListFilter) -> Result<u64, VeritasError> {
        let mut sql = String::from("SELECT COUNT(*) AS n FROM analysis_records WHERE 1 = 1");
        push_filter_clauses(&mut sql, filter);

        let mut query = sqlx::query(&sql);
        query = bind_filter_clauses(query, filter);

        let row = query.fetch_one(&self.pool).await.map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to count analysis records")
                .with_source(e)
        })?;
        let n: i64 = row.try_get("n").map_err(row_err)?;
        Ok(n as u64)
    }

    /// List [`AnalysisRecord`]s matching `filter` alongside the total count of
    /// matching rows (ignoring `limit`/`offset`), per the `/analyze/history`
    /// contract.
    pub async fn list_analyses_page(
        &self,
        filter: &ListFilter,
    ) -> Result<(Vec<AnalysisRecord>, u64), VeritasError> {
        let items = self.list_analyses(filter).await?;
        let total = self.count_analyses(filter).await?;
        Ok((items, total))
    }

    /// Permanently delete every [`AnalysisRecord`] created before `cutoff`,
    /// returning the number of rows removed.
    pub async fn prune_analyses(&self, cutoff: DateTime<Utc>) -> Result<u64, VeritasError> {
        let result = sqlx::query("DELETE FROM analysis_records WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                VeritasError::new(ErrorCode::PersistenceFailed, "failed to prune analysis records")
                    .with_source(e)
            })?;
        Ok(result.rows_affected())
    }

    /// Aggregate analytics over `[since, until]`, per the `/analyze/dashboard`
    /// contract. `timeline` is zero-filled: every day in the window appears
    /// even if no analyses were recorded.
    ///
    /// `alerts_window` is evaluated against the 15 days ending at `until`
    /// (the requested day plus its trailing 14-day baseline) regardless of
    /// how wide `[since, until]` itself is, since the alert rules compare
    /// "today" against a fixed 14-day lookback rather than the dashboard's
    /// own window.
    pub async fn dashboard(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<DashboardSummary, VeritasError> {
        let filter = ListFilter {
            since: Some(since),
            until: Some(until),
            limit: u32::MAX,
            ..Default::default()
        };
        let records = self.list_analyses(&filter).await?;

        let mut per_day: HashMap<String, (u64, u64)> = HashMap::new();
        let mut per_model: HashMap<String, u64> = HashMap::new();
        let mut per_type: HashMap<&'static str, u64> = HashMap::new();
        let mut per_source: HashMap<&'static str, u64> = HashMap::new();
        let mut total_flagged = 0u64;
        let mut confidence_sum = 0.0f64;

        for record in &records {
            let day = record.created_at.format("%Y-%m-%d").to_string();
            let entry = per_day.entry(day).or_insert((0, 0));
            entry.0 += 1;
            if record.is_ai_generated {
                entry.1 += 1;
                total_flagged += 1;
            }
            if let Some(model) = &record.model_prediction {
                *per_model.entry(model.clone()).or_insert(0) += 1;
            }
            *per_type.entry(record.content_type.as_str()).or_insert(0) += 1;
            *per_source.entry(record.source.as_str()).or_insert(0) += 1;
            confidence_sum += record.confidence;
        }

        let total_analyses = records.len() as u64;

        let mut timeline = Vec::new();
        let mut cursor = since.date_naive();
        let end = until.date_naive();
        loop {
            let key = cursor.format("%Y-%m-%d").to_string();
            let (total, ai_detected) = per_day.get(&key).copied().unwrap_or((0, 0));
            timeline.push(TimelineBucket {
                day: key,
                total,
                ai_detected,
                human_detected: total - ai_detected,
            });
            if cursor >= end {
                break;
            }
            cursor = match cursor.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        let mut top_models: Vec<ModelRank> = per_model
            .into_iter()
            .map(|(model, count)| ModelRank { model, count })
            .collect();
        top_models.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.model.cmp(&b.model)));
        top_models.truncate(10);

        let mut by_type: Vec<CategoryCount> = per_type
            .into_iter()
            .map(|(key, count)| CategoryCount { key: key.to_string(), count })
            .collect();
        by_type.sort_by(|a, b| a.key.cmp(&b.key));

        let mut by_source: Vec<CategoryCount> = per_source
            .into_iter()
            .map(|(key, count)| CategoryCount { key: key.to_string(), count })
            .collect();
        by_source.sort_by(|a, b| a.key.cmp(&b.key));

        let ai_rate_window = total_flagged as f64 / total_analyses.max(1) as f64;
        let average_confidence_window = if total_analyses > 0 {
            confidence_sum / total_analyses as f64
        } else {
            0.0
        };

        let alerts_window = self.dashboard_alerts(until).await?;

        Ok(DashboardSummary {
            timeline,
            top_models,
            by_type,
            by_source,
            total_analyses,
            total_flagged,
            ai_rate_window,
            human_detected_window: total_analyses - total_flagged,
            average_confidence_window,
            alerts_window,
        })
    }

    /// Evaluate the `ai_rate_spike` and `volume_drop` alert rules over the
    /// 15 days ending at `reference` (the reference day, plus its trailing
    /// 14-day baseline).
    async fn dashboard_alerts(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<Vec<DashboardAlert>, VeritasError> {
        let reference_day = reference.date_naive();
        let lookback_start = reference_day - chrono::Duration::days(14);
        let filter = ListFilter {
            since: Some(
                lookback_start
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid")
                    .and_utc(),
            ),
            until: Some(reference),
            limit: u32::MAX,
            ..Default::default()
        };
        let records = self.list_analyses(&filter).await?;

        let mut per_day: HashMap<chrono::NaiveDate, (u64, u64)> = HashMap::new();
        for record in &records {
            let day = record.created_at.date_naive();
            let entry = per_day.entry(day).or_insert((0, 0));
            entry.0 += 1;
            if record.is_ai_generated {
                entry.1 += 1;
            }
        }

        let (today_total, today_ai) = per_day.get(&reference_day).copied().unwrap_or((0, 0));
        let mut baseline_totals: Vec<u64> = Vec::new();
        let mut baseline_rates: Vec<f64> = Vec::new();
        let mut cursor = lookback_start;
        while cursor < reference_day {
            let (total, ai) = per_day.get(&cursor).copied().unwrap_or((0, 0));
            baseline_totals.push(total);
            baseline_rates.push(ai as f64 / total.max(1) as f64);
            cursor = cursor.succ_opt().unwrap_or(reference_day);
        }

        let mut alerts = Vec::new();

        if today_total >= 20 && !baseline_rates.is_empty() {
            let today_rate = today_ai as f64 / today_total.max(1) as f64;
            let baseline_avg = baseline_rates.iter().sum::<f64>() / baseline_rates.len() as f64;
            if baseline_avg > 0.0 && today_rate > 2.0 * baseline_avg {
                alerts.push(DashboardAlert {
                    kind: "ai_rate_spike",
                    detail: format!(
                        "today's AI rate {today_rate:.3} exceeds twice the trailing 14-day average {baseline_avg:.3}"
                    ),
                });
            }
        }

        let baseline_sum: u64 = baseline_totals.iter().sum();
        if baseline_sum >= 50 && !baseline_totals.is_empty() {
            let mut sorted = baseline_totals.clone();
            sorted.sort_unstable();
            let mid = sorted.len() / 2;
            let median = if sorted.len() % 2 == 0 && sorted.len() >= 2 {
                (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
            } else {
                sorted[mid] as f64
            };
            if median > 0.0 && (today_total as f64) < 0.2 * median {
                alerts.push(DashboardAlert {
                    kind: "volume_drop",
                    detail: format!(
                        "today's volume {today_total} is below 20% of the trailing 14-day median {median:.1}"
                    ),
                });
            }
        }

        Ok(alerts)
    }

    /// Export analyses matching `filter` as CSV bytes, capped at
    /// `row_cap` rows. Returns the number of rows actually written
    /// alongside the formatted bytes so callers can log truncation.
    pub async fn export_csv(
        &self,
        filter: &ListFilter,
        row_cap: u32,
    ) -> Result<(Vec<u8>, u32), VeritasError> {
        let mut capped = filter.clone();
        capped.limit = row_cap;
        let records = self.list_analyses(&capped).await?;
        let mut out = String::from(
            "analysis_id,content_type,content_hash,is_ai_generated,confidence,model_prediction,source,created_at\n",
        );
        for r in &records {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{}\n",
                r.analysis_id,
                r.content_type,
                r.content_hash,
                r.is_ai_generated,
                r.confidence,
                r.model_prediction.as_deref().unwrap_or(""),
                r.source,
                r.created_at.to_rfc3339(),
            ));
        }
        let count = records.len() as u32;
        if count == row_cap {
            tracing::warn!(row_cap, "export_csv truncated at row cap");
        }
        Ok((out.into_bytes(), count))
    }

    /// Export analyses matching `filter` as a JSON array, capped at
    /// `row_cap` rows.
    pub async fn export_json(
        &self,
        filter: &ListFilter,
        row_cap: u32,
    ) -> Result<(Vec<u8>, u32), VeritasError> {
        let mut capped = filter.clone();
        capped.limit = row_cap;
        let records = self.list_analyses(&capped).await?;
        let count = records.len() as u32;
        if count == row_cap {
            tracing::warn!(row_cap, "export_json truncated at row cap");
        }
        let bytes = serde_json::to_vec(&records).map_err(|e| {
            VeritasError::new(ErrorCode::Internal, "failed to serialize export").with_source(e)
        })?;
        Ok((bytes, count))
    }

    // -- Audit events ---------------------------------------------------------

    /// Durably persist an [`AuditEvent`]. Failures here are logged and
    /// swallowed by `veritas-audit`'s pipeline, not surfaced to callers of
    /// the primary request path.
    pub async fn record_audit_event(&self, event: &AuditEvent) -> Result<(), VeritasError> {
        sqlx::query(
            "INSERT OR REPLACE INTO audit_events
             (event_id, event_type, severity, actor_id, request_id, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.event_id.to_string())
        .bind(&event.event_type)
        .bind(severity_as_str(event.severity))
        .bind(&event.actor_id)
        .bind(&event.request_id)
        .bind(event.payload.to_string())
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to store audit event")
                .with_source(e)
        })?;
        Ok(())
    }

    /// Fetch the `limit` most recent audit events, optionally restricted to
    /// `event_type`.
    pub async fn query_audit_events(
        &self,
        event_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, VeritasError> {
        let limit = limit as i64;
        let rows = match event_type {
            Some(et) => {
                sqlx::query(
                    "SELECT * FROM audit_events WHERE event_type = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(et)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM audit_events ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "failed to query audit events")
                .with_source(e)
        })?;
        rows.iter().map(row_to_audit_event).collect()
    }
}

fn push_filter_clauses(sql: &mut String, filter: &ListFilter) {
    if filter.content_type.is_some() {
        sql.push_str(" AND content_type = ?");
    }
    if filter.source.is_some() {
        sql.push_str(" AND source = ?");
    }
    if filter.since.is_some() {
        sql.push_str(" AND created_at >= ?");
    }
    if filter.until.is_some() {
        sql.push_str(" AND created_at <= ?");
    }
}

fn bind_filter_clauses<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    filter: &'q ListFilter,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if let Some(ct) = filter.content_type {
        query = query.bind(ct.as_str());
    }
    if let Some(src) = filter.source {
        query = query.bind(src.as_str());
    }
    if let Some(since) = filter.since {
        query = query.bind(since.to_rfc3339());
    }
    if let Some(until) = filter.until {
        query = query.bind(until.to_rfc3339());
    }
    query
}

fn severity_as_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn parse_tagged<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, VeritasError> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|e| {
        VeritasError::new(ErrorCode::PersistenceFailed, "failed to decode stored enum value")
            .with_source(e)
            .with_context("value", value)
    })
}

fn row_to_analysis(row: &SqliteRow) -> Result<AnalysisRecord, VeritasError> {
    let analysis_id: String = row.try_get("analysis_id").map_err(row_err)?;
    let content_type: String = row.try_get("content_type").map_err(row_err)?;
    let source: String = row.try_get("source").map_err(row_err)?;
    let result_payload: String = row.try_get("result_payload").map_err(row_err)?;
    let created_at: String = row.try_get("created_at").map_err(row_err)?;

    Ok(AnalysisRecord {
        analysis_id: Uuid::parse_str(&analysis_id).map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "corrupt analysis_id").with_source(e)
        })?,
        content_type: parse_tagged::<ContentType>(&content_type)?,
        content_hash: row.try_get("content_hash").map_err(row_err)?,
        is_ai_generated: row.try_get("is_ai_generated").map_err(row_err)?,
        confidence: row.try_get("confidence").map_err(row_err)?,
        model_prediction: row.try_get("model_prediction").map_err(row_err)?,
        result_payload: serde_json::from_str(&result_payload).map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "corrupt result_payload")
                .with_source(e)
        })?,
        source: parse_tagged::<AnalysisSource>(&source)?,
        source_url: row.try_get("source_url").map_err(row_err)?,
        filename: row.try_get("filename").map_err(row_err)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                VeritasError::new(ErrorCode::PersistenceFailed, "corrupt created_at")
                    .with_source(e)
            })?
            .with_timezone(&Utc),
    })
}

fn row_to_audit_event(row: &SqliteRow) -> Result<AuditEvent, VeritasError> {
    let event_id: String = row.try_get("event_id").map_err(row_err)?;
    let severity: String = row.try_get("severity").map_err(row_err)?;
    let payload: String = row.try_get("payload").map_err(row_err)?;
    let created_at: String = row.try_get("created_at").map_err(row_err)?;

    Ok(AuditEvent {
        event_id: Uuid::parse_str(&event_id).map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "corrupt event_id").with_source(e)
        })?,
        event_type: row.try_get("event_type").map_err(row_err)?,
        severity: parse_tagged::<Severity>(&severity)?,
        actor_id: row.try_get("actor_id").map_err(row_err)?,
        request_id: row.try_get("request_id").map_err(row_err)?,
        payload: serde_json::from_str(&payload).map_err(|e| {
            VeritasError::new(ErrorCode::PersistenceFailed, "corrupt audit payload")
                .with_source(e)
        })?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                VeritasError::new(ErrorCode::PersistenceFailed, "corrupt created_at")
                    .with_source(e)
            })?
            .with_timezone(&Utc),
    })
}

fn row_err(e: sqlx::Error) -> VeritasError {
    VeritasError::new(ErrorCode::PersistenceFailed, "failed to decode stored row").with_source(e)
}
