//! Statement statistics: slow queries and N+1 suspicions.
//!
//! Reads `pg_stat_statements`, trying the PostgreSQL 13+ column names first
//! and falling back to the legacy ones. When neither works the report says
//! the extension is unavailable instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, StatColumns, StatementStats};
use crate::error::AdvisorResult;
use crate::normalize::normalize;

/// Longest normalized statement text included in a report.
pub const MAX_TEMPLATE_CHARS: usize = 500;

/// Most suspicions returned by [`n_plus_one_suspicions`].
pub const MAX_SUSPICIONS: usize = 50;

const UNAVAILABLE_WARNING: &str = "pg_stat_statements not installed or not permitted";

/// Statistics could not be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsUnavailable {
    pub pg_stat_statements: bool,
    pub warning: String,
    pub error: String,
}

impl StatsUnavailable {
    fn new(error: impl ToString) -> Self {
        Self {
            pg_stat_statements: false,
            warning: UNAVAILABLE_WARNING.to_string(),
            error: error.to_string(),
        }
    }
}

/// Either a report or an explanation of why statistics are missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsOutcome<T> {
    Available(T),
    Unavailable(StatsUnavailable),
}

impl<T> StatsOutcome<T> {
    pub fn available(self) -> Option<T> {
        match self {
            StatsOutcome::Available(report) => Some(report),
            StatsOutcome::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowQuery {
    pub queryid: Option<String>,
    pub calls: i64,
    pub rows: i64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub normalized: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowQueries {
    pub pg_stat_statements: bool,
    pub stats_reset: Option<DateTime<Utc>>,
    pub top: Vec<SlowQuery>,
}

/// Thresholds for the N+1 heuristic: many calls, few rows per call, and
/// a mean time worth caring about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NPlusOneThresholds {
    pub min_calls: i64,
    pub max_avg_rows: f64,
    pub min_mean_ms: f64,
}

impl Default for NPlusOneThresholds {
    fn default() -> Self {
        Self {
            min_calls: 20,
            max_avg_rows: 3.0,
            min_mean_ms: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suspicion {
    pub normalized: String,
    pub calls: i64,
    pub avg_rows: f64,
    pub mean_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NPlusOneReport {
    pub pg_stat_statements: bool,
    pub suspicions: Vec<Suspicion>,
}

#[derive(Clone, Copy)]
enum Fetch {
    Top(i64),
    Frequent(i64),
}

async fn fetch<B: Backend + ?Sized>(
    backend: &mut B,
    columns: StatColumns,
    what: Fetch,
) -> AdvisorResult<Vec<StatementStats>> {
    match what {
        Fetch::Top(limit) => backend.top_statements(columns, limit).await,
        Fetch::Frequent(min_calls) => backend.frequent_statements(columns, min_calls).await,
    }
}

async fn fetch_with_fallback<B: Backend + ?Sized>(
    backend: &mut B,
    what: Fetch,
) -> AdvisorResult<Vec<StatementStats>> {
    match fetch(backend, StatColumns::Modern, what).await {
        Ok(rows) => Ok(rows),
        Err(e) => {
            debug!("Modern pg_stat_statements columns failed ({}), trying legacy", e);
            fetch(backend, StatColumns::Legacy, what).await
        }
    }
}

fn template(query: Option<&str>) -> String {
    normalize(query.unwrap_or_default()).truncated(MAX_TEMPLATE_CHARS)
}

/// The `top` slowest statements by mean execution time.
pub async fn slow_queries<B: Backend + ?Sized>(
    backend: &mut B,
    top: i64,
) -> StatsOutcome<SlowQueries> {
    let stats_reset = match backend.stats_reset().await {
        Ok(reset) => reset,
        Err(e) => {
            debug!("stats_reset unavailable: {}", e);
            None
        }
    };

    let rows = match fetch_with_fallback(backend, Fetch::Top(top)).await {
        Ok(rows) => rows,
        Err(e) => return StatsOutcome::Unavailable(StatsUnavailable::new(e)),
    };

    let top = rows
        .into_iter()
        .map(|r| SlowQuery {
            queryid: r.queryid.map(|id| id.to_string()),
            calls: r.calls,
            rows: r.rows,
            total_ms: r.total_ms,
            mean_ms: r.mean_ms,
            normalized: template(r.query.as_deref()),
        })
        .collect();

    StatsOutcome::Available(SlowQueries {
        pg_stat_statements: true,
        stats_reset,
        top,
    })
}

/// Statements that look like one-row lookups issued in a loop.
pub async fn n_plus_one_suspicions<B: Backend + ?Sized>(
    backend: &mut B,
    thresholds: NPlusOneThresholds,
) -> StatsOutcome<NPlusOneReport> {
    match fetch_with_fallback(backend, Fetch::Frequent(thresholds.min_calls)).await {
        Ok(rows) => StatsOutcome::Available(NPlusOneReport {
            pg_stat_statements: true,
            suspicions: find_suspicions(&rows, &thresholds),
        }),
        Err(e) => StatsOutcome::Unavailable(StatsUnavailable::new(e)),
    }
}

/// Apply the N+1 heuristic to already fetched rows.
///
/// An undefined rows-per-call ratio counts as `0.0`. Results are ordered
/// by calls, then mean time, both descending, and capped at
/// [`MAX_SUSPICIONS`].
pub fn find_suspicions(rows: &[StatementStats], thresholds: &NPlusOneThresholds) -> Vec<Suspicion> {
    let mut suspicions: Vec<Suspicion> = rows
        .iter()
        .filter_map(|r| {
            let avg_rows = r.avg_rows.unwrap_or(0.0);
            (avg_rows <= thresholds.max_avg_rows && r.mean_ms >= thresholds.min_mean_ms).then(
                || Suspicion {
                    normalized: template(r.query.as_deref()),
                    calls: r.calls,
                    avg_rows,
                    mean_ms: r.mean_ms,
                },
            )
        })
        .collect();

    suspicions.sort_by(|a, b| {
        b.calls
            .cmp(&a.calls)
            .then_with(|| b.mean_ms.total_cmp(&a.mean_ms))
    });
    suspicions.truncate(MAX_SUSPICIONS);
    suspicions
}
