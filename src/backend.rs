//! The database surface the advisor needs.
//!
//! Every database-facing step (planning, hypothetical indexes, statement
//! statistics) goes through [`Backend`]. [`crate::session::Session`]
//! implements it over a live connection; tests use in-memory fakes.
//!
//! Methods take `&mut self`: one session serves one call at a time, so a
//! hypothetical-index create/reset window can never interleave with
//! another caller's on the same session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AdvisorResult;

/// Options for an `EXPLAIN (FORMAT JSON ...)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplainOptions {
    /// Execute the statement and report actual times and rows.
    pub analyze: bool,
    pub buffers: bool,
    pub timing: bool,
}

impl Default for ExplainOptions {
    fn default() -> Self {
        Self {
            analyze: false,
            buffers: true,
            timing: true,
        }
    }
}

impl ExplainOptions {
    /// Cost estimation only; the statement is never run.
    pub fn estimate_only() -> Self {
        Self {
            analyze: false,
            buffers: false,
            timing: false,
        }
    }

    /// Wrap `sql` in an EXPLAIN statement.
    ///
    /// `TIMING` is only emitted together with `ANALYZE`; the server rejects
    /// it otherwise.
    pub fn statement(&self, sql: &str) -> String {
        let mut options = vec!["FORMAT JSON"];
        if self.analyze {
            options.push("ANALYZE TRUE");
        }
        if self.buffers {
            options.push("BUFFERS TRUE");
        }
        if self.timing && self.analyze {
            options.push("TIMING TRUE");
        }
        format!("EXPLAIN ({}) {}", options.join(", "), sql)
    }
}

/// Column naming scheme of `pg_stat_statements`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatColumns {
    /// PostgreSQL 13+: `total_exec_time`, `mean_exec_time`.
    Modern,
    /// Older servers: `total_time`, `mean_time`.
    Legacy,
}

impl StatColumns {
    fn time_columns(self) -> (&'static str, &'static str) {
        match self {
            StatColumns::Modern => ("total_exec_time", "mean_exec_time"),
            StatColumns::Legacy => ("total_time", "mean_time"),
        }
    }

    fn select_list(self) -> String {
        let (total, mean) = self.time_columns();
        format!(
            "select queryid, query, calls, \
             {total} as total_ms, {mean} as mean_ms, rows, \
             nullif(rows, 0)::float8 / nullif(calls, 0) as avg_rows \
             from pg_stat_statements"
        )
    }

    /// Slowest statements by mean time; `$1` is the row limit.
    pub fn top_statements_sql(self) -> String {
        let (_, mean) = self.time_columns();
        format!("{} order by {mean} desc limit $1", self.select_list())
    }

    /// Most frequently called statements; `$1` is the minimum call count.
    pub fn frequent_statements_sql(self) -> String {
        format!(
            "{} where calls >= $1 order by calls desc limit 500",
            self.select_list()
        )
    }
}

/// Aggregates for one normalized statement.
///
/// `avg_rows` is `rows / calls`, left empty when either side is zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementStats {
    pub queryid: Option<i64>,
    pub query: Option<String>,
    pub calls: i64,
    pub rows: i64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub avg_rows: Option<f64>,
}

/// Database operations used by the advisor.
#[async_trait]
pub trait Backend: Send {
    /// Raw `EXPLAIN (FORMAT JSON ...)` document for `sql`.
    async fn explain_json(&mut self, sql: &str, options: ExplainOptions) -> AdvisorResult<Value>;

    /// Whether an extension is installed in the current database.
    async fn has_extension(&mut self, name: &str) -> AdvisorResult<bool>;

    /// Register a hypothetical index from its `CREATE INDEX` text and
    /// return the name the planner will report for it.
    async fn create_hypothetical_index(&mut self, ddl: &str) -> AdvisorResult<Option<String>>;

    /// Drop every hypothetical index on the session.
    async fn reset_hypothetical_indexes(&mut self) -> AdvisorResult<()>;

    /// When statement statistics were last reset.
    async fn stats_reset(&mut self) -> AdvisorResult<Option<DateTime<Utc>>>;

    async fn top_statements(
        &mut self,
        columns: StatColumns,
        limit: i64,
    ) -> AdvisorResult<Vec<StatementStats>>;

    async fn frequent_statements(
        &mut self,
        columns: StatColumns,
        min_calls: i64,
    ) -> AdvisorResult<Vec<StatementStats>>;
}
