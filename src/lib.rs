//! # pgadvise: PostgreSQL diagnostic advisor
//!
//! Turns statement text, plans and server statistics into advice: where a
//! plan spends its time, which statements are slow or look like N+1 loops,
//! and which composite index would serve a sample query.
//!
//! ## Quick Example
//!
//! ```rust
//! use pgadvise::prelude::*;
//!
//! let proposal = Advisor::default().propose(
//!     Some("orders"),
//!     "SELECT * FROM orders o WHERE o.customer_id = 5 AND o.total > 100 ORDER BY o.created_at DESC",
//! );
//! let candidate = proposal.candidate.unwrap();
//! assert_eq!(
//!     candidate.to_sql(),
//!     "CREATE INDEX ON orders (customer_id, total, created_at DESC)"
//! );
//! ```
//!
//! ## Column order
//!
//! | Position | Source             | Example               |
//! |----------|--------------------|-----------------------|
//! | 1st      | Equality predicate | `customer_id = $1`    |
//! | 2nd      | Range predicate    | `total > 100`         |
//! | 3rd      | `ORDER BY` term    | `created_at DESC`     |
//!
//! Database-facing operations go through the [`backend::Backend`] trait,
//! implemented by [`session::Session`] over a single connection.

pub mod advisor;
pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod plan;
pub mod rpc;
pub mod session;
pub mod stats;
pub mod synthesize;
pub mod validate;

pub mod prelude {
    pub use crate::advisor::{explain, Advisor, IndexRequest, IndexSuggestions};
    pub use crate::backend::{Backend, ExplainOptions};
    pub use crate::config::AdvisorConfig;
    pub use crate::error::*;
    pub use crate::extract::{ColumnRef, HeuristicExtractor, PredicateExtractor, PredicateSets};
    pub use crate::normalize::normalize;
    pub use crate::plan::{hotspot, parse_explain, PlanMetric, PlanNode};
    pub use crate::session::SessionManager;
    pub use crate::stats::{n_plus_one_suspicions, slow_queries, NPlusOneThresholds};
    pub use crate::synthesize::{synthesize, CompositeIndexCandidate, ToSql};
    pub use crate::validate::{validate, ValidationOutcome};
}

/// Normalize a statement into its literal-free template.
///
/// # Example
///
/// ```
/// use pgadvise::normalize;
///
/// assert_eq!(
///     normalize("SELECT * FROM t WHERE id = 42").as_str(),
///     "select * from t where id = ?"
/// );
/// ```
pub fn normalize(sql: &str) -> normalize::SqlTemplate {
    normalize::normalize(sql)
}
