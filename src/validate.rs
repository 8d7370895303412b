//! Hypothetical index validation.
//!
//! Registers a candidate as a hypothetical index, re-plans the sample
//! statement (estimate only, never executed) and checks whether the
//! planner picked the index up. Hypothetical indexes are always reset
//! afterwards so none leaks into later calls on the same session.
//!
//! Every step is allowed to fail. Failures end up in the diagnostic of
//! the returned outcome and never abort the surrounding suggestion.

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, warn};

use crate::backend::{Backend, ExplainOptions};
use crate::error::AdvisorResult;
use crate::plan::{parse_explain, PlanMetric};
use crate::synthesize::CompositeIndexCandidate;

/// Findings of a validation attempt.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ValidationResult {
    /// Name the planner reports for the hypothetical index, once created.
    #[serde(rename = "hypopg_index")]
    pub hypothetical_index: Option<String>,
    pub plan_uses_index: bool,
    #[serde(rename = "hypopg_error", skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The caller did not ask for validation.
    NotRequested,
    /// The session has no hypothetical-index capability.
    Unavailable,
    /// Every step succeeded.
    Validated(ValidationResult),
    /// At least one step failed; partial findings are kept.
    Failed(ValidationResult),
}

impl ValidationOutcome {
    pub fn result(&self) -> Option<&ValidationResult> {
        match self {
            ValidationOutcome::NotRequested | ValidationOutcome::Unavailable => None,
            ValidationOutcome::Validated(r) | ValidationOutcome::Failed(r) => Some(r),
        }
    }

    /// True when no validation step ran.
    pub fn is_skipped(&self) -> bool {
        self.result().is_none()
    }

    /// Outcome for a capability check that could not be answered. Nothing
    /// was created, so there is nothing to reset.
    pub fn check_failed(capability: &str, error: impl std::fmt::Display) -> Self {
        ValidationOutcome::Failed(ValidationResult {
            diagnostic: Some(format!("could not check for {}: {}", capability, error)),
            ..ValidationResult::default()
        })
    }
}

/// Serializes as the result's fields, or as nothing when no step ran, so a
/// suggestion can flatten it in.
impl Serialize for ValidationOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.result() {
            Some(result) => result.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

/// Validate `candidate` against `sql` using hypothetical indexes.
///
/// Skips entirely when `capability_available` is false. Otherwise the
/// reset runs no matter how the earlier steps went.
pub async fn validate<B: Backend + ?Sized>(
    backend: &mut B,
    candidate: &CompositeIndexCandidate,
    sql: &str,
    capability_available: bool,
) -> ValidationOutcome {
    if !capability_available {
        return ValidationOutcome::Unavailable;
    }

    let mut result = ValidationResult::default();
    let attempt = check_plan(backend, candidate, sql, &mut result).await;
    let reset = backend.reset_hypothetical_indexes().await;

    let mut problems = Vec::new();
    if let Err(e) = attempt {
        warn!("Hypothetical validation failed: {}", e);
        problems.push(e.to_string());
    }
    if let Err(e) = reset {
        warn!("Hypothetical index reset failed: {}", e);
        problems.push(format!("reset failed: {}", e));
    }

    if problems.is_empty() {
        ValidationOutcome::Validated(result)
    } else {
        result.diagnostic = Some(problems.join("; "));
        ValidationOutcome::Failed(result)
    }
}

async fn check_plan<B: Backend + ?Sized>(
    backend: &mut B,
    candidate: &CompositeIndexCandidate,
    sql: &str,
    result: &mut ValidationResult,
) -> AdvisorResult<()> {
    let name = backend
        .create_hypothetical_index(&candidate.create_statement)
        .await?;
    result.hypothetical_index = name.clone();

    let document = backend
        .explain_json(sql, ExplainOptions::estimate_only())
        .await?;
    let tree = parse_explain(&document, PlanMetric::EstimatedCost)?;

    result.plan_uses_index = name.as_deref().is_some_and(|n| tree.uses_index(n));
    debug!(
        "Hypothetical index {:?} used by plan: {}",
        name, result.plan_uses_index
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{StatColumns, StatementStats};
    use crate::error::AdvisorError;
    use crate::extract::{ColumnRef, OrderColumn};
    use crate::synthesize::synthesize;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};

    #[derive(Default)]
    struct Hypo {
        fail_create: bool,
        fail_explain: bool,
        fail_reset: bool,
        index_in_plan: bool,
        created: Vec<String>,
        explained: Vec<String>,
        resets: usize,
    }

    #[async_trait]
    impl Backend for Hypo {
        async fn explain_json(&mut self, sql: &str, options: ExplainOptions) -> AdvisorResult<Value> {
            self.explained.push(options.statement(sql));
            if self.fail_explain {
                return Err(AdvisorError::Database("planner exploded".into()));
            }
            let index = if self.index_in_plan { Some("<1>btree_orders_a") } else { None };
            Ok(json!([{ "Plan": {
                "Node Type": "Limit",
                "Total Cost": 4.0,
                "Plans": [{ "Node Type": "Index Scan", "Index Name": index, "Total Cost": 3.0 }]
            }}]))
        }

        async fn has_extension(&mut self, _name: &str) -> AdvisorResult<bool> {
            Ok(true)
        }

        async fn create_hypothetical_index(&mut self, ddl: &str) -> AdvisorResult<Option<String>> {
            if self.fail_create {
                return Err(AdvisorError::Database("hypopg_create_index failed".into()));
            }
            self.created.push(ddl.to_string());
            Ok(Some("<1>btree_orders_a".into()))
        }

        async fn reset_hypothetical_indexes(&mut self) -> AdvisorResult<()> {
            self.resets += 1;
            if self.fail_reset {
                return Err(AdvisorError::Database("reset refused".into()));
            }
            Ok(())
        }

        async fn stats_reset(&mut self) -> AdvisorResult<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn top_statements(&mut self, _: StatColumns, _: i64) -> AdvisorResult<Vec<StatementStats>> {
            Ok(Vec::new())
        }

        async fn frequent_statements(&mut self, _: StatColumns, _: i64) -> AdvisorResult<Vec<StatementStats>> {
            Ok(Vec::new())
        }
    }

    fn candidate() -> CompositeIndexCandidate {
        synthesize(
            &[ColumnRef::new("a")],
            &[],
            &[OrderColumn::desc(ColumnRef::new("b"))],
            "orders",
        )
    }

    #[tokio::test]
    async fn test_skipped_without_capability() {
        let mut backend = Hypo::default();
        let outcome = validate(&mut backend, &candidate(), "select 1", false).await;
        assert_eq!(outcome, ValidationOutcome::Unavailable);
        assert!(outcome.is_skipped());
        assert_eq!(backend.resets, 0);
        assert!(backend.created.is_empty());
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_index_used() {
        let mut backend = Hypo {
            index_in_plan: true,
            ..Hypo::default()
        };
        let outcome = validate(&mut backend, &candidate(), "select * from orders", true).await;
        let result = outcome.result().unwrap();
        assert!(matches!(outcome, ValidationOutcome::Validated(_)));
        assert_eq!(result.hypothetical_index.as_deref(), Some("<1>btree_orders_a"));
        assert!(result.plan_uses_index);
        assert_eq!(backend.created, vec!["CREATE INDEX ON orders (a, b DESC)"]);
        assert_eq!(backend.explained, vec!["EXPLAIN (FORMAT JSON) select * from orders"]);
        assert_eq!(backend.resets, 1);
    }

    #[tokio::test]
    async fn test_index_not_used() {
        let mut backend = Hypo::default();
        let outcome = validate(&mut backend, &candidate(), "select * from orders", true).await;
        assert!(!outcome.result().unwrap().plan_uses_index);
        assert_eq!(backend.resets, 1);
    }

    #[tokio::test]
    async fn test_create_failure_still_resets() {
        let mut backend = Hypo {
            fail_create: true,
            ..Hypo::default()
        };
        let outcome = validate(&mut backend, &candidate(), "select 1", true).await;
        let result = outcome.result().unwrap();
        assert!(matches!(outcome, ValidationOutcome::Failed(_)));
        assert!(result.diagnostic.as_deref().unwrap().contains("hypopg_create_index failed"));
        assert!(backend.explained.is_empty());
        assert_eq!(backend.resets, 1);
    }

    #[tokio::test]
    async fn test_explain_failure_keeps_index_name() {
        let mut backend = Hypo {
            fail_explain: true,
            ..Hypo::default()
        };
        let outcome = validate(&mut backend, &candidate(), "select 1", true).await;
        let result = outcome.result().unwrap();
        assert_eq!(result.hypothetical_index.as_deref(), Some("<1>btree_orders_a"));
        assert!(!result.plan_uses_index);
        assert!(result.diagnostic.is_some());
        assert_eq!(backend.resets, 1);
    }

    #[tokio::test]
    async fn test_reset_failure_is_reported() {
        let mut backend = Hypo {
            fail_create: true,
            fail_reset: true,
            ..Hypo::default()
        };
        let outcome = validate(&mut backend, &candidate(), "select 1", true).await;
        let diagnostic = outcome.result().unwrap().diagnostic.clone().unwrap();
        assert_eq!(
            diagnostic,
            "Database error: hypopg_create_index failed; reset failed: Database error: reset refused"
        );
    }

    #[test]
    fn test_check_failed_is_not_skipped() {
        let outcome = ValidationOutcome::check_failed("hypopg", "connection reset");
        assert!(!outcome.is_skipped());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "hypopg_index": null,
                "plan_uses_index": false,
                "hypopg_error": "could not check for hypopg: connection reset"
            })
        );
        assert_eq!(serde_json::to_value(ValidationOutcome::NotRequested).unwrap(), json!({}));
    }

    #[test]
    fn test_serialized_field_names() {
        let outcome = ValidationOutcome::Validated(ValidationResult {
            hypothetical_index: Some("<7>btree_t_a".into()),
            plan_uses_index: true,
            diagnostic: None,
        });
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "hypopg_index": "<7>btree_t_a", "plan_uses_index": true })
        );
    }
}
