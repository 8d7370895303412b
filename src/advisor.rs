//! Advisor operations.
//!
//! Ties the pure analysis (extraction, synthesis, plan walking) to a
//! [`Backend`]. Each operation returns a serializable report; soft
//! failures are carried inside the report rather than returned as errors.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{Backend, ExplainOptions};
use crate::error::AdvisorResult;
use crate::extract::{
    collect_predicates, HeuristicExtractor, PredicateExtractor, PredicateSets, TableScope,
};
use crate::plan::{root_plan, PlanSummary};
use crate::session::HYPOPG;
use crate::synthesize::{synthesize_from, CompositeIndexCandidate};
use crate::validate::{validate, ValidationOutcome};

/// Result of [`explain`].
#[derive(Debug, Clone, Serialize)]
pub struct ExplainReport {
    pub plan: Value,
    pub summary: PlanSummary,
}

/// Plan `sql` and summarize where the cost or time goes.
pub async fn explain<B: Backend + ?Sized>(
    backend: &mut B,
    sql: &str,
    options: ExplainOptions,
) -> AdvisorResult<ExplainReport> {
    let plan = backend.explain_json(sql, options).await?;
    let summary = PlanSummary::from_root(root_plan(&plan)?, options.analyze);
    Ok(ExplainReport { plan, summary })
}

/// What was detected in the sample statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    #[serde(flatten)]
    pub predicates: PredicateSets,
    pub target_alias: Option<String>,
}

/// One proposed index, with validation fields when validation ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    #[serde(flatten)]
    pub candidate: CompositeIndexCandidate,
    #[serde(flatten)]
    pub validation: ValidationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexSuggestions {
    pub explanation: Vec<Explanation>,
    pub suggestions: Vec<Suggestion>,
}

/// Arguments for [`Advisor::index_suggestions`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub table: Option<String>,
    pub sample_sql: Option<String>,
    pub validate_with_hypopg: bool,
}

impl IndexRequest {
    pub fn new(table: impl Into<String>, sample_sql: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            sample_sql: Some(sample_sql.into()),
            validate_with_hypopg: true,
        }
    }

    pub fn without_validation(mut self) -> Self {
        self.validate_with_hypopg = false;
        self
    }
}

/// Offline part of an index suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub explanation: Explanation,
    pub candidate: Option<CompositeIndexCandidate>,
}

/// Index advisor over a pluggable predicate extractor.
pub struct Advisor {
    extractor: Box<dyn PredicateExtractor + Send + Sync>,
}

impl Default for Advisor {
    fn default() -> Self {
        Self::new(HeuristicExtractor::new())
    }
}

impl Advisor {
    pub fn new(extractor: impl PredicateExtractor + Send + Sync + 'static) -> Self {
        Self {
            extractor: Box::new(extractor),
        }
    }

    /// Extract and synthesize without touching the database.
    ///
    /// A candidate is only produced when a table is given and at least one
    /// of its columns was found.
    pub fn propose(&self, table: Option<&str>, sql: &str) -> Proposal {
        let sql = sql.trim();
        let table = table.map(str::trim).filter(|t| !t.is_empty());
        let scope = table.map(|t| TableScope::detect(sql, t));
        let predicates = collect_predicates(self.extractor.as_ref(), sql, scope.as_ref());

        let candidate = table
            .map(|t| synthesize_from(&predicates, t))
            .filter(|c| !c.is_empty());

        Proposal {
            explanation: Explanation {
                predicates,
                target_alias: scope.and_then(|s| s.alias),
            },
            candidate,
        }
    }

    /// Propose a composite index for `request.table` from the sample
    /// statement, validating it with hypothetical indexes when asked and
    /// when the session supports them.
    pub async fn index_suggestions<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        request: &IndexRequest,
    ) -> IndexSuggestions {
        let Some(sql) = request.sample_sql.as_deref().filter(|s| !s.is_empty()) else {
            return IndexSuggestions::default();
        };

        let proposal = self.propose(request.table.as_deref(), sql);
        debug!("Index proposal: {:?}", proposal.candidate);

        let mut report = IndexSuggestions {
            explanation: vec![proposal.explanation],
            suggestions: Vec::new(),
        };

        if let Some(candidate) = proposal.candidate {
            let validation = if request.validate_with_hypopg {
                match backend.has_extension(HYPOPG).await {
                    Ok(available) => validate(backend, &candidate, sql.trim(), available).await,
                    Err(e) => {
                        warn!("Could not check for {}: {}", HYPOPG, e);
                        ValidationOutcome::check_failed(HYPOPG, e)
                    }
                }
            } else {
                ValidationOutcome::NotRequested
            };
            report.suggestions.push(Suggestion {
                candidate,
                validation,
            });
        }

        report
    }
}
