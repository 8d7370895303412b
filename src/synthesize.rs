//! Composite index synthesis.
//!
//! Orders candidate columns as equality → range → order by:
//!
//! 1. Equality predicates narrow the index scan to the smallest range first.
//! 2. Range predicates then bound one contiguous scan inside it.
//! 3. Trailing sort columns let the index deliver rows already ordered,
//!    with no separate sort step.
//!
//! A column already placed by an earlier group is never repeated.

use serde::Serialize;

use crate::extract::{ColumnRef, OrderColumn, PredicateSets, SortDirection};

/// Trait for rendering a definition as SQL text.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

/// A proposed composite index on one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeIndexCandidate {
    pub table: String,
    /// Final column list; descending order columns carry a ` DESC` suffix.
    #[serde(rename = "columns_ordered")]
    pub columns: Vec<String>,
    #[serde(rename = "create_index_sql")]
    pub create_statement: String,
}

impl CompositeIndexCandidate {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl ToSql for CompositeIndexCandidate {
    fn to_sql(&self) -> String {
        self.create_statement.clone()
    }
}

/// Build the ordered column list and its `CREATE INDEX` text.
///
/// Columns compare by name, so qualified inputs should already be
/// stripped (see [`PredicateSets::scoped`]). The statement is only
/// rendered, never executed.
///
/// # Example
///
/// ```
/// use pgadvise::extract::{ColumnRef, OrderColumn};
/// use pgadvise::synthesize::synthesize;
///
/// let idx = synthesize(
///     &[ColumnRef::new("a")],
///     &[ColumnRef::new("b")],
///     &[OrderColumn::desc(ColumnRef::new("c"))],
///     "t",
/// );
/// assert_eq!(idx.columns, vec!["a", "b", "c DESC"]);
/// assert_eq!(idx.create_statement, "CREATE INDEX ON t (a, b, c DESC)");
/// ```
pub fn synthesize(
    equality: &[ColumnRef],
    range: &[ColumnRef],
    order: &[OrderColumn],
    table: &str,
) -> CompositeIndexCandidate {
    let mut placed: Vec<&str> = Vec::new();
    let mut columns: Vec<String> = Vec::new();

    for col in equality.iter().chain(range) {
        if !placed.contains(&col.name.as_str()) {
            placed.push(&col.name);
            columns.push(col.name.clone());
        }
    }

    for term in order {
        let name = term.column.name.as_str();
        if placed.contains(&name) {
            continue;
        }
        placed.push(name);
        columns.push(match term.direction {
            SortDirection::Desc => format!("{} DESC", name),
            SortDirection::Asc => name.to_string(),
        });
    }

    let create_statement = format!("CREATE INDEX ON {} ({})", table, columns.join(", "));

    CompositeIndexCandidate {
        table: table.to_string(),
        columns,
        create_statement,
    }
}

/// [`synthesize`] over a whole predicate set.
pub fn synthesize_from(sets: &PredicateSets, table: &str) -> CompositeIndexCandidate {
    synthesize(&sets.equality, &sets.range, &sets.order, table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<ColumnRef> {
        names.iter().map(|n| ColumnRef::new(*n)).collect()
    }

    #[test]
    fn test_ordering_law() {
        let idx = synthesize(
            &cols(&["a"]),
            &cols(&["b"]),
            &[OrderColumn::desc(ColumnRef::new("c"))],
            "t",
        );
        assert_eq!(idx.columns, vec!["a", "b", "c DESC"]);
    }

    #[test]
    fn test_earlier_group_wins() {
        let idx = synthesize(
            &cols(&["a", "b"]),
            &cols(&["b", "c"]),
            &[
                OrderColumn::desc(ColumnRef::new("a")),
                OrderColumn::asc(ColumnRef::new("c")),
                OrderColumn::asc(ColumnRef::new("d")),
            ],
            "t",
        );
        assert_eq!(idx.columns, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ascending_order_has_no_suffix() {
        let idx = synthesize(&[], &[], &[OrderColumn::asc(ColumnRef::new("x"))], "t");
        assert_eq!(idx.columns, vec!["x"]);
        assert_eq!(idx.to_sql(), "CREATE INDEX ON t (x)");
    }

    #[test]
    fn test_create_statement_keeps_table_text() {
        let idx = synthesize(&cols(&["tenant_id", "id"]), &[], &[], "public.orders");
        assert_eq!(
            idx.create_statement,
            "CREATE INDEX ON public.orders (tenant_id, id)"
        );
    }

    #[test]
    fn test_empty_input() {
        let idx = synthesize(&[], &[], &[], "t");
        assert!(idx.is_empty());
    }
}
