//! Predicate and ordering extraction.
//!
//! A lightweight regex scanner, not a SQL grammar. It isolates the
//! `where` clause, every join `on` condition and the `order by` list,
//! then classifies `column operator` pairs:
//!
//! | Operator            | Class    |
//! |---------------------|----------|
//! | `=`, `in`, `is`     | equality |
//! | `>`, `<`, `>=`, `<=`| range    |
//!
//! Nested subqueries, CTEs and quoted identifiers containing keyword-like
//! text are not understood. Callers only depend on [`PredicateExtractor`],
//! so the scanner can be swapped for a real parser without touching
//! synthesis or validation.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

use crate::normalize::normalize;

/// Words that can sit in front of an operator without being a column.
const NON_COLUMN_WORDS: &[&str] = &[
    "and", "or", "not", "where", "on", "when", "then", "else", "case", "having", "select", "by",
    "with",
];

/// A column name, optionally qualified by a table or alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// Unqualified column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    /// Split a dotted reference such as `o.id` or `"public"."orders"."id"`.
    /// Only the segment in front of the column is kept as qualifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw
            .trim()
            .split('.')
            .map(|p| p.trim_matches('"'))
            .filter(|p| !p.is_empty())
            .collect();

        match parts.as_slice() {
            [] => None,
            [name] => Some(Self::new(*name)),
            [.., qualifier, name] => Some(Self::qualified(*qualifier, *name)),
        }
    }

    /// The same column with its qualifier dropped.
    pub fn bare(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl Serialize for ColumnRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Sort direction of an `order by` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn from_keyword(word: Option<&str>) -> Self {
        match word {
            Some(w) if w.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }
}

/// One `order by` term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OrderColumn {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

impl OrderColumn {
    pub fn asc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: SortDirection::Desc,
        }
    }
}

/// Columns found in filters and ordering, each list deduplicated in
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredicateSets {
    #[serde(rename = "eq_cols")]
    pub equality: Vec<ColumnRef>,
    #[serde(rename = "range_cols")]
    pub range: Vec<ColumnRef>,
    #[serde(rename = "order_cols")]
    pub order: Vec<OrderColumn>,
}

impl PredicateSets {
    pub fn is_empty(&self) -> bool {
        self.equality.is_empty() && self.range.is_empty() && self.order.is_empty()
    }

    fn add_equality(&mut self, column: ColumnRef) {
        push_unique(&mut self.equality, column);
    }

    fn add_range(&mut self, column: ColumnRef) {
        push_unique(&mut self.range, column);
    }

    /// Order terms are unique per column; the first direction seen wins.
    fn add_order(&mut self, term: OrderColumn) {
        if !self.order.iter().any(|o| o.column == term.column) {
            self.order.push(term);
        }
    }

    /// Keep only the columns that belong to `scope`, stripped to bare names.
    /// Without a scope every column is kept.
    pub fn scoped(&self, scope: Option<&TableScope>) -> PredicateSets {
        let keep = |c: &ColumnRef| scope.is_none_or(|s| s.retains(c));
        let mut out = PredicateSets::default();

        for c in self.equality.iter().filter(|c| keep(c)) {
            out.add_equality(c.bare());
        }
        for c in self.range.iter().filter(|c| keep(c)) {
            out.add_range(c.bare());
        }
        for o in self.order.iter().filter(|o| keep(&o.column)) {
            out.add_order(OrderColumn {
                column: o.column.bare(),
                direction: o.direction,
            });
        }

        out
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// The table an index is being designed for, plus the name it goes by in
/// the statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableScope {
    pub table: String,
    pub alias: Option<String>,
}

impl TableScope {
    /// Locate `table` in the `from`/`join` list of `sql` and record its alias.
    ///
    /// An alias that is really the next keyword (`from orders where ...`)
    /// falls back to the base table name. `alias` stays `None` when the
    /// table does not appear at all.
    pub fn detect(sql: &str, table: &str) -> Self {
        let alias = FROM_OR_JOIN.captures_iter(sql).find_map(|caps| {
            let whole = caps.get(0)?;
            let found = caps.get(1)?.as_str();
            if !same_table(found, table) {
                return None;
            }
            let alias = TRAILING_ALIAS
                .captures(&sql[whole.end()..])
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|a| !is_alias_keyword(a));
            Some(alias.unwrap_or_else(|| base_name(found)).to_string())
        });

        Self {
            table: table.to_string(),
            alias,
        }
    }

    /// Unqualified columns always belong. Qualified ones belong when the
    /// qualifier is the alias or the base table name, ignoring case.
    pub fn retains(&self, column: &ColumnRef) -> bool {
        match &column.qualifier {
            None => true,
            Some(q) => {
                self.alias
                    .as_deref()
                    .is_some_and(|a| q.eq_ignore_ascii_case(a))
                    || same_table(q, &self.table)
            }
        }
    }
}

/// Last dotted segment with quotes removed: `"public"."Orders"` → `Orders`.
fn base_name(ident: &str) -> &str {
    let ident = ident.trim().trim_matches('"');
    let last = ident.rsplit('.').next().unwrap_or(ident);
    last.trim_matches('"')
}

fn same_table(a: &str, b: &str) -> bool {
    base_name(a).eq_ignore_ascii_case(base_name(b))
}

fn is_alias_keyword(word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "where", "on", "using", "group", "order", "limit", "offset", "union", "intersect",
        "except", "join", "inner", "left", "right", "full", "cross", "natural", "window",
        "having", "values", "returning", "for", "lock", "and", "or", "not", "with",
    ];
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn is_non_column(word: &str) -> bool {
    NON_COLUMN_WORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

static FROM_OR_JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:from|join)\s+([a-z0-9_."]+)"#).expect("static pattern")
});

static TRAILING_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s+(?:as\s+)?([a-z_][a-z0-9_]*)").expect("static pattern")
});

/// Narrow interface over predicate extraction.
pub trait PredicateExtractor {
    /// Clause-aware extraction. Columns keep their qualifiers.
    fn extract(&self, sql: &str) -> PredicateSets;

    /// Looser pass for statements whose clause boundaries were not found.
    /// Results are already scoped and stripped to bare names.
    fn extract_loose(&self, _sql: &str, _scope: Option<&TableScope>) -> PredicateSets {
        PredicateSets::default()
    }
}

/// Clause-aware extraction scoped to a table, falling back to the loose
/// pass when nothing was found. Never fails; an unrecognized statement
/// yields empty sets.
pub fn collect_predicates<E: PredicateExtractor + ?Sized>(
    extractor: &E,
    sql: &str,
    scope: Option<&TableScope>,
) -> PredicateSets {
    let found = extractor.extract(sql).scoped(scope);
    if !found.is_empty() {
        return found;
    }
    extractor.extract_loose(sql, scope)
}

/// Regex scanner over the normalized statement text.
pub struct HeuristicExtractor {
    where_clause: Regex,
    join_condition: Regex,
    comparison: Regex,
    order_clause: Regex,
    order_term: Regex,
    // Loose pass, applied to the raw statement.
    loose_column_pair: Regex,
    loose_column_literal: Regex,
    loose_range: Regex,
    loose_between: Regex,
    loose_order_clause: Regex,
    loose_order_term: Regex,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicExtractor {
    pub fn new() -> Self {
        const IDENT: &str = r#"[a-z_][a-z0-9_."]*"#;
        let re = |pattern: &str| Regex::new(pattern).expect("static pattern");

        Self {
            where_clause: re(r"(?s)\bwhere\b(.+?)(?:\border\b|\blimit\b|$)"),
            join_condition: re(r"(?s)\bon\b\s+(.+?)(?:\bjoin\b|\bwhere\b|$)"),
            comparison: re(r"(?i)([a-z_][\w.]*)\s*(<>|!=|>=|<=|=|\bin\b|\bis\b|>|<)"),
            order_clause: re(r"(?s)\border\s+by\s+(.+?)(?:\blimit\b|$)"),
            order_term: re(r"(?i)^\s*([a-z_][\w.]*)(?:\s+(asc|desc)\b)?"),
            loose_column_pair: re(&format!(r"(?i)({IDENT})\s*=\s*({IDENT})")),
            loose_column_literal: re(&format!(
                r#"(?i)({IDENT})\s*=\s*(?:'[^']*'|\$\d+|\?|\d+(?:\.\d+)?|true|false|null)"#
            )),
            loose_range: re(&format!(r"(?i)({IDENT})\s*(<>|>=|>|<=|<)")),
            loose_between: re(&format!(r"(?i)({IDENT})\s+between\s+")),
            loose_order_clause: re(r"(?is)\border\s+by\s+(.+?)(?:\blimit\b|$)"),
            loose_order_term: re(&format!(r"(?i)^({IDENT})\s*(asc|desc)?")),
        }
    }

    fn order_terms(&self, clause: &str, term_pattern: &Regex) -> Vec<OrderColumn> {
        clause
            .split(',')
            .filter_map(|piece| {
                let caps = term_pattern.captures(piece.trim())?;
                let column = ColumnRef::parse(caps.get(1)?.as_str())?;
                if is_non_column(&column.name) {
                    return None;
                }
                let direction = SortDirection::from_keyword(caps.get(2).map(|m| m.as_str()));
                Some(OrderColumn { column, direction })
            })
            .collect()
    }
}

impl PredicateExtractor for HeuristicExtractor {
    fn extract(&self, sql: &str) -> PredicateSets {
        let text = normalize(sql).into_string();
        let mut sets = PredicateSets::default();

        let mut predicates = String::new();
        if let Some(caps) = self.where_clause.captures(&text) {
            predicates.push_str(&caps[1]);
        }
        for caps in self.join_condition.captures_iter(&text) {
            predicates.push(' ');
            predicates.push_str(&caps[1]);
        }

        for caps in self.comparison.captures_iter(&predicates) {
            let Some(column) = ColumnRef::parse(&caps[1]) else {
                continue;
            };
            if is_non_column(&column.name) {
                continue;
            }
            match caps[2].to_ascii_lowercase().as_str() {
                // Inequality is neither equality nor range.
                "<>" | "!=" => continue,
                "=" | "in" | "is" => sets.add_equality(column),
                _ => sets.add_range(column),
            }
        }

        if let Some(caps) = self.order_clause.captures(&text) {
            for term in self.order_terms(&caps[1], &self.order_term) {
                sets.add_order(term);
            }
        }

        sets
    }

    fn extract_loose(&self, sql: &str, scope: Option<&TableScope>) -> PredicateSets {
        let belongs = |raw: &str| -> Option<ColumnRef> {
            let column = ColumnRef::parse(raw)?;
            if is_non_column(&column.name) {
                return None;
            }
            scope
                .is_none_or(|s| s.retains(&column))
                .then(|| column.bare())
        };
        let mut sets = PredicateSets::default();

        for caps in self.loose_column_pair.captures_iter(sql) {
            let (left, right) = (&caps[1], &caps[2]);
            let picked = match scope {
                Some(_) => belongs(left).or_else(|| belongs(right)),
                None => ColumnRef::parse(left).map(|c| c.bare()),
            };
            if let Some(column) = picked {
                sets.add_equality(column);
            }
        }
        for caps in self.loose_column_literal.captures_iter(sql) {
            if let Some(column) = belongs(&caps[1]) {
                sets.add_equality(column);
            }
        }
        for caps in self
            .loose_range
            .captures_iter(sql)
            .chain(self.loose_between.captures_iter(sql))
        {
            if caps.get(2).is_some_and(|op| op.as_str() == "<>") {
                continue;
            }
            if let Some(column) = belongs(&caps[1]) {
                sets.add_range(column);
            }
        }

        if let Some(caps) = self.loose_order_clause.captures(sql) {
            for term in self.order_terms(&caps[1], &self.loose_order_term) {
                if scope.is_none_or(|s| s.retains(&term.column)) {
                    sets.add_order(OrderColumn {
                        column: term.column.bare(),
                        direction: term.direction,
                    });
                }
            }
        }

        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[ColumnRef]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_dedup_and_classification() {
        let sets = HeuristicExtractor::new().extract("select * from t where a=1 and a=2 and b>1");
        assert_eq!(names(&sets.equality), vec!["a"]);
        assert_eq!(names(&sets.range), vec!["b"]);
        assert!(sets.order.is_empty());
    }

    #[test]
    fn test_in_and_is_are_equality() {
        let sets = HeuristicExtractor::new()
            .extract("select * from t where status in (1, 2) and deleted_at is null and n <= 3");
        assert_eq!(names(&sets.equality), vec!["status", "deleted_at"]);
        assert_eq!(names(&sets.range), vec!["n"]);
    }

    #[test]
    fn test_keyword_prefix_not_a_column() {
        let sets = HeuristicExtractor::new()
            .extract("select * from t where a = 1 and is_active = true and x not in (1)");
        assert_eq!(names(&sets.equality), vec!["a", "is_active"]);
    }

    #[test]
    fn test_where_stops_at_order_and_limit() {
        let sets = HeuristicExtractor::new()
            .extract("SELECT * FROM t WHERE a = 1 ORDER BY b DESC, c LIMIT 10");
        assert_eq!(names(&sets.equality), vec!["a"]);
        assert_eq!(
            sets.order,
            vec![
                OrderColumn::desc(ColumnRef::new("b")),
                OrderColumn::asc(ColumnRef::new("c")),
            ]
        );
    }

    #[test]
    fn test_join_conditions_scanned() {
        let sets = HeuristicExtractor::new().extract(
            "select * from orders o join customers c on c.id = o.customer_id where c.region = 'eu'",
        );
        assert_eq!(names(&sets.equality), vec!["c.region", "c.id"]);
    }

    #[test]
    fn test_literals_do_not_produce_columns() {
        let sets =
            HeuristicExtractor::new().extract("select * from t where note = 'x in y' and k > 2");
        assert_eq!(names(&sets.equality), vec!["note"]);
        assert_eq!(names(&sets.range), vec!["k"]);
    }

    #[test]
    fn test_no_clauses_yields_empty() {
        let sets = HeuristicExtractor::new().extract("select 1");
        assert!(sets.is_empty());
    }

    #[test]
    fn test_scope_alias() {
        let sql = "select * from orders o join customers c on c.id = o.customer_id where o.id = 1";
        let scope = TableScope::detect(sql, "orders");
        assert_eq!(scope.alias.as_deref(), Some("o"));
        assert!(scope.retains(&ColumnRef::qualified("o", "id")));
        assert!(scope.retains(&ColumnRef::qualified("O", "id")));
        assert!(!scope.retains(&ColumnRef::qualified("c", "id")));
        assert!(scope.retains(&ColumnRef::new("id")));
    }

    #[test]
    fn test_scope_keyword_alias_uses_base_name() {
        let scope = TableScope::detect("SELECT * FROM public.orders WHERE id = 1", "orders");
        assert_eq!(scope.alias.as_deref(), Some("orders"));
        assert!(scope.retains(&ColumnRef::qualified("orders", "id")));
    }

    #[test]
    fn test_scope_schema_and_quotes_stripped() {
        let scope = TableScope::detect(r#"select * from "public"."orders" as ord"#, "public.orders");
        assert_eq!(scope.alias.as_deref(), Some("ord"));
        assert!(scope.retains(&ColumnRef::qualified("ORDERS", "total")));
    }

    #[test]
    fn test_scoped_strips_and_dedupes() {
        let sql = "select * from orders o join items i on i.order_id = o.id \
                   where o.id = 1 and i.sku = 'x' and id in (2)";
        let scope = TableScope::detect(sql, "orders");
        let sets = HeuristicExtractor::new().extract(sql).scoped(Some(&scope));
        assert_eq!(names(&sets.equality), vec!["id"]);
    }

    #[test]
    fn test_loose_pass_between_and_order() {
        let extractor = HeuristicExtractor::new();
        let sql = "select * from events e where e.ts BETWEEN $1 AND $2 order by e.ts desc";
        let scope = TableScope::detect(sql, "events");
        let sets = extractor.extract_loose(sql, Some(&scope));
        assert_eq!(names(&sets.range), vec!["ts"]);
        assert_eq!(sets.order, vec![OrderColumn::desc(ColumnRef::new("ts"))]);
    }

    #[test]
    fn test_loose_pair_prefers_target_side() {
        let extractor = HeuristicExtractor::new();
        let sql = "select * from a join b on a.x = b.y";
        let scope = TableScope::detect(sql, "b");
        let sets = extractor.extract_loose(sql, Some(&scope));
        assert_eq!(names(&sets.equality), vec!["y"]);
    }

    #[test]
    fn test_collect_falls_back_to_loose() {
        struct NothingFound;
        impl PredicateExtractor for NothingFound {
            fn extract(&self, _sql: &str) -> PredicateSets {
                PredicateSets::default()
            }
            fn extract_loose(&self, _sql: &str, _scope: Option<&TableScope>) -> PredicateSets {
                let mut sets = PredicateSets::default();
                sets.add_equality(ColumnRef::new("fallback"));
                sets
            }
        }
        let sets = collect_predicates(&NothingFound, "select 1", None);
        assert_eq!(names(&sets.equality), vec!["fallback"]);
    }

    #[test]
    fn test_inequality_is_not_a_range() {
        let extractor = HeuristicExtractor::new();
        let sets = extractor.extract("select * from t where status <> 'x' and kind != 'y' and n >= 3");
        assert!(sets.equality.is_empty());
        assert_eq!(sets.range, vec![ColumnRef::new("n")]);

        let loose = extractor.extract_loose("select * from t where status<>'x' and n < 3", None);
        assert_eq!(loose.range, vec![ColumnRef::new("n")]);
    }

    #[test]
    fn test_column_ref_parse() {
        assert_eq!(ColumnRef::parse("o.id"), Some(ColumnRef::qualified("o", "id")));
        assert_eq!(
            ColumnRef::parse(r#""public"."orders"."id""#),
            Some(ColumnRef::qualified("orders", "id"))
        );
        assert_eq!(ColumnRef::parse(""), None);
    }
}
