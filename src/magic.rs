//! Magic column resolution.
//!
//! Rewrites `$quantity` and `$quantity.aggregator` references into column
//! references on the tables that the join plan will bring into scope, and
//! collects the distinct references in order of first appearance.

use serde::Serialize;
use std::fmt;

use crate::error::RunalyzerResult;
use crate::lexer::{tokenize, TokenKind};

/// A `$quantity` or `$quantity.aggregator` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MagicColumn {
    pub quantity: String,
    /// Rank aggregator, e.g. `avg`. `None` for per-rank values.
    pub aggregator: Option<String>,
}

impl MagicColumn {
    /// A per-rank reference to `quantity`.
    pub fn plain(quantity: impl Into<String>) -> Self {
        Self {
            quantity: quantity.into(),
            aggregator: None,
        }
    }

    /// A reference to `quantity` aggregated over ranks with `aggregator`.
    pub fn aggregated(quantity: impl Into<String>, aggregator: impl Into<String>) -> Self {
        Self {
            quantity: quantity.into(),
            aggregator: Some(aggregator.into()),
        }
    }

    pub fn is_rank_aggregated(&self) -> bool {
        self.aggregator.is_some()
    }

    /// The name this column's table is known by inside the rewritten query.
    pub fn alias(&self) -> String {
        match &self.aggregator {
            Some(agg) => format!("{}_{}", agg, self.quantity),
            None => self.quantity.clone(),
        }
    }

    /// The select-list expression that replaces the reference.
    pub fn select_expr(&self) -> String {
        format!("{}.value AS {}", self.alias(), self.quantity)
    }
}

impl fmt::Display for MagicColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.aggregator {
            Some(agg) => write!(f, "${}.{}", self.quantity, agg),
            None => write!(f, "${}", self.quantity),
        }
    }
}

/// Distinct magic columns in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnSet {
    columns: Vec<MagicColumn>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. Returns `false` if it was already present.
    pub fn insert(&mut self, column: MagicColumn) -> bool {
        if self.columns.contains(&column) {
            return false;
        }
        self.columns.push(column);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &MagicColumn> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<MagicColumn> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = MagicColumn>>(iter: I) -> Self {
        let mut set = ColumnSet::new();
        for column in iter {
            set.insert(column);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ColumnSet {
    type Item = &'a MagicColumn;
    type IntoIter = std::slice::Iter<'a, MagicColumn>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

/// Result of resolving a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Query text with every magic reference replaced.
    pub sql: String,
    pub columns: ColumnSet,
    /// The query names its own FROM clause and was left untouched.
    pub passthrough: bool,
}

/// Whether a query already carries its own FROM clause and no `$$` marker.
///
/// `$$` inside string literals, quoted identifiers and comments is not a
/// marker.
pub fn has_explicit_from(query: &str) -> RunalyzerResult<bool> {
    if !query.to_uppercase().contains("FROM") {
        return Ok(false);
    }
    if !query.contains("$$") {
        return Ok(true);
    }
    Ok(!tokenize(query)?
        .iter()
        .any(|t| t.kind == TokenKind::Marker))
}

/// Resolve the magic references in `query`.
///
/// Queries with an explicit FROM clause and no `$$` marker are returned
/// unchanged with an empty column set.
pub fn resolve(query: &str) -> RunalyzerResult<Resolved> {
    if has_explicit_from(query)? {
        return Ok(Resolved {
            sql: query.to_string(),
            columns: ColumnSet::new(),
            passthrough: true,
        });
    }

    let mut sql = String::with_capacity(query.len());
    let mut columns = ColumnSet::new();

    for token in tokenize(query)? {
        match token.kind {
            TokenKind::Magic {
                quantity,
                aggregator,
            } => {
                let column = MagicColumn {
                    quantity: quantity.to_string(),
                    aggregator: aggregator.map(str::to_string),
                };
                sql.push_str(&column.select_expr());
                columns.insert(column);
            }
            _ => sql.push_str(token.text),
        }
    }

    Ok(Resolved {
        sql,
        columns,
        passthrough: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunalyzerError;

    #[test]
    fn test_plain_column() {
        let resolved = resolve("select $walltime").unwrap();
        assert_eq!(resolved.sql, "select walltime.value AS walltime");
        assert_eq!(
            resolved.columns.iter().cloned().collect::<Vec<_>>(),
            vec![MagicColumn::plain("walltime")]
        );
        assert!(!resolved.passthrough);
    }

    #[test]
    fn test_aggregated_column() {
        let resolved = resolve("select $dt.max").unwrap();
        assert_eq!(resolved.sql, "select max_dt.value AS dt");
        assert_eq!(
            resolved.columns.iter().next(),
            Some(&MagicColumn::aggregated("dt", "max"))
        );
    }

    #[test]
    fn test_duplicates_collapse() {
        let resolved = resolve("select $t.avg where $t.avg > 5").unwrap();
        assert_eq!(resolved.columns.len(), 1);
        assert_eq!(
            resolved.sql,
            "select avg_t.value AS t where avg_t.value AS t > 5"
        );
    }

    #[test]
    fn test_discovery_order() {
        let resolved = resolve("select $b, $a.sum, $b, $a").unwrap();
        let order: Vec<String> = resolved.columns.iter().map(|c| c.to_string()).collect();
        assert_eq!(order, vec!["$b", "$a.sum", "$a"]);
    }

    #[test]
    fn test_explicit_from_is_untouched() {
        let query = "select $x from runs where 'cost' > $1";
        let resolved = resolve(query).unwrap();
        assert_eq!(resolved.sql, query);
        assert!(resolved.columns.is_empty());
        assert!(resolved.passthrough);
    }

    #[test]
    fn test_explicit_from_check_is_case_insensitive() {
        assert!(has_explicit_from("select 1 From runs").unwrap());
        assert!(!has_explicit_from("select $t").unwrap());
    }

    #[test]
    fn test_quoted_marker_keeps_explicit_from() {
        assert!(has_explicit_from("select dirname from runs where dirname <> '$$'").unwrap());
        assert!(has_explicit_from("select id from runs -- $$ here").unwrap());
        assert!(!has_explicit_from("select $t $$ where x in (select id from runs)").unwrap());

        let query = "select dirname from runs where dirname <> '$$'";
        let resolved = resolve(query).unwrap();
        assert_eq!(resolved.sql, query);
        assert!(resolved.passthrough);
    }

    #[test]
    fn test_marker_disables_short_circuit() {
        let resolved = resolve("select $t $$ where runs.dirname like 'from%'").unwrap();
        assert!(!resolved.passthrough);
        assert_eq!(resolved.columns.len(), 1);
    }

    #[test]
    fn test_reference_inside_literal_is_kept() {
        let resolved = resolve("select $t where name = '$t'").unwrap();
        assert_eq!(resolved.sql, "select t.value AS t where name = '$t'");
    }

    #[test]
    fn test_malformed_aggregator_fails_fast() {
        let err = resolve("select $t.").unwrap_err();
        assert!(matches!(err, RunalyzerError::MalformedAggregator { .. }));
    }

    #[test]
    fn test_column_set_from_iter_dedups() {
        let set: ColumnSet = vec![
            MagicColumn::plain("a"),
            MagicColumn::plain("a"),
            MagicColumn::aggregated("a", "max"),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }
}
