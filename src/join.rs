//! Join synthesis.
//!
//! Builds the FROM clause that brings every magic column into scope:
//! the `runs` table, then one inner join per column in discovery order.
//!
//! ```text
//! from runs
//!   inner join walltime on (walltime.run_id = runs.id)
//!   inner join rankagg_max_dt as max_dt on (max_dt.run_id = runs.id and walltime.step = max_dt.step)
//! ```
//!
//! Consecutive per-rank tables are also aligned on `rank`; aggregated tables
//! have no rank column.

use std::collections::HashSet;

use crate::aggregate::RankAggregates;
use crate::error::{RunalyzerError, RunalyzerResult};
use crate::lexer::is_identifier;
use crate::magic::ColumnSet;
use crate::storage::Storage;

/// One joined table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEntry {
    /// Physical table name.
    pub table: String,
    /// Name the table is referenced by in the query.
    pub alias: String,
    /// Contents of the `on (...)` clause.
    pub predicate: String,
    pub rank_aggregated: bool,
}

impl JoinEntry {
    /// The table reference after `inner join`.
    pub fn source(&self) -> String {
        if self.table == self.alias {
            self.table.clone()
        } else {
            format!("{} as {}", self.table, self.alias)
        }
    }
}

/// Ordered joins for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPlan {
    entries: Vec<JoinEntry>,
}

impl JoinPlan {
    /// Plan the joins for `columns`, building any aggregation tables they need.
    pub fn build<S: Storage + ?Sized>(
        columns: &ColumnSet,
        aggregates: &mut RankAggregates,
        storage: &mut S,
    ) -> RunalyzerResult<Self> {
        let mut aliases = HashSet::new();
        for column in columns {
            let names = std::iter::once(&column.quantity).chain(column.aggregator.as_ref());
            for name in names {
                if !is_identifier(name) {
                    return Err(RunalyzerError::InvalidIdentifier(name.clone()));
                }
            }

            let alias = column.alias();
            if !aliases.insert(alias.to_lowercase()) {
                return Err(RunalyzerError::DuplicateAlias(alias));
            }
        }

        let mut entries: Vec<JoinEntry> = Vec::with_capacity(columns.len());
        for column in columns {
            let alias = column.alias();
            let table = match &column.aggregator {
                Some(agg) => aggregates.ensure_table(storage, &column.quantity, agg)?,
                None => column.quantity.clone(),
            };
            let rank_aggregated = column.is_rank_aggregated();

            let mut predicate = format!("{}.run_id = runs.id", alias);
            if let Some(prev) = entries.last() {
                predicate.push_str(&format!(" and {}.step = {}.step", prev.alias, alias));
                if !rank_aggregated && !prev.rank_aggregated {
                    predicate.push_str(&format!(" and {}.rank = {}.rank", prev.alias, alias));
                }
            }

            entries.push(JoinEntry {
                table,
                alias,
                predicate,
                rank_aggregated,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[JoinEntry] {
        &self.entries
    }

    /// Render the FROM clause.
    pub fn to_from_clause(&self) -> String {
        let mut sql = String::from("from runs ");
        for entry in &self.entries {
            sql.push_str(&format!(
                "inner join {} on ({}) ",
                entry.source(),
                entry.predicate
            ));
        }
        sql
    }
}

/// Build the FROM clause for `columns`.
pub fn build_from_clause<S: Storage + ?Sized>(
    columns: &ColumnSet,
    aggregates: &mut RankAggregates,
    storage: &mut S,
) -> RunalyzerResult<String> {
    Ok(JoinPlan::build(columns, aggregates, storage)?.to_from_clause())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::RecordingStorage;
    use crate::magic::MagicColumn;
    use pretty_assertions::assert_eq;

    fn plan(columns: Vec<MagicColumn>) -> (String, RecordingStorage) {
        let mut storage = RecordingStorage::default();
        let mut aggs = RankAggregates::new();
        let set: ColumnSet = columns.into_iter().collect();
        let sql = build_from_clause(&set, &mut aggs, &mut storage).unwrap();
        (sql, storage)
    }

    #[test]
    fn test_single_plain_column() {
        let (sql, storage) = plan(vec![MagicColumn::plain("walltime")]);
        assert_eq!(
            sql,
            "from runs inner join walltime on (walltime.run_id = runs.id) "
        );
        assert!(storage.statements.is_empty());
    }

    #[test]
    fn test_empty_set() {
        let (sql, _) = plan(vec![]);
        assert_eq!(sql, "from runs ");
    }

    #[test]
    fn test_aggregated_column_uses_alias() {
        let (sql, storage) = plan(vec![MagicColumn::aggregated("t", "avg")]);
        assert_eq!(
            sql,
            "from runs inner join rankagg_avg_t as avg_t on (avg_t.run_id = runs.id) "
        );
        assert_eq!(storage.statements.len(), 2);
    }

    #[test]
    fn test_two_plain_columns_align_step_and_rank() {
        let (sql, _) = plan(vec![MagicColumn::plain("a"), MagicColumn::plain("b")]);
        assert_eq!(
            sql,
            "from runs inner join a on (a.run_id = runs.id) \
             inner join b on (b.run_id = runs.id and a.step = b.step and a.rank = b.rank) "
        );
    }

    #[test]
    fn test_plain_then_aggregated_has_no_rank() {
        let (sql, _) = plan(vec![
            MagicColumn::plain("a"),
            MagicColumn::aggregated("b", "max"),
        ]);
        assert_eq!(
            sql,
            "from runs inner join a on (a.run_id = runs.id) \
             inner join rankagg_max_b as max_b on (max_b.run_id = runs.id and a.step = max_b.step) "
        );
    }

    #[test]
    fn test_aggregated_then_plain_has_no_rank() {
        let (sql, _) = plan(vec![
            MagicColumn::aggregated("b", "max"),
            MagicColumn::plain("a"),
        ]);
        assert!(!sql.contains(".rank"));
        assert!(sql.ends_with("inner join a on (a.run_id = runs.id and max_b.step = a.step) "));
    }

    #[test]
    fn test_step_chains_to_previous_entry() {
        let (sql, _) = plan(vec![
            MagicColumn::plain("a"),
            MagicColumn::plain("b"),
            MagicColumn::plain("c"),
        ]);
        assert!(sql.contains("b.step = c.step and b.rank = c.rank"));
        assert!(!sql.contains("a.step = c.step"));
    }

    #[test]
    fn test_deterministic() {
        let columns = vec![
            MagicColumn::plain("a"),
            MagicColumn::aggregated("b", "sum"),
            MagicColumn::plain("c"),
        ];
        let (first, _) = plan(columns.clone());
        let (second, _) = plan(columns);
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_alias_is_rejected() {
        let mut storage = RecordingStorage::default();
        let mut aggs = RankAggregates::new();
        let set: ColumnSet = vec![
            MagicColumn::aggregated("t", "avg"),
            MagicColumn::plain("avg_t"),
        ]
        .into_iter()
        .collect();
        let err = JoinPlan::build(&set, &mut aggs, &mut storage).unwrap_err();
        assert!(matches!(err, RunalyzerError::DuplicateAlias(ref a) if a == "avg_t"));
        assert!(storage.statements.is_empty());
    }

    #[test]
    fn test_plain_quantity_must_be_identifier() {
        let mut storage = RecordingStorage::default();
        let mut aggs = RankAggregates::new();
        let set: ColumnSet = vec![
            MagicColumn::aggregated("t", "max"),
            MagicColumn::plain("x; drop table runs"),
        ]
        .into_iter()
        .collect();
        let err = build_from_clause(&set, &mut aggs, &mut storage).unwrap_err();
        assert!(matches!(err, RunalyzerError::InvalidIdentifier(ref n) if n == "x; drop table runs"));
        assert!(storage.statements.is_empty());
        assert!(aggs.is_empty());
    }

    #[test]
    fn test_entries_expose_tables() {
        let mut storage = RecordingStorage::default();
        let mut aggs = RankAggregates::new();
        let set: ColumnSet = vec![MagicColumn::aggregated("t", "min")].into_iter().collect();
        let plan = JoinPlan::build(&set, &mut aggs, &mut storage).unwrap();
        assert_eq!(plan.entries()[0].table, "rankagg_min_t");
        assert_eq!(plan.entries()[0].alias, "min_t");
        assert!(plan.entries()[0].rank_aggregated);
    }
}
