//! Query sessions.
//!
//! A [`Session`] owns the storage connection and the rank aggregation cache,
//! and runs the rewrite pipeline:
//!
//! ```text
//! query ──► resolve ──► JoinPlan::build ──► splice ──► storage.execute
//!              │              │
//!              │              └── RankAggregates::ensure_table
//!              └── ColumnSet
//! ```
//!
//! Every operation takes `&mut self`, so checking the cache and creating a
//! table happen under one exclusive borrow. To share a session between
//! threads, put it behind a `Mutex`.

use serde::{Deserialize, Serialize};

use crate::aggregate::RankAggregates;
use crate::error::RunalyzerResult;
use crate::join::JoinPlan;
use crate::magic::{resolve, ColumnSet};
use crate::splice::splice;
use crate::storage::{QueryResult, Storage, Value};

/// How queries are treated before execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Queries run exactly as written.
    Literal,
    /// Magic columns are expanded and a FROM clause is synthesized.
    #[default]
    Expanded,
}

/// A rewritten query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rewrite {
    pub sql: String,
    /// Resolved magic columns, in order of first appearance.
    pub columns: ColumnSet,
}

/// A session over one run database.
pub struct Session<S: Storage> {
    storage: S,
    mode: Mode,
    aggregates: RankAggregates,
}

impl<S: Storage> Session<S> {
    pub fn new(storage: S, mode: Mode) -> Self {
        Self {
            storage,
            mode,
            aggregates: RankAggregates::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Rewrite `query` according to the session mode.
    ///
    /// In [`Mode::Expanded`] this may create rank aggregation tables.
    pub fn mangle_sql(&mut self, query: &str) -> RunalyzerResult<Rewrite> {
        match self.mode {
            Mode::Literal => Ok(Rewrite {
                sql: query.to_string(),
                columns: ColumnSet::new(),
            }),
            Mode::Expanded => self.expand(query),
        }
    }

    fn expand(&mut self, query: &str) -> RunalyzerResult<Rewrite> {
        let resolved = resolve(query)?;
        if resolved.passthrough {
            return Ok(Rewrite {
                sql: resolved.sql,
                columns: resolved.columns,
            });
        }

        let plan = JoinPlan::build(&resolved.columns, &mut self.aggregates, &mut self.storage)?;
        let sql = splice(&resolved.sql, &plan.to_from_clause())?;
        tracing::debug!(input = %query, output = %sql, "rewrote query");

        Ok(Rewrite {
            sql,
            columns: resolved.columns,
        })
    }

    /// Rewrite and execute `query` with positional parameters.
    pub fn q(&mut self, query: &str, params: &[Value]) -> RunalyzerResult<QueryResult> {
        let rewrite = self.mangle_sql(query)?;
        self.storage.execute(&rewrite.sql, params)
    }

    /// Names of the run properties (the columns of `runs`), sorted.
    pub fn run_properties(&mut self) -> RunalyzerResult<Vec<String>> {
        let mut columns = self
            .storage
            .execute("select * from runs limit 0", &[])?
            .columns;
        columns.sort();
        Ok(columns)
    }

    /// All declared quantities, ordered by name.
    pub fn quantities(&mut self) -> RunalyzerResult<QueryResult> {
        self.storage
            .execute("select * from quantities order by name", &[])
    }

    pub fn aggregates(&self) -> &RankAggregates {
        &self.aggregates
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::RecordingStorage;
    use crate::error::RunalyzerError;
    use pretty_assertions::assert_eq;

    fn session() -> Session<RecordingStorage> {
        Session::new(RecordingStorage::default(), Mode::Expanded)
    }

    #[test]
    fn test_plain_query_end_to_end() {
        let mut s = session();
        let rewrite = s.mangle_sql("select $walltime").unwrap();
        assert_eq!(
            rewrite.sql,
            "select walltime.value AS walltime from runs inner join walltime on (walltime.run_id = runs.id) "
        );
        assert_eq!(rewrite.columns.len(), 1);
    }

    #[test]
    fn test_aggregated_query_deduplicates_join() {
        let mut s = session();
        let rewrite = s.mangle_sql("select $t.avg where $t.avg > 5").unwrap();
        assert_eq!(
            rewrite.sql,
            "select avg_t.value AS t from runs inner join rankagg_avg_t as avg_t \
             on (avg_t.run_id = runs.id) where avg_t.value AS t > 5"
        );
        assert_eq!(rewrite.sql.matches("inner join").count(), 1);
        assert_eq!(s.storage().statements.len(), 2);
    }

    #[test]
    fn test_aggregation_table_reused_across_queries() {
        let mut s = session();
        s.mangle_sql("select $t.avg").unwrap();
        s.mangle_sql("select $t.avg, $u where $u > 1").unwrap();
        assert_eq!(s.storage().statements.len(), 2);
        assert_eq!(s.aggregates().len(), 1);
    }

    #[test]
    fn test_explicit_from_is_unchanged() {
        let mut s = session();
        let query = "select $x from runs where id = $1";
        let rewrite = s.mangle_sql(query).unwrap();
        assert_eq!(rewrite.sql, query);
        assert!(rewrite.columns.is_empty());
    }

    #[test]
    fn test_marker_splice() {
        let mut s = session();
        let rewrite = s
            .mangle_sql("select $walltime $$ where runs.id in (select id from runs)")
            .unwrap();
        assert_eq!(
            rewrite.sql,
            "select walltime.value AS walltime  from runs inner join walltime \
             on (walltime.run_id = runs.id)   where runs.id in (select id from runs)"
        );
    }

    #[test]
    fn test_literal_mode_skips_rewriting() {
        let mut s = Session::new(RecordingStorage::default(), Mode::Literal);
        let rewrite = s.mangle_sql("select $t.avg").unwrap();
        assert_eq!(rewrite.sql, "select $t.avg");
        assert!(s.storage().statements.is_empty());
    }

    #[test]
    fn test_q_executes_rewritten_sql() {
        let mut s = session();
        s.q("select $dt", &[]).unwrap();
        assert_eq!(
            s.storage().statements,
            vec!["select dt.value AS dt from runs inner join dt on (dt.run_id = runs.id) ".to_string()]
        );
    }

    #[test]
    fn test_failed_table_creation_propagates() {
        let mut s = Session::new(
            RecordingStorage {
                fail_on: Some("nosuch(".to_string()),
                ..Default::default()
            },
            Mode::Expanded,
        );
        let err = s.mangle_sql("select $t.nosuch").unwrap_err();
        assert!(matches!(err, RunalyzerError::Execution(_)));
        assert!(s.aggregates().is_empty());
    }

    #[test]
    fn test_ambiguous_marker_is_rejected() {
        let mut s = session();
        let err = s.mangle_sql("select $t $$ union select $t $$").unwrap_err();
        assert!(matches!(err, RunalyzerError::AmbiguousSplicePoint { count: 2 }));
    }

    #[test]
    fn test_mode_from_config_string() {
        let mode: Mode = serde_json::from_str("\"literal\"").unwrap();
        assert_eq!(mode, Mode::Literal);
        assert_eq!(Mode::default(), Mode::Expanded);
    }
}
