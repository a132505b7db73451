//! Rank aggregation tables.
//!
//! A quantity logged by a distributed run has one row per rank for every
//! `(run_id, step)`. Referencing `$quantity.aggregator` collapses those rows
//! into a temporary table with one row per `(run_id, step)`, built on first
//! use and reused for the rest of the session.

use std::collections::HashMap;

use crate::error::{RunalyzerError, RunalyzerResult};
use crate::lexer::is_identifier;
use crate::storage::Storage;

/// Name of the aggregation table for `(quantity, aggregator)`.
pub fn table_name(quantity: &str, aggregator: &str) -> String {
    format!("rankagg_{}_{}", aggregator, quantity)
}

/// Cache of the rank aggregation tables built in this session.
///
/// An entry exists exactly when both the table and its index were created.
#[derive(Debug, Default)]
pub struct RankAggregates {
    tables: HashMap<(String, String), String>,
    /// Lowercased table name to the pair that owns it.
    owners: HashMap<String, (String, String)>,
}

impl RankAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the aggregation table for `(quantity, aggregator)`, creating it
    /// in `storage` if this session has not built it yet.
    pub fn ensure_table<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        quantity: &str,
        aggregator: &str,
    ) -> RunalyzerResult<String> {
        if let Some(name) = self
            .tables
            .get(&(quantity.to_string(), aggregator.to_string()))
        {
            return Ok(name.clone());
        }

        for ident in [quantity, aggregator] {
            if !is_identifier(ident) {
                return Err(RunalyzerError::InvalidIdentifier(ident.to_string()));
            }
        }

        let name = table_name(quantity, aggregator);
        let key = name.to_lowercase();
        if let Some((q, a)) = self.owners.get(&key) {
            return Err(RunalyzerError::TableNameCollision {
                table: name,
                existing: format!("${}.{}", q, a),
                requested: format!("${}.{}", quantity, aggregator),
            });
        }

        tracing::info!(table = %name, "building temporary rank aggregation table");

        storage.execute(
            &format!(
                "create temporary table {} as select run_id, step, {}(value) as value \
                 from {} group by run_id, step",
                name, aggregator, quantity
            ),
            &[],
        )?;

        if let Err(e) = storage.execute(
            &format!("create index {}_run_step on {} (run_id, step)", name, name),
            &[],
        ) {
            if let Err(drop_err) = storage.execute(&format!("drop table if exists {}", name), &[]) {
                tracing::warn!(table = %name, error = %drop_err, "failed to drop half-built table");
            }
            return Err(e);
        }

        self.tables.insert(
            (quantity.to_string(), aggregator.to_string()),
            name.clone(),
        );
        self.owners
            .insert(key, (quantity.to_string(), aggregator.to_string()));
        Ok(name)
    }

    /// Whether the table for `(quantity, aggregator)` has been built.
    pub fn contains(&self, quantity: &str, aggregator: &str) -> bool {
        self.tables
            .contains_key(&(quantity.to_string(), aggregator.to_string()))
    }

    /// Number of tables built so far.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
