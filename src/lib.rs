//! # runalyzer: shorthand SQL for simulation run databases
//!
//! A run database holds one row per simulation run in `runs`, the list of
//! logged quantities in `quantities`, and one table per quantity shaped
//! `(run_id, step, rank, value)`. Joining those by hand for every question
//! is tedious; runalyzer lets you name the quantities and writes the joins.
//!
//! ## Quick Example
//!
//! ```
//! use runalyzer::prelude::*;
//!
//! let storage = SqliteStorage::open_in_memory().unwrap();
//! let mut session = Session::new(storage, Mode::Expanded);
//!
//! let rewrite = session.mangle_sql("select $walltime").unwrap();
//! assert_eq!(
//!     rewrite.sql,
//!     "select walltime.value AS walltime from runs inner join walltime on (walltime.run_id = runs.id) "
//! );
//!
//! // Aggregation tables live as long as the session and are built once.
//! session
//!     .storage_mut()
//!     .execute("create table walltime (run_id, step, rank, value)", &[])
//!     .unwrap();
//! let first = session.mangle_sql("select $walltime.max").unwrap();
//! let second = session.mangle_sql("select $walltime.max").unwrap();
//! assert_eq!(first, second);
//! assert_eq!(session.aggregates().len(), 1);
//! ```
//!
//! ## Syntax
//!
//! | Token        | Meaning                                           |
//! |--------------|---------------------------------------------------|
//! | `$name`      | per-rank values of quantity `name`                |
//! | `$name.agg`  | values of `name` aggregated over ranks with `agg` |
//! | `$$`         | where the generated FROM clause goes              |
//!
//! Queries that already contain `FROM` and no `$$` are left alone.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod functions;
pub mod join;
pub mod lexer;
pub mod magic;
pub mod output;
pub mod repl;
pub mod session;
pub mod splice;
pub mod storage;

pub mod prelude {
    pub use crate::aggregate::RankAggregates;
    pub use crate::config::Config;
    pub use crate::error::*;
    pub use crate::join::{build_from_clause, JoinPlan};
    pub use crate::magic::{resolve, ColumnSet, MagicColumn};
    pub use crate::output::{render_table, to_json, OutputFormat};
    pub use crate::session::{Mode, Rewrite, Session};
    pub use crate::splice::splice;
    pub use crate::storage::{QueryResult, SqliteStorage, Storage, Value};
}
