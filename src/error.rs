//! Error types for runalyzer.

use thiserror::Error;

/// The main error type for runalyzer operations.
#[derive(Debug, Error)]
pub enum RunalyzerError {
    /// The query text could not be tokenized.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A `$name.` reference whose aggregator is not an identifier.
    #[error("Malformed aggregator after '${quantity}.' at position {position}")]
    MalformedAggregator { position: usize, quantity: String },

    /// A quantity or aggregator name that cannot be used as an SQL identifier.
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Two distinct (quantity, aggregator) pairs map onto one table name.
    #[error("Table name collision: '{table}' is already used by {existing}, requested for {requested}")]
    TableNameCollision {
        table: String,
        existing: String,
        requested: String,
    },

    /// Two joined tables would share an alias.
    #[error("Duplicate join alias: '{0}'")]
    DuplicateAlias(String),

    /// More than one `$$` marker in a query.
    #[error("Ambiguous splice point: found {count} '$$' markers, expected at most one")]
    AmbiguousSplicePoint { count: usize },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement execution error.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunalyzerError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Create a malformed aggregator error for the reference at `position`.
    pub fn malformed(position: usize, quantity: impl Into<String>) -> Self {
        Self::MalformedAggregator {
            position,
            quantity: quantity.into(),
        }
    }
}

/// Result type alias for runalyzer operations.
pub type RunalyzerResult<T> = Result<T, RunalyzerError>;
