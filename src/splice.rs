//! FROM clause splicing.
//!
//! Places a synthesized FROM clause into query text. A `$$` marker says
//! exactly where it goes; without one, the clause goes in front of the first
//! clause keyword that must follow FROM, or at the end of the query.

use crate::error::{RunalyzerError, RunalyzerResult};
use crate::lexer::{tokenize, TokenKind};

/// Keywords that introduce a clause after FROM.
pub const CLAUSE_KEYWORDS: &[&str] = &[
    "UNION",
    "INTERSECT",
    "EXCEPT",
    "WHERE",
    "GROUP",
    "HAVING",
    "ORDER",
    "LIMIT",
];

/// Where the FROM clause goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplicePoint {
    /// Replace the `$$` marker spanning `start..end`.
    Marker { start: usize, end: usize },
    /// Insert before the clause keyword (or `;`) at this offset.
    Before(usize),
    /// Append to the end of the query.
    End,
}

/// Find the splice point in `query`.
pub fn find_splice_point(query: &str) -> RunalyzerResult<SplicePoint> {
    let tokens = tokenize(query)?;

    let markers: Vec<_> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Marker)
        .collect();
    match markers.as_slice() {
        [] => {}
        [marker] => {
            return Ok(SplicePoint::Marker {
                start: marker.start,
                end: marker.end(),
            });
        }
        _ => {
            return Err(RunalyzerError::AmbiguousSplicePoint {
                count: markers.len(),
            });
        }
    }

    let first_clause = tokens.iter().find(|t| {
        t.kind == TokenKind::Semicolon || CLAUSE_KEYWORDS.iter().any(|kw| t.is_keyword(kw))
    });

    Ok(match first_clause {
        Some(token) => SplicePoint::Before(token.start),
        None => SplicePoint::End,
    })
}

/// Insert `from_clause` into `query`.
pub fn splice(query: &str, from_clause: &str) -> RunalyzerResult<String> {
    Ok(match find_splice_point(query)? {
        SplicePoint::Marker { start, end } => {
            format!("{} {} {}", &query[..start], from_clause, &query[end..])
        }
        SplicePoint::Before(at) => {
            let head = &query[..at];
            let sep = if head.is_empty() || head.ends_with(char::is_whitespace) {
                ""
            } else {
                " "
            };
            format!("{}{}{}{}", head, sep, from_clause, &query[at..])
        }
        SplicePoint::End => format!("{} {}", query, from_clause),
    })
}
