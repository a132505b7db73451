//! Query lexer using nom.
//!
//! Splits query text into a flat stream of tokens. The lexer does not parse
//! SQL; it only knows enough to keep string literals, quoted identifiers and
//! comments opaque, so that keyword scanning and `$` references never match
//! inside them.
//!
//! ```text
//! select $walltime, $dt.max where id = 'a $b' $$
//! ──┬─── ────┬────  ───┬─── ──┬──    ┬ ──┬─── ┬─
//!   │        │         │      │      │   │    └── Marker
//!   │        │         │      │      │   └── StringLiteral (opaque)
//!   │        │         │      │      └── Punct
//!   │        │         │      └── Word
//!   │        │         └── Magic (rank-aggregated)
//!   │        └── Magic (plain)
//!   └── Word
//! ```
//!
//! Concatenating the `text` of every token reproduces the input exactly.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1},
    character::complete::{anychar, char, multispace1, not_line_ending, satisfy},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::error::{RunalyzerError, RunalyzerResult};

/// Classification of a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Whitespace,
    /// A run of letters, digits and underscores (keywords and identifiers).
    Word,
    StringLiteral,
    QuotedIdentifier,
    Comment,
    /// A `$quantity` or `$quantity.aggregator` reference.
    Magic {
        quantity: &'a str,
        aggregator: Option<&'a str>,
    },
    /// The explicit `$$` splice marker.
    Marker,
    Semicolon,
    Punct,
}

/// A token with its byte offset into the lexed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub start: usize,
    pub text: &'a str,
}

impl Token<'_> {
    /// Byte offset one past the end of this token.
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Whether this token is the given keyword, compared case-insensitively.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

#[derive(Debug, Clone)]
enum Lexeme<'a> {
    Token(TokenKind<'a>),
    /// `$quantity.` with no identifier after the dot.
    DanglingAggregator(&'a str),
}

/// Tokenize query text.
pub fn tokenize(input: &str) -> RunalyzerResult<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let start = input.len() - rest.len();
        let (remaining, lexeme) = lexeme(rest)
            .map_err(|e| RunalyzerError::parse(start, format!("Lex failed: {:?}", e)))?;
        let text = &rest[..rest.len() - remaining.len()];

        match lexeme {
            Lexeme::Token(kind) => tokens.push(Token { kind, start, text }),
            Lexeme::DanglingAggregator(quantity) => {
                return Err(RunalyzerError::malformed(start, quantity));
            }
        }
        rest = remaining;
    }

    Ok(tokens)
}

/// Parse one lexeme. Always consumes at least one character of non-empty input.
fn lexeme(input: &str) -> IResult<&str, Lexeme<'_>> {
    alt((
        value(Lexeme::Token(TokenKind::Whitespace), multispace1),
        value(Lexeme::Token(TokenKind::Comment), line_comment),
        value(Lexeme::Token(TokenKind::Comment), block_comment),
        value(Lexeme::Token(TokenKind::StringLiteral), string_literal),
        value(Lexeme::Token(TokenKind::QuotedIdentifier), quoted_identifier),
        value(Lexeme::Token(TokenKind::Marker), tag("$$")),
        map(magic_reference, |(quantity, suffix)| match suffix {
            None => Lexeme::Token(TokenKind::Magic {
                quantity,
                aggregator: None,
            }),
            Some(Some(aggregator)) => Lexeme::Token(TokenKind::Magic {
                quantity,
                aggregator: Some(aggregator),
            }),
            Some(None) => Lexeme::DanglingAggregator(quantity),
        }),
        value(Lexeme::Token(TokenKind::Word), word),
        value(Lexeme::Token(TokenKind::Semicolon), char(';')),
        value(Lexeme::Token(TokenKind::Punct), anychar),
    ))(input)
}

/// Parse an identifier: an ASCII letter followed by letters, digits or underscores.
pub fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic()),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Whether `name` is exactly one identifier.
pub fn is_identifier(name: &str) -> bool {
    matches!(identifier(name), Ok(("", _)))
}

/// Parse `$quantity` with an optional `.aggregator` suffix.
///
/// The inner option is `None` when a dot follows the quantity but no
/// identifier follows the dot.
fn magic_reference(input: &str) -> IResult<&str, (&str, Option<Option<&str>>)> {
    preceded(
        char('$'),
        pair(identifier, opt(preceded(char('.'), opt(identifier)))),
    )(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("--"), not_line_ending))(input)
}

fn block_comment(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Parse a single-quoted string literal, where `''` is an escaped quote.
fn string_literal(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('\''),
        many0(alt((tag("''"), is_not("'")))),
        char('\''),
    ))(input)
}

/// Parse a double-quoted identifier, where `""` is an escaped quote.
fn quoted_identifier(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('"'),
        many0(alt((tag("\"\""), is_not("\"")))),
        char('"'),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_plain_reference() {
        assert_eq!(
            kinds("select $walltime"),
            vec![
                TokenKind::Word,
                TokenKind::Whitespace,
                TokenKind::Magic {
                    quantity: "walltime",
                    aggregator: None
                },
            ]
        );
    }

    #[test]
    fn test_aggregated_reference() {
        let tokens = tokenize("$dt.max").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(
            tokens[0].kind,
            TokenKind::Magic {
                quantity: "dt",
                aggregator: Some("max")
            }
        );
        assert_eq!(tokens[0].text, "$dt.max");
    }

    #[test]
    fn test_tokens_cover_input() {
        let input = "select $t.avg, 'it''s' -- note\n/* x */ \"Q\" where a=$1;";
        let rebuilt: String = tokenize(input).unwrap().iter().map(|t| t.text).collect();
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn test_offsets() {
        let tokens = tokenize("ab $$ ;").unwrap();
        let marker = tokens.iter().find(|t| t.kind == TokenKind::Marker).unwrap();
        assert_eq!(marker.start, 3);
        assert_eq!(marker.end(), 5);
        let semi = tokens.last().unwrap();
        assert_eq!(semi.kind, TokenKind::Semicolon);
        assert_eq!(semi.start, 6);
    }

    #[test]
    fn test_string_literal_is_opaque() {
        let tokens = tokenize("'where $x'").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
    }

    #[test]
    fn test_escaped_quote_in_literal() {
        let tokens = tokenize("'it''s where' x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "'it''s where'");
    }

    #[test]
    fn test_comments_are_opaque() {
        assert_eq!(
            kinds("-- where $x\n"),
            vec![TokenKind::Comment, TokenKind::Whitespace]
        );
        assert_eq!(kinds("/* $$ */"), vec![TokenKind::Comment]);
    }

    #[test]
    fn test_positional_parameter_is_not_magic() {
        assert_eq!(kinds("$1"), vec![TokenKind::Punct, TokenKind::Word]);
    }

    #[test]
    fn test_dangling_aggregator() {
        let err = tokenize("select $walltime. where").unwrap_err();
        assert!(matches!(
            err,
            RunalyzerError::MalformedAggregator { position: 7, ref quantity } if quantity == "walltime"
        ));
    }

    #[test]
    fn test_numeric_aggregator_is_malformed() {
        assert!(tokenize("$t.5").is_err());
    }

    #[test]
    fn test_keyword_match() {
        let tokens = tokenize("Where").unwrap();
        assert!(tokens[0].is_keyword("WHERE"));
        assert!(!tokens[0].is_keyword("WHERES"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("walltime"));
        assert!(is_identifier("t_2"));
        assert!(!is_identifier("2t"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a b"));
    }
}
