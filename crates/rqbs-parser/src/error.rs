//! Parser error types

use pest::error::Error as PestError;
use thiserror::Error;

use crate::parser::Rule;

/// Result type for parse operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Parse error type
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] Box<PestError<Rule>>),

    #[error("Invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("Invalid escape sequence: {0}")]
    InvalidEscape(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),
}

impl ParseError {
    /// Byte offset of the error in the source, when known
    pub fn offset(&self) -> Option<usize> {
        match self {
            ParseError::Syntax(err) => Some(match err.location {
                pest::error::InputLocation::Pos(pos) => pos,
                pest::error::InputLocation::Span((start, _)) => start,
            }),
            _ => None,
        }
    }
}

impl From<PestError<Rule>> for ParseError {
    fn from(err: PestError<Rule>) -> Self {
        ParseError::Syntax(Box::new(err))
    }
}
