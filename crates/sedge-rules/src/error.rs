//! Rule source parse errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed rule source. Fatal to compilation; surfaced with 1-based
/// line/column so editors can point at the offending character.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("parse error at {line}:{col}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, col: u32, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            col,
            message: message.into(),
        }
    }
}

/// Result alias for rule parsing.
pub type ParseResult<T> = Result<T, ParseError>;
