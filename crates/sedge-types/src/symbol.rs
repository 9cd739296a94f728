use serde::{Deserialize, Serialize};
use std::fmt;

/// One element of the input stream.
///
/// The end-of-source sentinel is an ordinary symbol: it can be stored in
/// input sets, keyed in transition tables, and matched by `\z` patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// A single character of input.
    Char(char),
    /// Stream exhaustion.
    End,
}

impl Symbol {
    /// True for the end-of-source sentinel.
    pub fn is_end(self) -> bool {
        matches!(self, Symbol::End)
    }

    /// The character payload, if any.
    pub fn as_char(self) -> Option<char> {
        match self {
            Symbol::Char(c) => Some(c),
            Symbol::End => None,
        }
    }
}

impl From<char> for Symbol {
    fn from(c: char) -> Self {
        Symbol::Char(c)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Char(c) => write!(f, "{c}"),
            Symbol::End => write!(f, "<end>"),
        }
    }
}
