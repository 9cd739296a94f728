use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The deepest partial match retained for failure diagnostics.
///
/// Updated monotonically: a shallower try never replaces a deeper one, so
/// a failure report points at the most plausible near-miss rather than the
/// first dead end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BestTry {
    /// Input position where the try began.
    pub position: usize,
    /// Index of the rule that got furthest, if any.
    pub rule: Option<usize>,
    /// How many symbols the try consumed before failing.
    pub length: usize,
}

impl BestTry {
    /// Keep the deeper of the two tries.
    pub fn improve(&mut self, other: BestTry) {
        if other.position + other.length > self.position + self.length {
            *self = other;
        }
    }

    /// One past the last symbol the try consumed.
    pub fn reach(&self) -> usize {
        self.position + self.length
    }
}

/// Run-time transform failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    /// No rule matches at the current position (fatal in `Function` mode).
    /// Carries the output committed before the failure for best-effort
    /// diagnostics.
    #[error("no rule matches at position {position}")]
    MatchFailed {
        position: usize,
        flushed: String,
        best: Option<BestTry>,
    },

    /// A logical variable was assigned twice. Always fatal: it indicates a
    /// malformed rule, never silently ignored.
    #[error("variable '{0}' is already bound")]
    VariableRedefined(String),

    /// The cancellation token fired between symbols.
    #[error("transform cancelled")]
    Cancelled,
}

impl TransformError {
    /// Output committed before the failure, if any.
    pub fn flushed(&self) -> &str {
        match self {
            TransformError::MatchFailed { flushed, .. } => flushed,
            _ => "",
        }
    }
}

/// Result alias for transform runs.
pub type TransformResult<T> = Result<T, TransformError>;
