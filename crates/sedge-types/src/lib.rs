//! Shared types for the sedge rewriting engine.
//!
//! This crate defines the symbol and bound-value model, the input-set
//! algebra used to partition automaton transitions, the execution
//! parameter bitset, the cancellation token, and the error types shared
//! across the walker and the table transformer.

mod cancel;
mod error;
mod input_set;
mod params;
mod symbol;
mod value;

pub use cancel::CancelToken;
pub use error::{BestTry, TransformError, TransformResult};
pub use input_set::{InputSet, SetKind};
pub use params::Params;
pub use symbol::Symbol;
pub use value::Value;

/// How unmatched input is treated by a transform run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    /// Unmatched symbols are dropped from the output.
    Reading,
    /// Unmatched symbols pass through unchanged.
    #[default]
    Modification,
    /// Unmatched input is fatal; the failure carries the best partial match.
    Function,
}
