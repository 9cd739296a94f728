//! Deterministic table transformer.
//!
//! Compiles a sedge rule set into a state machine whose transitions carry
//! the five table actions (append, copy, rename, insert, return), runs it
//! over input in any transform mode, and round-trips it through a
//! line-oriented textual save format. The machine is behaviorally
//! equivalent to the backtracking walker in `sedge-rules` on every input
//! it can be built for; patterns the table cannot express (back-references,
//! zero-length matches) are reported at build time and stay walker-only.

pub mod action;
pub mod build;
pub mod run;
pub mod state;
pub mod text;
pub mod transformer;

pub use action::Action;
pub use build::{build, BuildError, MAX_STATES};
pub use run::{run, Session};
pub use state::{ExprId, Link, Machine, MachineStats, Repl, ReplPart, State, StateKind};
pub use text::{load, save, FormatError};
pub use transformer::{fingerprint, visualize, Transformer};
