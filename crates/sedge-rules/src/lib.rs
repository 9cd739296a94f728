//! Sedge rule parser, expression tree, and direct backtracking walker.
//!
//! A rule set is line-oriented source (`pattern => replacement`) parsed
//! into an arena [`Tree`] of typed nodes. The walker executes the tree
//! directly and is the reference implementation for the table transformer
//! in `sedge-table`; both must produce identical output on any input.

pub mod ast;
mod context;
mod error;
mod formula;
mod parser;
mod walker;

pub use ast::{Node, NodeId, Tree};
pub use context::{Context, ParamGuard, RuntimeInfo};
pub use error::{ParseError, ParseResult};
pub use formula::{Formula, FormulaExpr, FormulaSide};
pub use parser::{parse_rules, RuleSet};
pub use walker::Walker;
