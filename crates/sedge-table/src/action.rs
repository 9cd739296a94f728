//! Transition actions.
//!
//! Every side effect of the table machine is one of five actions attached
//! to a transition. Actions read and write the run context's scope stack
//! and pending-chunk list; they never touch the input cursor, so a
//! transition's effect is fully described by its action list.

use crate::state::ExprId;
use sedge_types::Symbol;

/// One side effect executed while a transition consumes a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Append a symbol to a variable. `depth` counts scopes down from the
    /// top; `item` overrides the consumed symbol when present.
    AppendVar {
        depth: u32,
        name: String,
        item: Option<Symbol>,
    },
    /// Copy a variable (resolved top-down across scopes) into `dst` at
    /// `depth`. A missing source removes the destination instead.
    CopyVar {
        depth: u32,
        src: String,
        dst: String,
    },
    /// Move a variable to a new name within the scope that holds it. An
    /// absent source (the empty name included) clears the destination.
    RenameVar { src: String, dst: String },
    /// Pop `remove` pending chunks, render the expression, push the text
    /// as a new pending chunk. This is how a completed match lands: a
    /// longer completion later can still remove it.
    InsertResult { remove: u32, expr: Option<ExprId> },
    /// Commit pending chunks from the bottom until `keep` remain.
    ReturnResult { keep: u32 },
}

impl Action {
    /// Opcode letter used by the save format and the visualizer.
    pub fn opcode(&self) -> char {
        match self {
            Action::AppendVar { .. } => 'a',
            Action::CopyVar { .. } => 'c',
            Action::RenameVar { .. } => 'n',
            Action::InsertResult { .. } => 'i',
            Action::ReturnResult { .. } => 'r',
        }
    }
}
