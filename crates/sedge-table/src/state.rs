//! The compiled machine: states, links, and replacement expressions.
//!
//! A machine is self-contained: replacement expressions live in a flat
//! arena on the machine itself, so a loaded or generated machine needs no
//! access to the rule tree it was compiled from.

use crate::action::Action;
use sedge_types::{InputSet, Params, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handle of a replacement expression in [`Machine::exprs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// One piece of a flattened replacement expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplPart {
    /// Literal text.
    Lit(String),
    /// A variable reference, resolved against the scope stack at render
    /// time.
    Var(String),
    /// The raw symbols consumed by the current attempt.
    Consumed,
}

/// A flattened replacement expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Repl(pub Vec<ReplPart>);

/// A transition: the symbols it covers, its target, and its actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub set: InputSet,
    pub target: usize,
    pub actions: Vec<Action>,
}

/// What entering a state means to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Keep scanning; the links decide what happens next.
    Scan,
    /// The attempt matched and committed; restart at the cursor.
    Accept,
    /// The attempt failed for certain; rewind `rollback` symbols first.
    Dead { rollback: u32 },
}

/// One machine state.
///
/// Links are stored once in `links`; `table` indexes the single-symbol
/// ones by symbol, `second` lists the rest in declaration order. Lookup
/// order is table first, then `second` front to back, and the first link
/// whose set admits the symbol wins, so overlapping sets are resolved by
/// position.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub kind: StateKind,
    pub links: Vec<Link>,
    pub table: BTreeMap<Symbol, usize>,
    pub second: Vec<usize>,
}

impl Default for StateKind {
    fn default() -> StateKind {
        StateKind::Scan
    }
}

impl State {
    pub fn scan() -> State {
        State::default()
    }

    pub fn accept() -> State {
        State {
            kind: StateKind::Accept,
            ..State::default()
        }
    }

    pub fn dead(rollback: u32) -> State {
        State {
            kind: StateKind::Dead { rollback },
            ..State::default()
        }
    }

    /// Register a link, routing it to the hash table when its set is a
    /// single symbol and to the ordered second table otherwise.
    pub fn add_link(&mut self, link: Link) {
        let idx = self.links.len();
        match link.set.as_single() {
            Some(sym) if !self.table.contains_key(&sym) => {
                self.table.insert(sym, idx);
            }
            _ => self.second.push(idx),
        }
        self.links.push(link);
    }

    /// The link taken for `sym`, if any.
    pub fn find_link(&self, sym: Symbol) -> Option<&Link> {
        if let Some(&idx) = self.table.get(&sym) {
            return Some(&self.links[idx]);
        }
        self.second
            .iter()
            .map(|&idx| &self.links[idx])
            .find(|link| link.set.contains(sym))
    }
}

/// A compiled table machine.
#[derive(Debug, Clone, Default)]
pub struct Machine {
    pub states: Vec<State>,
    pub exprs: Vec<Repl>,
    pub params: Params,
}

impl Machine {
    pub fn new(params: Params) -> Machine {
        Machine {
            states: Vec::new(),
            exprs: Vec::new(),
            params,
        }
    }

    /// State 0 is always the scan start state.
    pub const START: usize = 0;

    pub fn add_state(&mut self, state: State) -> usize {
        self.states.push(state);
        self.states.len() - 1
    }

    pub fn state(&self, idx: usize) -> &State {
        &self.states[idx]
    }

    pub fn intern_expr(&mut self, repl: Repl) -> ExprId {
        if let Some(idx) = self.exprs.iter().position(|e| *e == repl) {
            return ExprId(idx as u32);
        }
        self.exprs.push(repl);
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn expr(&self, id: ExprId) -> &Repl {
        &self.exprs[id.0 as usize]
    }

    pub fn stats(&self) -> MachineStats {
        let mut stats = MachineStats {
            states: self.states.len(),
            exprs: self.exprs.len(),
            ..MachineStats::default()
        };
        for state in &self.states {
            stats.links += state.links.len();
            match state.kind {
                StateKind::Accept => stats.accepts += 1,
                StateKind::Dead { .. } => stats.deads += 1,
                StateKind::Scan => {}
            }
            stats.hashed_links += state.table.len();
        }
        stats
    }
}

/// Size summary of a compiled machine, for logs and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineStats {
    pub states: usize,
    pub links: usize,
    /// Links reachable through the per-symbol hash table.
    pub hashed_links: usize,
    pub exprs: usize,
    pub accepts: usize,
    pub deads: usize,
}
