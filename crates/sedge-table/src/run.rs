//! Machine runtime: the scan driver and the transition context.
//!
//! The driver runs one match attempt at a time from the current scan
//! position. Transitions consume symbols and execute their actions; a
//! completed match lands as a pending chunk that a longer completion in
//! the same attempt may still replace. When the attempt dies, the last
//! pending completion commits and the cursor rewinds to its end; when
//! nothing completed at all, the transform mode decides what happens to
//! the first symbol.

use crate::action::Action;
use crate::state::{ExprId, Machine, ReplPart, StateKind};
use sedge_types::{
    BestTry, CancelToken, Params, Symbol, TransformError, TransformMode, TransformResult, Value,
};
use std::collections::BTreeMap;
use tracing::trace;

/// Mutable state of one transform run: committed output, pending chunks,
/// and the variable scope stack.
///
/// The scope stack always holds the base scope; every attempt pushes a
/// fresh scope on top and pops it when the attempt ends, so capture
/// temporaries never leak between attempts.
pub struct RunContext<'m> {
    machine: &'m Machine,
    committed: String,
    chunks: Vec<String>,
    scopes: Vec<BTreeMap<String, Value>>,
    /// Raw symbols consumed by the current attempt.
    raw: String,
}

impl<'m> RunContext<'m> {
    pub fn new(machine: &'m Machine) -> RunContext<'m> {
        RunContext {
            machine,
            committed: String::new(),
            chunks: Vec::new(),
            scopes: vec![BTreeMap::new()],
            raw: String::new(),
        }
    }

    fn begin_attempt(&mut self) {
        self.scopes.push(BTreeMap::new());
        self.raw.clear();
    }

    fn end_attempt(&mut self) {
        self.scopes.pop();
        self.raw.clear();
    }

    /// Execute one transition's actions against a consumed symbol.
    /// Returns true when an `InsertResult` ran, which marks a completion.
    fn exec(&mut self, actions: &[Action], consumed: Symbol) -> bool {
        if let Symbol::Char(c) = consumed {
            self.raw.push(c);
        }
        let mut inserted = false;
        for action in actions {
            match action {
                Action::AppendVar { depth, name, item } => {
                    self.append_var(*depth, name, item.unwrap_or(consumed));
                }
                Action::CopyVar { depth, src, dst } => self.copy_var(*depth, src, dst),
                Action::RenameVar { src, dst } => self.rename_var(src, dst),
                Action::InsertResult { remove, expr } => {
                    self.insert_result(*remove, *expr);
                    inserted = true;
                }
                Action::ReturnResult { keep } => self.return_result(*keep),
            }
        }
        inserted
    }

    fn scope_index(&self, depth: u32) -> usize {
        (self.scopes.len() - 1).saturating_sub(depth as usize)
    }

    fn append_var(&mut self, depth: u32, name: &str, sym: Symbol) {
        let idx = self.scope_index(depth);
        match self.scopes[idx].get_mut(name) {
            Some(Value::Seq(items)) => items.push(Value::Sym(sym)),
            Some(other) => {
                let prev = std::mem::replace(other, Value::Seq(Vec::new()));
                *other = Value::Seq(vec![prev, Value::Sym(sym)]);
            }
            None => {
                self.scopes[idx].insert(name.to_string(), Value::Sym(sym));
            }
        }
    }

    /// Top-down variable lookup across the scope stack.
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn copy_var(&mut self, depth: u32, src: &str, dst: &str) {
        let idx = self.scope_index(depth);
        match self.lookup(src).cloned() {
            Some(value) => {
                self.scopes[idx].insert(dst.to_string(), value);
            }
            None => {
                self.scopes[idx].remove(dst);
            }
        }
    }

    fn rename_var(&mut self, src: &str, dst: &str) {
        let holder = self
            .scopes
            .iter()
            .rposition(|scope| !src.is_empty() && scope.contains_key(src));
        match holder {
            Some(idx) => {
                let value = self.scopes[idx].remove(src).unwrap_or(Value::Seq(Vec::new()));
                self.scopes[idx].insert(dst.to_string(), value);
            }
            None => {
                // Absent source clears the destination instead.
                if let Some(idx) = self.scopes.iter().rposition(|s| s.contains_key(dst)) {
                    self.scopes[idx].remove(dst);
                }
            }
        }
    }

    fn insert_result(&mut self, remove: u32, expr: Option<ExprId>) {
        for _ in 0..remove {
            self.chunks.pop();
        }
        let text = match expr {
            Some(id) => self.render(id),
            None => String::new(),
        };
        self.chunks.push(text);
    }

    fn render(&self, id: ExprId) -> String {
        let mut out = String::new();
        for part in &self.machine.expr(id).0 {
            match part {
                ReplPart::Lit(text) => out.push_str(text),
                ReplPart::Var(name) => {
                    if let Some(value) = self.lookup(name) {
                        out.push_str(&value.render());
                    }
                }
                ReplPart::Consumed => out.push_str(&self.raw),
            }
        }
        out
    }

    fn return_result(&mut self, keep: u32) {
        while self.chunks.len() > keep as usize {
            let chunk = self.chunks.remove(0);
            self.committed.push_str(&chunk);
        }
    }

    fn commit_all(&mut self) {
        self.return_result(0);
    }
}

/// A streaming transform run.
///
/// Symbols go in one at a time; output committed by a `ReturnResult` on
/// a taken edge comes back from the same `push` call, so the engine
/// never waits for end-of-input unless a match is still open. The
/// machine itself stays read-only and shareable; every piece of mutable
/// state lives here.
pub struct Session<'m> {
    machine: &'m Machine,
    mode: TransformMode,
    cancel: CancelToken,
    ctx: RunContext<'m>,
    syms: Vec<Symbol>,
    best: BestTry,
    /// Scan origin of the current or next attempt.
    pos: usize,
    cursor: usize,
    state: usize,
    accept_end: Option<usize>,
    in_attempt: bool,
    finished: bool,
    /// Length of `ctx.committed` already handed to the caller.
    emitted: usize,
}

impl<'m> Session<'m> {
    pub fn new(machine: &'m Machine, mode: TransformMode, cancel: CancelToken) -> Session<'m> {
        Session {
            machine,
            mode,
            cancel,
            ctx: RunContext::new(machine),
            syms: Vec::new(),
            best: BestTry::default(),
            pos: 0,
            cursor: 0,
            state: Machine::START,
            accept_end: None,
            in_attempt: false,
            finished: false,
            emitted: 0,
        }
    }

    /// Feed one symbol; returns the output this symbol unlocked.
    pub fn push(&mut self, c: char) -> TransformResult<String> {
        self.syms.push(Symbol::Char(c));
        self.advance()?;
        Ok(self.drain())
    }

    /// Feed end-of-source and settle whatever is still open.
    pub fn finish(mut self) -> TransformResult<String> {
        self.syms.push(Symbol::End);
        self.finished = true;
        self.advance()?;
        Ok(self.drain())
    }

    fn drain(&mut self) -> String {
        let text = self.ctx.committed[self.emitted..].to_string();
        self.emitted = self.ctx.committed.len();
        text
    }

    /// Index of the end-of-source sentinel, once known.
    fn end_index(&self) -> Option<usize> {
        self.finished.then(|| self.syms.len() - 1)
    }

    /// Run as far as the buffered symbols allow.
    fn advance(&mut self) -> TransformResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransformError::Cancelled);
            }
            if !self.in_attempt {
                if self.end_index().is_some_and(|n| self.pos > n) {
                    return Ok(());
                }
                if self.machine.params.get(Params::IGNORE_WS) {
                    while self.pos < self.syms.len() {
                        match self.syms[self.pos] {
                            Symbol::Char(c) if c.is_whitespace() => self.pos += 1,
                            _ => break,
                        }
                    }
                }
                if self.pos >= self.syms.len() {
                    return Ok(());
                }
                self.state = Machine::START;
                self.cursor = self.pos;
                self.accept_end = None;
                self.ctx.begin_attempt();
                self.in_attempt = true;
            }

            if self.cursor >= self.syms.len() {
                if self.finished {
                    // Past end-of-source: the attempt cannot extend.
                    self.settle()?;
                    continue;
                }
                return Ok(());
            }
            let sym = self.syms[self.cursor];
            let machine = self.machine;
            let Some(link) = machine.state(self.state).find_link(sym) else {
                self.settle()?;
                continue;
            };
            if self.ctx.exec(&link.actions, sym) {
                self.accept_end = Some(self.cursor + 1);
            }
            self.cursor += 1;
            self.best.improve(BestTry {
                position: self.pos,
                rule: None,
                length: self.cursor - self.pos,
            });
            self.state = link.target;
            match machine.state(self.state).kind {
                StateKind::Scan => {}
                StateKind::Accept => {
                    self.ctx.commit_all();
                    self.ctx.end_attempt();
                    trace!(from = self.pos, to = self.cursor, "match committed");
                    self.pos = self.cursor;
                    self.in_attempt = false;
                }
                StateKind::Dead { rollback } => {
                    self.cursor = self.cursor.saturating_sub(rollback as usize);
                    self.settle()?;
                }
            }
        }
    }

    /// The attempt ended without reaching an accept state: commit the
    /// pending completion if one exists, otherwise fall back per mode.
    fn settle(&mut self) -> TransformResult<()> {
        self.in_attempt = false;
        if let Some(end) = self.accept_end {
            self.ctx.commit_all();
            self.ctx.end_attempt();
            trace!(from = self.pos, to = end, "pending completion committed");
            self.pos = end;
            return Ok(());
        }
        self.ctx.end_attempt();
        if self.end_index().is_some_and(|n| self.pos >= n) {
            self.pos += 1;
            return Ok(());
        }
        match self.mode {
            TransformMode::Reading => self.pos += 1,
            TransformMode::Modification => {
                if let Symbol::Char(c) = self.syms[self.pos] {
                    self.ctx.committed.push(c);
                }
                self.pos += 1;
            }
            TransformMode::Function => {
                return Err(TransformError::MatchFailed {
                    position: self.pos,
                    flushed: self.ctx.committed.clone(),
                    best: Some(self.best),
                });
            }
        }
        Ok(())
    }
}

/// Transform `input` with a compiled machine in one call.
pub fn run(
    machine: &Machine,
    input: &str,
    mode: TransformMode,
    cancel: &CancelToken,
) -> TransformResult<String> {
    let mut session = Session::new(machine, mode, cancel.clone());
    let mut out = String::new();
    for c in input.chars() {
        out.push_str(&session.push(c)?);
    }
    out.push_str(&session.finish()?);
    Ok(out)
}
