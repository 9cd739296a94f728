//! The runtime template embedded in every generated module.
//!
//! A generated module is self-contained: it carries its own transition
//! context and scan driver, mirroring `sedge_table::run` in Function
//! mode, and calls into the generated `step`/`kind`/`expr_*` functions.
//! The template references an `IGNORE_WS` constant that the emitter
//! writes ahead of it.

pub const RUNTIME: &str = r#"use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Failure modes of the generated transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// No rule matched; carries the output committed before the failure.
    MatchFailed { position: usize, flushed: String },
    /// The cancellation flag was set.
    Cancelled,
}

enum Kind {
    Scan,
    Accept,
    Dead(usize),
}

/// Committed output, pending chunks, and the variable scope stack.
#[derive(Default)]
struct Ctx {
    committed: String,
    chunks: Vec<String>,
    scopes: Vec<BTreeMap<String, String>>,
    raw: String,
    inserted: bool,
}

impl Ctx {
    fn begin(&mut self) {
        self.scopes.push(BTreeMap::new());
        self.raw.clear();
    }

    fn end(&mut self) {
        self.scopes.pop();
        self.raw.clear();
    }

    fn depth_index(&self, depth: usize) -> usize {
        (self.scopes.len() - 1).saturating_sub(depth)
    }

    fn get(&self, name: &str) -> &str {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map_or("", String::as_str)
    }

    fn append(&mut self, depth: usize, name: &str, item: Option<char>) {
        let idx = self.depth_index(depth);
        let slot = self.scopes[idx].entry(name.to_string()).or_default();
        if let Some(c) = item {
            slot.push(c);
        }
    }

    fn copy(&mut self, depth: usize, src: &str, dst: &str) {
        let idx = self.depth_index(depth);
        let value = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(src))
            .cloned();
        match value {
            Some(value) => {
                self.scopes[idx].insert(dst.to_string(), value);
            }
            None => {
                self.scopes[idx].remove(dst);
            }
        }
    }

    fn rename(&mut self, src: &str, dst: &str) {
        let holder = self
            .scopes
            .iter()
            .rposition(|scope| !src.is_empty() && scope.contains_key(src));
        match holder {
            Some(idx) => {
                let value = self.scopes[idx].remove(src).unwrap_or_default();
                self.scopes[idx].insert(dst.to_string(), value);
            }
            None => {
                if let Some(idx) = self.scopes.iter().rposition(|s| s.contains_key(dst)) {
                    self.scopes[idx].remove(dst);
                }
            }
        }
    }

    fn insert(&mut self, remove: usize, text: String) {
        for _ in 0..remove {
            self.chunks.pop();
        }
        self.chunks.push(text);
        self.inserted = true;
    }

    fn ret(&mut self, keep: usize) {
        while self.chunks.len() > keep {
            let chunk = self.chunks.remove(0);
            self.committed.push_str(&chunk);
        }
    }

    fn commit_all(&mut self) {
        self.ret(0);
    }
}

/// Transform `input`, failing on the first position no rule matches.
pub fn transform(input: &str, cancelled: &AtomicBool) -> Result<String, TransformError> {
    let syms: Vec<Option<char>> = input.chars().map(Some).chain([None]).collect();
    let n = syms.len() - 1;
    let mut ctx = Ctx {
        scopes: vec![BTreeMap::new()],
        ..Ctx::default()
    };
    let mut pos = 0usize;
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(TransformError::Cancelled);
        }
        if IGNORE_WS {
            while pos < n {
                match syms[pos] {
                    Some(c) if c.is_whitespace() => pos += 1,
                    _ => break,
                }
            }
        }
        let mut state = 0usize;
        let mut cursor = pos;
        let mut accept_end = None;
        let mut accepted = false;
        ctx.begin();
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err(TransformError::Cancelled);
            }
            if cursor > n {
                break;
            }
            let sym = syms[cursor];
            if let Some(c) = sym {
                ctx.raw.push(c);
            }
            ctx.inserted = false;
            let Some(next) = step(state, sym, &mut ctx) else {
                break;
            };
            if ctx.inserted {
                accept_end = Some(cursor + 1);
            }
            cursor += 1;
            state = next;
            match kind(state) {
                Kind::Scan => {}
                Kind::Accept => {
                    accepted = true;
                    break;
                }
                Kind::Dead(rollback) => {
                    cursor = cursor.saturating_sub(rollback);
                    break;
                }
            }
        }
        if accepted {
            ctx.commit_all();
            ctx.end();
            pos = cursor;
            if pos > n {
                break;
            }
            continue;
        }
        if let Some(end) = accept_end {
            ctx.commit_all();
            ctx.end();
            pos = end;
            if pos > n {
                break;
            }
            continue;
        }
        ctx.end();
        if pos >= n {
            break;
        }
        return Err(TransformError::MatchFailed {
            position: pos,
            flushed: ctx.committed,
        });
    }
    Ok(ctx.committed)
}"#;
