//! Textual save format.
//!
//! A machine serializes to one header line plus one line per state, in
//! state order (state 0 is the start state):
//!
//! ```text
//! sedge1 <params>
//! +a1{i0,b;r0}      scan state: edges, concatenated
//! =                 accept state
//! 2                 dead state with its rollback length
//! ```
//!
//! An edge is `+` (include) or `-` (exclude), the symbol values (a single
//! alphabetic symbol inline, anything else parenthesized), the target
//! state, and the `;`-joined actions in braces. End-of-source is `\0`;
//! backslash escapes cover the format's own delimiters. Replacement
//! expressions serialize inline in their `i` action: `$name` is a
//! variable, `$.` the consumed text, everything else literal.

use crate::action::Action;
use crate::state::{ExprId, Link, Machine, Repl, ReplPart, State, StateKind};
use sedge_types::{InputSet, Params, SetKind, Symbol};
use std::fmt::Write as _;
use thiserror::Error;

/// A malformed save file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct FormatError {
    pub line: usize,
    pub message: String,
}

impl FormatError {
    fn new(line: usize, message: impl Into<String>) -> FormatError {
        FormatError {
            line,
            message: message.into(),
        }
    }
}

const HEADER: &str = "sedge1";

// ── Saving ──────────────────────────────────────────────────────────────────

/// Render a machine to its textual form.
pub fn save(machine: &Machine) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{HEADER} {}", machine.params.bits());
    for state in &machine.states {
        match state.kind {
            StateKind::Accept => out.push('='),
            StateKind::Dead { rollback } => {
                let _ = write!(out, "{rollback}");
            }
            StateKind::Scan => {
                for link in &state.links {
                    write_link(&mut out, machine, link);
                }
            }
        }
        out.push('\n');
    }
    out
}

fn write_link(out: &mut String, machine: &Machine, link: &Link) {
    match link.set.kind() {
        SetKind::Exclude => out.push('-'),
        _ => out.push('+'),
    }
    let values = link.set.values();
    let inline = link.set.as_single().and_then(|sym| match sym {
        Symbol::Char(c) if c.is_ascii_alphabetic() => Some(c),
        _ => None,
    });
    match inline {
        Some(c) => out.push(c),
        None => {
            out.push('(');
            for &sym in values {
                escape_sym(out, sym);
            }
            out.push(')');
        }
    }
    let _ = write!(out, "{}", link.target);
    out.push('{');
    for (idx, action) in link.actions.iter().enumerate() {
        if idx > 0 {
            out.push(';');
        }
        write_action(out, machine, action);
    }
    out.push('}');
}

/// One action in save-format notation, for the visualizer.
pub(crate) fn action_text(machine: &Machine, action: &Action) -> String {
    let mut out = String::new();
    write_action(&mut out, machine, action);
    out
}

fn write_action(out: &mut String, machine: &Machine, action: &Action) {
    out.push(action.opcode());
    match action {
        Action::AppendVar { depth, name, item } => {
            let _ = write!(out, "{depth},");
            escape_text(out, name);
            if let Some(sym) = item {
                out.push(',');
                escape_sym(out, *sym);
            }
        }
        Action::CopyVar { depth, src, dst } => {
            let _ = write!(out, "{depth},");
            escape_text(out, src);
            out.push(',');
            escape_text(out, dst);
        }
        Action::RenameVar { src, dst } => {
            escape_text(out, src);
            out.push(',');
            escape_text(out, dst);
        }
        Action::InsertResult { remove, expr } => {
            let _ = write!(out, "{remove}");
            if let Some(id) = expr {
                out.push(',');
                for part in &machine.expr(*id).0 {
                    match part {
                        ReplPart::Lit(text) => escape_text(out, text),
                        ReplPart::Var(name) => {
                            out.push('$');
                            out.push_str(name);
                        }
                        ReplPart::Consumed => out.push_str("$."),
                    }
                }
            }
        }
        Action::ReturnResult { keep } => {
            let _ = write!(out, "{keep}");
        }
    }
}

fn escape_sym(out: &mut String, sym: Symbol) {
    match sym {
        Symbol::End => out.push_str("\\0"),
        Symbol::Char('\n') => out.push_str("\\n"),
        Symbol::Char('\r') => out.push_str("\\r"),
        Symbol::Char('\t') => out.push_str("\\t"),
        Symbol::Char(c) if "\\(){};,+-=$".contains(c) => {
            out.push('\\');
            out.push(c);
        }
        Symbol::Char(c) => out.push(c),
    }
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' | ';' | ',' | '}' | '$' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

/// Parse a machine from its textual form.
pub fn load(text: &str) -> Result<Machine, FormatError> {
    let mut lines = text.lines().enumerate();
    let Some((_, header)) = lines.next() else {
        return Err(FormatError::new(1, "empty save file"));
    };
    let params = parse_header(header)?;
    let mut machine = Machine::new(params);

    for (idx, line) in lines {
        let line_no = idx + 1;
        let state = parse_state(line, line_no, &mut machine)?;
        machine.add_state(state);
    }
    if machine.states.is_empty() {
        return Err(FormatError::new(2, "machine has no states"));
    }
    // Link targets may point forward; validate once every state exists.
    let count = machine.states.len();
    for (idx, state) in machine.states.iter().enumerate() {
        for link in &state.links {
            if link.target >= count {
                return Err(FormatError::new(
                    idx + 2,
                    format!("link target {} out of range", link.target),
                ));
            }
        }
    }
    Ok(machine)
}

fn parse_header(line: &str) -> Result<Params, FormatError> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some(HEADER) {
        return Err(FormatError::new(1, "missing sedge1 header"));
    }
    let bits = match parts.next() {
        Some(word) => word
            .parse::<u32>()
            .map_err(|_| FormatError::new(1, "malformed parameter bits"))?,
        None => 0,
    };
    Ok(Params::from_bits(bits))
}

fn parse_state(line: &str, line_no: usize, machine: &mut Machine) -> Result<State, FormatError> {
    if line == "=" {
        return Ok(State::accept());
    }
    if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
        let rollback = line
            .parse::<u32>()
            .map_err(|_| FormatError::new(line_no, "malformed rollback length"))?;
        return Ok(State::dead(rollback));
    }
    let mut state = State::scan();
    let mut cursor = Cursor::new(line, line_no);
    while !cursor.at_end() {
        let link = parse_link(&mut cursor, machine)?;
        state.add_link(link);
    }
    Ok(state)
}

/// Character cursor over one state line.
struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(line: &str, line_no: usize) -> Cursor {
        Cursor {
            chars: line.chars().collect(),
            pos: 0,
            line: line_no,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, message: impl Into<String>) -> FormatError {
        FormatError::new(self.line, message.into())
    }

    fn expect(&mut self, c: char) -> Result<(), FormatError> {
        if self.bump() == Some(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn decimal(&mut self) -> Result<u32, FormatError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a number"));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse().map_err(|_| self.error("number out of range"))
    }

    /// One possibly-escaped symbol.
    fn symbol(&mut self) -> Result<Symbol, FormatError> {
        match self.bump() {
            Some('\\') => match self.bump() {
                Some('0') => Ok(Symbol::End),
                Some('n') => Ok(Symbol::Char('\n')),
                Some('r') => Ok(Symbol::Char('\r')),
                Some('t') => Ok(Symbol::Char('\t')),
                Some(c) => Ok(Symbol::Char(c)),
                None => Err(self.error("dangling escape")),
            },
            Some(c) => Ok(Symbol::Char(c)),
            None => Err(self.error("expected a symbol")),
        }
    }

    /// Text field ending at an unescaped terminator (not consumed).
    fn text_until(&mut self, stop: &[char]) -> Result<String, FormatError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Ok(out),
                Some(c) if stop.contains(&c) => return Ok(out),
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        Some('n') => out.push('\n'),
                        Some('r') => out.push('\r'),
                        Some('t') => out.push('\t'),
                        Some(c) => out.push(c),
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

fn parse_link(cursor: &mut Cursor, machine: &mut Machine) -> Result<Link, FormatError> {
    let exclude = match cursor.bump() {
        Some('+') => false,
        Some('-') => true,
        _ => return Err(cursor.error("expected '+' or '-' edge marker")),
    };
    let mut values = Vec::new();
    if cursor.peek() == Some('(') {
        cursor.pos += 1;
        while cursor.peek() != Some(')') {
            if cursor.at_end() {
                return Err(cursor.error("unclosed symbol set"));
            }
            values.push(cursor.symbol()?);
        }
        cursor.pos += 1;
    } else {
        values.push(cursor.symbol()?);
    }
    let set = if exclude {
        InputSet::exclude(values)
    } else {
        InputSet::include(values)
    };
    let target = cursor.decimal()? as usize;
    cursor.expect('{')?;
    let mut actions = Vec::new();
    while cursor.peek() != Some('}') {
        actions.push(parse_action(cursor, machine)?);
        if cursor.peek() == Some(';') {
            cursor.pos += 1;
        }
    }
    cursor.pos += 1;
    Ok(Link {
        set,
        target,
        actions,
    })
}

fn parse_action(cursor: &mut Cursor, machine: &mut Machine) -> Result<Action, FormatError> {
    match cursor.bump() {
        Some('a') => {
            let depth = cursor.decimal()?;
            cursor.expect(',')?;
            let name = cursor.text_until(&[',', ';', '}'])?;
            let item = if cursor.peek() == Some(',') {
                cursor.pos += 1;
                Some(cursor.symbol()?)
            } else {
                None
            };
            Ok(Action::AppendVar { depth, name, item })
        }
        Some('c') => {
            let depth = cursor.decimal()?;
            cursor.expect(',')?;
            let src = cursor.text_until(&[','])?;
            cursor.expect(',')?;
            let dst = cursor.text_until(&[';', '}'])?;
            Ok(Action::CopyVar { depth, src, dst })
        }
        Some('n') => {
            let src = cursor.text_until(&[','])?;
            cursor.expect(',')?;
            let dst = cursor.text_until(&[';', '}'])?;
            Ok(Action::RenameVar { src, dst })
        }
        Some('i') => {
            let remove = cursor.decimal()?;
            let expr = if cursor.peek() == Some(',') {
                cursor.pos += 1;
                Some(parse_expr(cursor, machine)?)
            } else {
                None
            };
            Ok(Action::InsertResult { remove, expr })
        }
        Some('r') => Ok(Action::ReturnResult {
            keep: cursor.decimal()?,
        }),
        Some(op) => Err(cursor.error(format!("unknown action opcode '{op}'"))),
        None => Err(cursor.error("expected an action")),
    }
}

fn parse_expr(cursor: &mut Cursor, machine: &mut Machine) -> Result<ExprId, FormatError> {
    let mut parts = Vec::new();
    let mut lit = String::new();
    loop {
        match cursor.peek() {
            None | Some(';') | Some('}') => break,
            Some('$') => {
                if !lit.is_empty() {
                    parts.push(ReplPart::Lit(std::mem::take(&mut lit)));
                }
                cursor.pos += 1;
                if cursor.peek() == Some('.') {
                    cursor.pos += 1;
                    parts.push(ReplPart::Consumed);
                } else {
                    let mut name = String::new();
                    while let Some(c) = cursor.peek() {
                        if c.is_alphanumeric() || c == '_' || c == '%' {
                            name.push(c);
                            cursor.pos += 1;
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(cursor.error("expected a variable name after '$'"));
                    }
                    parts.push(ReplPart::Var(name));
                }
            }
            Some('\\') => {
                cursor.pos += 1;
                match cursor.bump() {
                    Some('n') => lit.push('\n'),
                    Some('r') => lit.push('\r'),
                    Some('t') => lit.push('\t'),
                    Some(c) => lit.push(c),
                    None => return Err(cursor.error("dangling escape")),
                }
            }
            Some(c) => {
                lit.push(c);
                cursor.pos += 1;
            }
        }
    }
    if !lit.is_empty() {
        parts.push(ReplPart::Lit(lit));
    }
    Ok(machine.intern_expr(Repl(parts)))
}
