//! Machine-to-source lowering.
//!
//! One `match` arm per state inside `step`, one arm per link ordered the
//! way the interpreter resolves them (hashed single-symbol links first,
//! then the ordered second table), actions translated to statements
//! against the embedded [`crate::runtime`] context, and one `expr_*`
//! function per interned replacement expression.

use crate::error::{CodegenError, CodegenResult};
use crate::runtime::RUNTIME;
use sedge_table::{Action, Machine, Repl, ReplPart, State, StateKind};
use sedge_types::{InputSet, Params, SetKind, Symbol};
use std::fmt::Write;

/// Lower `machine` into a self-contained `pub mod <name>` source unit.
///
/// The generated module depends only on `std` and exposes
/// `transform(input, cancelled)` with the same output as interpreting
/// the machine in `Function` mode.
pub fn generate(machine: &Machine, name: &str) -> CodegenResult<String> {
    validate_name(name)?;
    let mut out = String::new();
    let _ = writeln!(out, "// Generated transformer `{name}`. Do not edit by hand.");
    let _ = writeln!(
        out,
        "#[allow(dead_code, unused_variables, unreachable_patterns)]"
    );
    let _ = writeln!(out, "pub mod {name} {{");
    let ignore_ws = machine.params.get(Params::IGNORE_WS);
    let _ = writeln!(out, "    const IGNORE_WS: bool = {ignore_ws};");
    out.push('\n');
    for line in RUNTIME.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            let _ = writeln!(out, "    {line}");
        }
    }
    out.push('\n');
    emit_kind(&mut out, machine);
    out.push('\n');
    emit_step(&mut out, machine);
    for (idx, repl) in machine.exprs.iter().enumerate() {
        out.push('\n');
        emit_expr(&mut out, idx, repl);
    }
    out.push_str("}\n");
    Ok(out)
}

fn validate_name(name: &str) -> CodegenResult<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(CodegenError::InvalidName(name.to_string()))
    }
}

fn emit_kind(out: &mut String, machine: &Machine) {
    let _ = writeln!(out, "    fn kind(state: usize) -> Kind {{");
    let _ = writeln!(out, "        match state {{");
    for (idx, state) in machine.states.iter().enumerate() {
        match state.kind {
            StateKind::Scan => {}
            StateKind::Accept => {
                let _ = writeln!(out, "            {idx} => Kind::Accept,");
            }
            StateKind::Dead { rollback } => {
                let _ = writeln!(out, "            {idx} => Kind::Dead({rollback}),");
            }
        }
    }
    let _ = writeln!(out, "            _ => Kind::Scan,");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
}

fn emit_step(out: &mut String, machine: &Machine) {
    let _ = writeln!(
        out,
        "    fn step(state: usize, sym: Option<char>, ctx: &mut Ctx) -> Option<usize> {{"
    );
    let _ = writeln!(out, "        match state {{");
    for (idx, state) in machine.states.iter().enumerate() {
        if state.links.is_empty() {
            continue;
        }
        let _ = writeln!(out, "            {idx} => match sym {{");
        for link_idx in link_order(state) {
            let link = &state.links[link_idx];
            let Some(head) = arm_head(&link.set) else {
                continue;
            };
            if link.actions.is_empty() {
                let _ = writeln!(out, "                {head} => Some({}),", link.target);
                continue;
            }
            let _ = writeln!(out, "                {head} => {{");
            for stmt in action_stmts(&link.actions) {
                let _ = writeln!(out, "                    {stmt}");
            }
            let _ = writeln!(out, "                    Some({})", link.target);
            let _ = writeln!(out, "                }}");
        }
        let _ = writeln!(out, "                _ => None,");
        let _ = writeln!(out, "            }},");
    }
    let _ = writeln!(out, "            _ => None,");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
}

/// Links in interpreter resolution order: hashed entries, then the
/// second table front to back.
fn link_order(state: &State) -> Vec<usize> {
    state
        .table
        .values()
        .copied()
        .chain(state.second.iter().copied())
        .collect()
}

/// The pattern (or guarded wildcard) admitting exactly the link's set.
/// Empty include sets admit nothing and produce no arm.
fn arm_head(set: &InputSet) -> Option<String> {
    let pats: Vec<String> = set.values().iter().map(|sym| sym_pattern(*sym)).collect();
    match set.kind() {
        SetKind::Include if pats.is_empty() => None,
        SetKind::Include => Some(pats.join(" | ")),
        SetKind::Exclude if pats.is_empty() => Some("_".to_string()),
        SetKind::Exclude => Some(format!("_ if !matches!(sym, {})", pats.join(" | "))),
        SetKind::Zero => None,
    }
}

fn sym_pattern(sym: Symbol) -> String {
    match sym {
        Symbol::Char(c) => format!("Some({c:?})"),
        Symbol::End => "None".to_string(),
    }
}

fn action_stmts(actions: &[Action]) -> Vec<String> {
    let mut stmts = Vec::new();
    for action in actions {
        match action {
            Action::AppendVar { depth, name, item } => {
                let item = match item {
                    None => "sym".to_string(),
                    Some(Symbol::Char(c)) => format!("Some({c:?})"),
                    Some(Symbol::End) => "None".to_string(),
                };
                stmts.push(format!("ctx.append({depth}, {name:?}, {item});"));
            }
            Action::CopyVar { depth, src, dst } => {
                stmts.push(format!("ctx.copy({depth}, {src:?}, {dst:?});"));
            }
            Action::RenameVar { src, dst } => {
                stmts.push(format!("ctx.rename({src:?}, {dst:?});"));
            }
            Action::InsertResult { remove, expr } => match expr {
                Some(id) => {
                    stmts.push(format!("let text = expr_{}(ctx);", id.0));
                    stmts.push(format!("ctx.insert({remove}, text);"));
                }
                None => stmts.push(format!("ctx.insert({remove}, String::new());")),
            },
            Action::ReturnResult { keep } => stmts.push(format!("ctx.ret({keep});")),
        }
    }
    stmts
}

fn emit_expr(out: &mut String, idx: usize, repl: &Repl) {
    if repl.0.is_empty() {
        let _ = writeln!(out, "    fn expr_{idx}(_ctx: &Ctx) -> String {{");
        let _ = writeln!(out, "        String::new()");
        let _ = writeln!(out, "    }}");
        return;
    }
    let _ = writeln!(out, "    fn expr_{idx}(ctx: &Ctx) -> String {{");
    let _ = writeln!(out, "        let mut out = String::new();");
    for part in &repl.0 {
        match part {
            ReplPart::Lit(text) => {
                let _ = writeln!(out, "        out.push_str({text:?});");
            }
            ReplPart::Var(name) => {
                let _ = writeln!(out, "        out.push_str(ctx.get({name:?}));");
            }
            ReplPart::Consumed => {
                let _ = writeln!(out, "        out.push_str(&ctx.raw);");
            }
        }
    }
    let _ = writeln!(out, "        out");
    let _ = writeln!(out, "    }}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sedge_table::{ExprId, Link};
    use sedge_types::InputSet;

    #[test]
    fn test_validate_name_accepts_identifiers_only() {
        assert!(validate_name("scanner").is_ok());
        assert!(validate_name("_t2").is_ok());
        assert_eq!(
            validate_name("2fast"),
            Err(CodegenError::InvalidName("2fast".into()))
        );
        assert_eq!(
            validate_name("my-mod"),
            Err(CodegenError::InvalidName("my-mod".into()))
        );
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_arm_heads_cover_set_shapes() {
        assert_eq!(
            arm_head(&InputSet::single(Symbol::Char('a'))).unwrap(),
            "Some('a')"
        );
        assert_eq!(
            arm_head(&InputSet::include([Symbol::Char('a'), Symbol::End])).unwrap(),
            "Some('a') | None"
        );
        assert_eq!(
            arm_head(&InputSet::exclude([Symbol::Char('a'), Symbol::End])).unwrap(),
            "_ if !matches!(sym, Some('a') | None)"
        );
        assert_eq!(arm_head(&InputSet::any()).unwrap(), "_");
        assert_eq!(arm_head(&InputSet::include([])), None);
    }

    #[test]
    fn test_char_patterns_are_escaped() {
        assert_eq!(sym_pattern(Symbol::Char('\n')), "Some('\\n')");
        assert_eq!(sym_pattern(Symbol::Char('\'')), "Some('\\'')");
        assert_eq!(sym_pattern(Symbol::End), "None");
    }

    #[test]
    fn test_action_statements() {
        let stmts = action_stmts(&[
            Action::AppendVar {
                depth: 0,
                name: "%r0.x".into(),
                item: None,
            },
            Action::InsertResult {
                remove: 1,
                expr: Some(ExprId(3)),
            },
            Action::ReturnResult { keep: 0 },
        ]);
        assert_eq!(
            stmts,
            vec![
                "ctx.append(0, \"%r0.x\", sym);".to_string(),
                "let text = expr_3(ctx);".to_string(),
                "ctx.insert(1, text);".to_string(),
                "ctx.ret(0);".to_string(),
            ]
        );
    }

    #[test]
    fn test_link_order_hashes_first() {
        let mut state = State::scan();
        state.add_link(Link {
            set: InputSet::exclude([Symbol::End]),
            target: 1,
            actions: Vec::new(),
        });
        state.add_link(Link {
            set: InputSet::single(Symbol::Char('a')),
            target: 2,
            actions: Vec::new(),
        });
        // The hashed single-symbol link resolves ahead of the earlier
        // second-table link, matching the interpreter.
        assert_eq!(link_order(&state), vec![1, 0]);
    }
}
