//! Structural tests for generated transformer source: the emitted unit
//! must carry every state, link, action, and expression of the machine.

use sedge_codegen::{generate, CodegenError};
use sedge_rules::parse_rules;
use sedge_table::{build, Machine, StateKind};
use sedge_types::{CancelToken, Params, TransformMode};
use std::process::Command;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn compile(rules: &str) -> Machine {
    compile_with(rules, Params::new())
}

fn compile_with(rules: &str, params: Params) -> Machine {
    build(&parse_rules(rules).expect("rules should parse"), params).expect("table should build")
}

/// Compile the generated module with `rustc` and run it on each input.
/// `None` marks a run that exited with the failure code.
fn run_generated(machine: &Machine, tag: &str, inputs: &[&str]) -> Vec<Option<String>> {
    let mut harness = generate(machine, "scanner").expect("module should generate");
    harness.push_str(concat!(
        "\nfn main() {\n",
        "    let input = std::env::args().nth(1).unwrap_or_default();\n",
        "    let flag = std::sync::atomic::AtomicBool::new(false);\n",
        "    match scanner::transform(&input, &flag) {\n",
        "        Ok(out) => print!(\"{out}\"),\n",
        "        Err(_) => std::process::exit(3),\n",
        "    }\n",
        "}\n",
    ));

    let dir = std::env::temp_dir().join(format!("sedge-codegen-{}-{tag}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    let src = dir.join("main.rs");
    let bin = dir.join("scanner");
    std::fs::write(&src, harness).expect("harness should be writable");
    let status = Command::new("rustc")
        .arg("--edition=2021")
        .arg("-o")
        .arg(&bin)
        .arg(&src)
        .status()
        .expect("rustc should be on the path");
    assert!(status.success(), "generated module failed to compile");

    inputs
        .iter()
        .map(|input| {
            let out = Command::new(&bin)
                .arg(input)
                .output()
                .expect("generated binary should run");
            out.status
                .success()
                .then(|| String::from_utf8(out.stdout).expect("output should be utf-8"))
        })
        .collect()
}

fn assert_runs_like_the_machine(rules: &str, tag: &str, inputs: &[&str]) {
    let machine = compile(rules);
    let got = run_generated(&machine, tag, inputs);
    for (input, got) in inputs.iter().zip(got) {
        let want = sedge_table::run(&machine, input, TransformMode::Function, &CancelToken::new());
        assert_eq!(got, want.ok(), "generated module diverged on {input:?}");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Module shape
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_generated_module_shape() {
    let source = generate(&compile("ab => X"), "scanner").unwrap();
    assert!(source.contains("pub mod scanner {"));
    assert!(source.contains("pub fn transform(input: &str, cancelled: &AtomicBool)"));
    assert!(source.contains("pub enum TransformError {"));
    assert!(source.contains("fn kind(state: usize) -> Kind {"));
    assert!(source.contains("fn step(state: usize, sym: Option<char>, ctx: &mut Ctx)"));
    assert!(source.ends_with("}\n"));
}

#[test]
fn test_every_linked_state_gets_a_match_arm() {
    let rules = "abc => W\nbaab => P\nab => X\nac => Y\naa => Z\nba => U\ncb => Q\na => a\nb => b\nc => c";
    let machine = compile(rules);
    let source = generate(&machine, "corpus").unwrap();

    let linked = machine.states.iter().filter(|s| !s.links.is_empty()).count();
    assert_eq!(source.matches("=> match sym {").count(), linked);

    let accepts = machine
        .states
        .iter()
        .filter(|s| s.kind == StateKind::Accept)
        .count();
    assert_eq!(source.matches("Kind::Accept").count(), accepts + 1);
}

#[test]
fn test_ignore_ws_param_becomes_a_constant() {
    let plain = generate(&compile("a => b"), "t").unwrap();
    assert!(plain.contains("const IGNORE_WS: bool = false;"));

    let skipping = generate(
        &compile_with("a => b", Params::new().with(Params::IGNORE_WS, true)),
        "t",
    )
    .unwrap();
    assert!(skipping.contains("const IGNORE_WS: bool = true;"));
}

#[test]
fn test_invalid_module_name_is_rejected() {
    let machine = compile("a => b");
    assert_eq!(
        generate(&machine, "my-mod"),
        Err(CodegenError::InvalidName("my-mod".into()))
    );
    assert!(generate(&machine, "9lives").is_err());
    assert!(generate(&machine, "").is_err());
}

// ══════════════════════════════════════════════════════════════════════════════
// Actions and expressions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_capture_actions_are_lowered_to_statements() {
    let source = generate(&compile("<x:a+>b => [$x]"), "cap").unwrap();
    assert!(source.contains("ctx.append(0, \"%r0.x\", sym);"));
    assert!(source.contains("ctx.rename(\"%r0.x\", \"x\");"));
    assert!(source.contains("ctx.ret(0);"));
    assert!(source.contains("out.push_str(\"[\");"));
    assert!(source.contains("out.push_str(ctx.get(\"x\"));"));
}

#[test]
fn test_whole_match_expression_renders_raw_text() {
    let source = generate(&compile("abc => <$match>"), "echo").unwrap();
    assert!(source.contains("out.push_str(&ctx.raw);"));
    assert!(source.contains("out.push_str(\"<\");"));
}

#[test]
fn test_symbols_and_literals_are_escaped() {
    let source = generate(&compile("\\n => \\t"), "esc").unwrap();
    assert!(source.contains("Some('\\n')"));
    assert!(source.contains("out.push_str(\"\\t\");"));
}

#[test]
fn test_negated_class_becomes_a_guard_arm() {
    let source = generate(&compile("[^ab] => y"), "neg").unwrap();
    // End-of-source never matches a negated class.
    assert!(source.contains("_ if !matches!(sym, Some('a') | Some('b') | None)"));
}

#[test]
fn test_end_anchor_becomes_the_none_arm() {
    let source = generate(&compile("a\\z => Z"), "fin").unwrap();
    assert!(source.contains("None => "));
}

// ══════════════════════════════════════════════════════════════════════════════
// Execution
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_generated_module_runs_like_the_interpreter() {
    let rules = "abc => W\nbaab => P\nab => X\nac => Y\naa => Z\nba => U\ncb => Q\na => a\nb => b\nc => c";
    // "abx" exercises the failure exit: 'x' matches no rule.
    assert_runs_like_the_machine(rules, "corpus", &["abcbcbaab", "baab", "abab", "", "abx"]);
}

#[test]
fn test_generated_module_runs_captures_and_anchors() {
    let rules = "<x:[ab]+>c => ($x)\nd => D\na\\z => Z";
    assert_runs_like_the_machine(rules, "captures", &["abc", "aabbcd", "dd", "abca", "bd"]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Stability
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_generation_is_deterministic() {
    let rules = "abc => W\n<x:[ab]+>c => ($x)\na => 1";
    let machine = compile(rules);
    let first = generate(&machine, "stable").unwrap();
    for _ in 0..100 {
        assert_eq!(generate(&machine, "stable").unwrap(), first);
    }
}
