//! Per-branch matching state: variable bindings, pending formulas, and
//! execution parameters.
//!
//! A context is cloned to explore independent branches and destroyed when
//! its branch completes or backtracks. Run-wide immutable state lives in
//! [`RuntimeInfo`], shared by pointer across every clone of one run.

use crate::ast::NodeId;
use crate::formula::{Formula, FormulaExpr};
use sedge_types::{BestTry, CancelToken, Params, TransformError, TransformResult, Value};
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Immutable run-wide info: one per transform run, never shared across runs.
#[derive(Debug)]
pub struct RuntimeInfo {
    /// The root of the rule tree being executed.
    pub root: NodeId,
    /// Cooperative cancellation signal.
    pub cancel: CancelToken,
    /// Best-partial-match tracker, updated monotonically.
    pub best: RefCell<BestTry>,
    /// In-progress evaluation frames `(node, position, memo key)` used for
    /// loop and left-recursion detection.
    pub active: RefCell<HashSet<(u32, usize, u64)>>,
}

impl RuntimeInfo {
    pub fn new(root: NodeId, cancel: CancelToken) -> RuntimeInfo {
        RuntimeInfo {
            root,
            cancel,
            best: RefCell::new(BestTry::default()),
            active: RefCell::new(HashSet::new()),
        }
    }

    /// Record a partial match, keeping the deepest seen so far.
    pub fn note_try(&self, candidate: BestTry) {
        self.best.borrow_mut().improve(candidate);
    }
}

/// Mutable per-branch matching state.
#[derive(Debug, Clone)]
pub struct Context {
    vars: BTreeMap<String, Value>,
    formulas: Vec<Formula>,
    params: Params,
    runtime: Rc<RuntimeInfo>,
    /// Set when a formula resolved to a contradiction; fails the branch.
    contradiction: bool,
}

impl Context {
    pub fn new(params: Params, runtime: Rc<RuntimeInfo>) -> Context {
        Context {
            vars: BTreeMap::new(),
            formulas: Vec::new(),
            params,
            runtime,
            contradiction: false,
        }
    }

    pub fn params(&self) -> Params {
        self.params
    }

    pub fn runtime(&self) -> &Rc<RuntimeInfo> {
        &self.runtime
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Bind a logical variable. Redefinition is always fatal.
    ///
    /// If `name` was the last unresolved operand of a pending formula, that
    /// formula resolves immediately (and resolution may cascade).
    pub fn set_value(&mut self, name: &str, value: Value) -> TransformResult<()> {
        if self.vars.contains_key(name) {
            return Err(TransformError::VariableRedefined(name.to_string()));
        }
        self.vars.insert(name.to_string(), value);
        self.resolve_formulas()
    }

    /// Accumulate a capture: repeated captures under one name widen into a
    /// sequence instead of erroring or overwriting.
    pub fn bind_capture(&mut self, name: &str, value: Value) {
        self.accumulate(name, value);
        // A capture can complete a pending formula just like set_value.
        let _ = self.resolve_formulas();
    }

    fn accumulate(&mut self, name: &str, value: Value) {
        let merged = match self.vars.remove(name) {
            None => value,
            Some(prior) => {
                match Value::merge(Value::named(name, prior), Value::named(name, value)) {
                    Value::Named { value, .. } => *value,
                    other => other,
                }
            }
        };
        self.vars.insert(name.to_string(), merged);
    }

    /// Record a match in the `match` pseudo-variable. Each match replaces
    /// the last unless `MULTI` is active, which accumulates them with
    /// capture merge rules.
    ///
    /// `index` is the rule that produced the match; the latest index is
    /// kept for diagnostics. Tuple payloads normalize into a sequence so
    /// downstream code can treat the match as one item, unless
    /// `SIMPLE_MATCH` is active.
    pub fn add_match(&mut self, value: Value, index: usize) {
        let value = if self.params.get(Params::SIMPLE_MATCH) {
            value
        } else {
            match value {
                Value::Tuple(items) => Value::Seq(items),
                other => other,
            }
        };
        if self.params.get(Params::MULTI) {
            self.accumulate("match", value);
        } else {
            self.vars.insert("match".to_string(), value);
        }
        self.vars.insert(
            "match.index".to_string(),
            Value::text(&index.to_string()),
        );
    }

    pub fn add_formula(&mut self, formula: Formula) {
        self.formulas.push(formula);
        // The formula may already be resolvable.
        let _ = self.resolve_formulas();
    }

    /// True while any formula is still pending.
    pub fn has_pending_formulas(&self) -> bool {
        !self.formulas.is_empty()
    }

    /// True when a formula resolved to a contradiction, failing the branch.
    pub fn contradicted(&self) -> bool {
        self.contradiction
    }

    /// A child context for a function-call boundary: fresh variables and
    /// formulas, whitelist-filtered flags, same runtime.
    pub fn child(&self) -> Context {
        Context {
            vars: BTreeMap::new(),
            formulas: Vec::new(),
            params: self.params.child_view(),
            runtime: Rc::clone(&self.runtime),
            contradiction: false,
        }
    }

    /// Scoped flag override; the guard restores the previous bits on drop,
    /// on every exit path.
    pub fn use_parameter(&mut self, flag: u32, on: bool) -> ParamGuard<'_> {
        let saved = self.params;
        self.params.set(flag, on);
        ParamGuard { ctx: self, saved }
    }

    /// Equivalence for memoization and left-recursion detection.
    ///
    /// Compares flags plus variables whose name starts with an uppercase
    /// letter or `$`: internal lowercase variables are plumbing, not
    /// semantic state.
    pub fn memo_eq(&self, other: &Context) -> bool {
        self.params == other.params
            && self.semantic_vars().eq(other.semantic_vars())
    }

    /// Hash of the memo-relevant state, for keying in-progress frames.
    pub fn memo_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.params.bits().hash(&mut hasher);
        for (name, value) in self.semantic_vars() {
            name.hash(&mut hasher);
            value.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn semantic_vars(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter().filter(|(name, _)| {
            name.starts_with(|c: char| c.is_uppercase() || c == '$')
        })
    }

    /// Resolve every formula whose last free variable just became bound.
    ///
    /// Resolution can cascade: binding one side's variable may complete
    /// another formula. A contradiction (two bound sides that differ)
    /// fails the branch rather than erroring.
    fn resolve_formulas(&mut self) -> TransformResult<()> {
        loop {
            let idx = self.formulas.iter().position(|f| {
                self.side_ready(&f.left.vars) || self.side_ready(&f.right.vars)
            });
            let Some(idx) = idx else { return Ok(()) };
            let formula = self.formulas.remove(idx);
            let (ready, other) = if self.side_ready(&formula.left.vars) {
                (formula.left, formula.right)
            } else {
                (formula.right, formula.left)
            };
            let value = self.eval_side(&ready.expr);
            match other.expr {
                FormulaExpr::Var(name) if !self.vars.contains_key(&name) => {
                    self.vars.insert(name, value);
                    // Loop again: this binding may complete another formula.
                }
                expr => {
                    let bound = self.eval_side(&expr);
                    if !Self::unifies(&bound, &value) {
                        self.contradiction = true;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn side_ready(&self, vars: &[String]) -> bool {
        vars.iter().all(|v| self.vars.contains_key(v))
    }

    fn eval_side(&self, expr: &FormulaExpr) -> Value {
        match expr {
            FormulaExpr::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .unwrap_or(Value::Seq(Vec::new())),
            FormulaExpr::Value(value) => value.clone(),
        }
    }

    /// Two bound sides unify when their flattened symbol sequences agree.
    fn unifies(a: &Value, b: &Value) -> bool {
        let mut left = Vec::new();
        let mut right = Vec::new();
        a.flatten(&mut left);
        b.flatten(&mut right);
        left == right
    }
}

// Branch failure from formula contradiction is a flag, not an error: the
// walker drops the branch and backtracks.
impl Context {
    pub(crate) fn clear_contradiction(&mut self) {
        self.contradiction = false;
    }
}

/// RAII guard from [`Context::use_parameter`].
#[derive(Debug)]
pub struct ParamGuard<'a> {
    ctx: &'a mut Context,
    saved: Params,
}

impl Deref for ParamGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for ParamGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for ParamGuard<'_> {
    fn drop(&mut self) {
        self.ctx.params = self.saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaSide;
    use sedge_types::Symbol;

    fn ctx() -> Context {
        Context::new(
            Params::new(),
            Rc::new(RuntimeInfo::new(NodeId(0), CancelToken::new())),
        )
    }

    #[test]
    fn test_set_value_rejects_redefinition() {
        let mut c = ctx();
        c.set_value("x", Value::text("a")).unwrap();
        let err = c.set_value("x", Value::text("b")).unwrap_err();
        assert_eq!(err, TransformError::VariableRedefined("x".into()));
    }

    #[test]
    fn test_bind_capture_accumulates() {
        let mut c = ctx();
        c.bind_capture("x", Value::text("a"));
        c.bind_capture("x", Value::text("b"));
        assert_eq!(c.get_value("x").unwrap().render(), "ab");
    }

    #[test]
    fn test_formula_resolves_when_last_var_binds() {
        let mut c = ctx();
        c.add_formula(Formula::new(
            FormulaSide::var("x"),
            FormulaSide::var("y"),
        ));
        assert!(c.has_pending_formulas());

        // Binding x resolves the formula and binds y to the same value.
        c.set_value("x", Value::text("ab")).unwrap();
        assert!(!c.has_pending_formulas());
        assert_eq!(c.get_value("y").unwrap().render(), "ab");
        assert!(!c.contradicted());
    }

    #[test]
    fn test_formula_binds_free_side_as_soon_as_other_is_ready() {
        let mut c = ctx();
        c.set_value("y", Value::text("zz")).unwrap();
        c.add_formula(Formula::new(
            FormulaSide::var("x"),
            FormulaSide::var("y"),
        ));
        assert!(!c.has_pending_formulas());
        assert_eq!(c.get_value("x").unwrap().render(), "zz");
    }

    #[test]
    fn test_formula_contradiction_fails_branch() {
        // Both sides bound before the formula arrives: nothing is free to
        // bind, so differing values can only contradict.
        let mut c = ctx();
        c.set_value("y", Value::text("zz")).unwrap();
        c.set_value("x", Value::text("ab")).unwrap();
        c.add_formula(Formula::new(
            FormulaSide::var("x"),
            FormulaSide::var("y"),
        ));
        assert!(c.contradicted());
    }

    #[test]
    fn test_formula_added_against_bound_side_resolves_immediately() {
        let mut c = ctx();
        c.add_formula(Formula::bind("x", Value::Sym(Symbol::Char('q'))));
        assert!(!c.has_pending_formulas());
        assert_eq!(c.get_value("x").unwrap().render(), "q");
    }

    #[test]
    fn test_require_formula_defers_until_capture() {
        let mut c = ctx();
        c.add_formula(Formula::require("x", Value::Sym(Symbol::Char('a'))));
        assert!(c.has_pending_formulas());
        c.bind_capture("x", Value::Sym(Symbol::Char('a')));
        assert!(!c.has_pending_formulas());
        assert!(!c.contradicted());

        let mut bad = ctx();
        bad.add_formula(Formula::require("x", Value::Sym(Symbol::Char('a'))));
        bad.bind_capture("x", Value::Sym(Symbol::Char('b')));
        assert!(bad.contradicted());
    }

    #[test]
    fn test_formula_resolution_cascades() {
        let mut c = ctx();
        c.add_formula(Formula::new(FormulaSide::var("x"), FormulaSide::var("y")));
        c.add_formula(Formula::new(FormulaSide::var("y"), FormulaSide::var("z")));
        c.set_value("x", Value::text("m")).unwrap();
        assert!(!c.has_pending_formulas());
        assert_eq!(c.get_value("z").unwrap().render(), "m");
    }

    #[test]
    fn test_use_parameter_guard_restores_on_drop() {
        let mut c = ctx();
        assert!(!c.params().get(Params::LAZY));
        {
            let guard = c.use_parameter(Params::LAZY, true);
            assert!(guard.params().get(Params::LAZY));
        }
        assert!(!c.params().get(Params::LAZY));
    }

    #[test]
    fn test_use_parameter_guard_restores_on_early_exit() {
        fn inner(c: &mut Context) -> TransformResult<()> {
            let mut guard = c.use_parameter(Params::FULL_MATCH, true);
            guard.set_value("x", Value::text("a"))?;
            guard.set_value("x", Value::text("b"))?; // errors; guard drops
            Ok(())
        }
        let mut c = ctx();
        assert!(inner(&mut c).is_err());
        assert!(!c.params().get(Params::FULL_MATCH));
    }

    #[test]
    fn test_memo_eq_ignores_plumbing_vars() {
        let mut a = ctx();
        let mut b = ctx();
        a.bind_capture("temp", Value::text("x"));
        b.bind_capture("temp", Value::text("y"));
        assert!(a.memo_eq(&b));

        // Uppercase and $-prefixed names are semantic state.
        a.bind_capture("Top", Value::text("1"));
        assert!(!a.memo_eq(&b));
        b.bind_capture("Top", Value::text("1"));
        assert!(a.memo_eq(&b));
        a.bind_capture("$m", Value::text("s"));
        assert!(!a.memo_eq(&b));
    }

    #[test]
    fn test_child_inherits_whitelisted_flags_only() {
        let mut c = Context::new(
            Params::new()
                .with(Params::FULL_MATCH, true)
                .with(Params::LAZY, true),
            Rc::new(RuntimeInfo::new(NodeId(0), CancelToken::new())),
        );
        c.set_value("x", Value::text("a")).unwrap();
        let child = c.child();
        assert!(child.params().get(Params::FULL_MATCH));
        assert!(!child.params().get(Params::LAZY));
        assert!(child.get_value("x").is_none());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = ctx();
        a.bind_capture("x", Value::text("1"));
        let mut b = a.clone();
        b.bind_capture("x", Value::text("2"));
        assert_eq!(a.get_value("x").unwrap().render(), "1");
        assert_eq!(b.get_value("x").unwrap().render(), "12");
    }

    #[test]
    fn test_add_match_replaces_unless_multi() {
        let mut c = ctx();
        c.add_match(Value::text("ab"), 0);
        c.add_match(Value::text("cd"), 1);
        assert_eq!(c.get_value("match").unwrap().render(), "cd");
        assert_eq!(c.get_value("match.index").unwrap().render(), "1");

        let mut multi = Context::new(
            Params::new().with(Params::MULTI, true),
            Rc::new(RuntimeInfo::new(NodeId(0), CancelToken::new())),
        );
        multi.add_match(Value::text("ab"), 0);
        multi.add_match(Value::text("cd"), 1);
        assert_eq!(multi.get_value("match").unwrap().render(), "abcd");
    }

    #[test]
    fn test_add_match_normalizes_tuple_unless_simple() {
        let mut c = ctx();
        c.add_match(
            Value::Tuple(vec![Value::text("a"), Value::text("b")]),
            3,
        );
        assert!(matches!(c.get_value("match"), Some(Value::Seq(_))));

        let mut simple = Context::new(
            Params::new().with(Params::SIMPLE_MATCH, true),
            Rc::new(RuntimeInfo::new(NodeId(0), CancelToken::new())),
        );
        simple.add_match(
            Value::Tuple(vec![Value::text("a"), Value::text("b")]),
            0,
        );
        assert!(matches!(simple.get_value("match"), Some(Value::Tuple(_))));
    }
}
