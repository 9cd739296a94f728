//! Direct backtracking walker — the reference execution strategy.
//!
//! Walks the rule tree against the input at each position, applying the
//! leftmost-longest rule (rule order breaks ties) and falling back per
//! [`TransformMode`] when nothing matches. The table transformer in
//! `sedge-table` must agree with this walker on every input.

use crate::ast::{Node, NodeId, Tree};
use crate::context::{Context, RuntimeInfo};
use crate::formula::Formula;
use crate::parser::RuleSet;
use sedge_types::{
    BestTry, CancelToken, Params, Symbol, TransformError, TransformMode, TransformResult, Value,
};
use std::rc::Rc;
use tracing::trace;

/// Tree-walking transformer over a parsed rule set.
pub struct Walker<'t> {
    tree: &'t Tree,
    rules: &'t [(NodeId, NodeId)],
}

/// A candidate match: end position plus the context it produced.
type Candidates = Vec<(usize, Context)>;

impl<'t> Walker<'t> {
    pub fn new(set: &'t RuleSet) -> Walker<'t> {
        Walker {
            tree: &set.tree,
            rules: &set.rules,
        }
    }

    /// Transform the whole input.
    pub fn transform(
        &self,
        input: &str,
        mode: TransformMode,
        params: Params,
        cancel: &CancelToken,
    ) -> TransformResult<String> {
        let mut syms: Vec<Symbol> = input.chars().map(Symbol::Char).collect();
        syms.push(Symbol::End);
        let n = syms.len() - 1;

        let runtime = Rc::new(RuntimeInfo::new(NodeId(0), cancel.clone()));
        let mut out = String::new();
        let mut pos = 0;

        while pos < n {
            if cancel.is_cancelled() {
                return Err(TransformError::Cancelled);
            }
            if params.get(Params::IGNORE_WS) {
                if let Symbol::Char(c) = syms[pos] {
                    if c.is_whitespace() {
                        pos += 1;
                        continue;
                    }
                }
            }

            match self.best_rule_at(&syms, pos, params, &runtime)? {
                Some((rule_idx, end, mut ctx)) => {
                    let matched: Vec<Symbol> = syms[pos..end].to_vec();
                    ctx.add_match(Value::Seq(matched.into_iter().map(Value::Sym).collect()), rule_idx);
                    let (_, replacement) = self.rules[rule_idx];
                    let value = self.tree.apply(replacement, &ctx)?;
                    out.push_str(&value.render());
                    trace!(rule = rule_idx, pos, end, "rule applied");
                    pos = end;
                }
                None => match mode {
                    TransformMode::Reading => pos += 1,
                    TransformMode::Modification => {
                        if let Symbol::Char(c) = syms[pos] {
                            out.push(c);
                        }
                        pos += 1;
                    }
                    TransformMode::Function => {
                        return Err(TransformError::MatchFailed {
                            position: pos,
                            flushed: out,
                            best: Some(*runtime.best.borrow()),
                        });
                    }
                },
            }
        }
        Ok(out)
    }

    /// The winning rule at `pos`: leftmost-longest, first rule on ties.
    ///
    /// Zero-width matches never win — they would stall the driver. Under
    /// `FULL_MATCH` only matches reaching end-of-source count.
    fn best_rule_at(
        &self,
        syms: &[Symbol],
        pos: usize,
        params: Params,
        runtime: &Rc<RuntimeInfo>,
    ) -> TransformResult<Option<(usize, usize, Context)>> {
        let n = syms.len() - 1;
        let mut winner: Option<(usize, usize, Context)> = None;
        for (rule_idx, &(pattern, _)) in self.rules.iter().enumerate() {
            let ctx = Context::new(params, Rc::clone(runtime));
            let matcher = Matcher {
                tree: self.tree,
                syms,
                rule: rule_idx,
                start: pos,
                runtime,
            };
            let mut candidates = matcher.ends(pattern, pos, &ctx)?;
            if params.get(Params::FULL_MATCH) {
                candidates.retain(|(end, _)| *end >= n);
            }
            let chosen = if params.get(Params::SEARCH_BEST) {
                candidates.into_iter().max_by_key(|(end, _)| *end)
            } else {
                candidates.into_iter().next()
            };
            if let Some((end, ctx)) = chosen {
                if end > pos && winner.as_ref().map_or(true, |(_, best, _)| end > *best) {
                    winner = Some((rule_idx, end, ctx));
                }
            }
        }
        Ok(winner)
    }
}

/// One rule attempt at one position.
struct Matcher<'t> {
    tree: &'t Tree,
    syms: &'t [Symbol],
    rule: usize,
    start: usize,
    runtime: &'t Rc<RuntimeInfo>,
}

impl Matcher<'_> {
    /// All candidate end positions for `node` starting at `pos`, in
    /// preference order, each paired with the context it produced.
    fn ends(&self, node: NodeId, pos: usize, ctx: &Context) -> TransformResult<Candidates> {
        if self.runtime.cancel.is_cancelled() {
            return Err(TransformError::Cancelled);
        }
        match self.tree.node(node) {
            Node::Item(sym) => Ok(self.atom(pos, ctx, |got, ci| sym_eq(got, *sym, ci))),
            Node::Class { negated, set } => Ok(self.atom(pos, ctx, |got, ci| {
                if got.is_end() {
                    return false;
                }
                let inside = set.iter().any(|s| sym_eq(got, *s, ci));
                inside != *negated
            })),
            Node::Any => Ok(self.atom(pos, ctx, |got, _| !got.is_end())),
            Node::EndAnchor => Ok(self.atom(pos, ctx, |got, _| got.is_end())),

            Node::Seq(items) => self.seq_ends(items, pos, ctx),
            Node::Alt(branches) => self.alt_ends(node, branches, pos, ctx),
            Node::Repeat { body, min, max } => {
                self.repeat_ends(node, *body, *min, *max, pos, ctx)
            }
            Node::Capture { name, body } => {
                let mut out = Vec::new();
                for (end, mut branch_ctx) in self.ends(*body, pos, ctx)? {
                    let captured: Vec<Value> =
                        self.syms[pos..end].iter().map(|s| Value::Sym(*s)).collect();
                    branch_ctx.bind_capture(name, Value::Seq(captured));
                    if !branch_ctx.contradicted() {
                        out.push((end, branch_ctx));
                    }
                }
                Ok(out)
            }
            Node::BackRef(name) => self.backref_ends(name, pos, ctx),

            other => unreachable!("match on non-pattern node {other:?}"),
        }
    }

    /// One-symbol match with best-try bookkeeping.
    fn atom(
        &self,
        pos: usize,
        ctx: &Context,
        admit: impl Fn(Symbol, bool) -> bool,
    ) -> Candidates {
        let ci = ctx.params().get(Params::CASE_INSENSITIVE);
        match self.syms.get(pos) {
            Some(&got) if admit(got, ci) => {
                self.runtime.note_try(BestTry {
                    position: self.start,
                    rule: Some(self.rule),
                    length: pos + 1 - self.start,
                });
                vec![(pos + 1, ctx.clone())]
            }
            _ => Vec::new(),
        }
    }

    fn seq_ends(&self, items: &[NodeId], pos: usize, ctx: &Context) -> TransformResult<Candidates> {
        let mut frontier = vec![(pos, ctx.clone())];
        for item in items {
            let mut next = Vec::new();
            for (p, c) in &frontier {
                next.extend(self.ends(*item, *p, c)?);
            }
            dedupe(&mut next);
            if next.is_empty() {
                return Ok(next);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    /// Ordered alternation. First-branch-wins unless `SEARCH_BEST`, which
    /// considers every branch and prefers the longest.
    fn alt_ends(
        &self,
        node: NodeId,
        branches: &[NodeId],
        pos: usize,
        ctx: &Context,
    ) -> TransformResult<Candidates> {
        let Some(_frame) = ActiveFrame::enter(self.runtime, node, pos, ctx) else {
            return Ok(Vec::new());
        };
        if ctx.params().get(Params::SEARCH_BEST) {
            let mut all = Vec::new();
            for branch in branches {
                all.extend(self.ends(*branch, pos, ctx)?);
            }
            all.sort_by(|(a, _), (b, _)| b.cmp(a));
            dedupe(&mut all);
            Ok(all)
        } else {
            for branch in branches {
                let candidates = self.ends(*branch, pos, ctx)?;
                if !candidates.is_empty() {
                    return Ok(candidates);
                }
            }
            Ok(Vec::new())
        }
    }

    /// Quantified repetition; greedy unless `LAZY`. An iteration that
    /// consumes nothing stops the expansion — otherwise nullable bodies
    /// would loop forever.
    fn repeat_ends(
        &self,
        node: NodeId,
        body: NodeId,
        min: u32,
        max: Option<u32>,
        pos: usize,
        ctx: &Context,
    ) -> TransformResult<Candidates> {
        let Some(_frame) = ActiveFrame::enter(self.runtime, node, pos, ctx) else {
            return Ok(Vec::new());
        };
        let mut per_count: Vec<Candidates> = vec![vec![(pos, ctx.clone())]];
        let mut current: Candidates = vec![(pos, ctx.clone())];
        let cap = max.unwrap_or(u32::MAX).min((self.syms.len() - pos) as u32);
        for _ in 0..cap {
            let mut next = Vec::new();
            for (p, c) in &current {
                for (end, end_ctx) in self.ends(body, *p, c)? {
                    if end > *p {
                        next.push((end, end_ctx));
                    }
                }
            }
            dedupe(&mut next);
            if next.is_empty() {
                break;
            }
            per_count.push(next.clone());
            current = next;
        }

        let mut out = Vec::new();
        let counts: Vec<usize> = (min as usize..per_count.len()).collect();
        let lazy = ctx.params().get(Params::LAZY);
        let ordered: Box<dyn Iterator<Item = usize>> = if lazy {
            Box::new(counts.into_iter())
        } else {
            Box::new(counts.into_iter().rev())
        };
        for k in ordered {
            out.extend(per_count[k].iter().cloned());
        }
        dedupe(&mut out);
        Ok(out)
    }

    /// `$name`: match the bound value again, or consume one symbol and
    /// leave a binding formula for a later capture to resolve.
    fn backref_ends(&self, name: &str, pos: usize, ctx: &Context) -> TransformResult<Candidates> {
        if let Some(value) = ctx.get_value(name) {
            let mut expected = Vec::new();
            value.flatten(&mut expected);
            let end = pos + expected.len();
            if end > self.syms.len() {
                return Ok(Vec::new());
            }
            let ci = ctx.params().get(Params::CASE_INSENSITIVE);
            let agree = expected
                .iter()
                .zip(&self.syms[pos..end])
                .all(|(want, got)| sym_eq(*got, *want, ci));
            if agree {
                self.runtime.note_try(BestTry {
                    position: self.start,
                    rule: Some(self.rule),
                    length: end - self.start,
                });
                Ok(vec![(end, ctx.clone())])
            } else {
                Ok(Vec::new())
            }
        } else {
            match self.syms.get(pos) {
                Some(&sym) if !sym.is_end() => {
                    let mut deferred = ctx.clone();
                    deferred.add_formula(Formula::require(name, Value::Sym(sym)));
                    if deferred.contradicted() {
                        return Ok(Vec::new());
                    }
                    Ok(vec![(pos + 1, deferred)])
                }
                _ => Ok(Vec::new()),
            }
        }
    }
}

/// Loop guard, active under `LEFT_RECURSION`: refuses to re-enter the
/// same `(node, position, memo key)` frame, which breaks infinite regress
/// on left-recursive constructs. Removal on drop covers every exit path.
struct ActiveFrame<'a> {
    runtime: &'a RuntimeInfo,
    key: Option<(u32, usize, u64)>,
}

impl<'a> ActiveFrame<'a> {
    fn enter(
        runtime: &'a Rc<RuntimeInfo>,
        node: NodeId,
        pos: usize,
        ctx: &Context,
    ) -> Option<ActiveFrame<'a>> {
        if !ctx.params().get(Params::LEFT_RECURSION) {
            return Some(ActiveFrame { runtime, key: None });
        }
        let key = (node.0, pos, ctx.memo_key());
        if !runtime.active.borrow_mut().insert(key) {
            return None;
        }
        Some(ActiveFrame {
            runtime,
            key: Some(key),
        })
    }
}

impl Drop for ActiveFrame<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.runtime.active.borrow_mut().remove(&key);
        }
    }
}

fn sym_eq(got: Symbol, want: Symbol, case_insensitive: bool) -> bool {
    match (got, want) {
        (Symbol::End, Symbol::End) => true,
        (Symbol::Char(a), Symbol::Char(b)) => {
            if case_insensitive {
                a.eq_ignore_ascii_case(&b)
            } else {
                a == b
            }
        }
        _ => false,
    }
}

/// Keep the first candidate per end position, preserving order.
fn dedupe(candidates: &mut Candidates) {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|(end, _)| seen.insert(*end));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_rules;

    fn run(rules: &str, input: &str, mode: TransformMode, params: Params) -> TransformResult<String> {
        let set = parse_rules(rules).unwrap();
        Walker::new(&set).transform(input, mode, params, &CancelToken::new())
    }

    #[test]
    fn test_simple_substitution() {
        let out = run("a => b", "aaaaa", TransformMode::Function, Params::new()).unwrap();
        assert_eq!(out, "bbbbb");
    }

    #[test]
    fn test_longest_rule_wins_with_rule_order_tiebreak() {
        let rules = "ab => X\na => 1\nb => 2";
        let out = run(rules, "aab", TransformMode::Function, Params::new()).unwrap();
        assert_eq!(out, "1X");
    }

    #[test]
    fn test_modes_differ_on_unmatched_input() {
        let rules = "a => b";
        assert_eq!(
            run(rules, "axa", TransformMode::Modification, Params::new()).unwrap(),
            "bxb"
        );
        assert_eq!(
            run(rules, "axa", TransformMode::Reading, Params::new()).unwrap(),
            "bb"
        );
        let err = run(rules, "axa", TransformMode::Function, Params::new()).unwrap_err();
        match err {
            TransformError::MatchFailed {
                position, flushed, ..
            } => {
                assert_eq!(position, 1);
                assert_eq!(flushed, "b");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_search_best_commits_to_longer_alternative() {
        // Without SEARCH_BEST the first branch wins, strands the 'b', and
        // Function mode fails; with it the full-width branch is chosen.
        let rules = "a|ab => 1";
        assert!(run(rules, "ab", TransformMode::Function, Params::new()).is_err());
        let params = Params::new()
            .with(Params::SEARCH_BEST, true)
            .with(Params::FULL_MATCH, true);
        assert_eq!(run(rules, "ab", TransformMode::Function, params).unwrap(), "1");
    }

    #[test]
    fn test_quantifier_greedy_and_lazy() {
        let rules = "<x:a+> => [$x]";
        assert_eq!(
            run(rules, "aaa", TransformMode::Function, Params::new()).unwrap(),
            "[aaa]"
        );
        // Lazy still has to cover the input, one symbol per match.
        assert_eq!(
            run(rules, "aaa", TransformMode::Function, Params::new().with(Params::LAZY, true))
                .unwrap(),
            "[a][a][a]"
        );
    }

    #[test]
    fn test_capture_repetition_accumulates() {
        let rules = "<x:a><x:b> => $x$x";
        let out = run(rules, "ab", TransformMode::Function, Params::new()).unwrap();
        assert_eq!(out, "abab");
    }

    #[test]
    fn test_backref_repeats_bound_value() {
        // Bound: <x:.> binds first, $x must repeat it.
        let rules = "<x:.>$x => [$x]";
        assert_eq!(
            run(rules, "aabb", TransformMode::Function, Params::new()).unwrap(),
            "[a][b]"
        );
        assert!(run(rules, "ab", TransformMode::Function, Params::new()).is_err());
    }

    #[test]
    fn test_class_and_any() {
        let rules = "[abc] => +\n. => -";
        assert_eq!(
            run(rules, "axbyc", TransformMode::Function, Params::new()).unwrap(),
            "+-+-+"
        );
    }

    #[test]
    fn test_negated_class_does_not_match_end() {
        let rules = "[^x] => y";
        assert_eq!(
            run(rules, "ab", TransformMode::Function, Params::new()).unwrap(),
            "yy"
        );
        assert!(run(rules, "x", TransformMode::Function, Params::new()).is_err());
    }

    #[test]
    fn test_end_anchor() {
        let rules = "a\\z => Z\na => x";
        assert_eq!(
            run(rules, "aaa", TransformMode::Function, Params::new()).unwrap(),
            "xxZ"
        );
    }

    #[test]
    fn test_case_insensitive_param() {
        let rules = "ab => y";
        let params = Params::new().with(Params::CASE_INSENSITIVE, true);
        assert_eq!(run(rules, "AbaB", TransformMode::Function, params).unwrap(), "yy");
        assert!(run(rules, "AB", TransformMode::Function, Params::new()).is_err());
    }

    #[test]
    fn test_ignore_whitespace_param() {
        let rules = "ab => y";
        let params = Params::new().with(Params::IGNORE_WS, true);
        assert_eq!(
            run(rules, "ab ab", TransformMode::Function, params).unwrap(),
            "yy"
        );
    }

    #[test]
    fn test_cancellation_between_symbols() {
        let set = parse_rules("a => b").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Walker::new(&set)
            .transform("aaaa", TransformMode::Function, Params::new(), &cancel)
            .unwrap_err();
        assert_eq!(err, TransformError::Cancelled);
    }

    #[test]
    fn test_nullable_repeat_terminates() {
        // (a?)* would regress forever without the zero-progress guard.
        let rules = "(a?)*b => y";
        assert_eq!(
            run(rules, "aab", TransformMode::Function, Params::new()).unwrap(),
            "y"
        );
        assert_eq!(run(rules, "b", TransformMode::Function, Params::new()).unwrap(), "y");
    }

    #[test]
    fn test_reentry_guard_gated_on_left_recursion() {
        let runtime = Rc::new(RuntimeInfo::new(NodeId(0), CancelToken::new()));
        let params = Params::new().with(Params::LEFT_RECURSION, true);
        let ctx = Context::new(params, Rc::clone(&runtime));
        let frame = ActiveFrame::enter(&runtime, NodeId(5), 2, &ctx);
        assert!(frame.is_some());
        assert!(ActiveFrame::enter(&runtime, NodeId(5), 2, &ctx).is_none());
        drop(frame);
        assert!(ActiveFrame::enter(&runtime, NodeId(5), 2, &ctx).is_some());

        // Without the flag re-entry is unrestricted.
        let plain = Context::new(Params::new(), Rc::clone(&runtime));
        let first = ActiveFrame::enter(&runtime, NodeId(5), 2, &plain);
        let second = ActiveFrame::enter(&runtime, NodeId(5), 2, &plain);
        assert!(first.is_some() && second.is_some());
    }

    #[test]
    fn test_left_recursive_alternation_terminates_under_the_flag() {
        let rules = "(a?)*b|c => y";
        let params = Params::new().with(Params::LEFT_RECURSION, true);
        assert_eq!(
            run(rules, "aab", TransformMode::Function, params).unwrap(),
            "y"
        );
    }

    #[test]
    fn test_best_try_reports_deepest_partial() {
        let rules = "abc => W";
        let err = run(rules, "abd", TransformMode::Function, Params::new()).unwrap_err();
        let TransformError::MatchFailed { best: Some(best), .. } = err else {
            panic!("expected MatchFailed with best try");
        };
        assert_eq!(best.position, 0);
        assert_eq!(best.length, 2);
        assert_eq!(best.rule, Some(0));
    }

    #[test]
    fn test_scenario_corpus() {
        let rules = "abc => W\nbaab => P\nab => X\nac => Y\naa => Z\nba => U\ncb => Q\na => a\nb => b\nc => c";
        let out = run(rules, "abcbcbaab", TransformMode::Function, Params::new()).unwrap();
        assert_eq!(out, "WbQZb");
    }

    #[test]
    fn test_match_pseudo_variable() {
        let rules = "[ab]+c => <$match>";
        let out = run(rules, "abc", TransformMode::Function, Params::new()).unwrap();
        assert_eq!(out, "<abc>");
    }
}
