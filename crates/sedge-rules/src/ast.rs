//! The rule expression tree.
//!
//! Nodes live in an arena addressed by [`NodeId`] handles; edges are
//! indices, never owning pointers, so shared sub-expressions and memo
//! caches key on handles rather than object identity.

use crate::context::Context;
use sedge_types::{Symbol, TransformResult, Value};
use std::collections::BTreeSet;

/// Handle of a node in a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// One node of the expression tree.
///
/// Pattern nodes match input; replacement nodes produce output via
/// [`Tree::apply`]. `Rule` pairs one of each, `RuleSet` orders rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A literal input symbol.
    Item(Symbol),
    /// A symbol class `[abc]` / `[^abc]`.
    Class { negated: bool, set: BTreeSet<Symbol> },
    /// Any symbol except end-of-source.
    Any,
    /// The end-of-source sentinel (`\z`).
    EndAnchor,
    /// Concatenation.
    Seq(Vec<NodeId>),
    /// Ordered alternation.
    Alt(Vec<NodeId>),
    /// Quantified repetition; `max == None` is unbounded.
    Repeat {
        body: NodeId,
        min: u32,
        max: Option<u32>,
    },
    /// `<name:atom>` — bind the matched symbols to `name`.
    Capture { name: String, body: NodeId },
    /// `$name` in a pattern — match the bound value again, or defer via a
    /// binding formula when the variable is still free.
    BackRef(String),

    /// Literal replacement text.
    Lit(String),
    /// `$name` in a replacement.
    VarRef(String),
    /// Replacement concatenation.
    ReplSeq(Vec<NodeId>),

    /// `pattern => replacement`.
    Rule {
        pattern: NodeId,
        replacement: NodeId,
    },
    /// The ordered rules of one source unit.
    RuleSet(Vec<NodeId>),
}

/// Arena of expression nodes.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Materialize a replacement node against a variable context.
    ///
    /// Unbound variable references produce an empty sequence: redefinition
    /// is fatal, absence is not.
    pub fn apply(&self, id: NodeId, ctx: &Context) -> TransformResult<Value> {
        match self.node(id) {
            Node::Lit(text) => Ok(Value::text(text)),
            Node::VarRef(name) => Ok(ctx
                .get_value(name)
                .cloned()
                .unwrap_or(Value::Seq(Vec::new()))),
            Node::ReplSeq(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.apply(*item, ctx)?);
                }
                Ok(Value::Seq(out))
            }
            Node::Item(sym) => Ok(Value::Sym(*sym)),
            other => unreachable!("apply on non-replacement node {other:?}"),
        }
    }

    /// Render a replacement node back to rule-source syntax.
    pub fn render_replacement(&self, id: NodeId) -> String {
        match self.node(id) {
            Node::Lit(text) => text.clone(),
            Node::VarRef(name) => format!("${name}"),
            Node::ReplSeq(items) => items
                .iter()
                .map(|item| self.render_replacement(*item))
                .collect(),
            Node::Item(Symbol::Char(c)) => c.to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, RuntimeInfo};
    use sedge_types::{CancelToken, Params};
    use std::rc::Rc;

    fn ctx() -> Context {
        Context::new(
            Params::new(),
            Rc::new(RuntimeInfo::new(NodeId(0), CancelToken::new())),
        )
    }

    #[test]
    fn test_arena_handles_are_stable() {
        let mut tree = Tree::new();
        let a = tree.push(Node::Item(Symbol::Char('a')));
        let b = tree.push(Node::Item(Symbol::Char('b')));
        let seq = tree.push(Node::Seq(vec![a, b]));
        assert_eq!(tree.node(seq), &Node::Seq(vec![a, b]));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_apply_literal_and_varref() {
        let mut tree = Tree::new();
        let lit = tree.push(Node::Lit("ab".into()));
        let var = tree.push(Node::VarRef("x".into()));
        let repl = tree.push(Node::ReplSeq(vec![lit, var]));

        let mut c = ctx();
        c.bind_capture("x", Value::text("cd"));
        let val = tree.apply(repl, &c).unwrap();
        assert_eq!(val.render(), "abcd");
    }

    #[test]
    fn test_apply_unbound_varref_is_empty() {
        let mut tree = Tree::new();
        let var = tree.push(Node::VarRef("missing".into()));
        let val = tree.apply(var, &ctx()).unwrap();
        assert_eq!(val.render(), "");
    }

    #[test]
    fn test_render_replacement_round_trips_syntax() {
        let mut tree = Tree::new();
        let lit = tree.push(Node::Lit("ab".into()));
        let var = tree.push(Node::VarRef("x".into()));
        let repl = tree.push(Node::ReplSeq(vec![lit, var]));
        assert_eq!(tree.render_replacement(repl), "ab$x");
    }
}
