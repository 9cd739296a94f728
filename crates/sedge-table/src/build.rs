//! Table builder: compiles a rule set into a deterministic machine.
//!
//! Each rule's pattern becomes a position automaton (one position per
//! symbol-consuming atom, follow sets instead of epsilon edges), and the
//! machine is the subset construction over all rules at once. The input
//! sets of the positions in a subset are split into disjoint classes with
//! the intersect/except algebra; each class becomes one link.
//!
//! A completed rule whose subset still has live positions lands as a
//! tentative pending chunk and scanning continues; the longest completion
//! wins, equal lengths go to the earliest rule. Capture variables
//! accumulate in per-rule temporaries and are copied (or, on a final
//! commit, renamed) to their visible names when the owning rule completes.

use crate::action::Action;
use crate::state::{ExprId, Link, Machine, Repl, ReplPart, State};
use sedge_rules::{Node, NodeId, RuleSet, Tree};
use sedge_types::{InputSet, Params, Symbol};
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;
use tracing::debug;

/// Hard ceiling on machine size.
pub const MAX_STATES: usize = 4096;

/// Why a rule set cannot be compiled to a table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// The pattern admits a zero-length match, which would stall the scan
    /// driver.
    #[error("rule {rule} can match the empty string")]
    EmptyMatch { rule: usize },

    /// The pattern uses a construct the table cannot express; the walker
    /// still handles it.
    #[error("rule {rule}: {feature} cannot be compiled to a table")]
    Unsupported { rule: usize, feature: String },

    /// Determinization exceeded [`MAX_STATES`].
    #[error("machine exceeds the state limit of {limit}")]
    TooLarge { limit: usize },
}

/// One symbol-consuming position of some rule's pattern.
struct Pos {
    set: InputSet,
    rule: usize,
    /// Capture names enclosing this position, outermost first.
    captures: Vec<String>,
    /// True when the rule completes upon consuming this position.
    last: bool,
}

/// Glushkov summary of a subtree.
struct Frag {
    nullable: bool,
    first: Vec<usize>,
    last: Vec<usize>,
}

impl Frag {
    fn empty() -> Frag {
        Frag {
            nullable: true,
            first: Vec::new(),
            last: Vec::new(),
        }
    }
}

struct Analyzer<'t> {
    tree: &'t Tree,
    rule: usize,
    fold_case: bool,
    captures: Vec<String>,
    positions: Vec<Pos>,
    follow: Vec<BTreeSet<usize>>,
}

impl Analyzer<'_> {
    fn position(&mut self, set: InputSet) -> usize {
        let idx = self.positions.len();
        self.positions.push(Pos {
            set,
            rule: self.rule,
            captures: self.captures.clone(),
            last: false,
        });
        self.follow.push(BTreeSet::new());
        idx
    }

    fn fold(&self, syms: impl IntoIterator<Item = Symbol>) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        for sym in syms {
            out.insert(sym);
            if self.fold_case {
                if let Symbol::Char(c) = sym {
                    out.insert(Symbol::Char(c.to_ascii_lowercase()));
                    out.insert(Symbol::Char(c.to_ascii_uppercase()));
                }
            }
        }
        out
    }

    fn analyze(&mut self, id: NodeId) -> Result<Frag, BuildError> {
        match self.tree.node(id) {
            Node::Item(sym) => Ok(self.leaf(InputSet::include(self.fold([*sym])))),
            Node::Class { negated, set } => {
                let folded = self.fold(set.iter().copied());
                let set = if *negated {
                    // A negated class never matches end-of-source.
                    let mut excluded = folded;
                    excluded.insert(Symbol::End);
                    InputSet::exclude(excluded)
                } else {
                    InputSet::include(folded)
                };
                Ok(self.leaf(set))
            }
            Node::Any => Ok(self.leaf(InputSet::exclude([Symbol::End]))),
            Node::EndAnchor => Ok(self.leaf(InputSet::end())),

            Node::Seq(items) => {
                let mut acc = Frag::empty();
                for item in items {
                    let next = self.analyze(*item)?;
                    for &p in &acc.last {
                        self.follow[p].extend(next.first.iter().copied());
                    }
                    let mut first = acc.first;
                    if acc.nullable {
                        first.extend(next.first.iter().copied());
                    }
                    let mut last = next.last;
                    if next.nullable {
                        last.extend(acc.last.iter().copied());
                    }
                    acc = Frag {
                        nullable: acc.nullable && next.nullable,
                        first,
                        last,
                    };
                }
                Ok(acc)
            }
            Node::Alt(branches) => {
                let mut acc = Frag {
                    nullable: false,
                    first: Vec::new(),
                    last: Vec::new(),
                };
                for branch in branches {
                    let frag = self.analyze(*branch)?;
                    acc.nullable |= frag.nullable;
                    acc.first.extend(frag.first);
                    acc.last.extend(frag.last);
                }
                Ok(acc)
            }
            Node::Repeat { body, min, max } => {
                let frag = self.analyze(*body)?;
                if *max != Some(1) {
                    for &p in &frag.last.clone() {
                        self.follow[p].extend(frag.first.iter().copied());
                    }
                }
                Ok(Frag {
                    nullable: *min == 0 || frag.nullable,
                    ..frag
                })
            }
            Node::Capture { name, body } => {
                self.captures.push(name.clone());
                let frag = self.analyze(*body);
                self.captures.pop();
                frag
            }
            Node::BackRef(_) => Err(BuildError::Unsupported {
                rule: self.rule,
                feature: "back-reference".into(),
            }),
            other => unreachable!("pattern analysis on {other:?}"),
        }
    }

    fn leaf(&mut self, set: InputSet) -> Frag {
        let p = self.position(set);
        Frag {
            nullable: false,
            first: vec![p],
            last: vec![p],
        }
    }
}

/// Flatten a replacement subtree into machine expression parts.
///
/// The `match` pseudo-variable maps to the consumed-text part: at the
/// moment a completion renders, the attempt's raw text is exactly the
/// matched text.
fn flatten_repl(tree: &Tree, id: NodeId, out: &mut Vec<ReplPart>) {
    match tree.node(id) {
        Node::Lit(text) => {
            if !text.is_empty() {
                out.push(ReplPart::Lit(text.clone()));
            }
        }
        Node::VarRef(name) if name == "match" => out.push(ReplPart::Consumed),
        Node::VarRef(name) => out.push(ReplPart::Var(name.clone())),
        Node::ReplSeq(items) => {
            for item in items {
                flatten_repl(tree, *item, out);
            }
        }
        Node::Item(Symbol::Char(c)) => out.push(ReplPart::Lit(c.to_string())),
        other => unreachable!("replacement flattening on {other:?}"),
    }
}

fn temp_name(rule: usize, name: &str) -> String {
    format!("%r{rule}.{name}")
}

/// Compile a parsed rule set into a table machine.
pub fn build(set: &RuleSet, params: Params) -> Result<Machine, BuildError> {
    let mut positions: Vec<Pos> = Vec::new();
    let mut follow: Vec<BTreeSet<usize>> = Vec::new();
    let mut start_set: BTreeSet<usize> = BTreeSet::new();
    let mut rule_captures: Vec<Vec<String>> = Vec::new();

    let mut machine = Machine::new(params);
    let mut rule_exprs: Vec<ExprId> = Vec::new();

    for (rule, &(pattern, replacement)) in set.rules.iter().enumerate() {
        let mut analyzer = Analyzer {
            tree: &set.tree,
            rule,
            fold_case: params.get(Params::CASE_INSENSITIVE),
            captures: Vec::new(),
            positions: std::mem::take(&mut positions),
            follow: std::mem::take(&mut follow),
        };
        let frag = analyzer.analyze(pattern)?;
        if frag.nullable {
            return Err(BuildError::EmptyMatch { rule });
        }
        for &p in &frag.last {
            analyzer.positions[p].last = true;
        }
        start_set.extend(frag.first.iter().copied());
        let mut caps: BTreeSet<String> = BTreeSet::new();
        for p in &analyzer.positions {
            if p.rule == rule {
                caps.extend(p.captures.iter().cloned());
            }
        }
        rule_captures.push(caps.into_iter().collect());
        positions = analyzer.positions;
        follow = analyzer.follow;

        let mut parts = Vec::new();
        flatten_repl(&set.tree, replacement, &mut parts);
        rule_exprs.push(machine.intern_expr(Repl(parts)));
    }

    // Subset construction. A builder state is the live position set plus
    // whether the attempt already has a tentative completion pending.
    type Key = (BTreeSet<usize>, bool);
    let mut index: HashMap<Key, usize> = HashMap::new();
    let mut worklist: VecDeque<(Key, usize)> = VecDeque::new();
    let start_key: Key = (start_set, false);
    let start = machine.add_state(State::scan());
    index.insert(start_key.clone(), start);
    worklist.push_back((start_key, start));
    let mut accept: Option<usize> = None;

    while let Some(((subset, accepted), state_idx)) = worklist.pop_front() {
        // Split the subset's input sets into disjoint classes.
        let mut classes: Vec<(InputSet, Vec<usize>)> = Vec::new();
        for &p in &subset {
            let mut rem = positions[p].set.clone();
            let mut next = Vec::new();
            for (class, members) in classes {
                let (both, class_only, rem_only) = class.intersect_and_two_excepts(&rem);
                if !both.is_empty() {
                    let mut with = members.clone();
                    with.push(p);
                    next.push((both, with));
                }
                if !class_only.is_empty() {
                    next.push((class_only, members));
                }
                rem = rem_only;
            }
            if !rem.is_empty() {
                next.push((rem, vec![p]));
            }
            classes = next;
        }

        for (class, members) in classes {
            let successors: BTreeSet<usize> = members
                .iter()
                .flat_map(|&p| follow[p].iter().copied())
                .collect();
            let winner = members
                .iter()
                .filter(|&&p| positions[p].last)
                .map(|&p| positions[p].rule)
                .min();

            let mut actions = Vec::new();
            let mut appended: BTreeSet<(usize, &String)> = BTreeSet::new();
            for &p in &members {
                for name in &positions[p].captures {
                    appended.insert((positions[p].rule, name));
                }
            }
            for (rule, name) in appended {
                actions.push(Action::AppendVar {
                    depth: 0,
                    name: temp_name(rule, name),
                    item: None,
                });
            }

            let target = match winner {
                Some(rule) => {
                    let remove = u32::from(accepted);
                    let expr = Some(rule_exprs[rule]);
                    if successors.is_empty() {
                        for name in &rule_captures[rule] {
                            actions.push(Action::RenameVar {
                                src: temp_name(rule, name),
                                dst: name.clone(),
                            });
                        }
                        actions.push(Action::InsertResult { remove, expr });
                        actions.push(Action::ReturnResult { keep: 0 });
                        *accept.get_or_insert_with(|| machine.add_state(State::accept()))
                    } else {
                        for name in &rule_captures[rule] {
                            actions.push(Action::CopyVar {
                                depth: 0,
                                src: temp_name(rule, name),
                                dst: name.clone(),
                            });
                        }
                        actions.push(Action::InsertResult { remove, expr });
                        intern_state(
                            &mut machine,
                            &mut index,
                            &mut worklist,
                            (successors, true),
                        )?
                    }
                }
                None => {
                    if successors.is_empty() {
                        // Dead by absence: no link at all.
                        continue;
                    }
                    intern_state(
                        &mut machine,
                        &mut index,
                        &mut worklist,
                        (successors, accepted),
                    )?
                }
            };
            machine.states[state_idx].add_link(Link {
                set: class,
                target,
                actions,
            });
        }
    }

    let stats = machine.stats();
    debug!(
        states = stats.states,
        links = stats.links,
        exprs = stats.exprs,
        "table built"
    );
    Ok(machine)
}

fn intern_state(
    machine: &mut Machine,
    index: &mut HashMap<(BTreeSet<usize>, bool), usize>,
    worklist: &mut VecDeque<((BTreeSet<usize>, bool), usize)>,
    key: (BTreeSet<usize>, bool),
) -> Result<usize, BuildError> {
    if let Some(&idx) = index.get(&key) {
        return Ok(idx);
    }
    if machine.states.len() >= MAX_STATES {
        return Err(BuildError::TooLarge { limit: MAX_STATES });
    }
    let idx = machine.add_state(State::scan());
    index.insert(key.clone(), idx);
    worklist.push_back((key, idx));
    Ok(idx)
}
