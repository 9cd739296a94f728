use crate::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The shape of an input set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetKind {
    /// Epsilon: a zero-width edge that consumes no symbol.
    Zero,
    /// Membership in `values`.
    Include,
    /// The complement of `values`; empty `values` means "everything".
    Exclude,
}

/// One edge's admissible input alphabet.
///
/// `contains(x) = values.contains(x) XOR (kind == Exclude)`, with `Zero`
/// containing nothing. The intersect/except tables below are the
/// determinization primitive: any two edges leaving the same state can be
/// split into three disjoint pieces (common, left-only, right-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSet {
    kind: SetKind,
    values: BTreeSet<Symbol>,
}

impl InputSet {
    /// The zero-width (epsilon) set.
    pub fn zero() -> InputSet {
        InputSet {
            kind: SetKind::Zero,
            values: BTreeSet::new(),
        }
    }

    /// An inclusion set over the given symbols.
    pub fn include(values: impl IntoIterator<Item = Symbol>) -> InputSet {
        InputSet {
            kind: SetKind::Include,
            values: values.into_iter().collect(),
        }
    }

    /// An exclusion set: everything except the given symbols.
    pub fn exclude(values: impl IntoIterator<Item = Symbol>) -> InputSet {
        InputSet {
            kind: SetKind::Exclude,
            values: values.into_iter().collect(),
        }
    }

    /// Every symbol, including end-of-source.
    pub fn any() -> InputSet {
        InputSet::exclude([])
    }

    /// A single symbol.
    pub fn single(sym: Symbol) -> InputSet {
        InputSet::include([sym])
    }

    /// The end-of-source set.
    pub fn end() -> InputSet {
        InputSet::single(Symbol::End)
    }

    pub fn kind(&self) -> SetKind {
        self.kind
    }

    pub fn values(&self) -> &BTreeSet<Symbol> {
        &self.values
    }

    /// Membership test.
    pub fn contains(&self, sym: Symbol) -> bool {
        match self.kind {
            SetKind::Zero => false,
            SetKind::Include => self.values.contains(&sym),
            SetKind::Exclude => !self.values.contains(&sym),
        }
    }

    /// True when the set admits no symbol at all.
    ///
    /// `Zero` is not empty — it is the zero-width edge.
    pub fn is_empty(&self) -> bool {
        self.kind == SetKind::Include && self.values.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.kind == SetKind::Zero
    }

    /// True when the set admits only end-of-source.
    pub fn is_finishing(&self) -> bool {
        self.kind == SetKind::Include
            && self.values.len() == 1
            && self.values.contains(&Symbol::End)
    }

    /// If the set admits exactly one symbol, return it.
    pub fn as_single(&self) -> Option<Symbol> {
        if self.kind == SetKind::Include && self.values.len() == 1 {
            self.values.iter().next().copied()
        } else {
            None
        }
    }

    /// Set intersection.
    ///
    /// `Zero` only intersects with `Zero`: a zero-width edge cannot coexist
    /// with a symbol-consuming edge on the same transition.
    pub fn intersect(&self, other: &InputSet) -> InputSet {
        use SetKind::*;
        match (self.kind, other.kind) {
            (Zero, Zero) => InputSet::zero(),
            (Zero, _) | (_, Zero) => InputSet::include([]),
            (Include, Include) => {
                InputSet::include(self.values.intersection(&other.values).copied())
            }
            (Include, Exclude) => {
                InputSet::include(self.values.difference(&other.values).copied())
            }
            (Exclude, Include) => {
                InputSet::include(other.values.difference(&self.values).copied())
            }
            (Exclude, Exclude) => {
                InputSet::exclude(self.values.union(&other.values).copied())
            }
        }
    }

    /// Set difference `self − other`.
    pub fn except(&self, other: &InputSet) -> InputSet {
        use SetKind::*;
        match (self.kind, other.kind) {
            (Zero, Zero) => InputSet::include([]),
            (Zero, _) => InputSet::zero(),
            (_, Zero) => self.clone(),
            (Include, Include) => {
                InputSet::include(self.values.difference(&other.values).copied())
            }
            (Include, Exclude) => {
                InputSet::include(self.values.intersection(&other.values).copied())
            }
            (Exclude, Include) => {
                InputSet::exclude(self.values.union(&other.values).copied())
            }
            (Exclude, Exclude) => {
                InputSet::include(other.values.difference(&self.values).copied())
            }
        }
    }

    /// The three-way split `(a∩b, a−b, b−a)`.
    ///
    /// Any input reaching a state whose two candidate edges carried `a` and
    /// `b` follows exactly one of the three resulting pieces.
    pub fn intersect_and_two_excepts(&self, other: &InputSet) -> (InputSet, InputSet, InputSet) {
        (
            self.intersect(other),
            self.except(other),
            other.except(self),
        )
    }
}

impl fmt::Display for InputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SetKind::Zero => write!(f, "<zero>"),
            SetKind::Include => {
                write!(f, "+")?;
                for v in &self.values {
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            SetKind::Exclude => {
                write!(f, "-")?;
                for v in &self.values {
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}
