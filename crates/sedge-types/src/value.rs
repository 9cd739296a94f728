use crate::Symbol;
use std::fmt;

/// The result of matching: a bound value.
///
/// `Named` carries a capture bound to a variable name; its payload widens
/// into a `Seq` when the same name captures repeatedly. `Tuple` holds
/// multiple simultaneous captures. `Seq` wraps an arbitrary sequence so it
/// can be handled uniformly as one scalar-like item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A scalar input symbol.
    Sym(Symbol),
    /// A capture bound to a variable name.
    Named { name: String, value: Box<Value> },
    /// Multiple simultaneous captures, in order.
    Tuple(Vec<Value>),
    /// An arbitrary sequence treated as a single item.
    Seq(Vec<Value>),
}

impl Value {
    /// Wrap a string as a sequence of character symbols.
    pub fn text(s: &str) -> Value {
        Value::Seq(s.chars().map(|c| Value::Sym(Symbol::Char(c))).collect())
    }

    /// Build a named capture.
    pub fn named(name: impl Into<String>, value: Value) -> Value {
        Value::Named {
            name: name.into(),
            value: Box::new(value),
        }
    }

    /// Merge a new binding into an existing value.
    ///
    /// Total over all four shape combinations:
    /// - named/named under the same name widens the payload into a `Seq`
    ///   and appends (repetition accumulates, never overwrites);
    /// - tuple/named with a matching member merges into that member;
    /// - anything else pairs up into a `Tuple`.
    pub fn merge(existing: Value, incoming: Value) -> Value {
        match (existing, incoming) {
            (
                Value::Named { name: a, value: va },
                Value::Named { name: b, value: vb },
            ) if a == b => Value::Named {
                name: a,
                value: Box::new(Self::widen(*va, *vb)),
            },
            (Value::Tuple(mut items), incoming @ Value::Named { .. }) => {
                let name = incoming.name().map(str::to_owned);
                if let Some(pos) = items
                    .iter()
                    .position(|it| it.name().is_some() && it.name() == name.as_deref())
                {
                    let prior = items.remove(pos);
                    items.insert(pos, Self::merge(prior, incoming));
                    Value::Tuple(items)
                } else {
                    items.push(incoming);
                    Value::Tuple(items)
                }
            }
            (existing, Value::Tuple(incoming)) => incoming
                .into_iter()
                .fold(existing, |acc, item| Self::merge(acc, item)),
            (existing, incoming) => Value::Tuple(vec![existing, incoming]),
        }
    }

    /// Append `next` to `prior`, widening `prior` into a `Seq` if it is not
    /// one already.
    fn widen(prior: Value, next: Value) -> Value {
        match prior {
            Value::Seq(mut items) => {
                items.push(next);
                Value::Seq(items)
            }
            scalar => Value::Seq(vec![scalar, next]),
        }
    }

    /// The capture name, if this is a named value.
    pub fn name(&self) -> Option<&str> {
        match self {
            Value::Named { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Flatten into the underlying symbol sequence, in capture order.
    pub fn flatten(&self, out: &mut Vec<Symbol>) {
        match self {
            Value::Sym(s) => out.push(*s),
            Value::Named { value, .. } => value.flatten(out),
            Value::Tuple(items) | Value::Seq(items) => {
                for item in items {
                    item.flatten(out);
                }
            }
        }
    }

    /// Render the flattened symbols as a string (End renders as nothing).
    pub fn render(&self) -> String {
        let mut syms = Vec::new();
        self.flatten(&mut syms);
        syms.iter().filter_map(|s| s.as_char()).collect()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Sym(s) => write!(f, "{s}"),
            Value::Named { name, value } => match value.as_ref() {
                Value::Sym(s) => write!(f, "{name}:{s}"),
                compound => {
                    write!(f, "{name}:{{")?;
                    fmt_items(f, compound)?;
                    write!(f, "}}")
                }
            },
            Value::Tuple(items) | Value::Seq(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn fmt_items(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Tuple(items) | Value::Seq(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }
        other => write!(f, "{other}"),
    }
}
