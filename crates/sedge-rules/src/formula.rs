//! Deferred binding formulas.
//!
//! A formula relates a left expression (with its free variable set) to a
//! right expression. It stays pending until every variable on one side is
//! bound, then unifies the other side: binding a still-free variable or
//! checking equality of two bound values.

use sedge_types::Value;

/// One side's expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaExpr {
    /// A variable reference.
    Var(String),
    /// An already-materialized value.
    Value(Value),
}

/// One side of a formula: an expression plus its free variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaSide {
    pub expr: FormulaExpr,
    pub vars: Vec<String>,
}

impl FormulaSide {
    pub fn var(name: impl Into<String>) -> FormulaSide {
        let name = name.into();
        FormulaSide {
            expr: FormulaExpr::Var(name.clone()),
            vars: vec![name],
        }
    }

    pub fn value(value: Value) -> FormulaSide {
        FormulaSide {
            expr: FormulaExpr::Value(value),
            vars: Vec::new(),
        }
    }
}

/// A deferred equation between two sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub left: FormulaSide,
    pub right: FormulaSide,
}

impl Formula {
    pub fn new(left: FormulaSide, right: FormulaSide) -> Formula {
        Formula { left, right }
    }

    /// Equate a variable with a value. Resolves as soon as it is added:
    /// an unbound variable takes the value immediately.
    pub fn bind(name: impl Into<String>, value: Value) -> Formula {
        Formula::new(FormulaSide::var(name), FormulaSide::value(value))
    }

    /// Require a variable to equal a value once something else binds it.
    ///
    /// Unlike [`Formula::bind`], this stays pending while the variable is
    /// free: the value side lists the variable too, so neither side is
    /// ready until a capture binds it. Resolution is then a pure
    /// unification check.
    pub fn require(name: impl Into<String>, value: Value) -> Formula {
        let name = name.into();
        Formula::new(
            FormulaSide::var(name.clone()),
            FormulaSide {
                expr: FormulaExpr::Value(value),
                vars: vec![name],
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_free_vars() {
        let side = FormulaSide::var("x");
        assert_eq!(side.vars, vec!["x".to_string()]);
        assert!(FormulaSide::value(Value::text("a")).vars.is_empty());
    }
}
