//! Predicate candidacy: can an expression be evaluated below a given
//! operator, and against which single alias?

use std::collections::BTreeSet;

use sieve_core::expr::Expr;
use sieve_core::resolver::RowResolver;

/// Facts about one expression relative to the aliases an operator sees.
/// Computed on demand, never stored in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprInfo {
    /// No non-deterministic or stateful call anywhere in the tree.
    pub deterministic: bool,
    /// Every column reference resolves to a visible alias.
    pub visible: bool,
    pub aliases: BTreeSet<String>,
}

impl ExprInfo {
    pub fn is_pushable(&self) -> bool {
        self.deterministic && self.visible
    }

    /// The alias a pushable expression constrains, if it constrains exactly one.
    pub fn single_alias(&self) -> Option<&str> {
        if !self.is_pushable() || self.aliases.len() != 1 {
            return None;
        }
        self.aliases.iter().next().map(String::as_str)
    }
}

/// Bottom-up analysis of `expr` against `visible`.
pub fn analyze(expr: &Expr, visible: &RowResolver) -> ExprInfo {
    match expr {
        Expr::Constant(_) => ExprInfo {
            deterministic: true,
            visible: true,
            aliases: BTreeSet::new(),
        },
        Expr::Column(key) => ExprInfo {
            deterministic: true,
            visible: visible.contains_alias(&key.alias),
            aliases: BTreeSet::from([key.alias.clone()]),
        },
        Expr::Call { func, args } => {
            let mut info = ExprInfo {
                deterministic: func.is_deterministic() && !func.is_stateful(),
                visible: true,
                aliases: BTreeSet::new(),
            };
            for arg in args {
                let child = analyze(arg, visible);
                info.deterministic &= child.deterministic;
                info.visible &= child.visible;
                info.aliases.extend(child.aliases);
            }
            info
        }
    }
}
