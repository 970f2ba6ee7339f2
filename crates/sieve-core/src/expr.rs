//! Scalar expression trees.
//!
//! Trees are immutable once built. Every rewrite (column substitution,
//! conjunct splitting, merging) produces a fresh tree, so the same predicate
//! can be handed to several operators without aliasing.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::types::Scalar;

/// Qualified column reference: `alias.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    pub alias: String,
    pub name: String,
}

impl ColumnKey {
    pub fn new(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            name: name.into(),
        }
    }

    /// Parse `alias.name`. The alias is everything before the first dot.
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once('.') {
            Some((alias, name)) if !alias.is_empty() && !name.is_empty() => {
                Ok(Self::new(alias, name))
            }
            _ => Err(Error::Analysis(format!(
                "column reference '{qualified}' must be qualified as alias.name"
            ))),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.name)
    }
}

/// The closed set of functions and operators an expression may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Func {
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    IsNull,
    IsNotNull,
    In,
    Upper,
    Lower,
    Concat,
    /// Uniform random double in [0, 1).
    Rand,
    /// Monotonic row counter; carries state across rows.
    RowSequence,
}

impl Func {
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Func::Rand | Func::RowSequence)
    }

    pub fn is_stateful(self) -> bool {
        matches!(self, Func::RowSequence)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Func::Eq | Func::NotEq | Func::Lt | Func::LtEq | Func::Gt | Func::GtEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Func::Plus | Func::Minus | Func::Multiply | Func::Divide)
    }

    /// Look up a function by the names accepted in plan files.
    pub fn from_name(name: &str) -> Result<Func> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "and" => Func::And,
            "or" => Func::Or,
            "not" => Func::Not,
            "eq" | "=" | "==" => Func::Eq,
            "neq" | "ne" | "<>" | "!=" => Func::NotEq,
            "lt" | "<" => Func::Lt,
            "lte" | "le" | "<=" => Func::LtEq,
            "gt" | ">" => Func::Gt,
            "gte" | "ge" | ">=" => Func::GtEq,
            "plus" | "add" | "+" => Func::Plus,
            "minus" | "sub" | "-" => Func::Minus,
            "multiply" | "mul" | "*" => Func::Multiply,
            "divide" | "div" | "/" => Func::Divide,
            "is_null" | "isnull" => Func::IsNull,
            "is_not_null" | "isnotnull" => Func::IsNotNull,
            "in" => Func::In,
            "upper" => Func::Upper,
            "lower" => Func::Lower,
            "concat" => Func::Concat,
            "rand" => Func::Rand,
            "row_sequence" => Func::RowSequence,
            other => return Err(Error::Analysis(format!("unknown function '{other}'"))),
        })
    }

    /// Check `args` against this function's signature and return the result type.
    ///
    /// `None` stands for an untyped NULL literal, which fits any parameter.
    pub fn return_type(self, args: &[Option<DataType>]) -> Result<DataType> {
        let mismatch = || {
            let shown: Vec<String> = args
                .iter()
                .map(|a| a.map_or_else(|| "NULL".to_string(), |t| t.to_string()))
                .collect();
            Error::Type(format!("{self:?} cannot be applied to ({})", shown.join(", ")))
        };
        let arity = |n: usize| if args.len() == n { Ok(()) } else { Err(mismatch()) };
        let is = |t: &Option<DataType>, want: DataType| t.map_or(true, |t| t == want);

        match self {
            Func::And | Func::Or => {
                if args.len() < 2 || !args.iter().all(|a| is(a, DataType::Boolean)) {
                    return Err(mismatch());
                }
                Ok(DataType::Boolean)
            }
            Func::Not => {
                arity(1)?;
                if !is(&args[0], DataType::Boolean) {
                    return Err(mismatch());
                }
                Ok(DataType::Boolean)
            }
            Func::Eq | Func::NotEq | Func::Lt | Func::LtEq | Func::Gt | Func::GtEq => {
                arity(2)?;
                match (args[0], args[1]) {
                    (Some(l), Some(r)) if !l.comparable_with(r) => Err(mismatch()),
                    _ => Ok(DataType::Boolean),
                }
            }
            Func::Plus | Func::Minus | Func::Multiply | Func::Divide => {
                arity(2)?;
                let promoted = match (args[0], args[1]) {
                    (Some(l), Some(r)) => l.promote(r).ok_or_else(|| mismatch())?,
                    (Some(t), None) | (None, Some(t)) if t.is_numeric() => t,
                    (None, None) => DataType::Int64,
                    _ => return Err(mismatch()),
                };
                Ok(if self == Func::Divide {
                    DataType::Float64
                } else {
                    promoted
                })
            }
            Func::IsNull | Func::IsNotNull => {
                arity(1)?;
                Ok(DataType::Boolean)
            }
            Func::In => {
                if args.len() < 2 {
                    return Err(mismatch());
                }
                if let Some(probe) = args[0] {
                    if args[1..].iter().flatten().any(|t| !probe.comparable_with(*t)) {
                        return Err(mismatch());
                    }
                }
                Ok(DataType::Boolean)
            }
            Func::Upper | Func::Lower => {
                arity(1)?;
                if !is(&args[0], DataType::Utf8) {
                    return Err(mismatch());
                }
                Ok(DataType::Utf8)
            }
            Func::Concat => {
                if args.is_empty() || !args.iter().all(|a| is(a, DataType::Utf8)) {
                    return Err(mismatch());
                }
                Ok(DataType::Utf8)
            }
            Func::Rand => {
                arity(0)?;
                Ok(DataType::Float64)
            }
            Func::RowSequence => {
                arity(0)?;
                Ok(DataType::Int64)
            }
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Func::And => "AND",
            Func::Or => "OR",
            Func::Not => "NOT",
            Func::Eq => "=",
            Func::NotEq => "<>",
            Func::Lt => "<",
            Func::LtEq => "<=",
            Func::Gt => ">",
            Func::GtEq => ">=",
            Func::Plus => "+",
            Func::Minus => "-",
            Func::Multiply => "*",
            Func::Divide => "/",
            Func::IsNull => "IS NULL",
            Func::IsNotNull => "IS NOT NULL",
            Func::In => "IN",
            Func::Upper => "upper",
            Func::Lower => "lower",
            Func::Concat => "concat",
            Func::Rand => "rand",
            Func::RowSequence => "row_sequence",
        }
    }

    /// Binding strength used when rendering; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            Func::Or => 1,
            Func::And => 2,
            Func::Not => 3,
            Func::Eq
            | Func::NotEq
            | Func::Lt
            | Func::LtEq
            | Func::Gt
            | Func::GtEq
            | Func::IsNull
            | Func::IsNotNull
            | Func::In => 4,
            Func::Plus | Func::Minus => 5,
            Func::Multiply | Func::Divide => 6,
            Func::Upper | Func::Lower | Func::Concat | Func::Rand | Func::RowSequence => 9,
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Column(ColumnKey),
    Constant(Scalar),
    Call { func: Func, args: Vec<Expr> },
}

impl Expr {
    pub fn col(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column(ColumnKey::new(alias, name))
    }

    pub fn lit(value: impl Into<Scalar>) -> Self {
        Expr::Constant(value.into())
    }

    pub fn null() -> Self {
        Expr::Constant(Scalar::Null)
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Self {
        Expr::Call { func, args }
    }

    pub fn binary(left: Expr, func: Func, right: Expr) -> Self {
        Expr::Call {
            func,
            args: vec![left, right],
        }
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(self, Func::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::binary(self, Func::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::call(Func::Not, vec![self])
    }

    /// AND of all terms, flattening nested ANDs. `None` when there are no terms.
    pub fn conjunction(terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        Self::fold_nary(Func::And, terms)
    }

    /// OR of all terms, flattening nested ORs. `None` when there are no terms.
    pub fn disjunction(terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        Self::fold_nary(Func::Or, terms)
    }

    fn fold_nary(func: Func, terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        let mut flat = Vec::new();
        for term in terms {
            match term {
                Expr::Call { func: f, args } if f == func => flat.extend(args),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Expr::Call { func, args: flat }),
        }
    }

    /// Top-level AND terms, in order. A non-AND expression is its own single conjunct.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(e) = stack.pop() {
            match e {
                Expr::Call {
                    func: Func::And,
                    args,
                } => stack.extend(args.iter().rev()),
                other => out.push(other),
            }
        }
        out
    }

    pub fn into_conjuncts(self) -> Vec<Expr> {
        self.conjuncts().into_iter().cloned().collect()
    }

    pub fn columns(&self) -> BTreeSet<&ColumnKey> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Column(key) = e {
                out.insert(key);
            }
        });
        out
    }

    pub fn referenced_aliases(&self) -> BTreeSet<&str> {
        self.columns().into_iter().map(|c| c.alias.as_str()).collect()
    }

    /// No non-deterministic or stateful call anywhere in the tree.
    pub fn is_deterministic(&self) -> bool {
        let mut deterministic = true;
        self.visit(&mut |e| {
            if let Expr::Call { func, .. } = e {
                deterministic &= func.is_deterministic() && !func.is_stateful();
            }
        });
        deterministic
    }

    pub fn is_constant(&self) -> bool {
        self.columns().is_empty() && self.is_deterministic()
    }

    /// Pre-order visit of every node.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        let mut stack = vec![self];
        while let Some(e) = stack.pop() {
            f(e);
            if let Expr::Call { args, .. } = e {
                stack.extend(args.iter().rev());
            }
        }
    }

    /// Build a new tree with every column reference replaced by `f`'s result.
    pub fn try_rewrite_columns<E>(
        &self,
        f: &mut impl FnMut(&ColumnKey) -> std::result::Result<Expr, E>,
    ) -> std::result::Result<Expr, E> {
        Ok(match self {
            Expr::Column(key) => f(key)?,
            Expr::Constant(v) => Expr::Constant(v.clone()),
            Expr::Call { func, args } => Expr::Call {
                func: *func,
                args: args
                    .iter()
                    .map(|a| a.try_rewrite_columns(f))
                    .collect::<std::result::Result<Vec<_>, E>>()?,
            },
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Call { func, .. } => func.precedence(),
            _ => 10,
        }
    }

    fn fmt_child(&self, child: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if child.precedence() < self.precedence() {
            write!(f, "({child})")
        } else {
            write!(f, "{child}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(key) => write!(f, "{key}"),
            Expr::Constant(v) => write!(f, "{v}"),
            Expr::Call { func, args } => match func {
                Func::And | Func::Or => {
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, " {func} ")?;
                        }
                        self.fmt_child(arg, f)?;
                    }
                    Ok(())
                }
                Func::Not => {
                    write!(f, "NOT ")?;
                    args.first().map_or(Ok(()), |a| self.fmt_child(a, f))
                }
                Func::IsNull | Func::IsNotNull => {
                    if let Some(a) = args.first() {
                        self.fmt_child(a, f)?;
                    }
                    write!(f, " {func}")
                }
                Func::In => {
                    if let Some((probe, list)) = args.split_first() {
                        self.fmt_child(probe, f)?;
                        let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                        write!(f, " IN ({})", items.join(", "))?;
                    }
                    Ok(())
                }
                _ if func.is_comparison() || func.is_arithmetic() => {
                    if let [l, r] = args.as_slice() {
                        self.fmt_child(l, f)?;
                        write!(f, " {func} ")?;
                        // Left-associative: an equal-precedence right operand needs parens.
                        if r.precedence() <= self.precedence() {
                            write!(f, "({r})")
                        } else {
                            write!(f, "{r}")
                        }
                    } else {
                        write!(f, "{func}(?)")
                    }
                }
                _ => {
                    let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                    write!(f, "{func}({})", items.join(", "))
                }
            },
        }
    }
}
