//! Tree-walking evaluator over partially bound rows.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use sieve_core::expr::{ColumnKey, Expr, Func};
use sieve_core::resolver::RowResolver;
use sieve_core::schema::DataType;
use sieve_core::types::Scalar;

use crate::error::{EvalError, Result};

/// Outcome of folding an expression.
///
/// `Value(Scalar::Null)` is a definite SQL NULL; `Indeterminate` means the
/// result depends on a column that has no bound value.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Value(Scalar),
    Indeterminate,
}

impl EvalResult {
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, EvalResult::Indeterminate)
    }

    pub fn value(&self) -> Option<&Scalar> {
        match self {
            EvalResult::Value(v) => Some(v),
            EvalResult::Indeterminate => None,
        }
    }

    /// Definite boolean outcome, if there is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.value().and_then(Scalar::as_bool)
    }
}

/// Known column values for one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: BTreeMap<ColumnKey, Scalar>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, key: ColumnKey, value: Scalar) -> Option<Scalar> {
        self.values.insert(key, value)
    }

    pub fn with(mut self, key: ColumnKey, value: impl Into<Scalar>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &ColumnKey) -> Option<&Scalar> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnKey, &Scalar)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(ColumnKey, Scalar)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (ColumnKey, Scalar)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// An expression type-checked against a row layout, ready to be folded
/// against many binding sets.
#[derive(Debug, Clone)]
pub struct ExprEvaluator {
    expr: Expr,
    row: RowResolver,
    result_type: Option<DataType>,
}

impl ExprEvaluator {
    /// Resolve every column of `expr` in `row` and check every call's
    /// signature. `row` must already include any partition columns.
    pub fn prepare(expr: Expr, row: &RowResolver) -> Result<Self> {
        let result_type = row.infer_type(&expr)?;
        Ok(Self {
            expr,
            row: row.clone(),
            result_type,
        })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// `None` when the expression is an untyped NULL.
    pub fn result_type(&self) -> Option<DataType> {
        self.result_type
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<EvalResult> {
        for (key, value) in bindings.iter() {
            let declared = self.row.resolve(key)?;
            if let Some(actual) = value.data_type() {
                if !declared.comparable_with(actual) {
                    return Err(EvalError::Type(format!(
                        "{key} is declared {declared} but bound to {value}"
                    )));
                }
            }
        }
        evaluate(&self.expr, bindings)
    }
}

/// Fold `expr` without a prior type check. Signature violations surface as
/// `EvalError::Type` when the offending call is reached with concrete values.
pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<EvalResult> {
    match expr {
        Expr::Constant(v) => Ok(EvalResult::Value(v.clone())),
        Expr::Column(key) => Ok(bindings
            .get(key)
            .cloned()
            .map_or(EvalResult::Indeterminate, EvalResult::Value)),
        Expr::Call { func, args } => {
            // A value that changes per row or per call cannot be folded.
            if !func.is_deterministic() || func.is_stateful() {
                return Ok(EvalResult::Indeterminate);
            }
            let results = args
                .iter()
                .map(|a| evaluate(a, bindings))
                .collect::<Result<Vec<_>>>()?;
            match func {
                Func::And | Func::Or => fold_logical(*func, &results),
                _ => {
                    let mut values = Vec::with_capacity(results.len());
                    for r in results {
                        match r {
                            EvalResult::Value(v) => values.push(v),
                            EvalResult::Indeterminate => return Ok(EvalResult::Indeterminate),
                        }
                    }
                    apply(*func, &values).map(EvalResult::Value)
                }
            }
        }
    }
}

/// AND/OR with short-circuit: one operand equal to the dominant value
/// (false for AND, true for OR) decides the result even if other operands
/// are indeterminate.
fn fold_logical(func: Func, operands: &[EvalResult]) -> Result<EvalResult> {
    let dominant = func == Func::Or;
    let mut indeterminate = false;
    let mut null = false;
    for operand in operands {
        match operand {
            EvalResult::Indeterminate => indeterminate = true,
            EvalResult::Value(Scalar::Null) => null = true,
            EvalResult::Value(Scalar::Bool(b)) if *b == dominant => {
                return Ok(EvalResult::Value(Scalar::Bool(dominant)))
            }
            EvalResult::Value(Scalar::Bool(_)) => {}
            EvalResult::Value(other) => {
                return Err(EvalError::Type(format!(
                    "{func} expects Boolean operands, got {other}"
                )))
            }
        }
    }
    Ok(if indeterminate {
        EvalResult::Indeterminate
    } else if null {
        EvalResult::Value(Scalar::Null)
    } else {
        EvalResult::Value(Scalar::Bool(!dominant))
    })
}

fn signature_error(func: Func, args: &[Scalar]) -> EvalError {
    let shown: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    EvalError::Type(format!("{func:?} cannot be applied to ({})", shown.join(", ")))
}

fn apply(func: Func, args: &[Scalar]) -> Result<Scalar> {
    let bad = || signature_error(func, args);
    match (func, args) {
        (Func::Not, [Scalar::Null]) => Ok(Scalar::Null),
        (Func::Not, [Scalar::Bool(b)]) => Ok(Scalar::Bool(!b)),
        (Func::IsNull, [v]) => Ok(Scalar::Bool(v.is_null())),
        (Func::IsNotNull, [v]) => Ok(Scalar::Bool(!v.is_null())),
        (f, [l, r]) if f.is_comparison() => compare(f, l, r),
        (f, [l, r]) if f.is_arithmetic() => arithmetic(f, l, r),
        (Func::In, [probe, list @ ..]) if !list.is_empty() => in_list(func, probe, list),
        (Func::Upper | Func::Lower, [Scalar::Null]) => Ok(Scalar::Null),
        (Func::Upper, [Scalar::Str(s)]) => Ok(Scalar::Str(s.to_uppercase())),
        (Func::Lower, [Scalar::Str(s)]) => Ok(Scalar::Str(s.to_lowercase())),
        (Func::Concat, parts) if !parts.is_empty() => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Scalar::Null => return Ok(Scalar::Null),
                    Scalar::Str(s) => out.push_str(s),
                    _ => return Err(bad()),
                }
            }
            Ok(Scalar::Str(out))
        }
        _ => Err(bad()),
    }
}

fn compare(func: Func, l: &Scalar, r: &Scalar) -> Result<Scalar> {
    if l.is_null() || r.is_null() {
        return Ok(Scalar::Null);
    }
    let ord = l
        .compare(r)
        .ok_or_else(|| signature_error(func, &[l.clone(), r.clone()]))?;
    let holds = match func {
        Func::Eq => ord == Ordering::Equal,
        Func::NotEq => ord != Ordering::Equal,
        Func::Lt => ord == Ordering::Less,
        Func::LtEq => ord != Ordering::Greater,
        Func::Gt => ord == Ordering::Greater,
        Func::GtEq => ord != Ordering::Less,
        _ => return Err(signature_error(func, &[l.clone(), r.clone()])),
    };
    Ok(Scalar::Bool(holds))
}

fn arithmetic(func: Func, l: &Scalar, r: &Scalar) -> Result<Scalar> {
    if l.is_null() || r.is_null() {
        return Ok(Scalar::Null);
    }
    let bad = || signature_error(func, &[l.clone(), r.clone()]);
    let promoted = match (l.data_type(), r.data_type()) {
        (Some(lt), Some(rt)) => lt.promote(rt).ok_or_else(bad)?,
        _ => return Err(bad()),
    };

    if func == Func::Divide {
        let (x, y) = (l.as_f64().ok_or_else(bad)?, r.as_f64().ok_or_else(bad)?);
        return Ok(if y == 0.0 {
            Scalar::Null
        } else {
            Scalar::F64(x / y)
        });
    }

    if promoted.is_float() {
        let (x, y) = (l.as_f64().ok_or_else(bad)?, r.as_f64().ok_or_else(bad)?);
        let v = match func {
            Func::Plus => x + y,
            Func::Minus => x - y,
            _ => x * y,
        };
        return Ok(Scalar::F64(v));
    }

    // Integer arithmetic wraps on overflow at the promoted width.
    let (x, y) = (l.as_i64().ok_or_else(bad)?, r.as_i64().ok_or_else(bad)?);
    let v = match func {
        Func::Plus => x.wrapping_add(y),
        Func::Minus => x.wrapping_sub(y),
        _ => x.wrapping_mul(y),
    };
    Ok(if promoted == DataType::Int32 {
        Scalar::I32(v as i32)
    } else {
        Scalar::I64(v)
    })
}

/// `probe IN (list)`: true on a match, NULL if no match but the list holds a
/// NULL, false otherwise.
fn in_list(func: Func, probe: &Scalar, list: &[Scalar]) -> Result<Scalar> {
    if probe.is_null() {
        return Ok(Scalar::Null);
    }
    let mut saw_null = false;
    for item in list {
        if item.is_null() {
            saw_null = true;
            continue;
        }
        match probe.compare(item) {
            Some(Ordering::Equal) => return Ok(Scalar::Bool(true)),
            Some(_) => {}
            None => return Err(signature_error(func, &[probe.clone(), item.clone()])),
        }
    }
    Ok(if saw_null {
        Scalar::Null
    } else {
        Scalar::Bool(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::schema::{Field, Schema};

    fn sales_row() -> RowResolver {
        RowResolver::single(
            "s",
            Schema::new(vec![
                Field::new("amount", DataType::Int64, true),
                Field::new("region", DataType::Utf8, true),
                Field::new("rate", DataType::Float64, true),
            ]),
        )
    }

    fn amount() -> Expr {
        Expr::col("s", "amount")
    }

    fn region() -> Expr {
        Expr::col("s", "region")
    }

    fn key(name: &str) -> ColumnKey {
        ColumnKey::new("s", name)
    }

    fn fold(expr: &Expr, bindings: &Bindings) -> EvalResult {
        evaluate(expr, bindings).unwrap()
    }

    #[test]
    fn leaves() {
        let b = Bindings::new().with(key("region"), "EU");
        assert_eq!(fold(&Expr::lit(7i64), &b), EvalResult::Value(Scalar::I64(7)));
        assert_eq!(fold(&region(), &b), EvalResult::Value(Scalar::from("EU")));
        assert_eq!(fold(&amount(), &b), EvalResult::Indeterminate);
    }

    #[test]
    fn and_or_short_circuit_over_unbound_columns() {
        let unknown = Expr::binary(amount(), Func::Gt, Expr::lit(10i64));
        let none = Bindings::new();

        let e = Expr::lit(false).and(unknown.clone());
        assert_eq!(fold(&e, &none), EvalResult::Value(Scalar::Bool(false)));

        let e = Expr::lit(true).or(unknown.clone());
        assert_eq!(fold(&e, &none), EvalResult::Value(Scalar::Bool(true)));

        let e = Expr::lit(true).and(unknown.clone());
        assert_eq!(fold(&e, &none), EvalResult::Indeterminate);

        let e = unknown.clone().or(Expr::lit(false));
        assert_eq!(fold(&e, &none), EvalResult::Indeterminate);
    }

    #[test]
    fn three_valued_logic() {
        let none = Bindings::new();
        let null_and_false = Expr::null().and(Expr::lit(false));
        assert_eq!(fold(&null_and_false, &none), EvalResult::Value(Scalar::Bool(false)));
        let null_and_true = Expr::null().and(Expr::lit(true));
        assert_eq!(fold(&null_and_true, &none), EvalResult::Value(Scalar::Null));
        let null_or_true = Expr::null().or(Expr::lit(true));
        assert_eq!(fold(&null_or_true, &none), EvalResult::Value(Scalar::Bool(true)));
        assert_eq!(fold(&Expr::null().not(), &none), EvalResult::Value(Scalar::Null));

        let cmp = Expr::binary(Expr::null(), Func::Eq, Expr::lit(1i64));
        assert_eq!(fold(&cmp, &none), EvalResult::Value(Scalar::Null));
        let is_null = Expr::call(Func::IsNull, vec![Expr::null()]);
        assert_eq!(fold(&is_null, &none), EvalResult::Value(Scalar::Bool(true)));
    }

    #[test]
    fn arithmetic_promotes_and_divides_safely() {
        let b = Bindings::new().with(key("amount"), 5i64);
        let plus = Expr::binary(
            Expr::binary(amount(), Func::Plus, Expr::lit(1)),
            Func::Gt,
            Expr::lit(5),
        );
        assert_eq!(fold(&plus, &b).as_bool(), Some(true));

        let sum = Expr::binary(Expr::lit(2), Func::Plus, Expr::lit(3));
        assert_eq!(fold(&sum, &b), EvalResult::Value(Scalar::I32(5)));

        let mixed = Expr::binary(Expr::lit(2), Func::Multiply, Expr::lit(1.5));
        assert_eq!(fold(&mixed, &b), EvalResult::Value(Scalar::F64(3.0)));

        let div = Expr::binary(amount(), Func::Divide, Expr::lit(2i64));
        assert_eq!(fold(&div, &b), EvalResult::Value(Scalar::F64(2.5)));

        let by_zero = Expr::binary(amount(), Func::Divide, Expr::lit(0i64));
        assert_eq!(fold(&by_zero, &b), EvalResult::Value(Scalar::Null));
    }

    #[test]
    fn in_list_semantics() {
        let b = Bindings::new().with(key("region"), "EU");
        let hit = Expr::call(Func::In, vec![region(), Expr::lit("US"), Expr::lit("EU")]);
        assert_eq!(fold(&hit, &b).as_bool(), Some(true));

        let miss_with_null = Expr::call(Func::In, vec![region(), Expr::lit("US"), Expr::null()]);
        assert_eq!(fold(&miss_with_null, &b), EvalResult::Value(Scalar::Null));

        let miss = Expr::call(Func::In, vec![region(), Expr::lit("US")]);
        assert_eq!(fold(&miss, &b).as_bool(), Some(false));
    }

    #[test]
    fn strings() {
        let b = Bindings::new().with(key("region"), "eu");
        let up = Expr::binary(
            Expr::call(Func::Upper, vec![region()]),
            Func::Eq,
            Expr::lit("EU"),
        );
        assert_eq!(fold(&up, &b).as_bool(), Some(true));
        let cat = Expr::call(Func::Concat, vec![region(), Expr::lit("-1")]);
        assert_eq!(fold(&cat, &b), EvalResult::Value(Scalar::from("eu-1")));
    }

    #[test]
    fn non_deterministic_calls_never_fold() {
        let r = Expr::binary(Expr::call(Func::Rand, vec![]), Func::Lt, Expr::lit(0.5));
        assert_eq!(fold(&r, &Bindings::new()), EvalResult::Indeterminate);
    }

    #[test]
    fn unchecked_type_mismatch_is_an_error() {
        let bad = Expr::binary(Expr::lit("EU"), Func::Gt, Expr::lit(1i64));
        assert!(matches!(evaluate(&bad, &Bindings::new()), Err(EvalError::Type(_))));
        let bad_and = Expr::lit(1i64).and(Expr::lit(true));
        assert!(matches!(evaluate(&bad_and, &Bindings::new()), Err(EvalError::Type(_))));
    }

    #[test]
    fn prepare_type_checks_against_the_row() {
        let row = sales_row();
        let ok = Expr::binary(region(), Func::Eq, Expr::lit("EU"));
        let ev = ExprEvaluator::prepare(ok, &row).unwrap();
        assert_eq!(ev.result_type(), Some(DataType::Boolean));

        let unknown = Expr::binary(Expr::col("s", "nope"), Func::Eq, Expr::lit(1i64));
        assert!(matches!(
            ExprEvaluator::prepare(unknown, &row),
            Err(EvalError::UnknownColumn(_))
        ));

        let mismatch = Expr::binary(region(), Func::Eq, Expr::lit(1i64));
        assert!(matches!(
            ExprEvaluator::prepare(mismatch, &row),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn prepared_evaluator_checks_bindings() {
        let row = sales_row();
        let ev = ExprEvaluator::prepare(Expr::binary(region(), Func::Eq, Expr::lit("EU")), &row)
            .unwrap();

        let us = Bindings::new().with(key("region"), "US");
        assert_eq!(ev.evaluate(&us).unwrap().as_bool(), Some(false));
        let unbound = Bindings::new().with(key("amount"), 3i64);
        assert!(ev.evaluate(&unbound).unwrap().is_indeterminate());

        let wrong = Bindings::new().with(key("region"), 3i64);
        assert!(matches!(ev.evaluate(&wrong), Err(EvalError::Type(_))));
        let stray = Bindings::new().with(ColumnKey::new("p", "dt"), "2024");
        assert!(matches!(ev.evaluate(&stray), Err(EvalError::UnknownColumn(_))));
    }
}
