//! One pushdown processor per operator kind.
//!
//! A processor receives the state the operator's consumers agreed on and
//! decides, without touching the graph, what travels on to each input, what
//! stops here, and which of the operator's own conjuncts stay on it. `ppd`
//! applies those decisions once the walk is over.

mod barrier;
mod filter;
mod join;
mod limit;
mod reduce;
mod scan;
mod select;
mod udtf;

use sieve_core::config::PushdownConfig;
use sieve_core::dag::{OpKind, PlanGraph, PlanNode};
use sieve_core::error::Error;
use sieve_core::expr::Expr;
use sieve_core::id::OpId;

use crate::candidacy::analyze;
use crate::error::Result;
use crate::state::{PredicateMap, Pushed};

pub struct Ctx<'a> {
    pub graph: &'a PlanGraph,
    pub config: &'a PushdownConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanDecision {
    pub predicate: Option<Expr>,
    pub enforced: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// State handed to each input.
    pub forward: Vec<(OpId, PredicateMap)>,
    /// Predicates that stop here; they are enforced directly above the operator.
    pub land: Vec<Pushed>,
    /// Indices of the operator's own conjuncts that stay on it (Filter, Join).
    pub kept: Option<Vec<usize>>,
    pub scan: Option<ScanDecision>,
    /// Pushdown state proven at this operator.
    pub state: PredicateMap,
}

/// Route `node` to the processor for its kind.
pub fn dispatch(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    match node.kind() {
        OpKind::Scan => scan::process(ctx, node, incoming),
        OpKind::Filter => filter::process(ctx, node, incoming),
        OpKind::Join => join::process(ctx, node, incoming),
        OpKind::Select => select::process(ctx, node, incoming),
        OpKind::ReduceBoundary => reduce::process(ctx, node, incoming),
        OpKind::Limit => limit::process(ctx, node, incoming),
        OpKind::TableFunction | OpKind::LateralView => udtf::process(ctx, node, incoming),
        OpKind::Script | OpKind::Other => barrier::process(ctx, node, incoming),
    }
}

fn single_input(node: &PlanNode) -> Result<OpId> {
    match node.inputs.as_slice() {
        [input] => Ok(*input),
        other => Err(Error::Plan(format!(
            "{} {} needs one input, has {}",
            node.kind(),
            node.id,
            other.len()
        ))
        .into()),
    }
}

fn wrong_kind(node: &PlanNode, expected: &str) -> crate::error::PlanError {
    Error::Invariant(format!("{} dispatched to the {expected} processor", node.id)).into()
}

/// Rewrite `expr` from the operator's output columns onto its input through
/// `column_exprs`. `None` if a referenced column has no mapping, or, with
/// `rename_only`, maps to anything but a plain column.
fn rewrite_onto_input(node: &PlanNode, expr: &Expr, rename_only: bool) -> Option<Expr> {
    expr.try_rewrite_columns(&mut |key| match node.column_expr(key) {
        Some(mapped @ Expr::Column(_)) => Ok(mapped.clone()),
        Some(mapped) if !rename_only => Ok(mapped.clone()),
        _ => Err(()),
    })
    .ok()
}

/// Forward every incoming predicate that still constrains exactly one input
/// alias after rewriting; land the rest here.
fn forward_rewritten(
    ctx: &Ctx<'_>,
    node: &PlanNode,
    incoming: PredicateMap,
    rewrite: impl Fn(&Expr) -> Option<Expr>,
) -> Result<Outcome> {
    let input = single_input(node)?;
    let input_rr = ctx.graph.resolver(input)?;
    let mut forward = PredicateMap::new();
    let mut land = Vec::new();

    for (_, pushed) in incoming.iter() {
        let Some(rewritten) = rewrite(&pushed.expr) else {
            land.push(pushed.clone());
            continue;
        };
        let info = analyze(&rewritten, input_rr);
        match info.single_alias() {
            Some(alias) => forward.add(alias, pushed.with_expr(rewritten.clone()))?,
            None => land.push(pushed.clone()),
        }
    }

    Ok(Outcome {
        forward: vec![(input, forward)],
        land,
        state: incoming,
        ..Default::default()
    })
}

/// Nothing passes: everything that arrived is enforced above the operator.
fn land_all(node: &PlanNode, incoming: PredicateMap) -> Outcome {
    Outcome {
        forward: node
            .inputs
            .iter()
            .map(|i| (*i, PredicateMap::new()))
            .collect(),
        land: incoming.iter().map(|(_, p)| p.clone()).collect(),
        state: incoming,
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use sieve_core::expr::Func;
    use sieve_core::schema::{DataType, Field, Schema};

    pub fn schema(cols: &[&str]) -> Schema {
        Schema::new(
            cols.iter()
                .map(|c| Field::new(*c, DataType::Int64, true))
                .collect(),
        )
    }

    pub fn gt(alias: &str, col: &str, n: i64) -> Expr {
        Expr::binary(Expr::col(alias, col), Func::Gt, Expr::lit(n))
    }

    pub fn state(preds: &[(&str, Expr)]) -> PredicateMap {
        let mut m = PredicateMap::new();
        for (alias, e) in preds {
            m.add(alias, Pushed::derived(e.clone())).unwrap();
        }
        m
    }

    pub fn run(graph: &PlanGraph, id: OpId, incoming: PredicateMap) -> Outcome {
        let config = PushdownConfig::default();
        let ctx = Ctx {
            graph,
            config: &config,
        };
        dispatch(&ctx, graph.node(id).unwrap(), incoming).unwrap()
    }

    pub fn forwarded(out: &Outcome, input: OpId) -> Vec<String> {
        out.forward
            .iter()
            .filter(|(i, _)| *i == input)
            .flat_map(|(_, m)| m.exprs().map(|e| e.to_string()))
            .collect()
    }

    pub fn landed(out: &Outcome) -> Vec<String> {
        out.land.iter().map(|p| p.expr.to_string()).collect()
    }
}
