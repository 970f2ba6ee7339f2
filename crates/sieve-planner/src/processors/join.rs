//! Joins route predicates by the input that owns their alias and let
//! single-input ON conjuncts migrate below. Outer joins restrict both
//! directions to the sides where filtering early cannot change which rows
//! get null-extended.

use sieve_core::dag::{JoinType, Op, PlanNode};
use sieve_core::resolver::RowResolver;

use super::{wrong_kind, Ctx, Outcome};
use crate::candidacy::analyze;
use crate::error::Result;
use crate::state::{PredicateMap, Pushed};

/// Can a predicate from above the join move into input `i`?
fn passes_from_above(join_type: JoinType, i: usize, inputs: usize) -> bool {
    match join_type {
        JoinType::Inner => true,
        JoinType::Left | JoinType::LeftSemi => i == 0,
        JoinType::Right => i + 1 == inputs,
        JoinType::Full => false,
    }
}

/// Can an ON conjunct over input `i` alone move into that input?
fn on_conjunct_moves(join_type: JoinType, i: usize, inputs: usize) -> bool {
    match join_type {
        JoinType::Inner | JoinType::LeftSemi => true,
        JoinType::Left => i != 0,
        JoinType::Right => i + 1 != inputs,
        JoinType::Full => false,
    }
}

pub(super) fn process(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    let Op::Join(join) = &node.op else {
        return Err(wrong_kind(node, "join"));
    };
    let n = node.inputs.len();
    let input_rrs = node
        .inputs
        .iter()
        .map(|i| ctx.graph.resolver(*i))
        .collect::<sieve_core::Result<Vec<&RowResolver>>>()?;
    let owner = |alias: &str| input_rrs.iter().position(|rr| rr.contains_alias(alias));

    let mut per_input = vec![PredicateMap::new(); n];
    let mut land = Vec::new();
    for (alias, pushed) in incoming.iter() {
        match owner(alias) {
            Some(i) if passes_from_above(join.join_type, i, n) => {
                per_input[i].add(alias, pushed.clone())?
            }
            _ => land.push(pushed.clone()),
        }
    }

    let mut kept = Vec::new();
    if let Some(condition) = &join.condition {
        let mut visible = RowResolver::new();
        for rr in &input_rrs {
            visible = visible.merge(rr)?;
        }
        for (idx, conjunct) in condition.conjuncts().into_iter().enumerate() {
            let info = analyze(conjunct, &visible);
            let target = info
                .single_alias()
                .and_then(|alias| owner(alias).map(|i| (alias, i)));
            match target {
                Some((alias, i)) if on_conjunct_moves(join.join_type, i, n) => {
                    per_input[i].add(alias, Pushed::from_conjunct(conjunct.clone(), node.id, idx))?
                }
                _ => kept.push(idx),
            }
        }
    }

    Ok(Outcome {
        forward: node.inputs.iter().copied().zip(per_input).collect(),
        land,
        kept: Some(kept),
        state: incoming,
        ..Default::default()
    })
}
