//! Projections: predicates over output columns are rewritten into the
//! expressions that compute them, then re-checked against the input.

use sieve_core::dag::{Op, PlanNode};

use super::{forward_rewritten, rewrite_onto_input, wrong_kind, Ctx, Outcome};
use crate::error::Result;
use crate::state::PredicateMap;

pub(super) fn process(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    if !matches!(node.op, Op::Select { .. }) {
        return Err(wrong_kind(node, "select"));
    }
    forward_rewritten(ctx, node, incoming, |e| rewrite_onto_input(node, e, false))
}
