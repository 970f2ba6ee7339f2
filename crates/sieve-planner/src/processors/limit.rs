//! Limit: filtering below a row cap changes which rows survive it.

use sieve_core::dag::{Op, PlanNode};

use super::{land_all, wrong_kind, Ctx, Outcome};
use crate::error::Result;
use crate::state::PredicateMap;

pub(super) fn process(_ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    if !matches!(node.op, Op::Limit { .. }) {
        return Err(wrong_kind(node, "limit"));
    }
    Ok(land_all(node, incoming))
}
