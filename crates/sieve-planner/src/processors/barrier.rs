//! Default processor for Script and Other: nothing is known about how the
//! output relates to the input, so nothing goes further down.

use sieve_core::dag::PlanNode;

use super::{land_all, Ctx, Outcome};
use crate::error::Result;
use crate::state::PredicateMap;

pub(super) fn process(_ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    Ok(land_all(node, incoming))
}
