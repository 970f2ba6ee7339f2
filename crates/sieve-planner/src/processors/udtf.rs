//! Table functions and lateral views. Generated columns have no expression
//! over the input, so predicates reading them stop here; predicates over
//! pass-through columns continue.

use sieve_core::dag::{Op, PlanNode};

use super::{forward_rewritten, rewrite_onto_input, wrong_kind, Ctx, Outcome};
use crate::error::Result;
use crate::state::PredicateMap;

pub(super) fn process(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    if !matches!(node.op, Op::TableFunction(_) | Op::LateralView(_)) {
        return Err(wrong_kind(node, "table function"));
    }
    forward_rewritten(ctx, node, incoming, |e| rewrite_onto_input(node, e, false))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use sieve_core::dag::PlanGraph;
    use sieve_core::expr::Expr;

    #[test]
    fn lateral_view_passes_input_columns_only() {
        let mut g = PlanGraph::new();
        let u = g.scan("t", "u", schema(&["id", "tags"])).unwrap();
        let lv = g
            .lateral_view(u, "explode", vec![Expr::col("u", "tags")], "g", schema(&["tag"]))
            .unwrap();
        let out = run(&g, lv, state(&[("u", gt("u", "id", 1)), ("g", gt("g", "tag", 2))]));
        assert_eq!(forwarded(&out, u), vec!["u.id > 1"]);
        assert_eq!(landed(&out), vec!["g.tag > 2"]);
    }

    #[test]
    fn table_function_output_is_opaque() {
        let mut g = PlanGraph::new();
        let u = g.scan("t", "u", schema(&["tags"])).unwrap();
        let tf = g
            .table_function(u, "explode", vec![Expr::col("u", "tags")], "g", schema(&["tag"]))
            .unwrap();
        let out = run(&g, tf, state(&[("g", gt("g", "tag", 2))]));
        assert!(forwarded(&out, u).is_empty());
        assert_eq!(landed(&out), vec!["g.tag > 2"]);
    }
}
