//! Shuffle boundaries pass a predicate only when every column it reads
//! crosses the boundary unchanged.

use sieve_core::dag::{Op, PlanNode};

use super::{forward_rewritten, rewrite_onto_input, wrong_kind, Ctx, Outcome};
use crate::error::Result;
use crate::state::PredicateMap;

pub(super) fn process(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    if !matches!(node.op, Op::ReduceBoundary { .. }) {
        return Err(wrong_kind(node, "reduce boundary"));
    }
    forward_rewritten(ctx, node, incoming, |e| {
        if node.column_exprs.is_empty() {
            Some(e.clone())
        } else {
            rewrite_onto_input(node, e, true)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use sieve_core::dag::PlanGraph;
    use sieve_core::expr::{ColumnKey, Expr, Func};

    #[test]
    fn passes_unchanged_columns() {
        let mut g = PlanGraph::new();
        let u = g.scan("t", "u", schema(&["k", "x"])).unwrap();
        let r = g.reduce_boundary(u, vec![Expr::col("u", "k")]).unwrap();
        let out = run(&g, r, state(&[("u", gt("u", "x", 3))]));
        assert_eq!(forwarded(&out, u), vec!["u.x > 3"]);
        assert!(out.land.is_empty());
    }

    #[test]
    fn renamed_columns_are_followed() {
        let mut g = PlanGraph::new();
        let u = g.scan("t", "u", schema(&["k"])).unwrap();
        let r = g
            .reduce_boundary_with(
                u,
                vec![Expr::col("u", "k")],
                vec![(ColumnKey::new("rs", "key"), Expr::col("u", "k"))],
            )
            .unwrap();
        let out = run(&g, r, state(&[("rs", gt("rs", "key", 3))]));
        assert_eq!(forwarded(&out, u), vec!["u.k > 3"]);
    }

    #[test]
    fn computed_columns_stop_here() {
        let mut g = PlanGraph::new();
        let u = g.scan("t", "u", schema(&["k"])).unwrap();
        let doubled = Expr::binary(Expr::col("u", "k"), Func::Multiply, Expr::lit(2i64));
        let r = g
            .reduce_boundary_with(
                u,
                vec![Expr::col("u", "k")],
                vec![(ColumnKey::new("rs", "k2"), doubled)],
            )
            .unwrap();
        let out = run(&g, r, state(&[("rs", gt("rs", "k2", 3))]));
        assert!(forwarded(&out, u).is_empty());
        assert_eq!(landed(&out), vec!["rs.k2 > 3"]);
    }
}
