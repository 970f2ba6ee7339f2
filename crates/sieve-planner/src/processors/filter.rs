//! Filters split their condition into conjuncts and send every
//! single-alias, deterministic one down along with what arrived from above.

use sieve_core::dag::{Op, PlanNode};

use super::{single_input, wrong_kind, Ctx, Outcome};
use crate::candidacy::analyze;
use crate::error::Result;
use crate::state::{PredicateMap, Pushed};

pub(super) fn process(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    let Op::Filter { predicate } = &node.op else {
        return Err(wrong_kind(node, "filter"));
    };
    let input = single_input(node)?;
    let input_rr = ctx.graph.resolver(input)?;

    let mut state = incoming;
    let mut kept = Vec::new();
    for (idx, conjunct) in predicate.conjuncts().into_iter().enumerate() {
        let info = analyze(conjunct, input_rr);
        match info.single_alias() {
            Some(alias) => state.add(alias, Pushed::from_conjunct(conjunct.clone(), node.id, idx))?,
            None => kept.push(idx),
        }
    }

    Ok(Outcome {
        forward: vec![(input, state.clone())],
        kept: Some(kept),
        state,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use sieve_core::dag::{JoinType, PlanGraph};
    use sieve_core::expr::{Expr, Func};

    #[test]
    fn splits_conjuncts_by_candidacy() {
        let mut g = PlanGraph::new();
        let a = g.scan("ta", "a", schema(&["x"])).unwrap();
        let b = g.scan("tb", "b", schema(&["y"])).unwrap();
        let j = g.join(vec![a, b], JoinType::Inner, None).unwrap();
        let cross = Expr::binary(Expr::col("a", "x"), Func::Lt, Expr::col("b", "y"));
        let random = Expr::binary(Expr::call(Func::Rand, vec![]), Func::Lt, Expr::lit(0.5));
        let cond = Expr::conjunction(vec![gt("a", "x", 1), cross, gt("b", "y", 2), random])
            .unwrap();
        let f = g.filter(j, cond).unwrap();

        let out = run(&g, f, state(&[("a", gt("a", "x", 0))]));
        assert_eq!(out.kept, Some(vec![1, 3]));
        assert_eq!(
            forwarded(&out, j),
            vec!["a.x > 0", "a.x > 1", "b.y > 2"]
        );
        let origins: Vec<usize> = out
            .state
            .get("a")
            .iter()
            .flat_map(|p| p.origins.iter().map(|o| o.conjunct))
            .collect();
        assert_eq!(origins, vec![0]);
    }
}
