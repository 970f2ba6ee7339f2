//! Scans end the descent. Whatever reaches one is recorded on it; storage
//! that can filter enforces it, otherwise it lands as a Filter above.

use sieve_core::dag::{Op, PlanNode};

use super::{wrong_kind, Ctx, Outcome, ScanDecision};
use crate::error::Result;
use crate::state::{PredicateMap, Pushed};

pub(super) fn process(ctx: &Ctx<'_>, node: &PlanNode, incoming: PredicateMap) -> Result<Outcome> {
    let Op::Scan(scan) = &node.op else {
        return Err(wrong_kind(node, "scan"));
    };

    // A predicate storage already enforces is part of what this scan returns.
    let mut state = PredicateMap::new();
    if scan.predicate_enforced {
        if let Some(existing) = &scan.pushed_predicate {
            for conjunct in existing.conjuncts() {
                state.add(&scan.alias, Pushed::derived(conjunct.clone()))?;
            }
        }
    }
    state.extend(incoming);

    let predicate = state.conjunction();
    let enforced = predicate.is_some() && scan.storage_filters && ctx.config.storage_pushdown;
    let land = if enforced || predicate.is_none() {
        Vec::new()
    } else {
        state.iter().map(|(_, p)| p.clone()).collect()
    };

    Ok(Outcome {
        land,
        scan: Some(ScanDecision {
            predicate,
            enforced,
        }),
        state,
        ..Default::default()
    })
}
