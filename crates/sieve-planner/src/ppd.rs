//! Predicate pushdown pass.
//!
//! Two phases. The walk dispatches every operator reachable from the roots
//! to its processor and collects decisions while the graph stays read-only.
//! The apply phase then records scan predicates, enforces landed predicates
//! above the operators that stopped them, rewrites residual Filter and Join
//! conditions, and splices out Filters with nothing left.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use sieve_core::config::PushdownConfig;
use sieve_core::dag::{Op, PlanGraph};
use sieve_core::error::Error;
use sieve_core::expr::Expr;
use sieve_core::id::OpId;

use crate::error::Result;
use crate::processors::{self, Ctx, ScanDecision};
use crate::state::{Origin, PredicateMap, Pushed};
use crate::walker::ConsumerFirstWalk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub op: OpId,
    pub table: String,
    pub alias: String,
    pub predicate: Option<Expr>,
    pub enforced: bool,
}

/// What one run of the pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushdownReport {
    /// Pushdown state proven at each visited operator.
    pub states: BTreeMap<OpId, PredicateMap>,
    pub visited: usize,
    pub filters_removed: usize,
    pub filters_rewritten: usize,
    pub filters_synthesized: usize,
    pub predicates_landed: usize,
    pub conjuncts_pinned: usize,
    pub scans: Vec<ScanReport>,
}

impl PushdownReport {
    pub fn state(&self, op: OpId) -> Option<&PredicateMap> {
        self.states.get(&op)
    }

    pub fn scan(&self, op: OpId) -> Option<&ScanReport> {
        self.scans.iter().find(|s| s.op == op)
    }
}

#[derive(Default)]
struct Decisions {
    kept: HashMap<OpId, Vec<usize>>,
    landings: Vec<(OpId, Vec<Pushed>)>,
    scans: Vec<(OpId, ScanDecision)>,
}

/// Run the pass in place. On error the graph is left untouched: every
/// mutation happens after the walk has succeeded.
pub fn push_down_predicates(
    graph: &mut PlanGraph,
    config: &PushdownConfig,
) -> Result<PushdownReport> {
    config.validate()?;
    let mut report = PushdownReport::default();
    if !config.enabled {
        #[cfg(feature = "tracing")]
        tracing::debug!("predicate pushdown disabled");
        return Ok(report);
    }
    graph.validate()?;

    #[cfg(feature = "tracing")]
    tracing::debug!(ops = graph.len(), roots = graph.roots().len(), "predicate pushdown start");

    let mut decisions = Decisions::default();
    let pinned = {
        let ctx = Ctx {
            graph: &*graph,
            config,
        };
        let mut walk = ConsumerFirstWalk::new(graph)?;
        while let Some((id, incoming)) = walk.next_ready()? {
            let node = graph.node(id)?;
            let outcome = processors::dispatch(&ctx, node, incoming)?;

            #[cfg(feature = "tracing")]
            tracing::trace!(
                op = %id,
                kind = %node.kind(),
                state = outcome.state.len(),
                landed = outcome.land.len(),
                "dispatched"
            );

            walk.complete(id, outcome.forward)?;
            if let Some(kept) = outcome.kept {
                decisions.kept.insert(id, kept);
            }
            if let Some(scan) = outcome.scan {
                decisions.scans.push((id, scan));
            }
            if !outcome.land.is_empty() {
                decisions.landings.push((id, outcome.land));
            }
            report.states.insert(id, outcome.state);
        }
        let summary = walk.finish()?;
        report.visited = summary.visited.len();
        summary.pinned
    };
    report.conjuncts_pinned = pinned.len();

    apply(graph, decisions, &pinned, config, &mut report)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        visited = report.visited,
        removed = report.filters_removed,
        rewritten = report.filters_rewritten,
        synthesized = report.filters_synthesized,
        landed = report.predicates_landed,
        pinned = report.conjuncts_pinned,
        "predicate pushdown finished"
    );
    Ok(report)
}

fn apply(
    graph: &mut PlanGraph,
    decisions: Decisions,
    pinned: &BTreeSet<Origin>,
    config: &PushdownConfig,
    report: &mut PushdownReport,
) -> Result<()> {
    for (id, decision) in decisions.scans {
        if let Op::Scan(scan) = &mut graph.node_mut(id)?.op {
            scan.pushed_predicate = decision.predicate;
            scan.predicate_enforced = decision.enforced;
            report.scans.push(ScanReport {
                op: id,
                table: scan.table.clone(),
                alias: scan.alias.clone(),
                predicate: scan.pushed_predicate.clone(),
                enforced: scan.predicate_enforced,
            });
        }
    }

    // A landing directly under a Filter that reads nothing else joins that
    // Filter's residual instead of stacking a second Filter on top.
    let consumers = graph.consumers();
    let mut absorbed: HashMap<OpId, Vec<Expr>> = HashMap::new();
    for (id, landed) in decisions.landings {
        let mut exprs: Vec<Expr> = Vec::with_capacity(landed.len());
        for pushed in landed {
            if !exprs.contains(&pushed.expr) {
                exprs.push(pushed.expr);
            }
        }
        report.predicates_landed += exprs.len();

        let sole_filter = match consumers.get(&id).map(Vec::as_slice) {
            Some([only]) if !graph.roots().contains(&id) && decisions.kept.contains_key(only) => {
                matches!(graph.node(*only)?.op, Op::Filter { .. }).then_some(*only)
            }
            _ => None,
        };
        match sole_filter {
            Some(filter) => absorbed.entry(filter).or_default().extend(exprs),
            None => {
                let predicate = Expr::conjunction(exprs)
                    .ok_or_else(|| Error::Invariant(format!("empty landing at {id}")))?;
                #[cfg(feature = "tracing")]
                tracing::trace!(above = %id, predicate = %predicate, "synthesized filter");
                graph.insert_filter_above(id, predicate)?;
                report.filters_synthesized += 1;
            }
        }
    }

    let mut residual_ops: Vec<(OpId, Vec<usize>)> = decisions.kept.into_iter().collect();
    residual_ops.sort_by_key(|(id, _)| *id);
    for (id, kept) in residual_ops {
        let stays = |idx: usize| {
            !config.remove_redundant_filters
                || kept.contains(&idx)
                || pinned.contains(&Origin { op: id, conjunct: idx })
        };
        let residual_of = |condition: &Expr| -> Vec<Expr> {
            condition
                .conjuncts()
                .into_iter()
                .enumerate()
                .filter(|(idx, _)| stays(*idx))
                .map(|(_, c)| c.clone())
                .collect()
        };

        match graph.node(id)?.op.clone() {
            Op::Filter { predicate } => {
                let mut residual = residual_of(&predicate);
                for extra in absorbed.remove(&id).unwrap_or_default() {
                    if !residual.contains(&extra) {
                        residual.push(extra);
                    }
                }
                match Expr::conjunction(residual) {
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(op = %id, "filter fully pushed down, splicing out");
                        graph.splice_out(id)?;
                        report.filters_removed += 1;
                    }
                    Some(residual) if residual != predicate => {
                        graph.node_mut(id)?.op = Op::Filter {
                            predicate: residual,
                        };
                        report.filters_rewritten += 1;
                    }
                    Some(_) => {}
                }
            }
            Op::Join(mut join) => {
                join.condition = join
                    .condition
                    .as_ref()
                    .and_then(|c| Expr::conjunction(residual_of(c)));
                graph.node_mut(id)?.op = Op::Join(join);
            }
            _ => {
                return Err(Error::Invariant(format!(
                    "{id} reported residual conjuncts but is neither a filter nor a join"
                ))
                .into())
            }
        }
    }
    Ok(())
}
