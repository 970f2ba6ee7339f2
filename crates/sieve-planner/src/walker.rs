//! Consumer-first traversal of a plan graph.
//!
//! Pushdown state flows from consumers toward inputs, so an operator is
//! ready once every operator reading its output has been dispatched and has
//! delivered its contribution. Readiness is tracked with pending-consumer
//! counts and a FIFO ready queue, so arbitrarily deep plans need no recursion.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use sieve_core::dag::PlanGraph;
use sieve_core::error::Error;
use sieve_core::id::OpId;

use crate::error::Result;
use crate::state::{Origin, PredicateMap};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkSummary {
    /// Dispatch order.
    pub visited: Vec<OpId>,
    /// Conjuncts that must stay at their origin because a shared input could
    /// not carry them for every consumer.
    pub pinned: BTreeSet<Origin>,
}

pub struct ConsumerFirstWalk<'g> {
    graph: &'g PlanGraph,
    reachable: HashSet<OpId>,
    pending: HashMap<OpId, usize>,
    incoming: HashMap<OpId, Vec<PredicateMap>>,
    ready: VecDeque<OpId>,
    summary: WalkSummary,
}

impl<'g> ConsumerFirstWalk<'g> {
    /// Prepare a walk over everything reachable from the graph's roots.
    pub fn new(graph: &'g PlanGraph) -> Result<Self> {
        let mut reachable = HashSet::new();
        let mut stack: Vec<OpId> = graph.roots().to_vec();
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                stack.extend(graph.node(id)?.inputs.iter().copied());
            }
        }

        let consumers = graph.consumers();
        let mut pending = HashMap::with_capacity(reachable.len());
        for id in &reachable {
            let count = consumers
                .get(id)
                .map_or(0, |cs| cs.iter().filter(|c| reachable.contains(c)).count());
            pending.insert(*id, count);
        }

        // A root's output leaves the plan unfiltered: it counts as one more
        // consumer that requires nothing.
        let mut incoming: HashMap<OpId, Vec<PredicateMap>> = HashMap::new();
        let mut ready = VecDeque::new();
        for root in graph.roots() {
            incoming.entry(*root).or_default().push(PredicateMap::new());
            if pending.get(root) == Some(&0) && !ready.contains(root) {
                ready.push_back(*root);
            }
        }

        Ok(Self {
            graph,
            reachable,
            pending,
            incoming,
            ready,
            summary: WalkSummary::default(),
        })
    }

    /// Next operator to dispatch, with the state its consumers agreed on.
    pub fn next_ready(&mut self) -> Result<Option<(OpId, PredicateMap)>> {
        let Some(id) = self.ready.pop_front() else {
            return Ok(None);
        };
        let contributions = self.incoming.remove(&id).unwrap_or_default();
        let merged = PredicateMap::disjunction(contributions);

        let resolver = self.graph.resolver(id)?;
        if let Some(alias) = merged.state.aliases().find(|a| !resolver.contains_alias(a)) {
            return Err(Error::Analysis(format!(
                "predicate on alias '{alias}' reaches {id}, whose row does not carry it"
            ))
            .into());
        }

        self.summary.pinned.extend(merged.pinned);
        self.summary.visited.push(id);
        Ok(Some((id, merged.state)))
    }

    /// Deliver what `from` hands to its inputs. Inputs without an entry
    /// receive an empty state.
    pub fn complete(&mut self, from: OpId, forward: Vec<(OpId, PredicateMap)>) -> Result<()> {
        let node = self.graph.node(from)?;
        let mut per_input: Vec<(OpId, PredicateMap)> = Vec::new();
        for input in &node.inputs {
            if !per_input.iter().any(|(i, _)| i == input) {
                per_input.push((*input, PredicateMap::new()));
            }
        }
        for (target, state) in forward {
            match per_input.iter_mut().find(|(i, _)| *i == target) {
                Some((_, slot)) => slot.extend(state),
                None => {
                    return Err(Error::Invariant(format!(
                        "{from} forwarded predicates to {target}, which is not one of its inputs"
                    ))
                    .into())
                }
            }
        }

        for (input, state) in per_input {
            self.incoming.entry(input).or_default().push(state);
            if let Some(count) = self.pending.get_mut(&input) {
                *count -= 1;
                if *count == 0 {
                    self.ready.push_back(input);
                }
            }
        }
        Ok(())
    }

    /// Finish the walk; operators never reached mean the graph has a cycle.
    pub fn finish(self) -> Result<WalkSummary> {
        if self.summary.visited.len() != self.reachable.len() {
            let visited: HashSet<&OpId> = self.summary.visited.iter().collect();
            let mut stuck: Vec<OpId> = self
                .reachable
                .iter()
                .filter(|id| !visited.contains(id))
                .copied()
                .collect();
            stuck.sort();
            return Err(Error::Plan(format!("plan contains a cycle through {stuck:?}")).into());
        }
        Ok(self.summary)
    }
}
