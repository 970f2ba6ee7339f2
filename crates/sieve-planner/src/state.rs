//! Per-operator pushdown state: predicates proven safe to evaluate at an
//! operator, keyed by the single alias each one constrains.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use sieve_core::error::Error;
use sieve_core::expr::Expr;
use sieve_core::id::OpId;

/// Conjunct `conjunct` of the condition held by Filter or Join `op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub op: OpId,
    pub conjunct: usize,
}

/// A predicate travelling down the graph, with the conjuncts it was derived
/// from. Once it is enforced further down, those conjuncts may be dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pushed {
    pub expr: Expr,
    pub origins: BTreeSet<Origin>,
}

impl Pushed {
    /// A derived predicate that replaces no conjunct.
    pub fn derived(expr: Expr) -> Self {
        Self {
            expr,
            origins: BTreeSet::new(),
        }
    }

    pub fn from_conjunct(expr: Expr, op: OpId, conjunct: usize) -> Self {
        Self {
            expr,
            origins: BTreeSet::from([Origin { op, conjunct }]),
        }
    }

    /// Same origins, new expression (after a column rewrite).
    pub fn with_expr(&self, expr: Expr) -> Self {
        Self {
            expr,
            origins: self.origins.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredicateMap {
    entries: BTreeMap<String, Vec<Pushed>>,
}

/// Result of merging the states contributed by several consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    pub state: PredicateMap,
    /// Conjuncts that were dropped or weakened by the merge and must stay
    /// where they originated.
    pub pinned: BTreeSet<Origin>,
}

impl PredicateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate under `alias`. The predicate must reference exactly
    /// that alias. Equal predicates are kept once, with their origins merged.
    pub fn add(&mut self, alias: &str, pushed: Pushed) -> Result<(), Error> {
        let aliases = pushed.expr.referenced_aliases();
        if aliases.len() != 1 || !aliases.contains(alias) {
            return Err(Error::Invariant(format!(
                "predicate {} filed under '{alias}' references {:?}",
                pushed.expr, aliases
            )));
        }
        self.insert(alias, pushed);
        Ok(())
    }

    fn insert(&mut self, alias: &str, pushed: Pushed) {
        let list = self.entries.entry(alias.to_string()).or_default();
        match list.iter_mut().find(|p| p.expr == pushed.expr) {
            Some(existing) => existing.origins.extend(pushed.origins),
            None => list.push(pushed),
        }
    }

    /// Conjunction: every predicate of `other` also holds here.
    pub fn extend(&mut self, other: PredicateMap) {
        for (alias, list) in other.entries {
            for pushed in list {
                self.insert(&alias, pushed);
            }
        }
    }

    pub fn get(&self, alias: &str) -> &[Pushed] {
        self.entries.get(alias).map_or(&[], Vec::as_slice)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pushed)> {
        self.entries
            .iter()
            .flat_map(|(alias, list)| list.iter().map(move |p| (alias.as_str(), p)))
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, Pushed)> {
        self.entries
            .into_iter()
            .flat_map(|(alias, list)| list.into_iter().map(move |p| (alias.clone(), p)))
    }

    /// Number of predicates across all aliases.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.iter().map(|(_, p)| &p.expr)
    }

    /// AND of everything held, alias by alias.
    pub fn conjunction(&self) -> Option<Expr> {
        Expr::conjunction(self.exprs().cloned())
    }

    /// Disjunction across consumers: a row of a shared input reaches the
    /// consumers through any of them, so per alias only the OR of what each
    /// consumer requires is safe. Aliases some consumer leaves unconstrained
    /// are dropped. Unanimous aliases are kept as they are.
    pub fn disjunction(contributions: Vec<PredicateMap>) -> Merged {
        if contributions.len() <= 1 {
            return Merged {
                state: contributions.into_iter().next().unwrap_or_default(),
                pinned: BTreeSet::new(),
            };
        }

        let mut common: BTreeSet<&str> = contributions[0].aliases().collect();
        for c in &contributions[1..] {
            let aliases: BTreeSet<&str> = c.aliases().collect();
            common.retain(|a| aliases.contains(a));
        }

        let mut merged = Merged::default();
        for c in &contributions {
            for (alias, pushed) in c.iter() {
                if !common.contains(alias) {
                    merged.pinned.extend(pushed.origins.iter().copied());
                }
            }
        }

        for alias in common {
            let lists: Vec<&[Pushed]> = contributions.iter().map(|c| c.get(alias)).collect();
            let shape = |l: &[Pushed]| -> BTreeSet<String> {
                l.iter().map(|p| p.expr.to_string()).collect()
            };
            let first = shape(lists[0]);
            if lists.iter().all(|l| shape(l) == first) {
                for pushed in lists.iter().flat_map(|l| l.iter()) {
                    merged.state.insert(alias, pushed.clone());
                }
                continue;
            }

            let mut terms: Vec<Expr> = lists
                .iter()
                .filter_map(|l| Expr::conjunction(l.iter().map(|p| p.expr.clone())))
                .collect();
            terms.sort_by_cached_key(|t| t.to_string());
            terms.dedup();
            for pushed in lists.iter().flat_map(|l| l.iter()) {
                merged.pinned.extend(pushed.origins.iter().copied());
            }
            if let Some(any) = Expr::disjunction(terms) {
                merged.state.insert(alias, Pushed::derived(any));
            }
        }
        merged
    }
}
