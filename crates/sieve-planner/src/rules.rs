//! Optimization entry point.

use sieve_core::config::PushdownConfig;
use sieve_core::dag::PlanGraph;

use crate::error::Result;
use crate::ppd::{push_down_predicates, PushdownReport};

#[derive(Debug, Clone)]
pub struct Optimized {
    pub plan: PlanGraph,
    pub report: PushdownReport,
    /// Set when the pass failed and `plan` is the input, unchanged.
    pub fell_back: Option<String>,
}

/// Run predicate pushdown on a copy of `plan`.
///
/// Pushdown only affects performance, so with `fallback_on_error` a failing
/// pass hands back the original plan instead of an error.
pub fn optimize(plan: PlanGraph, config: &PushdownConfig) -> Result<Optimized> {
    let mut candidate = plan.clone();
    match push_down_predicates(&mut candidate, config) {
        Ok(report) => Ok(Optimized {
            plan: candidate,
            report,
            fell_back: None,
        }),
        Err(err) if config.fallback_on_error => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "predicate pushdown failed, keeping the original plan");
            Ok(Optimized {
                plan,
                report: PushdownReport::default(),
                fell_back: Some(err.to_string()),
            })
        }
        Err(err) => Err(err),
    }
}
