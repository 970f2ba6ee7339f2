#![forbid(unsafe_code)]
//! sieve-planner: predicate pushdown over a `PlanGraph` and partition
//! pruning with the predicates it leaves on scans.
//!
//! Design:
//! - `candidacy` classifies a predicate against the aliases an operator sees.
//! - `walker` visits operators once all their consumers have been visited
//!   and hands each one to the processor for its kind (`processors`).
//! - `ppd` drives the walk, then applies the collected decisions to the graph
//!   (residual filters, spliced filters, synthesized filters, scan predicates).
//! - `partition` folds scan predicates against partition values.
//! - `rules::optimize` is the entry point with fallback to the input plan.
//! - `dsl::yaml` reads plans from YAML files.

pub mod candidacy;
pub mod dsl;
pub mod error;
pub mod partition;
pub mod ppd;
pub mod processors;
pub mod rules;
pub mod state;
pub mod walker;

pub use candidacy::{analyze, ExprInfo};
pub use dsl::yaml::{parse_yaml_plan, parse_yaml_plan_with, ParsedPlan, ScanPartitions};
pub use error::{PlanError, Result};
pub use partition::{
    prune_scan_partitions, should_include_partition, PartitionPruner, PartitionSpec,
    PrunedPartitions,
};
pub use ppd::{push_down_predicates, PushdownReport};
pub use rules::{optimize, Optimized};
pub use walker::{ConsumerFirstWalk, WalkSummary};
pub use state::{Origin, PredicateMap, Pushed};
