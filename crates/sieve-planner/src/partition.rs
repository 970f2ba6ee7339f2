//! Partition pruning: fold a scan predicate against each candidate
//! partition's column values and skip partitions it provably rejects.
//!
//! The predicate is type-checked once against the scan row extended with the
//! partition columns; every partition then only binds its own values. A
//! predicate that still depends on a non-partition column is indeterminate
//! and the partition is kept.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use sieve_core::config::PushdownConfig;
use sieve_core::dag::{Op, PlanGraph};
use sieve_core::error::Error;
use sieve_core::expr::{ColumnKey, Expr};
use sieve_core::id::OpId;
use sieve_core::resolver::RowResolver;
use sieve_core::schema::{DataType, Schema};
use sieve_core::types::Scalar;
use sieve_eval::{Bindings, EvalResult, ExprEvaluator};

use crate::error::Result;

/// Column → raw value of one partition, as handed over by the metastore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionSpec {
    values: BTreeMap<String, String>,
}

impl PartitionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Hive-style path form: `region=EU/day=3`.
impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join("/"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrunedPartitions {
    pub kept: Vec<PartitionSpec>,
    pub pruned: Vec<PartitionSpec>,
}

/// A predicate prepared for repeated evaluation against partitions of one
/// scan. Immutable after construction; share it freely across threads.
#[derive(Debug, Clone)]
pub struct PartitionPruner {
    evaluator: Option<ExprEvaluator>,
    alias: String,
    partition_schema: Schema,
    default_partition_name: String,
}

impl PartitionPruner {
    /// `row` is the scan's row; partition columns it does not already carry
    /// are added under `alias` with their declared types. With no predicate
    /// every partition is kept.
    pub fn new(
        predicate: Option<Expr>,
        alias: impl Into<String>,
        row: &RowResolver,
        partition_schema: &Schema,
        config: &PushdownConfig,
    ) -> Result<Self> {
        config.validate()?;
        let alias = alias.into();

        let mut combined = row.clone();
        for field in &partition_schema.fields {
            let key = ColumnKey::new(alias.clone(), field.name.clone());
            match combined.lookup(&key) {
                Some(existing) if existing.data_type != field.data_type => {
                    return Err(Error::PartitionMetadata(format!(
                        "partition column {key} is declared {} but the row carries {}",
                        field.data_type, existing.data_type
                    ))
                    .into())
                }
                Some(_) => {}
                None => combined.add(&alias, field.clone())?,
            }
        }

        let evaluator = match predicate {
            Some(expr) => {
                let prepared = ExprEvaluator::prepare(expr, &combined)?;
                match prepared.result_type() {
                    None | Some(DataType::Boolean) => Some(prepared),
                    Some(other) => {
                        return Err(Error::Type(format!(
                            "pruning predicate {} has type {other}, expected Boolean",
                            prepared.expr()
                        ))
                        .into())
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            evaluator,
            alias,
            partition_schema: partition_schema.clone(),
            default_partition_name: config.default_partition_name.clone(),
        })
    }

    pub fn predicate(&self) -> Option<&Expr> {
        self.evaluator.as_ref().map(ExprEvaluator::expr)
    }

    fn bind(&self, partition: &PartitionSpec) -> Result<Bindings> {
        if let Some((column, _)) = partition
            .iter()
            .find(|(c, _)| self.partition_schema.field_named(c).is_none())
        {
            return Err(Error::PartitionMetadata(format!(
                "partition {partition} has undeclared column '{column}'"
            ))
            .into());
        }

        let mut bindings = Bindings::new();
        for field in &self.partition_schema.fields {
            let raw = partition.get(&field.name).ok_or_else(|| {
                Error::PartitionMetadata(format!(
                    "partition {partition} has no value for '{}'",
                    field.name
                ))
            })?;
            let value = if raw == self.default_partition_name {
                Scalar::Null
            } else {
                Scalar::parse_as(raw, field.data_type)?
            };
            bindings.bind(ColumnKey::new(self.alias.clone(), field.name.clone()), value);
        }
        Ok(bindings)
    }

    /// Whether `partition` may hold rows satisfying the predicate.
    pub fn should_include(&self, partition: &PartitionSpec) -> Result<bool> {
        let bindings = self.bind(partition)?;
        let Some(evaluator) = &self.evaluator else {
            return Ok(true);
        };
        let verdict = match evaluator.evaluate(&bindings)? {
            EvalResult::Indeterminate => true,
            EvalResult::Value(Scalar::Bool(b)) => b,
            EvalResult::Value(Scalar::Null) => false,
            EvalResult::Value(other) => {
                return Err(Error::Type(format!(
                    "pruning predicate {} produced non-boolean {other}",
                    evaluator.expr()
                ))
                .into())
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(partition = %partition, include = verdict, "partition verdict");

        Ok(verdict)
    }

    pub fn prune(&self, partitions: &[PartitionSpec]) -> Result<PrunedPartitions> {
        let mut out = PrunedPartitions::default();
        for partition in partitions {
            if self.should_include(partition)? {
                out.kept.push(partition.clone());
            } else {
                out.pruned.push(partition.clone());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            alias = %self.alias,
            kept = out.kept.len(),
            pruned = out.pruned.len(),
            "partitions pruned"
        );

        Ok(out)
    }
}

/// One-shot form of [`PartitionPruner::should_include`].
pub fn should_include_partition(
    predicate: &Expr,
    partition: &PartitionSpec,
    alias: &str,
    row: &RowResolver,
    partition_schema: &Schema,
    config: &PushdownConfig,
) -> Result<bool> {
    PartitionPruner::new(Some(predicate.clone()), alias, row, partition_schema, config)?
        .should_include(partition)
}

/// Prune `partitions` of `scan` with the predicate the pushdown pass left on it.
pub fn prune_scan_partitions(
    graph: &PlanGraph,
    scan: OpId,
    partitions: &[PartitionSpec],
    partition_schema: &Schema,
    config: &PushdownConfig,
) -> Result<PrunedPartitions> {
    let node = graph.node(scan)?;
    let Op::Scan(op) = &node.op else {
        return Err(Error::Plan(format!("{scan} is a {}, not a scan", node.kind())).into());
    };
    let pruner = PartitionPruner::new(
        op.pushed_predicate.clone(),
        op.alias.clone(),
        graph.resolver(scan)?,
        partition_schema,
        config,
    )?;
    pruner.prune(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::expr::Func;
    use sieve_core::schema::Field;

    use crate::error::PlanError;

    fn row() -> RowResolver {
        RowResolver::single(
            "s",
            Schema::new(vec![
                Field::new("amount", DataType::Int64, true),
                Field::new("note", DataType::Utf8, true),
            ]),
        )
    }

    fn regions() -> Schema {
        Schema::new(vec![Field::new("region", DataType::Utf8, true)])
    }

    fn region_is(value: &str) -> Expr {
        Expr::binary(Expr::col("s", "region"), Func::Eq, Expr::lit(value))
    }

    fn part(region: &str) -> PartitionSpec {
        PartitionSpec::from_pairs([("region", region)])
    }

    fn include(predicate: Expr, partition: PartitionSpec) -> Result<bool> {
        should_include_partition(
            &predicate,
            &partition,
            "s",
            &row(),
            &regions(),
            &PushdownConfig::default(),
        )
    }

    #[test]
    fn partition_column_predicate_decides() {
        assert!(!include(region_is("EU"), part("US")).unwrap());
        assert!(include(region_is("EU"), part("EU")).unwrap());
    }

    #[test]
    fn non_partition_predicate_keeps_everything() {
        let amount = Expr::binary(Expr::col("s", "amount"), Func::Gt, Expr::lit(10));
        assert!(include(amount.clone(), part("US")).unwrap());
        // false AND <indeterminate> still prunes.
        assert!(!include(region_is("EU").and(amount), part("US")).unwrap());
    }

    #[test]
    fn default_partition_is_null() {
        assert!(!include(region_is("EU"), part("__default_partition__")).unwrap());
        let is_null = Expr::call(Func::IsNull, vec![Expr::col("s", "region")]);
        assert!(include(is_null, part("__default_partition__")).unwrap());
    }

    #[test]
    fn typed_partition_values_are_parsed() {
        let days = Schema::new(vec![Field::new("day", DataType::Int32, true)]);
        let pruner = PartitionPruner::new(
            Some(Expr::binary(Expr::col("s", "day"), Func::GtEq, Expr::lit(15))),
            "s",
            &row(),
            &days,
            &PushdownConfig::default(),
        )
        .unwrap();
        let parts: Vec<PartitionSpec> = (1..=30)
            .map(|d| PartitionSpec::from_pairs([("day", d.to_string())]))
            .collect();
        let out = pruner.prune(&parts).unwrap();
        assert_eq!(out.kept.len(), 16);
        assert_eq!(out.pruned.len(), 14);
        assert_eq!(out.kept[0].to_string(), "day=15");

        let bad = PartitionSpec::from_pairs([("day", "monday")]);
        assert!(matches!(
            pruner.should_include(&bad),
            Err(PlanError::Core(Error::PartitionMetadata(_)))
        ));
    }

    #[test]
    fn malformed_descriptors_are_errors() {
        let missing = PartitionSpec::new();
        assert!(matches!(
            include(region_is("EU"), missing),
            Err(PlanError::Core(Error::PartitionMetadata(_)))
        ));
        let mut extra = part("EU");
        extra.insert("day", "3");
        assert!(matches!(
            include(region_is("EU"), extra),
            Err(PlanError::Core(Error::PartitionMetadata(_)))
        ));
    }

    #[test]
    fn type_errors_are_fatal() {
        let wrong = Expr::binary(Expr::col("s", "region"), Func::Plus, Expr::lit(1));
        let wrong = Expr::binary(wrong, Func::Gt, Expr::lit(0));
        assert!(include(wrong, part("EU")).is_err());

        let not_boolean = Expr::col("s", "amount");
        assert!(matches!(
            include(not_boolean, part("EU")),
            Err(PlanError::Core(Error::Type(_)))
        ));
    }

    #[test]
    fn scans_without_a_pushed_predicate_keep_all() {
        let mut g = PlanGraph::new();
        let s = g.scan("sales", "s", regions()).unwrap();
        let out = prune_scan_partitions(
            &g,
            s,
            &[part("EU"), part("US")],
            &regions(),
            &PushdownConfig::default(),
        )
        .unwrap();
        assert_eq!(out.kept.len(), 2);

        let l = g.limit(s, 1).unwrap();
        assert!(matches!(
            prune_scan_partitions(&g, l, &[], &regions(), &PushdownConfig::default()),
            Err(PlanError::Core(Error::Plan(_)))
        ));
    }

    #[test]
    fn spec_renders_as_path() {
        let spec = PartitionSpec::from_pairs([("region", "EU"), ("day", "3")]);
        assert_eq!(spec.to_string(), "day=3/region=EU");
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"day":"3","region":"EU"}"#);
    }
}
