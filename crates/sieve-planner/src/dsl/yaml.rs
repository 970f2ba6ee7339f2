//! YAML → `PlanGraph` parser for operator DAGs.
//!
//! Example:
//! ```yaml
//! config: { storage_pushdown: false }
//! operators:
//!   - id: sales
//!     op: scan
//!     table: sales
//!     alias: s
//!     storage_filters: true
//!     schema:
//!       - { name: amount, type: Int64 }
//!     partition_columns:
//!       - { name: region, type: string }
//!     partitions: [ { region: EU }, { region: US } ]
//!   - id: eu_big
//!     op: filter
//!     input: sales
//!     predicate:
//!       call: and
//!       args:
//!         - { call: eq, args: [ { col: s.region }, { lit: EU } ] }
//!         - { call: gt, args: [ { col: s.amount }, { lit: 10 } ] }
//! roots: [eu_big]
//! ```
//!
//! Operators may only read operators declared before them. Without `roots`,
//! every operator nothing reads from is a root.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use sieve_core::config::PushdownConfig;
use sieve_core::dag::{JoinType, PlanGraph};
use sieve_core::expr::{ColumnKey, Expr, Func};
use sieve_core::id::OpId;
use sieve_core::schema::{DataType, Field, Schema};
use sieve_core::types::Scalar;

use crate::error::{PlanError, Result};
use crate::partition::PartitionSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDoc {
    #[serde(default)]
    pub config: Option<ConfigDef>,
    pub operators: Vec<OperatorDef>,
    #[serde(default)]
    pub roots: Option<Vec<String>>,
}

/// Overrides applied on top of the environment-derived config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigDef {
    pub enabled: Option<bool>,
    pub storage_pushdown: Option<bool>,
    pub remove_redundant_filters: Option<bool>,
    pub fallback_on_error: Option<bool>,
    pub default_partition_name: Option<String>,
}

impl ConfigDef {
    pub fn apply(&self, base: &mut PushdownConfig) {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.storage_pushdown {
            base.storage_pushdown = v;
        }
        if let Some(v) = self.remove_redundant_filters {
            base.remove_redundant_filters = v;
        }
        if let Some(v) = self.fallback_on_error {
            base.fallback_on_error = v;
        }
        if let Some(v) = &self.default_partition_name {
            base.default_partition_name = v.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDef {
    pub id: String,
    #[serde(flatten)]
    pub op: OpDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum OpDef {
    Scan {
        table: String,
        alias: String,
        schema: Vec<FieldDef>,
        #[serde(default)]
        storage_filters: bool,
        #[serde(default)]
        partition_columns: Vec<FieldDef>,
        #[serde(default)]
        partitions: Vec<BTreeMap<String, serde_yaml::Value>>,
    },
    Filter {
        input: String,
        predicate: ExprDef,
    },
    Join {
        inputs: Vec<String>,
        #[serde(default)]
        join_type: JoinTypeDef,
        #[serde(default)]
        condition: Option<ExprDef>,
    },
    Select {
        input: String,
        alias: String,
        columns: Vec<ColumnDef>,
    },
    ReduceBoundary {
        input: String,
        #[serde(default)]
        keys: Vec<ExprDef>,
        /// Explicit output columns, keyed `alias.name`; all input columns
        /// pass through unchanged when omitted.
        #[serde(default)]
        columns: Option<Vec<ColumnDef>>,
    },
    Limit {
        input: String,
        count: u64,
    },
    TableFunction {
        input: String,
        function: String,
        #[serde(default)]
        args: Vec<ExprDef>,
        alias: String,
        generated: Vec<FieldDef>,
    },
    LateralView {
        input: String,
        function: String,
        #[serde(default)]
        args: Vec<ExprDef>,
        alias: String,
        generated: Vec<FieldDef>,
    },
    Script {
        input: String,
        command: String,
        alias: String,
        output: Vec<FieldDef>,
    },
    Other {
        name: String,
        #[serde(default)]
        inputs: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinTypeDef {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    LeftSemi,
}

impl From<JoinTypeDef> for JoinType {
    fn from(def: JoinTypeDef) -> Self {
        match def {
            JoinTypeDef::Inner => JoinType::Inner,
            JoinTypeDef::Left => JoinType::Left,
            JoinTypeDef::Right => JoinType::Right,
            JoinTypeDef::Full => JoinType::Full,
            JoinTypeDef::LeftSemi => JoinType::LeftSemi,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "nullable_default")]
    pub nullable: bool,
}

fn nullable_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub expr: ExprDef,
}

/// `{col: s.amount}`, `{lit: 10}`, or `{call: gt, args: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprDef {
    Col {
        col: String,
    },
    Lit {
        lit: LitDef,
    },
    Call {
        call: String,
        #[serde(default)]
        args: Vec<ExprDef>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LitDef {
    Null(()),
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ExprDef {
    pub fn to_expr(&self) -> Result<Expr> {
        Ok(match self {
            ExprDef::Col { col } => Expr::Column(ColumnKey::parse(col)?),
            ExprDef::Lit { lit } => Expr::Constant(match lit {
                LitDef::Null(()) => Scalar::Null,
                LitDef::Bool(b) => Scalar::Bool(*b),
                LitDef::Int(v) => Scalar::I64(*v),
                LitDef::Float(v) => Scalar::F64(*v),
                LitDef::Str(s) => Scalar::Str(s.clone()),
            }),
            ExprDef::Call { call, args } => Expr::call(
                Func::from_name(call)?,
                args.iter().map(ExprDef::to_expr).collect::<Result<_>>()?,
            ),
        })
    }
}

fn to_schema(fields: &[FieldDef]) -> Result<Schema> {
    let fields = fields
        .iter()
        .map(|f| -> Result<Field> {
            Ok(Field::new(f.name.clone(), DataType::parse(&f.data_type)?, f.nullable))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Schema::new(fields))
}

fn to_exprs(defs: &[ExprDef]) -> Result<Vec<Expr>> {
    defs.iter().map(ExprDef::to_expr).collect()
}

/// Partitions of one scan, for pruning after the pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPartitions {
    pub columns: Schema,
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone)]
pub struct ParsedPlan {
    pub graph: PlanGraph,
    /// Plan-file id → operator.
    pub ids: BTreeMap<String, OpId>,
    pub config: PushdownConfig,
    pub partitions: BTreeMap<OpId, ScanPartitions>,
}

impl ParsedPlan {
    pub fn id(&self, name: &str) -> Option<OpId> {
        self.ids.get(name).copied()
    }
}

/// Parse a plan file, layering its `config` section over `from_env()`.
pub fn parse_yaml_plan(yaml_src: &str) -> Result<ParsedPlan> {
    parse_yaml_plan_with(yaml_src, PushdownConfig::from_env())
}

/// Parse a plan file, layering its `config` section over `base`.
pub fn parse_yaml_plan_with(yaml_src: &str, base: PushdownConfig) -> Result<ParsedPlan> {
    let doc: PlanDoc = serde_yaml::from_str(yaml_src)?;
    let mut config = base;
    if let Some(overrides) = &doc.config {
        overrides.apply(&mut config);
    }
    config.validate()?;

    let mut graph = PlanGraph::new();
    let mut ids: BTreeMap<String, OpId> = BTreeMap::new();
    let mut partitions = BTreeMap::new();
    let mut read: BTreeSet<OpId> = BTreeSet::new();

    for def in &doc.operators {
        if ids.contains_key(&def.id) {
            return Err(PlanError::Dsl(format!("operator id '{}' is declared twice", def.id)));
        }
        let lookup = |name: &String| -> Result<OpId> {
            ids.get(name).copied().ok_or_else(|| {
                PlanError::Dsl(format!(
                    "operator '{}' reads '{name}', which is not declared before it",
                    def.id
                ))
            })
        };

        let (id, inputs) = match &def.op {
            OpDef::Scan {
                table,
                alias,
                schema,
                storage_filters,
                partition_columns,
                partitions: specs,
            } => {
                let mut row = to_schema(schema)?;
                let part_schema = to_schema(partition_columns)?;
                for field in &part_schema.fields {
                    if row.field_named(&field.name).is_none() {
                        row.fields.push(field.clone());
                    }
                }
                let id = graph.scan_with_storage(table, alias, row, *storage_filters)?;
                if !part_schema.is_empty() || !specs.is_empty() {
                    let specs = specs
                        .iter()
                        .map(|raw| to_partition(raw, &config))
                        .collect::<Result<Vec<_>>>()?;
                    partitions.insert(
                        id,
                        ScanPartitions {
                            columns: part_schema,
                            partitions: specs,
                        },
                    );
                }
                (id, vec![])
            }
            OpDef::Filter { input, predicate } => {
                let input = lookup(input)?;
                (graph.filter(input, predicate.to_expr()?)?, vec![input])
            }
            OpDef::Join {
                inputs,
                join_type,
                condition,
            } => {
                let inputs = inputs.iter().map(lookup).collect::<Result<Vec<_>>>()?;
                let condition = condition.as_ref().map(ExprDef::to_expr).transpose()?;
                let id = graph.join(inputs.clone(), (*join_type).into(), condition)?;
                (id, inputs)
            }
            OpDef::Select {
                input,
                alias,
                columns,
            } => {
                let input = lookup(input)?;
                let columns = columns
                    .iter()
                    .map(|c| -> Result<(String, Expr)> { Ok((c.name.clone(), c.expr.to_expr()?)) })
                    .collect::<Result<Vec<_>>>()?;
                (graph.select(input, alias, columns)?, vec![input])
            }
            OpDef::ReduceBoundary {
                input,
                keys,
                columns,
            } => {
                let input = lookup(input)?;
                let keys = to_exprs(keys)?;
                let id = match columns {
                    None => graph.reduce_boundary(input, keys)?,
                    Some(columns) => {
                        let columns = columns
                            .iter()
                            .map(|c| -> Result<(ColumnKey, Expr)> {
                                Ok((ColumnKey::parse(&c.name)?, c.expr.to_expr()?))
                            })
                            .collect::<Result<Vec<_>>>()?;
                        graph.reduce_boundary_with(input, keys, columns)?
                    }
                };
                (id, vec![input])
            }
            OpDef::Limit { input, count } => {
                let input = lookup(input)?;
                (graph.limit(input, *count)?, vec![input])
            }
            OpDef::TableFunction {
                input,
                function,
                args,
                alias,
                generated,
            } => {
                let input = lookup(input)?;
                let id = graph.table_function(
                    input,
                    function,
                    to_exprs(args)?,
                    alias,
                    to_schema(generated)?,
                )?;
                (id, vec![input])
            }
            OpDef::LateralView {
                input,
                function,
                args,
                alias,
                generated,
            } => {
                let input = lookup(input)?;
                let id = graph.lateral_view(
                    input,
                    function,
                    to_exprs(args)?,
                    alias,
                    to_schema(generated)?,
                )?;
                (id, vec![input])
            }
            OpDef::Script {
                input,
                command,
                alias,
                output,
            } => {
                let input = lookup(input)?;
                (graph.script(input, command, alias, to_schema(output)?)?, vec![input])
            }
            OpDef::Other { name, inputs } => {
                let inputs = inputs.iter().map(lookup).collect::<Result<Vec<_>>>()?;
                (graph.other(inputs.clone(), name)?, inputs)
            }
        };
        read.extend(inputs);
        ids.insert(def.id.clone(), id);
    }

    let roots = match &doc.roots {
        Some(names) => names
            .iter()
            .map(|name| {
                ids.get(name)
                    .copied()
                    .ok_or_else(|| PlanError::Dsl(format!("root '{name}' is not declared")))
            })
            .collect::<Result<Vec<_>>>()?,
        None => graph.ids().filter(|id| !read.contains(id)).collect(),
    };
    if roots.is_empty() {
        return Err(PlanError::Dsl("plan has no roots".into()));
    }
    graph.set_roots(roots)?;

    Ok(ParsedPlan {
        graph,
        ids,
        config,
        partitions,
    })
}

/// Partition values arrive as whatever YAML scalar was written; the pruner
/// expects the metastore's text form. `null` is the default partition.
fn to_partition(
    raw: &BTreeMap<String, serde_yaml::Value>,
    config: &PushdownConfig,
) -> Result<PartitionSpec> {
    let mut spec = PartitionSpec::new();
    for (column, value) in raw {
        let text = match value {
            serde_yaml::Value::Null => config.default_partition_name.clone(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s.clone(),
            other => {
                return Err(PlanError::Dsl(format!(
                    "partition value for '{column}' must be a scalar, got {other:?}"
                )))
            }
        };
        spec.insert(column.clone(), text);
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::dag::Op;
    use sieve_core::error::Error;

    const SALES: &str = r#"
config:
  storage_pushdown: false
operators:
  - id: sales
    op: scan
    table: sales
    alias: s
    schema:
      - { name: amount, type: Int64 }
    partition_columns:
      - { name: region, type: string }
    partitions:
      - { region: EU }
      - { region: US }
      - { region: null }
  - id: big
    op: filter
    input: sales
    predicate: { call: gt, args: [ { col: s.amount }, { lit: 10 } ] }
  - id: top
    op: limit
    input: big
    count: 5
"#;

    #[test]
    fn parses_operators_and_partitions() {
        let parsed = parse_yaml_plan_with(SALES, PushdownConfig::default()).unwrap();
        assert!(!parsed.config.storage_pushdown);
        assert_eq!(parsed.graph.len(), 3);
        assert_eq!(parsed.graph.roots(), &[parsed.id("top").unwrap()]);

        let sales = parsed.id("sales").unwrap();
        let rr = parsed.graph.resolver(sales).unwrap();
        assert!(rr.contains(&ColumnKey::new("s", "region")));

        let parts = &parsed.partitions[&sales];
        assert_eq!(parts.columns.len(), 1);
        let shown: Vec<String> = parts.partitions.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            shown,
            vec!["region=EU", "region=US", "region=__default_partition__"]
        );

        let big = parsed.graph.node(parsed.id("big").unwrap()).unwrap();
        match &big.op {
            Op::Filter { predicate } => assert_eq!(predicate.to_string(), "s.amount > 10"),
            other => panic!("expected filter, got {other:?}"),
        }
    }

    #[test]
    fn literals_of_every_kind() {
        let defs = r#"[ {lit: true}, {lit: 3}, {lit: 2.5}, {lit: EU}, {lit: null} ]"#;
        let defs: Vec<ExprDef> = serde_yaml::from_str(defs).unwrap();
        let exprs: Vec<Expr> = defs.iter().map(|d| d.to_expr().unwrap()).collect();
        assert_eq!(
            exprs,
            vec![
                Expr::lit(true),
                Expr::lit(3i64),
                Expr::lit(2.5),
                Expr::lit("EU"),
                Expr::null()
            ]
        );
    }

    #[test]
    fn joins_and_explicit_roots() {
        let src = r#"
operators:
  - { id: a, op: scan, table: ta, alias: a, schema: [ { name: id, type: i64 } ] }
  - { id: b, op: scan, table: tb, alias: b, schema: [ { name: id, type: i64 } ] }
  - id: j
    op: join
    join_type: left
    inputs: [a, b]
    condition: { call: eq, args: [ { col: a.id }, { col: b.id } ] }
  - { id: l, op: limit, input: j, count: 1 }
roots: [j, l]
"#;
        let parsed = parse_yaml_plan_with(src, PushdownConfig::default()).unwrap();
        let j = parsed.id("j").unwrap();
        assert_eq!(parsed.graph.roots(), &[j, parsed.id("l").unwrap()]);
        assert_eq!(
            parsed.graph.node(j).unwrap().op.to_string(),
            "Join Left ON a.id = b.id"
        );
    }

    #[test]
    fn forward_references_are_rejected() {
        let src = r#"
operators:
  - { id: l, op: limit, input: s, count: 1 }
  - { id: s, op: scan, table: t, alias: s, schema: [] }
"#;
        let err = parse_yaml_plan_with(src, PushdownConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::Dsl(_)));
    }

    #[test]
    fn analysis_errors_surface() {
        let src = r#"
operators:
  - { id: s, op: scan, table: t, alias: s, schema: [ { name: x, type: i64 } ] }
  - id: f
    op: filter
    input: s
    predicate: { call: gt, args: [ { col: z.x }, { lit: 1 } ] }
"#;
        let err = parse_yaml_plan_with(src, PushdownConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::Core(Error::Analysis(_))));
    }

    #[test]
    fn bad_yaml_is_a_yaml_error() {
        let err = parse_yaml_plan_with("operators: [", PushdownConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::Yaml(_)));
    }
}
