//! The operator plan graph.
//!
//! Operators live in an arena indexed by `OpId`; edges are ids, never nested
//! ownership, so an operator may feed several consumers and the pushdown pass
//! can splice operators in and out while it walks. Row resolvers are kept in a
//! side map keyed by `OpId` rather than on the node itself.
//!
//! Edges point from an operator to its *inputs* (data flows input → consumer).
//! Scans are the leaves; `roots` are the operators whose output leaves the plan.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::{ColumnKey, Expr};
use crate::hash::{hash_str, Hash256};
use crate::id::OpId;
use crate::resolver::RowResolver;
use crate::schema::{Field, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    LeftSemi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOp {
    pub table: String,
    pub alias: String,
    /// The storage format can evaluate predicates while reading.
    pub storage_filters: bool,
    /// Conjunction of everything pushed down to this scan.
    pub pushed_predicate: Option<Expr>,
    /// `pushed_predicate` is applied by storage, no residual filter needed.
    pub predicate_enforced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOp {
    pub join_type: JoinType,
    pub condition: Option<Expr>,
}

/// Row-generating function (explode, json_tuple, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOp {
    pub function: String,
    pub args: Vec<Expr>,
    pub alias: String,
    pub generated: Vec<String>,
}

/// Payload of one operator. The variant is the operator kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Scan(ScanOp),
    Filter { predicate: Expr },
    Join(JoinOp),
    Select { alias: String },
    /// Shuffle/exchange: rows are redistributed by `keys`.
    ReduceBoundary { keys: Vec<Expr> },
    Limit { count: u64 },
    /// Output is only the generated columns.
    TableFunction(GeneratorOp),
    /// Output is the input row joined with each generated row.
    LateralView(GeneratorOp),
    /// Rows piped through an external command.
    Script { command: String, alias: String },
    Other { name: String },
}

/// Closed set of operator kinds; the dispatcher maps each to one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Scan,
    Filter,
    Join,
    Select,
    ReduceBoundary,
    Limit,
    TableFunction,
    LateralView,
    Script,
    Other,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Scan(_) => OpKind::Scan,
            Op::Filter { .. } => OpKind::Filter,
            Op::Join(_) => OpKind::Join,
            Op::Select { .. } => OpKind::Select,
            Op::ReduceBoundary { .. } => OpKind::ReduceBoundary,
            Op::Limit { .. } => OpKind::Limit,
            Op::TableFunction(_) => OpKind::TableFunction,
            Op::LateralView(_) => OpKind::LateralView,
            Op::Script { .. } => OpKind::Script,
            Op::Other { .. } => OpKind::Other,
        }
    }

    /// Accepted number of inputs: `(min, max)`.
    fn arity(&self) -> (usize, usize) {
        match self {
            Op::Scan(_) => (0, 0),
            Op::Join(_) => (2, usize::MAX),
            Op::Other { .. } => (0, usize::MAX),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Scan(s) => {
                write!(f, "Scan {} AS {}", s.table, s.alias)?;
                if let Some(p) = &s.pushed_predicate {
                    write!(f, " pushed=[{p}]")?;
                    if s.predicate_enforced {
                        write!(f, " (storage)")?;
                    }
                }
                Ok(())
            }
            Op::Filter { predicate } => write!(f, "Filter {predicate}"),
            Op::Join(j) => {
                write!(f, "Join {:?}", j.join_type)?;
                match &j.condition {
                    Some(c) => write!(f, " ON {c}"),
                    None => Ok(()),
                }
            }
            Op::Select { alias } => write!(f, "Select AS {alias}"),
            Op::ReduceBoundary { keys } => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "ReduceBoundary [{}]", keys.join(", "))
            }
            Op::Limit { count } => write!(f, "Limit {count}"),
            Op::TableFunction(g) | Op::LateralView(g) => {
                let args: Vec<String> = g.args.iter().map(|a| a.to_string()).collect();
                write!(
                    f,
                    "{} {}({}) AS {}({})",
                    self.kind(),
                    g.function,
                    args.join(", "),
                    g.alias,
                    g.generated.join(", ")
                )
            }
            Op::Script { command, alias } => write!(f, "Script '{command}' AS {alias}"),
            Op::Other { name } => write!(f, "Other {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: OpId,
    pub op: Op,
    pub inputs: Vec<OpId>,
    /// Output column → expression over the inputs' columns that computes it.
    /// Empty for operators whose output is opaque or a plain pass-through of
    /// an input that needs no renaming (Filter, Limit, Scan, ...).
    pub column_exprs: Vec<(ColumnKey, Expr)>,
}

impl PlanNode {
    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn column_expr(&self, key: &ColumnKey) -> Option<&Expr> {
        self.column_exprs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, e)| e)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanGraph {
    nodes: Vec<Option<PlanNode>>,
    resolvers: BTreeMap<OpId, RowResolver>,
    roots: Vec<OpId>,
}

impl PlanGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: OpId) -> Result<&PlanNode> {
        self.nodes
            .get(id.slot())
            .and_then(|n| n.as_ref())
            .ok_or_else(|| Error::Plan(format!("no operator {id} in plan")))
    }

    pub fn node_mut(&mut self, id: OpId) -> Result<&mut PlanNode> {
        self.nodes
            .get_mut(id.slot())
            .and_then(|n| n.as_mut())
            .ok_or_else(|| Error::Plan(format!("no operator {id} in plan")))
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.node(id).is_ok()
    }

    /// Output row resolver of `id`.
    pub fn resolver(&self, id: OpId) -> Result<&RowResolver> {
        self.resolvers
            .get(&id)
            .ok_or_else(|| Error::Plan(format!("operator {id} has no row resolver")))
    }

    /// Live operator ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = OpId> + '_ {
        self.nodes.iter().flatten().map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn roots(&self) -> &[OpId] {
        &self.roots
    }

    pub fn add_root(&mut self, id: OpId) -> Result<()> {
        self.node(id)?;
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        Ok(())
    }

    pub fn set_roots(&mut self, roots: Vec<OpId>) -> Result<()> {
        for id in &roots {
            self.node(*id)?;
        }
        self.roots = roots;
        Ok(())
    }

    /// Reverse edges: for every live operator, the operators reading its output.
    pub fn consumers(&self) -> HashMap<OpId, Vec<OpId>> {
        let mut out: HashMap<OpId, Vec<OpId>> = self.ids().map(|id| (id, Vec::new())).collect();
        for node in self.nodes.iter().flatten() {
            let distinct: BTreeSet<OpId> = node.inputs.iter().copied().collect();
            for input in distinct {
                out.entry(input).or_default().push(node.id);
            }
        }
        out
    }

    /// Add an operator with an explicit resolver. Builders below derive the
    /// resolver the way the analyzer would and should be preferred.
    pub fn insert(
        &mut self,
        op: Op,
        inputs: Vec<OpId>,
        column_exprs: Vec<(ColumnKey, Expr)>,
        resolver: RowResolver,
    ) -> Result<OpId> {
        let (min, max) = op.arity();
        if inputs.len() < min || inputs.len() > max {
            return Err(Error::Plan(format!(
                "{} expects {min}..={max} inputs, got {}",
                op.kind(),
                inputs.len()
            )));
        }
        for input in &inputs {
            self.node(*input)?;
        }
        let id = OpId::new(self.nodes.len() as u64);
        self.nodes.push(Some(PlanNode {
            id,
            op,
            inputs,
            column_exprs,
        }));
        self.resolvers.insert(id, resolver);
        Ok(id)
    }

    pub fn scan(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        schema: Schema,
    ) -> Result<OpId> {
        self.scan_with_storage(table, alias, schema, false)
    }

    /// Scan over a storage format that can evaluate pushed predicates itself.
    pub fn scan_with_storage(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        schema: Schema,
        storage_filters: bool,
    ) -> Result<OpId> {
        let alias = alias.into();
        let resolver = RowResolver::single(alias.clone(), schema);
        let op = Op::Scan(ScanOp {
            table: table.into(),
            alias,
            storage_filters,
            pushed_predicate: None,
            predicate_enforced: false,
        });
        self.insert(op, vec![], vec![], resolver)
    }

    pub fn filter(&mut self, input: OpId, predicate: Expr) -> Result<OpId> {
        let resolver = self.resolver(input)?.clone();
        resolver.check_predicate(&predicate)?;
        self.insert(Op::Filter { predicate }, vec![input], vec![], resolver)
    }

    pub fn join(
        &mut self,
        inputs: Vec<OpId>,
        join_type: JoinType,
        condition: Option<Expr>,
    ) -> Result<OpId> {
        if join_type != JoinType::Inner && inputs.len() != 2 {
            return Err(Error::Plan(format!(
                "{join_type:?} join takes exactly 2 inputs, got {}",
                inputs.len()
            )));
        }
        let mut merged = RowResolver::new();
        for input in &inputs {
            merged = merged.merge(self.resolver(*input)?)?;
        }
        if let Some(c) = &condition {
            merged.check_predicate(c)?;
        }
        let resolver = match (join_type, inputs.first()) {
            (JoinType::LeftSemi, Some(left)) => self.resolver(*left)?.clone(),
            _ => merged,
        };
        let op = Op::Join(JoinOp {
            join_type,
            condition,
        });
        self.insert(op, inputs, vec![], resolver)
    }

    /// Projection: every output column `alias.name` is computed by an
    /// expression over the input row.
    pub fn select(
        &mut self,
        input: OpId,
        alias: impl Into<String>,
        columns: Vec<(String, Expr)>,
    ) -> Result<OpId> {
        let alias = alias.into();
        let input_rr = self.resolver(input)?;
        let mut resolver = RowResolver::new();
        let mut column_exprs = Vec::with_capacity(columns.len());
        for (name, expr) in columns {
            let data_type = input_rr
                .infer_type(&expr)?
                .unwrap_or(crate::schema::DataType::Utf8);
            resolver.add(&alias, Field::new(name.clone(), data_type, true))?;
            column_exprs.push((ColumnKey::new(alias.clone(), name), expr));
        }
        self.insert(Op::Select { alias }, vec![input], column_exprs, resolver)
    }

    /// Exchange that forwards every input column unchanged.
    pub fn reduce_boundary(&mut self, input: OpId, keys: Vec<Expr>) -> Result<OpId> {
        let input_rr = self.resolver(input)?.clone();
        let columns = input_rr
            .columns()
            .map(|(key, _)| (key.clone(), Expr::Column(key)))
            .collect();
        self.reduce_boundary_with(input, keys, columns)
    }

    /// Exchange whose output columns are given explicitly; computed columns
    /// (anything but a plain column reference) do not survive the boundary
    /// unchanged.
    pub fn reduce_boundary_with(
        &mut self,
        input: OpId,
        keys: Vec<Expr>,
        columns: Vec<(ColumnKey, Expr)>,
    ) -> Result<OpId> {
        let input_rr = self.resolver(input)?;
        for key in &keys {
            input_rr.infer_type(key)?;
        }
        let mut resolver = RowResolver::new();
        for (key, expr) in &columns {
            let data_type = input_rr
                .infer_type(expr)?
                .unwrap_or(crate::schema::DataType::Utf8);
            resolver.add(&key.alias, Field::new(key.name.clone(), data_type, true))?;
        }
        self.insert(Op::ReduceBoundary { keys }, vec![input], columns, resolver)
    }

    pub fn limit(&mut self, input: OpId, count: u64) -> Result<OpId> {
        let resolver = self.resolver(input)?.clone();
        self.insert(Op::Limit { count }, vec![input], vec![], resolver)
    }

    /// UDTF: the output row is exactly the generated columns under `alias`.
    pub fn table_function(
        &mut self,
        input: OpId,
        function: impl Into<String>,
        args: Vec<Expr>,
        alias: impl Into<String>,
        generated: Schema,
    ) -> Result<OpId> {
        let (op, resolver) = self.generator(input, function.into(), args, alias.into(), generated)?;
        self.insert(Op::TableFunction(op), vec![input], vec![], resolver)
    }

    /// Lateral view: input columns pass through, generated columns are added
    /// under a new alias.
    pub fn lateral_view(
        &mut self,
        input: OpId,
        function: impl Into<String>,
        args: Vec<Expr>,
        alias: impl Into<String>,
        generated: Schema,
    ) -> Result<OpId> {
        let input_rr = self.resolver(input)?.clone();
        let (op, generated_rr) =
            self.generator(input, function.into(), args, alias.into(), generated)?;
        let resolver = input_rr.merge(&generated_rr)?;
        let column_exprs = input_rr
            .columns()
            .map(|(key, _)| (key.clone(), Expr::Column(key)))
            .collect();
        self.insert(Op::LateralView(op), vec![input], column_exprs, resolver)
    }

    fn generator(
        &self,
        input: OpId,
        function: String,
        args: Vec<Expr>,
        alias: String,
        generated: Schema,
    ) -> Result<(GeneratorOp, RowResolver)> {
        let input_rr = self.resolver(input)?;
        for arg in &args {
            input_rr.infer_type(arg)?;
        }
        let names = generated.fields.iter().map(|f| f.name.clone()).collect();
        let resolver = RowResolver::single(alias.clone(), generated);
        Ok((
            GeneratorOp {
                function,
                args,
                alias,
                generated: names,
            },
            resolver,
        ))
    }

    pub fn script(
        &mut self,
        input: OpId,
        command: impl Into<String>,
        alias: impl Into<String>,
        output: Schema,
    ) -> Result<OpId> {
        let alias = alias.into();
        let resolver = RowResolver::single(alias.clone(), output);
        let op = Op::Script {
            command: command.into(),
            alias,
        };
        self.insert(op, vec![input], vec![], resolver)
    }

    /// Operator the pass knows nothing about. Output row is the inputs' rows
    /// side by side.
    pub fn other(&mut self, inputs: Vec<OpId>, name: impl Into<String>) -> Result<OpId> {
        let mut resolver = RowResolver::new();
        for input in &inputs {
            resolver = resolver.merge(self.resolver(*input)?)?;
        }
        self.insert(Op::Other { name: name.into() }, inputs, vec![], resolver)
    }

    /// Replace every reference to `from` (consumer inputs and roots) with `to`,
    /// except inside `except` itself.
    fn redirect(&mut self, from: OpId, to: OpId, except: Option<OpId>) {
        for node in self.nodes.iter_mut().flatten() {
            if Some(node.id) == except {
                continue;
            }
            for input in node.inputs.iter_mut() {
                if *input == from {
                    *input = to;
                }
            }
        }
        for root in self.roots.iter_mut() {
            if *root == from {
                *root = to;
            }
        }
    }

    /// Remove a single-input operator, wiring its consumers to its input.
    pub fn splice_out(&mut self, id: OpId) -> Result<()> {
        let node = self.node(id)?;
        let input = match node.inputs.as_slice() {
            [only] => *only,
            _ => {
                return Err(Error::Plan(format!(
                    "cannot splice out {id}: it has {} inputs",
                    node.inputs.len()
                )))
            }
        };
        self.redirect(id, input, None);
        self.nodes[id.slot()] = None;
        self.resolvers.remove(&id);
        Ok(())
    }

    /// Put a new Filter directly above `id`; every former consumer of `id`
    /// reads from the filter instead.
    pub fn insert_filter_above(&mut self, id: OpId, predicate: Expr) -> Result<OpId> {
        let resolver = self.resolver(id)?.clone();
        let filter = self.insert(Op::Filter { predicate }, vec![id], vec![], resolver)?;
        self.redirect(id, filter, Some(filter));
        Ok(filter)
    }

    /// Structural checks: edges point at live operators, arities hold, and
    /// every operator has a resolver.
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes.iter().flatten() {
            let (min, max) = node.op.arity();
            if node.inputs.len() < min || node.inputs.len() > max {
                return Err(Error::Plan(format!(
                    "{} {} has {} inputs",
                    node.kind(),
                    node.id,
                    node.inputs.len()
                )));
            }
            for input in &node.inputs {
                self.node(*input)?;
            }
            self.resolver(node.id)?;
        }
        for root in &self.roots {
            self.node(*root)?;
        }
        Ok(())
    }

    /// Indented tree rendering from the roots. Operators with several
    /// consumers are printed once and referenced as `@n` afterwards.
    pub fn explain(&self) -> String {
        let consumers = self.consumers();
        let mut labels: HashMap<OpId, usize> = HashMap::new();
        let mut out = String::new();
        let mut stack: Vec<(OpId, usize)> = self.roots.iter().rev().map(|r| (*r, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let pad = "  ".repeat(depth);
            let Ok(node) = self.node(id) else {
                out.push_str(&format!("{pad}<missing {id}>\n"));
                continue;
            };
            if let Some(n) = labels.get(&id) {
                out.push_str(&format!("{pad}@{n}\n"));
                continue;
            }
            let shared = consumers.get(&id).map_or(0, |c| c.len())
                + self.roots.iter().filter(|r| **r == id).count()
                > 1;
            if shared {
                let n = labels.len() + 1;
                labels.insert(id, n);
                out.push_str(&format!("{pad}@{n} {}\n", node.op));
            } else {
                out.push_str(&format!("{pad}{}\n", node.op));
            }
            if let Op::Select { .. } = node.op {
                for (key, expr) in &node.column_exprs {
                    out.push_str(&format!("{pad}    {key} := {expr}\n"));
                }
            }
            for input in node.inputs.iter().rev() {
                stack.push((*input, depth + 1));
            }
        }
        out
    }

    /// Hash of the plan's shape and contents, independent of operator ids.
    pub fn fingerprint(&self) -> Hash256 {
        hash_str(&self.explain())
    }
}
