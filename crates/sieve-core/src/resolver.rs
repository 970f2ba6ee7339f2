//! Row resolvers: for one operator's output row, which aliases are visible
//! and what columns (with types) each alias carries.
//!
//! Resolvers are produced by the analyzer and only read by the pushdown pass.
//! They double as the type descriptor the evaluator checks expressions against.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::{ColumnKey, Expr};
use crate::schema::{DataType, Field, Schema};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResolver {
    /// Alias → columns, in declaration order.
    entries: Vec<(String, Schema)>,
}

impl RowResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(alias: impl Into<String>, schema: Schema) -> Self {
        Self {
            entries: vec![(alias.into(), schema)],
        }
    }

    /// Add one column under `alias`, creating the alias on first use.
    pub fn add(&mut self, alias: &str, field: Field) -> Result<()> {
        let idx = match self.entries.iter().position(|(a, _)| a == alias) {
            Some(idx) => idx,
            None => {
                self.entries.push((alias.to_string(), Schema::default()));
                self.entries.len() - 1
            }
        };
        let schema = &mut self.entries[idx].1;
        if schema.index_of(&field.name).is_some() {
            return Err(Error::Analysis(format!(
                "column {alias}.{} declared twice",
                field.name
            )));
        }
        schema.fields.push(field);
        Ok(())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(a, _)| a.as_str())
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.entries.iter().any(|(a, _)| a == alias)
    }

    pub fn schema_of(&self, alias: &str) -> Option<&Schema> {
        self.entries
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, s)| s)
    }

    pub fn lookup(&self, key: &ColumnKey) -> Option<&Field> {
        self.schema_of(&key.alias)?.field_named(&key.name)
    }

    pub fn contains(&self, key: &ColumnKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Type of `key`, or an analysis error naming what is missing.
    pub fn resolve(&self, key: &ColumnKey) -> Result<DataType> {
        let schema = self
            .schema_of(&key.alias)
            .ok_or_else(|| Error::Analysis(format!("unknown alias '{}' in {key}", key.alias)))?;
        schema
            .field_named(&key.name)
            .map(|f| f.data_type)
            .ok_or_else(|| Error::Analysis(format!("unknown column {key}")))
    }

    /// Every visible column with its field, alias by alias.
    pub fn columns(&self) -> impl Iterator<Item = (ColumnKey, &Field)> {
        self.entries.iter().flat_map(|(alias, schema)| {
            schema
                .fields
                .iter()
                .map(move |f| (ColumnKey::new(alias.clone(), f.name.clone()), f))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, s)| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate two resolvers whose aliases must be disjoint.
    pub fn merge(&self, other: &RowResolver) -> Result<RowResolver> {
        let mut out = self.clone();
        for (alias, schema) in &other.entries {
            if out.contains_alias(alias) {
                return Err(Error::Analysis(format!(
                    "alias '{alias}' is produced by more than one input"
                )));
            }
            out.entries.push((alias.clone(), schema.clone()));
        }
        Ok(out)
    }

    /// Add `schema`'s columns under `alias`, extending an existing alias.
    pub fn extend_alias(&mut self, alias: &str, schema: &Schema) -> Result<()> {
        for field in &schema.fields {
            self.add(alias, field.clone())?;
        }
        Ok(())
    }

    /// Type-check `expr` against this row and return its result type.
    ///
    /// `None` means the expression is an untyped NULL.
    pub fn infer_type(&self, expr: &Expr) -> Result<Option<DataType>> {
        match expr {
            Expr::Column(key) => self.resolve(key).map(Some),
            Expr::Constant(v) => Ok(v.data_type()),
            Expr::Call { func, args } => {
                let arg_types = args
                    .iter()
                    .map(|a| self.infer_type(a))
                    .collect::<Result<Vec<_>>>()?;
                func.return_type(&arg_types).map(Some)
            }
        }
    }

    /// Like `infer_type`, but the expression must produce a boolean (or NULL).
    pub fn check_predicate(&self, expr: &Expr) -> Result<()> {
        match self.infer_type(expr)? {
            None | Some(DataType::Boolean) => Ok(()),
            Some(other) => Err(Error::Type(format!(
                "predicate {expr} has type {other}, expected Boolean"
            ))),
        }
    }
}
