//! Logical schema types. Pure data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Widest type two numeric operands are promoted to.
    ///
    /// Any float promotes to `Float64`, otherwise any `Int64` wins, otherwise `Int32`.
    pub fn promote(self, other: DataType) -> Option<DataType> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }
        Some(if self.is_float() || other.is_float() {
            DataType::Float64
        } else if self == DataType::Int64 || other == DataType::Int64 {
            DataType::Int64
        } else {
            DataType::Int32
        })
    }

    /// Whether values of the two types can be compared with `=`, `<`, ...
    pub fn comparable_with(self, other: DataType) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }

    /// Parse a type name as written in plan files ("Int64", "i64", "string", ...).
    pub fn parse(name: &str) -> Result<DataType> {
        Ok(match name {
            "Boolean" | "bool" | "boolean" => DataType::Boolean,
            "Int32" | "i32" | "int" => DataType::Int32,
            "Int64" | "i64" | "bigint" => DataType::Int64,
            "Float32" | "f32" | "float" => DataType::Float32,
            "Float64" | "f64" | "double" => DataType::Float64,
            "Utf8" | "string" | "str" => DataType::Utf8,
            other => return Err(Error::Analysis(format!("unknown data type '{other}'"))),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Boolean => "Boolean",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Utf8 => "Utf8",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
