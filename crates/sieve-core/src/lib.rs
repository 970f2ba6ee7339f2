#![forbid(unsafe_code)]
//! sieve-core: the data model shared by the pushdown pass and the evaluator.
//!
//! - `expr`: immutable scalar expression trees and the closed function set
//! - `resolver`: per-operator alias → column → type maps
//! - `dag`: the operator plan graph, stored in an arena keyed by `OpId`
//! - `config`, `error`, `id`, `schema`, `types`, `hash`: shared plumbing
//!
//! No evaluation and no I/O live here.

pub mod config;
pub mod dag;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod resolver;
pub mod schema;
pub mod types;

pub use error::{Error, Result};
