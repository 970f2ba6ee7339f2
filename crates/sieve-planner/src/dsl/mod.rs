//! Plan file formats.

pub mod yaml;
