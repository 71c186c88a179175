//! CLI command implementations.

pub mod config;
pub mod index;
pub mod translate;
