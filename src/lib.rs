//! Categorized regex pattern registry.
//!
//! Patterns are grouped into categories, each compiled into one matcher.
//! New patterns are validated, checked for overlap with existing ones, and
//! either committed or parked until someone decides how to proceed.
//! Committed changes are announced to peer consumers as snapshots.

pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod overlap;
pub mod pager;
pub mod pending;
pub mod publish;
pub mod registry;
pub mod render;
pub mod sampler;
pub mod storage;
pub mod validator;
