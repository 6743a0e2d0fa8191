//! Workflow orchestration engine for sagaflow.
//!
//! Steps are declared with builder functions, wired into a dependency graph
//! through the data they read, executed concurrently where the graph allows,
//! and unwound through their compensate functions when any node fails.
//!
//! The crate depends only on `sagaflow-types` for its vocabulary; storage is
//! reached through the `repository` port traits.

pub mod config;
pub mod event;
pub mod repository;
pub mod workflow;
