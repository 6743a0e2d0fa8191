//! Workflow engine core: definition building, graph execution and compensation.
//!
//! - `step` -- the step contract, boxed dispatch and closure-backed steps
//! - `node` -- builder functions producing the closed set of node types
//! - `definition` -- eager validation and compilation into scopes
//! - `dag` -- cycle detection and wave planning over a scope
//! - `context` -- per-run, write-once record of node outcomes
//! - `compensation` -- the LIFO compensation log and its outcome
//! - `hook` -- externally registered hook handlers
//! - `registry` -- process-scoped workflow registry
//! - `retry` -- explicit per-step retry policy
//! - `checkpoint` -- run and node transition records through `RunRepository`
//! - `executor` -- ready-based concurrent execution and unwind
//! - `engine` -- public entry point tying the above together

pub mod checkpoint;
pub mod compensation;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod hook;
pub mod node;
pub mod registry;
pub mod result;
pub mod retry;
pub mod step;

mod executor;
