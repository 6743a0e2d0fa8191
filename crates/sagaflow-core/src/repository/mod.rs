//! Storage ports used by the engine.
//!
//! The engine only ever talks to storage through these traits. An in-memory
//! implementation ships with the crate; durable backends live elsewhere.

pub mod memory;
pub mod run;
