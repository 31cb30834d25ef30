//! Core engine: order execution, fill delivery and the per-cycle orchestrator.

pub mod cycle;
pub mod executor;
pub mod fills;
