//! Core data models for the reconciliation node.
//!
//! These entities describe object ids, the per-object records held by the
//! in-memory graph, node runtime state, and the bucket statistics reported
//! over HTTP. They carry no I/O of their own.

pub mod ids;
pub mod node;
pub mod record;
pub mod stats;
