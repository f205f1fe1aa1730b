//! Replicates template LCA process models per data column and drives the
//! resulting product systems through calculations, all against a modeling
//! service spoken to over JSON-RPC. Progress persists in a checkpoint next
//! to the input tables so interrupted runs resume where they stopped.

pub mod checkpoint;
pub mod cli;
pub mod dqi;
pub mod errors;
pub mod ipc;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod tables;
