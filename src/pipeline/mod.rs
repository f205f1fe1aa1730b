//! The four pipeline stages.
//!
//! Each stage loads the checkpoint, skips every unit of work the checkpoint
//! already records, performs the remaining units one at a time, and saves the
//! checkpoint after each unit. `--restart` undoes a stage's recorded output
//! before running it again.

use std::path::Path;

use crate::checkpoint::CheckpointStore;
use crate::ipc::ModelService;

pub mod calculation;
pub mod hierarchy;
pub mod model;
pub mod product_system;

/// Shared handles every stage needs.
pub struct StageContext<'a> {
    pub service: &'a dyn ModelService,
    pub store: &'a CheckpointStore,
    pub root: &'a Path,
}
