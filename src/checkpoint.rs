//! Checkpoint persistence.
//!
//! The checkpoint lives as pretty-printed JSON next to the input tables and
//! is rewritten atomically (write to a sibling temp file, then rename) after
//! every completed unit of work, so a crash never leaves a torn state file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::model::{Checkpoint, STATE_SCHEMA_VERSION};

pub const STATE_FILENAME: &str = "state.json";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: &Path) -> Self {
        CheckpointStore {
            path: root.join(STATE_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Checkpoint> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading checkpoint {}", self.path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&data)
            .with_context(|| format!("parsing checkpoint {}", self.path.display()))?;
        if checkpoint.schema_version != STATE_SCHEMA_VERSION {
            bail!(
                "checkpoint {} has schema version {}, this build reads version {}",
                self.path.display(),
                checkpoint.schema_version,
                STATE_SCHEMA_VERSION
            );
        }
        Ok(checkpoint)
    }

    pub fn load_optional(&self) -> Result<Option<Checkpoint>> {
        if self.path.is_file() {
            self.load().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let data = serde_json::to_string_pretty(checkpoint).context("encoding checkpoint")?;
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, data)
            .with_context(|| format!("writing staged checkpoint {}", staged.display()))?;
        fs::rename(&staged, &self.path)
            .with_context(|| format!("publishing checkpoint {}", self.path.display()))?;
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("deleting checkpoint {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn checkpoint() -> Checkpoint {
        Checkpoint {
            schema_version: STATE_SCHEMA_VERSION,
            top_level_process_id: "root".to_string(),
            template_processes: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load_optional().unwrap().is_none());
        store.save(&checkpoint()).unwrap();
        let loaded = store.load_optional().unwrap().unwrap();
        assert_eq!(loaded.top_level_process_id, "root");
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn rejects_unknown_schema_versions() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut old = checkpoint();
        old.schema_version = STATE_SCHEMA_VERSION + 1;
        let data = serde_json::to_string(&old).unwrap();
        std::fs::write(store.path(), data).unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("schema version"), "{err}");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.delete().unwrap();
        store.save(&checkpoint()).unwrap();
        store.delete().unwrap();
        assert!(store.load_optional().unwrap().is_none());
    }
}
