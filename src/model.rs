//! Persistent state shared by the pipeline stages.
//!
//! The checkpoint is a snapshot of everything the stages know: the resolved
//! template hierarchy, the matched row positions, and per scenario the ids of
//! the objects each stage has already produced. Stages consult those ids to
//! skip finished work and write them back one unit at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema;
use crate::tables::ReplicationTables;

pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Exported artifact paths keyed by their label.
pub type ArtifactFiles = BTreeMap<String, PathBuf>;

/// What the pipeline has produced so far for one scenario of one template
/// process. Calculation artifacts nest as kind, then impact method, then
/// artifact label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub replica_id: Option<String>,
    pub replica_name: Option<String>,
    pub product_system_id: Option<String>,
    pub product_system_name: Option<String>,
    pub calculation_files: BTreeMap<String, BTreeMap<String, ArtifactFiles>>,
}

impl ScenarioRecord {
    pub fn calculation_files_for(&self, kind: &str, method: &str) -> Option<&ArtifactFiles> {
        self.calculation_files.get(kind)?.get(method)
    }

    pub fn record_calculation_files(&mut self, kind: &str, method: &str, files: ArtifactFiles) {
        self.calculation_files
            .entry(kind.to_string())
            .or_default()
            .insert(method.to_string(), files);
    }

    pub fn clear_calculation_files(&mut self, kind: &str, method: &str) -> Option<ArtifactFiles> {
        let by_method = self.calculation_files.get_mut(kind)?;
        let removed = by_method.remove(method);
        if by_method.is_empty() {
            self.calculation_files.remove(kind);
        }
        removed
    }
}

/// One resolved template process: its remote snapshot, its replication
/// tables, the matched row positions, and the per-scenario progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateProcess {
    pub id: String,
    pub name: String,
    pub replication_base_name: String,
    pub process: schema::Process,
    pub tables: ReplicationTables,
    pub is_referenced: bool,
    /// For replication row i, the index of its exchange in `process`.
    pub matched_exchange_indices: Vec<usize>,
    /// For allocation row i, the position within the process's physical
    /// allocation factors, when an allocation table exists.
    pub matched_allocation_indices: Option<Vec<Option<usize>>>,
    /// Template ids of the child processes, in replication row order.
    pub children: Vec<String>,
    pub scenarios: BTreeMap<String, ScenarioRecord>,
}

impl TemplateProcess {
    pub fn new(
        id: String,
        name: String,
        replication_base_name: String,
        process: schema::Process,
        tables: ReplicationTables,
    ) -> Self {
        let scenarios = tables
            .scenario_names
            .iter()
            .map(|scenario| (scenario.clone(), ScenarioRecord::default()))
            .collect();
        TemplateProcess {
            id,
            name,
            replication_base_name,
            process,
            tables,
            is_referenced: false,
            matched_exchange_indices: Vec::new(),
            matched_allocation_indices: None,
            children: Vec::new(),
            scenarios,
        }
    }

    /// Name a replica of this template carries for the given scenario.
    pub fn replica_name(&self, scenario: &str) -> String {
        format!("{} - {scenario}", self.replication_base_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,
    pub top_level_process_id: String,
    pub template_processes: BTreeMap<String, TemplateProcess>,
}

impl Checkpoint {
    pub fn root(&self) -> Option<&TemplateProcess> {
        self.template_processes.get(&self.top_level_process_id)
    }

    /// Template ids with children before parents, so default providers can
    /// be rewritten to replicas that already exist. The hierarchy is a tree
    /// by construction; the visited set only guards against a hand-edited
    /// checkpoint.
    pub fn post_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.template_processes.len());
        let mut visited = BTreeSet::new();
        self.visit(&self.top_level_process_id, &mut visited, &mut order);
        order
    }

    fn visit(&self, id: &str, visited: &mut BTreeSet<String>, order: &mut Vec<String>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        if let Some(node) = self.template_processes.get(id) {
            for child in &node.children {
                self.visit(child, visited, order);
            }
            order.push(id.to_string());
        }
    }
}
