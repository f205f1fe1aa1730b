//! CSV loaders for the driver file and the per-process replication tables.
//!
//! The driver file (`processes.csv`) lists every template process and names
//! the replication file that carries its amounts. Per replication file
//! `<stem>.csv`, two optional siblings may exist: `<stem>.allocations.csv`
//! for physical allocation factors and `<stem>.dqis.csv` for squashed data
//! quality cells. Scenario columns are everything after the structural
//! columns, in header order.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DRIVER_FILENAME: &str = "processes.csv";

const TOP_LEVEL_COLUMN: &str = "Top-level?";
const NAME_COLUMN: &str = "Template process name";
const ID_COLUMN: &str = "Template process UUID";
const BASE_NAME_COLUMN: &str = "Replication base name";
const FILE_COLUMN: &str = "Replication file";

/// Structural (non-scenario) columns of an amounts or allocations table.
pub const STRUCTURAL_COLUMNS: [&str; 5] =
    ["Direction", "Is reference?", "Flow", "Description", "Category"];

/// Sub-header names of one scenario block in a DQI table, in fixed order.
pub const DQI_SUB_COLUMNS: [&str; 6] = [
    "Reliability",
    "Completeness",
    "Temporal correlation",
    "Geographical correlation",
    "Further technological correlation",
    "Base uncertainty",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn parse(value: &str, file: &str, row: usize) -> Result<Self, ConfigError> {
        match value.trim() {
            "Input" => Ok(Direction::Input),
            "Output" => Ok(Direction::Output),
            other => Err(ConfigError::InvalidDirection {
                file: file.to_string(),
                row,
                value: other.to_string(),
            }),
        }
    }

    pub fn is_input(self) -> bool {
        self == Direction::Input
    }
}

/// One row of the driver file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRow {
    pub top_level: bool,
    pub name: String,
    pub process_id: String,
    pub replication_base_name: String,
    pub replication_file: String,
}

/// Name/description/category triple shared by every replication table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralKey {
    pub flow: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountRow {
    pub direction: Direction,
    pub is_reference: bool,
    pub key: StructuralKey,
    /// Raw cell per scenario, parsed only at substitution time.
    pub amounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRow {
    pub key: StructuralKey,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DqiRow {
    pub key: StructuralKey,
    /// Squashed `(r;c;t;g;f)|base` cell per scenario; `None` when the block
    /// had no usable base uncertainty.
    pub entries: Vec<Option<String>>,
}

/// All replication tables of one template process, keyed by a shared scenario
/// column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTables {
    pub scenario_names: Vec<String>,
    pub amounts: Vec<AmountRow>,
    pub allocations: Option<Vec<AllocationRow>>,
    pub dqis: Option<Vec<DqiRow>>,
}

impl ReplicationTables {
    pub fn scenario_index(&self, name: &str) -> Option<usize> {
        self.scenario_names.iter().position(|n| n == name)
    }
}

fn is_marked(cell: &str) -> bool {
    cell.trim().eq_ignore_ascii_case("x")
}

/// Load and validate `processes.csv` from the input root. Exactly one row
/// must be marked top-level.
pub fn load_driver(root: &Path) -> Result<Vec<DriverRow>> {
    let path = root.join(DRIVER_FILENAME);
    let file =
        File::open(&path).with_context(|| format!("opening driver file {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers().context("reading driver headers")?.clone();
    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .with_context(|| format!("driver file {} has no '{name}' column", path.display()))
    };
    let top_level = column(TOP_LEVEL_COLUMN)?;
    let name = column(NAME_COLUMN)?;
    let id = column(ID_COLUMN)?;
    let base_name = column(BASE_NAME_COLUMN)?;
    let file_name = column(FILE_COLUMN)?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading driver row {}", index + 1))?;
        let cell = |column: usize| record.get(column).unwrap_or("").trim().to_string();
        rows.push(DriverRow {
            top_level: is_marked(record.get(top_level).unwrap_or("")),
            name: cell(name),
            process_id: cell(id),
            replication_base_name: cell(base_name),
            replication_file: cell(file_name),
        });
    }

    let marked = rows.iter().filter(|row| row.top_level).count();
    if marked != 1 {
        return Err(ConfigError::TopLevelCount { count: marked }.into());
    }
    Ok(rows)
}

/// Load the amounts table plus the optional allocations and DQI siblings for
/// one replication file name.
pub fn load_replication_tables(root: &Path, file_name: &str) -> Result<ReplicationTables> {
    let stem = file_name
        .strip_suffix(".csv")
        .unwrap_or(file_name)
        .to_string();
    let amounts_path = root.join(format!("{stem}.csv"));
    let (scenario_names, amounts) = load_amounts(&amounts_path)?;

    let allocations_path = root.join(format!("{stem}.allocations.csv"));
    let allocations = if allocations_path.is_file() {
        Some(load_allocations(&allocations_path, &scenario_names)?)
    } else {
        None
    };

    let dqis_path = root.join(format!("{stem}.dqis.csv"));
    let dqis = if dqis_path.is_file() {
        let rows = load_dqis(&dqis_path, &scenario_names)?;
        if rows.len() != amounts.len() {
            bail!(
                "{}: {} rows do not line up with the {} amount rows",
                dqis_path.display(),
                rows.len(),
                amounts.len()
            );
        }
        Some(rows)
    } else {
        None
    };

    Ok(ReplicationTables {
        scenario_names,
        amounts,
        allocations,
        dqis,
    })
}

fn load_amounts(path: &Path) -> Result<(Vec<String>, Vec<AmountRow>)> {
    let file = File::open(path)
        .with_context(|| format!("opening replication file {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader
        .headers()
        .with_context(|| format!("reading headers of {}", path.display()))?
        .clone();

    let mut structural = [0usize; 5];
    for (slot, name) in structural.iter_mut().zip(STRUCTURAL_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.trim() == name)
            .with_context(|| format!("{} has no '{name}' column", path.display()))?;
    }
    let scenario_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(index, _)| !structural.contains(index))
        .map(|(index, header)| (index, header.trim().to_string()))
        .collect();
    if scenario_columns.is_empty() {
        bail!("{} has no data columns", path.display());
    }
    let scenario_names = scenario_columns
        .iter()
        .map(|(_, name)| name.clone())
        .collect();

    let file_label = path.display().to_string();
    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("reading {} row {}", path.display(), index + 1))?;
        let cell = |column: usize| record.get(column).unwrap_or("").trim().to_string();
        rows.push(AmountRow {
            direction: Direction::parse(&cell(structural[0]), &file_label, index + 1)?,
            is_reference: is_marked(&cell(structural[1])),
            key: StructuralKey {
                flow: cell(structural[2]),
                description: cell(structural[3]),
                category: cell(structural[4]),
            },
            amounts: scenario_columns
                .iter()
                .map(|(column, _)| cell(*column))
                .collect(),
        });
    }
    Ok((scenario_names, rows))
}

fn load_allocations(path: &Path, expected_scenarios: &[String]) -> Result<Vec<AllocationRow>> {
    let file = File::open(path)
        .with_context(|| format!("opening allocation file {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader
        .headers()
        .with_context(|| format!("reading headers of {}", path.display()))?
        .clone();

    let mut structural = [0usize; 3];
    for (slot, name) in structural.iter_mut().zip(["Flow", "Description", "Category"]) {
        *slot = headers
            .iter()
            .position(|h| h.trim() == name)
            .with_context(|| format!("{} has no '{name}' column", path.display()))?;
    }
    let scenario_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(index, _)| !structural.contains(index))
        .map(|(index, header)| (index, header.trim().to_string()))
        .collect();
    let names: Vec<String> = scenario_columns
        .iter()
        .map(|(_, name)| name.clone())
        .collect();
    if names != expected_scenarios {
        bail!(
            "{}: data columns {:?} do not match the amount table's {:?}",
            path.display(),
            names,
            expected_scenarios
        );
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("reading {} row {}", path.display(), index + 1))?;
        let cell = |column: usize| record.get(column).unwrap_or("").trim().to_string();
        rows.push(AllocationRow {
            key: StructuralKey {
                flow: cell(structural[0]),
                description: cell(structural[1]),
                category: cell(structural[2]),
            },
            values: scenario_columns
                .iter()
                .map(|(column, _)| cell(*column))
                .collect(),
        });
    }
    Ok(rows)
}

/// DQI tables carry two header rows: the first names the structural columns
/// and then, at the start of each six-column block, the scenario; the second
/// row repeats the fixed sub-headers per block. Blocks squash to one
/// `(r;c;t;g;f)|base` cell; a missing or non-numeric base disables the whole
/// block for that row.
fn load_dqis(path: &Path, expected_scenarios: &[String]) -> Result<Vec<DqiRow>> {
    let file =
        File::open(path).with_context(|| format!("opening DQI file {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut records = reader.records();

    let first = records
        .next()
        .with_context(|| format!("{} is empty", path.display()))?
        .with_context(|| format!("reading first header row of {}", path.display()))?;
    let second = records
        .next()
        .with_context(|| format!("{} has no sub-header row", path.display()))?
        .with_context(|| format!("reading second header row of {}", path.display()))?;

    let structural_count = STRUCTURAL_COLUMNS.len();
    for (index, name) in STRUCTURAL_COLUMNS.iter().enumerate() {
        let header = first.get(index).unwrap_or("").trim();
        if header != *name {
            bail!(
                "{}: expected column {} to be '{name}', found '{header}'",
                path.display(),
                index + 1
            );
        }
    }

    let block = DQI_SUB_COLUMNS.len();
    let mut scenarios = Vec::new();
    let mut start = structural_count;
    while start < first.len() {
        let scenario = first.get(start).unwrap_or("").trim();
        if scenario.is_empty() {
            bail!(
                "{}: column {} should start a data column block",
                path.display(),
                start + 1
            );
        }
        for (offset, sub) in DQI_SUB_COLUMNS.iter().enumerate() {
            let header = second.get(start + offset).unwrap_or("").trim();
            if header != *sub {
                bail!(
                    "{}: block '{scenario}' column {} should be '{sub}', found '{header}'",
                    path.display(),
                    start + offset + 1
                );
            }
        }
        scenarios.push(scenario.to_string());
        start += block;
    }
    if scenarios != expected_scenarios {
        bail!(
            "{}: data columns {:?} do not match the amount table's {:?}",
            path.display(),
            scenarios,
            expected_scenarios
        );
    }

    let mut rows = Vec::new();
    for (index, record) in records.enumerate() {
        let record =
            record.with_context(|| format!("reading {} row {}", path.display(), index + 3))?;
        let cell = |column: usize| record.get(column).unwrap_or("").trim().to_string();
        let key = StructuralKey {
            flow: cell(2),
            description: cell(3),
            category: cell(4),
        };
        let mut entries = Vec::with_capacity(scenarios.len());
        for block_index in 0..scenarios.len() {
            let start = structural_count + block_index * block;
            let base = cell(start + block - 1);
            if base.parse::<f64>().is_err() {
                entries.push(None);
                continue;
            }
            let scores: Vec<String> = (0..block - 1).map(|offset| cell(start + offset)).collect();
            entries.push(Some(format!("({})|{base}", scores.join(";"))));
        }
        rows.push(DqiRow { key, entries });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    fn driver_content(marks: &[&str]) -> String {
        let mut out = String::from(
            "Top-level?,Template process name,Template process UUID,Replication base name,Replication file\n",
        );
        for (i, mark) in marks.iter().enumerate() {
            out.push_str(&format!(
                "{mark},Process {i},id-{i},Base {i},proc{i}.csv\n"
            ));
        }
        out
    }

    #[test]
    fn driver_requires_exactly_one_top_level_mark() {
        let dir = TempDir::new().unwrap();
        write(&dir, DRIVER_FILENAME, &driver_content(&["x", ""]));
        let rows = load_driver(dir.path()).unwrap();
        assert!(rows[0].top_level);
        assert!(!rows[1].top_level);
        assert_eq!(rows[1].process_id, "id-1");

        write(&dir, DRIVER_FILENAME, &driver_content(&["", ""]));
        assert!(load_driver(dir.path()).is_err());
        write(&dir, DRIVER_FILENAME, &driver_content(&["x", " X "]));
        assert!(load_driver(dir.path()).is_err());
    }

    #[test]
    fn amounts_capture_scenarios_in_header_order() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "pig.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A,Farm B\n\
             Output,x,Pork,,Meat,1.0,2.0\n\
             Input,,Feed,soy based,Inputs,3.5,4.5\n",
        );
        let tables = load_replication_tables(dir.path(), "pig.csv").unwrap();
        assert_eq!(tables.scenario_names, vec!["Farm A", "Farm B"]);
        assert_eq!(tables.scenario_index("Farm B"), Some(1));
        assert_eq!(tables.amounts.len(), 2);
        assert!(tables.amounts[0].is_reference);
        assert_eq!(tables.amounts[0].direction, Direction::Output);
        assert_eq!(tables.amounts[1].key.description, "soy based");
        assert_eq!(tables.amounts[1].amounts, vec!["3.5", "4.5"]);
        assert!(tables.allocations.is_none());
        assert!(tables.dqis.is_none());
    }

    #[test]
    fn unsupported_direction_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "pig.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A\n\
             Sideways,,Pork,,Meat,1.0\n",
        );
        let err = load_replication_tables(dir.path(), "pig.csv").unwrap_err();
        assert!(err.to_string().contains("Sideways"), "{err}");
    }

    #[test]
    fn allocation_scenarios_must_match_the_amount_table() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "pig.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A\n\
             Output,x,Pork,,Meat,1.0\n",
        );
        write(
            &dir,
            "pig.allocations.csv",
            "Flow,Description,Category,Farm B\nPork,,Meat,0.8\n",
        );
        let err = load_replication_tables(dir.path(), "pig.csv").unwrap_err();
        assert!(err.to_string().contains("Farm B"), "{err}");

        write(
            &dir,
            "pig.allocations.csv",
            "Flow,Description,Category,Farm A\nPork,,Meat,0.8\n",
        );
        let tables = load_replication_tables(dir.path(), "pig.csv").unwrap();
        let allocations = tables.allocations.unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].values, vec!["0.8"]);
    }

    #[test]
    fn dqi_blocks_squash_or_disable_per_base_cell() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "pig.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A,Farm B\n\
             Output,x,Pork,,Meat,1.0,2.0\n",
        );
        write(
            &dir,
            "pig.dqis.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A,,,,,,Farm B,,,,,\n\
             ,,,,,Reliability,Completeness,Temporal correlation,Geographical correlation,Further technological correlation,Base uncertainty,Reliability,Completeness,Temporal correlation,Geographical correlation,Further technological correlation,Base uncertainty\n\
             Output,x,Pork,,Meat,3,2,1,4,1,1.24,1,1,1,1,1,\n",
        );
        let tables = load_replication_tables(dir.path(), "pig.csv").unwrap();
        let dqis = tables.dqis.unwrap();
        assert_eq!(dqis.len(), 1);
        assert_eq!(dqis[0].key.flow, "Pork");
        assert_eq!(dqis[0].entries[0].as_deref(), Some("(3;2;1;4;1)|1.24"));
        assert_eq!(dqis[0].entries[1], None);
    }

    #[test]
    fn dqi_row_count_must_match_the_amount_table() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "pig.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A\n\
             Output,x,Pork,,Meat,1.0\n\
             Input,,Feed,,Inputs,2.0\n",
        );
        write(
            &dir,
            "pig.dqis.csv",
            "Direction,Is reference?,Flow,Description,Category,Farm A,,,,,\n\
             ,,,,,Reliability,Completeness,Temporal correlation,Geographical correlation,Further technological correlation,Base uncertainty\n\
             Output,x,Pork,,Meat,1,1,1,1,1,1.0\n",
        );
        let err = load_replication_tables(dir.path(), "pig.csv").unwrap_err();
        assert!(err.to_string().contains("line up"), "{err}");
    }
}
