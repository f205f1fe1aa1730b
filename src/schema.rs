//! Wire model for the objects exchanged with the modeling service.
//!
//! Only the fields the replication pipeline reads or rewrites are typed;
//! everything else is preserved verbatim in `extra` maps so a cloned process
//! round-trips through insert without losing units, locations, or metadata.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lightweight reference to a remote object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ref {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Ref {
            id: id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// Category reference carried by flows; the path segments join with '/'.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRef {
    #[serde(default)]
    pub category_path: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Flow {
    /// Joined category path; a missing category normalizes to an empty
    /// string, not a missing value.
    pub fn category_path(&self) -> String {
        match &self.category {
            Some(category) => category.category_path.join("/"),
            None => String::new(),
        }
    }
}

pub const LOG_NORMAL_DISTRIBUTION: &str = "LOG_NORMAL_DISTRIBUTION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uncertainty {
    #[serde(default)]
    pub distribution_type: String,
    #[serde(default)]
    pub geom_mean: f64,
    #[serde(default)]
    pub geom_sd: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    #[serde(default)]
    pub internal_id: i64,
    #[serde(default)]
    pub flow: Ref,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub quantitative_reference: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<Ref>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq_entry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_uncertainty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Uncertainty>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationType {
    #[serde(rename = "PHYSICAL_ALLOCATION")]
    Physical,
    #[serde(rename = "ECONOMIC_ALLOCATION")]
    Economic,
    #[serde(rename = "CAUSAL_ALLOCATION")]
    Causal,
    #[default]
    #[serde(other)]
    Unknown,
}

pub const PHYSICAL_ALLOCATION: &str = "PHYSICAL_ALLOCATION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationFactor {
    #[serde(default)]
    pub allocation_type: AllocationType,
    #[serde(default)]
    pub product: Ref,
    #[serde(default)]
    pub value: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<String>,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocation_factors: Vec<AllocationFactor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Process {
    /// Positions of the physical allocation factors within
    /// `allocation_factors`, in their stored order.
    pub fn physical_allocation_positions(&self) -> Vec<usize> {
        self.allocation_factors
            .iter()
            .enumerate()
            .filter(|(_, factor)| factor.allocation_type == AllocationType::Physical)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Calculation kinds accepted on the CLI and sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CalculationKind {
    Simple,
    Contribution,
    Upstream,
    Regionalized,
    MonteCarlo,
}

impl CalculationKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            CalculationKind::Simple => "SIMPLE_CALCULATION",
            CalculationKind::Contribution => "CONTRIBUTION_ANALYSIS",
            CalculationKind::Upstream => "UPSTREAM_ANALYSIS",
            CalculationKind::Regionalized => "REGIONALIZED_CALCULATION",
            CalculationKind::MonteCarlo => "MONTE_CARLO_SIMULATION",
        }
    }

    pub fn is_monte_carlo(self) -> bool {
        self == CalculationKind::MonteCarlo
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSetup {
    pub calculation_type: &'static str,
    pub allocation_method: &'static str,
    pub impact_method: Ref,
    pub product_system: Ref,
    pub amount: f64,
    pub with_costs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_round_trips_unknown_fields() {
        let raw = serde_json::json!({
            "@id": "p1",
            "name": "Pig farming",
            "processType": "UNIT_PROCESS",
            "location": {"@id": "loc1", "name": "CA"},
            "exchanges": [{
                "internalId": 1,
                "flow": {"@id": "f1", "name": "Pork"},
                "amount": 2.5,
                "input": false,
                "quantitativeReference": true,
                "unit": {"@id": "u1", "name": "kg"}
            }]
        });
        let process: Process = serde_json::from_value(raw).unwrap();
        assert_eq!(process.exchanges[0].flow.name, "Pork");
        let back = serde_json::to_value(&process).unwrap();
        assert_eq!(back["processType"], "UNIT_PROCESS");
        assert_eq!(back["location"]["name"], "CA");
        assert_eq!(back["exchanges"][0]["unit"]["name"], "kg");
    }

    #[test]
    fn missing_category_normalizes_to_empty_path() {
        let flow = Flow::default();
        assert_eq!(flow.category_path(), "");
        let flow = Flow {
            category: Some(CategoryRef {
                category_path: vec!["Agriculture".into(), "Animal".into()],
                extra: Map::new(),
            }),
            ..Flow::default()
        };
        assert_eq!(flow.category_path(), "Agriculture/Animal");
    }

    #[test]
    fn allocation_type_tolerates_unknown_wire_values() {
        let factor: AllocationFactor =
            serde_json::from_value(serde_json::json!({"allocationType": "SOMETHING_NEW"})).unwrap();
        assert_eq!(factor.allocation_type, AllocationType::Unknown);
    }
}
