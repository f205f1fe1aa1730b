//! Error taxonomy shared by the matching engine, the table loaders, and the
//! pipeline stages.
//!
//! Configuration and matching errors carry enough context (process, flow,
//! disambiguators) for an operator to fix the source data without re-running
//! under a debugger. Service errors surface the remote failure verbatim; no
//! retries happen anywhere.

use thiserror::Error;

/// Fatal problems in the driver or replication source data. Never
/// auto-corrected; the run aborts before further external side effects.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the 'Top-level?' column must contain a single 'x', {count} found")]
    TopLevelCount { count: usize },

    #[error("template process id '{id}' ('{name}') was not found in the modeling database")]
    UnknownProcess { id: String, name: String },

    #[error("flow '{id}' referenced by process '{process}' was not found in the modeling database")]
    UnknownFlow { id: String, process: String },

    #[error(
        "the replication tables for template process '{process}' do not contain the correct data columns \
         (extra: {extra:?}, missing: {missing:?})"
    )]
    ScenarioMismatch {
        process: String,
        extra: Vec<String>,
        missing: Vec<String>,
    },

    #[error("template process '{name}' is not referenced from the top-level hierarchy")]
    Unreferenced { name: String },

    #[error("default-provider cycle detected: {chain}")]
    Cycle { chain: String },

    #[error("template process '{name}' is referenced from more than one parent")]
    MultiplyReferenced { name: String },

    #[error("malformed data quality entry '{entry}'")]
    MalformedQualityEntry { entry: String },

    #[error(
        "the combination flow='{name}', description='{description}', category='{category}' is not unique; \
         the items in question must be distinguished via their description field"
    )]
    AmbiguousMarker {
        name: String,
        description: String,
        category: String,
    },

    #[error("row {row} in '{file}': unsupported flow direction '{value}' (accepted values are 'Input' and 'Output')")]
    InvalidDirection {
        file: String,
        row: usize,
        value: String,
    },
}

/// A replication row failed to pair with exactly the expected number of
/// external items.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("'{process}': {rows} replication rows must equal {items} {kind} entries")]
    RowCountMismatch {
        process: String,
        kind: &'static str,
        rows: usize,
        items: usize,
    },

    #[error("found no {kind} match for '{process}': flow='{flow}', description='{description}', category='{category}'")]
    NoMatch {
        process: String,
        kind: &'static str,
        flow: String,
        description: String,
        category: String,
    },

    #[error(
        "found {count} {kind} matches for '{process}': flow='{flow}', description='{description}', \
         category='{category}'; distinguish them via the description field (sample match: {sample})"
    )]
    Ambiguous {
        process: String,
        kind: &'static str,
        count: usize,
        flow: String,
        description: String,
        category: String,
        sample: String,
    },

    #[error("rows {first} and {second} of '{process}' both match the same {kind} entry '{flow}'")]
    Duplicate {
        process: String,
        kind: &'static str,
        first: usize,
        second: usize,
        flow: String,
    },
}

/// A remote call against the modeling service failed. Fatal to the current
/// stage; surfaced verbatim with the method that failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{method}: transport error: {message}")]
    Transport { method: String, message: String },

    #[error("{method}: service returned error: {message}")]
    Remote { method: String, message: String },
}
