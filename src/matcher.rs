//! Pairs ordered replication rows against unordered external items.
//!
//! External items get a marker: the trimmed name, escalated with the
//! description and then the category path only as far as needed to become
//! unique. Fields the escalation never reached stay `None` and act as
//! wildcards during row matching. If name, description, and category together
//! are still duplicated, the external data itself is ambiguous and the build
//! fails before any row is considered.

use crate::errors::{ConfigError, MatchError};

/// Name/description/category triple of one external item, gathered by the
/// caller (categories require service lookups; this module stays pure).
#[derive(Debug, Clone)]
pub struct MarkerInput {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Same triple on the replication-row side.
#[derive(Debug, Clone)]
pub struct RowKey {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Derived, ephemeral marker. `None` fields are wildcards.
#[derive(Debug, Clone)]
pub struct MatchMarker {
    name: String,
    description: Option<String>,
    category: Option<String>,
}

impl MatchMarker {
    fn matches(&self, row: &RowKey) -> bool {
        if row.name.trim() != self.name.trim() {
            return false;
        }
        if let Some(description) = &self.description {
            if row.description.trim() != description.trim() {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if row.category.trim() != category.trim() {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        format!(
            "name='{}', description='{}', category='{}'",
            self.name,
            self.description.as_deref().unwrap_or("<any>"),
            self.category.as_deref().unwrap_or("<any>"),
        )
    }
}

/// Build one marker per external item, escalating disambiguation per item.
pub fn build_markers(items: &[MarkerInput]) -> Result<Vec<MatchMarker>, ConfigError> {
    let mut markers = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name_duplicated = items
            .iter()
            .enumerate()
            .any(|(j, other)| i != j && item.name == other.name);
        let mut description = None;
        let mut category = None;
        if name_duplicated {
            description = Some(item.description.clone());
            let still_duplicated = items.iter().enumerate().any(|(j, other)| {
                i != j && item.name == other.name && item.description == other.description
            });
            if still_duplicated {
                category = Some(item.category.clone());
                let exhausted = items.iter().enumerate().any(|(j, other)| {
                    i != j
                        && item.name == other.name
                        && item.description == other.description
                        && item.category == other.category
                });
                if exhausted {
                    return Err(ConfigError::AmbiguousMarker {
                        name: item.name.clone(),
                        description: item.description.clone(),
                        category: item.category.clone(),
                    });
                }
            }
        }
        markers.push(MatchMarker {
            name: item.name.clone(),
            description,
            category,
        });
    }
    Ok(markers)
}

/// Mandatory 1:1 matching: every row must hit exactly one marker, and no two
/// rows may claim the same item.
pub fn match_required(
    rows: &[RowKey],
    markers: &[MatchMarker],
    process: &str,
    kind: &'static str,
) -> Result<Vec<usize>, MatchError> {
    let mut matched = Vec::with_capacity(rows.len());
    for row in rows {
        let hits = hits_for(row, markers);
        match hits.as_slice() {
            [index] => matched.push(*index),
            [] => return Err(no_match(row, process, kind)),
            _ => return Err(ambiguous(row, &hits, markers, process, kind)),
        }
    }
    for (second, index) in matched.iter().enumerate() {
        if let Some(first) = matched[..second].iter().position(|other| other == index) {
            return Err(MatchError::Duplicate {
                process: process.to_string(),
                kind,
                first: first + 1,
                second: second + 1,
                flow: markers[*index].name.clone(),
            });
        }
    }
    Ok(matched)
}

/// Optional 0-or-1 matching: zero hits records `None`; only multiple hits are
/// fatal.
pub fn match_optional(
    rows: &[RowKey],
    markers: &[MatchMarker],
    process: &str,
    kind: &'static str,
) -> Result<Vec<Option<usize>>, MatchError> {
    let mut matched = Vec::with_capacity(rows.len());
    for row in rows {
        let hits = hits_for(row, markers);
        match hits.as_slice() {
            [] => matched.push(None),
            [index] => matched.push(Some(*index)),
            _ => return Err(ambiguous(row, &hits, markers, process, kind)),
        }
    }
    Ok(matched)
}

fn hits_for(row: &RowKey, markers: &[MatchMarker]) -> Vec<usize> {
    markers
        .iter()
        .enumerate()
        .filter(|(_, marker)| marker.matches(row))
        .map(|(index, _)| index)
        .collect()
}

fn no_match(row: &RowKey, process: &str, kind: &'static str) -> MatchError {
    MatchError::NoMatch {
        process: process.to_string(),
        kind,
        flow: row.name.clone(),
        description: row.description.clone(),
        category: row.category.clone(),
    }
}

fn ambiguous(
    row: &RowKey,
    hits: &[usize],
    markers: &[MatchMarker],
    process: &str,
    kind: &'static str,
) -> MatchError {
    MatchError::Ambiguous {
        process: process.to_string(),
        kind,
        count: hits.len(),
        flow: row.name.clone(),
        description: row.description.clone(),
        category: row.category.clone(),
        sample: markers[hits[0]].describe(),
    }
}
