//! Pedigree-matrix data quality indicators.
//!
//! A squashed DQI cell looks like `(3;2;1;4;1)|1.24`: five ordinal scores for
//! the five pedigree dimensions, then the base uncertainty. The scores map
//! through the fixed pedigree matrix to multiplicative factors whose
//! log-variances add up with the base log-variance.

use crate::errors::ConfigError;

/// Factor tables per pedigree dimension, indexed by score 1..=5.
const RELIABILITY: [f64; 5] = [1.0, 1.05, 1.1, 1.2, 1.5];
const COMPLETENESS: [f64; 5] = [1.0, 1.02, 1.05, 1.1, 1.2];
const TEMPORAL_CORRELATION: [f64; 5] = [1.0, 1.03, 1.1, 1.2, 1.5];
const GEOGRAPHICAL_CORRELATION: [f64; 5] = [1.0, 1.01, 1.02, 1.05, 1.1];
const FURTHER_TECHNOLOGICAL_CORRELATION: [f64; 5] = [1.0, 1.05, 1.2, 1.5, 2.0];

const DIMENSIONS: [[f64; 5]; 5] = [
    RELIABILITY,
    COMPLETENESS,
    TEMPORAL_CORRELATION,
    GEOGRAPHICAL_CORRELATION,
    FURTHER_TECHNOLOGICAL_CORRELATION,
];

/// Split a squashed DQI cell into the `(r;c;t;g;f)` entry and the base
/// uncertainty. The entry is validated against the pedigree matrix so a
/// malformed cell fails here rather than halfway through a substitution.
pub fn parse(squashed: &str) -> Result<(String, f64), ConfigError> {
    let malformed = || ConfigError::MalformedQualityEntry {
        entry: squashed.to_string(),
    };
    let (entry, base) = squashed.split_once('|').ok_or_else(malformed)?;
    let entry = entry.trim();
    let base: f64 = base.trim().parse().map_err(|_| malformed())?;
    if !base.is_finite() || base <= 0.0 {
        return Err(malformed());
    }
    factors(entry)?;
    Ok((entry.to_string(), base))
}

/// Resolve a `(r;c;t;g;f)` entry to its five pedigree factors.
pub fn factors(dq_entry: &str) -> Result<[f64; 5], ConfigError> {
    let malformed = || ConfigError::MalformedQualityEntry {
        entry: dq_entry.to_string(),
    };
    let inner = dq_entry
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(malformed)?;
    let scores: Vec<&str> = inner.split(';').collect();
    if scores.len() != DIMENSIONS.len() {
        return Err(malformed());
    }
    let mut values = [0.0; 5];
    for (value, (score, table)) in values.iter_mut().zip(scores.iter().zip(DIMENSIONS.iter())) {
        let score: usize = score.trim().parse().map_err(|_| malformed())?;
        if !(1..=5).contains(&score) {
            return Err(malformed());
        }
        *value = table[score - 1];
    }
    Ok(values)
}

/// Geometric standard deviation for a log-normal uncertainty: the base
/// log-variance plus each dimension's log-variance, exponentiated back.
pub fn geometric_sd(dq_entry: &str, base_uncertainty: f64) -> Result<f64, ConfigError> {
    let factors = factors(dq_entry)?;
    let mut sum = 0.0;
    for factor in factors {
        let ln = factor.ln();
        sum += ln * ln;
    }
    let ln_base = base_uncertainty.ln();
    Ok((ln_base * ln_base + sum).sqrt().exp())
}
