//! Shared helpers for the integration tests.
#![allow(dead_code)]

use vector_dba::dba::DbaConfig;
use vector_dba::utilities::data_loader::SequenceSet;

/// Deterministic synthetic series, smooth with a slight drift.
pub fn gen_series(len: usize, phase: f64) -> Vec<f64> {
    (0..len)
        .map(|i| ((i as f64) * 0.013 + phase).sin() + 0.0001 * (i as f64))
        .collect()
}

/// Build a sequence set from (name, values) pairs.
pub fn set_from(pairs: &[(&str, &[f64])]) -> SequenceSet {
    SequenceSet::from_parts(
        pairs.iter().map(|(n, _)| n.to_string()).collect(),
        pairs.iter().map(|(_, v)| v.to_vec()).collect(),
    )
}

/// A default config writing under `dir/p`.
pub fn config_in(dir: &std::path::Path) -> DbaConfig {
    DbaConfig::new(dir.join("p").display().to_string())
}

/// Tolerant comparison for fp32-kernel results checked against the fp64
/// host engine; a NaN pair counts as agreement.
pub fn within(a: f64, b: f64, tol: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() <= tol
}
