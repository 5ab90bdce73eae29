//! Sequence containers for the DBA pipeline.
//!
//! The core engine only ever sees arrays of scalars plus names; domain
//! container readers (nanopore signal files and friends) live outside this
//! crate. What is provided here is the plain tab-delimited format: one
//! sequence per line, a name field followed by its sample values.

use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot read sequence container {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse sequence container {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Sequence '{name}' in {path} has a non-numeric value '{value}'")]
    BadValue {
        path: String,
        name: String,
        value: String,
    },
    #[error("Sequence '{name}' in {path} has no values")]
    EmptySequence { path: String, name: String },
    #[error("No sequences found in the input container(s)")]
    NoSequences,
}

/// An ordered collection of named numeric sequences, plus the per-sequence
/// (mean, stddev) retained when the set is z-normalised so averages can be
/// rescaled into the medoid's original signal range.
#[derive(Debug, Clone, Default)]
pub struct SequenceSet {
    pub names: Vec<String>,
    pub values: Vec<Vec<f64>>,
    pub means: Vec<f64>,
    pub sigmas: Vec<f64>,
}

impl SequenceSet {
    pub fn from_parts(names: Vec<String>, values: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        SequenceSet {
            names,
            values,
            means: Vec::new(),
            sigmas: Vec::new(),
        }
    }

    /// Read one or more tab-delimited containers, concatenating their
    /// sequences in file order.
    pub fn load_tab_delimited<P: AsRef<Path>>(paths: &[P]) -> Result<Self, LoadError> {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for path in paths {
            let display = path.as_ref().display().to_string();
            let file = File::open(path.as_ref()).map_err(|source| LoadError::Io {
                path: display.clone(),
                source,
            })?;
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(b'\t')
                .has_headers(false)
                .flexible(true)
                .from_reader(file);
            for record in reader.records() {
                let record = record.map_err(|source| LoadError::Malformed {
                    path: display.clone(),
                    source,
                })?;
                let mut fields = record.iter();
                let name = match fields.next() {
                    Some(n) if !n.is_empty() => n.to_string(),
                    _ => continue,
                };
                let mut seq = Vec::with_capacity(record.len().saturating_sub(1));
                for field in fields {
                    if field.is_empty() {
                        continue;
                    }
                    let v: f64 = field.parse().map_err(|_| LoadError::BadValue {
                        path: display.clone(),
                        name: name.clone(),
                        value: field.to_string(),
                    })?;
                    seq.push(v);
                }
                if seq.is_empty() {
                    return Err(LoadError::EmptySequence {
                        path: display,
                        name,
                    });
                }
                names.push(name);
                values.push(seq);
            }
        }
        if names.is_empty() {
            return Err(LoadError::NoSequences);
        }
        Ok(SequenceSet::from_parts(names, values))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.values.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.values.iter().map(Vec::len).collect()
    }

    /// Drop upstream overflow sentinels: a sequence whose last element is at
    /// or above the square root of the type maximum is truncated by one.
    pub fn sanitize_overflow_sentinels(&mut self) {
        let limit = f64::MAX.sqrt();
        for seq in &mut self.values {
            if let Some(&last) = seq.last() {
                if last >= limit {
                    seq.pop();
                }
            }
        }
    }

    /// Stable sort by length ascending, reordering names in parallel, so
    /// that downstream per-alignment allocations stay minimal.
    pub fn sort_by_length(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.values[i].len());
        self.names = order.iter().map(|&i| self.names[i].clone()).collect();
        self.values = order
            .iter()
            .map(|&i| std::mem::take(&mut self.values[i]))
            .collect();
    }

    /// In-place per-sequence z-normalisation, retaining (mean, sigma) per
    /// sequence. A flat sequence keeps sigma 1 so its values map to zero
    /// instead of dividing by zero.
    pub fn normalize(&mut self) {
        self.means = Vec::with_capacity(self.len());
        self.sigmas = Vec::with_capacity(self.len());
        for seq in &mut self.values {
            let n = seq.len() as f64;
            let mean = seq.iter().sum::<f64>() / n;
            let var = seq.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let mut sigma = var.sqrt();
            if sigma == 0.0 {
                sigma = 1.0;
            }
            for v in seq.iter_mut() {
                *v = (*v - mean) / sigma;
            }
            self.means.push(mean);
            self.sigmas.push(sigma);
        }
    }

    pub fn is_normalized(&self) -> bool {
        !self.means.is_empty()
    }
}
