//! On-disk formats and checkpoints.
//!
//! Every artifact is line-oriented tab- or space-delimited text so runs can
//! be inspected, diffed and resumed. Values are written with Rust's default
//! float formatting, which round-trips exactly.

use crate::dtw::PathCell;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Cannot write pairwise distance matrix {path}: {source}")]
    WriteDistances {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot read pairwise distance matrix {path}: {reason}")]
    ReadDistances { path: String, reason: String },
    #[error("Cannot write cluster membership file {path}: {source}")]
    WriteMembership {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot read cluster membership file {path}: {reason}")]
    ReadMembership { path: String, reason: String },
    #[error("Cannot write sequence averages file {path}: {source}")]
    WriteAverages {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot read sequence averages file {path}: {reason}")]
    ReadAverages { path: String, reason: String },
    #[error("Cannot write evolving centroid checkpoint {path}: {source}")]
    WriteCentroid {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot write DTW path file {path}: {source}")]
    WritePath {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub fn pair_dists_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{}.pair_dists.txt", prefix))
}

pub fn membership_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{}.cluster_membership.txt", prefix))
}

pub fn averages_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{}.avg.txt", prefix))
}

pub fn evolving_centroid_path(prefix: &str, cluster: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}.evolving_centroid.txt", prefix, cluster))
}

pub fn dtw_path_path(prefix: &str, seq_index: usize) -> PathBuf {
    PathBuf::from(format!("{}.path{}.txt", prefix, seq_index))
}

/// Write the upper-triangular matrix: per row the sequence name, one empty
/// cell per preceding row, the zero self-distance, then D(i,j) for j > i.
pub fn write_pair_dists(
    path: &Path,
    names: &[String],
    dists: &crate::pairwise::PairwiseDistances,
) -> Result<(), PersistError> {
    let wrap = |source| PersistError::WriteDistances {
        path: path.display().to_string(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(wrap)?);
    let n = names.len();
    for (i, name) in names.iter().enumerate() {
        let mut line = String::new();
        line.push_str(name);
        for _ in 0..i {
            line.push('\t');
        }
        line.push_str("\t0");
        for j in i + 1..n {
            let _ = write!(line, "\t{}", dists.get(i, j));
        }
        line.push('\n');
        out.write_all(line.as_bytes()).map_err(wrap)?;
    }
    out.flush().map_err(wrap)
}

/// Reconstruct names and the packed matrix from a pair_dists file.
pub fn read_pair_dists(
    path: &Path,
) -> Result<(Vec<String>, crate::pairwise::PairwiseDistances), PersistError> {
    let display = path.display().to_string();
    let fail = |reason: String| PersistError::ReadDistances {
        path: display.clone(),
        reason,
    };
    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let mut names = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| fail(e.to_string()))?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields
            .next()
            .ok_or_else(|| fail("missing name field".into()))?;
        names.push(name.to_string());
        let numeric: Vec<&str> = fields.filter(|f| !f.is_empty()).collect();
        let mut row = Vec::new();
        for (k, field) in numeric.iter().enumerate() {
            let v: f64 = field
                .parse()
                .map_err(|_| fail(format!("bad distance value '{}'", field)))?;
            if k == 0 {
                continue; // self-distance
            }
            row.push(v);
        }
        rows.push(row);
    }
    let n = names.len();
    let mut packed = Vec::with_capacity(n.saturating_sub(1) * n / 2);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != n - i - 1 {
            return Err(fail(format!(
                "row {} has {} distances, expected {}",
                i,
                row.len(),
                n - i - 1
            )));
        }
        packed.extend(row);
    }
    Ok((
        names,
        crate::pairwise::PairwiseDistances::from_packed(n, packed),
    ))
}

/// Membership file: threshold header, then name / cluster id / medoid name.
pub fn write_membership(
    path: &Path,
    cdist: f64,
    names: &[String],
    memberships: &[usize],
    medoids: &[usize],
) -> Result<(), PersistError> {
    let wrap = |source| PersistError::WriteMembership {
        path: path.display().to_string(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(wrap)?);
    writeln!(out, "## cluster distance threshold was {}", cdist).map_err(wrap)?;
    for (i, name) in names.iter().enumerate() {
        let medoid_name = &names[medoids[memberships[i]]];
        writeln!(out, "{}\t{}\t{}", name, memberships[i], medoid_name).map_err(wrap)?;
    }
    out.flush().map_err(wrap)
}

/// Read memberships and per-cluster medoid indices back, resolving names
/// against the current (sorted) sequence set.
pub fn read_membership(
    path: &Path,
    names: &[String],
) -> Result<(Vec<usize>, Vec<usize>), PersistError> {
    let display = path.display().to_string();
    let fail = |reason: String| PersistError::ReadMembership {
        path: display.clone(),
        reason,
    };
    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let index_of = |name: &str| names.iter().position(|n| n == name);

    let mut memberships = vec![usize::MAX; names.len()];
    let mut medoid_names: Vec<(usize, String)> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| fail(e.to_string()))?;
        if line.is_empty() || line.starts_with("##") {
            continue;
        }
        let mut fields = line.split('\t');
        let (name, cluster, medoid) = match (fields.next(), fields.next(), fields.next()) {
            (Some(n), Some(c), Some(m)) => (n, c, m),
            _ => return Err(fail(format!("malformed line '{}'", line))),
        };
        let cluster: usize = cluster
            .parse()
            .map_err(|_| fail(format!("bad cluster id '{}'", cluster)))?;
        let seq = index_of(name).ok_or_else(|| fail(format!("unknown sequence '{}'", name)))?;
        memberships[seq] = cluster;
        medoid_names.push((cluster, medoid.to_string()));
    }
    if let Some(missing) = memberships.iter().position(|&m| m == usize::MAX) {
        return Err(fail(format!(
            "sequence '{}' has no cluster assignment",
            names[missing]
        )));
    }
    let num_clusters = memberships.iter().max().map(|&m| m + 1).unwrap_or(0);
    let mut medoids = vec![usize::MAX; num_clusters];
    for (cluster, medoid_name) in medoid_names {
        if cluster >= num_clusters {
            return Err(fail(format!("cluster id {} out of range", cluster)));
        }
        medoids[cluster] = index_of(&medoid_name)
            .ok_or_else(|| fail(format!("unknown medoid '{}'", medoid_name)))?;
    }
    if let Some(empty) = medoids.iter().position(|&m| m == usize::MAX) {
        return Err(fail(format!("cluster {} has no medoid", empty)));
    }
    Ok((memberships, medoids))
}

/// Open the averages file for appending (checkpointable at cluster
/// granularity).
pub fn open_averages_for_append(path: &Path) -> Result<BufWriter<File>, PersistError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| PersistError::WriteAverages {
            path: path.display().to_string(),
            source,
        })?;
    Ok(BufWriter::new(file))
}

/// Append one converged cluster average and flush so a kill cannot lose it.
pub fn append_average(
    out: &mut BufWriter<File>,
    path: &Path,
    medoid_name: &str,
    values: &[f64],
) -> Result<(), PersistError> {
    let wrap = |source| PersistError::WriteAverages {
        path: path.display().to_string(),
        source,
    };
    let mut line = String::with_capacity(values.len() * 8 + medoid_name.len());
    line.push_str(medoid_name);
    for v in values {
        let _ = write!(line, "\t{}", v);
    }
    line.push('\n');
    out.write_all(line.as_bytes()).map_err(wrap)?;
    out.flush().map_err(wrap)
}

/// Completed cluster averages, in cluster-id order; an absent file means a
/// fresh run.
pub fn read_completed_averages(path: &Path) -> Result<Vec<(String, Vec<f64>)>, PersistError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let display = path.display().to_string();
    let fail = |reason: String| PersistError::ReadAverages {
        path: display.clone(),
        reason,
    };
    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| fail(e.to_string()))?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields
            .next()
            .ok_or_else(|| fail("missing medoid name".into()))?
            .to_string();
        let mut values = Vec::new();
        for field in fields {
            values.push(
                field
                    .parse()
                    .map_err(|_| fail(format!("bad average value '{}'", field)))?,
            );
        }
        out.push((name, values));
    }
    Ok(out)
}

/// Evolving centroid checkpoint: a single space-separated line.
pub fn write_evolving_centroid(path: &Path, values: &[f64]) -> Result<(), PersistError> {
    let wrap = |source| PersistError::WriteCentroid {
        path: path.display().to_string(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(wrap)?);
    let mut line = String::with_capacity(values.len() * 8);
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{}", v);
    }
    line.push('\n');
    out.write_all(line.as_bytes()).map_err(wrap)?;
    out.flush().map_err(wrap)
}

/// Read a centroid checkpoint if one exists. A corrupt or wrong-length
/// checkpoint is warned about and discarded: the cluster restarts from its
/// medoid instead of failing the run.
pub fn read_evolving_centroid(path: &Path, expected_len: usize) -> Option<Vec<f64>> {
    let file = File::open(path).ok()?;
    let mut line = String::new();
    if BufReader::new(file).read_line(&mut line).is_err() {
        eprintln!(
            "Warning: unreadable centroid checkpoint {}, restarting cluster from its medoid",
            path.display()
        );
        return None;
    }
    let mut values = Vec::with_capacity(expected_len);
    for field in line.split_whitespace() {
        match field.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) => {
                eprintln!(
                    "Warning: corrupt centroid checkpoint {}, restarting cluster from its medoid",
                    path.display()
                );
                return None;
            }
        }
    }
    if values.len() != expected_len {
        eprintln!(
            "Warning: centroid checkpoint {} has {} values, expected {}; restarting cluster from its medoid",
            path.display(),
            values.len(),
            expected_len
        );
        return None;
    }
    Some(values)
}

pub fn delete_evolving_centroid(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// DTW path file: the sequence name, then one line per alignment cell from
/// terminal to anchor.
pub fn write_dtw_path(
    path: &Path,
    seq_name: &str,
    cells: &[PathCell],
    member: &[f64],
    centroid: &[f64],
    flip: bool,
) -> Result<(), PersistError> {
    let wrap = |source| PersistError::WritePath {
        path: path.display().to_string(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(wrap)?);
    writeln!(out, "{}", seq_name).map_err(wrap)?;
    for cell in cells {
        let (centroid_idx, member_idx) = if flip {
            (cell.row, cell.col)
        } else {
            (cell.col, cell.row)
        };
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            member_idx,
            member[member_idx],
            centroid_idx,
            centroid[centroid_idx],
            cell.step.token()
        )
        .map_err(wrap)?;
    }
    out.flush().map_err(wrap)
}
