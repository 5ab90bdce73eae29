//! Medoid and cluster selection over the pairwise distance matrix.
//!
//! The packed matrix is normalised into [0,1] and handed to the external
//! hierarchical clusterer (complete linkage); the resulting merge tree is
//! cut by one of three policies keyed on `cdist`, then a medoid is picked
//! per cluster.

use crate::pairwise::PairwiseDistances;
use kodama::{linkage, Method};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cluster selection needs at least one sequence")]
    EmptyInput,
    #[error("Negative cluster distance threshold {cdist} is reserved and not implemented")]
    ReservedCutoff { cdist: f64 },
    #[error("Medoid finding failed for cluster {cluster}: no members")]
    MedoidNotFound { cluster: usize },
}

/// Cluster ids per sequence plus the medoid sequence index per cluster.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub memberships: Vec<usize>,
    pub medoids: Vec<usize>,
}

impl ClusterAssignment {
    pub fn num_clusters(&self) -> usize {
        self.medoids.len()
    }

    pub fn members_of(&self, cluster: usize) -> Vec<usize> {
        self.memberships
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == cluster)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Cut policies, selected by `cdist`:
/// `> 1` k-means-like target count with singleton compensation, `= 1` one
/// cluster, `[0, 1)` dendrogram fixed-height cut, `< 0` reserved.
pub fn cluster_and_medoids(
    dists: &PairwiseDistances,
    lengths: &[usize],
    cdist: f64,
) -> Result<ClusterAssignment, ClusterError> {
    let n = dists.len();
    if n == 0 {
        return Err(ClusterError::EmptyInput);
    }
    if cdist < 0.0 {
        return Err(ClusterError::ReservedCutoff { cdist });
    }

    let memberships = if n == 1 {
        vec![0]
    } else if cdist == 1.0 {
        // Everything in one cluster; avoids degenerate cuts of two-leaf and
        // other branch-length-1 topologies.
        vec![0; n]
    } else {
        // Normalise into [0,1]; a zero max (all-identical inputs) is
        // remapped to 1 so the division is a no-op instead of a 0/0.
        let mut max = dists.max_distance();
        if max == 0.0 {
            max = 1.0;
        }
        let mut condensed: Vec<f64> = dists.packed().iter().map(|d| d / max).collect();
        let dendrogram = linkage(&mut condensed, n, Method::Complete);
        let steps = dendrogram.steps();

        if cdist > 1.0 {
            eprintln!("Using K-means clustering (excluding singletons)");
            let target = cdist as usize;
            let mut new_k = target.min(n);
            let memberships = loop {
                let cut = cut_k(steps, n, new_k);
                let mut counts = vec![0usize; n];
                for &c in &cut {
                    counts[c] += 1;
                }
                let multi = counts.iter().filter(|&&c| c > 1).count();
                if multi >= target || new_k >= n {
                    break cut;
                }
                // Inflate K to compensate for singletons eating cluster slots.
                new_k = (new_k + target - multi).min(n);
            };
            eprintln!("Final K to compensate for singletons: {}", new_k);
            memberships
        } else {
            eprintln!("Using dendrogram fixed height clustering cutoff");
            cut_height(steps, n, cdist)
        }
    };

    let num_clusters = memberships.iter().max().map(|&m| m + 1).unwrap_or(1);
    eprintln!("There are {} clusters", num_clusters);

    let mut medoids = Vec::with_capacity(num_clusters);
    for cluster in 0..num_clusters {
        let members: Vec<usize> = memberships
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == cluster)
            .map(|(i, _)| i)
            .collect();
        let medoid = match members.len() {
            0 => return Err(ClusterError::MedoidNotFound { cluster }),
            1 => members[0],
            2 => {
                // Pick the longer of the two contributors.
                if lengths[members[0]] > lengths[members[1]] {
                    members[0]
                } else {
                    members[1]
                }
            }
            _ => {
                // Smallest in-cluster sum of squared distances.
                let mut best = members[0];
                let mut lowest = f64::MAX;
                for &a in &members {
                    let mut sos = 0.0;
                    for &b in &members {
                        if a != b {
                            let d = dists.get(a, b);
                            sos += d * d;
                        }
                    }
                    if sos < lowest {
                        lowest = sos;
                        best = a;
                    }
                }
                best
            }
        };
        medoids.push(medoid);
    }

    Ok(ClusterAssignment {
        memberships,
        medoids,
    })
}

/// Flat cut of the merge tree into `k` clusters: replay the first `n - k`
/// merges and label the resulting components by first appearance.
fn cut_k(steps: &[kodama::Step<f64>], n: usize, k: usize) -> Vec<usize> {
    let merges = n.saturating_sub(k.max(1)).min(steps.len());
    components(steps, n, merges)
}

/// Cut at a fixed dendrogram height: replay every merge whose linkage
/// dissimilarity is at or below the threshold. Complete linkage heights
/// are monotone, so these merges form a prefix.
fn cut_height(steps: &[kodama::Step<f64>], n: usize, height: f64) -> Vec<usize> {
    let merges = steps
        .iter()
        .take_while(|s| s.dissimilarity <= height)
        .count();
    components(steps, n, merges)
}

fn components(steps: &[kodama::Step<f64>], n: usize, merges: usize) -> Vec<usize> {
    // Leaves are 0..n; the cluster formed by step i is n + i.
    let mut parent: Vec<usize> = (0..n + merges).collect();
    fn find(parent: &mut Vec<usize>, mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for (i, step) in steps.iter().take(merges).enumerate() {
        let a = find(&mut parent, step.cluster1);
        let b = find(&mut parent, step.cluster2);
        parent[a] = n + i;
        parent[b] = n + i;
    }
    let mut labels = vec![usize::MAX; n + merges];
    let mut next = 0usize;
    let mut out = Vec::with_capacity(n);
    for leaf in 0..n {
        let root = find(&mut parent, leaf);
        if labels[root] == usize::MAX {
            labels[root] = next;
            next += 1;
        }
        out.push(labels[root]);
    }
    out
}
