//! Top-level orchestration: sanitise, sort, normalise, all-pairs, cluster,
//! then converge a centroid per cluster with checkpoint resume.

use crate::average::{bits_equal, dba_update, AverageError, AverageParams};
use crate::cluster::{cluster_and_medoids, ClusterAssignment, ClusterError};
use crate::dtw::DtwFlags;
use crate::pairwise::{all_pairs, PairwiseDistances, PairwiseError};
use crate::persist::{self, PersistError};
use crate::utilities::data_loader::SequenceSet;
use crate::utilities::enums::{AlgoMode, Engine};
use crate::utilities::exit_codes::ExitCode;
use crate::utilities::helpers::{resolve_engine, ProgressMeter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbaError {
    #[error(transparent)]
    Pairwise(#[from] PairwiseError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Average(#[from] AverageError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl DbaError {
    /// Map to the stable process exit enumeration.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            DbaError::Pairwise(_) => ExitCode::CannotAllocatePairwiseDistArray,
            DbaError::Cluster(ClusterError::ReservedCutoff { .. }) => ExitCode::ReservedCutoff,
            DbaError::Cluster(_) => ExitCode::MedoidFindingError,
            DbaError::Average(_) => ExitCode::DbaUpdateFailed,
            DbaError::Persist(e) => match e {
                PersistError::WriteDistances { .. } => ExitCode::CannotWriteDistanceMatrix,
                PersistError::ReadDistances { .. } => ExitCode::CannotReadAverages,
                PersistError::WriteMembership { .. } => ExitCode::CannotWriteMembership,
                PersistError::ReadMembership { .. } => ExitCode::CannotReadMembership,
                PersistError::WriteAverages { .. } | PersistError::WriteCentroid { .. } => {
                    ExitCode::CannotWriteAverages
                }
                PersistError::ReadAverages { .. } => ExitCode::CannotReadAverages,
                PersistError::WritePath { .. } => ExitCode::CannotWritePath,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct DbaConfig {
    pub output_prefix: String,
    pub flags: DtwFlags,
    pub cdist: f64,
    pub mode: AlgoMode,
    pub norm_sequences: bool,
    pub engine: Engine,
    pub block_width: usize,
    pub mem_limit: Option<usize>,
    pub max_rounds: usize,
}

impl DbaConfig {
    pub fn new(output_prefix: impl Into<String>) -> Self {
        DbaConfig {
            output_prefix: output_prefix.into(),
            flags: DtwFlags::default(),
            cdist: 1.0,
            mode: AlgoMode::ClusterAndConsensus,
            norm_sequences: false,
            engine: Engine::Auto,
            block_width: crate::dtw::DEFAULT_BLOCK_WIDTH,
            mem_limit: None,
            max_rounds: crate::average::ROUND_LIMIT,
        }
    }
}

/// Run the full DBA pipeline over a sequence set, writing every artifact
/// under the configured output prefix. Sequences are sanitised, sorted by
/// length and (optionally) z-normalised in place.
pub fn perform_dba(set: &mut SequenceSet, cfg: &DbaConfig) -> Result<(), DbaError> {
    set.sanitize_overflow_sentinels();
    set.sort_by_length();
    if cfg.norm_sequences {
        set.normalize();
    }
    let n = set.len();
    let lengths = set.lengths();
    let engine = resolve_engine(cfg.engine);
    let prefix = cfg.output_prefix.as_str();

    let (memberships, medoids) = if cfg.mode.clusters() {
        let assignment = if n == 1 {
            ClusterAssignment {
                memberships: vec![0],
                medoids: vec![0],
            }
        } else {
            let title = format!(
                "Step 2 of 3: Finding initial {}",
                if cfg.cdist != 1.0 {
                    "clusters and medoids"
                } else {
                    "medoid"
                }
            );
            let meter = ProgressMeter::start(&title, n - 1);
            let dists = pairwise_distances(set, cfg, engine, &meter)?;
            meter.finish();
            persist::write_pair_dists(&persist::pair_dists_path(prefix), &set.names, &dists)?;
            cluster_and_medoids(&dists, &lengths, cfg.cdist)?
        };
        persist::write_membership(
            &persist::membership_path(prefix),
            cfg.cdist,
            &set.names,
            &assignment.memberships,
            &assignment.medoids,
        )?;
        eprintln!(
            "Found {} clusters using complete linkage and cluster distance cutoff {}",
            assignment.num_clusters(),
            cfg.cdist
        );
        (assignment.memberships, assignment.medoids)
    } else {
        eprintln!("Reading previous clustering data");
        persist::read_membership(&persist::membership_path(prefix), &set.names)?
    };

    if cfg.mode == AlgoMode::ClusterOnly {
        return Ok(());
    }

    let num_clusters = medoids.len();
    let avg_path = persist::averages_path(prefix);
    let completed = persist::read_completed_averages(&avg_path)?;
    let start_cluster = completed.len().min(num_clusters);
    if start_cluster > 0 {
        eprintln!(
            "Restarting convergence with cluster {}/{} based on checkpoint in {}",
            start_cluster + 1,
            num_clusters,
            avg_path.display()
        );
    }
    let mut avg_out = persist::open_averages_for_append(&avg_path)?;

    for cluster in start_cluster..num_clusters {
        let members: Vec<usize> = memberships
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == cluster)
            .map(|(i, _)| i)
            .collect();
        let medoid = medoids[cluster];
        let medoid_name = set.names[medoid].clone();
        let medoid_len = set.values[medoid].len();

        if members.len() == 1 {
            // Nothing to average; the sequence is its own consensus.
            eprintln!(
                "Outputting singleton sequence {} as-is (a.k.a. cluster {}/{}).",
                medoid_name,
                cluster + 1,
                num_clusters
            );
            let values = rescale_to_medoid(set, medoid, set.values[medoid].clone(), cfg);
            persist::append_average(&mut avg_out, &avg_path, &medoid_name, &values)?;
            continue;
        }

        let checkpoint = persist::evolving_centroid_path(prefix, cluster);
        let seed = persist::read_evolving_centroid(&checkpoint, medoid_len)
            .unwrap_or_else(|| set.values[medoid].clone());
        eprintln!(
            "Processing cluster {} of {}, {} members, medoid {} has length {}",
            cluster + 1,
            num_clusters,
            members.len(),
            medoid_name,
            medoid_len
        );
        let centroid = converge_cluster(set, &members, seed, cluster, num_clusters, engine, cfg)?;
        let centroid = rescale_to_medoid(set, medoid, centroid, cfg);
        persist::append_average(&mut avg_out, &avg_path, &medoid_name, &centroid)?;
        persist::delete_evolving_centroid(&checkpoint);
    }
    Ok(())
}

fn pairwise_distances(
    set: &SequenceSet,
    cfg: &DbaConfig,
    engine: Engine,
    meter: &ProgressMeter,
) -> Result<PairwiseDistances, DbaError> {
    match engine {
        Engine::Cuda => {
            #[cfg(feature = "cuda")]
            {
                crate::cuda::all_pairs_cuda(&set.values, cfg.flags, cfg.block_width, Some(meter))
                    .map_err(|e| PairwiseError::Cuda(e.to_string()).into())
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(PairwiseError::CudaUnavailable.into())
            }
        }
        _ => Ok(all_pairs(
            &set.values,
            cfg.flags,
            cfg.block_width,
            Some(meter),
        )?),
    }
}

/// Iterate DBA updates for one cluster until delta reaches zero, the
/// flip-flop guard trips, or the round cap is hit. The evolving centroid is
/// checkpointed every non-converged round; path files are rewritten per
/// round against the centroid they were aligned to.
fn converge_cluster(
    set: &SequenceSet,
    member_indices: &[usize],
    seed: Vec<f64>,
    cluster: usize,
    num_clusters: usize,
    engine: Engine,
    cfg: &DbaConfig,
) -> Result<Vec<f64>, DbaError> {
    let prefix = cfg.output_prefix.as_str();
    let params = AverageParams {
        flags: cfg.flags,
        block_width: cfg.block_width,
        mem_limit: cfg.mem_limit,
        max_rounds: cfg.max_rounds,
    };
    let member_refs: Vec<&[f64]> = member_indices
        .iter()
        .map(|&i| set.values[i].as_slice())
        .collect();
    let open_mode = cfg.flags.open_start || cfg.flags.open_end;

    let mut centroid = seed;
    let mut previous: Option<Vec<f64>> = None;
    let mut two_back: Option<Vec<f64>> = None;

    for round in 0..cfg.max_rounds {
        let title = format!(
            "Step 3 of 3 (round {} of max {} to achieve delta 0) for cluster {}/{}: Converging centroid",
            round + 1,
            cfg.max_rounds,
            cluster + 1,
            num_clusters
        );
        let meter = ProgressMeter::start(&title, member_refs.len());
        let (new_centroid, delta, alignments) = match engine {
            Engine::Cuda => {
                #[cfg(feature = "cuda")]
                {
                    crate::cuda::dba_update_cuda(&centroid, &member_refs, &params, Some(&meter))
                        .map_err(|e| {
                            DbaError::Pairwise(PairwiseError::Cuda(e.to_string()))
                        })?
                }
                #[cfg(not(feature = "cuda"))]
                {
                    return Err(PairwiseError::CudaUnavailable.into());
                }
            }
            _ => dba_update(&centroid, &member_refs, &params, Some(&meter))?,
        };
        meter.finish();
        eprintln!("New delta is {}", delta);

        for alignment in &alignments {
            let seq_index = member_indices[alignment.member];
            persist::write_dtw_path(
                &persist::dtw_path_path(prefix, seq_index),
                &set.names[seq_index],
                &alignment.cells,
                member_refs[alignment.member],
                &centroid,
                alignment.flip,
            )?;
        }

        if delta == 0.0 {
            return Ok(new_centroid);
        }
        if open_mode {
            // Open-end refinement can oscillate between two alternates in
            // perpetuity; byte-equality against the round-2-prior centroid
            // short-circuits that, keeping the first alternate.
            if let Some(tb) = &two_back {
                if bits_equal(&new_centroid, tb) {
                    eprintln!(
                        "Detected a flip-flop between two alternative converged centroids \
                         (should happen only in open end mode), keeping the first one calculated"
                    );
                    return Ok(new_centroid);
                }
            }
            two_back = previous.take();
            previous = Some(new_centroid.clone());
        }
        persist::write_evolving_centroid(
            &persist::evolving_centroid_path(prefix, cluster),
            &new_centroid,
        )?;
        centroid = new_centroid;
    }
    Ok(centroid)
}

/// Restore a converged centroid (or singleton) into the medoid's original
/// signal range when the run z-normalised its inputs.
fn rescale_to_medoid(set: &SequenceSet, medoid: usize, values: Vec<f64>, cfg: &DbaConfig) -> Vec<f64> {
    if !cfg.norm_sequences || !set.is_normalized() {
        return values;
    }
    let mean = set.means[medoid];
    let sigma = set.sigmas[medoid];
    values.into_iter().map(|v| mean + v * sigma).collect()
}
