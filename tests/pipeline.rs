// End-to-end pipeline scenarios: clustering, consensus, checkpoint resume,
// and the striped-mode equivalence guarantee, all on the CPU engine.

mod common;

use common::{config_in, set_from};
use std::fs;
use vector_dba::dba::perform_dba;
use vector_dba::dtw::DtwFlags;
use vector_dba::persist;
use vector_dba::utilities::enums::{AlgoMode, Engine};

fn cpu(mut cfg: vector_dba::dba::DbaConfig) -> vector_dba::dba::DbaConfig {
    cfg.engine = Engine::Cpu;
    cfg
}

#[test]
fn identical_pair_converges_to_the_input_in_one_round() -> Result<(), Box<dyn std::error::Error>> {
    // Two identical constant sequences: zero distance, one cluster, the
    // centroid equals the input and delta hits zero immediately.
    let dir = tempfile::tempdir()?;
    let cfg = cpu(config_in(dir.path()));
    let ones = vec![1.0; 10];
    let mut set = set_from(&[("a", &ones), ("b", &ones)]);
    perform_dba(&mut set, &cfg)?;

    let (names, dists) = persist::read_pair_dists(&persist::pair_dists_path(&cfg.output_prefix))?;
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(dists.get(0, 1), 0.0);
    assert_eq!(dists.max_distance(), 0.0);

    let averages =
        persist::read_completed_averages(&persist::averages_path(&cfg.output_prefix))?;
    assert_eq!(averages.len(), 1);
    // Two equal-length members: the tie rule picks the second as medoid.
    assert_eq!(averages[0].0, "b");
    assert_eq!(averages[0].1, ones);

    // Converged on the first round, so no evolving-centroid checkpoint
    // survives.
    assert!(!persist::evolving_centroid_path(&cfg.output_prefix, 0).exists());
    Ok(())
}

#[test]
fn warped_pair_produces_the_longer_medoid_as_consensus() -> Result<(), Box<dyn std::error::Error>>
{
    // [1,2,3,4] vs [1,1,2,3,3,4]: the warped distance is exactly zero, the
    // two-member tie rule picks the longer sequence as medoid, and both
    // members align losslessly onto it, converging in one round.
    let dir = tempfile::tempdir()?;
    let cfg = cpu(config_in(dir.path()));
    let short = [1.0, 2.0, 3.0, 4.0];
    let long = [1.0, 1.0, 2.0, 3.0, 3.0, 4.0];
    let mut set = set_from(&[("short", &short), ("long", &long)]);
    perform_dba(&mut set, &cfg)?;

    let (_, dists) = persist::read_pair_dists(&persist::pair_dists_path(&cfg.output_prefix))?;
    assert_eq!(dists.get(0, 1), 0.0);

    let averages =
        persist::read_completed_averages(&persist::averages_path(&cfg.output_prefix))?;
    assert_eq!(averages.len(), 1);
    assert_eq!(averages[0].0, "long");
    assert_eq!(averages[0].1, long.to_vec());

    // Path files exist for both members, terminal to anchor.
    let path0 = fs::read_to_string(persist::dtw_path_path(&cfg.output_prefix, 0))?;
    assert!(path0.lines().next().unwrap().starts_with("short"));
    assert!(path0.trim_end().lines().last().unwrap().ends_with("NIL"));
    Ok(())
}

#[test]
fn fixed_height_cut_finds_two_groups_with_their_medoids(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cfg = cpu(config_in(dir.path()));
    cfg.cdist = 0.3;
    let mut set = set_from(&[
        ("g0a", &[0.0, 0.0, 0.0, 0.0]),
        ("g0b", &[0.0, 0.0, 0.0, 0.01]),
        ("g1a", &[5.0, 5.0, 5.0, 5.0]),
    ]);
    perform_dba(&mut set, &cfg)?;

    let membership_path = persist::membership_path(&cfg.output_prefix);
    let text = fs::read_to_string(&membership_path)?;
    assert!(text.starts_with("## cluster distance threshold was 0.3\n"));
    let (memberships, medoids) =
        persist::read_membership(&membership_path, &set.names)?;
    assert_eq!(memberships[0], memberships[1]);
    assert_ne!(memberships[0], memberships[2]);
    assert_eq!(medoids.len(), 2);
    // Equal-length two-member group: tie rule picks the second; the
    // singleton is its own medoid.
    assert_eq!(set.names[medoids[memberships[0]]], "g0b");
    assert_eq!(set.names[medoids[memberships[2]]], "g1a");

    // The singleton cluster is emitted as-is.
    let averages =
        persist::read_completed_averages(&persist::averages_path(&cfg.output_prefix))?;
    assert_eq!(averages.len(), 2);
    let singleton = averages
        .iter()
        .find(|(name, _)| name == "g1a")
        .expect("singleton average present");
    assert_eq!(singleton.1, vec![5.0, 5.0, 5.0, 5.0]);
    Ok(())
}

#[test]
fn open_end_tail_does_not_contaminate_the_consensus() -> Result<(), Box<dyn std::error::Error>> {
    // One member is longer than the centroid, so the alignment flips and
    // the surplus tail rides open-right, contributing nothing.
    let dir = tempfile::tempdir()?;
    let mut cfg = cpu(config_in(dir.path()));
    cfg.flags = DtwFlags {
        open_start: false,
        open_end: true,
    };
    let base = [1.0, 2.0, 3.0];
    let tailed = [1.0, 2.0, 3.0, 9.0, 9.0];
    let mut set = set_from(&[("m0", &base), ("m1", &base), ("m2", &tailed)]);
    perform_dba(&mut set, &cfg)?;

    let averages =
        persist::read_completed_averages(&persist::averages_path(&cfg.output_prefix))?;
    assert_eq!(averages.len(), 1);
    // Every pair distance is zero under open-end, so the min-SoS tie keeps
    // the first member as medoid and its values as the consensus.
    assert_eq!(averages[0].0, "m0");
    assert_eq!(averages[0].1, base.to_vec());
    Ok(())
}

#[test]
fn forced_striped_mode_reproduces_the_full_mode_averages(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir_full = tempfile::tempdir()?;
    let dir_striped = tempfile::tempdir()?;
    let short = [1.0, 2.0, 3.0, 4.0];
    let long = [1.0, 1.0, 2.0, 3.0, 3.0, 4.0];

    let mut cfg_full = cpu(config_in(dir_full.path()));
    cfg_full.block_width = 2;
    let mut set = set_from(&[("short", &short), ("long", &long)]);
    perform_dba(&mut set, &cfg_full)?;

    let mut cfg_striped = cpu(config_in(dir_striped.path()));
    cfg_striped.block_width = 2;
    cfg_striped.mem_limit = Some(16); // below any full step matrix
    let mut set = set_from(&[("short", &short), ("long", &long)]);
    perform_dba(&mut set, &cfg_striped)?;

    let avg_full = fs::read_to_string(persist::averages_path(&cfg_full.output_prefix))?;
    let avg_striped = fs::read_to_string(persist::averages_path(&cfg_striped.output_prefix))?;
    assert_eq!(avg_full, avg_striped);

    // Path files are bit-identical too: striped mode must reconstruct the
    // same alignments, not just the same means.
    for i in 0..2 {
        let p_full = fs::read_to_string(persist::dtw_path_path(&cfg_full.output_prefix, i))?;
        let p_striped =
            fs::read_to_string(persist::dtw_path_path(&cfg_striped.output_prefix, i))?;
        assert_eq!(p_full, p_striped, "path file {}", i);
    }
    Ok(())
}

#[test]
fn consensus_only_rerun_reproduces_the_averages_byte_for_byte(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let cfg = cpu(config_in(dir.path()));
    let a = [0.0, 1.0, 2.0, 3.0];
    let b = [0.0, 1.0, 1.0, 2.0, 3.0];
    let mut set = set_from(&[("a", &a), ("b", &b)]);
    perform_dba(&mut set, &cfg)?;

    let avg_path = persist::averages_path(&cfg.output_prefix);
    let reference = fs::read_to_string(&avg_path)?;
    fs::remove_file(&avg_path)?;

    let mut cfg2 = cfg.clone();
    cfg2.mode = AlgoMode::ConsensusOnly;
    let mut set = set_from(&[("a", &a), ("b", &b)]);
    perform_dba(&mut set, &cfg2)?;

    assert_eq!(fs::read_to_string(&avg_path)?, reference);
    Ok(())
}

#[test]
fn resuming_from_checkpoints_matches_an_uninterrupted_run(
) -> Result<(), Box<dyn std::error::Error>> {
    // Two natural clusters; the second needs two refinement rounds. The
    // interrupted run has cluster 0 already in the averages file and
    // cluster 1 parked in an evolving-centroid checkpoint.
    let g0a = [0.0, 0.0];
    let g0b = [0.0, 0.1];
    let g1a = [100.0, 110.0];
    let g1b = [100.0, 100.0];
    let seqs: [(&str, &[f64]); 4] = [("g0a", &g0a), ("g0b", &g0b), ("g1a", &g1a), ("g1b", &g1b)];

    let dir_ref = tempfile::tempdir()?;
    let mut cfg_ref = cpu(config_in(dir_ref.path()));
    cfg_ref.cdist = 0.2;
    let mut set = set_from(&seqs);
    perform_dba(&mut set, &cfg_ref)?;
    let reference = fs::read_to_string(persist::averages_path(&cfg_ref.output_prefix))?;
    let ref_lines: Vec<&str> = reference.trim_end().lines().collect();
    assert_eq!(ref_lines.len(), 2);

    // Interrupted run: cluster assignments on disk, cluster 0 complete,
    // cluster 1 checkpointed mid-convergence.
    let dir = tempfile::tempdir()?;
    let mut cfg_cluster = cpu(config_in(dir.path()));
    cfg_cluster.cdist = 0.2;
    cfg_cluster.mode = AlgoMode::ClusterOnly;
    let mut set = set_from(&seqs);
    perform_dba(&mut set, &cfg_cluster)?;

    let avg_path = persist::averages_path(&cfg_cluster.output_prefix);
    fs::write(&avg_path, format!("{}\n", ref_lines[0]))?;
    // The round-1 centroid for the g1 cluster (medoid [100,100], the other
    // member pulls index 1 halfway up).
    persist::write_evolving_centroid(
        &persist::evolving_centroid_path(&cfg_cluster.output_prefix, 1),
        &[100.0, 105.0],
    )?;

    let mut cfg_resume = cfg_cluster.clone();
    cfg_resume.mode = AlgoMode::ConsensusOnly;
    let mut set = set_from(&seqs);
    perform_dba(&mut set, &cfg_resume)?;

    assert_eq!(fs::read_to_string(&avg_path)?, reference);
    assert!(!persist::evolving_centroid_path(&cfg_cluster.output_prefix, 1).exists());
    Ok(())
}

#[test]
fn normalized_singletons_are_rescaled_back_to_signal_range(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cfg = cpu(config_in(dir.path()));
    cfg.cdist = 0.1;
    cfg.norm_sequences = true;
    // Opposite shapes so the pair stays split even after z-normalisation.
    let quiet = [1.0, 1.1, 0.9, 1.0];
    let loud = [500.0, 480.0, 520.0, 500.0];
    let mut set = set_from(&[("quiet", &quiet), ("loud", &loud)]);
    perform_dba(&mut set, &cfg)?;

    let averages =
        persist::read_completed_averages(&persist::averages_path(&cfg.output_prefix))?;
    assert_eq!(averages.len(), 2);
    for (name, values) in &averages {
        let original: &[f64] = if name == "quiet" { &quiet } else { &loud };
        for (v, o) in values.iter().zip(original) {
            assert!(
                (v - o).abs() < 1e-9,
                "{} rescaled value {} vs original {}",
                name,
                v,
                o
            );
        }
    }
    Ok(())
}
