use clap::Parser;
use std::path::PathBuf;
use std::process;
use vector_dba::dba::{perform_dba, DbaConfig};
use vector_dba::dtw::DtwFlags;
use vector_dba::utilities::data_loader::SequenceSet;
use vector_dba::utilities::enums::{AlgoMode, Engine};
use vector_dba::utilities::exit_codes::ExitCode;

/// DTW barycenter averaging over clustered signal time series.
#[derive(Parser, Debug)]
#[command(name = "vector-dba", version, about)]
struct Args {
    /// Tab-delimited sequence container(s): one sequence per line, name
    /// first, values after.
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Prefix for every output and checkpoint file.
    #[arg(short = 'o', long = "output-prefix")]
    output_prefix: String,

    /// Relax the alignment start: it may begin anywhere along the width
    /// axis sequence.
    #[arg(long)]
    open_start: bool,

    /// Relax the alignment end: surplus tail signal rides open-right and is
    /// excluded from averaging.
    #[arg(long)]
    open_end: bool,

    /// Cluster distance threshold: >1 is a target cluster count, 1 forces a
    /// single cluster, [0,1) cuts the dendrogram at that height.
    #[arg(long, default_value_t = 1.0)]
    cdist: f64,

    /// Algorithm mode: 1 = cluster only, 2 = consensus only, 3 = cluster
    /// and consensus.
    #[arg(long = "mode", default_value_t = 3)]
    algo_mode: u8,

    /// Z-normalise sequences; averages are rescaled to the medoid's range.
    #[arg(long = "norm-sequences")]
    norm_sequences: bool,

    /// Compute engine: auto, cpu or cuda.
    #[arg(long, default_value = "auto")]
    engine: String,

    /// Columns per DTW cost swath.
    #[arg(long, default_value_t = vector_dba::dtw::DEFAULT_BLOCK_WIDTH)]
    block_width: usize,

    /// Path-storage memory budget in bytes; small budgets force striped
    /// mode. Defaults to unconstrained on the CPU engine (the CUDA engine
    /// probes free device memory).
    #[arg(long)]
    mem_limit: Option<usize>,

    /// Maximum refinement rounds per cluster.
    #[arg(long, default_value_t = vector_dba::average::ROUND_LIMIT)]
    max_rounds: usize,
}

fn main() {
    let args = Args::parse();

    let mode = match AlgoMode::from_number(args.algo_mode) {
        Some(mode) => mode,
        None => {
            eprintln!("Unrecognized algorithm mode {}", args.algo_mode);
            process::exit(ExitCode::UnknownAlgoMode.code());
        }
    };
    let engine: Engine = match args.engine.parse() {
        Ok(engine) => engine,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(ExitCode::UnknownEngine.code());
        }
    };
    if args.cdist < 0.0 {
        eprintln!(
            "Negative cluster distance threshold {} is reserved and not implemented",
            args.cdist
        );
        process::exit(ExitCode::ReservedCutoff.code());
    }

    let mut set = match SequenceSet::load_tab_delimited(&args.input) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(ExitCode::CannotReadInput.code());
        }
    };

    let cfg = DbaConfig {
        output_prefix: args.output_prefix,
        flags: DtwFlags {
            open_start: args.open_start,
            open_end: args.open_end,
        },
        cdist: args.cdist,
        mode,
        norm_sequences: args.norm_sequences,
        engine,
        block_width: args.block_width,
        mem_limit: args.mem_limit,
        max_rounds: args.max_rounds,
    };

    if let Err(e) = perform_dba(&mut set, &cfg) {
        eprintln!("{}", e);
        process::exit(e.exit_code().code());
    }
}
