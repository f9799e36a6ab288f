use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use splat_vq::config::Config;
use splat_vq::startup::{init_logging, resolve_config_path, run_compress, run_uncompress, Overrides};

#[derive(Parser, Debug)]
#[command(
    name = "splat-vq",
    about = "Codebook compression for radiance-field point models"
)]
struct Args {
    /// Decompress an artifact instead of compressing a model
    #[arg(short = 'u', long)]
    uncompress: bool,

    /// Use AGORAS instead of mini-batch k-means
    #[arg(short = 'a', long)]
    agoras: bool,

    /// Codebook size for the colour group
    #[arg(long)]
    color_clusters: Option<usize>,

    /// Codebook size for the scale and rotation groups
    #[arg(long)]
    geom_clusters: Option<usize>,

    /// k-means iterations for the colour group
    #[arg(long)]
    color_iters: Option<usize>,

    /// k-means iterations for the scale and rotation groups
    #[arg(long)]
    geom_iters: Option<usize>,

    /// AGORAS sample sets for the scale and rotation groups
    #[arg(short = 'm', long)]
    sample_sets: Option<usize>,

    /// Input path (point model, or artifact with --uncompress)
    #[arg(short, long)]
    input: PathBuf,

    /// Output path
    #[arg(short, long)]
    output: PathBuf,

    /// Config file (default: $SPLATVQ_CONFIG, then ./splatvq.toml)
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    // Load .env
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(resolve_config_path);
    let mut config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("splat-vq: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let overrides = Overrides {
        agoras: args.agoras,
        color_clusters: args.color_clusters,
        geometry_clusters: args.geom_clusters,
        color_iterations: args.color_iters,
        geometry_iterations: args.geom_iters,
        sample_sets: args.sample_sets,
    };
    if let Err(e) = overrides.apply(&mut config) {
        eprintln!("splat-vq: {e}");
        return ExitCode::from(e.exit_code() as u8);
    }

    init_logging(&config);

    let result = if args.uncompress {
        run_uncompress(&args.input, &args.output).map(|_| ())
    } else {
        run_compress(&config, &args.input, &args.output).map(|_| ())
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "splat-vq failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
