use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use ndarray::Array2;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use triangle_kmeans::{
    generate_clustered_points, generate_points, Algorithm, Chebyshev, ClusterEngine, DataLoader,
    Dataset, DistanceMetric, Euclidean, KMeansConfig, KMeansError, KMeansRun, Manhattan,
    Parallelism, Result as KMeansResult, SeedStrategy,
};

#[derive(Parser, Debug)]
#[command(name = "triangle-kmeans")]
#[command(
    about = "Parallel k-means with Elkan/Hamerly triangle-inequality pruning",
    long_about = None
)]
struct Args {
    /// Number of clusters
    #[arg(short, long, default_value_t = 4)]
    k: usize,

    /// Number of points to generate when not using --input
    #[arg(short = 'n', long, default_value_t = 100_000)]
    points: usize,

    /// Dimensionality of points when generating
    #[arg(short, long, default_value_t = 2)]
    dim: usize,

    /// Generate k Gaussian blobs with this standard deviation instead of uniform noise
    #[arg(long)]
    spread: Option<f64>,

    /// Maximum number of iterations
    #[arg(short, long, default_value_t = 300)]
    iterations: usize,

    /// RNG seed for seeding and synthetic data
    #[arg(long, default_value_t = 42u64)]
    seed: u64,

    /// Input dataset (CSV with a header row)
    #[arg(long)]
    input: Option<PathBuf>,

    /// CSV column holding per-point weights
    #[arg(long, requires = "input")]
    weight_column: Option<String>,

    /// Output file for centers and stats (JSON)
    #[arg(short, long, default_value = "kmeans_result.json")]
    output: PathBuf,

    /// Optional file containing per-sample cluster assignments (CSV)
    #[arg(long)]
    assignments: Option<PathBuf>,

    /// Seeding strategy
    #[arg(long, value_parser = parse_seed_strategy, default_value = "kmeans++")]
    init: SeedStrategy,

    /// Assignment strategy (lloyd, hamerly, elkan)
    #[arg(long, value_parser = parse_algorithm, default_value = "hamerly")]
    algorithm: Algorithm,

    /// Distance metric
    #[arg(long, value_enum, default_value_t = MetricKind::Euclidean)]
    metric: MetricKind,

    /// Run on a dedicated pool with this many worker threads
    #[arg(long, conflicts_with = "serial")]
    threads: Option<usize>,

    /// Run every phase on the calling thread
    #[arg(long, default_value_t = false)]
    serial: bool,

    /// Save trained model JSON
    #[arg(long)]
    save_model: Option<PathBuf>,

    /// Verbosity: set RUST_LOG style level (info, debug, warn)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricKind {
    Euclidean,
    /// Euclidean with cached squared norms
    EuclideanCached,
    Manhattan,
    Chebyshev,
}

impl MetricKind {
    fn build(self) -> Box<dyn DistanceMetric> {
        match self {
            Self::Euclidean => Box::new(Euclidean::default()),
            Self::EuclideanCached => Box::new(Euclidean::with_norm_cache()),
            Self::Manhattan => Box::new(Manhattan),
            Self::Chebyshev => Box::new(Chebyshev),
        }
    }
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(&args.log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    if let Err(err) = run(args) {
        error!(error = %err, "kmeans run failed");
        process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(match level {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn run(args: Args) -> KMeansResult<()> {
    let parallelism = match (args.serial, args.threads) {
        (true, _) => Parallelism::Serial,
        (false, Some(threads)) => Parallelism::Threads(threads),
        (false, None) => Parallelism::Global,
    };

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let data = load_data(&args, &mut rng)?;

    let config = KMeansConfig {
        k: args.k,
        max_iter: args.iterations,
        init: args.init,
        algorithm: args.algorithm,
        parallelism,
        seed: args.seed,
    };
    let engine = ClusterEngine::new(config, args.metric.build());

    let start = Instant::now();
    let run = engine.fit(&data)?;
    let elapsed = start.elapsed();
    if !run.outcome.converged() {
        warn!(
            iterations = run.outcome.iterations,
            "iteration cap reached before the assignment stabilised"
        );
    }
    info!(
        took_seconds = elapsed.as_secs_f64(),
        cluster_sizes = ?run.outcome.cluster_sizes,
        "cluster population counts"
    );

    write_result(&args, &data, &run, engine.metric().name(), elapsed.as_secs_f64())?;

    if let Some(path) = args.save_model.as_ref() {
        run.model.save_model(path)?;
        info!(path = ?path, "saved model snapshot");
    }

    if let Some(path) = args.assignments.as_ref() {
        write_assignments(path, &run)?;
    }

    Ok(())
}

fn load_data(args: &Args, rng: &mut ChaCha8Rng) -> KMeansResult<Dataset> {
    if let Some(path) = args.input.as_deref() {
        info!(path = ?path, weight_column = ?args.weight_column, "loading input data");
        return DataLoader::load_csv(path, args.weight_column.as_deref());
    }

    match args.spread {
        Some(spread) => {
            let noise = Normal::new(0.0, spread).map_err(|err| {
                KMeansError::InvalidConfig(format!("invalid --spread {spread}: {err}"))
            })?;
            let per_cluster = (args.points / args.k.max(1)).max(1);
            let extent = 10.0 * args.k.max(1) as f64;
            let truth = Array2::random_using((args.k, args.dim), Uniform::new(0.0, extent), rng);
            info!(
                points = per_cluster * args.k,
                dim = args.dim,
                spread,
                "generating synthetic gaussian blobs"
            );
            Ok(Dataset::new(generate_clustered_points(per_cluster, &truth, &noise, rng)))
        }
        None => {
            info!(points = args.points, dim = args.dim, "generating synthetic uniform data");
            Ok(Dataset::new(generate_points(args.points, args.dim, rng)))
        }
    }
}

fn write_result(
    args: &Args,
    data: &Dataset,
    run: &KMeansRun,
    metric: &str,
    elapsed_secs: f64,
) -> KMeansResult<()> {
    let centers: Vec<Vec<f64>> = run
        .model
        .centers
        .outer_iter()
        .map(|row| row.to_vec())
        .collect();
    let outcome = &run.outcome;

    let dump = json!({
        "k": run.model.k(),
        "dim": data.dim(),
        "rows": data.len(),
        "total_weight": data.total_weight(),
        "iterations": outcome.iterations,
        "termination": outcome.termination,
        "inertia": outcome.inertia,
        "cluster_sizes": outcome.cluster_sizes,
        "cluster_weights": outcome.cluster_weights,
        "mean_distances": outcome.mean_distances,
        "pruning": {
            "distance_computations": outcome.stats.distance_computations,
            "exhaustive_computations": outcome.stats.exhaustive_computations,
            "points_pruned": outcome.stats.points_pruned,
            "savings": outcome.stats.savings(),
        },
        "metric": metric,
        "elapsed_seconds": elapsed_secs,
        "config": &run.model.config,
        "centers": centers,
        "data_source": match args.input.as_ref() {
            Some(path) => json!({
                "type": "file",
                "path": path.display().to_string(),
                "weight_column": args.weight_column,
            }),
            None => json!({
                "type": "synthetic",
                "points": args.points,
                "dim": args.dim,
                "spread": args.spread,
            }),
        },
        "assignments_path": args.assignments.as_ref().map(|p| p.display().to_string()),
    });

    std::fs::write(&args.output, serde_json::to_string_pretty(&dump)?)?;
    info!(path = ?args.output, "wrote clustering summary");
    Ok(())
}

fn write_assignments(path: &Path, run: &KMeansRun) -> KMeansResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "cluster"])?;
    for (idx, cluster) in run.outcome.assignments.iter().enumerate() {
        writer.write_record([idx.to_string(), cluster.to_string()])?;
    }
    writer.flush()?;
    info!(path = ?path, "wrote assignments CSV");
    Ok(())
}

fn parse_seed_strategy(raw: &str) -> Result<SeedStrategy, String> {
    SeedStrategy::from_str(raw).map_err(|err| err.to_string())
}

fn parse_algorithm(raw: &str) -> Result<Algorithm, String> {
    Algorithm::from_str(raw).map_err(|err| err.to_string())
}
