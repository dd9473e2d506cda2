//! CLI for brute-force nearest-neighbor and inner product search.

// CLI binaries need to print user-facing output
#![allow(
    clippy::print_stdout,
    reason = "CLI binary needs stdout for user output"
)]

use eyre::WrapErr as _;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Search(search_args) => {
            search(&search_args)?;
        }
        Command::Pack {
            input,
            output,
            dtype,
        } => {
            pack(&input, &output, dtype.into())?;
        }
        Command::Inspect { path } => {
            inspect(&path)?;
        }
    }

    Ok(())
}

use clap::Parser as _;

#[derive(clap::Parser)]
#[command(name = "knn")]
#[command(about = "Brute-force k-nearest-neighbor and maximum inner product search")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Find the top-k rows of a data matrix for a query vector
    Search(SearchArgs),

    /// Convert a JSON array (or array of arrays) into a tensor file
    Pack {
        /// JSON input file
        input: std::path::PathBuf,

        /// Tensor file to write
        output: std::path::PathBuf,

        /// Element type to store
        #[arg(long, value_enum, default_value_t = DTypeArg::F32)]
        dtype: DTypeArg,
    },

    /// Print the dtype and shape of a tensor file
    Inspect {
        /// Tensor file to read
        path: std::path::PathBuf,
    },
}

#[derive(clap::Args)]
struct SearchArgs {
    /// Distance or score to rank by
    #[arg(long, value_enum)]
    mode: Mode,

    /// Query vector (tensor file or .json)
    #[arg(long)]
    query: std::path::PathBuf,

    /// Data matrix, one candidate per row (tensor file or .json)
    #[arg(long)]
    data: std::path::PathBuf,

    /// Number of results
    #[arg(short)]
    k: usize,

    /// Element type used when reading .json inputs
    #[arg(long, value_enum, default_value_t = DTypeArg::F32)]
    dtype: DTypeArg,

    /// L2 only: desired recall in (0, 1]
    #[arg(long, default_value_t = knn_search::DEFAULT_RECALL_TARGET)]
    recall_target: f64,

    /// L2 only: score just the first floor(k / recall_target) rows
    #[arg(long)]
    unsafe_prefix_sampling: bool,

    /// MIPS only: bucket width exponent (estimated from the data size if omitted)
    #[arg(long)]
    bin_size: Option<u32>,

    /// MIPS only: how rows map to buckets
    #[arg(long, value_enum, default_value_t = LayoutArg::Strided)]
    bucket_layout: LayoutArg,

    /// Worker threads (defaults to the available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Clamp k to the number of rows instead of failing
    #[arg(long)]
    clamp_k: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    /// Exact Manhattan distance
    L1,
    /// Euclidean ranking via 0.5*||x||^2 - q.x
    L2,
    /// Approximate maximum inner product
    Mips,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DTypeArg {
    F32,
    F64,
}

impl From<DTypeArg> for knn_tensor::DType {
    fn from(dtype: DTypeArg) -> Self {
        match dtype {
            DTypeArg::F32 => Self::F32,
            DTypeArg::F64 => Self::F64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LayoutArg {
    Strided,
    Contiguous,
}

impl From<LayoutArg> for knn_search::BucketLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Strided => Self::Strided,
            LayoutArg::Contiguous => Self::Contiguous,
        }
    }
}

/// Load a tensor file, or parse it as JSON when the extension is `.json`.
fn load_tensor(
    path: &std::path::Path,
    dtype: knn_tensor::DType,
) -> eyre::Result<knn_tensor::AnyTensor> {
    if path.extension().is_some_and(|ext| ext == "json") {
        knn_tensor::read_json(path, dtype)
    } else {
        knn_tensor::load(path)
    }
}

fn search(args: &SearchArgs) -> eyre::Result<()> {
    use knn_tensor::AnyTensor;

    let dtype = args.dtype.into();
    let query = load_tensor(&args.query, dtype).wrap_err("failed to load query")?;
    let data = load_tensor(&args.data, dtype).wrap_err("failed to load data")?;

    let result = match (query, data) {
        (AnyTensor::F32(query), AnyTensor::F32(data)) => run(args, &query, &data)?,
        (AnyTensor::F64(query), AnyTensor::F64(data)) => run(args, &query, &data)?,
        (query, data) => eyre::bail!(
            "query is {} but data is {}, both must have the same dtype",
            query.dtype(),
            data.dtype()
        ),
    };

    println!("{result}");
    Ok(())
}

/// Run one search and render the result as text or JSON.
fn run<T>(
    args: &SearchArgs,
    query: &knn_tensor::Tensor<T>,
    data: &knn_tensor::Tensor<T>,
) -> eyre::Result<String>
where
    T: knn_tensor::TensorElement + serde::Serialize,
{
    let Some(query) = query.as_vector() else {
        eyre::bail!("query must be a vector, got shape {:?}", query.shape());
    };
    let matrix = data.as_matrix();

    let workers = args
        .workers
        .map_or_else(knn_search::Workers::available, knn_search::Workers::new);
    let k_policy = if args.clamp_k {
        knn_search::KPolicy::Clamp
    } else {
        knn_search::KPolicy::Strict
    };
    let options = knn_search::SearchOptions::default()
        .with_workers(workers)
        .with_k_policy(k_policy);

    let start = std::time::Instant::now();
    let result = match args.mode {
        Mode::L1 => {
            let config = knn_search::L1Config::new(args.k).with_options(options);
            knn_search::l1_search(query, matrix, &config)
        }
        Mode::L2 => {
            let sampling = if args.unsafe_prefix_sampling {
                knn_search::L2Sampling::UnsafePrefix
            } else {
                knn_search::L2Sampling::Exhaustive
            };
            let config = knn_search::L2Config::new(args.k)
                .with_recall_target(args.recall_target)
                .with_sampling(sampling)
                .with_options(options);
            knn_search::l2_search(query, matrix, &config)
        }
        Mode::Mips => {
            let mut config = knn_search::MipsConfig::new(args.k)
                .with_layout(args.bucket_layout.into())
                .with_options(options);
            if let Some(bin_size) = args.bin_size {
                config = config.with_bin_size(bin_size);
            }
            knn_search::mips_search(query, matrix, &config)
        }
    }
    .wrap_err_with(|| format!("{:?} search failed", args.mode))?;

    tracing::debug!(elapsed = ?start.elapsed(), results = result.len(), "search finished");

    if args.json {
        return serde_json::to_string_pretty(&result).wrap_err("failed to serialize JSON");
    }

    let lines: Vec<String> = result
        .iter()
        .map(|candidate| format!("{}: {}", candidate.index, candidate.score))
        .collect();
    Ok(lines.join("\n"))
}

fn pack(
    input: &std::path::Path,
    output: &std::path::Path,
    dtype: knn_tensor::DType,
) -> eyre::Result<()> {
    let tensor = knn_tensor::read_json(input, dtype)?;
    match &tensor {
        knn_tensor::AnyTensor::F32(t) => knn_tensor::save(output, t)?,
        knn_tensor::AnyTensor::F64(t) => knn_tensor::save(output, t)?,
    }

    println!(
        "Packed {} {} tensor {:?} -> {}",
        tensor.dtype(),
        rank_name(tensor.rank()),
        tensor.shape(),
        output.display()
    );
    Ok(())
}

fn inspect(path: &std::path::Path) -> eyre::Result<()> {
    let tensor = knn_tensor::load(path)?;
    println!("dtype: {}", tensor.dtype());
    println!("rank:  {}", rank_name(tensor.rank()));
    println!("shape: {:?}", tensor.shape());
    Ok(())
}

fn rank_name(rank: knn_tensor::Rank) -> &'static str {
    match rank {
        knn_tensor::Rank::Vector => "vector",
        knn_tensor::Rank::Matrix => "matrix",
    }
}
