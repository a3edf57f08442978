use anyhow::{bail, Context};
use clap::Parser;
use colmatch::{
    AssignmentStrategy, CancellationToken, MatchConfig, MatchPipeline, ProviderKind, TracingProgress,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Match the values of two CSV columns
#[derive(Parser, Debug)]
#[command(name = "colmatch")]
#[command(version, about = "Match the values of two CSV columns", long_about = None)]
struct Args {
    /// Input CSV: header row plus at least two columns
    input: PathBuf,

    /// Output CSV [default: <input stem>_matched.csv next to the input]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Minimum cosine similarity for a fuzzy match (inclusive)
    #[arg(long, allow_hyphen_values = true)]
    threshold: Option<f32>,

    /// Header of the A column [default: first column]
    #[arg(long)]
    column_a: Option<String>,

    /// Header of the B column [default: second column]
    #[arg(long)]
    column_b: Option<String>,

    /// Use the column with fewer non-empty values as A
    #[arg(long)]
    swap_columns: bool,

    /// Assignment strategy: greedy or optimal
    #[arg(long)]
    strategy: Option<AssignmentStrategy>,

    /// Embedding provider: openai or hash
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Embedding model name
    #[arg(long)]
    model: Option<String>,

    /// Requested embedding dimension
    #[arg(long)]
    dimensions: Option<usize>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long)]
    base_url: Option<String>,

    /// Strings per embedding request
    #[arg(long)]
    batch_size: Option<usize>,

    /// Embedding requests in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts per embedding request, first one included
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_config(args: &Args) -> anyhow::Result<MatchConfig> {
    let mut config = match (&args.config, args.threshold) {
        (Some(path), _) => MatchConfig::from_file(path)?,
        (None, Some(threshold)) => MatchConfig::new(threshold),
        (None, None) => bail!("--threshold is required unless it is set in --config"),
    };

    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if args.column_a.is_some() {
        config.columns.column_a = args.column_a.clone();
    }
    if args.column_b.is_some() {
        config.columns.column_b = args.column_b.clone();
    }
    if args.swap_columns {
        config.columns.swap_columns_by_count = true;
    }

    let embedding = &mut config.embedding;
    if let Some(provider) = args.provider {
        embedding.provider = provider;
    }
    if let Some(model) = &args.model {
        embedding.model = model.clone();
    }
    if args.dimensions.is_some() {
        embedding.dimensions = args.dimensions;
    }
    if let Some(base_url) = &args.base_url {
        embedding.base_url = base_url.clone();
    }
    if let Some(batch_size) = args.batch_size {
        embedding.batch_size = batch_size;
    }
    if let Some(concurrency) = args.concurrency {
        embedding.max_concurrent_batches = concurrency;
    }
    if let Some(max_attempts) = args.max_attempts {
        embedding.retry.max_attempts = max_attempts;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        embedding.timeout_secs = timeout_secs;
    }
    embedding.api_key = args.api_key.clone().filter(|k| !k.trim().is_empty());

    config.validate()?;
    Ok(config)
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}_matched.csv", stem))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&args)?;
    let output_path = args.output.clone().unwrap_or_else(|| default_output(&args.input));

    info!("Starting colmatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {:?}", args.input);
    info!("Output: {:?}", output_path);
    info!(
        "Threshold {} with {} strategy, {} embeddings",
        config.threshold, config.strategy, config.embedding.provider
    );

    let input = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let pipeline = MatchPipeline::from_config(config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let output = pipeline.run(&input, &TracingProgress, &cancel).await?;

    std::fs::write(&output_path, &output.csv)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    let summary = output.summary;
    info!(
        exact = summary.exact,
        fuzzy = summary.fuzzy,
        unmatched_a = summary.unmatched_a,
        unmatched_b = summary.unmatched_b,
        embedded = summary.embedded,
        provider_calls = summary.provider_calls,
        columns_swapped = summary.columns_swapped,
        "Wrote {} records to {:?}",
        output.records.len(),
        output_path
    );
    Ok(())
}
