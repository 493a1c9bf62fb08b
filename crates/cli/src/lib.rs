use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use code_index_chunker::ChunkerConfig;
use code_index_indexer::{
    CodeIndex, IndexSettings, IndexerError, SearchRequest, SettingsUpdate, DEFAULT_TOP_K,
};
use code_index_vector_store::{
    DeviceRequest, EmbeddingConfig, Metric, SearchMode, SearchOverrides, VectorConfig,
};
use serde_json::json;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod envelope;

const PERSIST_DIR_ENV: &str = "CODE_INDEX_PERSIST_DIR";
const API_KEY_ENV: &str = "OPENAI_API_KEY";
const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "code-index")]
#[command(about = "Semantic search over the tracked files of a git repository", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Index storage root (overrides CODE_INDEX_PERSIST_DIR)
    #[arg(long, global = true)]
    persist_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index of a repository and build it from scratch
    Init(InitArgs),

    /// Bring the index in line with the tracked files
    Sync(SyncArgs),

    /// Search the index
    Search(SearchArgs),

    /// Show index settings and counters
    Status(RepoArg),

    /// Change settings and rebuild the index
    Update(UpdateArgs),
}

#[derive(Args)]
struct RepoArg {
    /// Any path inside the repository
    #[arg(default_value = ".")]
    repo: PathBuf,
}

#[derive(Args, Default)]
struct EmbeddingArgs {
    /// OpenAI-compatible API base URL (default: OPENAI_BASE_URL or api.openai.com)
    #[arg(long)]
    base_url: Option<String>,

    /// API key (default: OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Embedding model id
    #[arg(long)]
    model: Option<String>,
}

#[derive(Args, Default)]
struct ChunkingArgs {
    /// Lines per chunk
    #[arg(long)]
    chunk_lines: Option<usize>,

    /// Lines shared by consecutive chunks
    #[arg(long)]
    overlap_lines: Option<usize>,
}

#[derive(Args, Default)]
struct VectorArgs {
    /// auto | cuda | mps | cpu
    #[arg(long)]
    device: Option<DeviceRequest>,

    /// ip | l2
    #[arg(long)]
    metric: Option<Metric>,

    /// exact | approx
    #[arg(long)]
    search_mode: Option<SearchMode>,

    /// Fraction of chunks scored in approx mode, in (0, 1]
    #[arg(long)]
    approx_sample_rate: Option<f64>,

    /// Seed of the approx sample
    #[arg(long)]
    approx_seed: Option<u64>,

    /// Memory budget of one scoring batch, in MiB
    #[arg(long)]
    max_vram_mb: Option<u64>,
}

impl VectorArgs {
    fn merge_into(&self, base: &VectorConfig) -> VectorConfig {
        VectorConfig {
            device: self.device.unwrap_or(base.device),
            metric: self.metric.unwrap_or(base.metric),
            search_mode: self.search_mode.unwrap_or(base.search_mode),
            approx_sample_rate: self.approx_sample_rate.unwrap_or(base.approx_sample_rate),
            approx_seed: self.approx_seed.unwrap_or(base.approx_seed),
            max_vram_mb: self.max_vram_mb.or(base.max_vram_mb),
        }
    }

    fn is_empty(&self) -> bool {
        self.device.is_none()
            && self.metric.is_none()
            && self.search_mode.is_none()
            && self.approx_sample_rate.is_none()
            && self.approx_seed.is_none()
            && self.max_vram_mb.is_none()
    }
}

#[derive(Args)]
struct InitArgs {
    #[command(flatten)]
    repo: RepoArg,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    chunking: ChunkingArgs,

    #[command(flatten)]
    vector: VectorArgs,
}

#[derive(Args)]
struct SyncArgs {
    #[command(flatten)]
    repo: RepoArg,

    /// Drop everything and re-index every tracked file
    #[arg(long)]
    full: bool,
}

#[derive(Args)]
struct SearchArgs {
    /// Natural-language or code query
    query: String,

    /// Any path inside the repository
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Number of results (1-100)
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Skip the incremental sync before searching
    #[arg(long)]
    no_refresh: bool,

    /// auto | cuda | mps | cpu, for this search only
    #[arg(long)]
    device: Option<DeviceRequest>,

    /// exact | approx, for this search only
    #[arg(long)]
    search_mode: Option<SearchMode>,

    /// Approx sample rate, for this search only
    #[arg(long)]
    approx_sample_rate: Option<f64>,

    /// Batch memory budget in MiB, for this search only
    #[arg(long)]
    max_vram_mb: Option<u64>,
}

#[derive(Args)]
struct UpdateArgs {
    #[command(flatten)]
    repo: RepoArg,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    chunking: ChunkingArgs,

    #[command(flatten)]
    vector: VectorArgs,
}

pub async fn main_entry() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let outcome = match resolve_persist_dir(cli.persist_dir.as_deref()) {
        Ok(persist_dir) => run(cli.command, &persist_dir).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok(value) => {
            print_stdout(&serde_json::to_string_pretty(&value)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            log::debug!("Command failed: {err:?}");
            print_stdout(&serde_json::to_string_pretty(&envelope::failure(&err))?)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(command: Commands, persist_dir: &Path) -> Result<serde_json::Value> {
    match command {
        Commands::Init(args) => run_init(args, persist_dir).await,
        Commands::Sync(args) => run_sync(args, persist_dir).await,
        Commands::Search(args) => run_search(args, persist_dir).await,
        Commands::Status(args) => run_status(args, persist_dir).await,
        Commands::Update(args) => run_update(args, persist_dir).await,
    }
}

fn resolve_persist_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env::var_os(PERSIST_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let data = dirs::data_dir().ok_or_else(|| {
        IndexerError::config_invalid(format!(
            "no platform data directory; pass --persist-dir or set {PERSIST_DIR_ENV}"
        ))
    })?;
    Ok(data.join("code-index"))
}

async fn run_init(args: InitArgs, persist_dir: &Path) -> Result<serde_json::Value> {
    let embedding = EmbeddingConfig {
        base_url: args
            .embedding
            .base_url
            .or_else(|| env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        api_key: args
            .embedding
            .api_key
            .or_else(|| env::var(API_KEY_ENV).ok())
            .unwrap_or_default(),
        model: args
            .embedding
            .model
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
    };
    let defaults = ChunkerConfig::default();
    let settings = IndexSettings {
        embedding,
        chunking: ChunkerConfig::new(
            args.chunking.chunk_lines.unwrap_or(defaults.chunk_lines),
            args.chunking.overlap_lines.unwrap_or(defaults.overlap_lines),
        ),
        vector: args.vector.merge_into(&VectorConfig::default()),
    };

    let (index, stats) = CodeIndex::init_repo(&args.repo.repo, persist_dir, settings).await?;
    envelope::success(&json!({
        "repo_root": index.config().repo_root,
        "index_dir": index.config().index_dir,
        "stats": stats,
    }))
}

async fn run_sync(args: SyncArgs, persist_dir: &Path) -> Result<serde_json::Value> {
    let mut index = CodeIndex::open_repo(&args.repo.repo, persist_dir).await?;
    let stats = index.sync(args.full).await?;
    envelope::success(&stats)
}

async fn run_search(args: SearchArgs, persist_dir: &Path) -> Result<serde_json::Value> {
    let mut index = CodeIndex::open_repo(&args.repo, persist_dir).await?;
    let request = SearchRequest {
        query: args.query,
        top_k: args.top_k,
        refresh: !args.no_refresh,
        overrides: SearchOverrides {
            device: args.device,
            search_mode: args.search_mode,
            approx_sample_rate: args.approx_sample_rate,
            max_vram_mb: args.max_vram_mb,
        },
    };
    let response = index.search(&request).await?;
    envelope::success(&response)
}

async fn run_status(args: RepoArg, persist_dir: &Path) -> Result<serde_json::Value> {
    let index = CodeIndex::open_repo(&args.repo, persist_dir).await?;
    envelope::success(&index.status())
}

async fn run_update(args: UpdateArgs, persist_dir: &Path) -> Result<serde_json::Value> {
    let mut index = CodeIndex::open_repo(&args.repo.repo, persist_dir).await?;
    let current = index.config().clone();

    let embedding_args = &args.embedding;
    let embedding = (embedding_args.base_url.is_some()
        || embedding_args.api_key.is_some()
        || embedding_args.model.is_some())
    .then(|| EmbeddingConfig {
        base_url: embedding_args
            .base_url
            .clone()
            .unwrap_or_else(|| current.embedding.base_url.clone()),
        api_key: embedding_args
            .api_key
            .clone()
            .unwrap_or_else(|| current.embedding.api_key.clone()),
        model: embedding_args
            .model
            .clone()
            .unwrap_or_else(|| current.embedding.model.clone()),
    });
    let chunking = (args.chunking.chunk_lines.is_some() || args.chunking.overlap_lines.is_some())
        .then(|| {
            ChunkerConfig::new(
                args.chunking
                    .chunk_lines
                    .unwrap_or(current.chunking.chunk_lines),
                args.chunking
                    .overlap_lines
                    .unwrap_or(current.chunking.overlap_lines),
            )
        });
    let vector = (!args.vector.is_empty()).then(|| args.vector.merge_into(&current.vector));

    let stats = index
        .update(SettingsUpdate {
            embedding,
            chunking,
            vector,
        })
        .await
        .context("update failed")?;
    envelope::success(&json!({
        "status": index.status(),
        "stats": stats,
    }))
}
