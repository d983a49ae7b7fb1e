use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use duckgate_cache::embedding;
use duckgate_cache::semantic::SemanticCache;
use duckgate_core::{find_config_file, BlockOn, DuckgateConfig, OutputFormat, CONFIG_FILENAME};
use duckgate_difflens::source::{DiffSource, GitDiffSource, ScanMode, UnifiedDiffSource};
use duckgate_review::llm::LlmClient;
use duckgate_review::pipeline::ReviewPipeline;

#[derive(Parser)]
#[command(
    name = "duckgate",
    version,
    about = "Pre-commit AI review gate",
    long_about = "duckgate reviews the change you are about to commit.\n\n\
                   Hunks are filtered, answered from a local semantic cache when a close\n\
                   enough change was reviewed before, collapsed when they are near-duplicates\n\
                   of each other, and the rest is sent to your LLM backends in risk order.\n\n\
                   Examples:\n  \
                     duckgate scan                    Review staged changes\n  \
                     duckgate scan --all              Review every tracked change\n  \
                     git diff main | duckgate scan --file -\n  \
                     duckgate cache stats             Show review cache statistics\n  \
                     duckgate doctor                  Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: nearest .duckgate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summary (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Log pipeline progress to stderr (same as DUCKGATE_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Review the pending change and gate the commit
    #[command(long_about = "Review the pending change and gate the commit.\n\n\
        Exits with status 1 when a finding meets the block_on level. Units that\n\
        were skipped for budget or could not be reviewed never block.\n\n\
        Examples:\n  duckgate scan\n  duckgate scan --all --block-on warning\n  duckgate scan --file changes.patch --format json")]
    Scan {
        /// Review all tracked changes instead of only staged ones
        #[arg(long)]
        all: bool,

        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Read a unified diff from a file ("-" for stdin) instead of git
        #[arg(long)]
        file: Option<PathBuf>,

        /// Neither read nor write the review cache
        #[arg(long)]
        no_cache: bool,

        /// Override pipeline.block_on (critical, warning, all, none)
        #[arg(long)]
        block_on: Option<BlockOn>,
    },
    /// Inspect or reset the review cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Create a default .duckgate.toml in the current directory
    Init,
    /// Check your setup and environment
    Doctor,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and cumulative hit/miss counters
    Stats,
    /// Remove every cached review
    Clear,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("DUCKGATE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_diff_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .into_diagnostic()
            .wrap_err("reading stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))
}

async fn run_scan(
    config: &DuckgateConfig,
    format: OutputFormat,
    all: bool,
    repo: &Path,
    file: Option<&Path>,
    no_cache: bool,
    block_on: Option<BlockOn>,
) -> Result<bool> {
    let source: Box<dyn DiffSource> = match file {
        Some(path) => {
            let label = if path == Path::new("-") {
                "stdin".to_string()
            } else {
                path.display().to_string()
            };
            Box::new(UnifiedDiffSource::new(label, read_diff_input(path)?))
        }
        None => {
            let mode = if all {
                ScanMode::AllTracked
            } else {
                ScanMode::Staged
            };
            Box::new(GitDiffSource::new(repo, mode))
        }
    };
    info!(source = %source.describe(), "reading diff");
    let files = source.file_diffs()?;

    let pipeline = ReviewPipeline::from_config(config, !no_cache)?;
    debug!(?pipeline, "pipeline ready");

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling scan");
            watcher.cancel();
        }
    });

    let outcome = pipeline.run(files, &cancel).await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).into_diagnostic()?
            );
        }
        OutputFormat::Markdown => print!("{}", outcome.to_markdown()),
        OutputFormat::Text => print!("{outcome}"),
    }

    let block_on = block_on.unwrap_or(config.pipeline.block_on);
    let blocked = outcome.should_block(block_on);
    if blocked {
        eprintln!("duckgate: commit blocked (block_on = {block_on})");
    }
    Ok(blocked)
}

fn run_cache(config: &DuckgateConfig, format: OutputFormat, action: CacheAction) -> Result<()> {
    let path = config.cache.resolved_path()?;
    let embedder = embedding::from_config(&config.embedding)?;
    let cache = SemanticCache::open_at(
        &path,
        config.pipeline.cache_threshold,
        embedder.dimensions(),
    )?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            match format {
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "path": path,
                        "stats": stats,
                        "hitRate": stats.hit_rate(),
                    });
                    println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
                }
                OutputFormat::Markdown => {
                    println!("| cache | |\n|---|---|");
                    println!("| path | `{}` |", path.display());
                    println!("| entries | {} |", stats.entries);
                    println!("| hits | {} |", stats.hits);
                    println!("| misses | {} |", stats.misses);
                    println!("| hit rate | {:.1}% |", stats.hit_rate() * 100.0);
                }
                OutputFormat::Text => {
                    println!("path:     {}", path.display());
                    println!("entries:  {}", stats.entries);
                    println!("hits:     {}", stats.hits);
                    println!("misses:   {}", stats.misses);
                    println!("hit rate: {:.1}%", stats.hit_rate() * 100.0);
                    println!("size:     {} bytes", stats.size_bytes);
                }
            }
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            match format {
                OutputFormat::Json => {
                    let json = serde_json::json!({ "path": path, "removed": removed });
                    println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
                }
                _ => println!("Removed {removed} cached reviews from {}", path.display()),
            }
        }
    }
    cache.close();
    for note in cache.take_diagnostics() {
        eprintln!("note: {note}");
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: String,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self, color: bool) -> &'static str {
        match (self.status, color) {
            ("pass", true) => "\x1b[32m\u{2713}\x1b[0m",
            ("pass", false) => "\u{2713}",
            ("fail", true) => "\x1b[31m\u{2717}\x1b[0m",
            ("fail", false) => "\u{2717}",
            (_, true) => "\x1b[33m~\x1b[0m",
            (_, false) => "~",
        }
    }
}

fn run_doctor(config: &DuckgateConfig, format: OutputFormat) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();
    let cwd = std::env::current_dir().into_diagnostic()?;

    match cwd.ancestors().find(|dir| dir.join(".git").exists()) {
        Some(root) => checks.push(CheckResult::pass(
            "git repository",
            format!("detected at {}", root.display()),
        )),
        None => checks.push(CheckResult::fail(
            "git repository",
            "not a git repository",
            "run duckgate from inside a git repository, or use --file",
        )),
    }

    match find_config_file(&cwd) {
        Some(path) => checks.push(CheckResult::pass("config file", path.display().to_string())),
        None => checks.push(CheckResult::info(
            "config file",
            format!("no {CONFIG_FILENAME} found, using defaults (run 'duckgate init')"),
        )),
    }

    match config.validate() {
        Ok(()) => checks.push(CheckResult::pass(
            "pipeline",
            format!(
                "budget {} tokens, cache >= {}, dedup >= {}, block on {}",
                config.pipeline.token_budget,
                config.pipeline.cache_threshold,
                config.pipeline.dedup_threshold,
                config.pipeline.block_on
            ),
        )),
        Err(e) => checks.push(CheckResult::fail(
            "pipeline",
            e.to_string(),
            format!("fix the [pipeline] section of {CONFIG_FILENAME}"),
        )),
    }

    for backend in &config.backends {
        let name = format!("backend {}", backend.display_name());
        match LlmClient::new(backend) {
            Ok(client) => checks.push(CheckResult::pass(
                name,
                format!("{} at {}", client.model(), client.base_url()),
            )),
            Err(e) => checks.push(CheckResult::fail(
                name,
                e.to_string(),
                "set the provider's API key variable or api_key_env in [[backends]]",
            )),
        }
    }

    let dimensions = match embedding::from_config(&config.embedding) {
        Ok(embedder) => {
            checks.push(CheckResult::pass(
                "embedding",
                format!(
                    "{} ({} dimensions)",
                    config.embedding.provider,
                    embedder.dimensions()
                ),
            ));
            Some(embedder.dimensions())
        }
        Err(e) => {
            checks.push(CheckResult::fail(
                "embedding",
                e.to_string(),
                "use provider = \"local\" or configure an API key",
            ));
            None
        }
    };

    if !config.cache.enabled {
        checks.push(CheckResult::info("cache", "disabled"));
    } else if let Some(dimensions) = dimensions {
        let opened = config.cache.resolved_path().and_then(|path| {
            let cache =
                SemanticCache::open_at(&path, config.pipeline.cache_threshold, dimensions)?;
            let stats = cache.stats()?;
            Ok((path, stats))
        });
        match opened {
            Ok((path, stats)) => checks.push(CheckResult::pass(
                "cache",
                format!("{} ({} entries)", path.display(), stats.entries),
            )),
            Err(e) => checks.push(CheckResult::fail(
                "cache",
                e.to_string(),
                "run 'duckgate cache clear' or set [cache] path",
            )),
        }
    }

    let version = env!("CARGO_PKG_VERSION");
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "version": version,
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        _ => {
            let color = std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err();
            println!("duckgate v{version} environment check\n");
            for check in &checks {
                println!("  {} {:<20} {}", check.symbol(color), check.name, check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }
            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            println!("\n{passed} checks passed, {failed} failed");
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# duckgate configuration
# Every key is optional; the values shown are the defaults.

[pipeline]
# token_budget = 50000        # estimated tokens per scan, 0 = unlimited
# max_batch_tokens = 12000
# cache_threshold = 0.92      # cosine similarity for a cache hit
# dedup_threshold = 0.95      # must not be below cache_threshold
# max_concurrent = 3
block_on = "critical"         # critical | warning | all | none

[retry]
# max_attempts = 3
# initial_delay_ms = 500
# max_delay_ms = 30000
# multiplier = 2.0
# jitter = 0.2
# rotate_after = 2            # consecutive rate limits before failing over

[cache]
# enabled = true
# path = "/home/you/.duckgate/cache/reviews.db"  # default: ~/.duckgate/cache/reviews.db

[embedding]
provider = "local"            # local | openai
# model = "text-embedding-3-small"
# dimensions = 384

[checks]
# security = true
# license = false

[filter]
# skip_patterns = ["*.snap", "fixtures/**"]
# skip_extensions = ["csv"]
# max_changed_lines = 1000

# Backends are tried in order; later ones take over when earlier ones are
# rate limited.
[[backends]]
provider = "openai"
# model = "gpt-4o"
# api_key_env = "OPENAI_API_KEY"

# [[backends]]
# provider = "ollama"
# model = "llama3.1"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Init = cli.command {
        let path = Path::new(CONFIG_FILENAME);
        if path.exists() {
            miette::bail!("{CONFIG_FILENAME} already exists");
        }
        std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
        println!("Created {CONFIG_FILENAME} with default configuration");
        return Ok(());
    }

    let cwd = std::env::current_dir().into_diagnostic()?;
    let config = DuckgateConfig::load(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Command::Scan {
            all,
            ref repo,
            ref file,
            no_cache,
            block_on,
        } => {
            let blocked = run_scan(
                &config,
                cli.format,
                all,
                repo,
                file.as_deref(),
                no_cache,
                block_on,
            )
            .await?;
            if blocked {
                std::process::exit(1);
            }
        }
        Command::Cache { action } => run_cache(&config, cli.format, action)?,
        Command::Doctor => run_doctor(&config, cli.format)?,
        Command::Init => {}
    }

    Ok(())
}
