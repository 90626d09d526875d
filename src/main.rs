use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use atlas_core::{AtlasConfig, RefreshPolicy};
use atlas_repomap::mentions::{files_in, identifiers_in};
use atlas_repomap::walker::walk_repo;
use atlas_repomap::{Progress, RepoMap};

const CONFIG_FILE: &str = ".atlas.toml";

#[derive(Parser)]
#[command(
    name = "atlas",
    version,
    about = "Relevance-ranked repository maps for LLM context windows",
    long_about = "Atlas condenses a source tree into a map of its most relevant definitions,\n\
                   ranked with PageRank over the symbol graph and trimmed to a token budget.\n\n\
                   Examples:\n  \
                     atlas map                              Map the current directory\n  \
                     atlas map --chat src/lib.rs            Rank around files already in context\n  \
                     atlas map -m 'why does parse_header fail?'  Boost files and symbols mentioned\n  \
                     atlas cache stats                      Show tag cache usage\n  \
                     atlas init                             Write a default .atlas.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: <path>/.atlas.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Render a ranked map of the repository
    #[command(long_about = "Render a ranked map of the repository.\n\n\
                          Every supported source file under --path is a candidate. Files passed\n\
                          with --chat are always shown in full and steer the ranking; files and\n\
                          identifiers named in --message, --mention or --ident are boosted.\n\n\
                          Examples:\n  \
                            atlas map --max-tokens 2048\n  \
                            atlas map --chat src/parser.rs --ident Token\n  \
                            atlas map --message 'refactor store.rs to use a pool'")]
    Map {
        /// Repository root
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Token budget for the map (default: map.max_tokens from config)
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Files already in the conversation
        #[arg(long)]
        chat: Vec<PathBuf>,

        /// Files to boost in the ranking
        #[arg(long)]
        mention: Vec<PathBuf>,

        /// Identifiers to boost in the ranking
        #[arg(long)]
        ident: Vec<String>,

        /// Free-form request text to scan for file names and identifiers
        #[arg(long, short)]
        message: Option<String>,

        /// Map reuse policy (manual, files, auto)
        #[arg(long)]
        refresh: Option<RefreshPolicy>,

        /// Ignore any reusable map and recompute
        #[arg(long)]
        force: bool,

        /// Skip the durable tag cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Inspect or clear the durable tag cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Repository root
        #[arg(long, default_value = ".", global = true)]
        path: PathBuf,
    },
    /// Create a default .atlas.toml in the current directory
    Init,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print cache hit, miss and entry counts as JSON
    Stats,
    /// Remove every cached tag list
    Clear,
}

const DEFAULT_CONFIG: &str = r#"# Atlas configuration
# See https://github.com/atlas-map/atlas for documentation

[map]
max_tokens = 1024
# manual: reuse the last map until forced
# files:  reuse per file set and budget
# auto:   reuse per request once mapping gets slow
refresh = "auto"
max_file_size = 1048576

[cache]
dir = ".atlas.cache"
enabled = true

[ranking]
damping = 0.85
# mentioned_ident_multiplier = 10.0
# structured_ident_multiplier = 10.0
# private_ident_multiplier = 0.1
# overloaded_ident_multiplier = 0.1
# chat_referencer_multiplier = 50.0

[budget]
early_exit_tolerance = 0.15
tokens_per_tag_estimate = 25
auto_refresh_threshold_ms = 1000
"#;

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<AtlasConfig> {
    if let Some(path) = explicit {
        return AtlasConfig::from_file(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to load {}", path.display()));
    }
    let local = root.join(CONFIG_FILE);
    if local.exists() {
        AtlasConfig::from_file(&local)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to load {}", local.display()))
    } else {
        Ok(AtlasConfig::default())
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn progress_bar() -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new(0);
    let style = indicatif::ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:30}] {pos}/{len} {wide_msg}",
    )
    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
    .progress_chars("=> ");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

#[allow(clippy::too_many_arguments)]
fn run_map(
    config: AtlasConfig,
    path: &Path,
    max_tokens: Option<usize>,
    chat: Vec<PathBuf>,
    mention: Vec<PathBuf>,
    mut ident: Vec<String>,
    message: Option<String>,
    force: bool,
) -> Result<()> {
    let max_tokens = max_tokens.unwrap_or(config.map.max_tokens);
    let files = walk_repo(path, config.map.max_file_size)
        .into_diagnostic()
        .wrap_err("failed to walk repository")?;
    let candidates: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();

    let mut mentioned = mention;
    if let Some(text) = &message {
        let names = candidates
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();
        mentioned.extend(files_in(text, &names).into_iter().map(PathBuf::from));
        ident.extend(identifiers_in(text));
    }
    tracing::debug!(
        candidates = candidates.len(),
        chat = chat.len(),
        mentioned_files = mentioned.len(),
        mentioned_idents = ident.len(),
        "mapping repository"
    );

    let bar = progress_bar();
    let mut repo_map = RepoMap::new(path, config);
    if let Some(pb) = bar.clone() {
        repo_map = repo_map.on_progress(move |p: &Progress| {
            pb.set_length(p.total as u64);
            pb.set_position(p.done as u64);
            pb.set_message(p.file.clone());
        });
    }

    let map = repo_map
        .compute_map(&chat, &candidates, &mentioned, &ident, max_tokens, force)
        .into_diagnostic()?;
    if let Some(pb) = bar {
        pb.finish_and_clear();
    }

    match map {
        Some(map) => print!("{map}"),
        None => eprintln!("No map fits within {max_tokens} tokens."),
    }
    Ok(())
}

fn main() -> Result<()> {
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

    match cli.command {
        Command::Map {
            path,
            max_tokens,
            chat,
            mention,
            ident,
            message,
            refresh,
            force,
            no_cache,
        } => {
            let mut config = load_config(cli.config.as_deref(), &path)?;
            if let Some(policy) = refresh {
                config.map.refresh = policy;
            }
            if no_cache {
                config.cache.enabled = false;
            }
            run_map(
                config, &path, max_tokens, chat, mention, ident, message, force,
            )?;
        }
        Command::Cache { action, path } => {
            let config = load_config(cli.config.as_deref(), &path)?;
            let mut repo_map = RepoMap::new(&path, config);
            match action {
                CacheAction::Stats => {
                    let stats = repo_map.cache_stats();
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&stats).into_diagnostic()?
                    );
                }
                CacheAction::Clear => {
                    repo_map
                        .clear_caches()
                        .into_diagnostic()
                        .wrap_err("failed to clear tag cache")?;
                    println!("Tag cache cleared");
                }
            }
        }
        Command::Init => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
    }

    Ok(())
}
