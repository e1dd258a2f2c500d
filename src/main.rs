//! replayci CLI - Replay GitHub Actions test workflows locally with act.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use replayci::cache::CacheDirPool;
use replayci::config::{self, Config};
use replayci::credentials::TokenPool;
use replayci::executor::{Act, DockerRuntime};
use replayci::orchestrator::{Replay, WorkflowSet, WorkflowSetReport};
use replayci::report::print_summary;
use replayci::workflow::WorkflowFactory;

const DEFAULT_CONFIG: &str = "replayci.toml";

#[derive(Parser)]
#[command(name = "replayci")]
#[command(about = "Replay GitHub Actions test workflows locally", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (default: replayci.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write instrumented copies of a repository's test workflows
    Instrument {
        /// Repository checkout
        repo: PathBuf,

        /// Repository language (java, python, go, rust, javascript, ...)
        #[arg(short, long)]
        language: String,

        /// Instrument for execution without network access
        #[arg(long)]
        offline: bool,

        /// Write one workflow per job
        #[arg(long)]
        split_jobs: bool,
    },

    /// Run the test workflows of one or more repositories
    Run {
        /// Repository checkouts
        #[arg(required = true)]
        repos: Vec<PathBuf>,

        /// Language of the repositories
        #[arg(short, long)]
        language: String,

        /// Override the number of concurrent workflows per repository
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Override the number of repositories replayed at the same time
        #[arg(long)]
        repo_concurrency: Option<usize>,

        /// Run without network access
        #[arg(long)]
        offline: bool,

        /// Directory for the JSON repository reports
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the third-party actions used by a repository's test workflows
    Actions {
        repo: PathBuf,

        #[arg(short, long)]
        language: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Instrument {
            repo,
            language,
            offline,
            split_jobs,
        } => {
            let config = load(cli.config.as_deref())?;
            instrument(&repo, &language, offline || config.engine.offline, split_jobs)
        }
        Commands::Run {
            repos,
            language,
            concurrency,
            repo_concurrency,
            offline,
            output,
        } => {
            let mut config = load(cli.config.as_deref())?;
            if let Some(concurrency) = concurrency {
                config.engine.concurrency = concurrency;
            }
            if let Some(repo_concurrency) = repo_concurrency {
                config.engine.repo_concurrency = repo_concurrency;
            }
            if offline {
                config.engine.offline = true;
            }
            if let Some(output) = output {
                config.report.output_dir = output;
            }
            run(config, &repos, &language).await
        }
        Commands::Actions { repo, language } => list_actions(&repo, &language),
        Commands::Validate => validate_config(cli.config.as_deref()),
    }
}

/// Loads the given configuration file, `replayci.toml` if present, or
/// the defaults.
fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).is_file() => {
            config::load_config(Path::new(DEFAULT_CONFIG))
        }
        None => config::load_config_str(""),
    }
}

fn instrument(repo: &Path, language: &str, offline: bool, split_jobs: bool) -> Result<()> {
    let set = WorkflowSet::discover(repo, language, offline)
        .with_context(|| format!("Failed to discover workflows in {}", repo.display()))?;

    let workflows = if split_jobs {
        set.test_workflows()
            .iter()
            .flat_map(WorkflowFactory::split_by_jobs)
            .collect()
    } else {
        set.test_workflows().to_vec()
    };

    for workflow in &workflows {
        workflow
            .save()
            .with_context(|| format!("Failed to save {}", workflow.path().display()))?;
        println!("{} ({})", workflow.path().display(), workflow.build_tool());
    }

    if workflows.is_empty() {
        println!("No test workflows found in {}", repo.display());
    }
    Ok(())
}

fn list_actions(repo: &Path, language: &str) -> Result<()> {
    let set = WorkflowSet::discover(repo, language, false)
        .with_context(|| format!("Failed to discover workflows in {}", repo.display()))?;
    for action in set.actions() {
        println!("{}", action);
    }
    Ok(())
}

async fn run(config: Config, repos: &[PathBuf], language: &str) -> Result<()> {
    let act = Act::from_config(&config);
    act.check_installed().await?;

    let docker = DockerRuntime::connect().context("Failed to connect to Docker")?;
    docker.ensure_image(act.runner_image()).await?;

    let pool = CacheDirPool::init(&config.engine.cache_root, config.engine.pool_size())
        .context("Failed to create act cache directories")?;
    let credentials = TokenPool::new(
        config.credentials.tokens.clone(),
        config.credentials.requests_per_hour,
    );
    let replay = Replay {
        act: &act,
        pool: &pool,
        credentials: &credentials,
        concurrency: config.engine.concurrency,
        offline: config.engine.offline,
    };

    info!(
        "Replaying {} repositories, {} at a time, with up to {} concurrent workflows each",
        repos.len(),
        config.engine.repo_concurrency.max(1),
        config.engine.concurrency
    );

    let progress = ProgressBar::new(repos.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let results: Mutex<Vec<(String, Option<WorkflowSetReport>)>> = Mutex::new(Vec::new());
    let output_dir = &config.report.output_dir;
    let slots = Semaphore::new(config.engine.repo_concurrency.max(1));

    // Repositories run concurrently using scoped spawns (no 'static required)
    tokio_scoped::scope(|scope| {
        for repo in repos {
            let replay = &replay;
            let progress = &progress;
            let results = &results;
            let slots = &slots;

            scope.spawn(async move {
                let Ok(_slot) = slots.acquire().await else {
                    return;
                };
                let (set_report, report) = replay.repository(repo, language).await;

                let name = repo
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "repository".to_string());
                let report_path = output_dir.join(format!("{}.json", name));
                if let Err(e) = report.write(&report_path) {
                    warn!("Failed to write {}: {}", report_path.display(), e);
                }

                progress.set_message(name);
                progress.inc(1);
                results
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push((repo.display().to_string(), set_report));
            });
        }
    });
    progress.finish_and_clear();

    if !config.act.reuse_containers
        && let Err(e) = docker.remove_containers(act.runner_image()).await
    {
        warn!("Failed to remove leftover containers: {}", e);
    }

    let results = results
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut failed = false;
    for (repo, set_report) in &results {
        match set_report {
            Some(set_report) => {
                print_summary(repo, set_report);
                failed |= set_report.failed();
            }
            None => {
                println!(
                    "\n{} {}",
                    console::style(repo).bold(),
                    console::style("could not be replayed").red()
                );
                failed = true;
            }
        }
    }
    println!(
        "\nReports written to {}",
        console::style(output_dir.display()).dim()
    );

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match load(path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Offline: {}", config.engine.offline);
            println!("  Timeout: {} min", config.engine.timeout_minutes);
            println!("  Concurrency: {}", config.engine.concurrency);
            println!("  Repository concurrency: {}", config.engine.repo_concurrency);
            println!("  Cache pool: {}", config.engine.pool_size());
            println!("  Cache root: {}", config.engine.cache_root.display());
            println!("  act: {}", config.act.path);
            println!("  Runner image: {}", config.act.runner_image);
            println!("  Tokens: {}", config.credentials.tokens.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
