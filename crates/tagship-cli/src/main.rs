//! tagship - tag-triggered release pipeline CLI
//!
//! ## Commands
//!
//! - `run`: match a pushed ref and, for release tags, provision, test, build and publish
//! - `match`: show whether a ref would start a release
//! - `runs`: inspect recorded runs
//! - `config`: print the effective configuration
//!
//! `run` exits 0 on success or no-op, 1 on provisioning failure, 2 when the
//! test gate fails, 3 on build failure and 4 on publish failure. Usage and
//! setup errors exit 64.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tagship_core::{
    init_tracing, AlwaysStable, CommandPackageBuilder, CommandProvisioner, CommandTestGate,
    FsReleasePublisher, GitHubConfig, GitHubReleasePublisher, MatchDecision, PipelineConfig,
    PipelineStages, PublishBackend, RefKind, ReleaseClassifier, ReleasePipeline,
    ReleasePublisher, RunContext, StageTimeouts, SuffixPrerelease, TriggerEvent, TriggerMatcher,
    CONFIG_FILE,
};
use tagship_state::{FsRunLedger, RunLedger, RunId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

const EXIT_USAGE: u8 = 64;

#[derive(Parser)]
#[command(name = "tagship")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tag-triggered release pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the release pipeline for a pushed ref
    Run {
        /// Ref that was pushed: `refs/tags/v1.2.3`, `refs/heads/main`, or a short name
        #[arg(long = "ref", env = "GITHUB_REF")]
        reference: String,

        /// Kind of a short ref name (default: tag)
        #[arg(long)]
        kind: Option<RefKind>,

        /// Checked-out source tree
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Config file (default: <workdir>/tagship.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Publish into this directory instead of the hosting platform
        #[arg(long, value_name = "DIR")]
        dry_run: Option<PathBuf>,

        /// Let an empty test suite pass
        #[arg(long)]
        allow_empty_tests: bool,

        /// Accept `v1.2.3-rc.1` style tags and publish them as pre-releases
        #[arg(long)]
        allow_prerelease_tags: bool,
    },

    /// Show whether a ref would start a release
    Match {
        /// Full or short ref name
        reference: String,

        /// Kind of a short ref name (default: tag)
        #[arg(long)]
        kind: Option<RefKind>,

        /// Project directory whose configuration applies
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Config file (default: <workdir>/tagship.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Accept pre-release suffixes
        #[arg(long)]
        allow_prerelease_tags: bool,
    },

    /// Inspect recorded runs
    Runs {
        /// Project directory whose ledger to read
        #[arg(long, default_value = ".", global = true)]
        workdir: PathBuf,

        #[command(subcommand)]
        action: RunsAction,
    },

    /// Print the effective configuration
    Config {
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List runs, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show a run with its events
    Show {
        /// Run ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_exit(e),
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            reference,
            kind,
            workdir,
            config,
            dry_run,
            allow_empty_tests,
            allow_prerelease_tags,
        } => {
            let flags = RunFlags {
                dry_run,
                allow_empty_tests,
                allow_prerelease_tags,
            };
            cmd_run(&reference, kind, &workdir, config.as_deref(), flags).await
        }
        Commands::Match {
            reference,
            kind,
            workdir,
            config,
            allow_prerelease_tags,
        } => cmd_match(
            &reference,
            kind,
            &workdir,
            config.as_deref(),
            allow_prerelease_tags,
        )
        .map(|_| ExitCode::SUCCESS),
        Commands::Runs { workdir, action } => match action {
            RunsAction::List { limit } => cmd_runs_list(&workdir, limit).await,
            RunsAction::Show { id } => cmd_runs_show(&workdir, &id).await,
        }
        .map(|_| ExitCode::SUCCESS),
        Commands::Config { workdir, config } => {
            cmd_config(&workdir, config.as_deref()).map(|_| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// Help and version go to stdout and exit 0. Any other parse failure is a
/// usage error and must not collide with the pipeline's exit codes.
fn usage_exit(err: clap::Error) -> ExitCode {
    let _ = err.print();
    ExitCode::from(usage_status(err.kind()))
}

fn usage_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => EXIT_USAGE,
    }
}

/// CLI flags that override file and environment configuration.
struct RunFlags {
    dry_run: Option<PathBuf>,
    allow_empty_tests: bool,
    allow_prerelease_tags: bool,
}

impl RunFlags {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.dry_run {
            config.publish.backend = PublishBackend::Filesystem;
            config.publish.fs_root = Some(dir.clone());
        }
        if self.allow_empty_tests {
            config.test.allow_empty = true;
        }
        if self.allow_prerelease_tags {
            config.trigger.allow_prerelease_tags = true;
            config.trigger.classify_prereleases = true;
        }
    }
}

/// Defaults, then the config file, then `TAGSHIP_*` variables.
fn load_config(workdir: &Path, explicit: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match explicit {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::load_or_default(&workdir.join(CONFIG_FILE))
            .context("Failed to load config")?,
    };
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid configuration in environment")?;
    Ok(config)
}

/// Full refs carry their kind; short names default to tags.
fn resolve_trigger(reference: &str, kind: Option<RefKind>) -> Result<TriggerEvent> {
    let reference = reference.trim();
    if reference.is_empty() {
        bail!("empty ref");
    }
    if reference.starts_with("refs/") {
        return TriggerEvent::from_git_ref(reference)
            .with_context(|| format!("unsupported ref namespace: {reference}"));
    }
    Ok(TriggerEvent::new(reference, kind.unwrap_or(RefKind::Tag)))
}

fn ledger_for(workdir: &Path, config: &PipelineConfig) -> Result<FsRunLedger> {
    let dir = if config.ledger_dir.is_absolute() {
        config.ledger_dir.clone()
    } else {
        workdir.join(&config.ledger_dir)
    };
    FsRunLedger::new(&dir).with_context(|| format!("Failed to open run ledger {}", dir.display()))
}

fn publisher_for(workdir: &Path, config: &PipelineConfig) -> Result<Arc<dyn ReleasePublisher>> {
    Ok(match config.publish.backend {
        PublishBackend::Github => Arc::new(
            GitHubReleasePublisher::new(GitHubConfig::from_publish_config(&config.publish))
                .context("Failed to create GitHub client")?,
        ),
        PublishBackend::Filesystem => {
            let root = config
                .publish
                .fs_root
                .as_ref()
                .context("publish.fs_root is required for the filesystem backend")?;
            let root = if root.is_absolute() {
                root.clone()
            } else {
                workdir.join(root)
            };
            Arc::new(FsReleasePublisher::new(root))
        }
    })
}

async fn cmd_run(
    reference: &str,
    kind: Option<RefKind>,
    workdir: &Path,
    config_path: Option<&Path>,
    flags: RunFlags,
) -> Result<ExitCode> {
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("Working directory {} not found", workdir.display()))?;

    let mut config = load_config(&workdir, config_path)?;
    flags.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let trigger = resolve_trigger(reference, kind)?;
    let ledger = Arc::new(ledger_for(&workdir, &config)?);

    let stages = PipelineStages {
        provisioner: Arc::new(CommandProvisioner::new(config.environment.clone())),
        test_gate: Arc::new(CommandTestGate::new(config.test.clone())),
        builder: Arc::new(CommandPackageBuilder::new(config.build.clone())),
        publisher: publisher_for(&workdir, &config)?,
    };
    let classifier: Arc<dyn ReleaseClassifier> = if config.trigger.classify_prereleases {
        Arc::new(SuffixPrerelease)
    } else {
        Arc::new(AlwaysStable)
    };
    let matcher = matcher_for(&config)?;

    let pipeline = ReleasePipeline::new(stages, ledger)
        .with_matcher(matcher)
        .with_classifier(classifier)
        .with_timeouts(StageTimeouts::from_config(&config.timeouts))
        .with_config_digest(config.digest());

    let ctx = RunContext::new(&workdir)
        .with_output_dir(&config.build.output_dir)
        .with_env("TAGSHIP_REF", &trigger.ref_name);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                token.cancel();
            }
        });
    }

    info!(trigger = %trigger, workdir = %workdir.display(), "starting release run");
    let outcome = pipeline.run_with_cancel(trigger, ctx, token).await;

    let run_id = outcome
        .run_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    match (&outcome.release, &outcome.error) {
        (Some(release), _) => {
            println!("[{}] released {} ({} assets)", run_id, release.tag_name, release.assets.len());
            if let Some(url) = &release.url {
                println!("URL: {}", url);
            }
        }
        (None, Some(err)) => {
            println!("[{}] failed: {}", run_id, err);
        }
        (None, None) => {
            println!("[{}] nothing to release ({})", run_id, outcome.final_state);
        }
    }

    // Exit codes are 0..=4.
    Ok(ExitCode::from(outcome.exit_code() as u8))
}

/// Same matcher `run` uses, so `match` never disagrees with it.
fn matcher_for(config: &PipelineConfig) -> Result<TriggerMatcher> {
    TriggerMatcher::from_config(&config.trigger).context("Invalid tag pattern")
}

fn cmd_match(
    reference: &str,
    kind: Option<RefKind>,
    workdir: &Path,
    config_path: Option<&Path>,
    allow_prerelease: bool,
) -> Result<()> {
    let mut config = load_config(workdir, config_path)?;
    RunFlags {
        dry_run: None,
        allow_empty_tests: false,
        allow_prerelease_tags: allow_prerelease,
    }
    .apply(&mut config);

    let trigger = resolve_trigger(reference, kind)?;
    match matcher_for(&config)?.evaluate(&trigger) {
        MatchDecision::Proceed(version) => println!("proceed: {} ({})", trigger.ref_name, version),
        MatchDecision::Skip(reason) => println!("skip: {} ({})", trigger.ref_name, reason),
    }
    Ok(())
}

async fn cmd_runs_list(workdir: &Path, limit: usize) -> Result<()> {
    let config = load_config(workdir, None)?;
    let ledger = ledger_for(workdir, &config)?;
    let runs = ledger
        .list_runs(Some(limit))
        .await
        .context("Failed to list runs")?;

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in runs {
        let exit = run
            .summary
            .as_ref()
            .map(|s| s.exit_code.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<10} {:<6} {:<20} exit={}  {}",
            run.run_id.short(),
            run.status.to_string(),
            run.metadata.ref_kind,
            run.metadata.ref_name,
            exit,
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_runs_show(workdir: &Path, id: &str) -> Result<()> {
    let config = load_config(workdir, None)?;
    let ledger = ledger_for(workdir, &config)?;
    let run_id = RunId(id.to_string());
    let record = ledger
        .get_run(&run_id)
        .await
        .with_context(|| format!("Run {id} not found"))?;
    let events = ledger
        .get_events(&run_id)
        .await
        .context("Failed to read run events")?;

    let doc = serde_json::json!({
        "run": record,
        "events": events,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn cmd_config(workdir: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(workdir, config_path)?;
    config.validate().context("Invalid configuration")?;
    println!("{}", toml::to_string_pretty(&config)?);
    println!("# digest: {}", config.digest());
    Ok(())
}
