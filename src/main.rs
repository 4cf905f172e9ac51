//! Convergent CLI entrypoint.
//!
//! This is the main entrypoint for the convergent command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use convergent::cli::{Cli, Commands, OutputFormatter};
use convergent::cloud::{Cloud, LocalCloud};
use convergent::config::{ConfigParser, ConfigValidator, RunConfig, find_config_file};
use convergent::engine::TaskSet;
use convergent::error::Result;
use convergent::reconciler::{Reconciler, RunOutcome};
use convergent::resources::build_tasks;
use convergent::target::TargetKind;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_preflight() {
                eprintln!("The run was rejected before any task ran; nothing was changed.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over the verbosity flag.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan => {
            let session = Session::load(config_path).await?;
            let outcome = session.reconciler().plan().await?;
            finish(&formatter, &outcome)
        }
        Commands::Apply { yes } => cmd_apply(config_path, yes, &formatter).await,
        Commands::Render { format, out } => {
            let session = Session::load(config_path).await?;
            let out = Some(out.unwrap_or_else(|| session.config.output.dir.clone()));
            let outcome = session.reconciler().render(TargetKind::from(format), out).await?;
            finish(&formatter, &outcome)
        }
        Commands::Run => {
            let session = Session::load(config_path).await?;
            let outcome = session.reconciler().run_configured().await?;
            finish(&formatter, &outcome)
        }
        Commands::Drift => {
            let session = Session::load(config_path).await?;
            let report = session.reconciler().check_drift().await?;
            emit(&formatter.format_drift(&report))?;
            Ok(report.is_converged())
        }
        Commands::Addresses => {
            let session = Session::load(config_path).await?;
            let addresses = session.reconciler().discover_addresses().await?;
            emit(&formatter.format_addresses(&addresses))?;
            Ok(true)
        }
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&config, &result, show_warnings))?;
    Ok(result.errors.is_empty())
}

/// Apply changes, after showing the plan and asking for confirmation.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let session = Session::load(config_path).await?;
    let reconciler = session.reconciler();

    let plan = reconciler.plan().await?;
    if !plan.report.has_changes() {
        emit(&formatter.format_outcome(&plan))?;
        return Ok(plan.is_success());
    }

    if !auto_approve {
        emit(&formatter.format_outcome(&plan))?;
        eprint!("Do you want to apply these changes? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let outcome = reconciler.apply().await?;
    finish(formatter, &outcome)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a command needs to run the engine.
struct Session {
    config: RunConfig,
    tasks: TaskSet,
    cloud: Arc<dyn Cloud>,
    cancel: CancellationToken,
}

impl Session {
    /// Loads and validates the configuration, opens the local cloud and
    /// wires Ctrl-C to cancellation.
    async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let result = ConfigValidator::new().validate(&config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        let tasks = build_tasks(&config)?;
        let cloud = LocalCloud::open(&config.cloud.state_path).await?;
        debug!("Using local cloud at {}", cloud.path().display());

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight tasks");
                token.cancel();
            }
        });

        Ok(Self {
            config,
            tasks,
            cloud: Arc::new(cloud),
            cancel,
        })
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(&self.config, &self.tasks, self.cloud.clone())
            .with_cancellation(self.cancel.clone())
    }
}

/// Resolves, loads and applies environment overrides to the configuration.
fn load_config(config_path: Option<&Path>) -> Result<RunConfig> {
    let config_file: PathBuf =
        config_path.map_or_else(|| find_config_file("."), |p| Ok(p.to_path_buf()))?;
    info!("Using configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;
    parser.load_with_env(&config_file)
}

/// Writes the outcome and reports whether every task succeeded.
fn finish(formatter: &OutputFormatter, outcome: &RunOutcome) -> Result<bool> {
    emit(&formatter.format_outcome(outcome))?;
    Ok(outcome.is_success())
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    stdout.flush()?;
    Ok(())
}
