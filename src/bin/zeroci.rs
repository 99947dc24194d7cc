use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;
use zeroci::prelude::*;
use zeroci::RunSummary;

#[derive(Parser)]
#[command(name = "zeroci")]
#[command(about = "Continuous-integration orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the server configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the CI file of a pushed commit
    Trigger {
        #[arg(long)]
        repo: String,

        #[arg(long)]
        branch: String,

        #[arg(long)]
        commit: String,

        #[arg(long)]
        committer: String,

        /// Who or what started the run
        #[arg(long)]
        triggered_by: Option<String>,

        /// Binary release produced by this run
        #[arg(long)]
        bin_release: Option<String>,
    },

    /// Run scheduled jobs concurrently
    Schedule {
        /// Schedule files or directories of schedule files
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        triggered_by: Option<String>,
    },

    /// Run an ad-hoc project from a CI file
    Project {
        #[arg(long)]
        name: String,

        /// Path to the CI file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long)]
        triggered_by: Option<String>,
    },

    /// Show a stored run with its results
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List stored runs, newest first
    Runs(RunsArgs),

    /// List live and deleted branches of a repository
    Branches {
        #[arg(long)]
        repo: String,
    },

    /// Show the status badge of a branch or schedule
    Badge {
        #[arg(long, conflicts_with = "schedule", required_unless_present = "schedule")]
        repo: Option<String>,

        /// Defaults to master
        #[arg(long, requires = "repo")]
        branch: Option<String>,

        #[arg(long)]
        schedule: Option<String>,
    },

    /// Validate a CI file without running it
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Args)]
struct RunsArgs {
    /// Repository, together with --branch
    #[arg(long, requires = "branch", conflicts_with_all = ["schedule", "project"])]
    repo: Option<String>,

    #[arg(long, requires = "repo")]
    branch: Option<String>,

    #[arg(long, conflicts_with = "project")]
    schedule: Option<String>,

    #[arg(long)]
    project: Option<String>,
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let filter = if verbose { "zeroci=debug" } else { "zeroci=info" };

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
        .expect("Failed to create OTLP exporter");

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("zeroci");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
}

#[cfg(not(feature = "otel"))]
fn init_tracing(verbose: bool) {
    let filter = if verbose { "zeroci=debug" } else { "zeroci=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    init_otel_tracing(cli.verbose);

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "zeroci failed");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Trigger {
            repo,
            branch,
            commit,
            committer,
            triggered_by,
            bin_release,
        } => {
            let mut request = RunRequest::triggered(repo, branch, commit, committer);
            if let Some(actor) = triggered_by {
                request = request.triggered_by(actor);
            }
            if let Some(release) = bin_release {
                request = request.bin_release(release);
            }
            run_one(&config, request).await
        }
        Commands::Schedule {
            files,
            triggered_by,
        } => run_schedules(&config, &files, triggered_by).await,
        Commands::Project {
            name,
            file,
            triggered_by,
        } => {
            let ci_config = ConfigLoader::load_ci_config(&file)?;
            let mut request = RunRequest::project(name, ci_config);
            if let Some(actor) = triggered_by {
                request = request.triggered_by(actor);
            }
            run_one(&config, request).await
        }
        Commands::Show { id } => show(&config, RunId::from(id.as_str())).await,
        Commands::Runs(args) => list_runs(&config, args).await,
        Commands::Branches { repo } => branches(&config, &repo).await,
        Commands::Badge {
            repo,
            branch,
            schedule,
        } => {
            let subject = match (repo, schedule) {
                (Some(repo), _) => BadgeSubject::Branch { repo, branch },
                (None, Some(schedule)) => BadgeSubject::Schedule(schedule),
                (None, None) => anyhow::bail!("badge needs --repo or --schedule"),
            };
            badge(&config, &subject).await
        }
        Commands::Validate { file } => validate(&file),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => Ok(ConfigLoader::load_server_config(path)?),
        None => Ok(ServerConfig::default()),
    }
}

async fn pipeline(config: &ServerConfig) -> anyhow::Result<Pipeline> {
    let (context, _bus) = CiContext::from_server_config(config).await?;
    Ok(Pipeline::new(context))
}

async fn status_api(config: &ServerConfig) -> anyhow::Result<StatusApi> {
    let (context, _bus) = CiContext::from_server_config(config).await?;
    Ok(StatusApi::new(
        context.store,
        context.vcs,
        config.repos.clone(),
        config.domain.clone(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_one(config: &ServerConfig, request: RunRequest) -> anyhow::Result<bool> {
    let outcome = pipeline(config).await?.submit(request).await?;
    print_outcome(&outcome, &config.domain);
    Ok(outcome.run.status == RunStatus::Success)
}

async fn run_schedules(
    config: &ServerConfig,
    paths: &[PathBuf],
    triggered_by: Option<String>,
) -> anyhow::Result<bool> {
    let mut schedules: Vec<ScheduleDefinition> = Vec::new();
    for path in paths {
        if path.is_dir() {
            schedules.extend(ConfigLoader::load_schedule_directory(path)?);
        } else {
            schedules.push(ConfigLoader::load_schedule(path)?);
        }
    }

    let requests = schedules
        .into_iter()
        .map(|schedule| {
            let request = RunRequest::scheduled(schedule.name, schedule.config);
            match &triggered_by {
                Some(actor) => request.triggered_by(actor.clone()),
                None => request,
            }
        })
        .collect();

    let mut all_passed = true;
    for result in pipeline(config).await?.submit_all(requests).await {
        let outcome = result?;
        print_outcome(&outcome, &config.domain);
        all_passed &= outcome.run.status == RunStatus::Success;
    }
    Ok(all_passed)
}

fn print_outcome(outcome: &PipelineOutcome, domain: &str) {
    let run = &outcome.run;
    let icon = match run.status {
        RunStatus::Success => "✓",
        RunStatus::Failure => "✗",
        _ => "!",
    };

    println!("\n=== Run {} ===\n", run.id);
    println!("{} {}", icon, run.status);
    println!("Link: {}\n", run.link(domain));
    for entry in &run.result {
        println!("  [{}] {}", entry.status, entry.name);
    }
    if outcome.ended_early() {
        println!("\nRun stopped before testing");
    }
}

async fn show(config: &ServerConfig, id: RunId) -> anyhow::Result<bool> {
    let (context, _bus) = CiContext::from_server_config(config).await?;
    let run = context.store.get(&id).await?;
    print_json(&run)?;
    Ok(true)
}

async fn list_runs(config: &ServerConfig, args: RunsArgs) -> anyhow::Result<bool> {
    let api = status_api(config).await?;
    let runs: Vec<RunSummary> = match (args.repo, args.branch, args.schedule, args.project) {
        (Some(repo), Some(branch), _, _) => api.branch_runs(&repo, &branch).await?,
        (_, _, Some(schedule), _) => api.schedule_runs(&schedule).await?,
        (_, _, _, Some(project)) => api.project_runs(&project).await?,
        _ => anyhow::bail!("runs needs --repo with --branch, --schedule or --project"),
    };
    print_json(&runs)?;
    Ok(true)
}

async fn branches(config: &ServerConfig, repo: &str) -> anyhow::Result<bool> {
    let branches = status_api(config).await?.branches(repo).await?;
    print_json(&branches)?;
    Ok(true)
}

async fn badge(config: &ServerConfig, subject: &BadgeSubject) -> anyhow::Result<bool> {
    match status_api(config).await?.badge(subject).await? {
        Some(badge) => {
            print_json(&badge)?;
            Ok(badge.passing)
        }
        None => {
            println!("No finished runs");
            Ok(false)
        }
    }
}

fn validate(file: &Path) -> anyhow::Result<bool> {
    let config = ConfigLoader::load_ci_config(file)?;
    let commented = config.test_steps.iter().filter(|s| zeroci::ci::is_comment(s)).count();

    println!("✓ {} is valid", file.display());
    println!("  install steps: {}", config.install_steps.len());
    println!(
        "  test steps: {} ({} commented out)",
        config.test_steps.len(),
        commented
    );
    if let Some(image) = config.prerequisites.image_name() {
        println!("  image: {}", image);
    }
    Ok(true)
}
