//! Artificien CLI - Command-line host for the Artificien core
//!
//! Commands:
//! - refresh: Authorize and load metrics from a health export into the store
//! - show: Render the dashboard from the store
//! - features: Print the feature vector submitted for training
//! - train: Run one training cycle against the configured coordinator
//! - background: Simulate one background task invocation
//! - doctor: Diagnose configuration and store health

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use artificien::background::{InMemoryScheduler, TaskHandle};
use artificien::config::AppConfig;
use artificien::controller::{Alert, DashboardView, ScreenState};
use artificien::gateway::HealthDataGateway;
use artificien::store::STORE_SCHEMA_VERSION;
use artificien::{
    run_background_training, schedule_training_job, AppDataPreparer, ArtificienError,
    BackgroundOutcome, BackgroundTask, FilePreferenceStore, HealthDashboard, Presenter,
    PreferenceStore, PyGridClient, SnapshotHealthStore, TrainingOutcome, TrainingSession,
    APP_NAME, ARTIFICIEN_VERSION,
};
use tracing_subscriber::EnvFilter;

/// Artificien - Stage health metrics and train federated models on device
#[derive(Parser)]
#[command(name = "artificien")]
#[command(version = ARTIFICIEN_VERSION)]
#[command(about = "Stage health metrics and run federated training cycles", long_about = None)]
struct Cli {
    /// Config file (defaults to artificien.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize and load metrics from a health export
    Refresh {
        /// JSON health export standing in for the platform store
        #[arg(long)]
        health_export: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the dashboard from the store
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the feature vector
    Features,

    /// Run one training cycle against the coordinator
    Train,

    /// Simulate one background task invocation
    Background {
        /// JSON health export standing in for the platform store
        #[arg(long)]
        health_export: PathBuf,

        /// Expire the task after this many seconds
        #[arg(long)]
        expire_after_secs: Option<u64>,
    },

    /// Diagnose configuration and store health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("artificien=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliFailure> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ArtificienError::from)?;

    match cli.command {
        Commands::Refresh {
            health_export,
            json,
        } => runtime.block_on(cmd_refresh(&config, &health_export, json)),
        Commands::Show { json } => cmd_show(&config, json),
        Commands::Features => cmd_features(&config),
        Commands::Train => runtime.block_on(cmd_train(&config)),
        Commands::Background {
            health_export,
            expire_after_secs,
        } => runtime.block_on(cmd_background(&config, &health_export, expire_after_secs)),
        Commands::Doctor { json } => cmd_doctor(&config, cli.config.as_deref(), json),
    }
}

/// Prints alerts to stderr; the final view is printed by the command
struct TerminalPresenter;

impl Presenter for TerminalPresenter {
    fn render(&mut self, view: &DashboardView) {
        tracing::debug!(state = view.state.as_str(), "render");
    }

    fn alert(&mut self, alert: &Alert) {
        eprintln!("! {}: {}", alert.title, alert.message);
    }
}

fn open_store(config: &AppConfig) -> Result<FilePreferenceStore, ArtificienError> {
    FilePreferenceStore::open(&config.storage.preferences_path)
}

fn open_dashboard(
    config: &AppConfig,
    health_export: &Path,
) -> Result<HealthDashboard<SnapshotHealthStore, FilePreferenceStore, TerminalPresenter>, ArtificienError>
{
    let health = SnapshotHealthStore::from_path(health_export)?;
    let store = open_store(config)?;
    Ok(HealthDashboard::new(
        HealthDataGateway::new(health),
        store,
        TerminalPresenter,
    )
    .with_step_window(config.health.step_window_days))
}

fn pygrid_job(config: &AppConfig) -> Result<artificien::training::PyGridJob, ArtificienError> {
    let (url, token) = config.coordinator.credentials()?;
    let client = PyGridClient::new(url, token, config.coordinator.request_timeout())?;
    Ok(client.job(
        &config.coordinator.model_name,
        &config.coordinator.model_version,
    ))
}

async fn cmd_refresh(config: &AppConfig, health_export: &Path, json: bool) -> Result<(), CliFailure> {
    let mut dashboard = open_dashboard(config, health_export)?;

    if !dashboard.authorize().await? {
        return Err(ArtificienError::AuthorizationDenied(
            "health data access was not granted".to_string(),
        )
        .into());
    }
    let report = dashboard.refresh().await;

    print_view(&dashboard.view(), json)?;
    if report.is_complete() {
        Ok(())
    } else {
        Err(CliFailure::IncompleteRefresh(report.failures.len()))
    }
}

fn cmd_show(config: &AppConfig, json: bool) -> Result<(), CliFailure> {
    let store = open_store(config)?;
    let view = DashboardView::from_store(ScreenState::on_load(&store), &store);
    print_view(&view, json)
}

fn cmd_features(config: &AppConfig) -> Result<(), CliFailure> {
    let store = open_store(config)?;
    match AppDataPreparer::prepare(&store) {
        Some(features) => {
            println!("{}", serde_json::to_string(&features.to_array())?);
            Ok(())
        }
        None => {
            let missing: Vec<&str> = AppDataPreparer::missing_fields(&store)
                .iter()
                .map(|k| k.as_str())
                .collect();
            Err(ArtificienError::PreprocessingDataMissing(missing.join(", ")).into())
        }
    }
}

async fn cmd_train(config: &AppConfig) -> Result<(), CliFailure> {
    let mut store = open_store(config)?;
    let mut job = pygrid_job(config)?;

    let outcome = TrainingSession::run_cycle(&mut job, &mut store).await?;
    let summary = match outcome {
        TrainingOutcome::Completed { loss } => serde_json::json!({
            "status": "completed",
            "loss": loss,
        }),
        TrainingOutcome::Rejected { retry_after } => serde_json::json!({
            "status": "rejected",
            "retry_after_secs": retry_after.map(|d| d.as_secs()),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_background(
    config: &AppConfig,
    health_export: &Path,
    expire_after_secs: Option<u64>,
) -> Result<(), CliFailure> {
    // a launch always resubmits the task request
    let scheduler = InMemoryScheduler::new();
    let request = config.background.task_request();
    schedule_training_job(&scheduler, &request);

    let mut dashboard = open_dashboard(config, health_export)?;
    // the snapshot store keeps no consent decision between processes
    dashboard.authorize().await?;
    let mut job = pygrid_job(config)?;
    let (task, handle) = BackgroundTask::new(request.identifier.clone());

    let run = run_background_training(&mut dashboard, &mut job, task);
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        // the run observes the expiry and winds down
        () = expire_after(&handle, expire_after_secs) => run.await,
    };
    let success = handle.completion().await.unwrap_or(false);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "task": request.identifier,
            "success": success,
        }))?
    );

    match outcome {
        BackgroundOutcome::Trained { .. } => Ok(()),
        BackgroundOutcome::Rejected { retry_after } => {
            Err(ArtificienError::JobRejected { retry_after }.into())
        }
        BackgroundOutcome::Failed(e) => Err(e.into()),
        BackgroundOutcome::Expired => {
            Err(ArtificienError::Cancelled("background task expired".to_string()).into())
        }
    }
}

async fn expire_after(handle: &TaskHandle, secs: Option<u64>) {
    match secs {
        Some(secs) => {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            handle.expire();
        }
        None => std::future::pending().await,
    }
}

fn cmd_doctor(config: &AppConfig, config_path: Option<&Path>, json: bool) -> Result<(), CliFailure> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", APP_NAME, ARTIFICIEN_VERSION),
    });

    checks.push(DoctorCheck {
        name: "config".to_string(),
        status: CheckStatus::Ok,
        message: match config_path {
            Some(path) => format!("Loaded {}", path.display()),
            None => "Defaults and environment".to_string(),
        },
    });

    checks.push(match config.coordinator.credentials() {
        Ok((url, _)) => DoctorCheck {
            name: "coordinator".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} ({} {})",
                url, config.coordinator.model_name, config.coordinator.model_version
            ),
        },
        Err(e) => DoctorCheck {
            name: "coordinator".to_string(),
            status: CheckStatus::Warning,
            message: format!("{e}; training is disabled"),
        },
    });

    let preferences_path = &config.storage.preferences_path;
    checks.push(if preferences_path.exists() {
        match open_store(config) {
            Ok(store) => {
                let present = artificien::MetricKey::ALL
                    .iter()
                    .filter(|k| store.get(**k).is_some())
                    .count();
                DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} metrics stored (schema v{})",
                        present, STORE_SCHEMA_VERSION
                    ),
                }
            }
            Err(e) => DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot open {}: {}", preferences_path.display(), e),
            },
        }
    } else {
        DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist yet", preferences_path.display()),
        }
    });

    let request = config.background.task_request();
    checks.push(DoctorCheck {
        name: "background".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "{} (external power: {}, network: {})",
            request.identifier, request.requires_external_power, request.requires_network_connectivity
        ),
    });

    let report = DoctorReport {
        producer: APP_NAME.to_string(),
        version: ARTIFICIEN_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Artificien Doctor Report");
        println!("========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CliFailure::DoctorFailed)
    } else {
        Ok(())
    }
}

fn print_view(view: &DashboardView, json: bool) -> Result<(), CliFailure> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
        return Ok(());
    }

    let missing = "-".to_string();
    println!("Health Data ({})", view.state.as_str());
    println!("  Status:         {}", view.authorized_status);
    println!("  Age:            {}", view.age.as_ref().unwrap_or(&missing));
    println!("  Biological sex: {}", view.biological_sex.as_ref().unwrap_or(&missing));
    println!("  Blood type:     {}", view.blood_type.as_ref().unwrap_or(&missing));
    println!("  Weight:         {}", view.weight.as_ref().unwrap_or(&missing));
    println!("  Height:         {}", view.height.as_ref().unwrap_or(&missing));
    println!("  BMI:            {}", view.body_mass_index.as_ref().unwrap_or(&missing));
    println!("  Steps (window): {}", view.step_count.as_ref().unwrap_or(&missing));
    println!("  Training:       {}", view.training_result.as_ref().unwrap_or(&missing));
    Ok(())
}

// Error types

#[derive(Debug)]
enum CliFailure {
    Artificien(ArtificienError),
    IncompleteRefresh(usize),
    DoctorFailed,
}

impl From<ArtificienError> for CliFailure {
    fn from(e: ArtificienError) -> Self {
        CliFailure::Artificien(e)
    }
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Artificien(e.into())
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            message,
            hint: hint.map(|h| h.to_string()),
        }
    }
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::IncompleteRefresh(count) => CliError::new(
                "INCOMPLETE_REFRESH",
                format!("{count} metric loads failed"),
                Some("Check the alerts above and the health export contents"),
            ),
            CliFailure::DoctorFailed => CliError::new(
                "DOCTOR_FAILED",
                "One or more health checks failed".to_string(),
                Some("Review the doctor report for details"),
            ),
            CliFailure::Artificien(e) => {
                let message = e.to_string();
                match e {
                    ArtificienError::PlatformUnavailable
                    | ArtificienError::TypeUnavailable(_)
                    | ArtificienError::AuthorizationDenied(_)
                    | ArtificienError::SampleNotFound(_) => CliError::new(
                        "HEALTH_DATA_ERROR",
                        message,
                        Some("Check the health export and its consent decision"),
                    ),
                    ArtificienError::ConnectionFailure(_) => CliError::new(
                        "CONNECTION_ERROR",
                        message,
                        Some("Check coordinator.url and network connectivity"),
                    ),
                    ArtificienError::PreprocessingDataMissing(_) => CliError::new(
                        "MISSING_DATA",
                        message,
                        Some("Run 'artificien refresh' first"),
                    ),
                    ArtificienError::TrainingExecutionFault(_) => {
                        CliError::new("TRAINING_ERROR", message, None)
                    }
                    ArtificienError::JobRejected { .. } => CliError::new(
                        "JOB_REJECTED",
                        message,
                        Some("Retry after the suggested delay"),
                    ),
                    ArtificienError::JsonError(_) => {
                        CliError::new("JSON_ERROR", message, Some("Check JSON syntax"))
                    }
                    ArtificienError::Io(_) => CliError::new(
                        "IO_ERROR",
                        message,
                        Some("Check file paths and permissions"),
                    ),
                    ArtificienError::StorageError(_) => CliError::new(
                        "STORAGE_ERROR",
                        message,
                        Some("Check storage.preferences_path"),
                    ),
                    ArtificienError::ConfigError(_) => CliError::new(
                        "CONFIG_ERROR",
                        message,
                        Some("Set ARTIFICIEN__COORDINATOR__URL and ARTIFICIEN__COORDINATOR__AUTH_TOKEN or edit artificien.toml"),
                    ),
                    ArtificienError::Cancelled(_) => CliError::new("CANCELLED", message, None),
                }
            }
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
