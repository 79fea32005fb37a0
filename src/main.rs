use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use azmon::azure::{ArmClient, RemoteApi};
use azmon::bag::{ConfigBag, ConfigStore, FieldPath, ID_FIELD};
use azmon::config::{Settings, TOKEN_ENV_VAR};
use azmon::monitor::{
    ActionGroupKind, AutoscaleSettingKind, DiagnosticSettingKind, MetricAlertKind,
    ScheduledQueryRuleKind,
};
use azmon::reconciler::{Operation, ReconcileOptions, Reconciler, ResourceKind, Scope};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Reconcile Azure Monitor resources with a YAML description
#[derive(Parser, Debug)]
#[command(name = "azmon", version, about, long_about = None)]
struct Args {
    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Subscription to operate in (overrides the settings file)
    #[arg(long, global = true)]
    subscription: Option<String>,

    /// Management endpoint (overrides the settings file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the resource and record its state
    Create(Target),
    /// Refresh the recorded state from the remote resource
    Read(Target),
    /// Apply the configuration to an existing resource
    Update(Target),
    /// Delete the resource recorded in the state
    Delete(Target),
}

impl Command {
    fn parts(&self) -> (Operation, &Target) {
        match self {
            Command::Create(t) => (Operation::Create, t),
            Command::Read(t) => (Operation::Read, t),
            Command::Update(t) => (Operation::Update, t),
            Command::Delete(t) => (Operation::Delete, t),
        }
    }
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Resource family
    #[arg(long, value_enum)]
    kind: Kind,

    /// Resource configuration (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// State file (JSON); read for the resource id and rewritten with the
    /// result. Without it the state is printed to stdout.
    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    MetricAlert,
    ScheduledQueryRule,
    ActionGroup,
    DiagnosticSetting,
    AutoscaleSetting,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, err);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.to_string().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("azmon started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("azmon").join("azmon.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".azmon").join("azmon.log");
    }
    PathBuf::from("azmon.log")
}

/// Config values, with the persisted id carried over from the state file
fn load_bag(config: Option<&Path>, state: Option<&Path>) -> Result<ConfigBag> {
    let mut bag = match config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let value: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            ConfigBag::from_value(value).with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => ConfigBag::new(),
    };

    if let Some(path) = state.filter(|p| p.exists()) {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let persisted = ConfigBag::from_value(value)
            .with_context(|| format!("Invalid state {}", path.display()))?;

        if config.is_none() {
            return Ok(persisted);
        }
        if let Some(id) = persisted.id() {
            bag.set(&FieldPath::field(ID_FIELD), Value::String(id.to_string()))?;
        }
    }

    Ok(bag)
}

fn write_state(bag: ConfigBag, state: Option<&Path>) -> Result<()> {
    let content = serde_json::to_string_pretty(&bag.into_value())?;
    match state {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", content);
            Ok(())
        }
    }
}

async fn run<K: ResourceKind>(
    client: Arc<ArmClient>,
    scope: Scope,
    options: ReconcileOptions,
    cancel: CancellationToken,
    operation: Operation,
    bag: &mut ConfigBag,
) -> Result<()>
where
    ArmClient: RemoteApi<K>,
{
    let client: Arc<dyn RemoteApi<K>> = client;
    let reconciler = Reconciler::<K>::new(client, scope, options).with_cancellation(cancel);
    match operation {
        Operation::Create => reconciler.create(bag).await?,
        Operation::Read => reconciler.read(bag).await?,
        Operation::Update => reconciler.update(bag).await?,
        Operation::Delete => {
            reconciler.delete(bag).await?;
            bag.clear();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let settings = Settings::load();
    let subscription = args
        .subscription
        .clone()
        .or_else(|| settings.subscription_id.clone())
        .unwrap_or_default();
    let endpoint = args.endpoint.clone().unwrap_or_else(|| settings.endpoint.clone());
    let Some(token) = settings.effective_token() else {
        bail!(
            "No access token configured. Set access_token in {:?} or {}.",
            Settings::config_path().unwrap_or_default(),
            TOKEN_ENV_VAR
        );
    };

    let (operation, target) = args.command.parts();
    if matches!(operation, Operation::Create | Operation::Update) && target.config.is_none() {
        bail!("{} needs --config", operation);
    }
    if matches!(operation, Operation::Create) && subscription.is_empty() {
        bail!("No subscription configured. Pass --subscription or set subscription_id.");
    }

    let mut bag = load_bag(target.config.as_deref(), target.state.as_deref())?;

    let client = Arc::new(ArmClient::new(&endpoint, token)?);
    let scope = Scope::new(subscription);
    let options = settings.reconcile_options();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    tracing::info!("{} {:?}", operation, target.kind);
    let result = match target.kind {
        Kind::MetricAlert => {
            run::<MetricAlertKind>(client, scope, options, cancel, operation, &mut bag).await
        }
        Kind::ScheduledQueryRule => {
            run::<ScheduledQueryRuleKind>(client, scope, options, cancel, operation, &mut bag).await
        }
        Kind::ActionGroup => {
            run::<ActionGroupKind>(client, scope, options, cancel, operation, &mut bag).await
        }
        Kind::DiagnosticSetting => {
            run::<DiagnosticSettingKind>(client, scope, options, cancel, operation, &mut bag).await
        }
        Kind::AutoscaleSetting => {
            run::<AutoscaleSettingKind>(client, scope, options, cancel, operation, &mut bag).await
        }
    };

    if let Err(err) = &result {
        tracing::error!("{} failed: {:#}", operation, err);
    }
    result?;

    write_state(bag, target.state.as_deref())
}
