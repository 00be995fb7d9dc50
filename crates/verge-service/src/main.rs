//! Verge Service: VPN session controller
//!
//! Main entry point. Initializes the global allocator, the diagnostic log
//! and logging, builds the service context and drives the session from
//! line commands on stdin.

mod platform;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use platform::{HostForeground, HostPlatform, LogStatusSink};
use std::io::{self, BufRead};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use verge_config::{ConfigValidator, PreferenceStore, ServicePaths, ServiceSettings, SessionParams};
use verge_log::{DiagnosticLayer, DiagnosticLog, LogPolicy};
use verge_vpn::{
    BootBroadcast, BootTrigger, ControlApiClient, EventBus, NetworkTrigger, SessionEvent,
    SessionOrchestrator, SessionTiming, StatusAction, TunnelController, spawn_dispatcher,
};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "verge-service", version, about = "Clash Verge VPN session controller")]
struct Cli {
    /// Directory holding logs, config, preferences and settings
    #[arg(long, env = "VERGE_BASE_DIR", default_value = "verge-data")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session controller, reading commands from stdin
    Run {
        /// Start a session immediately
        #[arg(long)]
        connect: bool,
        /// Upstream server for the session started by --connect
        #[arg(long, default_value = "127.0.0.1")]
        server: String,
        #[arg(long, default_value_t = 7897)]
        port: u16,
        /// DNS servers pushed into the tunnel (repeatable)
        #[arg(long = "dns", default_values = ["8.8.8.8", "8.8.4.4"])]
        dns: Vec<IpAddr>,
        /// Engine config document; defaults to <base-dir>/config/config.yaml
        #[arg(long)]
        config: Option<PathBuf>,
        /// Start even if the config document cannot be validated
        #[arg(long)]
        tolerate_invalid_config: bool,
    },
    /// Check and repair an engine config document
    Validate { path: PathBuf },
    /// Concatenate all diagnostic logs into one file
    ExportLogs { destination: PathBuf },
    /// Delete all diagnostic logs
    ClearLogs,
}

/// Everything the process owns, constructed once here and passed down.
struct ServiceContext {
    paths: ServicePaths,
    preferences: PreferenceStore,
    platform: Arc<HostPlatform>,
    bus: EventBus,
    orchestrator: Arc<SessionOrchestrator>,
}

impl ServiceContext {
    fn build(paths: ServicePaths, settings: &ServiceSettings, config_path: &Path) -> Self {
        let preferences = PreferenceStore::new(paths.preferences());
        let platform = Arc::new(HostPlatform::default());
        let engine = Arc::new(
            ControlApiClient::from_config(config_path, settings.engine_timeout())
                .with_dial_host(settings.controller_host.clone()),
        );
        let tunnel = Arc::new(TunnelController::new(
            platform.clone(),
            engine.clone(),
            Arc::new(HostForeground::default()),
            settings.package_name.clone(),
            settings.engine_timeout(),
        ));
        let bus = EventBus::new();
        let orchestrator = Arc::new(SessionOrchestrator::new(
            tunnel,
            engine,
            Arc::new(LogStatusSink),
            preferences.clone(),
            bus.clone(),
            SessionTiming::from(settings),
        ));

        Self {
            paths,
            preferences,
            platform,
            bus,
            orchestrator,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = ServicePaths::new(&cli.base_dir);
    let settings = ServiceSettings::load(&paths.settings())?;

    let log = DiagnosticLog::initialize(
        &paths.base,
        LogPolicy {
            max_file_bytes: settings.log_max_file_bytes,
            max_files: settings.log_max_files,
        },
    )?;
    init_tracing(log.clone());

    match cli.command {
        Command::Run {
            connect,
            server,
            port,
            dns,
            config,
            tolerate_invalid_config,
        } => {
            let config = config.unwrap_or_else(|| paths.default_config());
            let mut params = SessionParams::new(server, port, dns).with_config(&config);
            if tolerate_invalid_config {
                params = params.tolerating_invalid_config();
            }
            run(paths, &settings, params, connect)
        }
        Command::Validate { path } => validate(&path),
        Command::ExportLogs { destination } => {
            let count = log.export_all(&destination)?;
            println!("Exported {} log files to {}", count, destination.display());
            Ok(())
        }
        Command::ClearLogs => {
            let count = log.clear_all()?;
            println!("Deleted {} log files", count);
            Ok(())
        }
    }
}

fn init_tracing(log: Arc<DiagnosticLog>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(console)
        .with(DiagnosticLayer::new(log))
        .init();
}

fn run(
    paths: ServicePaths,
    settings: &ServiceSettings,
    params: SessionParams,
    connect: bool,
) -> Result<()> {
    info!("Verge service starting (base: {})", paths.base.display());

    let config_path = params
        .config_path
        .clone()
        .unwrap_or_else(|| paths.default_config());
    ConfigValidator::ensure_default(&config_path)?;

    let runtime = Runtime::new().context("failed to start async runtime")?;
    let context = ServiceContext::build(paths, settings, &config_path);
    context
        .preferences
        .update(|p| p.active_config_path = Some(config_path.clone()))?;

    context.orchestrator.present_initial();
    let dispatcher = spawn_dispatcher(
        context.orchestrator.clone(),
        context.bus.subscribe(),
        runtime.handle().clone(),
    )?;

    if connect {
        match runtime.block_on(context.orchestrator.start(params)) {
            Ok(report) => info!("Session started: {:?}", report.outcome),
            Err(e) => error!("Session start failed: {}", e),
        }
    }

    read_commands(&context, runtime.handle());

    if dispatcher.join().is_err() {
        error!("Event dispatch thread panicked");
    }
    info!(
        "Verge service shutting down (logs in {})",
        context.paths.logs_dir().display()
    );
    Ok(())
}

/// Line commands on stdin. EOF behaves like `quit`.
fn read_commands(context: &ServiceContext, runtime: &Handle) {
    let boot = BootTrigger::new(context.preferences.clone(), context.bus.clone());
    let network = NetworkTrigger::new(context.preferences.clone(), context.bus.clone());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => {}
            "connect" => {
                context.bus.publish(SessionEvent::Action(StatusAction::Connect));
            }
            "disconnect" => {
                context.bus.publish(SessionEvent::Action(StatusAction::Disconnect));
            }
            "tile" => {
                context.bus.publish(SessionEvent::TileClicked);
            }
            "revoke" => {
                context.bus.publish(SessionEvent::Revoked);
            }
            "deny" => context.platform.set_permission(false),
            "grant" => context.platform.set_permission(true),
            "net up" => {
                network.on_connectivity_changed(true);
            }
            "net down" => {
                network.on_connectivity_changed(false);
            }
            command if command.starts_with("broadcast ") => {
                let action = command.trim_start_matches("broadcast ").trim();
                match BootBroadcast::from_action(action) {
                    Some(broadcast) => {
                        boot.on_broadcast(broadcast);
                    }
                    None => warn!("Unknown broadcast: {}", action),
                }
            }
            "boot" => {
                boot.on_broadcast(BootBroadcast::BootCompleted);
            }
            "status" => {
                let status = runtime.block_on(context.orchestrator.current_status());
                println!(
                    "{:?} connected={} up={} down={}",
                    status.state,
                    status.is_connected(),
                    verge_vpn::format_rate(status.view.upload_rate),
                    verge_vpn::format_rate(status.view.download_rate)
                );
            }
            "quit" | "exit" => break,
            other => warn!("Unknown command: {}", other),
        }
    }

    context.bus.publish(SessionEvent::Shutdown);
}

fn validate(path: &Path) -> Result<()> {
    let valid = ConfigValidator::validate_and_fix(path);
    let fields = ConfigValidator::check_required_fields(path);
    let address = ConfigValidator::extract_control_address(path);

    for (field, present) in fields.iter() {
        println!("{:<20} {}", field, if present { "present" } else { "missing" });
    }
    println!("{:<20} {}", "control api", address);

    if !valid {
        anyhow::bail!("{} is not a valid config document", path.display());
    }
    if !fields.all_present() {
        warn!("Missing fields: {:?}", fields.missing());
    }
    Ok(())
}
