//! keepwaked - keep the display awake, manually or on a daily schedule.
//!
//! `keepwaked` (or `keepwaked run`) starts the daemon. The other
//! subcommands talk to a running daemon over the session bus.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use keepwaked::clock::LocalClock;
use keepwaked::config::Config;
use keepwaked::controller::Controller;
use keepwaked::daemon;
use keepwaked::daemon::LoopSettings;
use keepwaked::period::TimeOfDay;
use keepwaked::power::DryRunPower;
use keepwaked::power::LogindInhibitor;
use keepwaked::power::PowerControl;
use keepwaked::service;
use keepwaked::service::DaemonInterface;
use keepwaked::service::StatusReply;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Keep the display awake, manually or during a daily window.
#[derive(Parser, Debug)]
#[command(name = "keepwaked")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (log power requests instead of inhibiting).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (default).
    Run,

    /// Toggle manual idle prevention. Leaves scheduled mode if active.
    Toggle,

    /// Prevent idle every day between START and END (HH:MM).
    Schedule {
        #[arg(default_value = "12:00")]
        start: TimeOfDay,

        #[arg(default_value = "13:00")]
        end: TimeOfDay,
    },

    /// Leave scheduled mode and allow idle.
    Cancel,

    /// Show the daemon's current state.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Stop the daemon.
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mut config = Config::load_or_default(args.config.as_deref())
                .context("Failed to load configuration")?;
            if args.dry_run {
                config.dry_run = true;
            }
            info!("Configuration loaded (dry_run={})", config.dry_run);

            run_daemon(config).await
        }
        Command::Toggle => print_reply(&service::call("ToggleManual", &()).await?, false),
        Command::Schedule { start, end } => {
            let body = (start.to_string(), end.to_string());
            print_reply(&service::call("SetSchedule", &body).await?, false)
        }
        Command::Cancel => print_reply(&service::call("CancelSchedule", &()).await?, false),
        Command::Status { json } => print_reply(&service::call("Status", &()).await?, json),
        Command::Quit => service::quit().await,
    }
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("keepwaked={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

fn print_reply(reply: &StatusReply, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(reply)?);
    } else {
        println!("{reply}");
    }
    Ok(())
}

/// Pick the power backend, falling back to dry-run when logind is unreachable.
async fn power_backend(config: &Config) -> Box<dyn PowerControl> {
    if config.dry_run {
        return Box::new(DryRunPower);
    }

    match LogindInhibitor::connect(config.inhibit_who.clone(), config.inhibit_why.clone()).await {
        Ok(inhibitor) => Box::new(inhibitor),
        Err(e) => {
            error!(
                "Failed to reach logind: {}. Power requests will only be logged.",
                e
            );
            Box::new(DryRunPower)
        }
    }
}

/// Run the daemon until SIGINT, SIGTERM or a `Quit` call.
async fn run_daemon(config: Config) -> Result<()> {
    info!("keepwaked v{} starting", env!("CARGO_PKG_VERSION"));

    let controller = Controller::new(power_backend(&config).await);
    let shutdown = CancellationToken::new();
    let (requests_tx, requests_rx) = mpsc::channel(16);

    let conn = service::serve(DaemonInterface::new(requests_tx, shutdown.clone())).await?;
    service::spawn_signal_forwarder(&conn, controller.subscribe()).await?;
    daemon::spawn_signal_handler(shutdown.clone()).context("Failed to install signal handlers")?;

    let controller = daemon::run_event_loop(
        controller,
        Box::new(LocalClock),
        LoopSettings::from(&config),
        requests_rx,
        shutdown,
    )
    .await;

    info!("Stopped ({})", controller.status());
    Ok(())
}
