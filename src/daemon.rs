//! Daemon event loop.
//!
//! One task owns the [`Controller`] and serializes everything that touches
//! it: user commands arriving over the request channel and the periodic
//! schedule tick. Cancelling the loop token stops the tick and releases the
//! OS hold before the loop returns.

use std::time::Duration;

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::clock::Clock;
use crate::config::Config;
use crate::controller::Controller;
use crate::controller::Status;
use crate::period::Window;

/// User action forwarded to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleManual,
    /// A collected window, or `None` when the prompt was cancelled.
    ToggleScheduled(Option<Window>),
    Status,
}

/// A command plus the channel its resulting status is sent back on.
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub reply: oneshot::Sender<Status>,
}

impl Request {
    pub fn new(command: Command) -> (Self, oneshot::Receiver<Status>) {
        let (reply, rx) = oneshot::channel();
        (Self { command, reply }, rx)
    }
}

/// Startup knobs for [`run_event_loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    /// Perform one manual toggle before the first tick.
    pub arm_on_start: bool,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            arm_on_start: config.arm_on_start,
        }
    }
}

/// Drive the controller until `shutdown` is cancelled or every request
/// sender is gone, then release the OS hold.
///
/// Returns the controller so callers can inspect its final state.
pub async fn run_event_loop(
    mut controller: Controller,
    clock: Box<dyn Clock>,
    settings: LoopSettings,
    mut requests: mpsc::Receiver<Request>,
    shutdown: CancellationToken,
) -> Controller {
    if settings.arm_on_start {
        info!("Arming on start");
        controller.toggle_manual().await;
    }

    let mut ticker = tokio::time::interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Event loop started, ticking every {:?}", settings.tick_interval);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("Shutdown requested");
                break;
            }

            request = requests.recv() => {
                let Some(request) = request else {
                    warn!("Request channel closed");
                    break;
                };
                let status = handle_command(&mut controller, request.command).await;
                if request.reply.send(status).is_err() {
                    debug!("Requester went away before the reply");
                }
            }

            _ = ticker.tick() => {
                controller.on_tick(clock.now()).await;
            }
        }
    }

    controller.shutdown().await;
    controller
}

async fn handle_command(controller: &mut Controller, command: Command) -> Status {
    match command {
        Command::ToggleManual => controller.toggle_manual().await,
        Command::ToggleScheduled(window) => controller.toggle_scheduled(window).await,
        Command::Status => {}
    }
    controller.status()
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown: CancellationToken) -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = interrupt.recv() => info!("Received SIGINT"),
            () = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });

    Ok(())
}
