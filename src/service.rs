//! Session `DBus` control surface.
//!
//! The daemon exports [`DaemonInterface`] on the session bus. Method calls
//! are forwarded to the event loop as [`Request`]s, so they are serialized
//! with the schedule tick. State changes are re-emitted as the
//! `StateChanged` signal for tray applets and status bars.

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use zbus::Connection;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::Type;

use crate::controller::Status;
use crate::daemon::Command;
use crate::daemon::Request;
use crate::period::TimeOfDay;
use crate::period::Window;

/// Well-known bus name owned by the running daemon.
pub const SERVICE_NAME: &str = "org.keepwaked.Daemon";
pub const OBJECT_PATH: &str = "/org/keepwaked/Daemon";
pub const INTERFACE_NAME: &str = "org.keepwaked.Daemon1";

/// Status as it travels over the bus.
///
/// `start` and `end` are empty unless the mode is `scheduled`.
/// `manual_armed` drives a "prevent idle" checkmark; it stays false while a
/// schedule owns the armed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct StatusReply {
    pub mode: String,
    pub armed: bool,
    pub manual_armed: bool,
    pub start: String,
    pub end: String,
}

impl From<&Status> for StatusReply {
    fn from(status: &Status) -> Self {
        let (start, end) = match status.mode.window() {
            Some(window) => (window.start.to_string(), window.end.to_string()),
            None => (String::new(), String::new()),
        };

        Self {
            mode: status.mode.as_str().to_string(),
            armed: status.armed,
            manual_armed: status.manual_armed(),
            start,
            end,
        }
    }
}

impl std::fmt::Display for StatusReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.armed { "armed" } else { "disarmed" };
        if self.start.is_empty() {
            write!(f, "{} ({})", self.mode, state)
        } else {
            write!(f, "{} {}-{} ({})", self.mode, self.start, self.end, state)
        }
    }
}

/// Object served at [`OBJECT_PATH`].
pub struct DaemonInterface {
    requests: mpsc::Sender<Request>,
    shutdown: CancellationToken,
}

impl DaemonInterface {
    pub fn new(requests: mpsc::Sender<Request>, shutdown: CancellationToken) -> Self {
        Self { requests, shutdown }
    }

    async fn dispatch(&self, command: Command) -> fdo::Result<StatusReply> {
        let (request, reply) = Request::new(command);

        self.requests
            .send(request)
            .await
            .map_err(|_| fdo::Error::Failed("Daemon is shutting down".to_string()))?;

        let status = reply
            .await
            .map_err(|_| fdo::Error::Failed("Daemon dropped the request".to_string()))?;

        Ok(StatusReply::from(&status))
    }
}

#[interface(name = "org.keepwaked.Daemon1")]
impl DaemonInterface {
    /// Toggle manual idle prevention. Leaves scheduled mode if active.
    async fn toggle_manual(&self) -> fdo::Result<StatusReply> {
        self.dispatch(Command::ToggleManual).await
    }

    /// Enter scheduled mode with a daily window.
    async fn set_schedule(&self, start: &str, end: &str) -> fdo::Result<StatusReply> {
        let window = parse_window(start, end).map_err(fdo::Error::InvalidArgs)?;
        self.dispatch(Command::ToggleScheduled(Some(window))).await
    }

    /// Leave scheduled mode and allow idle.
    async fn cancel_schedule(&self) -> fdo::Result<StatusReply> {
        self.dispatch(Command::ToggleScheduled(None)).await
    }

    async fn status(&self) -> fdo::Result<StatusReply> {
        self.dispatch(Command::Status).await
    }

    /// Stop the daemon; idle is allowed again before it exits.
    async fn quit(&self) {
        info!("Quit requested over DBus");
        self.shutdown.cancel();
    }

    #[zbus(signal)]
    async fn state_changed(emitter: &SignalEmitter<'_>, status: StatusReply) -> zbus::Result<()>;
}

fn parse_window(start: &str, end: &str) -> Result<Window, String> {
    let start: TimeOfDay = start.parse().map_err(|e| format!("start: {e}"))?;
    let end: TimeOfDay = end.parse().map_err(|e| format!("end: {e}"))?;
    Ok(Window::new(start, end))
}

/// Claim [`SERVICE_NAME`] on the session bus and serve the interface.
///
/// Fails if another instance already owns the name.
pub async fn serve(interface: DaemonInterface) -> Result<Connection> {
    let conn = zbus::connection::Builder::session()
        .context("Failed to connect to session DBus")?
        .name(SERVICE_NAME)
        .context("Invalid service name")?
        .serve_at(OBJECT_PATH, interface)
        .context("Failed to export DBus object")?
        .build()
        .await
        .map_err(|e| match e {
            zbus::Error::NameTaken => anyhow::anyhow!("Another instance is already running"),
            other => anyhow::Error::new(other).context("Failed to start DBus service"),
        })?;

    info!("Serving {} at {}", SERVICE_NAME, OBJECT_PATH);
    Ok(conn)
}

/// Re-emit controller state changes as `StateChanged` signals.
pub async fn spawn_signal_forwarder(
    conn: &Connection,
    mut updates: watch::Receiver<Status>,
) -> Result<()> {
    let iface = conn
        .object_server()
        .interface::<_, DaemonInterface>(OBJECT_PATH)
        .await
        .context("DBus interface not registered")?;

    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let status = StatusReply::from(&*updates.borrow_and_update());
            debug!("Emitting StateChanged: {}", status);

            if let Err(e) = DaemonInterface::state_changed(iface.signal_emitter(), status).await {
                warn!("Failed to emit StateChanged: {}", e);
            }
        }
    });

    Ok(())
}

/// Proxy for the running daemon's interface.
async fn proxy() -> Result<zbus::Proxy<'static>> {
    let conn = Connection::session()
        .await
        .context("Failed to connect to session DBus")?;

    zbus::Proxy::new(&conn, SERVICE_NAME, OBJECT_PATH, INTERFACE_NAME)
        .await
        .context("Failed to create daemon proxy")
}

/// Call a method on the running daemon.
pub async fn call<B>(method: &str, body: &B) -> Result<StatusReply>
where
    B: Serialize + Type,
{
    let reply: StatusReply = proxy()
        .await?
        .call(method, body)
        .await
        .with_context(|| format!("{method} failed (is keepwaked running?)"))?;

    Ok(reply)
}

/// Ask the running daemon to exit.
pub async fn quit() -> Result<()> {
    let (): () = proxy()
        .await?
        .call("Quit", &())
        .await
        .context("Quit failed (is keepwaked running?)")?;

    Ok(())
}
