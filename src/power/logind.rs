//! systemd-logind inhibitor backend.
//!
//! Takes a `block` inhibitor lock through `org.freedesktop.login1.Manager`.
//! logind keeps the lock for as long as the returned file descriptor stays
//! open, so releasing is just dropping the fd. A crashed daemon never leaves
//! the session pinned awake.

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use zbus::Connection;
use zbus::zvariant::OwnedFd;

use super::ExecutionState;
use super::PowerControl;
use super::PowerError;

/// `DBus` service, path and interface for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";

/// Anything that can hand out an inhibitor lock fd for a `what` list.
#[async_trait]
pub trait InhibitSource: Send + Sync {
    async fn inhibit(&self, what: &str) -> Result<OwnedFd, PowerError>;
}

/// `Manager.Inhibit` on the system bus.
pub struct LogindManager {
    conn: Connection,

    /// Application name shown in `systemd-inhibit --list`.
    who: String,

    /// Human readable reason shown next to `who`.
    why: String,
}

#[async_trait]
impl InhibitSource for LogindManager {
    async fn inhibit(&self, what: &str) -> Result<OwnedFd, PowerError> {
        let proxy = zbus::Proxy::new(&self.conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
            .await?;

        let fd: OwnedFd = proxy
            .call("Inhibit", &(what, self.who.as_str(), self.why.as_str(), "block"))
            .await?;

        Ok(fd)
    }
}

/// Power backend holding at most one logind inhibitor lock.
pub struct LogindInhibitor<S = LogindManager> {
    source: S,

    /// Currently held lock, if armed.
    held: Option<HeldLock>,
}

struct HeldLock {
    what: String,
    _fd: OwnedFd,
}

impl LogindInhibitor<LogindManager> {
    /// Connect to the system bus.
    pub async fn connect(
        who: impl Into<String>,
        why: impl Into<String>,
    ) -> Result<Self, PowerError> {
        let conn = Connection::system().await?;
        info!("Connected to system DBus for logind inhibitors");

        Ok(Self::with_source(LogindManager {
            conn,
            who: who.into(),
            why: why.into(),
        }))
    }
}

impl<S: InhibitSource> LogindInhibitor<S> {
    pub fn with_source(source: S) -> Self {
        Self { source, held: None }
    }

    /// The `what` list of the held lock, if any.
    #[cfg(test)]
    fn held(&self) -> Option<&str> {
        self.held.as_ref().map(|lock| lock.what.as_str())
    }
}

#[async_trait]
impl<S: InhibitSource> PowerControl for LogindInhibitor<S> {
    async fn apply(&mut self, state: ExecutionState) -> Result<(), PowerError> {
        // logind has no notion of a one-shot idle timer reset.
        if !state.contains(ExecutionState::CONTINUOUS) {
            return Err(PowerError::Unsupported(state));
        }

        let Some(what) = inhibit_what(state) else {
            match self.held.take() {
                Some(lock) => info!("Released logind inhibitor ({})", lock.what),
                None => debug!("No logind inhibitor held, nothing to release"),
            }
            return Ok(());
        };

        if let Some(ref lock) = self.held
            && lock.what == what
        {
            debug!("Inhibitor for '{}' already held", what);
            return Ok(());
        }

        // Take the new lock before dropping the old one so there is no gap.
        let fd = self.source.inhibit(&what).await?;
        info!("Acquired logind inhibitor ({})", what);
        self.held = Some(HeldLock { what, _fd: fd });

        Ok(())
    }
}

/// Map an execution state to logind's colon-separated `what` list.
///
/// A display that must stay on also keeps the machine out of suspend, so
/// `DISPLAY_REQUIRED` takes both locks. Returns `None` when nothing needs
/// to be inhibited.
fn inhibit_what(state: ExecutionState) -> Option<String> {
    let display = state.contains(ExecutionState::DISPLAY_REQUIRED);
    let sleep = display
        || state.contains(ExecutionState::SYSTEM_REQUIRED)
        || state.contains(ExecutionState::AWAYMODE_REQUIRED);

    let mut what = Vec::new();
    if display {
        what.push("idle");
    }
    if sleep {
        what.push("sleep");
    }

    if what.is_empty() {
        None
    } else {
        Some(what.join(":"))
    }
}
