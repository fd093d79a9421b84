//! Power-state backends.
//!
//! The controller expresses what it wants as an [`ExecutionState`] flag set
//! and hands it to a [`PowerControl`] implementation. Backends decide how
//! the request reaches the OS.

mod logind;

use std::fmt;
use std::ops::BitOr;

use async_trait::async_trait;
pub use logind::InhibitSource;
pub use logind::LogindInhibitor;
pub use logind::LogindManager;
use thiserror::Error;
use tracing::info;

/// Flag set describing the requested system execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionState(u32);

impl ExecutionState {
    /// Keep the request in effect until the next request replaces it.
    pub const CONTINUOUS: Self = Self(0x8000_0000);
    /// Keep the display on.
    pub const DISPLAY_REQUIRED: Self = Self(0x0000_0002);
    /// Keep the system out of sleep.
    pub const SYSTEM_REQUIRED: Self = Self(0x0000_0001);
    /// Enter away mode instead of sleeping.
    pub const AWAYMODE_REQUIRED: Self = Self(0x0000_0040);

    const NAMED: [(Self, &'static str); 4] = [
        (Self::CONTINUOUS, "CONTINUOUS"),
        (Self::DISPLAY_REQUIRED, "DISPLAY_REQUIRED"),
        (Self::SYSTEM_REQUIRED, "SYSTEM_REQUIRED"),
        (Self::AWAYMODE_REQUIRED, "AWAYMODE_REQUIRED"),
    ];

    /// Whether every flag in `other` is also set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExecutionState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}

/// The two positions the controller ever asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    /// Release any hold; the OS may idle normally.
    AllowIdle,
    /// Keep the display (and therefore the session) awake.
    PreventIdle,
}

impl PowerRequest {
    /// Request matching an armed state.
    pub fn for_armed(armed: bool) -> Self {
        if armed {
            Self::PreventIdle
        } else {
            Self::AllowIdle
        }
    }

    pub fn execution_state(self) -> ExecutionState {
        match self {
            Self::AllowIdle => ExecutionState::CONTINUOUS,
            Self::PreventIdle => ExecutionState::CONTINUOUS | ExecutionState::DISPLAY_REQUIRED,
        }
    }
}

/// Errors raised by power backends.
#[derive(Error, Debug)]
pub enum PowerError {
    #[error("DBus call failed: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("Unsupported execution state: {0}")]
    Unsupported(ExecutionState),
}

/// Side-effecting OS power primitive.
#[async_trait]
pub trait PowerControl: Send {
    /// Apply the requested execution state, replacing any previous one.
    async fn apply(&mut self, state: ExecutionState) -> Result<(), PowerError>;
}

/// Backend that only logs what it would request.
#[derive(Debug, Default)]
pub struct DryRunPower;

#[async_trait]
impl PowerControl for DryRunPower {
    async fn apply(&mut self, state: ExecutionState) -> Result<(), PowerError> {
        info!("[DRY RUN] Would set execution state: {}", state);
        Ok(())
    }
}
