//! Idle-prevention state machine.
//!
//! The controller is the single owner of the mode and armed state. Every
//! armed-state transition goes through [`Controller::toggle`], which is the
//! only place that talks to the power backend.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::period::TimeOfDay;
use crate::period::Window;
use crate::power::PowerControl;
use crate::power::PowerRequest;

/// Which input drives the armed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Armed state only changes on user toggles.
    Manual,
    /// Armed state follows a daily window, re-evaluated on every tick.
    Scheduled(Window),
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled(_) => "scheduled",
        }
    }

    /// The active window, if scheduled.
    pub fn window(self) -> Option<Window> {
        match self {
            Self::Manual => None,
            Self::Scheduled(window) => Some(window),
        }
    }
}

/// Snapshot of controller state handed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub mode: Mode,
    pub armed: bool,
}

impl Status {
    /// Whether a "prevent idle" checkmark should be shown.
    ///
    /// Scheduled mode owns the armed state, so the manual indicator stays
    /// cleared there even while the window holds the display awake.
    pub fn manual_armed(&self) -> bool {
        self.armed && self.mode == Mode::Manual
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode={} armed={}", self.mode.as_str(), self.armed)?;
        if let Some(window) = self.mode.window() {
            write!(f, " window={window}")?;
        }
        Ok(())
    }
}

/// Idle-prevention controller.
pub struct Controller {
    power: Box<dyn PowerControl>,
    mode: Mode,
    armed: bool,
    updates: watch::Sender<Status>,
}

impl Controller {
    /// Create a controller in manual mode, disarmed.
    pub fn new(power: Box<dyn PowerControl>) -> Self {
        let initial = Status {
            mode: Mode::Manual,
            armed: false,
        };

        Self {
            power,
            mode: initial.mode,
            armed: initial.armed,
            updates: watch::Sender::new(initial),
        }
    }

    pub fn status(&self) -> Status {
        Status {
            mode: self.mode,
            armed: self.armed,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.updates.subscribe()
    }

    /// Manual "prevent idle" toggle.
    ///
    /// Leaving scheduled mode first forces the armed state to false without
    /// touching the backend, so toggling from a schedule always arms.
    pub async fn toggle_manual(&mut self) {
        if let Mode::Scheduled(window) = self.mode {
            info!("Leaving scheduled mode ({})", window);
            self.mode = Mode::Manual;
            self.armed = false;
        }

        self.toggle().await;
    }

    /// Enter scheduled mode with `window`, or leave it when `None`.
    ///
    /// Entering does not touch the backend; the next tick makes the first
    /// evaluation. Cancelling always ends disarmed with one "allow idle".
    pub async fn toggle_scheduled(&mut self, window: Option<Window>) {
        match window {
            Some(window) => {
                info!("Entering scheduled mode ({})", window);
                self.mode = Mode::Scheduled(window);
                self.publish();
            }
            None => {
                info!("Schedule cancelled, disarming");
                self.mode = Mode::Manual;
                self.armed = true;
                self.toggle().await;
            }
        }
    }

    /// Periodic re-evaluation of the schedule.
    pub async fn on_tick(&mut self, now: TimeOfDay) {
        let Mode::Scheduled(window) = self.mode else {
            return;
        };

        let desired = window.contains(now);
        if desired == self.armed {
            trace!("Tick at {}: armed={} unchanged", now, self.armed);
            return;
        }

        debug!(
            "Tick at {}: window {} boundary crossed, armed {} -> {}",
            now, window, self.armed, desired
        );
        self.toggle().await;
    }

    /// Release any hold on the OS, whatever the current state.
    pub async fn shutdown(&mut self) {
        info!("Shutting down, allowing idle");
        self.armed = false;
        self.request(PowerRequest::AllowIdle).await;
        self.publish();
    }

    /// Flip the armed state and push the matching request to the backend.
    async fn toggle(&mut self) {
        self.armed = !self.armed;
        info!("Idle prevention {}", if self.armed { "armed" } else { "disarmed" });

        self.request(PowerRequest::for_armed(self.armed)).await;
        self.publish();
    }

    async fn request(&mut self, request: PowerRequest) {
        let state = request.execution_state();
        debug!("Requesting execution state {}", state);

        // Best effort: the logical state stays authoritative.
        if let Err(e) = self.power.apply(state).await {
            warn!("Failed to apply execution state {}: {}", state, e);
        }
    }

    fn publish(&self) {
        let status = self.status();
        self.updates.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::ExecutionState;
    use crate::power::testing::CallLog;
    use crate::power::testing::RecordingPower;

    const ALLOW: ExecutionState = ExecutionState::CONTINUOUS;

    fn prevent() -> ExecutionState {
        ExecutionState::CONTINUOUS | ExecutionState::DISPLAY_REQUIRED
    }

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn window(start: &str, end: &str) -> Window {
        Window::new(t(start), t(end))
    }

    fn controller() -> (Controller, CallLog) {
        let (power, calls) = RecordingPower::new();
        (Controller::new(Box::new(power)), calls)
    }

    fn calls_of(log: &CallLog) -> Vec<ExecutionState> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_initial_state() {
        let (controller, calls) = controller();
        assert_eq!(controller.mode(), Mode::Manual);
        assert!(!controller.is_armed());
        assert!(calls_of(&calls).is_empty());
    }

    #[tokio::test]
    async fn test_manual_toggle_is_involution() {
        let (mut controller, calls) = controller();

        controller.toggle_manual().await;
        assert!(controller.is_armed());
        assert!(controller.status().manual_armed());

        controller.toggle_manual().await;
        assert!(!controller.is_armed());
        assert_eq!(controller.mode(), Mode::Manual);
        assert_eq!(calls_of(&calls), vec![prevent(), ALLOW]);
    }

    #[tokio::test]
    async fn test_entering_schedule_makes_no_call() {
        let (mut controller, calls) = controller();

        controller
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;

        assert_eq!(controller.mode(), Mode::Scheduled(window("09:00", "17:00")));
        assert!(!controller.is_armed());
        assert!(calls_of(&calls).is_empty());
    }

    #[tokio::test]
    async fn test_entering_schedule_keeps_internal_armed_state() {
        let (mut controller, calls) = controller();
        controller.toggle_manual().await;

        controller
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;

        assert!(controller.is_armed());
        assert!(!controller.status().manual_armed());

        // Already armed inside the window: nothing to do.
        controller.on_tick(t("10:00")).await;
        assert_eq!(calls_of(&calls), vec![prevent()]);

        controller.on_tick(t("20:00")).await;
        assert!(!controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent(), ALLOW]);
    }

    #[tokio::test]
    async fn test_tick_is_idempotent() {
        let (mut controller, calls) = controller();
        controller
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;

        controller.on_tick(t("10:00")).await;
        controller.on_tick(t("10:00")).await;

        assert!(controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent()]);
    }

    #[tokio::test]
    async fn test_tick_is_noop_in_manual_mode() {
        let (mut controller, calls) = controller();

        controller.on_tick(t("10:00")).await;
        controller.toggle_manual().await;
        controller.on_tick(t("03:00")).await;

        assert!(controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent()]);
    }

    #[tokio::test]
    async fn test_scheduled_end_to_end() {
        let (mut controller, calls) = controller();

        controller
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;
        assert!(calls_of(&calls).is_empty());

        controller.on_tick(t("10:00")).await;
        assert!(controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent()]);

        controller.on_tick(t("18:00")).await;
        assert!(!controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent(), ALLOW]);
    }

    #[tokio::test]
    async fn test_schedule_across_midnight() {
        let (mut controller, calls) = controller();
        controller
            .toggle_scheduled(Some(window("22:00", "02:00")))
            .await;

        controller.on_tick(t("21:59")).await;
        assert!(!controller.is_armed());
        controller.on_tick(t("23:30")).await;
        controller.on_tick(t("01:00")).await;
        assert!(controller.is_armed());
        controller.on_tick(t("02:00:01")).await;
        assert!(!controller.is_armed());

        assert_eq!(calls_of(&calls), vec![prevent(), ALLOW]);
    }

    #[tokio::test]
    async fn test_toggle_manual_from_schedule_always_arms() {
        for now in ["10:00", "20:00"] {
            let (mut controller, calls) = controller();
            controller
                .toggle_scheduled(Some(window("09:00", "17:00")))
                .await;
            controller.on_tick(t(now)).await;
            calls.lock().unwrap().clear();

            controller.toggle_manual().await;

            assert_eq!(controller.mode(), Mode::Manual);
            assert!(controller.is_armed(), "from tick at {now}");
            assert_eq!(calls_of(&calls), vec![prevent()], "from tick at {now}");
        }
    }

    #[tokio::test]
    async fn test_cancel_schedule_always_disarms() {
        let (mut controller, calls) = controller();
        controller.toggle_manual().await;
        controller
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;

        controller.toggle_scheduled(None).await;

        assert_eq!(controller.mode(), Mode::Manual);
        assert!(!controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent(), ALLOW]);
    }

    #[tokio::test]
    async fn test_cancel_from_disarmed_still_allows_idle() {
        let (mut controller, calls) = controller();

        controller.toggle_scheduled(None).await;

        assert!(!controller.is_armed());
        assert_eq!(calls_of(&calls), vec![ALLOW]);
    }

    #[tokio::test]
    async fn test_shutdown_from_every_state() {
        let (mut manual_disarmed, _) = controller();

        let (mut manual_armed, _) = controller();
        manual_armed.toggle_manual().await;

        let (mut scheduled_armed, _) = controller();
        scheduled_armed
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;
        scheduled_armed.on_tick(t("10:00")).await;

        let (mut scheduled_disarmed, _) = controller();
        scheduled_disarmed
            .toggle_scheduled(Some(window("09:00", "17:00")))
            .await;
        scheduled_disarmed.on_tick(t("20:00")).await;

        for controller in [
            &mut manual_disarmed,
            &mut manual_armed,
            &mut scheduled_armed,
            &mut scheduled_disarmed,
        ] {
            let (power, calls) = RecordingPower::new();
            controller.power = Box::new(power);

            controller.shutdown().await;

            assert!(!controller.is_armed());
            assert_eq!(calls_of(&calls), vec![ALLOW]);
        }
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_fatal() {
        let (power, calls) = RecordingPower::failing();
        let mut controller = Controller::new(Box::new(power));

        controller.toggle_manual().await;
        assert!(controller.is_armed());

        controller.toggle_manual().await;
        assert!(!controller.is_armed());
        assert_eq!(calls_of(&calls), vec![prevent(), ALLOW]);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (mut controller, _) = controller();
        let mut updates = controller.subscribe();
        assert!(!updates.borrow_and_update().armed);

        controller.toggle_manual().await;
        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().armed);

        // A tick in manual mode changes nothing and publishes nothing.
        controller.on_tick(t("10:00")).await;
        assert!(!updates.has_changed().unwrap());
    }

    #[test]
    fn test_status_display() {
        let status = Status {
            mode: Mode::Scheduled(window("09:00", "17:00")),
            armed: true,
        };
        assert_eq!(status.to_string(), "mode=scheduled armed=true window=09:00-17:00");

        let status = Status {
            mode: Mode::Manual,
            armed: false,
        };
        assert_eq!(status.to_string(), "mode=manual armed=false");
    }
}
