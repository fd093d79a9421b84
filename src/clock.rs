//! Wall-clock source for schedule evaluation.

use chrono::Local;

use crate::period::TimeOfDay;

/// Source of the current local time of day.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeOfDay;
}

/// Reads the system clock in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> TimeOfDay {
        TimeOfDay::from(Local::now().time())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::Clock;
    use crate::period::TimeOfDay;

    /// Clock whose reading is set by the test.
    #[derive(Clone)]
    pub struct ManualClock(Arc<Mutex<TimeOfDay>>);

    impl ManualClock {
        pub fn new(now: TimeOfDay) -> Self {
            Self(Arc::new(Mutex::new(now)))
        }

        pub fn set(&self, now: TimeOfDay) {
            *self.0.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> TimeOfDay {
            *self.0.lock().unwrap()
        }
    }
}
