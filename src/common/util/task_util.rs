use parking_lot::Mutex;
use std::time::Duration;
use timer::{Guard, Timer};

/// Runs `op` on its own freshly spawned thread, so background work never
/// competes with a shared pool.
pub fn async_task<OP>(op: OP)
where
    OP: FnOnce() + Send + 'static,
{
    std::thread::spawn(op);
}

/// A repeating-task scheduler holding at most one active schedule.
///
/// Dropping or replacing the guard cancels the schedule; used for the
/// autocompaction interval.
pub struct Scheduler {
    timer: Timer,
    guard: Mutex<Option<Guard>>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            timer: Timer::new(),
            guard: Mutex::new(None),
        }
    }

    /// Schedules `f` to run repeatedly every `duration`, replacing any
    /// previously scheduled task.
    pub fn schedule_repeating<F>(&self, duration: Duration, f: F)
    where
        F: 'static + FnMut() + Send,
    {
        match chrono::Duration::from_std(duration) {
            Ok(chrono_duration) => {
                let guard = self.timer.schedule_repeating(chrono_duration, f);
                *self.guard.lock() = Some(guard);
            }
            Err(e) => {
                log::error!(
                    "Interval {:?} does not fit in a chrono duration ({}), nothing was scheduled",
                    duration,
                    e
                );
            }
        }
    }

    /// Cancels the scheduled task, if any.
    pub fn stop(&self) {
        *self.guard.lock() = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.guard.lock().is_some()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
