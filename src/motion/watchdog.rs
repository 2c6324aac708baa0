// Inactivity watchdog
//
// A periodic timer task that asks its registered callback, once per tick,
// whether the motion deadline has passed. The deadline itself lives here and
// is only read or written by whoever holds the controller lock, so the
// tick check and a command's re-arm never interleave.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::config::{LINEAR_WINDOW, ROTATION_WINDOW, WATCHDOG_TICK};

/// Tick period and inactivity windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTiming {
    pub tick: Duration,
    pub linear_window: Duration,
    pub rotation_window: Duration,
}

impl Default for WatchdogTiming {
    fn default() -> Self {
        Self {
            tick: WATCHDOG_TICK,
            linear_window: LINEAR_WINDOW,
            rotation_window: ROTATION_WINDOW,
        }
    }
}

/// Callback run on every tick with the generation of the firing timer
pub type TickCallback = Arc<dyn Fn(u64) -> ControlFlow<()> + Send + Sync>;

/// Result of checking a tick against the armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Deadline not reached yet
    Pending,
    /// Deadline reached; the watchdog is now disarmed
    Expired { window: Duration },
    /// The tick belongs to a timer that was disarmed or replaced
    Stale,
}

/// Point-in-time view of the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogStatus {
    pub armed: bool,
    pub window: Option<Duration>,
    pub deadline: Option<Instant>,
    /// Number of timers created so far
    pub arms: u64,
}

struct Armed {
    generation: u64,
    window: Duration,
    deadline: Instant,
    timer: JoinHandle<()>,
}

pub struct Watchdog {
    period: Duration,
    runtime: Handle,
    on_tick: TickCallback,
    armed: Option<Armed>,
    arms: u64,
}

impl Watchdog {
    pub fn new(period: Duration, runtime: Handle, on_tick: TickCallback) -> Self {
        Self {
            period,
            runtime,
            on_tick,
            armed: None,
            arms: 0,
        }
    }

    /// Start a timer with `deadline = now + window`
    ///
    /// If a timer is already running this only refreshes the deadline.
    pub fn arm(&mut self, window: Duration) {
        if self.armed.is_some() {
            self.rearm(window);
            return;
        }

        self.arms += 1;
        let generation = self.arms;
        let period = self.period;
        let on_tick = Arc::clone(&self.on_tick);

        let timer = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if on_tick(generation).is_break() {
                    break;
                }
            }
        });

        debug!("Watchdog armed: window={:?}, generation={}", window, generation);
        self.armed = Some(Armed {
            generation,
            window,
            deadline: Instant::now() + window,
            timer,
        });
    }

    /// Refresh the deadline of the running timer without replacing it
    pub fn rearm(&mut self, window: Duration) {
        match self.armed.as_mut() {
            Some(armed) => {
                armed.window = window;
                armed.deadline = Instant::now() + window;
            }
            None => self.arm(window),
        }
    }

    /// Cancel the timer. Returns whether one was running.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.timer.abort();
                debug!("Watchdog disarmed (generation {})", armed.generation);
                true
            }
            None => false,
        }
    }

    /// Evaluate a tick from timer `generation` at time `now`
    pub fn check(&mut self, generation: u64, now: Instant) -> TickOutcome {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                if now >= armed.deadline {
                    let window = armed.window;
                    self.disarm();
                    TickOutcome::Expired { window }
                } else {
                    TickOutcome::Pending
                }
            }
            _ => TickOutcome::Stale,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            armed: self.armed.is_some(),
            window: self.armed.as_ref().map(|a| a.window),
            deadline: self.armed.as_ref().map(|a| a.deadline),
            arms: self.arms,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
