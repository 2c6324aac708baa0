// Direction state machine and motor mapping
//
// All controller state sits behind one mutex. Command handlers and the
// watchdog tick both take it, which makes "refresh deadline" and
// "check deadline, maybe stop" mutually exclusive. The lock is held only
// for a few PWM writes and never across an await.

use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::Result;
use super::watchdog::{TickCallback, TickOutcome, Watchdog, WatchdogStatus, WatchdogTiming};
use crate::messages::MotionState;
use crate::motor::{MotorDriver, Polarity, PwmChannel};

/// Current movement of the robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    None,
    Forward,
    Backward,
    RotateLeft,
    RotateRight,
}

impl Direction {
    pub fn is_moving(self) -> bool {
        self != Direction::None
    }

    /// (left, right) wheel polarity for this direction
    pub fn wheel_polarities(self) -> Option<(Polarity, Polarity)> {
        use Polarity::{Backward, Forward};
        match self {
            Direction::None => None,
            Direction::Forward => Some((Forward, Forward)),
            Direction::Backward => Some((Backward, Backward)),
            Direction::RotateLeft => Some((Backward, Forward)),
            Direction::RotateRight => Some((Forward, Backward)),
        }
    }

    /// Inactivity window before the watchdog stops this movement
    ///
    /// Rotations get the shorter window.
    pub fn inactivity_window(self, timing: &WatchdogTiming) -> Option<Duration> {
        match self {
            Direction::None => None,
            Direction::Forward | Direction::Backward => Some(timing.linear_window),
            Direction::RotateLeft | Direction::RotateRight => Some(timing.rotation_window),
        }
    }
}

struct Motion<P: PwmChannel> {
    left: MotorDriver<P>,
    right: MotorDriver<P>,
    direction: Direction,
    timing: WatchdogTiming,
    watchdog: Watchdog,
    faults: watch::Sender<Option<String>>,
}

impl<P: PwmChannel> Motion<P> {
    fn start(&mut self, direction: Direction) -> Result<()> {
        let (Some((left, right)), Some(window)) = (
            direction.wheel_polarities(),
            direction.inactivity_window(&self.timing),
        ) else {
            return self.stop();
        };

        if self.direction != direction {
            info!("Direction {:?} -> {:?}", self.direction, direction);
            // Full stop before switching so no stale duty survives a reversal
            self.stop()?;
        }
        self.direction = direction;

        let driven = self
            .left
            .drive(left)
            .and_then(|()| self.right.drive(right));
        if let Err(e) = driven {
            error!("Failed to drive {:?}: {}", direction, e);
            if let Err(stop_err) = self.stop() {
                warn!("Failed to stop after drive error: {}", stop_err);
            }
            return Err(e.into());
        }

        if self.watchdog.is_armed() {
            self.watchdog.rearm(window);
            debug!("Watchdog refreshed for {:?} ({:?})", direction, window);
        } else {
            self.watchdog.arm(window);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.watchdog.disarm();
        if self.direction.is_moving() {
            info!("Stopping ({:?})", self.direction);
        }
        self.direction = Direction::None;

        // Zero both wheels even if the first one fails
        let left = self.left.stop();
        let right = self.right.stop();
        left?;
        right?;
        Ok(())
    }

    fn state(&self) -> MotionState {
        let status = self.watchdog.status();
        MotionState {
            direction: self.direction,
            left: self.left.duties(),
            right: self.right.duties(),
            watchdog_armed: status.armed,
            remaining_ms: status
                .deadline
                .map(|d| d.saturating_duration_since(Instant::now()).as_millis() as u64),
        }
    }
}

fn lock<P: PwmChannel>(shared: &Mutex<Motion<P>>) -> MutexGuard<'_, Motion<P>> {
    // A panicked holder must not keep the robot from stopping
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watchdog tick: stop the robot once the deadline has passed
fn watchdog_tick<P: PwmChannel>(shared: &Weak<Mutex<Motion<P>>>, generation: u64) -> ControlFlow<()> {
    let Some(shared) = shared.upgrade() else {
        return ControlFlow::Break(());
    };
    let mut motion = lock(&shared);

    match motion.watchdog.check(generation, Instant::now()) {
        TickOutcome::Pending => ControlFlow::Continue(()),
        TickOutcome::Stale => ControlFlow::Break(()),
        TickOutcome::Expired { window } => {
            warn!(
                "No command for {}ms, stopping robot ({:?})",
                window.as_millis(),
                motion.direction
            );
            if let Err(e) = motion.stop() {
                error!("Watchdog failed to stop motors: {}", e);
                motion.faults.send_replace(Some(e.to_string()));
            }
            ControlFlow::Break(())
        }
    }
}

/// Movement controller for the two-wheel base
///
/// Owns both motor drivers and the watchdog. Build one at start-up and hand
/// it to whatever dispatches commands.
pub struct MotionController<P: PwmChannel> {
    shared: Arc<Mutex<Motion<P>>>,
    faults: watch::Receiver<Option<String>>,
}

impl<P: PwmChannel + 'static> MotionController<P> {
    /// Create a stopped controller
    ///
    /// Must be called from within a tokio runtime; the watchdog timer runs on it.
    pub fn new(left: MotorDriver<P>, right: MotorDriver<P>, timing: WatchdogTiming) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let (fault_tx, fault_rx) = watch::channel(None);

        let shared = Arc::new_cyclic(|weak: &Weak<Mutex<Motion<P>>>| {
            let weak = weak.clone();
            let on_tick: TickCallback = Arc::new(move |generation| watchdog_tick(&weak, generation));
            Mutex::new(Motion {
                left,
                right,
                direction: Direction::None,
                timing,
                watchdog: Watchdog::new(timing.tick, runtime, on_tick),
                faults: fault_tx,
            })
        });

        info!(
            "Motion controller ready: tick={}ms, linear={}ms, rotation={}ms",
            timing.tick.as_millis(),
            timing.linear_window.as_millis(),
            timing.rotation_window.as_millis()
        );
        Ok(Self {
            shared,
            faults: fault_rx,
        })
    }
}

impl<P: PwmChannel> MotionController<P> {
    pub fn forward(&self) -> Result<()> {
        self.command(|motion| motion.start(Direction::Forward))
    }

    pub fn backward(&self) -> Result<()> {
        self.command(|motion| motion.start(Direction::Backward))
    }

    pub fn rotate_left(&self) -> Result<()> {
        self.command(|motion| motion.start(Direction::RotateLeft))
    }

    pub fn rotate_right(&self) -> Result<()> {
        self.command(|motion| motion.start(Direction::RotateRight))
    }

    /// Stop both wheels and cancel the watchdog. Safe to call at any time.
    pub fn stop(&self) -> Result<()> {
        self.command(Motion::stop)
    }

    /// Run a command inside the critical section; motor failures are fatal
    /// and get reported on the fault channel as well as returned
    fn command(&self, f: impl FnOnce(&mut Motion<P>) -> Result<()>) -> Result<()> {
        let mut motion = lock(&self.shared);
        let result = f(&mut *motion);
        if let Err(e) = &result {
            motion.faults.send_replace(Some(e.to_string()));
        }
        result
    }

    pub fn direction(&self) -> Direction {
        lock(&self.shared).direction
    }

    /// Consistent view of direction, duties and watchdog
    pub fn snapshot(&self) -> MotionState {
        lock(&self.shared).state()
    }

    pub fn watchdog_status(&self) -> WatchdogStatus {
        lock(&self.shared).watchdog.status()
    }

    pub fn timing(&self) -> WatchdogTiming {
        lock(&self.shared).timing
    }

    /// Receiver that reports motor failures raised by the watchdog
    pub fn faults(&self) -> watch::Receiver<Option<String>> {
        self.faults.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{DutyCalibration, SimPwm};

    struct Rig {
        controller: MotionController<SimPwm>,
        outputs: [SimPwm; 4], // left fwd, left bwd, right fwd, right bwd
    }

    impl Rig {
        fn new() -> Self {
            let outputs = [SimPwm::new(), SimPwm::new(), SimPwm::new(), SimPwm::new()];
            let left = MotorDriver::new(
                "left",
                outputs[0].clone(),
                outputs[1].clone(),
                DutyCalibration::symmetric(15_450),
            )
            .unwrap();
            let right = MotorDriver::new(
                "right",
                outputs[2].clone(),
                outputs[3].clone(),
                DutyCalibration::new(14_500, 14_000),
            )
            .unwrap();
            let controller = MotionController::new(left, right, WatchdogTiming::default()).unwrap();
            Self {
                controller,
                outputs,
            }
        }

        fn duties(&self) -> [u32; 4] {
            self.outputs.each_ref().map(|pwm| pwm.duty_ns())
        }

        fn writes(&self) -> u64 {
            self.outputs.iter().map(|pwm| pwm.writes()).sum()
        }

        fn assert_consistent(&self) {
            let state = self.controller.snapshot();
            assert_eq!(state.direction.is_moving(), state.watchdog_armed);
            assert!(state.left.is_exclusive());
            assert!(state.right.is_exclusive());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_stopped() {
        let rig = Rig::new();
        assert_eq!(rig.controller.direction(), Direction::None);
        assert_eq!(rig.duties(), [0, 0, 0, 0]);
        assert!(!rig.controller.watchdog_status().armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_mapping() {
        let rig = Rig::new();

        rig.controller.forward().unwrap();
        assert_eq!(rig.duties(), [15_450, 0, 14_500, 0]);
        rig.assert_consistent();

        rig.controller.backward().unwrap();
        assert_eq!(rig.duties(), [0, 15_450, 0, 14_000]);
        rig.assert_consistent();

        rig.controller.rotate_left().unwrap();
        assert_eq!(rig.duties(), [0, 15_450, 14_500, 0]);
        rig.assert_consistent();

        rig.controller.rotate_right().unwrap();
        assert_eq!(rig.duties(), [15_450, 0, 0, 14_000]);
        assert_eq!(rig.controller.direction(), Direction::RotateRight);
        rig.assert_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_per_direction() {
        let rig = Rig::new();
        rig.controller.forward().unwrap();
        assert_eq!(
            rig.controller.watchdog_status().window,
            Some(Duration::from_millis(1000))
        );

        rig.controller.rotate_left().unwrap();
        assert_eq!(
            rig.controller.watchdog_status().window,
            Some(Duration::from_millis(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_change_matches_explicit_stop() {
        let direct = Rig::new();
        direct.controller.forward().unwrap();
        direct.controller.backward().unwrap();

        let stopped = Rig::new();
        stopped.controller.forward().unwrap();
        stopped.controller.stop().unwrap();
        stopped.controller.backward().unwrap();

        assert_eq!(direct.duties(), stopped.duties());
        assert_eq!(direct.controller.snapshot(), stopped.controller.snapshot());
        assert_eq!(
            direct.controller.watchdog_status().arms,
            stopped.controller.watchdog_status().arms
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_refreshes_without_new_timer() {
        let rig = Rig::new();
        rig.controller.forward().unwrap();
        let first = rig.controller.watchdog_status();

        tokio::time::sleep(Duration::from_millis(300)).await;
        rig.controller.forward().unwrap();
        let second = rig.controller.watchdog_status();

        assert!(second.deadline > first.deadline);
        assert_eq!(first.arms, 1);
        assert_eq!(second.arms, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let rig = Rig::new();
        rig.controller.rotate_right().unwrap();
        rig.controller.stop().unwrap();
        let writes = rig.writes();

        rig.controller.stop().unwrap();
        assert_eq!(rig.writes(), writes);
        assert_eq!(rig.controller.direction(), Direction::None);
        assert_eq!(rig.duties(), [0, 0, 0, 0]);
        rig.assert_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_is_final() {
        let rig = Rig::new();
        rig.controller.forward().unwrap();
        rig.controller.stop().unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rig.controller.direction(), Direction::None);
        assert_eq!(rig.controller.watchdog_status().arms, 1);
        assert!(rig.controller.faults().borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_stops_after_window() {
        let rig = Rig::new();
        rig.controller.backward().unwrap();

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(rig.controller.direction(), Direction::Backward);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rig.controller.direction(), Direction::None);
        assert_eq!(rig.duties(), [0, 0, 0, 0]);
        rig.assert_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn test_moves_again_after_watchdog_stop() {
        let rig = Rig::new();
        rig.controller.rotate_left().unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(rig.controller.direction(), Direction::None);

        rig.controller.rotate_left().unwrap();
        assert_eq!(rig.controller.direction(), Direction::RotateLeft);
        assert_eq!(rig.controller.watchdog_status().arms, 2);
        rig.assert_consistent();
    }

    #[test]
    fn test_requires_runtime() {
        let left = MotorDriver::new(
            "left",
            SimPwm::new(),
            SimPwm::new(),
            DutyCalibration::symmetric(1),
        )
        .unwrap();
        let right = MotorDriver::new(
            "right",
            SimPwm::new(),
            SimPwm::new(),
            DutyCalibration::symmetric(1),
        )
        .unwrap();
        let result = MotionController::new(left, right, WatchdogTiming::default());
        assert!(matches!(result, Err(crate::motion::MotionError::NoRuntime(_))));
    }
}
