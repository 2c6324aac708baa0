// Movement control for the differential base
//
// MotionController maps high-level movement commands onto the two motor
// drivers and owns the inactivity watchdog that stops the robot when
// commands stop arriving.

mod controller;
pub mod watchdog;

pub use controller::{Direction, MotionController};
pub use watchdog::{TickOutcome, Watchdog, WatchdogStatus, WatchdogTiming};

use crate::motor::PwmError;

/// Error types for motion control
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("Motor output failed: {0}")]
    Pwm(#[from] PwmError),

    #[error("Motion controller requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, MotionError>;
