// Motor control module for the two-wheel differential base
//
// Provides:
// - PWM output channels (sysfs and simulated)
// - Two-channel motor driver with per-wheel duty calibration

mod driver;
pub mod pwm;

pub use driver::{DutyCalibration, DutyPair, MotorCommand, MotorDriver, Polarity};
pub use pwm::{PwmChannel, PwmError, SimPwm, SysfsPwm};
