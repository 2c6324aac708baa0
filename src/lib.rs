// Differential-drive robot runtime
//
// Network commands -> gateway -> motion controller -> PWM motor drivers,
// with an inactivity watchdog that stops the robot when commands cease.

pub mod config;
pub mod gateway;
pub mod messages;
pub mod motion;
pub mod motor;
pub mod runtime;
