// Define message types for the runtime

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::motion::Direction;
use crate::motor::DutyPair;

/// Movement command accepted from the network
///
/// The textual names are the ones the control page and teleop clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionCommand {
    Stop,
    Forward,
    Backward,
    LeftRotate,
    RightRotate,
}

impl MotionCommand {
    pub const ALL: [MotionCommand; 5] = [
        MotionCommand::Stop,
        MotionCommand::Forward,
        MotionCommand::Backward,
        MotionCommand::LeftRotate,
        MotionCommand::RightRotate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MotionCommand::Stop => "stop",
            MotionCommand::Forward => "forward",
            MotionCommand::Backward => "backward",
            MotionCommand::LeftRotate => "left_rotate",
            MotionCommand::RightRotate => "right_rotate",
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognised command name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for MotionCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MotionCommand::ALL
            .into_iter()
            .find(|cmd| cmd.name() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

// Command from teleop/scripts -> runtime (zenoh payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: MotionCommand,
}

/// Controller state published by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub direction: Direction,
    pub left: DutyPair,
    pub right: DutyPair,
    pub watchdog_armed: bool,
    /// Time left before the watchdog stops the robot
    pub remaining_ms: Option<u64>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Idle,
    Moving,
    Fault,
}

impl RuntimeHealth {
    pub fn from_state(state: &MotionState, faulted: bool) -> Self {
        if faulted {
            RuntimeHealth::Fault
        } else if state.direction.is_moving() {
            RuntimeHealth::Moving
        } else {
            RuntimeHealth::Idle
        }
    }
}
