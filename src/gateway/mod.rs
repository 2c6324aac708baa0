// Command gateway
//
// Turns textual commands from the network into MotionController calls.
// Front ends:
// - HTTP control page and GET endpoints (see http.rs)
// - Zenoh command topic, drained by the runtime loop

pub mod http;

use std::sync::Arc;
use tracing::debug;

use crate::messages::{CommandRequest, MotionCommand, UnknownCommand};
use crate::motion::{MotionController, MotionError};
use crate::motor::PwmChannel;

/// Error types for command dispatch
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),

    #[error("Invalid command payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Motion command failed: {0}")]
    Motion(#[from] MotionError),
}

/// Maps commands onto an injected motion controller
pub struct CommandGateway<P: PwmChannel> {
    controller: Arc<MotionController<P>>,
}

impl<P: PwmChannel> Clone for CommandGateway<P> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

impl<P: PwmChannel> CommandGateway<P> {
    pub fn new(controller: Arc<MotionController<P>>) -> Self {
        Self { controller }
    }

    /// Run one command to completion
    pub fn dispatch(&self, command: MotionCommand) -> Result<(), MotionError> {
        debug!("Dispatching {}", command);
        match command {
            MotionCommand::Stop => self.controller.stop(),
            MotionCommand::Forward => self.controller.forward(),
            MotionCommand::Backward => self.controller.backward(),
            MotionCommand::LeftRotate => self.controller.rotate_left(),
            MotionCommand::RightRotate => self.controller.rotate_right(),
        }
    }

    /// Parse a command name and dispatch it
    pub fn handle_name(&self, name: &str) -> Result<MotionCommand, GatewayError> {
        let command = name.parse::<MotionCommand>()?;
        self.dispatch(command)?;
        Ok(command)
    }

    /// Parse a JSON `{"command": ...}` payload and dispatch it
    pub fn handle_payload(&self, payload: &[u8]) -> Result<MotionCommand, GatewayError> {
        let request: CommandRequest = serde_json::from_slice(payload)?;
        self.dispatch(request.command)?;
        Ok(request.command)
    }

    pub fn controller(&self) -> &MotionController<P> {
        &self.controller
    }
}
