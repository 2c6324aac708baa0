// Runtime: wires PWM hardware, motion controller and command front ends
//
// Commands arrive over HTTP (control page) and optionally over zenoh. The
// motion controller's watchdog runs on its own timer task; this loop only
// drains zenoh commands and publishes state at STATE_HZ.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{error, info, warn};
use zenoh::pubsub::Publisher;

use crate::config::{
    HTTP_ADDR, MotorConfig, RobotConfig, STATE_HZ, TOPIC_CMD_MOTION, TOPIC_HEALTH,
    TOPIC_STATE_MOTION,
};
use crate::gateway::{CommandGateway, http};
use crate::messages::RuntimeHealth;
use crate::motion::MotionController;
use crate::motor::{MotorDriver, PwmChannel, PwmError, SimPwm, SysfsPwm};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Start-up options
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: RobotConfig,
    pub http_addr: String,
    /// Run without PWM hardware
    pub simulate: bool,
    /// Accept commands and publish state over zenoh
    pub zenoh: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config: RobotConfig::default(),
            http_addr: HTTP_ADDR.to_string(),
            simulate: false,
            zenoh: true,
        }
    }
}

/// Left and right drivers on in-memory channels
pub fn simulated_drivers(
    config: &RobotConfig,
) -> Result<(MotorDriver<SimPwm>, MotorDriver<SimPwm>), PwmError> {
    let left = MotorDriver::new(
        "left",
        SimPwm::new(),
        SimPwm::new(),
        config.left.calibration,
    )?;
    let right = MotorDriver::new(
        "right",
        SimPwm::new(),
        SimPwm::new(),
        config.right.calibration,
    )?;
    Ok((left, right))
}

fn sysfs_driver(name: &'static str, motor: &MotorConfig) -> Result<MotorDriver<SysfsPwm>, PwmError> {
    let forward = SysfsPwm::open(motor.chip, motor.forward_channel)?;
    let backward = SysfsPwm::open(motor.chip, motor.backward_channel)?;
    MotorDriver::new(name, forward, backward, motor.calibration)
}

/// Left and right drivers on sysfs PWM channels
pub fn sysfs_drivers(
    config: &RobotConfig,
) -> Result<(MotorDriver<SysfsPwm>, MotorDriver<SysfsPwm>), PwmError> {
    Ok((
        sysfs_driver("left", &config.left)?,
        sysfs_driver("right", &config.right)?,
    ))
}

pub async fn run(settings: Settings) -> Result<(), BoxError> {
    let timing = settings.config.watchdog_timing();

    if settings.simulate {
        info!("Simulation mode: no PWM hardware is driven");
        let (left, right) = simulated_drivers(&settings.config)?;
        serve(MotionController::new(left, right, timing)?, &settings).await
    } else {
        let (left, right) = sysfs_drivers(&settings.config)?;
        serve(MotionController::new(left, right, timing)?, &settings).await
    }
}

async fn publish<T: Serialize>(publisher: &Publisher<'_>, value: &T) -> Result<(), BoxError> {
    let json = serde_json::to_string(value)?;
    publisher.put(json).await?;
    Ok(())
}

async fn serve<P: PwmChannel + 'static>(
    controller: MotionController<P>,
    settings: &Settings,
) -> Result<(), BoxError> {
    let controller = Arc::new(controller);
    let gateway = CommandGateway::new(Arc::clone(&controller));
    let mut faults = controller.faults();
    let fault_view = controller.faults();

    let session = if settings.zenoh {
        info!("Opening Zenoh session...");
        Some(zenoh::open(zenoh::Config::default()).await?)
    } else {
        None
    };
    let mut links = None;
    if let Some(session) = &session {
        info!("Setting up publishers and subscribers...");
        let subscriber = session.declare_subscriber(TOPIC_CMD_MOTION).await?;
        let pub_state = session.declare_publisher(TOPIC_STATE_MOTION).await?;
        let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
        info!("Subscribed to: {}", TOPIC_CMD_MOTION);
        info!("Publishing to: {}, {}", TOPIC_STATE_MOTION, TOPIC_HEALTH);
        links = Some((subscriber, pub_state, pub_health));
    }

    let listener = TcpListener::bind(&settings.http_addr).await?;
    let mut http_task = tokio::spawn(http::serve(listener, gateway.clone()));
    let mut tick = interval(Duration::from_millis(1000 / STATE_HZ));

    info!("Runtime started, control page on http://{}/", settings.http_addr);

    let result: Result<(), BoxError> = loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some((subscriber, pub_state, pub_health)) = &links else {
                    continue;
                };

                // Drain all pending commands (non-blocking), in arrival order
                while let Ok(Some(sample)) = subscriber.try_recv() {
                    let payload = sample.payload().to_bytes();
                    if let Err(e) = gateway.handle_payload(&payload) {
                        warn!("Rejected zenoh command: {}", e);
                    }
                }

                let state = controller.snapshot();
                let health = RuntimeHealth::from_state(&state, fault_view.borrow().is_some());
                if let Err(e) = publish(pub_state, &state).await {
                    warn!("Failed to publish state: {}", e);
                }
                if let Err(e) = publish(pub_health, &health).await {
                    warn!("Failed to publish health: {}", e);
                }
            }
            Ok(()) = faults.changed() => {
                if let Some(fault) = faults.borrow_and_update().clone() {
                    error!("Motor fault, shutting down: {}", fault);
                    break Err(fault.into());
                }
            }
            joined = &mut http_task => {
                break match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
        }
    };

    http_task.abort();
    if let Err(e) = controller.stop() {
        warn!("Failed to stop robot on shutdown: {}", e);
    }
    result
}
