// Keyboard teleop: W/S forward/backward, A/D rotate, SPACE stop, Q quit
//
// Held keys repeat their command every REPEAT_MS, matching the control page,
// so the robot's watchdog keeps the motion alive. Once input goes quiet a
// single stop is sent.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use diffbot_runtime::config::TOPIC_CMD_MOTION;
use diffbot_runtime::messages::{CommandRequest, MotionCommand};
use std::time::{Duration, Instant};
use tracing::info;

const REPEAT_MS: u64 = 200;
// Longer than a terminal's initial key-repeat delay
const INPUT_TIMEOUT_MS: u64 = 600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_MOTION).await?;

    info!("Controls: W/S=forward/backward, A/D=rotate, SPACE=stop, Q=quit");

    enable_raw_mode()?;
    let outcome = key_loop(&publisher).await;
    disable_raw_mode()?;

    // Leave the robot stopped whatever happened
    send(&publisher, MotionCommand::Stop).await?;
    outcome
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    command: MotionCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let payload = serde_json::to_string(&CommandRequest { command })?;
    publisher.put(payload).await?;
    Ok(())
}

fn command_for(code: KeyCode) -> Option<MotionCommand> {
    match code {
        KeyCode::Char('w') => Some(MotionCommand::Forward),
        KeyCode::Char('s') => Some(MotionCommand::Backward),
        KeyCode::Char('a') => Some(MotionCommand::LeftRotate),
        KeyCode::Char('d') => Some(MotionCommand::RightRotate),
        KeyCode::Char(' ') => Some(MotionCommand::Stop),
        _ => None,
    }
}

async fn key_loop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut active: Option<MotionCommand> = None;
    let mut last_input = Instant::now();
    let mut last_sent = Instant::now();

    loop {
        // Short poll keeps the repeat timer responsive
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = matches!(kind, KeyEventKind::Press | KeyEventKind::Repeat);

                match code {
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,
                    code if pressed => {
                        if let Some(command) = command_for(code) {
                            last_input = Instant::now();
                            if active != Some(command) {
                                info!("{}", command);
                                send(publisher, command).await?;
                                last_sent = Instant::now();
                            }
                            active = (command != MotionCommand::Stop).then_some(command);
                        }
                    }
                    _ => {}
                }
            }
        }

        let Some(command) = active else {
            continue;
        };

        if last_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            info!("Input idle, stopping");
            send(publisher, MotionCommand::Stop).await?;
            active = None;
        } else if last_sent.elapsed() >= Duration::from_millis(REPEAT_MS) {
            send(publisher, command).await?;
            last_sent = Instant::now();
        }
    }

    Ok(())
}
