// Watchdog timing scenarios against simulated motors

use diffbot_runtime::config::RobotConfig;
use diffbot_runtime::motion::{Direction, MotionController, WatchdogTiming};
use diffbot_runtime::motor::SimPwm;
use diffbot_runtime::runtime::simulated_drivers;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn controller_with(timing: WatchdogTiming) -> MotionController<SimPwm> {
    let (left, right) = simulated_drivers(&RobotConfig::default()).unwrap();
    MotionController::new(left, right, timing).unwrap()
}

fn controller() -> MotionController<SimPwm> {
    controller_with(WatchdogTiming::default())
}

fn assert_stopped(controller: &MotionController<SimPwm>) {
    let state = controller.snapshot();
    assert_eq!(state.direction, Direction::None);
    assert!(state.left.is_zero());
    assert!(state.right.is_zero());
    assert!(!state.watchdog_armed);
    assert_eq!(state.remaining_ms, None);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_forward_extends_deadline() {
    let controller = controller();
    controller.forward().unwrap();

    sleep(Duration::from_millis(400)).await;
    controller.forward().unwrap();

    // Deadline is now t=1400ms
    sleep(Duration::from_millis(900)).await;
    assert_eq!(controller.direction(), Direction::Forward);

    sleep(Duration::from_millis(200)).await;
    assert_stopped(&controller);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_uses_short_window() {
    let controller = controller();
    controller.rotate_left().unwrap();

    sleep(Duration::from_millis(450)).await;
    assert_eq!(controller.direction(), Direction::RotateLeft);

    sleep(Duration::from_millis(150)).await;
    assert_stopped(&controller);
}

#[tokio::test(start_paused = true)]
async fn test_stops_within_window_plus_tick() {
    let controller = controller();
    let timing = controller.timing();
    controller.backward().unwrap();

    sleep(timing.linear_window + timing.tick).await;
    assert_stopped(&controller);
    assert!(controller.faults().borrow().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_remaining_time_counts_down() {
    let controller = controller();
    controller.forward().unwrap();
    assert_eq!(controller.snapshot().remaining_ms, Some(1000));

    sleep(Duration::from_millis(250)).await;
    assert_eq!(controller.snapshot().remaining_ms, Some(750));
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_stopped_is_noop() {
    let controller = controller();
    controller.stop().unwrap();
    controller.stop().unwrap();
    assert_stopped(&controller);
    assert_eq!(controller.watchdog_status().arms, 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_timing() {
    let controller = controller_with(WatchdogTiming {
        tick: Duration::from_millis(10),
        linear_window: Duration::from_millis(50),
        rotation_window: Duration::from_millis(30),
    });
    controller.rotate_right().unwrap();

    sleep(Duration::from_millis(25)).await;
    assert_eq!(controller.direction(), Direction::RotateRight);

    sleep(Duration::from_millis(20)).await;
    assert_stopped(&controller);
}

// Commands from many threads racing the watchdog must never leave a
// moving robot without a deadline, or both pins of a motor driven.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commands_stay_consistent() {
    let controller = Arc::new(controller_with(WatchdogTiming {
        tick: Duration::from_millis(1),
        linear_window: Duration::from_millis(3),
        rotation_window: Duration::from_millis(2),
    }));

    let mut workers = Vec::new();
    for worker in 0..4usize {
        let controller = Arc::clone(&controller);
        workers.push(tokio::task::spawn_blocking(move || {
            for i in 0..500usize {
                match (worker + i) % 5 {
                    0 => controller.forward().unwrap(),
                    1 => controller.backward().unwrap(),
                    2 => controller.rotate_left().unwrap(),
                    3 => controller.rotate_right().unwrap(),
                    _ => controller.stop().unwrap(),
                }
                if i % 50 == 0 {
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
        }));
    }

    let observer = {
        let controller = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || {
            for _ in 0..2000 {
                let state = controller.snapshot();
                assert_eq!(state.direction.is_moving(), state.watchdog_armed);
                assert!(state.left.is_exclusive());
                assert!(state.right.is_exclusive());
            }
        })
    };

    for worker in workers {
        worker.await.unwrap();
    }
    observer.await.unwrap();

    // Left alone, the watchdog brings everything to rest
    sleep(Duration::from_millis(50)).await;
    assert_stopped(&controller);
    assert!(controller.faults().borrow().is_none());
}
