//! ControlLoop 集成测试
//!
//! 使用 `MockRobot`：每次 `servo_j` 后模拟机器人把新关节位置发布到总线（代替反馈流）。

use jaka_control::{
    ControlConfig, ControlLoop, Gripper, GripperLink, GripperWorker, LoopOutcome, LoopState,
    SharedBus,
};
use jaka_control::ControlError;
use jaka_driver::{MockRobot, RobotTransport};
use jaka_protocol::JointVector;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config() -> ControlConfig {
    ControlConfig {
        tick_interval_s: 0.002,
        filter_window: 2,
        stopped_velocity_eps: 1e-3,
        ..Default::default()
    }
}

type History = Arc<Mutex<Vec<(Instant, JointVector)>>>;

/// 已登录、已进入伺服模式的模拟机器人，关节位置变化时发布到总线并带时间戳记录
fn setup() -> (MockRobot, Arc<SharedBus>, History) {
    let robot = MockRobot::default();
    let bus = Arc::new(SharedBus::new());
    let history = Arc::new(Mutex::new(Vec::new()));
    {
        let bus = bus.clone();
        let history = history.clone();
        robot.set_state_sink(move |joints| {
            bus.publish_state(*joints);
            history.lock().push((Instant::now(), *joints));
        });
    }
    robot.login().unwrap();
    robot.servo_move_enable(true).unwrap();
    bus.publish_state(robot.joints());
    (robot, bus, history)
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_stop_while_moving_decelerates_and_stops() {
    let (robot, bus, history) = setup();
    let config = fast_config();
    bus.publish_target([5.0, -3.0, 2.0, 0.0, 1.0, 0.0]);

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| ControlLoop::new(&robot, &bus, &config).run());
        assert!(wait_until(Duration::from_secs(5), || robot.joints()[0] > 1.0));
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(bus.last_delta(), [0.0; 6]);

    // 每个周期的增量不超过 ratio · v_max · 2T（dt 钳位到 2 倍周期）
    let max_step = config.speed_limit_ratio * 180.0 * 2.0 * config.tick_interval_s + 1e-9;
    let history = history.lock();
    assert!(history.len() > 10);
    for pair in history.windows(2) {
        for i in 0..6 {
            assert!((pair[1].1[i] - pair[0].1[i]).abs() <= max_step);
        }
    }

    // 停止前后速度平滑过渡：按 15 个周期分段估计速度，相邻段的加速度不超过
    // ratio · a_max（留 25% 余量给计时抖动）；含调度停顿的段跳过
    let max_accel = config.speed_limit_ratio * 720.0 * 1.25;
    let stall = Duration::from_secs_f64(3.0 * config.tick_interval_s);
    let segments: Vec<Option<(f64, JointVector)>> = history
        .chunks(15)
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| {
            let (start, end) = (w[0][0], w[1][0]);
            let stalled = w[0]
                .iter()
                .chain(std::iter::once(&w[1][0]))
                .collect::<Vec<_>>()
                .windows(2)
                .any(|p| p[1].0 - p[0].0 > stall);
            let span = (end.0 - start.0).as_secs_f64();
            (!stalled && span > 0.0).then(|| {
                let mid = (start.0 - history[0].0).as_secs_f64() + span / 2.0;
                let velocity: JointVector = std::array::from_fn(|i| (end.1[i] - start.1[i]) / span);
                (mid, velocity)
            })
        })
        .collect();
    let mut checked = 0;
    for pair in segments.windows(2) {
        let (Some((t0, v0)), Some((t1, v1))) = (pair[0], pair[1]) else {
            continue;
        };
        for i in 0..6 {
            let accel = (v1[i] - v0[i]).abs() / (t1 - t0);
            assert!(accel <= max_accel, "axis {i}: {accel} deg/s^2");
        }
        checked += 1;
    }
    assert!(checked > 5);

    // 停在冻结的目标附近，而不是原目标
    assert!(robot.joints()[0] > 0.5);
    assert!(robot.joints()[0] < 5.0);
}

#[test]
fn test_stop_before_running_sends_nothing() {
    let robot = MockRobot::default();
    robot.login().unwrap();
    let bus = SharedBus::new();
    let config = fast_config();
    bus.request_stop();

    let mut control = ControlLoop::new(&robot, &bus, &config);
    assert_eq!(control.run().unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(control.state(), LoopState::Stopped);
    assert_eq!(robot.call_count("servo_j"), 0);
}

#[test]
fn test_waits_for_target_before_running() {
    let (robot, bus, _history) = setup();
    let config = fast_config();

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| ControlLoop::new(&robot, &bus, &config).run());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(robot.call_count("servo_j"), 0);

        bus.publish_target([0.0; 6]);
        assert!(wait_until(Duration::from_secs(2), || robot.call_count("servo_j") > 3));
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(robot.joints(), [0.0; 6]);
}

#[test]
fn test_dry_run_shapes_without_sending() {
    let (robot, bus, _history) = setup();
    let config = ControlConfig {
        dry_run: true,
        ..fast_config()
    };
    bus.publish_target([3.0; 6]);

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| ControlLoop::new(&robot, &bus, &config).run());
        assert!(wait_until(Duration::from_secs(5), || bus.last_delta() != [0.0; 6]));
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(robot.call_count("servo_j"), 0);
    assert_eq!(robot.joints(), [0.0; 6]);
}

/// 把动作写入共享列表的夹爪
struct SharedGripper(Arc<Mutex<Vec<&'static str>>>);

impl Gripper for SharedGripper {
    fn name(&self) -> &str {
        "shared"
    }
    fn connect_and_setup(&mut self) -> Result<(), ControlError> {
        self.0.lock().push("setup");
        Ok(())
    }
    fn grip(&mut self) -> Result<(), ControlError> {
        self.0.lock().push("grip");
        Ok(())
    }
    fn release(&mut self) -> Result<(), ControlError> {
        self.0.lock().push("release");
        Ok(())
    }
}

#[test]
fn test_gripper_commands_dispatched_on_transitions() {
    let (robot, bus, _history) = setup();
    let config = fast_config();
    let actions = Arc::new(Mutex::new(Vec::new()));
    let link = Arc::new(GripperLink::new(Some(Box::new(SharedGripper(actions.clone())))));
    let worker = GripperWorker::spawn(link, Duration::from_secs(1)).unwrap();
    bus.publish_target([0.0; 6]);

    let outcome = thread::scope(|s| {
        let handle =
            s.spawn(|| ControlLoop::new(&robot, &bus, &config).with_gripper(&worker).run());
        bus.set_grip(true);
        bus.set_grip(true);
        assert!(wait_until(Duration::from_secs(2), || actions.lock().len() == 1));
        bus.set_grip(false);
        assert!(wait_until(Duration::from_secs(2), || actions.lock().len() == 2));
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(*actions.lock(), ["grip", "release"]);
}
