//! RecoverySupervisor 集成测试
//!
//! 通过 `MockRobot` 的一次性故障注入模拟命令失败、急停和退出伺服超时。

use jaka_control::{
    ControlConfig, ControlError, Gripper, GripperLink, GripperWorker, LoopOutcome,
    RecoveryConfig, RecoverySupervisor, RobotSession, SharedBus, SupervisorPhase,
};
use jaka_driver::{MockFault, MockRobot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn control_config() -> ControlConfig {
    ControlConfig {
        tick_interval_s: 0.002,
        filter_window: 2,
        stopped_velocity_eps: 1e-3,
        ..Default::default()
    }
}

fn recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        max_reconnect_attempts: 3,
        reconnect_interval_ms: 1,
        enable_timeout_ms: 500,
        poll_interval_ms: 1,
        ..Default::default()
    }
}

/// 已启动的会话，模拟机器人的关节变化发布到总线
fn setup() -> (RobotSession<MockRobot>, Arc<SharedBus>) {
    let robot = MockRobot::default();
    let bus = Arc::new(SharedBus::new());
    {
        let bus = bus.clone();
        robot.set_state_sink(move |joints| bus.publish_state(*joints));
    }
    let session = RobotSession::new(robot, recovery_config());
    session.start().unwrap();
    bus.publish_state(session.robot().joints());
    bus.publish_target([2.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    (session, bus)
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

fn position(calls: &[&str], op: &str) -> usize {
    calls
        .iter()
        .position(|c| *c == op)
        .unwrap_or_else(|| panic!("{op} not called: {calls:?}"))
}

#[test]
fn test_operator_stop_leaves_servo() {
    let (session, bus) = setup();
    let config = control_config();

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| RecoverySupervisor::new(&session, &bus, &config).run());
        assert!(wait_until(Duration::from_secs(2), || session.robot().call_count("servo_j") > 5));
        assert!(bus.is_control_active());
        assert!(bus.servo().is_active());
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert!(!bus.is_control_active());
    assert!(!bus.servo().is_active());
    assert!(!session.robot().in_servo());
    assert_eq!(session.robot().call_count("clear_error"), 0);
}

#[test]
fn test_emergency_stop_aborts_without_recovery() {
    let (session, bus) = setup();
    let config = control_config();
    session.robot().push_fault("servo_j", MockFault::Protocol(-1));
    session.robot().set_emergency_stop(true);

    let mut supervisor = RecoverySupervisor::new(&session, &bus, &config);
    let err = supervisor.run().unwrap_err();
    assert!(err.is_safety_fault());
    assert_eq!(supervisor.phase(), SupervisorPhase::Abort);

    let calls = session.robot().calls();
    assert!(position(&calls, "servo_move_off") < position(&calls, "logout"));
    assert!(position(&calls, "logout") < position(&calls, "emergency_stop_status"));
    assert_eq!(session.robot().call_count("clear_error"), 0);
    assert_eq!(session.robot().call_count("enable_robot"), 0);
    assert!(!bus.is_control_active());
    assert!(!bus.servo().is_active());
}

struct CountingGripper(Arc<Mutex<u32>>);

impl Gripper for CountingGripper {
    fn name(&self) -> &str {
        "counting"
    }
    fn connect_and_setup(&mut self) -> Result<(), ControlError> {
        *self.0.lock() += 1;
        Ok(())
    }
    fn grip(&mut self) -> Result<(), ControlError> {
        Ok(())
    }
    fn release(&mut self) -> Result<(), ControlError> {
        Ok(())
    }
}

#[test]
fn test_timeout_recovers_and_resumes() {
    let (session, bus) = setup();
    let config = control_config();
    let setups = Arc::new(Mutex::new(0));
    let link = Arc::new(GripperLink::new(Some(Box::new(CountingGripper(setups.clone())))));
    let worker = GripperWorker::spawn(link.clone(), Duration::from_secs(1)).unwrap();
    session.robot().push_fault("servo_j", MockFault::Timeout);

    let (outcome, recoveries) = thread::scope(|s| {
        let handle = s.spawn(|| {
            let mut supervisor =
                RecoverySupervisor::new(&session, &bus, &config).with_gripper(&link, &worker);
            let outcome = supervisor.run();
            (outcome, supervisor.recoveries())
        });
        // 恢复后重新进入伺服模式并继续下发
        assert!(wait_until(Duration::from_secs(5), || {
            session.robot().call_count("servo_move_on") == 2
                && session.robot().call_count("servo_j") > 10
        }));
        assert!(bus.is_control_active());
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(recoveries, 1);
    assert_eq!(*setups.lock(), 1);

    let calls = session.robot().calls();
    let clear = position(&calls, "clear_error");
    let enable = position(&calls, "enable_robot");
    let reenter = calls
        .iter()
        .rposition(|c| *c == "servo_move_on")
        .unwrap();
    assert!(position(&calls, "emergency_stop_status") < clear);
    assert!(clear < enable);
    assert!(enable < reenter);
    assert!(!session.robot().in_servo());
}

#[test]
fn test_leave_servo_timeout_is_tolerated() {
    let (session, bus) = setup();
    let config = control_config();
    session.robot().push_fault("servo_j", MockFault::Protocol(-1));
    session.robot().push_fault("servo_move_off", MockFault::Timeout);

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| RecoverySupervisor::new(&session, &bus, &config).run());
        assert!(wait_until(Duration::from_secs(5), || {
            session.robot().call_count("servo_move_on") == 2
        }));
        bus.request_stop();
        handle.join().unwrap()
    });
    assert_eq!(outcome.unwrap(), LoopOutcome::OperatorStop);
    assert_eq!(session.robot().call_count("clear_error"), 1);
}
