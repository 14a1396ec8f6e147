//! 内存模拟机器人（feature `mock`）
//!
//! 实现 [`RobotTransport`]，用于在没有控制器的情况下测试控制层：
//! - 记录每次调用的命令名
//! - 可以为指定命令预置一次性故障
//! - `servo_j` 在伺服模式下按增量更新关节位置，并可推送到状态回调

use crate::{DriverError, RobotTransport};
use jaka_protocol::{JointVector, MoveMode, Pose, RobotState};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::io;

/// 预置故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// 模拟 socket 复位
    Transport,
    /// 模拟响应超时
    Timeout,
    /// 控制器返回指定的 `errorCode`
    Protocol(i32),
}

impl MockFault {
    fn into_error(self, op: &'static str) -> DriverError {
        match self {
            MockFault::Transport => DriverError::Transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("mock transport fault on {op}"),
            )),
            MockFault::Timeout => DriverError::Timeout,
            MockFault::Protocol(code) => DriverError::Protocol {
                code,
                payload: format!(r#"{{"errorCode": "{code}", "cmdName": "{op}"}}"#),
            },
        }
    }
}

type StateSink = Box<dyn Fn(&JointVector) + Send + Sync>;

#[derive(Debug)]
struct MockState {
    connected: bool,
    powered_on: bool,
    enabled: bool,
    in_servo: bool,
    emergency_stop: bool,
    joints: JointVector,
    pose: Pose,
    version: String,
    calls: Vec<&'static str>,
    faults: VecDeque<(&'static str, MockFault)>,
    /// 使能后需要经过的 `robot_state` 轮询次数
    enable_delay_polls: u32,
    pending_enable_polls: u32,
}

/// 内存模拟机器人
pub struct MockRobot {
    state: Mutex<MockState>,
    sink: RwLock<Option<StateSink>>,
}

impl Default for MockRobot {
    fn default() -> Self {
        Self::new([0.0; 6])
    }
}

impl MockRobot {
    /// 创建已上电、已使能、未进入伺服模式的模拟机器人
    pub fn new(joints: JointVector) -> Self {
        Self {
            state: Mutex::new(MockState {
                connected: false,
                powered_on: true,
                enabled: true,
                in_servo: false,
                emergency_stop: false,
                joints,
                pose: [400.0, 0.0, 300.0, 180.0, 0.0, 90.0],
                version: "mock-1.0.0".to_string(),
                calls: Vec::new(),
                faults: VecDeque::new(),
                enable_delay_polls: 0,
                pending_enable_polls: 0,
            }),
            sink: RwLock::new(None),
        }
    }

    /// 预置一次性故障：下一次调用 `op` 时返回该错误
    pub fn push_fault(&self, op: &'static str, fault: MockFault) {
        self.state.lock().faults.push_back((op, fault));
    }

    pub fn set_emergency_stop(&self, active: bool) {
        self.state.lock().emergency_stop = active;
    }

    pub fn set_powered(&self, powered_on: bool, enabled: bool) {
        let mut state = self.state.lock();
        state.powered_on = powered_on;
        state.enabled = enabled;
    }

    /// 使能命令后，`robot_state` 需要轮询 `polls` 次才报告已使能
    pub fn set_enable_delay(&self, polls: u32) {
        self.state.lock().enable_delay_polls = polls;
    }

    /// 关节位置变化时的回调（模拟反馈流）
    pub fn set_state_sink(&self, sink: impl Fn(&JointVector) + Send + Sync + 'static) {
        *self.sink.write() = Some(Box::new(sink));
    }

    pub fn joints(&self) -> JointVector {
        self.state.lock().joints
    }

    pub fn in_servo(&self) -> bool {
        self.state.lock().in_servo
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// 调用记录（命令名）
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    /// 指定命令的调用次数
    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// 记录调用、检查连接并弹出预置故障
    fn enter(&self, op: &'static str) -> Result<parking_lot::MutexGuard<'_, MockState>, DriverError> {
        let mut state = self.state.lock();
        state.calls.push(op);
        if let Some(pos) = state.faults.iter().position(|(name, _)| *name == op)
            && let Some((_, fault)) = state.faults.remove(pos)
        {
            return Err(fault.into_error(op));
        }
        if !state.connected && op != "login" {
            return Err(DriverError::NotConnected);
        }
        Ok(state)
    }

    fn publish(&self, joints: JointVector) {
        if let Some(sink) = self.sink.read().as_ref() {
            sink(&joints);
        }
    }

    fn rejected(op: &'static str) -> DriverError {
        MockFault::Protocol(-1).into_error(op)
    }
}

impl RobotTransport for MockRobot {
    fn login(&self) -> Result<(), DriverError> {
        self.enter("login")?.connected = true;
        Ok(())
    }

    fn logout(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.calls.push("logout");
        state.connected = false;
        Ok(())
    }

    fn power_on(&self) -> Result<(), DriverError> {
        self.enter("power_on")?.powered_on = true;
        Ok(())
    }

    fn power_off(&self) -> Result<(), DriverError> {
        let mut state = self.enter("power_off")?;
        state.powered_on = false;
        state.enabled = false;
        state.in_servo = false;
        Ok(())
    }

    fn enable_robot(&self) -> Result<(), DriverError> {
        let mut state = self.enter("enable_robot")?;
        if !state.powered_on || state.emergency_stop {
            return Err(Self::rejected("enable_robot"));
        }
        state.enabled = true;
        state.pending_enable_polls = state.enable_delay_polls;
        Ok(())
    }

    fn disable_robot(&self) -> Result<(), DriverError> {
        let mut state = self.enter("disable_robot")?;
        state.enabled = false;
        state.in_servo = false;
        Ok(())
    }

    fn clear_error(&self) -> Result<(), DriverError> {
        self.enter("clear_error").map(drop)
    }

    fn robot_state(&self) -> Result<RobotState, DriverError> {
        let mut state = self.enter("get_robot_state")?;
        let enabled = if state.pending_enable_polls > 0 {
            state.pending_enable_polls -= 1;
            false
        } else {
            state.enabled
        };
        Ok(RobotState {
            powered_on: state.powered_on,
            enabled,
        })
    }

    fn joint_position(&self) -> Result<JointVector, DriverError> {
        Ok(self.enter("get_joint_pos")?.joints)
    }

    fn tcp_position(&self) -> Result<Pose, DriverError> {
        Ok(self.enter("get_tcp_pos")?.pose)
    }

    fn joint_move(
        &self,
        joints: JointVector,
        mode: MoveMode,
        _speed: f64,
        accel: f64,
    ) -> Result<(), DriverError> {
        let updated = {
            let mut state = self.enter("joint_move")?;
            if accel > jaka_protocol::command::MAX_ACCEL {
                return Err(DriverError::InvalidInput(format!("accel {accel} exceeds limit")));
            }
            if !state.enabled {
                return Err(Self::rejected("joint_move"));
            }
            apply(&mut state.joints, &joints, mode);
            state.joints
        };
        self.publish(updated);
        Ok(())
    }

    fn end_move(&self, pose: Pose, _speed: f64, _accel: f64) -> Result<(), DriverError> {
        let mut state = self.enter("end_move")?;
        if !state.enabled {
            return Err(Self::rejected("end_move"));
        }
        state.pose = pose;
        Ok(())
    }

    fn linear_move(
        &self,
        pose: Pose,
        mode: MoveMode,
        _speed: f64,
        accel: f64,
        _tol: f64,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("moveL")?;
        if accel > jaka_protocol::command::MAX_ACCEL {
            return Err(DriverError::InvalidInput(format!("accel {accel} exceeds limit")));
        }
        if !state.enabled {
            return Err(Self::rejected("moveL"));
        }
        apply(&mut state.pose, &pose, mode);
        Ok(())
    }

    fn servo_move_enable(&self, enable: bool) -> Result<(), DriverError> {
        let op = if enable { "servo_move_on" } else { "servo_move_off" };
        let mut state = self.enter(op)?;
        if enable && !state.enabled {
            return Err(Self::rejected(op));
        }
        state.in_servo = enable;
        Ok(())
    }

    fn is_in_servomove(&self) -> Result<bool, DriverError> {
        Ok(self.enter("is_in_servomove")?.in_servo)
    }

    fn servo_j(
        &self,
        joints: JointVector,
        mode: MoveMode,
        _step_num: u32,
    ) -> Result<(), DriverError> {
        let updated = {
            let mut state = self.enter("servo_j")?;
            if !state.in_servo {
                return Err(Self::rejected("servo_j"));
            }
            apply(&mut state.joints, &joints, mode);
            state.joints
        };
        self.publish(updated);
        Ok(())
    }

    fn emergency_stop_status(&self) -> Result<bool, DriverError> {
        Ok(self.enter("emergency_stop_status")?.emergency_stop)
    }

    fn version(&self) -> Result<String, DriverError> {
        Ok(self.enter("get_version")?.version.clone())
    }
}

fn apply(current: &mut [f64; 6], value: &[f64; 6], mode: MoveMode) {
    match mode {
        MoveMode::Absolute => *current = *value,
        MoveMode::Incremental => {
            for (c, v) in current.iter_mut().zip(value) {
                *c += v;
            }
        },
    }
}
