//! 机器人会话
//!
//! 在 [`RobotTransport`] 之上提供带等待的高层操作：
//! 上电/使能等待、运动到位等待、点动、自动恢复使能、关机。

use crate::ControlError;
use crate::bus::ServoModeCell;
use crate::config::RecoveryConfig;
use jaka_driver::{DriverError, RobotTransport};
use jaka_protocol::{JOINT_COUNT, JointVector, MoveMode, Pose, RobotState};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 非伺服运动的速度
pub const MOVE_SPEED: f64 = 10.0;
/// 非伺服运动的加速度
pub const MOVE_ACCEL: f64 = 10.0;
/// 默认到位精度（每轴）
pub const DEFAULT_PRECISION: JointVector = [1.0; JOINT_COUNT];

/// 机器人会话
pub struct RobotSession<T: RobotTransport> {
    robot: T,
    config: RecoveryConfig,
}

impl<T: RobotTransport> RobotSession<T> {
    pub fn new(robot: T, config: RecoveryConfig) -> Self {
        Self { robot, config }
    }

    pub fn robot(&self) -> &T {
        &self.robot
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// 登录并上电，等待上电完成
    pub fn start(&self) -> Result<(), ControlError> {
        self.robot.login()?;
        match self.robot.version() {
            Ok(version) => info!("Controller firmware version: {}", version),
            Err(e) => warn!("Failed to query controller version: {}", e),
        }
        if self.robot.robot_state()?.powered_on {
            return Ok(());
        }
        info!("Powering on robot");
        self.robot.power_on()?;
        self.wait_for_state("robot powered on", |state| state.powered_on)
    }

    /// 使能，等待使能完成
    pub fn enable(&self) -> Result<(), ControlError> {
        if self.robot.robot_state()?.enabled {
            return Ok(());
        }
        info!("Enabling robot");
        self.robot.enable_robot()?;
        self.wait_for_state("robot enabled", |state| state.enabled)
    }

    pub fn is_enabled(&self) -> Result<bool, ControlError> {
        Ok(self.robot.robot_state()?.enabled)
    }

    /// 清除错误并重新使能，返回最终是否已使能
    ///
    /// 与 [`enable`](Self::enable) 不同，总是下发使能命令。
    pub fn recover_automatic_enable(&self) -> Result<bool, ControlError> {
        self.robot.clear_error()?;
        self.robot.enable_robot()?;
        self.wait_for_state("robot enabled", |state| state.enabled)?;
        self.is_enabled()
    }

    /// 进入伺服模式（持有伺服模式锁）
    pub fn enter_servo_mode(&self, servo: &ServoModeCell) -> Result<(), ControlError> {
        servo.transition(true, || self.robot.servo_move_enable(true))?;
        info!("Entered servo mode");
        Ok(())
    }

    /// 退出伺服模式（持有伺服模式锁）
    pub fn leave_servo_mode(&self, servo: &ServoModeCell) -> Result<(), DriverError> {
        servo.transition(false, || self.robot.servo_move_enable(false))?;
        info!("Left servo mode");
        Ok(())
    }

    /// 关节运动并等待到位
    ///
    /// 每隔 `poll_interval` 检查一次，所有轴误差都小于 `precision` 时返回 `true`，
    /// 超时返回 `false`。
    pub fn move_joint_until_completion(
        &self,
        target: &JointVector,
        precision: Option<&JointVector>,
        timeout: Duration,
    ) -> Result<bool, ControlError> {
        self.robot
            .joint_move(*target, MoveMode::Absolute, MOVE_SPEED, MOVE_ACCEL)?;
        self.wait_until_reached(target, precision, timeout, || {
            self.robot.joint_position()
        })
    }

    /// 末端运动并等待到位
    pub fn move_pose_until_completion(
        &self,
        pose: &Pose,
        precision: Option<&JointVector>,
        timeout: Duration,
    ) -> Result<bool, ControlError> {
        self.robot.end_move(*pose, MOVE_SPEED, MOVE_ACCEL)?;
        self.wait_until_reached(pose, precision, timeout, || self.robot.tcp_position())
    }

    /// 单关节点动（相对当前位置移动 `step` 度）
    pub fn jog_joint(&self, joint: usize, step: f64) -> Result<(), ControlError> {
        check_axis(joint)?;
        let mut joints = self.robot.joint_position()?;
        joints[joint] += step;
        self.robot
            .joint_move(joints, MoveMode::Absolute, MOVE_SPEED, MOVE_ACCEL)?;
        Ok(())
    }

    /// TCP 单轴点动
    pub fn jog_tcp(&self, axis: usize, step: f64) -> Result<(), ControlError> {
        check_axis(axis)?;
        let mut pose = self.robot.tcp_position()?;
        pose[axis] += step;
        self.robot.end_move(pose, MOVE_SPEED, MOVE_ACCEL)?;
        Ok(())
    }

    /// 关机：退出伺服模式、去使能、登出
    ///
    /// 每一步都会尝试执行，返回第一个错误。
    pub fn shutdown(&self, servo: &ServoModeCell) -> Result<(), ControlError> {
        let mut first_error: Option<ControlError> = None;

        if servo.is_active()
            && let Err(e) = self.leave_servo_mode(servo)
        {
            warn!("Failed to leave servo mode during shutdown: {}", e);
            servo.force(false);
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.robot.disable_robot() {
            warn!("Failed to disable robot during shutdown: {}", e);
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.robot.logout() {
            warn!("Failed to logout during shutdown: {}", e);
            first_error.get_or_insert(e.into());
        }
        info!("Robot session shut down");
        first_error.map_or(Ok(()), Err)
    }

    fn wait_for_state(
        &self,
        what: &'static str,
        reached: impl Fn(&RobotState) -> bool,
    ) -> Result<(), ControlError> {
        let timeout = self.config.enable_timeout();
        let start = Instant::now();
        loop {
            if reached(&self.robot.robot_state()?) {
                info!("{} after {:?}", what, start.elapsed());
                return Ok(());
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(ControlError::Timeout {
                    what,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(self.config.poll_interval().min(remaining));
        }
    }

    fn wait_until_reached(
        &self,
        target: &[f64; JOINT_COUNT],
        precision: Option<&JointVector>,
        timeout: Duration,
        read: impl Fn() -> Result<[f64; JOINT_COUNT], DriverError>,
    ) -> Result<bool, ControlError> {
        let precision = precision.unwrap_or(&DEFAULT_PRECISION);
        let start = Instant::now();
        loop {
            let current = read()?;
            let reached = (0..JOINT_COUNT).all(|i| (current[i] - target[i]).abs() < precision[i]);
            if reached {
                // 到位后再等待一个周期让机械臂稳定
                std::thread::sleep(self.config.poll_interval());
                return Ok(true);
            }
            std::thread::sleep(self.config.poll_interval());
            if start.elapsed() > timeout {
                info!("Timeout before reaching destination");
                return Ok(false);
            }
        }
    }
}

fn check_axis(axis: usize) -> Result<(), ControlError> {
    if axis >= JOINT_COUNT {
        return Err(DriverError::InvalidInput(format!(
            "axis index {axis} out of range (0..{JOINT_COUNT})"
        ))
        .into());
    }
    Ok(())
}
