//! 机器人能力抽象
//!
//! 控制层只依赖 [`RobotTransport`]，真实控制器（[`ProtocolClient`](crate::ProtocolClient)）
//! 和内存模拟器（`MockRobot`，feature `mock`）通过泛型参数注入。

use crate::DriverError;
use jaka_protocol::{JointVector, MoveMode, Pose, RobotState};

/// 机器人命令通道能力
///
/// 所有方法都是同步请求/响应；实现者负责保证同一时刻只有一个请求在途。
pub trait RobotTransport: Send + Sync {
    /// 建立连接
    fn login(&self) -> Result<(), DriverError>;
    /// 关闭连接
    fn logout(&self) -> Result<(), DriverError>;

    fn power_on(&self) -> Result<(), DriverError>;
    fn power_off(&self) -> Result<(), DriverError>;
    fn enable_robot(&self) -> Result<(), DriverError>;
    fn disable_robot(&self) -> Result<(), DriverError>;
    fn clear_error(&self) -> Result<(), DriverError>;

    /// 上电/使能状态
    fn robot_state(&self) -> Result<RobotState, DriverError>;
    /// 当前关节位置（度）
    fn joint_position(&self) -> Result<JointVector, DriverError>;
    /// 当前 TCP 位姿（mm + 度）
    fn tcp_position(&self) -> Result<Pose, DriverError>;

    /// 关节空间运动（加速度 ≤ 8000）
    fn joint_move(
        &self,
        joints: JointVector,
        mode: MoveMode,
        speed: f64,
        accel: f64,
    ) -> Result<(), DriverError>;
    /// 末端运动
    fn end_move(&self, pose: Pose, speed: f64, accel: f64) -> Result<(), DriverError>;
    /// 直线运动（`moveL`，加速度 ≤ 8000）
    fn linear_move(
        &self,
        pose: Pose,
        mode: MoveMode,
        speed: f64,
        accel: f64,
        tol: f64,
    ) -> Result<(), DriverError>;

    /// 进入（`true`）/退出（`false`）伺服模式
    fn servo_move_enable(&self, enable: bool) -> Result<(), DriverError>;
    fn is_in_servomove(&self) -> Result<bool, DriverError>;
    /// 伺服关节运动（控制周期热路径）
    fn servo_j(&self, joints: JointVector, mode: MoveMode, step_num: u32)
    -> Result<(), DriverError>;

    fn emergency_stop_status(&self) -> Result<bool, DriverError>;
    /// 控制器固件版本
    fn version(&self) -> Result<String, DriverError>;
}

impl<T: RobotTransport + ?Sized> RobotTransport for std::sync::Arc<T> {
    fn login(&self) -> Result<(), DriverError> {
        (**self).login()
    }
    fn logout(&self) -> Result<(), DriverError> {
        (**self).logout()
    }
    fn power_on(&self) -> Result<(), DriverError> {
        (**self).power_on()
    }
    fn power_off(&self) -> Result<(), DriverError> {
        (**self).power_off()
    }
    fn enable_robot(&self) -> Result<(), DriverError> {
        (**self).enable_robot()
    }
    fn disable_robot(&self) -> Result<(), DriverError> {
        (**self).disable_robot()
    }
    fn clear_error(&self) -> Result<(), DriverError> {
        (**self).clear_error()
    }
    fn robot_state(&self) -> Result<RobotState, DriverError> {
        (**self).robot_state()
    }
    fn joint_position(&self) -> Result<JointVector, DriverError> {
        (**self).joint_position()
    }
    fn tcp_position(&self) -> Result<Pose, DriverError> {
        (**self).tcp_position()
    }
    fn joint_move(
        &self,
        joints: JointVector,
        mode: MoveMode,
        speed: f64,
        accel: f64,
    ) -> Result<(), DriverError> {
        (**self).joint_move(joints, mode, speed, accel)
    }
    fn end_move(&self, pose: Pose, speed: f64, accel: f64) -> Result<(), DriverError> {
        (**self).end_move(pose, speed, accel)
    }
    fn linear_move(
        &self,
        pose: Pose,
        mode: MoveMode,
        speed: f64,
        accel: f64,
        tol: f64,
    ) -> Result<(), DriverError> {
        (**self).linear_move(pose, mode, speed, accel, tol)
    }
    fn servo_move_enable(&self, enable: bool) -> Result<(), DriverError> {
        (**self).servo_move_enable(enable)
    }
    fn is_in_servomove(&self) -> Result<bool, DriverError> {
        (**self).is_in_servomove()
    }
    fn servo_j(
        &self,
        joints: JointVector,
        mode: MoveMode,
        step_num: u32,
    ) -> Result<(), DriverError> {
        (**self).servo_j(joints, mode, step_num)
    }
    fn emergency_stop_status(&self) -> Result<bool, DriverError> {
        (**self).emergency_stop_status()
    }
    fn version(&self) -> Result<String, DriverError> {
        (**self).version()
    }
}
