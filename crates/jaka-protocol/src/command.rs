//! 命令帧定义
//!
//! 每个请求是一个 JSON 对象：`{"cmdName": "<name>", ...参数}`，
//! 序列化后直接写入 socket（不带换行符）。

use crate::{JointVector, Pose, ProtocolError};
use serde::Serialize;

/// `joint_move` / `moveL` 允许的最大加速度
pub const MAX_ACCEL: f64 = 8000.0;

/// 运动模式（`relFlag`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    /// 绝对运动
    #[default]
    Absolute,
    /// 增量运动
    Incremental,
}

impl MoveMode {
    /// 协议中的 `relFlag` 值
    pub fn rel_flag(self) -> u8 {
        match self {
            MoveMode::Absolute => 0,
            MoveMode::Incremental => 1,
        }
    }
}

// ============================================================================
// 命令
// ============================================================================

/// 控制器命令
///
/// `cmdName` 由 serde 的内部标签生成，参数字段使用控制器的驼峰命名。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmdName", rename_all = "snake_case")]
pub enum Command {
    PowerOn,
    PowerOff,
    EnableRobot,
    DisableRobot,
    ClearError,
    IsInServomove,
    GetJointPos,
    GetTcpPos,
    GetVersion,
    EmergencyStopStatus,
    GetRobotState,

    /// 进入/退出伺服模式（`relFlag`: 1 = 进入，0 = 退出）
    ServoMove {
        #[serde(rename = "relFlag")]
        rel_flag: u8,
    },

    /// 伺服关节运动（每个控制周期发送一次）
    ServoJ {
        #[serde(rename = "jointPosition")]
        joint_position: JointVector,
        #[serde(rename = "relFlag")]
        rel_flag: u8,
        #[serde(rename = "stepNum")]
        step_num: u32,
    },

    JointMove {
        #[serde(rename = "relFlag")]
        rel_flag: u8,
        #[serde(rename = "jointPosition")]
        joint_position: JointVector,
        speed: f64,
        accel: f64,
    },

    EndMove {
        #[serde(rename = "endPosition")]
        end_position: Pose,
        speed: f64,
        accel: f64,
    },

    #[serde(rename = "moveL")]
    MoveL {
        #[serde(rename = "relFlag")]
        rel_flag: u8,
        #[serde(rename = "cartPosition")]
        cart_position: Pose,
        speed: f64,
        accel: f64,
        tol: f64,
    },
}

impl Command {
    /// 创建 `servo_move` 命令
    pub fn servo_move(enable: bool) -> Self {
        Command::ServoMove {
            rel_flag: u8::from(enable),
        }
    }

    /// 创建 `servo_j` 命令
    ///
    /// # 参数
    /// - `joint_position`: 目标（增量模式下为关节增量），单位：度
    /// - `mode`: 运动模式
    /// - `step_num`: 插值周期倍数（1 = 一个伺服周期）
    pub fn servo_j(joint_position: JointVector, mode: MoveMode, step_num: u32) -> Self {
        Command::ServoJ {
            joint_position,
            rel_flag: mode.rel_flag(),
            step_num,
        }
    }

    /// 创建 `joint_move` 命令
    ///
    /// 加速度超过 [`MAX_ACCEL`] 时返回错误。
    pub fn joint_move(
        joint_position: JointVector,
        mode: MoveMode,
        speed: f64,
        accel: f64,
    ) -> Result<Self, ProtocolError> {
        check_accel(accel)?;
        Ok(Command::JointMove {
            rel_flag: mode.rel_flag(),
            joint_position,
            speed,
            accel,
        })
    }

    /// 创建 `end_move` 命令
    pub fn end_move(end_position: Pose, speed: f64, accel: f64) -> Self {
        Command::EndMove {
            end_position,
            speed,
            accel,
        }
    }

    /// 创建 `moveL` 命令
    ///
    /// 加速度超过 [`MAX_ACCEL`] 时返回错误。
    pub fn linear_move(
        cart_position: Pose,
        mode: MoveMode,
        speed: f64,
        accel: f64,
        tol: f64,
    ) -> Result<Self, ProtocolError> {
        check_accel(accel)?;
        Ok(Command::MoveL {
            rel_flag: mode.rel_flag(),
            cart_position,
            speed,
            accel,
            tol,
        })
    }

    /// 协议中的命令名
    pub fn name(&self) -> &'static str {
        match self {
            Command::PowerOn => "power_on",
            Command::PowerOff => "power_off",
            Command::EnableRobot => "enable_robot",
            Command::DisableRobot => "disable_robot",
            Command::ClearError => "clear_error",
            Command::IsInServomove => "is_in_servomove",
            Command::GetJointPos => "get_joint_pos",
            Command::GetTcpPos => "get_tcp_pos",
            Command::GetVersion => "get_version",
            Command::EmergencyStopStatus => "emergency_stop_status",
            Command::GetRobotState => "get_robot_state",
            Command::ServoMove { .. } => "servo_move",
            Command::ServoJ { .. } => "servo_j",
            Command::JointMove { .. } => "joint_move",
            Command::EndMove { .. } => "end_move",
            Command::MoveL { .. } => "moveL",
        }
    }

    /// 热路径命令：只需 `errorCode` 或单个数组字段，使用快速扫描解析响应
    pub fn is_hot_path(&self) -> bool {
        matches!(
            self,
            Command::ServoJ { .. } | Command::GetJointPos | Command::GetTcpPos
        )
    }

    /// 编码为请求字节（单行 JSON，无换行）
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn check_accel(accel: f64) -> Result<(), ProtocolError> {
    if accel.is_finite() && accel <= MAX_ACCEL {
        Ok(())
    } else {
        Err(ProtocolError::InvalidField {
            field: "accel",
            value: accel.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn encode_value(cmd: &Command) -> Value {
        serde_json::from_slice(&cmd.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_unit_command_encoding() {
        let bytes = Command::PowerOn.encode().unwrap();
        assert_eq!(bytes, br#"{"cmdName":"power_on"}"#);
        assert!(!bytes.ends_with(b"\n"));

        let v = encode_value(&Command::IsInServomove);
        assert_eq!(v["cmdName"], "is_in_servomove");
        let v = encode_value(&Command::GetTcpPos);
        assert_eq!(v["cmdName"], "get_tcp_pos");
    }

    #[test]
    fn test_servo_j_encoding() {
        let cmd = Command::servo_j([0.5, 0.0, 0.0, 0.0, 0.0, -0.25], MoveMode::Incremental, 1);
        let v = encode_value(&cmd);
        assert_eq!(v["cmdName"], "servo_j");
        assert_eq!(v["relFlag"], 1);
        assert_eq!(v["stepNum"], 1);
        assert_eq!(v["jointPosition"][0], 0.5);
        assert_eq!(v["jointPosition"][5], -0.25);
        assert!(cmd.is_hot_path());
    }

    #[test]
    fn test_servo_move_encoding() {
        let v = encode_value(&Command::servo_move(true));
        assert_eq!(v["cmdName"], "servo_move");
        assert_eq!(v["relFlag"], 1);
        let v = encode_value(&Command::servo_move(false));
        assert_eq!(v["relFlag"], 0);
    }

    #[test]
    fn test_move_l_name_and_fields() {
        let cmd =
            Command::linear_move([1.0, 2.0, 3.0, 0.0, 0.0, 0.0], MoveMode::Absolute, 100.0, 500.0, 0.1)
                .unwrap();
        let v = encode_value(&cmd);
        assert_eq!(v["cmdName"], "moveL");
        assert_eq!(cmd.name(), "moveL");
        assert_eq!(v["cartPosition"][2], 3.0);
        assert_eq!(v["tol"], 0.1);
        assert!(!cmd.is_hot_path());
    }

    #[test]
    fn test_accel_limit() {
        assert!(Command::joint_move([0.0; 6], MoveMode::Absolute, 10.0, MAX_ACCEL).is_ok());
        let err = Command::joint_move([0.0; 6], MoveMode::Absolute, 10.0, 8000.1).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "accel", .. }));
        assert!(
            Command::linear_move([0.0; 6], MoveMode::Incremental, 10.0, f64::NAN, 0.0).is_err()
        );
    }

    #[test]
    fn test_name_matches_encoded_cmd_name() {
        let cmds = [
            Command::PowerOff,
            Command::EnableRobot,
            Command::DisableRobot,
            Command::ClearError,
            Command::GetJointPos,
            Command::GetVersion,
            Command::EmergencyStopStatus,
            Command::GetRobotState,
            Command::end_move([0.0; 6], 1.0, 1.0),
        ];
        for cmd in cmds {
            assert_eq!(encode_value(&cmd)["cmdName"], cmd.name());
        }
    }
}
