//! # JAKA Protocol
//!
//! JAKA 控制器 TCP 协议定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `command`: 命令帧构建（`{"cmdName": ...}` JSON）
//! - `response`: 响应帧解析（`errorCode` 快速扫描 + 完整 JSON 解码）
//! - `feedback`: 状态反馈帧（端口 10000 推送）
//! - `stream`: 反馈字节流分帧器
//!
//! ## 单位
//!
//! 关节角度统一使用 **度**，TCP 位置使用 mm + 度（RxRyRz）。

pub mod command;
pub mod feedback;
pub mod response;
pub mod stream;

pub use command::{Command, MoveMode};
pub use feedback::{ErrorReport, FeedbackFrame, are_all_errors_stateless, is_success_code};
pub use response::{
    ResponseFrame, RobotState, complete_object_len, parse_error_code_fast, scan_vector_field,
};
pub use stream::{FRAME_MARKER, FrameSplitter, MAX_PENDING_BYTES};

use thiserror::Error;

/// 关节数量（6 轴机械臂）
pub const JOINT_COUNT: usize = 6;

/// 关节向量（6 个关节，单位：度）
///
/// 使用定长数组，长度不变式由类型系统保证。
pub type JointVector = [f64; JOINT_COUNT];

/// 笛卡尔位姿 `[X, Y, Z, Rx, Ry, Rz]`
/// - X, Y, Z: 位置（mm）
/// - Rx, Ry, Rz: 姿态角（度）
pub type Pose = [f64; 6];

/// 协议层错误
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 响应中找不到 `errorCode`
    #[error("Missing errorCode in response")]
    MissingErrorCode,

    /// `errorCode` 不是整数
    #[error("Invalid errorCode: {0:?}")]
    InvalidErrorCode(String),

    /// 缺少必需字段
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// 字段内容无法解析
    #[error("Invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// 数组长度不符
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// JSON 解码失败
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 将切片转换为定长关节向量
///
/// 长度不等于 6 时返回 `ProtocolError::InvalidLength`。
pub fn joint_vector_from_slice(values: &[f64]) -> Result<JointVector, ProtocolError> {
    <JointVector>::try_from(values).map_err(|_| ProtocolError::InvalidLength {
        expected: JOINT_COUNT,
        actual: values.len(),
    })
}
