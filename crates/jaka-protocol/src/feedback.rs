//! 状态反馈帧
//!
//! 控制器在反馈端口（默认 10000）上以约 30ms 的周期连续推送 JSON 对象，
//! 每个对象以 `{"len":` 开头。这里只建模控制链路需要的字段，其余字段忽略。

use crate::{JointVector, Pose, ProtocolError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Instant;

/// 状态反馈帧
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackFrame {
    /// 帧长度（控制器填写，仅用于诊断）
    #[serde(default)]
    pub len: Option<u64>,

    /// 错误码（控制器可能以字符串或数字发送，统一为字符串）
    #[serde(default = "default_errcode", deserialize_with = "string_or_number")]
    pub errcode: String,
    #[serde(default)]
    pub errmsg: String,

    #[serde(default, deserialize_with = "bool_or_int")]
    pub powered_on: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub paused: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub on_soft_limit: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub emergency_stop: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub protective_stop: bool,

    /// TCP 实际位姿（mm + 度）
    pub actual_position: Pose,
    /// 关节实际位置（度）
    pub joint_actual_position: JointVector,

    /// 力矩传感器原始数据（嵌套数组）
    #[serde(default)]
    pub torqsensor: Value,

    /// 本地接收时间戳（单调时钟，解码时赋值）
    #[serde(skip, default = "Instant::now")]
    pub received_at: Instant,
}

fn default_errcode() -> String {
    "0".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(default_errcode()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected bool or integer, got {other}"
        ))),
    }
}

/// 判断错误码是否表示"无错误"（`"0"` 或 `"0x0"`）
pub fn is_success_code(code: &str) -> bool {
    matches!(code.trim(), "0" | "0x0" | "0X0")
}

impl FeedbackFrame {
    /// 从单个帧的字节解码
    ///
    /// 解码成功时 `received_at` 为当前时刻。
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// 帧是否携带错误
    pub fn is_error(&self) -> bool {
        !is_success_code(&self.errcode)
    }

    /// 力矩传感器实际受力（6 维，`torqsensor[1][2]`）
    ///
    /// 数据缺失或格式不符时返回 `None`。
    pub fn force_values(&self) -> Option<[f64; 6]> {
        let values = self.torqsensor.get(1)?.get(2)?.as_array()?;
        if values.len() != 6 {
            return None;
        }
        let mut out = [0.0; 6];
        for (dst, v) in out.iter_mut().zip(values) {
            *dst = v.as_f64()?;
        }
        Some(out)
    }

    /// 提取错误相关字段
    pub fn error_report(&self) -> ErrorReport {
        ErrorReport {
            errcode: self.errcode.clone(),
            errmsg: self.errmsg.clone(),
            powered_on: self.powered_on,
            enabled: self.enabled,
            paused: self.paused,
            on_soft_limit: self.on_soft_limit,
            emergency_stop: self.emergency_stop,
            protective_stop: self.protective_stop,
        }
    }
}

/// 错误报告（反馈帧中与错误相关的字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub errcode: String,
    pub errmsg: String,
    pub powered_on: bool,
    pub enabled: bool,
    pub paused: bool,
    pub on_soft_limit: bool,
    pub emergency_stop: bool,
    pub protective_stop: bool,
}

impl ErrorReport {
    pub fn is_error(&self) -> bool {
        !is_success_code(&self.errcode)
    }
}

/// 所有错误是否都可以自动恢复（没有任何一个处于急停状态）
pub fn are_all_errors_stateless(errors: &[ErrorReport]) -> bool {
    errors.iter().all(|e| !e.emergency_stop)
}
