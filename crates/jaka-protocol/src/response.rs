//! 响应帧解析
//!
//! 响应格式：`{"errorCode": "<int>", "errorMsg": "...", ...payload}`。
//! `errorCode == 0` 表示成功。
//!
//! 热路径（`servo_j`、`get_joint_pos`、`get_tcp_pos`）不做完整 JSON 解码，
//! 而是直接在原始文本中扫描所需字段。

use crate::{JointVector, Pose, ProtocolError, joint_vector_from_slice};
use serde::de::DeserializeOwned;
use serde_json::Value;

const ERROR_CODE_KEY: &str = "\"errorCode\"";

/// 快速提取 `errorCode`
///
/// 同时接受字符串编码（`"errorCode": "0"`）和数字编码（`"errorCode": 0`），
/// 冒号两侧允许空白。
pub fn parse_error_code_fast(raw: &str) -> Result<i32, ProtocolError> {
    let start = raw
        .find(ERROR_CODE_KEY)
        .ok_or(ProtocolError::MissingErrorCode)?;
    let rest = raw[start + ERROR_CODE_KEY.len()..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or(ProtocolError::MissingErrorCode)?
        .trim_start();
    let rest = rest.strip_prefix('"').unwrap_or(rest);
    let end = rest
        .find(|c: char| c == '"' || c == ',' || c == '}' || c.is_whitespace())
        .unwrap_or(rest.len());
    let token = &rest[..end];
    token
        .parse::<i32>()
        .map_err(|_| ProtocolError::InvalidErrorCode(token.to_string()))
}

/// 快速提取 6 元素浮点数组字段（例如 `"joint_pos": [j1, ..., j6]`）
pub fn scan_vector_field(raw: &str, field: &'static str) -> Result<JointVector, ProtocolError> {
    let key = format!("\"{field}\"");
    let start = raw.find(&key).ok_or(ProtocolError::MissingField(field))?;
    let rest = raw[start + key.len()..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or(ProtocolError::MissingField(field))?
        .trim_start();
    let rest = rest
        .strip_prefix('[')
        .ok_or_else(|| invalid(field, rest))?;
    let end = rest.find(']').ok_or_else(|| invalid(field, rest))?;

    let mut values = Vec::with_capacity(6);
    for item in rest[..end].split(',') {
        let item = item.trim();
        let v = item.parse::<f64>().map_err(|_| invalid(field, item))?;
        values.push(v);
    }
    joint_vector_from_slice(&values)
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.chars().take(64).collect(),
    }
}

/// 返回缓冲区中第一个完整 JSON 对象的结束位置（不含）
///
/// 只统计字符串外部的花括号；对象尚不完整时返回 `None`。
/// 用于判断一次 `read` 是否已收到完整响应。
pub fn complete_object_len(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut started = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {},
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                started = true;
            },
            b'}' if started => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            },
            _ => {},
        }
    }
    None
}

/// 机器人上电/使能状态（`get_robot_state`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RobotState {
    pub powered_on: bool,
    pub enabled: bool,
}

/// 完整解码后的响应帧
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    /// 错误码（0 = 成功）
    pub error_code: i32,
    /// 解码后的 JSON 对象
    pub body: Value,
}

impl ResponseFrame {
    /// 完整解析响应文本
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let body: Value = serde_json::from_str(raw)?;
        let error_code = match body.get("errorCode") {
            Some(Value::String(s)) => s
                .trim()
                .parse::<i32>()
                .map_err(|_| ProtocolError::InvalidErrorCode(s.clone()))?,
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| ProtocolError::InvalidErrorCode(n.to_string()))?,
            Some(other) => return Err(ProtocolError::InvalidErrorCode(other.to_string())),
            None => return Err(ProtocolError::MissingErrorCode),
        };
        Ok(Self { error_code, body })
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    /// 按类型读取 payload 字段
    pub fn field<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, ProtocolError> {
        let value = self
            .body
            .get(name)
            .ok_or(ProtocolError::MissingField(name))?;
        T::deserialize(value).map_err(|_| invalid(name, &value.to_string()))
    }

    /// `joint_pos`（度）
    pub fn joint_pos(&self) -> Result<JointVector, ProtocolError> {
        let values: Vec<f64> = self.field("joint_pos")?;
        joint_vector_from_slice(&values)
    }

    /// `tcp_pos`（mm + 度）
    pub fn tcp_pos(&self) -> Result<Pose, ProtocolError> {
        let values: Vec<f64> = self.field("tcp_pos")?;
        joint_vector_from_slice(&values)
    }

    /// `in_servomove`
    pub fn in_servomove(&self) -> Result<bool, ProtocolError> {
        self.flag("in_servomove")
    }

    /// `emergency_stop`（控制器返回 0/1）
    pub fn emergency_stop(&self) -> Result<bool, ProtocolError> {
        self.flag("emergency_stop")
    }

    /// `version`
    pub fn version(&self) -> Result<String, ProtocolError> {
        self.field("version")
    }

    /// `power` / `enable` 字符串状态
    pub fn robot_state(&self) -> Result<RobotState, ProtocolError> {
        let power: String = self.field("power")?;
        let enable: String = self.field("enable")?;
        Ok(RobotState {
            powered_on: power == "powered_on",
            enabled: enable == "robot_enabled",
        })
    }

    fn flag(&self, name: &'static str) -> Result<bool, ProtocolError> {
        match self.body.get(name) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
            Some(Value::String(s)) => match s.trim() {
                "0" | "false" => Ok(false),
                "1" | "true" => Ok(true),
                other => Err(invalid(name, other)),
            },
            Some(other) => Err(invalid(name, &other.to_string())),
            None => Err(ProtocolError::MissingField(name)),
        }
    }
}
