//! 标准输入目标源
//!
//! 每行一个 JSON 对象：
//!
//! ```text
//! {"joints": [0.0, 10.0, -20.0, 0.0, 90.0, 0.0], "grip": false}
//! ```
//!
//! `grip` 可省略（保持当前开合状态）。可选的 `tool` 字段在取值变化时请求更换工具。

use jaka_control::SharedBus;
use jaka_protocol::{JointVector, joint_vector_from_slice};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RawTarget {
    joints: Vec<f64>,
    #[serde(default)]
    grip: Option<bool>,
    #[serde(default)]
    tool: Option<i32>,
}

/// 一条目标消息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetMessage {
    pub joints: JointVector,
    pub grip: Option<bool>,
    pub tool: Option<i32>,
}

/// 解析一行；空行返回 `Ok(None)`
pub fn parse_line(line: &str) -> anyhow::Result<Option<TargetMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let raw: RawTarget = serde_json::from_str(line)?;
    let joints = joint_vector_from_slice(&raw.joints)?;
    if joints.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("non-finite joint value in {:?}", joints);
    }
    Ok(Some(TargetMessage {
        joints,
        grip: raw.grip,
        tool: raw.tool,
    }))
}

/// 把消息发布到总线
pub fn publish(bus: &SharedBus, message: &TargetMessage) {
    bus.publish_target(message.joints);
    if let Some(grip) = message.grip {
        bus.set_grip(grip);
    }
}

/// 从 `reader` 逐行读取目标直到 EOF，返回已发布的条数
///
/// `tool` 只在与上一次请求（初始为当前工具）不同时转为更换请求。
pub fn pump<R: BufRead>(reader: R, bus: &SharedBus) -> usize {
    let mut published = 0;
    let mut last_tool = bus.tool_id();
    for (lineno, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Target source read error: {}", e);
                break;
            },
        };
        match parse_line(&line) {
            Ok(Some(message)) => {
                publish(bus, &message);
                if let Some(tool) = message.tool
                    && tool != last_tool
                    && bus.request_tool_change(tool)
                {
                    last_tool = tool;
                }
                published += 1;
            },
            Ok(None) => {},
            Err(e) => warn!("Skipping invalid target on line {}: {}", lineno + 1, e),
        }
    }
    published
}

/// 启动标准输入读取线程（不等待其结束）
pub fn spawn_stdin_source(bus: Arc<SharedBus>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("jaka-target-stdin".to_string())
        .spawn(move || {
            info!("Reading joint targets from stdin");
            let published = pump(std::io::stdin().lock(), &bus);
            debug!("Target source closed after {} message(s)", published);
        })?;
    Ok(())
}
