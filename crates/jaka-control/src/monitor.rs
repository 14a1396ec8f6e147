//! 状态监控
//!
//! - [`FeedbackBridge`]：反馈帧回调，把实际关节位置发布到总线
//! - [`StatusMonitor`]：汇总反馈帧和总线状态，生成可序列化的快照

use crate::ControlError;
use crate::bus::SharedBus;
use crate::gripper::GripperLink;
use jaka_driver::FeedbackCallback;
use jaka_protocol::{ErrorReport, FeedbackFrame, JointVector, Pose, are_all_errors_stateless};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// 把反馈流中的实际关节位置发布为总线上的状态样本
pub struct FeedbackBridge {
    bus: Arc<SharedBus>,
}

impl FeedbackBridge {
    pub fn new(bus: Arc<SharedBus>) -> Self {
        Self { bus }
    }
}

impl FeedbackCallback for FeedbackBridge {
    fn on_frame(&self, frame: &FeedbackFrame) {
        self.bus.publish_state(frame.joint_actual_position);
    }
}

/// 错误信息（仅在非伺服模式下查询）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStatus {
    pub report: ErrorReport,
    /// 可通过 `clear_error` + 使能自动恢复
    pub auto_recoverable: bool,
}

/// 状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub joints: Option<JointVector>,
    pub pose: Option<Pose>,
    pub enabled: Option<bool>,
    pub servo_active: bool,
    /// 伺服模式下为 `None`
    pub errors: Option<ErrorStatus>,
    pub control_active: bool,
    pub tool_id: i32,
    /// 刚结束的工具更换 `(tool_id, success)`
    pub tool_change: Option<(i32, bool)>,
    pub gripper_width: Option<f64>,
    pub gripper_force: Option<f64>,
    pub last_delta: JointVector,
}

/// 状态监控
pub struct StatusMonitor<'a> {
    bus: &'a SharedBus,
    gripper: Option<&'a GripperLink>,
    last_errcode: Option<String>,
}

impl<'a> StatusMonitor<'a> {
    pub fn new(bus: &'a SharedBus) -> Self {
        Self {
            bus,
            gripper: None,
            last_errcode: None,
        }
    }

    pub fn with_gripper(mut self, link: &'a GripperLink) -> Self {
        self.gripper = Some(link);
        self
    }

    /// 生成快照
    ///
    /// `latest` 为反馈流最新一帧；尚未收到时关节/位姿/使能为 `None`。
    /// 错误信息只在伺服模式标志为假时持锁读取。
    pub fn snapshot(&mut self, latest: Option<&FeedbackFrame>) -> StatusSnapshot {
        let errors = latest.and_then(|frame| {
            self.bus.servo().with_non_servo(|| {
                let report = frame.error_report();
                let auto_recoverable = are_all_errors_stateless(std::slice::from_ref(&report));
                ErrorStatus {
                    report,
                    auto_recoverable,
                }
            })
        });
        if let Some(status) = &errors {
            self.log_error_transition(status);
        }

        let (gripper_width, gripper_force) = self
            .gripper
            .map_or((None, None), GripperLink::readings);

        StatusSnapshot {
            joints: latest.map(|f| f.joint_actual_position),
            pose: latest.map(|f| f.actual_position),
            enabled: latest.map(|f| f.enabled),
            servo_active: self.bus.servo().is_active(),
            errors,
            control_active: self.bus.is_control_active(),
            tool_id: self.bus.tool_id(),
            tool_change: self.bus.take_tool_change_result(),
            gripper_width,
            gripper_force,
            last_delta: self.bus.last_delta(),
        }
    }

    /// 执行总线上待处理的工具更换请求
    ///
    /// 没有请求时返回 `None`。未挂接夹爪连接时请求记为失败。
    pub fn service_tool_change(&self) -> Option<Result<(), ControlError>> {
        let tool_id = self.bus.take_tool_change_request()?;
        Some(match self.gripper {
            Some(link) => link.change_tool(self.bus, tool_id),
            None => {
                self.bus.begin_tool_change(tool_id);
                self.bus.finish_tool_change(false);
                warn!("Tool change to {} requested without a gripper link", tool_id);
                Err(ControlError::Gripper("no gripper link".to_string()))
            },
        })
    }

    fn log_error_transition(&mut self, status: &ErrorStatus) {
        let code = &status.report.errcode;
        if self.last_errcode.as_ref() == Some(code) {
            return;
        }
        if status.report.is_error() {
            warn!(
                "Robot error {}: {} (auto recoverable: {})",
                code, status.report.errmsg, status.auto_recoverable
            );
        } else if self.last_errcode.is_some() {
            debug!("Robot error cleared");
        }
        self.last_errcode = Some(code.clone());
    }
}
