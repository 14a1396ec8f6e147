//! 控制层错误类型

use jaka_driver::DriverError;
use thiserror::Error;

/// 控制层错误
///
/// 驱动层错误通过 `#[from]` 透明转换；其余变体描述恢复流程的终止原因。
#[derive(Error, Debug)]
pub enum ControlError {
    /// 驱动层错误（传输、协议、解析、超时）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 急停/保护停止，需要人工介入
    #[error("Safety fault: emergency stop is active, operator intervention required")]
    SafetyFault,

    /// 重连次数耗尽
    #[error("Reconnect failed after {attempts} attempt(s)")]
    ReconnectExhausted { attempts: u32 },

    /// 退出伺服模式失败（非超时）
    #[error("Failed to leave servo mode: {0}")]
    LeaveServoFailed(#[source] DriverError),

    /// 自动恢复失败
    #[error("Automatic recovery failed: {0}")]
    RecoveryFailed(String),

    /// 等待状态超时
    #[error("Timeout waiting for {what} after {timeout_ms}ms")]
    Timeout { what: &'static str, timeout_ms: u64 },

    /// 夹爪/工具错误
    #[error("Gripper error: {0}")]
    Gripper(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControlError {
    /// 是否需要人工介入（不可自动恢复）
    pub fn is_safety_fault(&self) -> bool {
        matches!(self, ControlError::SafetyFault)
    }
}
