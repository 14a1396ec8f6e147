//! 遥操作配置
//!
//! 所有参数在启动时构造一次，按引用传入各组件。
//! 文件格式为 TOML，缺省字段使用默认值：
//!
//! ```toml
//! [connection]
//! host = "10.5.5.100"
//!
//! [control]
//! tick_interval_s = 0.008
//! speed_limit_ratio = 0.2
//!
//! [recovery]
//! max_reconnect_attempts = 10
//! ```

use crate::ControlError;
use crate::shaper::{
    DEFAULT_MAX_JOINT_LIMIT, DEFAULT_MIN_JOINT_LIMIT, DEFAULT_SOFT_LIMIT_MARGIN, MotionLimits,
    SoftLimits,
};
use jaka_driver::ConnectionConfig;
use jaka_protocol::JointVector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 滤波窗口长度的参考周期（秒）
const REFERENCE_TICK_S: f64 = 0.008;

/// 顶层配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub connection: ConnectionConfig,
    pub control: ControlConfig,
    pub recovery: RecoveryConfig,
}

impl TeleopConfig {
    /// 从 TOML 文件加载并校验
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ControlError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ControlError> {
        let config: TeleopConfig =
            toml::from_str(content).map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为 TOML（用于导出默认配置）
    pub fn to_toml_string(&self) -> Result<String, ControlError> {
        toml::to_string_pretty(self).map_err(|e| ControlError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.connection.host.is_empty() {
            return Err(ControlError::Config("connection.host is empty".to_string()));
        }
        if self.connection.timeout_ms == 0 {
            return Err(ControlError::Config(
                "connection.timeout_ms must be > 0".to_string(),
            ));
        }
        self.control.validate()?;
        self.recovery.validate()
    }
}

/// 控制循环与轨迹整形参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// 控制周期（秒）
    pub tick_interval_s: f64,
    /// 各轴速度上限（度/秒）
    pub velocity_limits: JointVector,
    /// 各轴加速度上限（度/秒²）
    pub accel_limits: JointVector,
    /// 速度/加速度上限的使用比例，避免启动时大幅运动
    pub speed_limit_ratio: f64,
    /// 死区阈值（度/秒）
    pub stopped_velocity_eps: f64,
    /// 滑动平均窗口长度（以 8ms 周期计，按实际周期换算）
    pub filter_window: usize,
    /// 是否使用延迟插值
    pub use_interp: bool,
    /// 插值延迟（秒）
    pub interp_delay_s: f64,
    /// 硬限位下界（度）
    pub min_joint_limit: JointVector,
    /// 硬限位上界（度）
    pub max_joint_limit: JointVector,
    /// 软限位裕量（度）
    pub soft_limit_margin: f64,
    /// 只计算不下发
    pub dry_run: bool,
    /// 控制线程实时优先级（feature `realtime`）
    pub realtime_priority: u8,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: 0.008,
            velocity_limits: [180.0; 6],
            accel_limits: [720.0; 6],
            speed_limit_ratio: 0.2,
            stopped_velocity_eps: 1e-4,
            filter_window: 10,
            use_interp: true,
            interp_delay_s: 0.1,
            min_joint_limit: DEFAULT_MIN_JOINT_LIMIT,
            max_joint_limit: DEFAULT_MAX_JOINT_LIMIT,
            soft_limit_margin: DEFAULT_SOFT_LIMIT_MARGIN,
            dry_run: false,
            realtime_priority: 80,
        }
    }
}

impl ControlConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_s)
    }

    pub fn interp_delay(&self) -> Duration {
        Duration::from_secs_f64(self.interp_delay_s)
    }

    /// 按实际周期换算后的窗口长度（至少为 1）
    ///
    /// 8ms 周期下为 `filter_window`，4ms 周期下翻倍。
    pub fn filter_window_ticks(&self) -> usize {
        let scaled = self.filter_window as f64 * REFERENCE_TICK_S / self.tick_interval_s;
        (scaled.round() as usize).max(1)
    }

    pub fn soft_limits(&self) -> SoftLimits {
        SoftLimits::from_hard_limits(
            &self.min_joint_limit,
            &self.max_joint_limit,
            self.soft_limit_margin,
        )
    }

    pub fn motion_limits(&self) -> MotionLimits {
        MotionLimits {
            velocity: self.velocity_limits,
            accel: self.accel_limits,
            ratio: self.speed_limit_ratio,
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        // ✅ 输入验证
        if !(self.tick_interval_s > 0.0 && self.tick_interval_s.is_finite()) {
            return Err(ControlError::Config(format!(
                "Invalid tick_interval_s: {} (must be > 0)",
                self.tick_interval_s
            )));
        }
        if self.tick_interval_s < 0.001 {
            tracing::warn!(
                "Very short control period: {}s. The controller may not keep up.",
                self.tick_interval_s
            );
        }
        if !(self.speed_limit_ratio > 0.0 && self.speed_limit_ratio <= 1.0) {
            return Err(ControlError::Config(format!(
                "Invalid speed_limit_ratio: {} (must be in (0, 1])",
                self.speed_limit_ratio
            )));
        }
        if let Some(v) = self.velocity_limits.iter().find(|v| !(**v > 0.0)) {
            return Err(ControlError::Config(format!(
                "Invalid velocity limit: {v} (must be > 0)"
            )));
        }
        if let Some(a) = self.accel_limits.iter().find(|a| !(**a > 0.0)) {
            return Err(ControlError::Config(format!(
                "Invalid accel limit: {a} (must be > 0)"
            )));
        }
        if self.stopped_velocity_eps < 0.0 {
            return Err(ControlError::Config(format!(
                "Invalid stopped_velocity_eps: {} (must be >= 0)",
                self.stopped_velocity_eps
            )));
        }
        if self.interp_delay_s < 0.0 || !self.interp_delay_s.is_finite() {
            return Err(ControlError::Config(format!(
                "Invalid interp_delay_s: {} (must be >= 0)",
                self.interp_delay_s
            )));
        }
        if self.soft_limit_margin < 0.0 || !self.soft_limits().is_consistent() {
            return Err(ControlError::Config(format!(
                "Soft limit margin {} leaves an empty joint range",
                self.soft_limit_margin
            )));
        }
        if self.realtime_priority > 99 {
            return Err(ControlError::Config(format!(
                "Invalid realtime_priority: {} (must be <= 99)",
                self.realtime_priority
            )));
        }
        Ok(())
    }
}

/// 故障恢复参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// 最大重连次数
    pub max_reconnect_attempts: u32,
    /// 重连间隔，毫秒
    pub reconnect_interval_ms: u64,
    /// 等待上电/使能完成的超时，毫秒
    pub enable_timeout_ms: u64,
    /// 状态轮询间隔，毫秒
    pub poll_interval_ms: u64,
    /// 夹爪工作线程退出等待时间，毫秒
    pub gripper_ack_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_interval_ms: 1_000,
            enable_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            gripper_ack_timeout_ms: 1_000,
        }
    }
}

impl RecoveryConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn enable_timeout(&self) -> Duration {
        Duration::from_millis(self.enable_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gripper_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.gripper_ack_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.max_reconnect_attempts == 0 {
            return Err(ControlError::Config(
                "recovery.max_reconnect_attempts must be > 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ControlError::Config(
                "recovery.poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
