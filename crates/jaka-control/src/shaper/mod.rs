//! 轨迹整形
//!
//! 每个控制周期把外部目标（噪声大、有延迟、可能跨 ±180° 跳变）
//! 变换成一个安全的关节增量，交给 `servo_j` 下发。
//!
//! # 流水线
//!
//! ```text
//! raw_target ─► 去混叠 ─► 软限位 ─► 延迟插值 ─► 速度/加速度限制（参考轨迹）
//!            ─► 滑动平均（窗口为已下发的控制值）─► 速度/加速度限制（控制值）
//!            ─► 死区 ─► delta
//! ```
//!
//! 1. **去混叠**：以上一个去混叠后的目标为基准，`target = ref + wrap180(raw - ref)`
//! 2. **软限位**：截断到 `[min + margin, max - margin]`，饱和只记录，不报错
//! 3. **延迟插值**：在 `now - delay` 处对目标历史线性插值
//! 4. **参考轨迹限速**：参考点以受限的速度/加速度追赶插值目标
//! 5. **平滑**：`predict_only` 把参考点与最近 N-1 个控制值求均值
//! 6. **二次限速**：对平滑输出与上一个控制值之差再做一次速度/加速度限制
//! 7. **死区**：所有轴速度低于阈值时增量强制为精确的零；
//!    它在全部限制之后执行，只会把已经可以忽略的速度清零
//!
//! # 滤波器位置
//!
//! 平滑窗口必须闭合在控制值本身上。以下三种放置方式在实机上验证过是错误的，
//! 不要重新引入：
//! - 直接平滑原始目标：平滑不足，需要大得多的窗口
//! - 平滑"状态 + 目标增量"：正反馈，速度不断增大直到触发限速
//! - 平滑"控制值 + 目标增量"：触发限速后中途停住
//!
//! # 示例
//!
//! ```
//! use jaka_control::config::ControlConfig;
//! use jaka_control::shaper::TrajectoryShaper;
//! use std::time::{Duration, Instant};
//!
//! let config = ControlConfig::default();
//! let start = Instant::now();
//! let mut shaper = TrajectoryShaper::new(&config, &[0.0; 6], &[0.0; 6], start);
//!
//! let now = start + Duration::from_millis(8);
//! let command = shaper.step(&[10.0, 0.0, 0.0, 0.0, 0.0, 0.0], now, 0.008);
//! // 单个周期的增量不会超过 ratio · v_max · dt
//! assert!(command.delta[0].abs() <= 0.2 * 180.0 * 0.008 + 1e-9);
//! ```

mod filter;
mod interpolator;
mod limiter;
mod limits;

pub use filter::MovingAverage;
pub use interpolator::DelayedInterpolator;
pub use limiter::{Limited, MotionLimits, within_dead_band};
pub use limits::{
    DEFAULT_MAX_JOINT_LIMIT, DEFAULT_MIN_JOINT_LIMIT, DEFAULT_SOFT_LIMIT_MARGIN, SaturationMask,
    SoftLimits, dealias, wrap180,
};

use crate::config::ControlConfig;
use jaka_protocol::JointVector;
use std::time::Instant;
use tracing::debug;

/// 单个周期的整形结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedCommand {
    /// 本周期下发的关节增量（度）
    pub delta: JointVector,
    /// 下发后的控制值（度）
    pub control: JointVector,
    /// 控制速度（度/秒）
    pub velocity: JointVector,
    /// 限速前的最大速度比，>1 表示触发了限速
    pub max_velocity_ratio: f64,
    /// 软限位饱和掩码
    pub saturated_mask: SaturationMask,
}

/// 轨迹整形器
///
/// 在进入伺服模式后用第一个状态样本创建，循环退出或出错后丢弃。
#[derive(Debug, Clone)]
pub struct TrajectoryShaper {
    soft_limits: SoftLimits,
    limits: MotionLimits,
    stopped_velocity_eps: f64,
    interpolator: Option<DelayedInterpolator>,
    filter: MovingAverage,
    /// 上一个去混叠后的目标（去混叠基准）
    last_target: JointVector,
    /// 受限参考点及其速度
    reference: JointVector,
    reference_velocity: JointVector,
    /// 上一个控制值及其速度
    control: JointVector,
    velocity: JointVector,
    saturated: SaturationMask,
}

impl TrajectoryShaper {
    /// 以机器人当前状态和第一个目标初始化
    pub fn new(
        config: &ControlConfig,
        state: &JointVector,
        raw_target: &JointVector,
        now: Instant,
    ) -> Self {
        let soft_limits = config.soft_limits();
        let target = dealias(state, raw_target);
        let (clamped, saturated) = soft_limits.clamp(&target);

        let interpolator = config.use_interp.then(|| {
            let mut di = DelayedInterpolator::new(config.interp_delay());
            di.reset(now, clamped);
            di
        });
        let mut filter = MovingAverage::new(config.filter_window_ticks());
        filter.reset(*state);

        Self {
            soft_limits,
            limits: config.motion_limits(),
            stopped_velocity_eps: config.stopped_velocity_eps,
            interpolator,
            filter,
            last_target: target,
            reference: *state,
            reference_velocity: [0.0; 6],
            control: *state,
            velocity: [0.0; 6],
            saturated,
        }
    }

    /// 执行一个周期
    ///
    /// `dt` 为距上一个周期的时间（秒），调用方负责钳位。
    pub fn step(&mut self, raw_target: &JointVector, now: Instant, dt: f64) -> ShapedCommand {
        // 1. 去混叠
        let target = dealias(&self.last_target, raw_target);
        self.last_target = target;

        // 2. 软限位
        let (clamped, saturated_mask) = self.soft_limits.clamp(&target);
        if saturated_mask != self.saturated {
            debug!(
                "Soft limit saturation changed: {:06b} -> {:06b}",
                self.saturated, saturated_mask
            );
            self.saturated = saturated_mask;
        }

        // 3. 延迟插值
        let delayed = match self.interpolator.as_mut() {
            Some(di) => di.read(now, clamped),
            None => clamped,
        };

        // 4. 参考轨迹限速
        let error: JointVector = std::array::from_fn(|i| delayed[i] - self.reference[i]);
        let reference = self
            .limits
            .limit_approach(&error, &self.reference_velocity, dt);
        self.reference_velocity = reference.velocity;
        self.reference = std::array::from_fn(|i| self.reference[i] + reference.velocity[i] * dt);

        // 5. 平滑（窗口闭合在控制值上）
        let filtered = self.filter.predict_only(&self.reference);

        // 6. 二次限速
        let diff: JointVector = std::array::from_fn(|i| filtered[i] - self.control[i]);
        let limited = self.limits.limit(&diff, &self.velocity, dt);
        let mut velocity = limited.velocity;

        // 7. 死区
        if within_dead_band(&velocity, self.stopped_velocity_eps) {
            velocity = [0.0; 6];
        }

        let delta = velocity.map(|v| v * dt);
        self.control = std::array::from_fn(|i| self.control[i] + delta[i]);
        self.velocity = velocity;
        self.filter.push(self.control);

        ShapedCommand {
            delta,
            control: self.control,
            velocity,
            max_velocity_ratio: limited.max_velocity_ratio,
            saturated_mask,
        }
    }

    /// 上一个控制值
    pub fn control(&self) -> JointVector {
        self.control
    }

    /// 上一个控制速度
    pub fn velocity(&self) -> JointVector {
        self.velocity
    }
}
