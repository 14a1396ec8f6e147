//! 速度/加速度限制
//!
//! 超限时整体等比缩放整个速度向量（不逐轴截断），保持运动方向不变。

use jaka_protocol::{JOINT_COUNT, JointVector};

/// 速度与加速度上限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    /// 各轴速度上限（度/秒）
    pub velocity: JointVector,
    /// 各轴加速度上限（度/秒²）
    pub accel: JointVector,
    /// 实际使用的比例（0, 1]
    pub ratio: f64,
}

/// 限制结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limited {
    /// 限制后的速度（度/秒）
    pub velocity: JointVector,
    /// 缩放前的最大速度比 `max(|v_i| / (ratio * v_max_i))`
    pub max_velocity_ratio: f64,
}

impl MotionLimits {
    /// 单轴允许的最大速度
    #[inline]
    pub fn max_velocity(&self, axis: usize) -> f64 {
        self.ratio * self.velocity[axis]
    }

    /// 单轴允许的最大加速度
    #[inline]
    pub fn max_accel(&self, axis: usize) -> f64 {
        self.ratio * self.accel[axis]
    }

    /// 把位移 `delta`（在 `dt` 内完成）限制到速度/加速度上限内
    ///
    /// 1. `v = delta / dt`，任一轴超限则整体缩放
    /// 2. `a = (v - v_prev) / dt`，任一轴超限则整体缩放 `a`，并取 `v = v_prev + a·dt`
    ///
    /// 由于 `v_prev` 本身在速度上限内，第 2 步的结果仍满足速度上限。
    pub fn limit(&self, delta: &JointVector, prev_velocity: &JointVector, dt: f64) -> Limited {
        let mut velocity = delta.map(|d| d / dt);
        let max_velocity_ratio = self.scale_velocity(&mut velocity);
        self.limit_accel(&mut velocity, prev_velocity, dt);
        Limited {
            velocity,
            max_velocity_ratio,
        }
    }

    /// 跟踪一个目标点：在 [`limit`](Self::limit) 的基础上，
    /// 把速度压到能在剩余距离内以最大减速度停下的范围（同样整体缩放），
    /// 避免接近目标时来回过冲。
    pub fn limit_approach(
        &self,
        error: &JointVector,
        prev_velocity: &JointVector,
        dt: f64,
    ) -> Limited {
        let mut velocity = error.map(|e| e / dt);
        let max_velocity_ratio = self.scale_velocity(&mut velocity);

        let mut scale: f64 = 1.0;
        for (i, v) in velocity.iter().enumerate() {
            let braking = (2.0 * self.max_accel(i) * error[i].abs()).sqrt();
            if v.abs() > braking {
                scale = scale.min(braking / v.abs());
            }
        }
        if scale < 1.0 {
            velocity = velocity.map(|v| v * scale);
        }

        self.limit_accel(&mut velocity, prev_velocity, dt);
        Limited {
            velocity,
            max_velocity_ratio,
        }
    }

    fn scale_velocity(&self, velocity: &mut JointVector) -> f64 {
        let max_ratio = (0..JOINT_COUNT)
            .map(|i| velocity[i].abs() / self.max_velocity(i))
            .fold(0.0, f64::max);
        if max_ratio > 1.0 {
            *velocity = velocity.map(|v| v / max_ratio);
        }
        max_ratio
    }

    fn limit_accel(&self, velocity: &mut JointVector, prev_velocity: &JointVector, dt: f64) {
        let accel: JointVector = std::array::from_fn(|i| (velocity[i] - prev_velocity[i]) / dt);
        let max_ratio = (0..JOINT_COUNT)
            .map(|i| accel[i].abs() / self.max_accel(i))
            .fold(0.0, f64::max);
        if max_ratio > 1.0 {
            *velocity = std::array::from_fn(|i| prev_velocity[i] + accel[i] / max_ratio * dt);
        }
    }
}

/// 死区：所有轴的速度绝对值都低于 `eps` 时返回 `true`
#[inline]
pub fn within_dead_band(velocity: &JointVector, eps: f64) -> bool {
    velocity.iter().all(|v| v.abs() < eps)
}
