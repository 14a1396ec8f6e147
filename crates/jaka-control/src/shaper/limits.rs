//! 关节角去混叠与软限位

use jaka_protocol::{JOINT_COUNT, JointVector};
use serde::{Deserialize, Serialize};

/// 默认硬限位下界（度）
pub const DEFAULT_MIN_JOINT_LIMIT: JointVector = [-360.0, -85.0, -175.0, -85.0, -360.0, -360.0];
/// 默认硬限位上界（度）
pub const DEFAULT_MAX_JOINT_LIMIT: JointVector = [360.0, 265.0, 175.0, 265.0, 360.0, 360.0];
/// 软限位相对硬限位的裕量（度）
pub const DEFAULT_SOFT_LIMIT_MARGIN: f64 = 10.0;

/// 把角度差折算到 `[-180, 180)`
#[inline]
pub fn wrap180(x: f64) -> f64 {
    (x + 180.0).rem_euclid(360.0) - 180.0
}

/// 以 `reference` 为基准选取 `raw` 的 ±360° 等价值
///
/// 外部目标没有圈数连续性（例如 175° 之后跳到 -175°），
/// 这里选取离基准最近的代表值，使关节空间保持连续。
///
/// # 示例
///
/// ```
/// use jaka_control::shaper::dealias;
///
/// let target = dealias(&[0.0; 6], &[185.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
/// assert_eq!(target[0], -175.0);
/// ```
pub fn dealias(reference: &JointVector, raw: &JointVector) -> JointVector {
    std::array::from_fn(|i| reference[i] + wrap180(raw[i] - reference[i]))
}

/// 饱和掩码：bit i 表示关节 i 被软限位截断
pub type SaturationMask = u8;

/// 软限位 `[min + margin, max - margin]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftLimits {
    pub min: JointVector,
    pub max: JointVector,
}

impl SoftLimits {
    /// 由硬限位和裕量构造
    pub fn from_hard_limits(min: &JointVector, max: &JointVector, margin: f64) -> Self {
        Self {
            min: std::array::from_fn(|i| min[i] + margin),
            max: std::array::from_fn(|i| max[i] - margin),
        }
    }

    /// 每个关节的下界不大于上界
    pub fn is_consistent(&self) -> bool {
        (0..JOINT_COUNT).all(|i| self.min[i] <= self.max[i])
    }

    /// 截断到软限位内，同时返回饱和掩码
    pub fn clamp(&self, target: &JointVector) -> (JointVector, SaturationMask) {
        let mut mask = 0;
        let clamped = std::array::from_fn(|i| {
            let value = target[i].clamp(self.min[i], self.max[i]);
            if value != target[i] {
                mask |= 1 << i;
            }
            value
        });
        (clamped, mask)
    }
}

impl Default for SoftLimits {
    fn default() -> Self {
        Self::from_hard_limits(
            &DEFAULT_MIN_JOINT_LIMIT,
            &DEFAULT_MAX_JOINT_LIMIT,
            DEFAULT_SOFT_LIMIT_MARGIN,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap180() {
        assert_eq!(wrap180(0.0), 0.0);
        assert_eq!(wrap180(185.0), -175.0);
        assert_eq!(wrap180(-185.0), 175.0);
        assert_eq!(wrap180(180.0), -180.0);
        assert_eq!(wrap180(-180.0), -180.0);
        assert_eq!(wrap180(350.0), -10.0);
    }

    #[test]
    fn test_dealias_wraps_to_nearest() {
        let target = dealias(&[0.0; 6], &[185.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(target, [-175.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        // 基准在 170° 时，-175° 应被解释为 185°
        let target = dealias(&[170.0; 6], &[-175.0; 6]);
        assert_eq!(target, [185.0; 6]);
    }

    #[test]
    fn test_default_soft_limits() {
        let limits = SoftLimits::default();
        assert_eq!(limits.min, [-350.0, -75.0, -165.0, -75.0, -350.0, -350.0]);
        assert_eq!(limits.max, [350.0, 255.0, 165.0, 255.0, 350.0, 350.0]);
        assert!(limits.is_consistent());
    }

    #[test]
    fn test_clamp_reports_saturation() {
        let limits = SoftLimits::default();
        let (clamped, mask) = limits.clamp(&[0.0, -80.0, 170.0, 0.0, 0.0, 400.0]);
        assert_eq!(clamped, [0.0, -75.0, 165.0, 0.0, 0.0, 350.0]);
        assert_eq!(mask, 0b100110);

        let (_, mask) = limits.clamp(&[0.0; 6]);
        assert_eq!(mask, 0);
    }

    fn joint_vector(range: std::ops::Range<f64>) -> impl Strategy<Value = JointVector> {
        prop::array::uniform6(range)
    }

    proptest! {
        #[test]
        fn prop_dealias_is_congruent_and_near(
            state in joint_vector(-300.0..300.0),
            offset in joint_vector(-359.0..359.0),
        ) {
            let raw: JointVector = std::array::from_fn(|i| state[i] + offset[i]);
            let target = dealias(&state, &raw);
            for i in 0..JOINT_COUNT {
                let diff = target[i] - state[i];
                prop_assert!((-180.0 - 1e-9..180.0 + 1e-9).contains(&diff));
                let turns = (target[i] - raw[i]) / 360.0;
                prop_assert!((turns - turns.round()).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_clamp_is_idempotent(target in joint_vector(-500.0..500.0)) {
            let limits = SoftLimits::default();
            let (once, _) = limits.clamp(&target);
            let (twice, mask) = limits.clamp(&once);
            prop_assert_eq!(once, twice);
            prop_assert_eq!(mask, 0);
        }
    }
}
