//! 滑动平均滤波器
//!
//! 窗口里保存的是已经下发的控制值，而不是原始目标：
//! `predict_only` 用新输入替换最旧的一项求均值但不入窗，
//! 最终的控制值再通过 `push` 登记。

use jaka_protocol::{JOINT_COUNT, JointVector};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct MovingAverage {
    capacity: usize,
    window: VecDeque<JointVector>,
}

impl MovingAverage {
    /// 创建窗口长度为 `capacity` 的滤波器（至少为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 用同一个值填满窗口
    pub fn reset(&mut self, value: JointVector) {
        self.window.clear();
        self.window.extend(std::iter::repeat_n(value, self.capacity));
    }

    /// 窗口中最新的 `capacity - 1` 项与 `input` 的均值（不修改窗口）
    pub fn predict_only(&self, input: &JointVector) -> JointVector {
        let keep = self.window.len().min(self.capacity - 1);
        let skip = self.window.len() - keep;
        let mut sum = *input;
        for value in self.window.iter().skip(skip) {
            for (s, v) in sum.iter_mut().zip(value) {
                *s += v;
            }
        }
        let n = (keep + 1) as f64;
        sum.map(|s| s / n)
    }

    /// 登记一个控制值，返回登记后的窗口均值
    pub fn push(&mut self, value: JointVector) -> JointVector {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.mean()
    }

    pub fn mean(&self) -> JointVector {
        if self.window.is_empty() {
            return [0.0; JOINT_COUNT];
        }
        let mut sum = [0.0; JOINT_COUNT];
        for value in &self.window {
            for (s, v) in sum.iter_mut().zip(value) {
                *s += v;
            }
        }
        let n = self.window.len() as f64;
        sum.map(|s| s / n)
    }
}
