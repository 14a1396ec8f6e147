//! 延迟插值器
//!
//! 外部目标以不规则的间隔到达，且领先于机器人。
//! 保存一小段 (时间戳, 目标) 历史，在 `now - delay` 处线性插值，
//! 以牺牲固定延迟换取平滑的目标轨迹。

use jaka_protocol::JointVector;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DelayedInterpolator {
    delay: Duration,
    history: VecDeque<(Instant, JointVector)>,
}

impl DelayedInterpolator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            history: VecDeque::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 清空历史并以 `target` 作为唯一样本
    pub fn reset(&mut self, now: Instant, target: JointVector) {
        self.history.clear();
        self.history.push_back((now, target));
    }

    /// 记录新样本并返回 `now - delay` 时刻的插值结果
    ///
    /// - 早于第一个样本：返回第一个样本（平推）
    /// - 晚于最后一个样本：返回最后一个样本
    /// - 不再需要的旧样本会被丢弃（保留一个不晚于查询时刻的样本作为左端点）
    pub fn read(&mut self, now: Instant, target: JointVector) -> JointVector {
        match self.history.back() {
            Some((last, _)) if now <= *last => {
                // 时间戳不递增时覆盖最新样本
                if let Some(back) = self.history.back_mut() {
                    back.1 = target;
                }
            },
            _ => self.history.push_back((now, target)),
        }

        let Some(query) = now.checked_sub(self.delay) else {
            return self.history.front().map_or(target, |(_, v)| *v);
        };

        while self.history.len() >= 2 && self.history[1].0 <= query {
            self.history.pop_front();
        }

        let (t0, x0) = self.history[0];
        if query <= t0 || self.history.len() == 1 {
            return x0;
        }
        let (t1, x1) = self.history[1];
        let span = t1.duration_since(t0).as_secs_f64();
        if span <= 0.0 {
            return x1;
        }
        let ratio = query.duration_since(t0).as_secs_f64() / span;
        std::array::from_fn(|i| x0[i] + (x1[i] - x0[i]) * ratio)
    }

    /// 当前历史长度
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
