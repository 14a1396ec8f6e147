//! 固定周期控制循环
//!
//! 状态机：
//!
//! ```text
//! WaitState ─► WaitTarget ─► Running ─► Stopping ─► Stopped
//! ```
//!
//! - 收到第一个状态样本和目标样本后用它们创建 [`TrajectoryShaper`]
//! - 每个周期整形一次并通过 `servo_j`（增量模式）下发
//! - 收到停止请求后，目标冻结在当时的状态样本上，继续整形直到
//!   连续两个周期下发零增量，返回 [`LoopOutcome::OperatorStop`]
//! - 进入 `Running` 之前收到停止请求则立即返回
//!
//! `servo_j` 的错误直接向上传播，由 [`RecoverySupervisor`](crate::recovery::RecoverySupervisor) 处理。

use crate::bus::SharedBus;
use crate::config::ControlConfig;
use crate::gripper::GripperWorker;
use crate::shaper::TrajectoryShaper;
use jaka_driver::{DriverError, RobotTransport};
use jaka_protocol::{JointVector, MoveMode};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 停止时需要的连续零增量周期数
const STOPPED_ZERO_TICKS: u32 = 2;

/// 循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// 等待第一个关节状态样本
    WaitState,
    /// 等待第一个目标样本
    WaitTarget,
    Running,
    /// 已收到停止请求，正在减速
    Stopping,
    Stopped,
}

/// 循环正常结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// 操作员请求停止，速度已收敛到零
    OperatorStop,
}

/// 控制循环
///
/// 每次监督器尝试都新建一个实例。
pub struct ControlLoop<'a, T: RobotTransport> {
    robot: &'a T,
    bus: &'a SharedBus,
    config: &'a ControlConfig,
    gripper: Option<&'a GripperWorker>,
    state: LoopState,
}

impl<'a, T: RobotTransport> ControlLoop<'a, T> {
    pub fn new(robot: &'a T, bus: &'a SharedBus, config: &'a ControlConfig) -> Self {
        Self {
            robot,
            bus,
            config,
            gripper: None,
            state: LoopState::WaitState,
        }
    }

    /// 夹爪命令交给该工作线程执行
    pub fn with_gripper(mut self, worker: &'a GripperWorker) -> Self {
        self.gripper = Some(worker);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// 运行直到停止或出错
    ///
    /// # 错误
    ///
    /// `servo_j` 失败时立即返回该错误，机器人仍处于伺服模式。
    pub fn run(&mut self) -> Result<LoopOutcome, DriverError> {
        let period = self.config.tick_interval();
        let nominal_dt = period.as_secs_f64();
        let max_dt = 2.0 * nominal_dt;

        // ==================== 等待样本 ====================
        let Some(mut shaper) = self.wait_for_samples(period) else {
            info!("Stop requested before control started");
            self.state = LoopState::Stopped;
            return Ok(LoopOutcome::OperatorStop);
        };
        self.state = LoopState::Running;
        info!(
            "Control loop running at {:?} (dry_run: {})",
            period, self.config.dry_run
        );

        let mut frozen_target: Option<JointVector> = None;
        let mut zero_ticks = 0u32;
        let mut last_tick = Instant::now();
        let mut next_tick = last_tick + period;
        spin_sleep::sleep(period);

        loop {
            let now = Instant::now();
            next_tick += period;

            // dt 取实测值，钳位到 2 倍周期
            let mut dt = now.duration_since(last_tick).as_secs_f64();
            if dt <= 0.0 {
                dt = nominal_dt;
            }
            let dt = dt.min(max_dt);
            last_tick = now;

            // ==================== 停止请求 ====================
            if self.state == LoopState::Running && self.bus.is_stop_requested() {
                let hold = self
                    .bus
                    .state()
                    .map_or_else(|| shaper.control(), |sample| sample.joints);
                info!("Stop requested, decelerating to {:?}", hold);
                frozen_target = Some(hold);
                self.state = LoopState::Stopping;
            }

            let raw_target = match frozen_target {
                Some(target) => target,
                None => self
                    .bus
                    .target()
                    .map_or_else(|| shaper.control(), |sample| sample.joints),
            };

            // ==================== 整形 + 下发 ====================
            let command = shaper.step(&raw_target, now, dt);
            if command.max_velocity_ratio > 1.0 {
                trace!("Velocity limited (ratio {:.3})", command.max_velocity_ratio);
            }
            if !self.config.dry_run {
                self.robot.servo_j(command.delta, MoveMode::Incremental, 1)?;
            }
            self.bus.publish_delta(command.delta);
            self.dispatch_gripper();

            if self.state == LoopState::Stopping {
                if command.delta == [0.0; 6] {
                    zero_ticks += 1;
                } else {
                    zero_ticks = 0;
                }
                if zero_ticks >= STOPPED_ZERO_TICKS {
                    info!("Control loop stopped at {:?}", command.control);
                    self.state = LoopState::Stopped;
                    return Ok(LoopOutcome::OperatorStop);
                }
            }

            // ==================== 节拍 ====================
            let elapsed = now.elapsed();
            if elapsed > period * 2 {
                warn!(
                    "Control tick took {:?} (budget {:?})",
                    elapsed, period
                );
            }
            let now = Instant::now();
            if next_tick > now {
                spin_sleep::sleep(next_tick - now);
            } else {
                // 超时：立即开始下一个周期，锚点重置到当前时刻
                next_tick = now;
            }
        }
    }

    /// 等待状态和目标样本；期间收到停止请求返回 `None`
    fn wait_for_samples(&mut self, period: Duration) -> Option<TrajectoryShaper> {
        loop {
            if self.bus.is_stop_requested() {
                return None;
            }
            let Some(state) = self.bus.state() else {
                self.set_state(LoopState::WaitState);
                self.bus.wait_for_sample(period);
                continue;
            };
            let Some(target) = self.bus.target() else {
                self.set_state(LoopState::WaitTarget);
                self.bus.wait_for_sample(period);
                continue;
            };
            debug!(
                "Shaper reset from state {:?}, target {:?}",
                state.joints, target.joints
            );
            return Some(TrajectoryShaper::new(
                self.config,
                &state.joints,
                &target.joints,
                Instant::now(),
            ));
        }
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            debug!("Control loop: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// 把总线上的夹爪命令转交工作线程，不阻塞
    fn dispatch_gripper(&self) {
        while let Some(command) = self.bus.try_recv_gripper() {
            match self.gripper {
                Some(worker) => {
                    worker.dispatch(command);
                },
                None => debug!("No gripper worker, ignoring {:?}", command),
            }
        }
    }
}

/// 为当前线程申请实时优先级（需要 `realtime` feature）
///
/// 失败只记录警告，不影响控制循环运行。
pub fn apply_realtime_priority(priority: u8) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        let value = match ThreadPriorityValue::try_from(priority) {
            Ok(value) => ThreadPriority::Crossplatform(value),
            Err(e) => {
                warn!("Invalid realtime priority {}: {}, using MAX", priority, e);
                ThreadPriority::Max
            },
        };
        match set_current_thread_priority(value) {
            Ok(_) => {
                info!("Control thread priority set to {} (realtime)", priority);
            },
            Err(e) => {
                warn!(
                    "Failed to set control thread priority: {:?}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    #[cfg(not(feature = "realtime"))]
    debug!(
        "Realtime priority {} requested but the `realtime` feature is disabled",
        priority
    );
}
