//! 故障恢复监督器
//!
//! 包裹 [`ControlLoop`] 的外层状态机：
//!
//! ```text
//! EnterServo ─► Run ─► LeaveServo ─┬─► Success            (操作员停止)
//!     ▲                            ├─► Recover ─► EnterServo
//!     └────────────────────────────┘   └─► Abort           (急停 / 重连耗尽 / 恢复失败)
//! ```
//!
//! # 故障分类
//!
//! 重连成功后查询 `emergency_stop_status`：
//! - 急停有效：[`ControlError::SafetyFault`]，不尝试 `clear_error`/使能，需要人工介入
//! - 否则自动恢复：`clear_error` → 使能并等待 → 进入伺服模式 → 继续运行
//!
//! 退出伺服模式超时视为本地已清除；其他失败直接终止。

use crate::ControlError;
use crate::bus::SharedBus;
use crate::config::ControlConfig;
use crate::control_loop::{ControlLoop, LoopOutcome};
use crate::gripper::{GripperLink, GripperWorker};
use crate::robot::RobotSession;
use jaka_driver::RobotTransport;
use tracing::{debug, error, info, warn};

/// 监督器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    EnterServo,
    Run,
    LeaveServo,
    Recover,
    Success,
    Abort,
}

/// 故障恢复监督器
pub struct RecoverySupervisor<'a, T: RobotTransport> {
    session: &'a RobotSession<T>,
    bus: &'a SharedBus,
    config: &'a ControlConfig,
    gripper_link: Option<&'a GripperLink>,
    gripper_worker: Option<&'a GripperWorker>,
    phase: SupervisorPhase,
    recoveries: u32,
}

impl<'a, T: RobotTransport> RecoverySupervisor<'a, T> {
    pub fn new(session: &'a RobotSession<T>, bus: &'a SharedBus, config: &'a ControlConfig) -> Self {
        Self {
            session,
            bus,
            config,
            gripper_link: None,
            gripper_worker: None,
            phase: SupervisorPhase::EnterServo,
            recoveries: 0,
        }
    }

    /// 夹爪：`link` 在重连时重新初始化，`worker` 执行控制循环转交的命令
    pub fn with_gripper(mut self, link: &'a GripperLink, worker: &'a GripperWorker) -> Self {
        self.gripper_link = Some(link);
        self.gripper_worker = Some(worker);
        self
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    /// 已完成的自动恢复次数
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    /// 运行直到操作员停止或不可恢复的故障
    ///
    /// 返回时总线上的"控制中"标志已清除；出错返回时"伺服模式"标志也已清除。
    pub fn run(&mut self) -> Result<LoopOutcome, ControlError> {
        self.bus.set_control_active(true);
        let result = self.supervise();
        self.bus.set_control_active(false);

        match &result {
            Ok(_) => self.set_phase(SupervisorPhase::Success),
            Err(e) => {
                error!("Teleoperation aborted: {}", e);
                self.bus.servo().force(false);
                self.set_phase(SupervisorPhase::Abort);
            },
        }
        result
    }

    fn supervise(&mut self) -> Result<LoopOutcome, ControlError> {
        self.set_phase(SupervisorPhase::EnterServo);
        self.session.enter_servo_mode(self.bus.servo())?;

        loop {
            self.set_phase(SupervisorPhase::Run);
            let result = {
                let mut control = ControlLoop::new(self.session.robot(), self.bus, self.config);
                if let Some(worker) = self.gripper_worker {
                    control = control.with_gripper(worker);
                }
                control.run()
            };

            self.set_phase(SupervisorPhase::LeaveServo);
            match result {
                Ok(outcome) => {
                    self.leave_servo()?;
                    return Ok(outcome);
                },
                Err(e) => {
                    warn!("Control loop failed: {}", e);
                    self.leave_servo()?;
                },
            }

            self.set_phase(SupervisorPhase::Recover);
            self.reconnect()?;
            self.classify_and_recover()?;
            self.recoveries += 1;
            info!("Recovered ({} so far), resuming control", self.recoveries);
        }
    }

    /// 退出伺服模式；超时视为本地已清除
    fn leave_servo(&self) -> Result<(), ControlError> {
        let servo = self.bus.servo();
        match self.session.leave_servo_mode(servo) {
            Ok(()) => Ok(()),
            Err(e) if e.is_timeout() => {
                warn!("Leaving servo mode timed out, assuming it is cleared");
                servo.force(false);
                Ok(())
            },
            Err(e) => Err(ControlError::LeaveServoFailed(e)),
        }
    }

    /// 重新建立连接（登出、登录、重新初始化夹爪）
    fn reconnect(&self) -> Result<(), ControlError> {
        let robot = self.session.robot();
        let max_attempts = self.session.config().max_reconnect_attempts;
        let interval = self.session.config().reconnect_interval();

        for attempt in 1..=max_attempts {
            info!("Reconnect attempt {}/{}", attempt, max_attempts);
            if let Err(e) = robot.logout() {
                debug!("Logout before reconnect failed: {}", e);
            }
            let result = robot.login().map_err(ControlError::from).and_then(|()| {
                self.gripper_link.map_or(Ok(()), GripperLink::reconnect)
            });
            match result {
                Ok(()) => {
                    info!("Reconnected after {} attempt(s)", attempt);
                    return Ok(());
                },
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    if attempt < max_attempts {
                        std::thread::sleep(interval);
                    }
                },
            }
        }
        Err(ControlError::ReconnectExhausted {
            attempts: max_attempts,
        })
    }

    /// 区分安全故障和可恢复故障，可恢复时重新使能并进入伺服模式
    fn classify_and_recover(&self) -> Result<(), ControlError> {
        let robot = self.session.robot();
        let emergency_stop = robot.emergency_stop_status().map_err(|e| {
            ControlError::RecoveryFailed(format!("emergency stop status query failed: {e}"))
        })?;
        if emergency_stop {
            error!("Emergency stop is active, operator intervention required");
            return Err(ControlError::SafetyFault);
        }

        info!("Fault is recoverable, re-enabling robot");
        match self.session.recover_automatic_enable() {
            Ok(true) => {},
            Ok(false) => {
                return Err(ControlError::RecoveryFailed(
                    "robot not enabled after clear_error".to_string(),
                ));
            },
            Err(e) => return Err(ControlError::RecoveryFailed(e.to_string())),
        }

        debug!("Re-entering servo mode");
        self.session
            .enter_servo_mode(self.bus.servo())
            .map_err(|e| ControlError::RecoveryFailed(format!("re-entering servo mode: {e}")))
    }

    fn set_phase(&mut self, phase: SupervisorPhase) {
        if self.phase != phase {
            debug!("Supervisor: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}
