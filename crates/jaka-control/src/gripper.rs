//! 夹爪/工具
//!
//! 具体的夹爪驱动不在本库范围内，只通过 [`Gripper`] trait 接入。
//! 控制循环从不直接调用夹爪：命令经 [`GripperWorker`] 的有界通道交给后台线程执行，
//! 通道满时丢弃，不阻塞控制周期。

use crate::ControlError;
use crate::bus::{GripperCommand, NO_TOOL, SharedBus};
use crossbeam_channel::{Sender, TrySendError, bounded};
use jaka_driver::JoinTimeout;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 工作线程命令队列容量
const WORKER_QUEUE_CAPACITY: usize = 4;

/// 夹爪能力
pub trait Gripper: Send {
    fn name(&self) -> &str;
    /// 建立连接并完成初始化
    fn connect_and_setup(&mut self) -> Result<(), ControlError>;
    /// 闭合（最小开口）
    fn grip(&mut self) -> Result<(), ControlError>;
    /// 张开（最大开口）
    fn release(&mut self) -> Result<(), ControlError>;
    /// 当前开口宽度（不支持时为 `None`）
    fn width(&mut self) -> Option<f64> {
        None
    }
    /// 当前夹持力（不支持时为 `None`）
    fn force(&mut self) -> Option<f64> {
        None
    }
}

/// 不执行任何动作的夹爪
#[derive(Debug, Clone, Default)]
pub struct NullGripper {
    name: String,
}

impl NullGripper {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Gripper for NullGripper {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect_and_setup(&mut self) -> Result<(), ControlError> {
        Ok(())
    }

    fn grip(&mut self) -> Result<(), ControlError> {
        debug!("{}: grip (no-op)", self.name);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ControlError> {
        debug!("{}: release (no-op)", self.name);
        Ok(())
    }
}

/// 工具登记信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolInfo {
    pub id: i32,
    pub name: &'static str,
}

/// 已知工具
pub const TOOL_INFOS: &[ToolInfo] = &[
    ToolInfo {
        id: NO_TOOL,
        name: "none",
    },
    ToolInfo {
        id: 1,
        name: "dhrobotics_ag95",
    },
];

impl ToolInfo {
    pub fn lookup(id: i32) -> Option<&'static ToolInfo> {
        TOOL_INFOS.iter().find(|info| info.id == id)
    }
}

/// 按工具 ID 创建夹爪；`NO_TOOL` 返回 `None`
///
/// 登记的工具目前都映射到 [`NullGripper`]，真实驱动通过 [`GripperLink::replace`] 注入。
pub fn create_gripper(tool_id: i32) -> Result<Option<Box<dyn Gripper>>, ControlError> {
    let info = ToolInfo::lookup(tool_id)
        .ok_or_else(|| ControlError::Gripper(format!("Unknown tool id: {tool_id}")))?;
    if info.id == NO_TOOL {
        return Ok(None);
    }
    let mut gripper: Box<dyn Gripper> = Box::new(NullGripper::new(info.name));
    gripper.connect_and_setup()?;
    Ok(Some(gripper))
}

/// 当前夹爪的共享句柄
///
/// 工作线程、恢复监督器（重连时重新初始化）、状态监控（换工具）共用。
#[derive(Default)]
pub struct GripperLink {
    inner: Mutex<Option<Box<dyn Gripper>>>,
}

impl GripperLink {
    pub fn new(gripper: Option<Box<dyn Gripper>>) -> Self {
        Self {
            inner: Mutex::new(gripper),
        }
    }

    /// 按工具 ID 创建
    pub fn for_tool(tool_id: i32) -> Result<Self, ControlError> {
        Ok(Self::new(create_gripper(tool_id)?))
    }

    pub fn replace(&self, gripper: Option<Box<dyn Gripper>>) {
        *self.inner.lock() = gripper;
    }

    pub fn name(&self) -> Option<String> {
        self.inner.lock().as_ref().map(|g| g.name().to_string())
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// 重新建立夹爪连接（无夹爪时直接成功）
    pub fn reconnect(&self) -> Result<(), ControlError> {
        match self.inner.lock().as_mut() {
            Some(gripper) => gripper.connect_and_setup(),
            None => Ok(()),
        }
    }

    /// 执行夹爪命令（无夹爪时忽略）
    pub fn execute(&self, command: GripperCommand) -> Result<(), ControlError> {
        match self.inner.lock().as_mut() {
            Some(gripper) => match command {
                GripperCommand::Grip => gripper.grip(),
                GripperCommand::Release => gripper.release(),
            },
            None => Ok(()),
        }
    }

    /// 更换工具，结果记录到总线
    ///
    /// 失败时保留原夹爪。
    pub fn change_tool(&self, bus: &SharedBus, tool_id: i32) -> Result<(), ControlError> {
        bus.begin_tool_change(tool_id);
        match create_gripper(tool_id) {
            Ok(gripper) => {
                self.replace(gripper);
                bus.finish_tool_change(true);
                info!("Tool changed to {}", tool_id);
                Ok(())
            },
            Err(e) => {
                bus.finish_tool_change(false);
                warn!("Tool change to {} failed: {}", tool_id, e);
                Err(e)
            },
        }
    }

    /// 读取 (开口宽度, 夹持力)
    pub fn readings(&self) -> (Option<f64>, Option<f64>) {
        match self.inner.lock().as_mut() {
            Some(gripper) => (gripper.width(), gripper.force()),
            None => (None, None),
        }
    }
}

/// 夹爪后台工作线程
pub struct GripperWorker {
    tx: Option<Sender<GripperCommand>>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl GripperWorker {
    /// 启动工作线程
    pub fn spawn(link: Arc<GripperLink>, join_timeout: Duration) -> Result<Self, ControlError> {
        let (tx, rx) = bounded::<GripperCommand>(WORKER_QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("jaka-gripper".to_string())
            .spawn(move || {
                for command in rx {
                    if let Err(e) = link.execute(command) {
                        error!("Gripper {:?} failed: {}", command, e);
                    }
                }
                debug!("Gripper worker exiting");
            })
            .map_err(|e| ControlError::Gripper(format!("Failed to spawn gripper worker: {e}")))?;
        info!("Gripper worker started");
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            join_timeout,
        })
    }

    /// 投递命令，不阻塞；队列满时返回 `false`
    pub fn dispatch(&self, command: GripperCommand) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        match tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Gripper worker busy, dropping {:?}", command);
                false
            },
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for GripperWorker {
    fn drop(&mut self) {
        // 关闭通道，线程处理完剩余命令后退出
        self.tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join_timeout(self.join_timeout).is_err()
        {
            warn!(
                "Gripper worker panicked or did not finish within {:?}, detaching",
                self.join_timeout
            );
        }
    }
}
