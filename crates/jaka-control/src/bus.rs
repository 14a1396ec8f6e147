//! 共享状态总线
//!
//! 控制循环、恢复监督器、状态监控和上游目标源之间唯一的共享状态：
//! - 最新关节状态/目标：`ArcSwapOption`，写入无锁，读取零拷贝
//! - 标志位：原子变量
//! - 夹爪命令：有界 crossbeam 通道（只在开合状态变化时产生）
//! - "已收到状态/目标"：`Condvar` 唤醒等待方
//! - 伺服模式标志：显式互斥锁 [`ServoModeCell`]

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use jaka_protocol::JointVector;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 夹爪命令队列容量
const GRIPPER_QUEUE_CAPACITY: usize = 8;

/// 无工具
pub const NO_TOOL: i32 = -1;

/// 带接收时间的关节样本
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSample {
    pub joints: JointVector,
    pub received_at: Instant,
}

/// 夹爪命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripperCommand {
    Grip,
    Release,
}

/// 工具更换状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChange {
    #[default]
    Idle,
    /// 正在更换为 `next_tool_id`
    InProgress { next_tool_id: i32 },
    /// 更换结束，结果尚未被监控方取走
    Finished { tool_id: i32, success: bool },
}

/// 伺服模式标志
///
/// 控制器在伺服模式下查询详细错误信息会被静默踢出伺服模式，
/// 因此进入/退出伺服模式和错误查询都必须持有同一把锁，
/// 且错误查询只在标志为非伺服模式时进行。
#[derive(Debug, Default)]
pub struct ServoModeCell {
    active: Mutex<bool>,
}

impl ServoModeCell {
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    /// 持锁执行模式切换，成功后更新标志
    pub fn transition<E>(&self, active: bool, f: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        let mut flag = self.active.lock();
        f()?;
        *flag = active;
        Ok(())
    }

    /// 直接设置标志（例如退出伺服模式超时后认定本地已清除）
    pub fn force(&self, active: bool) {
        *self.active.lock() = active;
    }

    /// 仅在非伺服模式下持锁执行 `f`；伺服模式下返回 `None`
    pub fn with_non_servo<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let flag = self.active.lock();
        if *flag { None } else { Some(f()) }
    }
}

/// 共享状态总线
pub struct SharedBus {
    state: ArcSwapOption<JointSample>,
    target: ArcSwapOption<JointSample>,
    sample_lock: Mutex<()>,
    sample_cv: Condvar,
    servo: ServoModeCell,
    control_active: AtomicBool,
    stop_requested: AtomicBool,
    grip_closed: AtomicBool,
    gripper_tx: Sender<GripperCommand>,
    gripper_rx: Receiver<GripperCommand>,
    tool_id: AtomicI32,
    tool_change: Mutex<ToolChange>,
    tool_request: Mutex<Option<i32>>,
    last_delta: ArcSwap<JointVector>,
}

impl Default for SharedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBus {
    pub fn new() -> Self {
        let (gripper_tx, gripper_rx) = bounded(GRIPPER_QUEUE_CAPACITY);
        Self {
            state: ArcSwapOption::empty(),
            target: ArcSwapOption::empty(),
            sample_lock: Mutex::new(()),
            sample_cv: Condvar::new(),
            servo: ServoModeCell::default(),
            control_active: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            grip_closed: AtomicBool::new(false),
            gripper_tx,
            gripper_rx,
            tool_id: AtomicI32::new(NO_TOOL),
            tool_change: Mutex::new(ToolChange::Idle),
            tool_request: Mutex::new(None),
            last_delta: ArcSwap::from_pointee([0.0; 6]),
        }
    }

    // ==================== 关节状态/目标 ====================

    /// 发布实际关节状态（来自反馈流）
    pub fn publish_state(&self, joints: JointVector) {
        self.state.store(Some(Arc::new(JointSample {
            joints,
            received_at: Instant::now(),
        })));
        self.notify_sample();
    }

    /// 发布外部目标
    pub fn publish_target(&self, joints: JointVector) {
        self.target.store(Some(Arc::new(JointSample {
            joints,
            received_at: Instant::now(),
        })));
        self.notify_sample();
    }

    pub fn state(&self) -> Option<JointSample> {
        self.state.load().as_deref().copied()
    }

    pub fn target(&self) -> Option<JointSample> {
        self.target.load().as_deref().copied()
    }

    /// 等待新的状态或目标样本，最长 `timeout`
    ///
    /// 返回时状态和目标是否都已收到。
    pub fn wait_for_sample(&self, timeout: Duration) -> bool {
        let mut guard = self.sample_lock.lock();
        if !self.has_samples() {
            self.sample_cv.wait_for(&mut guard, timeout);
        }
        self.has_samples()
    }

    /// 状态和目标都已收到
    pub fn has_samples(&self) -> bool {
        self.state.load().is_some() && self.target.load().is_some()
    }

    /// 清除已收到的状态和目标
    pub fn clear_samples(&self) {
        self.state.store(None);
        self.target.store(None);
    }

    fn notify_sample(&self) {
        let _guard = self.sample_lock.lock();
        self.sample_cv.notify_all();
    }

    // ==================== 标志位 ====================

    pub fn servo(&self) -> &ServoModeCell {
        &self.servo
    }

    pub fn set_control_active(&self, active: bool) {
        self.control_active.store(active, Ordering::Release);
    }

    pub fn is_control_active(&self) -> bool {
        self.control_active.load(Ordering::Acquire)
    }

    /// 请求控制循环减速停止
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.notify_sample();
    }

    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    // ==================== 夹爪 ====================

    /// 更新夹爪开合状态，状态变化时产生一个命令
    pub fn set_grip(&self, closed: bool) {
        if self.grip_closed.swap(closed, Ordering::AcqRel) == closed {
            return;
        }
        let command = if closed {
            GripperCommand::Grip
        } else {
            GripperCommand::Release
        };
        match self.gripper_tx.try_send(command) {
            Ok(()) => debug!("Gripper command queued: {:?}", command),
            Err(TrySendError::Full(_)) => warn!("Gripper queue full, dropping {:?}", command),
            Err(TrySendError::Disconnected(_)) => {},
        }
    }

    /// 取出一个待执行的夹爪命令（不阻塞）
    pub fn try_recv_gripper(&self) -> Option<GripperCommand> {
        self.gripper_rx.try_recv().ok()
    }

    // ==================== 工具 ====================

    pub fn tool_id(&self) -> i32 {
        self.tool_id.load(Ordering::Acquire)
    }

    pub fn set_tool_id(&self, tool_id: i32) {
        self.tool_id.store(tool_id, Ordering::Release);
    }

    pub fn tool_change(&self) -> ToolChange {
        *self.tool_change.lock()
    }

    /// 请求更换工具，由持有夹爪连接的一方通过
    /// [`take_tool_change_request`](Self::take_tool_change_request) 取走执行
    ///
    /// 更换进行中时拒绝并返回 `false`；尚未取走的请求被新请求覆盖。
    pub fn request_tool_change(&self, tool_id: i32) -> bool {
        if matches!(self.tool_change(), ToolChange::InProgress { .. }) {
            warn!("Tool change in progress, ignoring request for tool {}", tool_id);
            return false;
        }
        if let Some(previous) = self.tool_request.lock().replace(tool_id) {
            debug!("Tool change request {} superseded by {}", previous, tool_id);
        }
        true
    }

    pub fn take_tool_change_request(&self) -> Option<i32> {
        self.tool_request.lock().take()
    }

    pub fn begin_tool_change(&self, next_tool_id: i32) {
        *self.tool_change.lock() = ToolChange::InProgress { next_tool_id };
    }

    /// 结束工具更换；成功时更新当前工具
    pub fn finish_tool_change(&self, success: bool) {
        let mut change = self.tool_change.lock();
        if let ToolChange::InProgress { next_tool_id } = *change {
            if success {
                self.set_tool_id(next_tool_id);
            }
            *change = ToolChange::Finished {
                tool_id: next_tool_id,
                success,
            };
        }
    }

    /// 取走已结束的工具更换结果
    pub fn take_tool_change_result(&self) -> Option<(i32, bool)> {
        let mut change = self.tool_change.lock();
        match *change {
            ToolChange::Finished { tool_id, success } => {
                *change = ToolChange::Idle;
                Some((tool_id, success))
            },
            _ => None,
        }
    }

    // ==================== 最近一次下发 ====================

    pub fn publish_delta(&self, delta: JointVector) {
        self.last_delta.store(Arc::new(delta));
    }

    pub fn last_delta(&self) -> JointVector {
        **self.last_delta.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_samples() {
        let bus = SharedBus::new();
        assert!(bus.state().is_none());
        assert!(!bus.has_samples());

        bus.publish_state([1.0; 6]);
        assert_eq!(bus.state().unwrap().joints, [1.0; 6]);
        assert!(!bus.has_samples());

        bus.publish_target([2.0; 6]);
        assert!(bus.has_samples());

        bus.clear_samples();
        assert!(bus.target().is_none());
    }

    #[test]
    fn test_wait_for_sample_wakes_up() {
        let bus = Arc::new(SharedBus::new());
        bus.publish_state([0.0; 6]);

        let publisher = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish_target([1.0; 6]);
        });
        // 有可能在发布前超时返回，循环等待
        let mut ready = false;
        for _ in 0..100 {
            if bus.wait_for_sample(Duration::from_millis(50)) {
                ready = true;
                break;
            }
        }
        handle.join().unwrap();
        assert!(ready);
    }

    #[test]
    fn test_wait_for_sample_times_out() {
        let bus = SharedBus::new();
        let start = Instant::now();
        assert!(!bus.wait_for_sample(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_gripper_commands_on_transitions_only() {
        let bus = SharedBus::new();
        bus.set_grip(false);
        assert_eq!(bus.try_recv_gripper(), None);

        bus.set_grip(true);
        bus.set_grip(true);
        bus.set_grip(false);
        assert_eq!(bus.try_recv_gripper(), Some(GripperCommand::Grip));
        assert_eq!(bus.try_recv_gripper(), Some(GripperCommand::Release));
        assert_eq!(bus.try_recv_gripper(), None);
    }

    #[test]
    fn test_gripper_queue_full_drops() {
        let bus = SharedBus::new();
        for i in 0..(GRIPPER_QUEUE_CAPACITY * 2) {
            bus.set_grip(i % 2 == 0);
        }
        let mut count = 0;
        while bus.try_recv_gripper().is_some() {
            count += 1;
        }
        assert_eq!(count, GRIPPER_QUEUE_CAPACITY);
    }

    #[test]
    fn test_servo_mode_cell() {
        let cell = ServoModeCell::default();
        assert!(!cell.is_active());
        assert_eq!(cell.with_non_servo(|| 42), Some(42));

        cell.transition(true, || Ok::<(), ()>(())).unwrap();
        assert!(cell.is_active());
        assert_eq!(cell.with_non_servo(|| 42), None);

        // 切换失败时标志不变
        assert!(cell.transition(false, || Err(())).is_err());
        assert!(cell.is_active());

        cell.force(false);
        assert!(!cell.is_active());
    }

    #[test]
    fn test_tool_change() {
        let bus = SharedBus::new();
        assert_eq!(bus.tool_id(), NO_TOOL);
        assert_eq!(bus.take_tool_change_result(), None);

        bus.begin_tool_change(1);
        assert_eq!(bus.tool_change(), ToolChange::InProgress { next_tool_id: 1 });
        bus.finish_tool_change(true);
        assert_eq!(bus.tool_id(), 1);
        assert_eq!(bus.take_tool_change_result(), Some((1, true)));
        assert_eq!(bus.tool_change(), ToolChange::Idle);

        bus.begin_tool_change(2);
        bus.finish_tool_change(false);
        assert_eq!(bus.tool_id(), 1);
        assert_eq!(bus.take_tool_change_result(), Some((2, false)));
    }

    #[test]
    fn test_stop_and_flags() {
        let bus = SharedBus::new();
        assert!(!bus.is_stop_requested());
        bus.request_stop();
        assert!(bus.is_stop_requested());
        bus.clear_stop();
        assert!(!bus.is_stop_requested());

        bus.set_control_active(true);
        assert!(bus.is_control_active());

        bus.publish_delta([0.5; 6]);
        assert_eq!(bus.last_delta(), [0.5; 6]);
    }

    #[test]
    fn test_tool_change_request() {
        let bus = SharedBus::new();
        assert_eq!(bus.take_tool_change_request(), None);

        assert!(bus.request_tool_change(1));
        assert!(bus.request_tool_change(2));
        assert_eq!(bus.take_tool_change_request(), Some(2));
        assert_eq!(bus.take_tool_change_request(), None);

        bus.begin_tool_change(2);
        assert!(!bus.request_tool_change(3));
        assert_eq!(bus.take_tool_change_request(), None);

        bus.finish_tool_change(true);
        assert!(bus.request_tool_change(3));
        assert_eq!(bus.tool_id(), 2);
        assert_eq!(bus.take_tool_change_result(), Some((2, true)));
    }
}
