//! 反馈帧钩子系统
//!
//! 在反馈读取线程中，每解码出一帧就同步触发所有已注册的回调。
//!
//! # 设计原则
//!
//! - **非阻塞**: 回调运行在读取线程上，必须快速返回，耗时工作交给 Channel
//! - **类型安全**: 使用 `dyn FeedbackCallback` trait object，闭包自动实现该 trait
//!
//! # 使用示例
//!
//! ```rust
//! use jaka_driver::hooks::{FeedbackCallback, HookManager};
//! use jaka_protocol::FeedbackFrame;
//! use std::sync::Arc;
//!
//! let mut hooks = HookManager::new();
//! hooks.add_callback(Arc::new(|frame: &FeedbackFrame| {
//!     let _ = frame.joint_actual_position;
//! }));
//! assert_eq!(hooks.len(), 1);
//! ```

use jaka_protocol::FeedbackFrame;
use std::sync::Arc;

/// 反馈帧回调 Trait
///
/// # 性能要求
///
/// - **非阻塞**: 禁止 I/O 和长时间持锁
/// - **Channel 模式**: 需要进一步处理时使用 `crossbeam_channel::Sender::try_send`
///
/// # 示例
///
/// ```rust
/// use jaka_driver::hooks::FeedbackCallback;
/// use jaka_protocol::{FeedbackFrame, JointVector};
/// use crossbeam_channel::{Sender, bounded};
///
/// struct JointForwarder {
///     sender: Sender<JointVector>,
/// }
///
/// impl FeedbackCallback for JointForwarder {
///     fn on_frame(&self, frame: &FeedbackFrame) {
///         // ✅ 使用 try_send，非阻塞
///         let _ = self.sender.try_send(frame.joint_actual_position);
///     }
/// }
/// ```
pub trait FeedbackCallback: Send + Sync {
    /// 解码出新的反馈帧时调用（在读取线程上）
    fn on_frame(&self, frame: &FeedbackFrame);
}

impl<F> FeedbackCallback for F
where
    F: Fn(&FeedbackFrame) + Send + Sync,
{
    fn on_frame(&self, frame: &FeedbackFrame) {
        self(frame)
    }
}

/// 钩子管理器
///
/// 回调列表本身不是线程安全的，需要外部同步（`FeedbackStream` 内部使用 `RwLock`）。
#[derive(Default)]
pub struct HookManager {
    callbacks: Vec<Arc<dyn FeedbackCallback>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn FeedbackCallback>) {
        self.callbacks.push(callback);
    }

    /// 移除所有回调
    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    /// 触发所有回调
    pub fn trigger_all(&self, frame: &FeedbackFrame) {
        for callback in self.callbacks.iter() {
            callback.on_frame(frame);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
