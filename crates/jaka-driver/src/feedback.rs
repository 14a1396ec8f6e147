//! 状态反馈流
//!
//! 第二条 TCP 连接（默认端口 10000），控制器以约 30ms 周期推送状态帧。
//! 后台读取线程负责分帧、解码、保存最新帧并触发回调；
//! 读取方通过 `ArcSwapOption` 无锁获取最新帧。

use crate::client::connect;
use crate::hooks::{FeedbackCallback, HookManager};
use crate::join::JoinTimeout;
use crate::{ConnectionConfig, DriverError};
use arc_swap::ArcSwapOption;
use jaka_protocol::{
    ErrorReport, FeedbackFrame, FrameSplitter, JointVector, MAX_PENDING_BYTES, Pose,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 单次读取大小
const READ_CHUNK: usize = 4096;

/// 读取线程与访问方共享的状态
struct FeedbackShared {
    latest: ArcSwapOption<FeedbackFrame>,
    hooks: RwLock<HookManager>,
    running: AtomicBool,
    /// 当前 socket 的克隆，用于 Drop 时唤醒阻塞的 `read`
    socket: Mutex<Option<TcpStream>>,
    first_frame: Mutex<bool>,
    first_frame_cv: Condvar,
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
}

/// 反馈流统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackStats {
    pub frames_received: u64,
    pub decode_errors: u64,
}

/// 状态反馈流客户端
///
/// # 示例
///
/// ```no_run
/// use jaka_driver::{ConnectionConfig, FeedbackStream};
/// use std::time::Duration;
///
/// let mut feedback = FeedbackStream::new(ConnectionConfig::default());
/// feedback.login()?;
/// feedback.wait_for_first_frame(Duration::from_secs(5))?;
/// println!("joints: {:?}", feedback.current_joint()?);
/// # Ok::<(), jaka_driver::DriverError>(())
/// ```
pub struct FeedbackStream {
    config: ConnectionConfig,
    shared: Arc<FeedbackShared>,
    reader: Option<JoinHandle<()>>,
}

impl FeedbackStream {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            shared: Arc::new(FeedbackShared {
                latest: ArcSwapOption::empty(),
                hooks: RwLock::new(HookManager::new()),
                running: AtomicBool::new(false),
                socket: Mutex::new(None),
                first_frame: Mutex::new(false),
                first_frame_cv: Condvar::new(),
                frames_received: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
            }),
            reader: None,
        }
    }

    /// 连接反馈端口并启动后台读取线程
    ///
    /// 已经在运行时直接返回 `Ok`。
    pub fn login(&mut self) -> Result<(), DriverError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let stream = connect(
            &self.config.host,
            self.config.feedback_port,
            self.config.timeout(),
        )
        .map_err(|e| {
            error!(
                "Feedback login to {}:{} failed: {}",
                self.config.host, self.config.feedback_port, e
            );
            DriverError::Transport(e)
        })?;
        *self.shared.socket.lock() = stream.try_clone().ok();
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("jaka-feedback".to_string())
            .spawn(move || reader_loop(stream, &config, &shared))?;
        self.reader = Some(handle);
        info!(
            "Feedback stream connected to {}:{}",
            self.config.host, self.config.feedback_port
        );
        Ok(())
    }

    /// 停止读取线程并关闭 socket
    pub fn logout(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(stream) = self.shared.socket.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        let join_timeout = Duration::from_secs(2) + self.config.reconnect_interval();
        if let Some(handle) = self.reader.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Feedback reader panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// 注册反馈回调（运行前后均可）
    pub fn add_callback(&self, callback: Arc<dyn FeedbackCallback>) {
        self.shared.hooks.write().add_callback(callback);
    }

    /// 阻塞等待第一帧
    pub fn wait_for_first_frame(&self, timeout: Duration) -> Result<(), DriverError> {
        let mut received = self.shared.first_frame.lock();
        let result = self
            .shared
            .first_frame_cv
            .wait_while_for(&mut received, |received| !*received, timeout);
        if result.timed_out() && !*received {
            return Err(DriverError::Timeout);
        }
        Ok(())
    }

    /// 最新一帧（尚未收到时为 `None`）
    pub fn latest(&self) -> Option<Arc<FeedbackFrame>> {
        self.shared.latest.load_full()
    }

    fn frame(&self) -> Result<Arc<FeedbackFrame>, DriverError> {
        self.latest().ok_or(DriverError::NoFeedback)
    }

    pub fn is_powered_on(&self) -> Result<bool, DriverError> {
        Ok(self.frame()?.powered_on)
    }

    pub fn is_enabled(&self) -> Result<bool, DriverError> {
        Ok(self.frame()?.enabled)
    }

    pub fn is_emergency_stop(&self) -> Result<bool, DriverError> {
        Ok(self.frame()?.emergency_stop)
    }

    pub fn is_protective_stop(&self) -> Result<bool, DriverError> {
        Ok(self.frame()?.protective_stop)
    }

    /// 实际关节位置（度）
    pub fn current_joint(&self) -> Result<JointVector, DriverError> {
        Ok(self.frame()?.joint_actual_position)
    }

    /// 实际 TCP 位姿
    pub fn current_pose(&self) -> Result<Pose, DriverError> {
        Ok(self.frame()?.actual_position)
    }

    /// 力矩传感器受力
    pub fn force_values(&self) -> Result<[f64; 6], DriverError> {
        let frame = self.frame()?;
        frame.force_values().ok_or_else(|| {
            DriverError::Parse(jaka_protocol::ProtocolError::MissingField("torqsensor"))
        })
    }

    /// 当前错误信息
    pub fn current_errors(&self) -> Result<Vec<ErrorReport>, DriverError> {
        Ok(vec![self.frame()?.error_report()])
    }

    pub fn stats(&self) -> FeedbackStats {
        FeedbackStats {
            frames_received: self.shared.frames_received.load(Ordering::Relaxed),
            decode_errors: self.shared.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FeedbackStream {
    fn drop(&mut self) {
        self.logout();
    }
}

/// 后台读取循环
fn reader_loop(mut stream: TcpStream, config: &ConnectionConfig, shared: &FeedbackShared) {
    let mut splitter = FrameSplitter::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut last_errcode: Option<String> = None;

    while shared.running.load(Ordering::Acquire) {
        let failure = match stream.read(&mut chunk) {
            Ok(0) => Some(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "feedback connection closed",
            )),
            Ok(n) => {
                splitter.extend(&chunk[..n]);
                while let Some(raw) = splitter.next_frame() {
                    handle_frame(&raw, shared, &mut last_errcode);
                }
                let dropped = splitter.take_discarded();
                if dropped > 0 {
                    shared.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Feedback frame exceeded {} bytes without a terminator, dropped {} bytes",
                        MAX_PENDING_BYTES, dropped
                    );
                }
                None
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(e) => Some(e),
        };

        if let Some(e) = failure {
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            warn!("Feedback stream read failed: {}, reconnecting", e);
            splitter.reset();
            match reconnect(config, shared) {
                Some(fresh) => stream = fresh,
                None => break,
            }
        }
    }
    debug!("Feedback reader exiting");
}

fn handle_frame(raw: &[u8], shared: &FeedbackShared, last_errcode: &mut Option<String>) {
    let frame = match FeedbackFrame::decode(raw) {
        Ok(frame) => frame,
        Err(e) => {
            shared.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Skipping malformed feedback frame ({} bytes): {}", raw.len(), e);
            return;
        },
    };

    // 只在错误状态变化时记录日志
    if frame.is_error() {
        if last_errcode.as_deref() != Some(frame.errcode.as_str()) {
            error!("Error in feedback: {:?}", frame.error_report());
            *last_errcode = Some(frame.errcode.clone());
        }
    } else if last_errcode.take().is_some() {
        info!("Feedback error cleared");
    }

    let frame = Arc::new(frame);
    shared.latest.store(Some(frame.clone()));
    let count = shared.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
    trace!("Feedback frame #{}", count);

    shared.hooks.read().trigger_all(&frame);

    let mut received = shared.first_frame.lock();
    if !*received {
        *received = true;
        shared.first_frame_cv.notify_all();
    }
}

/// 运行期间无限重连，停止后返回 `None`
fn reconnect(config: &ConnectionConfig, shared: &FeedbackShared) -> Option<TcpStream> {
    let mut attempts: u64 = 0;
    while shared.running.load(Ordering::Acquire) {
        match connect(&config.host, config.feedback_port, config.timeout()) {
            Ok(stream) => {
                let mut socket = shared.socket.lock();
                if !shared.running.load(Ordering::Acquire) {
                    let _ = stream.shutdown(Shutdown::Both);
                    return None;
                }
                *socket = stream.try_clone().ok();
                info!("Feedback stream reconnected after {} attempt(s)", attempts + 1);
                return Some(stream);
            },
            Err(e) => {
                attempts += 1;
                debug!("Feedback reconnect attempt {} failed: {}", attempts, e);
                std::thread::sleep(config.reconnect_interval());
            },
        }
    }
    None
}
