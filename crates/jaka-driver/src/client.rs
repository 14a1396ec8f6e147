//! 命令/响应 TCP 客户端
//!
//! 每次调用发送一个 JSON 请求并读取一个 JSON 响应，整个过程持有同一把锁，
//! 因此同一时刻只有一个请求在途。
//!
//! # 断线处理
//!
//! - 发送失败：按 `reconnect_interval` 无限重连，重连成功后重发（链路彻底失效时会一直阻塞）
//! - 接收失败（EOF / 复位）：同样重连，但本次响应已丢失，返回 `DriverError::Transport`
//! - 接收超时：丢弃 socket 并重连，返回 `DriverError::Timeout`

use crate::{ConnectionConfig, DriverError, RobotTransport};
use jaka_protocol::{
    Command, JointVector, MoveMode, Pose, ResponseFrame, RobotState, complete_object_len,
    parse_error_code_fast, scan_vector_field,
};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 单个响应的最大字节数（超过视为流已错位）
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// 建立 TCP 连接并设置超时
///
/// 连接超时与读写超时相同。
pub(crate) fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let timeout = timeout.max(Duration::from_millis(1));
    let mut last_err = io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("no address resolved for {host}:{port}"),
    );
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            },
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// 读取一个完整的 JSON 响应
fn read_response(stream: &mut TcpStream, chunk_size: usize) -> io::Result<String> {
    let mut chunk = vec![0u8; chunk_size.max(64)];
    let mut buf = Vec::with_capacity(chunk.len());
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "controller closed the connection",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = complete_object_len(&buf) {
            buf.truncate(end);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("response exceeds {MAX_RESPONSE_BYTES} bytes without closing brace"),
            ));
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// 命令通道客户端
///
/// # 示例
///
/// ```no_run
/// use jaka_driver::{ConnectionConfig, ProtocolClient, RobotTransport};
///
/// let client = ProtocolClient::new(ConnectionConfig::default());
/// client.login()?;
/// let joints = client.joint_position()?;
/// println!("joints: {:?}", joints);
/// client.logout()?;
/// # Ok::<(), jaka_driver::DriverError>(())
/// ```
pub struct ProtocolClient {
    config: ConnectionConfig,
    socket: Mutex<Option<TcpStream>>,
    /// 置位后重连循环立即放弃
    shutdown: AtomicBool,
}

impl ProtocolClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            socket: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.socket.lock().is_some()
    }

    /// 中断所有重连循环并关闭 socket
    ///
    /// 用于进程退出时唤醒可能阻塞在重连中的调用方。
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(stream) = self.socket.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn reconnect(&self) -> Result<TcpStream, DriverError> {
        let mut attempts: u64 = 0;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(DriverError::NotConnected);
            }
            match connect(
                &self.config.host,
                self.config.command_port,
                self.config.timeout(),
            ) {
                Ok(stream) => {
                    info!(
                        "Reconnected to {}:{} after {} failed attempt(s)",
                        self.config.host, self.config.command_port, attempts
                    );
                    return Ok(stream);
                },
                Err(e) => {
                    attempts += 1;
                    if attempts == 1 {
                        warn!(
                            "Reconnect to {}:{} failed: {}, retrying every {:?}",
                            self.config.host,
                            self.config.command_port,
                            e,
                            self.config.reconnect_interval()
                        );
                    } else {
                        debug!("Reconnect attempt {} failed: {}", attempts, e);
                    }
                    thread::sleep(self.config.reconnect_interval());
                },
            }
        }
    }

    /// 发送请求并读取原始响应文本
    fn request(&self, cmd: &Command) -> Result<String, DriverError> {
        let payload = cmd.encode()?;
        let mut guard = self.socket.lock();
        let stream = guard.as_mut().ok_or(DriverError::NotConnected)?;

        if let Err(e) = stream.write_all(&payload) {
            warn!("Send of {} failed: {}, reconnecting", cmd.name(), e);
            if let Some(old) = guard.take() {
                let _ = old.shutdown(Shutdown::Both);
            }
            loop {
                let mut fresh = self.reconnect()?;
                match fresh.write_all(&payload) {
                    Ok(()) => {
                        *guard = Some(fresh);
                        break;
                    },
                    Err(e) => {
                        warn!("Resend of {} failed: {}", cmd.name(), e);
                        thread::sleep(self.config.reconnect_interval());
                    },
                }
            }
        }

        let stream = guard.as_mut().ok_or(DriverError::NotConnected)?;
        match read_response(stream, self.config.recv_buffer_size) {
            Ok(raw) => {
                trace!("{} -> {}", cmd.name(), raw);
                Ok(raw)
            },
            Err(e) => {
                let timed_out = is_timeout(&e);
                if timed_out {
                    error!("Timed out waiting for reply to {}", cmd.name());
                } else {
                    error!("Receive of reply to {} failed: {}", cmd.name(), e);
                }
                if let Some(old) = guard.take() {
                    let _ = old.shutdown(Shutdown::Both);
                }
                *guard = Some(self.reconnect()?);
                if timed_out {
                    Err(DriverError::Timeout)
                } else {
                    Err(DriverError::Transport(e))
                }
            },
        }
    }

    /// 完整解码响应并检查 `errorCode`
    fn call(&self, cmd: Command) -> Result<ResponseFrame, DriverError> {
        let raw = self.request(&cmd)?;
        let frame = ResponseFrame::parse(&raw)?;
        if !frame.is_success() {
            warn!("{} rejected with errorCode {}", cmd.name(), frame.error_code);
            return Err(DriverError::Protocol {
                code: frame.error_code,
                payload: raw,
            });
        }
        Ok(frame)
    }

    /// 热路径：只快速扫描 `errorCode`，返回原始响应文本
    fn call_fast(&self, cmd: Command) -> Result<String, DriverError> {
        let raw = self.request(&cmd)?;
        let code = parse_error_code_fast(&raw)?;
        if code != 0 {
            return Err(DriverError::Protocol { code, payload: raw });
        }
        Ok(raw)
    }
}

impl RobotTransport for ProtocolClient {
    fn login(&self) -> Result<(), DriverError> {
        let stream = connect(
            &self.config.host,
            self.config.command_port,
            self.config.timeout(),
        )
        .map_err(|e| {
            error!(
                "Login to {}:{} failed: {}",
                self.config.host, self.config.command_port, e
            );
            DriverError::Transport(e)
        })?;
        self.shutdown.store(false, Ordering::Release);
        if let Some(old) = self.socket.lock().replace(stream) {
            let _ = old.shutdown(Shutdown::Both);
        }
        info!(
            "Connected to controller at {}:{}",
            self.config.host, self.config.command_port
        );
        Ok(())
    }

    fn logout(&self) -> Result<(), DriverError> {
        if let Some(stream) = self.socket.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Command socket closed");
        }
        Ok(())
    }

    fn power_on(&self) -> Result<(), DriverError> {
        self.call(Command::PowerOn).map(drop)
    }

    fn power_off(&self) -> Result<(), DriverError> {
        self.call(Command::PowerOff).map(drop)
    }

    fn enable_robot(&self) -> Result<(), DriverError> {
        self.call(Command::EnableRobot).map(drop)
    }

    fn disable_robot(&self) -> Result<(), DriverError> {
        self.call(Command::DisableRobot).map(drop)
    }

    fn clear_error(&self) -> Result<(), DriverError> {
        self.call(Command::ClearError).map(drop)
    }

    fn robot_state(&self) -> Result<RobotState, DriverError> {
        Ok(self.call(Command::GetRobotState)?.robot_state()?)
    }

    fn joint_position(&self) -> Result<JointVector, DriverError> {
        let raw = self.call_fast(Command::GetJointPos)?;
        Ok(scan_vector_field(&raw, "joint_pos")?)
    }

    fn tcp_position(&self) -> Result<Pose, DriverError> {
        let raw = self.call_fast(Command::GetTcpPos)?;
        Ok(scan_vector_field(&raw, "tcp_pos")?)
    }

    fn joint_move(
        &self,
        joints: JointVector,
        mode: MoveMode,
        speed: f64,
        accel: f64,
    ) -> Result<(), DriverError> {
        let cmd = Command::joint_move(joints, mode, speed, accel)
            .map_err(|e| DriverError::InvalidInput(e.to_string()))?;
        self.call(cmd).map(drop)
    }

    fn end_move(&self, pose: Pose, speed: f64, accel: f64) -> Result<(), DriverError> {
        self.call(Command::end_move(pose, speed, accel)).map(drop)
    }

    fn linear_move(
        &self,
        pose: Pose,
        mode: MoveMode,
        speed: f64,
        accel: f64,
        tol: f64,
    ) -> Result<(), DriverError> {
        let cmd = Command::linear_move(pose, mode, speed, accel, tol)
            .map_err(|e| DriverError::InvalidInput(e.to_string()))?;
        self.call(cmd).map(drop)
    }

    fn servo_move_enable(&self, enable: bool) -> Result<(), DriverError> {
        self.call(Command::servo_move(enable)).map(drop)
    }

    fn is_in_servomove(&self) -> Result<bool, DriverError> {
        Ok(self.call(Command::IsInServomove)?.in_servomove()?)
    }

    fn servo_j(
        &self,
        joints: JointVector,
        mode: MoveMode,
        step_num: u32,
    ) -> Result<(), DriverError> {
        self.call_fast(Command::servo_j(joints, mode, step_num))
            .map(drop)
    }

    fn emergency_stop_status(&self) -> Result<bool, DriverError> {
        Ok(self.call(Command::EmergencyStopStatus)?.emergency_stop()?)
    }

    fn version(&self) -> Result<String, DriverError> {
        Ok(self.call(Command::GetVersion)?.version()?)
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        if let Some(stream) = self.socket.get_mut().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
