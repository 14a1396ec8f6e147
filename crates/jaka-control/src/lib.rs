//! 遥操作控制层
//!
//! 在驱动层之上实现实时伺服控制：
//! - [`shaper`]：每周期把外部目标变换为安全的关节增量（去混叠、软限位、延迟插值、限速、平滑、死区）
//! - [`control_loop`]：固定周期控制循环，下发 `servo_j`，处理停止请求
//! - [`recovery`]：故障恢复监督器（退出伺服、重连、故障分类、自动恢复）
//! - [`bus`]：组件间共享状态
//! - [`robot`]：带等待的高层机器人操作
//! - [`gripper`]：夹爪能力 trait 与后台工作线程
//! - [`monitor`]：状态快照与反馈桥接
//!
//! # 示例
//!
//! ```rust,no_run
//! use jaka_control::{RecoverySupervisor, RobotSession, SharedBus, TeleopConfig};
//! use jaka_driver::ProtocolClient;
//!
//! # fn main() -> Result<(), jaka_control::ControlError> {
//! let config = TeleopConfig::load_from_file("teleop.toml")?;
//! let session = RobotSession::new(
//!     ProtocolClient::new(config.connection.clone()),
//!     config.recovery.clone(),
//! );
//! session.start()?;
//! session.enable()?;
//!
//! let bus = SharedBus::new();
//! let outcome = RecoverySupervisor::new(&session, &bus, &config.control).run()?;
//! println!("{outcome:?}");
//! session.shutdown(bus.servo())?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod control_loop;
mod error;
pub mod gripper;
pub mod monitor;
pub mod recovery;
pub mod robot;
pub mod shaper;

// 重新导出常用类型
pub use bus::{GripperCommand, JointSample, NO_TOOL, ServoModeCell, SharedBus, ToolChange};
pub use config::{ControlConfig, RecoveryConfig, TeleopConfig};
pub use control_loop::{ControlLoop, LoopOutcome, LoopState, apply_realtime_priority};
pub use error::ControlError;
pub use gripper::{Gripper, GripperLink, GripperWorker, NullGripper, ToolInfo};
pub use monitor::{FeedbackBridge, StatusMonitor, StatusSnapshot};
pub use recovery::{RecoverySupervisor, SupervisorPhase};
pub use robot::RobotSession;
pub use shaper::{ShapedCommand, TrajectoryShaper};
