//! 子命令实现

use anyhow::{Context, Result};
use jaka_control::{
    FeedbackBridge, GripperLink, GripperWorker, RecoverySupervisor, RobotSession, SharedBus,
    StatusMonitor, TeleopConfig, apply_realtime_priority,
};
use jaka_driver::{FeedbackStream, ProtocolClient, RobotTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::source;

/// 状态快照的输出间隔
const STATUS_INTERVAL: Duration = Duration::from_secs(1);
/// 等待第一帧反馈的时间
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// `run` 子命令的选项
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tool_id: i32,
    pub mock: bool,
}

// ==================== run ====================

pub fn run(config: &TeleopConfig, options: &RunOptions) -> Result<()> {
    let bus = Arc::new(SharedBus::new());
    install_stop_handler(bus.clone())?;

    if options.mock {
        return run_mock(config, options, bus);
    }

    let mut feedback = FeedbackStream::new(config.connection.clone());
    feedback.add_callback(Arc::new(FeedbackBridge::new(bus.clone())));
    feedback.login().context("Failed to connect feedback stream")?;
    if let Err(e) = feedback.wait_for_first_frame(FIRST_FRAME_TIMEOUT) {
        warn!("No feedback frame within {:?}: {}", FIRST_FRAME_TIMEOUT, e);
    }

    let session = RobotSession::new(
        ProtocolClient::new(config.connection.clone()),
        config.recovery.clone(),
    );
    let result = teleoperate(config, options, &session, &bus, Some(&feedback));
    session.robot().shutdown();
    feedback.logout();
    result
}

#[cfg(feature = "mock")]
fn run_mock(config: &TeleopConfig, options: &RunOptions, bus: Arc<SharedBus>) -> Result<()> {
    use jaka_driver::MockRobot;

    info!("Running against the in-memory mock robot");
    let robot = MockRobot::default();
    {
        let bus = bus.clone();
        robot.set_state_sink(move |joints| bus.publish_state(*joints));
    }
    bus.publish_state(robot.joints());
    let session = RobotSession::new(robot, config.recovery.clone());
    teleoperate(config, options, &session, &bus, None)
}

#[cfg(not(feature = "mock"))]
fn run_mock(_config: &TeleopConfig, _options: &RunOptions, _bus: Arc<SharedBus>) -> Result<()> {
    anyhow::bail!("--mock requires the `mock` feature")
}

/// 上电使能、启动夹爪和目标源，运行监督器直到停止，最后关机
fn teleoperate<T: RobotTransport>(
    config: &TeleopConfig,
    options: &RunOptions,
    session: &RobotSession<T>,
    bus: &Arc<SharedBus>,
    feedback: Option<&FeedbackStream>,
) -> Result<()> {
    session.start().context("Failed to start robot session")?;
    session.enable().context("Failed to enable robot")?;

    let link = Arc::new(GripperLink::for_tool(options.tool_id)?);
    bus.set_tool_id(options.tool_id);
    if let Some(name) = link.name() {
        info!("Tool {}: {}", options.tool_id, name);
    }
    let worker = GripperWorker::spawn(link.clone(), config.recovery.gripper_ack_timeout())?;

    source::spawn_stdin_source(bus.clone()).context("Failed to start target source")?;

    let done = AtomicBool::new(false);
    let result = thread::scope(|s| {
        let monitor = s.spawn(|| {
            let mut monitor = StatusMonitor::new(bus).with_gripper(&link);
            while !done.load(Ordering::Acquire) {
                if let Some(Err(e)) = monitor.service_tool_change() {
                    debug!("Tool change request not applied: {}", e);
                }
                let latest = feedback.and_then(FeedbackStream::latest);
                let snapshot = monitor.snapshot(latest.as_deref());
                match serde_json::to_string(&snapshot) {
                    Ok(json) => debug!("status {}", json),
                    Err(e) => warn!("Failed to serialize status: {}", e),
                }
                thread::sleep(STATUS_INTERVAL);
            }
        });

        let control = thread::Builder::new()
            .name("jaka-control".to_string())
            .spawn_scoped(s, || {
                apply_realtime_priority(config.control.realtime_priority);
                RecoverySupervisor::new(session, bus, &config.control)
                    .with_gripper(&link, &worker)
                    .run()
            });

        let result = match control {
            Ok(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("Control thread panicked"))
                .and_then(|r| r.map_err(anyhow::Error::from)),
            Err(e) => Err(anyhow::Error::from(e).context("Failed to spawn control thread")),
        };
        done.store(true, Ordering::Release);
        if monitor.join().is_err() {
            error!("Status monitor thread panicked");
        }
        result
    });

    match &result {
        Ok(outcome) => info!("Teleoperation finished: {:?}", outcome),
        Err(e) => error!("Teleoperation failed: {:#}", e),
    }
    if let Err(e) = session.shutdown(bus.servo()) {
        warn!("Shutdown incomplete: {}", e);
    }
    result.map(|_| ())
}

/// Ctrl+C：第一次请求减速停止，第二次立即退出
fn install_stop_handler(bus: Arc<SharedBus>) -> Result<()> {
    let pressed = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if pressed.swap(true, Ordering::AcqRel) {
            eprintln!("\nReceived second interrupt, exiting immediately");
            std::process::exit(130);
        }
        eprintln!("\nReceived interrupt signal. Stopping...");
        bus.request_stop();
    })
    .context("Failed to set signal handler")
}

// ==================== probe ====================

/// 连接控制器并打印基本状态（JSON）
pub fn probe(config: &TeleopConfig) -> Result<()> {
    let client = ProtocolClient::new(config.connection.clone());
    client.login().with_context(|| {
        format!(
            "Failed to connect to {}:{}",
            config.connection.host, config.connection.command_port
        )
    })?;

    let report = probe_report(&client);
    if let Err(e) = client.logout() {
        warn!("Logout failed: {}", e);
    }
    client.shutdown();

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

fn probe_report<T: RobotTransport>(robot: &T) -> Result<serde_json::Value> {
    let state = robot.robot_state()?;
    Ok(serde_json::json!({
        "version": robot.version()?,
        "powered_on": state.powered_on,
        "enabled": state.enabled,
        "joints": robot.joint_position()?,
        "tcp": robot.tcp_position()?,
        "emergency_stop": robot.emergency_stop_status()?,
        "in_servomove": robot.is_in_servomove()?,
    }))
}
