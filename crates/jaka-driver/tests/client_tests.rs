//! ProtocolClient 集成测试
//!
//! 使用本地回环 TCP 模拟控制器的命令端口。

use crossbeam_channel::{Receiver, Sender, unbounded};
use jaka_driver::{ConnectionConfig, DriverError, ProtocolClient, RobotTransport};
use jaka_protocol::{MoveMode, RobotState};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// 模拟控制器的应答动作
enum Reply {
    /// 整段发送
    Send(String),
    /// 分两次发送（中间暂停）
    Split(String, usize),
    /// 不回复（触发客户端超时）
    Silent,
    /// 关闭连接
    Close,
}

/// 启动模拟控制器，返回端口和请求记录通道
fn spawn_controller<F>(handler: F) -> (u16, Receiver<Value>)
where
    F: Fn(&Value) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = unbounded();
    let handler = std::sync::Arc::new(handler);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let tx = tx.clone();
            let handler = handler.clone();
            thread::spawn(move || serve(stream, tx, handler.as_ref()));
        }
    });
    (port, rx)
}

fn serve(mut stream: TcpStream, tx: Sender<Value>, handler: &(dyn Fn(&Value) -> Reply + Send + Sync)) {
    let reader = stream.try_clone().unwrap();
    // 请求之间没有分隔符，使用流式反序列化
    let requests = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    for request in requests {
        let Ok(request) = request else { return };
        let _ = tx.send(request.clone());
        match handler(&request) {
            Reply::Send(body) => {
                if stream.write_all(body.as_bytes()).is_err() {
                    return;
                }
            },
            Reply::Split(body, at) => {
                let (a, b) = body.as_bytes().split_at(at);
                let _ = stream.write_all(a);
                let _ = stream.flush();
                thread::sleep(Duration::from_millis(30));
                let _ = stream.write_all(b);
            },
            Reply::Silent => {},
            Reply::Close => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            },
        }
    }
}

fn ok(extra: &str) -> Reply {
    if extra.is_empty() {
        Reply::Send(r#"{"errorCode": "0", "errorMsg": ""}"#.to_string())
    } else {
        Reply::Send(format!(r#"{{"errorCode": "0", "errorMsg": "", {extra}}}"#))
    }
}

fn config(port: u16) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        command_port: port,
        timeout_ms: 300,
        reconnect_interval_ms: 20,
        ..Default::default()
    }
}

fn cmd_name(request: &Value) -> &str {
    request["cmdName"].as_str().unwrap_or("")
}

fn default_handler(request: &Value) -> Reply {
    match cmd_name(request) {
        "get_joint_pos" => ok(r#""joint_pos": [1.0, 2.0, 3.0, 4.0, 5.0, 6.5]"#),
        "get_tcp_pos" => ok(r#""tcp_pos": [400.0, 0.0, 300.0, 180.0, 0.0, 90.0]"#),
        "get_robot_state" => ok(r#""power": "powered_on", "enable": "robot_enabled""#),
        "get_version" => ok(r#""version": "1.5.14_13_X64""#),
        "emergency_stop_status" => ok(r#""emergency_stop": 0"#),
        "is_in_servomove" => ok(r#""in_servomove": true"#),
        "enable_robot" => Reply::Send(r#"{"errorCode": "2", "errorMsg": "robot is not powered on"}"#.to_string()),
        "clear_error" => Reply::Send(r#"{"errorCode": "0", "errorMsg": "", "broken": }"#.to_string()),
        _ => ok(""),
    }
}

fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_login_unreachable_is_transport_error() {
    let client = ProtocolClient::new(config(unused_port()));
    let err = client.login().unwrap_err();
    assert!(matches!(err, DriverError::Transport(_)), "{err:?}");
    assert!(!client.is_connected());
}

#[test]
fn test_operations_before_login() {
    let client = ProtocolClient::new(config(unused_port()));
    assert!(matches!(client.power_on(), Err(DriverError::NotConnected)));
    assert!(matches!(
        client.servo_j([0.0; 6], MoveMode::Incremental, 1),
        Err(DriverError::NotConnected)
    ));
}

#[test]
fn test_typed_operations() {
    let (port, requests) = spawn_controller(default_handler);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    assert_eq!(client.joint_position().unwrap(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.5]);
    assert_eq!(client.tcp_position().unwrap()[2], 300.0);
    assert_eq!(
        client.robot_state().unwrap(),
        RobotState {
            powered_on: true,
            enabled: true
        }
    );
    assert_eq!(client.version().unwrap(), "1.5.14_13_X64");
    assert!(!client.emergency_stop_status().unwrap());
    assert!(client.is_in_servomove().unwrap());
    client.power_on().unwrap();
    client.servo_move_enable(true).unwrap();

    let names: Vec<String> = requests
        .try_iter()
        .map(|r| cmd_name(&r).to_string())
        .collect();
    assert_eq!(
        names,
        [
            "get_joint_pos",
            "get_tcp_pos",
            "get_robot_state",
            "get_version",
            "emergency_stop_status",
            "is_in_servomove",
            "power_on",
            "servo_move",
        ]
    );
}

#[test]
fn test_servo_j_request_encoding() {
    let (port, requests) = spawn_controller(default_handler);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    client
        .servo_j([0.1, 0.0, -0.2, 0.0, 0.0, 0.0], MoveMode::Incremental, 1)
        .unwrap();

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(request["cmdName"], "servo_j");
    assert_eq!(request["relFlag"], 1);
    assert_eq!(request["stepNum"], 1);
    assert_eq!(request["jointPosition"][2], -0.2);
}

#[test]
fn test_nonzero_error_code_is_protocol_error() {
    let (port, _requests) = spawn_controller(default_handler);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    match client.enable_robot() {
        Err(DriverError::Protocol { code, payload }) => {
            assert_eq!(code, 2);
            assert!(payload.contains("not powered on"));
        },
        other => panic!("expected Protocol error, got {other:?}"),
    }
    // 连接仍然可用
    client.power_on().unwrap();
}

#[test]
fn test_malformed_reply_is_parse_error() {
    let (port, _requests) = spawn_controller(default_handler);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    assert!(matches!(client.clear_error(), Err(DriverError::Parse(_))));
}

#[test]
fn test_accel_limit_rejected_locally() {
    let (port, requests) = spawn_controller(default_handler);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    let err = client
        .joint_move([0.0; 6], MoveMode::Absolute, 10.0, 9000.0)
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidInput(_)));
    assert!(requests.try_recv().is_err());

    client
        .linear_move([400.0, 0.0, 300.0, 180.0, 0.0, 90.0], MoveMode::Absolute, 50.0, 500.0, 0.0)
        .unwrap();
    assert_eq!(requests.recv_timeout(Duration::from_secs(1)).unwrap()["cmdName"], "moveL");
}

#[test]
fn test_reply_split_across_reads() {
    let body = r#"{"errorCode": "0", "errorMsg": "", "version": "1.5.14_13_X64"}"#.to_string();
    let (port, _requests) = spawn_controller(move |request| match cmd_name(request) {
        "get_version" => Reply::Split(body.clone(), 12),
        _ => ok(""),
    });
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    assert_eq!(client.version().unwrap(), "1.5.14_13_X64");
}

#[test]
fn test_receive_timeout_reconnects() {
    let (port, requests) = spawn_controller(|request| match cmd_name(request) {
        "get_version" => Reply::Silent,
        _ => ok(""),
    });
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    let err = client.version().unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert!(client.is_connected());

    // 新连接上继续工作
    client.power_on().unwrap();
    let names: Vec<String> = requests
        .try_iter()
        .map(|r| cmd_name(&r).to_string())
        .collect();
    assert_eq!(names, ["get_version", "power_on"]);
}

#[test]
fn test_connection_closed_reconnects() {
    let (port, _requests) = spawn_controller(|request| match cmd_name(request) {
        "power_off" => Reply::Close,
        _ => ok(""),
    });
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();

    let err = client.power_off().unwrap_err();
    assert!(matches!(err, DriverError::Transport(_)), "{err:?}");

    client.power_on().unwrap();
}

/// 第一条连接只回复一条请求，随后带着未读字节关闭，客户端收到 RST，
/// 下一次发送必然失败。`serve_after` 为真时继续按 `default_handler` 接受新连接。
fn spawn_resetting_controller(serve_after: bool) -> (u16, Receiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = unbounded();

    thread::spawn(move || {
        let (mut first, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let n = loop {
            let n = first.peek(&mut buf).unwrap();
            if n > 0 && buf[n - 1] == b'}' {
                break n;
            }
            thread::sleep(Duration::from_millis(5));
        };
        first.read_exact(&mut buf[..n - 1]).unwrap();
        first
            .write_all(br#"{"errorCode": "0", "errorMsg": ""}"#)
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(first);

        if !serve_after {
            return;
        }
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let tx = tx.clone();
            thread::spawn(move || serve(stream, tx, &default_handler));
        }
    });
    (port, rx)
}

#[test]
fn test_send_failure_reconnects_and_resends() {
    let (port, requests) = spawn_resetting_controller(true);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();
    client.power_on().unwrap();
    // 等待 RST 到达
    thread::sleep(Duration::from_millis(200));

    assert_eq!(client.joint_position().unwrap(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.5]);
    assert!(client.is_connected());

    // 新连接上只收到重发的那一条，之后正常工作
    let resent = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(cmd_name(&resent), "get_joint_pos");
    client.power_off().unwrap();
    assert_eq!(
        cmd_name(&requests.recv_timeout(Duration::from_secs(1)).unwrap()),
        "power_off"
    );
}

#[test]
fn test_shutdown_interrupts_send_retry() {
    let (port, _requests) = spawn_resetting_controller(false);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();
    client.power_on().unwrap();
    thread::sleep(Duration::from_millis(200));

    thread::scope(|s| {
        // 控制器已下线，发送失败后一直重连
        let call = s.spawn(|| client.power_off());
        thread::sleep(Duration::from_millis(150));
        assert!(!call.is_finished());

        client.shutdown();
        let result = call.join().unwrap();
        assert!(matches!(result, Err(DriverError::NotConnected)), "{result:?}");
    });
    assert!(!client.is_connected());
}

#[test]
fn test_logout_then_call() {
    let (port, _requests) = spawn_controller(default_handler);
    let client = ProtocolClient::new(config(port));
    client.login().unwrap();
    client.logout().unwrap();
    assert!(!client.is_connected());
    assert!(matches!(client.power_on(), Err(DriverError::NotConnected)));
}
