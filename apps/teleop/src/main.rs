//! # JAKA Teleop
//!
//! 从标准输入读取关节目标（JSON lines），以固定周期伺服控制 JAKA 机械臂。
//!
//! ```bash
//! # 查看控制器状态
//! jaka-teleop --host 10.5.5.100 probe
//!
//! # 遥操作（Ctrl+C 减速停止）
//! vr-source | jaka-teleop --config teleop.toml run --tool 1
//!
//! # 导出默认配置
//! jaka-teleop dump-config > teleop.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jaka_control::{NO_TOOL, TeleopConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod source;

use commands::RunOptions;

/// JAKA 遥操作命令行工具
#[derive(Parser, Debug)]
#[command(name = "jaka-teleop")]
#[command(about = "Servo teleoperation runner for JAKA robot arms", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（TOML），缺省使用默认配置
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 控制器地址（覆盖配置文件）
    #[arg(long, global = true)]
    host: Option<String>,

    /// 日志级别（`RUST_LOG` 优先）
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 伺服遥操作，目标来自标准输入
    Run {
        /// 工具 ID（-1 = 无工具）
        #[arg(long, default_value_t = NO_TOOL, allow_hyphen_values = true)]
        tool: i32,

        /// 只整形不下发
        #[arg(long)]
        dry_run: bool,

        /// 使用内存模拟机器人
        #[cfg(feature = "mock")]
        #[arg(long)]
        mock: bool,
    },

    /// 查询控制器状态
    Probe,

    /// 打印生效的配置（TOML）
    DumpConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(cli.config.as_deref(), cli.host)?;

    match cli.command {
        Commands::Run {
            tool,
            dry_run,
            #[cfg(feature = "mock")]
            mock,
        } => {
            config.control.dry_run |= dry_run;
            config.validate()?;
            #[cfg(not(feature = "mock"))]
            let mock = false;
            commands::run(
                &config,
                &RunOptions {
                    tool_id: tool,
                    mock,
                },
            )
        },
        Commands::Probe => commands::probe(&config),
        Commands::DumpConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        },
    }
}

/// 加载配置并应用命令行覆盖
fn load_config(path: Option<&std::path::Path>, host: Option<String>) -> Result<TeleopConfig> {
    let mut config = match path {
        Some(path) => TeleopConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TeleopConfig::default(),
    };
    if let Some(host) = host {
        config.connection.host = host;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "jaka-teleop",
            "--host",
            "127.0.0.1",
            "run",
            "--tool",
            "-1",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert!(matches!(
            cli.command,
            Commands::Run {
                tool: -1,
                dry_run: true,
                ..
            }
        ));
    }

    #[test]
    fn test_load_config_with_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nhost = \"192.168.1.2\"\n[control]\ndry_run = true").unwrap();

        let config = load_config(Some(file.path()), None).unwrap();
        assert_eq!(config.connection.host, "192.168.1.2");
        assert!(config.control.dry_run);

        let config = load_config(Some(file.path()), Some("10.0.0.1".to_string())).unwrap();
        assert_eq!(config.connection.host, "10.0.0.1");

        assert!(load_config(None, None).unwrap() == TeleopConfig::default());
    }
}
