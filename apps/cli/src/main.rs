//! # CyberGear CLI
//!
//! CyberGear 微电机命令行工具（one-shot 模式）。
//!
//! ```bash
//! # 走配置文件
//! cybergear-cli --config cybergear.toml enable 1
//!
//! # 或者全部走命令行参数
//! cybergear-cli --port /dev/ttyUSB0 --adapter dr velocity 1 2.5
//! cybergear-cli --port /dev/ttyUSB0 --adapter dr status 1
//! ```

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use cybergear_client::{AdapterModel, ClientConfig, CyberGear, MotorId, RunMode};
use std::path::PathBuf;
use std::str::FromStr;

/// CyberGear 微电机命令行工具
#[derive(Parser, Debug)]
#[command(name = "cybergear-cli")]
#[command(about = "Command-line tool for CyberGear micro motor control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// TOML 配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 串口设备（覆盖配置文件）
    #[arg(long, global = true)]
    port: Option<String>,

    /// 波特率（覆盖配置文件）
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// 适配器型号：dr / yourcee（覆盖配置文件）
    #[arg(long, global = true)]
    adapter: Option<String>,

    /// 主机 ID（覆盖配置文件）
    #[arg(long, global = true)]
    host_id: Option<u8>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 电机使能
    Enable { id: u8 },

    /// 停止运行
    Stop { id: u8 },

    /// 切换控制模式：impedance / position / speed / torque
    Mode { id: u8, mode: String },

    /// 运控（阻抗）控制
    Impedance {
        id: u8,
        /// 目标位置（rad）
        position: f64,
        /// 目标速度（rad/s）
        #[arg(default_value_t = 0.0)]
        velocity: f64,
        /// 前馈力矩（Nm）
        #[arg(long, default_value_t = 0.0)]
        torque: f64,
        /// 刚度系数
        #[arg(long, default_value_t = 0.0)]
        kp: f64,
        /// 阻尼系数
        #[arg(long, default_value_t = 0.0)]
        kd: f64,
    },

    /// 位置控制
    Position {
        id: u8,
        /// 目标位置（rad）
        position: f64,
        /// 限速（rad/s）
        #[arg(long, default_value_t = 2.0)]
        limit_speed: f64,
    },

    /// 速度控制
    Velocity {
        id: u8,
        /// 目标速度（rad/s）
        velocity: f64,
    },

    /// 力矩控制
    Torque {
        id: u8,
        /// 目标力矩（Nm）
        torque: f64,
    },

    /// 设置机械零位
    Zero { id: u8 },

    /// 修改电机 CAN ID
    SetId { id: u8, new_id: u8 },

    /// 清除故障
    ClearFault { id: u8 },

    /// 恢复出厂设置（完成后电机 ID 回到 127）
    Restore { id: u8 },

    /// 查询状态反馈（位置/速度/力矩/温度/故障位）
    Status { id: u8 },

    /// 查询母线电压与 iq 电流
    Power { id: u8 },

    /// 查询 MCU 唯一标识
    DeviceId { id: u8 },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cybergear_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli.connection)?;
    let cg = CyberGear::open(&config).context("failed to open adapter")?;

    run_command(&cg, cli.command)
}

/// 配置文件 + 命令行覆盖 → 最终配置
fn resolve_config(args: &ConnectionArgs) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_toml_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let port = args
                .port
                .clone()
                .context("either --config or --port/--adapter is required")?;
            let adapter = args
                .adapter
                .as_deref()
                .context("either --config or --port/--adapter is required")?;
            ClientConfig::new(port, parse_adapter(adapter)?)
        }
    };

    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(adapter) = &args.adapter {
        config.adapter = parse_adapter(adapter)?;
    }
    if let Some(host_id) = args.host_id {
        config.host_id = host_id;
    }
    Ok(config)
}

fn parse_adapter(s: &str) -> Result<AdapterModel> {
    AdapterModel::from_str(s).map_err(|e| anyhow::anyhow!(e))
}

fn parse_mode(s: &str) -> Result<RunMode> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "impedance" => RunMode::Impedance,
        "position" => RunMode::Position,
        "speed" => RunMode::Speed,
        "torque" => RunMode::Torque,
        other => bail!("unknown mode: {other} (expected impedance/position/speed/torque)"),
    })
}

fn motor(id: u8) -> Result<MotorId> {
    MotorId::new(id).map_err(|e| anyhow::anyhow!(e))
}

fn run_command(cg: &CyberGear, command: Commands) -> Result<()> {
    match command {
        Commands::Enable { id } => {
            let feedback = cg.enable(motor(id)?)?;
            println!("motor {id} enabled, position {:.4} rad", feedback.position);
        }
        Commands::Stop { id } => {
            cg.stop(motor(id)?)?;
            println!("motor {id} stopped");
        }
        Commands::Mode { id, mode } => {
            cg.set_mode(motor(id)?, parse_mode(&mode)?)?;
            println!("motor {id} mode set to {mode}");
        }
        Commands::Impedance {
            id,
            position,
            velocity,
            torque,
            kp,
            kd,
        } => {
            let feedback = cg.impedance_control(motor(id)?, position, velocity, torque, kp, kd)?;
            print_feedback(id, &feedback);
        }
        Commands::Position {
            id,
            position,
            limit_speed,
        } => {
            let feedback = cg.set_position(motor(id)?, position, limit_speed)?;
            print_feedback(id, &feedback);
        }
        Commands::Velocity { id, velocity } => {
            let feedback = cg.set_velocity(motor(id)?, velocity)?;
            print_feedback(id, &feedback);
        }
        Commands::Torque { id, torque } => {
            let feedback = cg.set_torque(motor(id)?, torque)?;
            print_feedback(id, &feedback);
        }
        Commands::Zero { id } => {
            cg.set_zero(motor(id)?)?;
            println!("motor {id} mechanical zero set");
        }
        Commands::SetId { id, new_id } => {
            cg.set_id(motor(id)?, motor(new_id)?)?;
            println!("motor {id} re-addressed as {new_id}");
        }
        Commands::ClearFault { id } => {
            cg.clear_fault(motor(id)?)?;
            println!("motor {id} fault cleared");
        }
        Commands::Restore { id } => {
            cg.restore_config(motor(id)?)?;
            println!("motor {id} restored to factory defaults (id resets to 127)");
        }
        Commands::Status { id } => {
            let feedback = cg.request_status(motor(id)?)?;
            print_feedback(id, &feedback);
            if feedback.has_fault() {
                println!("  fault bits: {:?}", feedback.status);
            }
        }
        Commands::Power { id } => {
            let (voltage, current) = cg.read_voltage_current(motor(id)?)?;
            println!("motor {id}: {voltage:.1} V, {current:.2} A");
        }
        Commands::DeviceId { id } => {
            let mcu_id = cg.device_id(motor(id)?)?;
            let hex: Vec<String> = mcu_id.iter().map(|b| format!("{b:02X}")).collect();
            println!("motor {id} MCU id: {}", hex.join(""));
        }
    }
    Ok(())
}

fn print_feedback(id: u8, feedback: &cybergear_client::MotorFeedback) {
    println!(
        "motor {id}: pos {:.4} rad, vel {:.4} rad/s, torque {:.3} Nm, temp {:.1} °C",
        feedback.position, feedback.velocity, feedback.torque, feedback.temperature
    );
}
