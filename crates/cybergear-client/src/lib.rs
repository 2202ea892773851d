//! # CyberGear Client
//!
//! 电机会话管理与同步指令收发。
//!
//! 分层：
//!
//! - [`session`]: 每电机状态机（使能/模式/故障），约束指令顺序
//! - [`dispatcher`]: 同步请求-应答循环（编码 → 写 → 读到匹配应答 → 更新会话）
//! - [`client`]: 面向调用方的高层 API（[`CyberGear`]）
//! - [`config`]: 串口/适配器/主机 ID 配置（TOML）
//!
//! 总线是严格的请求-应答模型，一条通道同一时刻只允许一条在途指令；
//! [`dispatcher::Dispatcher`] 对适配器持互斥访问，多线程调用自动串行化。

pub mod client;
pub mod config;
pub mod dispatcher;
mod error;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::CyberGear;
pub use config::{ClientConfig, ConfigError};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::ClientError;
pub use session::{MotorSession, MotorState, SessionState};

// 常用类型转出，调用方不必直接依赖底层 crate
pub use cybergear_can::{AdapterModel, CanAdapter, CanError};
pub use cybergear_protocol::{Command, MotionCommand, MotorFeedback, MotorId, RunMode};
