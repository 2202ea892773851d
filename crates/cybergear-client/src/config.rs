//! 客户端配置
//!
//! 配置面只有四个硬件相关项（串口、波特率、适配器型号、主机 ID）
//! 加上请求-应答的时序参数，支持从 TOML 文件加载。

use cybergear_can::AdapterModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 客户端配置
///
/// 适配器型号是封闭枚举，未知取值在反序列化阶段即被拒绝。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 串口设备，如 `/dev/ttyUSB0` 或 `COM3`
    pub port: String,

    /// 波特率
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// 适配器型号（`dr` / `yourcee`）
    pub adapter: AdapterModel,

    /// 主机 ID，会被电机在反馈帧中回显
    #[serde(default)]
    pub host_id: u8,

    /// 单次等待应答的超时（毫秒）
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// 超时后的整轮重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_reply_timeout_ms() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    2
}

impl ClientConfig {
    /// 以默认时序参数创建配置
    pub fn new(port: impl Into<String>, adapter: AdapterModel) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            adapter,
            host_id: 0,
            reply_timeout_ms: default_reply_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }

    /// 单次等待应答的超时
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// 从 TOML 文件加载
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
