//! # CyberGear CAN Adapter Layer
//!
//! USB 转 CAN 串口适配器抽象层。
//!
//! 两种适配器硬件走同一个抽象：`CanAdapter` 收发 [`CgFrame`]，
//! 各自的串口封包格式（帧头、长度、校验/结尾字节）由具体实现消化，
//! 损坏的封包在读循环内丢弃重同步，不会上抛给调用方。

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use cybergear_protocol::CgFrame;

pub mod dr;
pub mod yourcee;

pub use dr::DrCanAdapter;
pub use yourcee::YourCeeCanAdapter;

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Read timeout")]
    Timeout,

    #[error("Corrupted adapter frame: {reason}")]
    Checksum { reason: &'static str },

    #[error("Unknown adapter model: {0} (expected \"dr\" or \"yourcee\")")]
    UnknownModel(String),
}

/// USB 转 CAN 适配器的抽象契约
///
/// - `send`：写出一帧；底层 IO 失败即设备错误，立刻上抛。
/// - `receive`：在 `timeout` 内重建一帧；期间遇到损坏的封包丢弃并继续，
///   到期仍无完整帧则返回 [`CanError::Timeout`]。
pub trait CanAdapter {
    fn send(&mut self, frame: &CgFrame) -> Result<(), CanError>;
    fn receive(&mut self, timeout: Duration) -> Result<CgFrame, CanError>;
}

impl<T: CanAdapter + ?Sized> CanAdapter for Box<T> {
    fn send(&mut self, frame: &CgFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }

    fn receive(&mut self, timeout: Duration) -> Result<CgFrame, CanError> {
        (**self).receive(timeout)
    }
}

/// 适配器型号（封闭枚举，配置期选定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AdapterModel {
    /// DR 封包（0xAA 帧头，16 字节）
    Dr,
    /// YourCee 封包（"AT" 帧头 + CRLF 结尾，17 字节）
    YourCee,
}

impl AdapterModel {
    /// 打开串口并构建对应型号的适配器
    pub fn open(
        &self,
        port_name: &str,
        baud_rate: u32,
    ) -> Result<Box<dyn CanAdapter + Send>, CanError> {
        Ok(match self {
            AdapterModel::Dr => Box::new(DrCanAdapter::open(port_name, baud_rate)?),
            AdapterModel::YourCee => Box::new(YourCeeCanAdapter::open(port_name, baud_rate)?),
        })
    }
}

impl FromStr for AdapterModel {
    type Err = CanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("dr") {
            Ok(AdapterModel::Dr)
        } else if s.eq_ignore_ascii_case("yourcee") {
            Ok(AdapterModel::YourCee)
        } else {
            Err(CanError::UnknownModel(s.to_string()))
        }
    }
}

impl std::fmt::Display for AdapterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterModel::Dr => write!(f, "dr"),
            AdapterModel::YourCee => write!(f, "yourcee"),
        }
    }
}

/// 串口默认读超时（毫秒），`receive` 每次会按剩余时间覆盖
pub(crate) const DEFAULT_PORT_TIMEOUT_MS: u64 = 100;
