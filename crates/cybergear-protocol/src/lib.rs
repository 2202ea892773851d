//! # CyberGear Protocol
//!
//! CyberGear 微电机 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `scale`: 物理量与定点线性量化表
//! - `command`: 控制帧构建（主机 → 电机）
//! - `feedback`: 反馈帧解析（电机 → 主机）
//! - `param`: 参数表（属性索引与值编码）
//!
//! ## 帧格式
//!
//! 协议只使用扩展帧（29-bit ID），布局为：
//!
//! ```text
//! bit 28..24  命令类型（5 bit）
//! bit 23..8   数据区（16 bit）：主机 ID / 力矩量化值 / 故障与模式位
//! bit 7..0    目标地址（电机 ID 或主机 ID，取决于方向）
//! ```
//!
//! 载荷固定 8 字节；量化字段使用 Motorola (MSB) 高位在前（大端字节序），
//! 参数索引与 float 参数值使用小端（固件如此定义）。

pub mod command;
pub mod feedback;
pub mod param;
pub mod scale;

pub use command::{Command, CommandKind, MotionCommand, MotorId};
pub use feedback::{
    DeviceIdReply, FaultReport, Inbound, MotorFeedback, ParamReadReply, RunState, StatusBits,
};
pub use param::{ParamValue, RunMode};
pub use scale::ScaleRange;

use thiserror::Error;

/// 扩展帧 ID 掩码（29 bit）
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// CAN 2.0 扩展帧的统一抽象
///
/// 协议层和适配器层之间的中间类型：协议层通过 `Command::to_frame` /
/// `Inbound::parse` 构建与解析，适配器层负责与各自的串口封包互转。
///
/// - **Copy**：零成本复制，适合高频收发
/// - **固定 8 字节**：未使用部分为 0，`len` 记录有效长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CgFrame {
    /// 扩展帧 ID（29 bit 有效）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,
}

impl CgFrame {
    /// 创建扩展帧（数据自动零填充到 8 字节）
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);

        Self {
            id: id & CAN_EFF_MASK,
            data: fixed,
            len: len as u8,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// 协议解析错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown command code: {code}")]
    UnknownCommand { code: u8 },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Motor id out of range [1,127]: {id}")]
    InvalidMotorId { id: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },
}

/// 字节序转换工具函数
///
/// 量化字段使用 Motorola (MSB) 高位在前（大端字节序）。
///
/// 大端字节序转 u16
pub fn bytes_to_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// u16 转大端字节序
pub fn u16_to_bytes_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_zero_padding() {
        let frame = CgFrame::new(0x0300_0001, &[0xAB, 0xCD]);
        assert_eq!(frame.len, 2);
        assert_eq!(frame.data, [0xAB, 0xCD, 0, 0, 0, 0, 0, 0]);
        assert_eq!(frame.data_slice(), &[0xAB, 0xCD]);
    }

    #[test]
    fn test_frame_id_masked_to_29_bits() {
        // 超出 29 bit 的标志位必须被裁掉
        let frame = CgFrame::new(0xFFFF_FFFF, &[]);
        assert_eq!(frame.id, CAN_EFF_MASK);
    }

    #[test]
    fn test_frame_data_truncated_to_8_bytes() {
        let frame = CgFrame::new(0x1, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_u16_roundtrip() {
        let bytes = u16_to_bytes_be(0x8FFD);
        assert_eq!(bytes, [0x8F, 0xFD]);
        assert_eq!(bytes_to_u16_be(bytes), 0x8FFD);
    }
}
