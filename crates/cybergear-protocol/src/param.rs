//! 参数表（属性索引与值编码）
//!
//! 电机的可读写属性通过 `ReadParam`/`WriteParam` 帧访问，
//! 索引与类型由固件定义。索引在载荷字节 0-1 小端存放，
//! 值在字节 4-7（f32 小端，u8 占字节 4）。

use crate::ProtocolError;
use num_enum::TryFromPrimitive;

/// 运行模式（u8），写入 `RUN_MODE` 生效
pub const RUN_MODE: u16 = 0x7005;
/// 力矩模式电流指令（f32，A）
pub const IQ_REF: u16 = 0x7006;
/// 速度模式转速指令（f32，rad/s）
pub const SPD_REF: u16 = 0x700A;
/// 位置模式角度指令（f32，rad）
pub const LOC_REF: u16 = 0x7016;
/// 位置模式速度限制（f32，rad/s）
pub const LIMIT_SPD: u16 = 0x7017;
/// 速度/位置模式电流限制（f32，A）
pub const LIMIT_CUR: u16 = 0x7018;
/// 母线电压（f32，V，只读）
pub const VBUS: u16 = 0x302B;
/// 滤波后 iq 电流（f32，A，只读）
pub const IQ_FILTER: u16 = 0x301E;

/// 控制模式（`RUN_MODE` 的取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RunMode {
    /// 运控（阻抗）模式：位置/速度 + kp/kd + 前馈力矩
    Impedance = 0,
    /// 位置模式
    Position = 1,
    /// 速度模式
    Speed = 2,
    /// 力矩（电流）模式
    Torque = 3,
}

/// 参数值的线上编码
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    U8(u8),
    F32(f32),
}

impl ParamValue {
    /// 编码到载荷字节 4-7
    pub fn encode(&self) -> [u8; 4] {
        match self {
            ParamValue::U8(v) => [*v, 0, 0, 0],
            ParamValue::F32(v) => v.to_le_bytes(),
        }
    }

    pub fn as_f32(&self) -> f32 {
        match self {
            ParamValue::U8(v) => *v as f32,
            ParamValue::F32(v) => *v,
        }
    }
}

impl RunMode {
    pub fn from_wire(value: u8) -> Result<Self, ProtocolError> {
        Self::try_from(value).map_err(|_| ProtocolError::InvalidValue {
            field: "RunMode".to_string(),
            value,
        })
    }
}
