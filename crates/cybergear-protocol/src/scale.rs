//! 物理量与定点线性量化表
//!
//! 固件内部把每个物理量线性映射到一个定宽无符号整数上，两端饱和。
//! 这里的量化区间是协议常量，必须与电机固件完全一致——不一致不会报错，
//! 只会让运动指令悄悄走偏。

use std::f64::consts::PI;

/// 单个物理量的量化区间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRange {
    /// 物理量下限
    pub min: f64,
    /// 物理量上限
    pub max: f64,
    /// 线上整数位宽
    pub bits: u32,
}

/// 位置（rad）
pub const POSITION: ScaleRange = ScaleRange::new(-4.0 * PI, 4.0 * PI, 16);
/// 速度（rad/s）
pub const VELOCITY: ScaleRange = ScaleRange::new(-30.0, 30.0, 16);
/// 力矩（Nm）
pub const TORQUE: ScaleRange = ScaleRange::new(-12.0, 12.0, 16);
/// 刚度系数 kp
pub const KP: ScaleRange = ScaleRange::new(0.0, 500.0, 16);
/// 阻尼系数 kd
pub const KD: ScaleRange = ScaleRange::new(0.0, 5.0, 16);
/// 相电流（A）
pub const CURRENT: ScaleRange = ScaleRange::new(-27.0, 27.0, 16);
/// 母线电压（V），0.1V 分辨率
pub const VOLTAGE: ScaleRange = ScaleRange::new(0.0, 6553.5, 16);
/// 绕组温度（°C），0.1°C 分辨率
pub const TEMPERATURE: ScaleRange = ScaleRange::new(0.0, 6553.5, 16);

impl ScaleRange {
    pub const fn new(min: f64, max: f64, bits: u32) -> Self {
        Self { min, max, bits }
    }

    /// 线上最大整数值 `2^bits - 1`
    pub fn raw_max(&self) -> u32 {
        (((1u64) << self.bits) - 1) as u32
    }

    /// 一个量化步长 `(max - min) / (2^bits - 1)`
    pub fn step(&self) -> f64 {
        (self.max - self.min) / self.raw_max() as f64
    }

    /// 物理量 → 线上整数
    ///
    /// 越界值饱和到区间端点（与固件行为一致，不是错误），
    /// 区间内按就近取整映射到 `[0, 2^bits - 1]`。
    pub fn to_wire(&self, value: f64) -> u32 {
        let clamped = value.clamp(self.min, self.max);
        let scaled = (clamped - self.min) * self.raw_max() as f64 / (self.max - self.min);
        scaled.round() as u32
    }

    /// 线上整数 → 物理量
    ///
    /// 精确的逆线性映射；`raw` 已被位宽约束，无需再饱和。
    pub fn from_wire(&self, raw: u32) -> f64 {
        (self.max - self.min) * raw as f64 / self.raw_max() as f64 + self.min
    }
}
