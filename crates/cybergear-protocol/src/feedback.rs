//! 反馈帧解析（电机 → 主机）
//!
//! 包含状态反馈、参数应答、MCU 标识应答和故障上报帧的结构体，
//! 提供从 `CgFrame` 解析的方法和（测试/总线工具用的）反向编码。
//!
//! 反馈帧的 ID 布局与指令帧不同：bit 15..8 是应答电机的 ID，
//! bit 7..0 是被回显的主机 ID；状态反馈帧的 bit 23..16 还携带
//! 故障位（bit 16..21）与运行状态（bit 22..23）。

use crate::command::{CommandKind, MotionCommand, pack_id, split_id};
use crate::{CgFrame, ProtocolError, scale, u16_to_bytes_be};
use bilge::prelude::*;
use num_enum::TryFromPrimitive;

// ============================================================================
// 状态位域
// ============================================================================

/// 运行状态（状态字节 bit 6..7）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RunState {
    /// Reset 模式（未使能）
    Reset = 0,
    /// 标定模式
    Calibration = 1,
    /// 运行模式
    Run = 2,
}

/// 状态反馈帧的状态字节（ID bit 23..16）
///
/// Bit 0..5 为故障位，Bit 6..7 为运行状态。位序 LSB first，
/// 与 bilge 默认一致。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct StatusBits {
    /// Bit 0: 欠压故障
    pub undervoltage: bool,
    /// Bit 1: 过流故障
    pub overcurrent: bool,
    /// Bit 2: 过温故障
    pub over_temperature: bool,
    /// Bit 3: 磁编码故障
    pub encoder_fault: bool,
    /// Bit 4: HALL 编码故障
    pub hall_fault: bool,
    /// Bit 5: 未标定
    pub uncalibrated: bool,
    /// Bit 6..7: 运行状态
    pub mode_bits: u2,
}

impl StatusBits {
    /// 从原始状态字节构建
    pub fn from_byte(byte: u8) -> Self {
        Self::from(u8::new(byte))
    }

    /// 原始状态字节
    pub fn to_byte(&self) -> u8 {
        u8::from(*self).value()
    }

    /// 是否有任一故障位置位
    pub fn has_fault(&self) -> bool {
        (self.to_byte() & 0x3F) != 0
    }

    /// 解析运行状态；保留值 3 视为非法
    pub fn run_state(&self) -> Result<RunState, ProtocolError> {
        let value = self.mode_bits().value();
        RunState::try_from(value).map_err(|_| ProtocolError::InvalidValue {
            field: "RunState".to_string(),
            value,
        })
    }
}

// ============================================================================
// 状态反馈帧
// ============================================================================

/// 电机状态反馈（命令码 2）
///
/// 载荷为 4 个大端 u16：位置、速度、力矩各自按量化表还原，
/// 温度为 0.1°C 分辨率。
#[derive(Debug, Clone, Copy)]
pub struct MotorFeedback {
    /// 应答电机 ID
    pub motor_id: u8,
    /// 被回显的主机 ID
    pub host_id: u8,
    /// 位置（rad）
    pub position: f64,
    /// 速度（rad/s）
    pub velocity: f64,
    /// 力矩（Nm）
    pub torque: f64,
    /// 绕组温度（°C）
    pub temperature: f64,
    /// 故障位与运行状态
    pub status: StatusBits,
}

impl MotorFeedback {
    pub fn has_fault(&self) -> bool {
        self.status.has_fault()
    }

    /// 编码回 CAN 帧（测试与总线工具使用）
    pub fn to_frame(&self) -> CgFrame {
        let data2 = ((u8::from(self.status).value() as u16) << 8) | self.motor_id as u16;
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&u16_to_bytes_be(scale::POSITION.to_wire(self.position) as u16));
        data[2..4].copy_from_slice(&u16_to_bytes_be(scale::VELOCITY.to_wire(self.velocity) as u16));
        data[4..6].copy_from_slice(&u16_to_bytes_be(scale::TORQUE.to_wire(self.torque) as u16));
        data[6..8].copy_from_slice(&u16_to_bytes_be(
            scale::TEMPERATURE.to_wire(self.temperature) as u16,
        ));

        CgFrame::new(pack_id(CommandKind::Feedback, data2, self.host_id), &data)
    }
}

impl TryFrom<&CgFrame> for MotorFeedback {
    type Error = ProtocolError;

    fn try_from(frame: &CgFrame) -> Result<Self, Self::Error> {
        let (code, data2, target) = split_id(frame.id);
        if code != CommandKind::Feedback as u8 {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        check_len(frame)?;

        let d = &frame.data;
        Ok(Self {
            motor_id: (data2 & 0xFF) as u8,
            host_id: target,
            position: scale::POSITION.from_wire(u16::from_be_bytes([d[0], d[1]]) as u32),
            velocity: scale::VELOCITY.from_wire(u16::from_be_bytes([d[2], d[3]]) as u32),
            torque: scale::TORQUE.from_wire(u16::from_be_bytes([d[4], d[5]]) as u32),
            temperature: scale::TEMPERATURE.from_wire(u16::from_be_bytes([d[6], d[7]]) as u32),
            status: StatusBits::from(u8::new((data2 >> 8) as u8)),
        })
    }
}

// ============================================================================
// 参数应答帧
// ============================================================================

/// `ReadParam` 的应答（命令码 17）
///
/// 值的类型由参数表决定，这里保留原始 4 字节，由调用方解释。
#[derive(Debug, Clone, Copy)]
pub struct ParamReadReply {
    pub motor_id: u8,
    pub host_id: u8,
    /// 参数索引（载荷字节 0-1 小端）
    pub index: u16,
    /// 原始值（载荷字节 4-7）
    pub raw: [u8; 4],
}

impl ParamReadReply {
    pub fn as_f32(&self) -> f32 {
        f32::from_le_bytes(self.raw)
    }

    pub fn as_u8(&self) -> u8 {
        self.raw[0]
    }
}

impl TryFrom<&CgFrame> for ParamReadReply {
    type Error = ProtocolError;

    fn try_from(frame: &CgFrame) -> Result<Self, Self::Error> {
        let (code, data2, target) = split_id(frame.id);
        if code != CommandKind::ReadParam as u8 {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        check_len(frame)?;

        Ok(Self {
            motor_id: (data2 & 0xFF) as u8,
            host_id: target,
            index: u16::from_le_bytes([frame.data[0], frame.data[1]]),
            raw: [frame.data[4], frame.data[5], frame.data[6], frame.data[7]],
        })
    }
}

// ============================================================================
// MCU 标识应答帧
// ============================================================================

/// `RequestDeviceId` 的应答（命令码 0），载荷为 8 字节 MCU 唯一标识
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdReply {
    pub motor_id: u8,
    pub host_id: u8,
    pub mcu_id: [u8; 8],
}

impl TryFrom<&CgFrame> for DeviceIdReply {
    type Error = ProtocolError;

    fn try_from(frame: &CgFrame) -> Result<Self, Self::Error> {
        let (code, data2, target) = split_id(frame.id);
        if code != CommandKind::DeviceId as u8 {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        check_len(frame)?;

        Ok(Self {
            motor_id: (data2 & 0xFF) as u8,
            host_id: target,
            mcu_id: frame.data,
        })
    }
}

// ============================================================================
// 故障上报帧
// ============================================================================

/// 故障上报帧载荷字节 0 的位域
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct FaultStatus {
    /// Bit 0: 电机过温故障（默认 80°C）
    pub over_temperature: bool,
    /// Bit 1: 驱动芯片故障
    pub drive_chip: bool,
    /// Bit 2: 欠压故障
    pub undervoltage: bool,
    /// Bit 3: 过压故障
    pub overvoltage: bool,
    /// Bit 4: B 相电流采样过流
    pub phase_b_overcurrent: bool,
    /// Bit 5: C 相电流采样过流
    pub phase_c_overcurrent: bool,
    /// Bit 6: 保留
    pub reserved: u1,
    /// Bit 7: 编码器未标定
    pub encoder_uncalibrated: bool,
}

/// 电机主动上报的故障帧（命令码 21）
#[derive(Debug, Clone, Copy)]
pub struct FaultReport {
    pub motor_id: u8,
    pub host_id: u8,
    /// 载荷字节 0 位域
    pub status: FaultStatus,
    /// 载荷字节 1：过载故障计数，非 0 即过载
    pub overload: u8,
    /// 载荷字节 2 bit 0：A 相电流采样过流
    pub phase_a_overcurrent: bool,
    /// 载荷字节 4 bit 0：过温预警（默认 75°C）
    pub over_temperature_warning: bool,
}

impl FaultReport {
    /// 是否存在需要清除的故障（预警不算）
    pub fn is_fault(&self) -> bool {
        u8::from(self.status).value() != 0 || self.overload != 0 || self.phase_a_overcurrent
    }
}

impl TryFrom<&CgFrame> for FaultReport {
    type Error = ProtocolError;

    fn try_from(frame: &CgFrame) -> Result<Self, Self::Error> {
        let (code, data2, target) = split_id(frame.id);
        if code != CommandKind::FaultReport as u8 {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        check_len(frame)?;

        Ok(Self {
            motor_id: (data2 & 0xFF) as u8,
            host_id: target,
            status: FaultStatus::from(u8::new(frame.data[0])),
            overload: frame.data[1],
            phase_a_overcurrent: frame.data[2] & 0x01 != 0,
            over_temperature_warning: frame.data[4] & 0x01 != 0,
        })
    }
}

// ============================================================================
// 入站帧分发
// ============================================================================

/// 一帧解析后的结构化视图
///
/// 电机发出的命令码解析为具名应答；主机发出的命令码（总线监听、
/// 回环测试时会见到）解析为 [`Inbound::Motion`] 或通用的
/// [`Inbound::Request`] 视图。
#[derive(Debug, Clone, Copy)]
pub enum Inbound {
    /// 状态反馈
    Feedback(MotorFeedback),
    /// 参数应答
    ParamValue(ParamReadReply),
    /// MCU 标识应答
    DeviceId(DeviceIdReply),
    /// 故障上报
    Fault(FaultReport),
    /// 运控指令（主机发出）
    Motion { motor_id: u8, command: MotionCommand },
    /// 其余主机指令的通用视图
    Request {
        kind: CommandKind,
        motor_id: u8,
        host_id: u8,
        data: [u8; 8],
    },
}

impl Inbound {
    /// 解析一帧
    ///
    /// 未知命令码或载荷长度不为 8 的帧解析失败，该帧被丢弃，
    /// 不影响后续帧。
    pub fn parse(frame: &CgFrame) -> Result<Self, ProtocolError> {
        check_len(frame)?;
        let (code, data2, target) = split_id(frame.id);
        let kind =
            CommandKind::try_from(code).map_err(|_| ProtocolError::UnknownCommand { code })?;

        Ok(match kind {
            CommandKind::Feedback => Inbound::Feedback(MotorFeedback::try_from(frame)?),
            CommandKind::ReadParam => Inbound::ParamValue(ParamReadReply::try_from(frame)?),
            CommandKind::DeviceId => Inbound::DeviceId(DeviceIdReply::try_from(frame)?),
            CommandKind::FaultReport => Inbound::Fault(FaultReport::try_from(frame)?),
            CommandKind::MotionControl => {
                let (motor_id, command) = MotionCommand::from_frame(frame)?;
                Inbound::Motion { motor_id, command }
            }
            CommandKind::Enable
            | CommandKind::Stop
            | CommandKind::SetMechanicalZero
            | CommandKind::SetMotorId
            | CommandKind::RestoreConfig
            | CommandKind::WriteParam => Inbound::Request {
                kind,
                motor_id: target,
                host_id: (data2 & 0xFF) as u8,
                data: frame.data,
            },
        })
    }
}

fn check_len(frame: &CgFrame) -> Result<(), ProtocolError> {
    if frame.len != 8 {
        return Err(ProtocolError::InvalidLength {
            expected: 8,
            actual: frame.len as usize,
        });
    }
    Ok(())
}
