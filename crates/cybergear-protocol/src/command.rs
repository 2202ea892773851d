//! 控制帧构建（主机 → 电机）
//!
//! 每条指令的 ID 布局与载荷布局都是固件常量。注意两个固件特例：
//!
//! - 运控帧的力矩量化值放在 **ID 的 bit 23..8**，不在载荷里；
//! - `ClearFault` 与 `Stop` 共用命令码 4，靠载荷字节 0 区分。

use crate::param::{ParamValue, RunMode};
use crate::{CgFrame, ProtocolError, scale, u16_to_bytes_be};
use num_enum::TryFromPrimitive;

/// 命令类型码（扩展帧 ID bit 28..24）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandKind {
    /// 设备 MCU 唯一标识查询/应答
    DeviceId = 0,
    /// 运控（阻抗）指令
    MotionControl = 1,
    /// 状态反馈帧（主机发出时为状态查询）
    Feedback = 2,
    /// 电机使能
    Enable = 3,
    /// 电机停止（载荷字节 0 为 1 时表示清除故障）
    Stop = 4,
    /// 设置机械零位
    SetMechanicalZero = 6,
    /// 修改电机 CAN ID
    SetMotorId = 7,
    /// 恢复出厂设置
    RestoreConfig = 8,
    /// 读取属性参数
    ReadParam = 17,
    /// 写入属性参数
    WriteParam = 18,
    /// 故障上报帧（电机发出）
    FaultReport = 21,
}

/// 电机总线地址，有效区间 [1, 127]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MotorId(u8);

impl MotorId {
    pub fn new(id: u8) -> Result<Self, ProtocolError> {
        if (1..=127).contains(&id) {
            Ok(Self(id))
        } else {
            Err(ProtocolError::InvalidMotorId { id })
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for MotorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 打包 29-bit 扩展帧 ID
pub fn pack_id(kind: CommandKind, data2: u16, target: u8) -> u32 {
    ((kind as u32) << 24) | ((data2 as u32) << 8) | target as u32
}

/// 拆解 29-bit 扩展帧 ID 为（命令码，数据区，目标地址）
pub fn split_id(id: u32) -> (u8, u16, u8) {
    (
        ((id >> 24) & 0x1F) as u8,
        ((id >> 8) & 0xFFFF) as u16,
        (id & 0xFF) as u8,
    )
}

/// 运控（阻抗）指令
///
/// 位置/速度/kp/kd 量化后大端打包进载荷，
/// 前馈力矩量化后放进帧 ID 的数据区。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    /// 目标位置（rad）
    pub position: f64,
    /// 目标速度（rad/s）
    pub velocity: f64,
    /// 前馈力矩（Nm）
    pub torque: f64,
    /// 刚度系数
    pub kp: f64,
    /// 阻尼系数
    pub kd: f64,
}

impl MotionCommand {
    /// 转换为 CAN 帧
    pub fn to_frame(&self, motor_id: MotorId) -> CgFrame {
        let torque_raw = scale::TORQUE.to_wire(self.torque) as u16;
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&u16_to_bytes_be(scale::POSITION.to_wire(self.position) as u16));
        data[2..4].copy_from_slice(&u16_to_bytes_be(scale::VELOCITY.to_wire(self.velocity) as u16));
        data[4..6].copy_from_slice(&u16_to_bytes_be(scale::KP.to_wire(self.kp) as u16));
        data[6..8].copy_from_slice(&u16_to_bytes_be(scale::KD.to_wire(self.kd) as u16));

        CgFrame::new(
            pack_id(CommandKind::MotionControl, torque_raw, motor_id.get()),
            &data,
        )
    }

    /// 从运控帧还原物理量（总线监听、回环测试用）
    pub fn from_frame(frame: &CgFrame) -> Result<(u8, Self), ProtocolError> {
        if frame.len != 8 {
            return Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: frame.len as usize,
            });
        }
        let (_, torque_raw, motor_id) = split_id(frame.id);
        let d = &frame.data;
        Ok((
            motor_id,
            Self {
                position: scale::POSITION.from_wire(u16::from_be_bytes([d[0], d[1]]) as u32),
                velocity: scale::VELOCITY.from_wire(u16::from_be_bytes([d[2], d[3]]) as u32),
                torque: scale::TORQUE.from_wire(torque_raw as u32),
                kp: scale::KP.from_wire(u16::from_be_bytes([d[4], d[5]]) as u32),
                kd: scale::KD.from_wire(u16::from_be_bytes([d[6], d[7]]) as u32),
            },
        ))
    }
}

/// 主机可发出的全部指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// 运控（阻抗）指令
    Motion(MotionCommand),
    /// 使能
    Enable,
    /// 停止
    Stop,
    /// 清除故障（Stop 码 + 载荷字节 0 = 1）
    ClearFault,
    /// 设置机械零位
    SetMechanicalZero,
    /// 修改电机 CAN ID
    SetMotorId { new_id: MotorId },
    /// 恢复出厂设置
    RestoreConfig,
    /// 状态查询
    RequestStatus,
    /// MCU 唯一标识查询
    RequestDeviceId,
    /// 读取属性参数
    ReadParam { index: u16 },
    /// 写入属性参数
    WriteParam { index: u16, value: ParamValue },
}

impl Command {
    /// 写入 `RUN_MODE` 的便捷构造
    pub fn set_mode(mode: RunMode) -> Self {
        Command::WriteParam {
            index: crate::param::RUN_MODE,
            value: ParamValue::U8(mode as u8),
        }
    }

    /// 对应的线上命令码
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Motion(_) => CommandKind::MotionControl,
            Command::Enable => CommandKind::Enable,
            Command::Stop | Command::ClearFault => CommandKind::Stop,
            Command::SetMechanicalZero => CommandKind::SetMechanicalZero,
            Command::SetMotorId { .. } => CommandKind::SetMotorId,
            Command::RestoreConfig => CommandKind::RestoreConfig,
            Command::RequestStatus => CommandKind::Feedback,
            Command::RequestDeviceId => CommandKind::DeviceId,
            Command::ReadParam { .. } => CommandKind::ReadParam,
            Command::WriteParam { .. } => CommandKind::WriteParam,
        }
    }

    /// 编码为 CAN 帧
    ///
    /// 载荷恒为 8 字节，逻辑字段之外零填充。
    pub fn to_frame(&self, motor_id: MotorId, host_id: u8) -> CgFrame {
        let host = host_id as u16;
        let mut data = [0u8; 8];
        let id = match self {
            Command::Motion(motion) => return motion.to_frame(motor_id),

            Command::Enable => pack_id(CommandKind::Enable, host, motor_id.get()),

            Command::Stop => pack_id(CommandKind::Stop, host, motor_id.get()),

            Command::ClearFault => {
                data[0] = 0x01;
                pack_id(CommandKind::Stop, host, motor_id.get())
            }

            Command::SetMechanicalZero => {
                data[0] = 0x01;
                pack_id(CommandKind::SetMechanicalZero, host, motor_id.get())
            }

            Command::SetMotorId { new_id } => {
                data[0] = new_id.get();
                pack_id(CommandKind::SetMotorId, host, motor_id.get())
            }

            // 恢复出厂：数据区高字节固定 0x03（固件子操作码）
            Command::RestoreConfig => {
                pack_id(CommandKind::RestoreConfig, 0x0300 | host, motor_id.get())
            }

            Command::RequestStatus => pack_id(CommandKind::Feedback, host, motor_id.get()),

            Command::RequestDeviceId => pack_id(CommandKind::DeviceId, host, motor_id.get()),

            Command::ReadParam { index } => {
                data[0..2].copy_from_slice(&index.to_le_bytes());
                pack_id(CommandKind::ReadParam, host, motor_id.get())
            }

            Command::WriteParam { index, value } => {
                data[0..2].copy_from_slice(&index.to_le_bytes());
                data[4..8].copy_from_slice(&value.encode());
                pack_id(CommandKind::WriteParam, host, motor_id.get())
            }
        };

        CgFrame::new(id, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param;

    fn motor(id: u8) -> MotorId {
        MotorId::new(id).unwrap()
    }

    #[test]
    fn test_motor_id_range() {
        assert!(MotorId::new(0).is_err());
        assert!(MotorId::new(128).is_err());
        assert_eq!(MotorId::new(1).unwrap().get(), 1);
        assert_eq!(MotorId::new(127).unwrap().get(), 127);
    }

    #[test]
    fn test_pack_split_id() {
        let id = pack_id(CommandKind::Enable, 0x00FD, 0x7F);
        assert_eq!(id, 0x0300_FD7F);
        assert_eq!(split_id(id), (3, 0x00FD, 0x7F));
    }

    /// 回归基准：电机 1，pos=1.57 rad，vel=2.0 rad/s，力矩/增益为 0。
    /// 期望字节由量化公式手工算出，任何打包改动都会在这里暴露。
    #[test]
    fn test_motion_frame_golden_bytes() {
        let cmd = MotionCommand {
            position: 1.57,
            velocity: 2.0,
            torque: 0.0,
            kp: 0.0,
            kd: 0.0,
        };
        let frame = cmd.to_frame(motor(1));

        // 力矩 0 → 0x8000，进 ID 数据区
        assert_eq!(frame.id, 0x0180_0001);
        assert_eq!(
            frame.data,
            [0x8F, 0xFD, 0x88, 0x88, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(frame.len, 8);
    }

    #[test]
    fn test_motion_frame_full_golden_bytes() {
        let cmd = MotionCommand {
            position: 1.0,
            velocity: 0.5,
            torque: 1.5,
            kp: 10.0,
            kd: 0.5,
        };
        let frame = cmd.to_frame(motor(5));

        // tff 1.5 Nm → 0x8FFF
        assert_eq!(frame.id, 0x018F_FF05);
        assert_eq!(
            frame.data,
            [0x8A, 0x2F, 0x82, 0x22, 0x05, 0x1F, 0x19, 0x9A]
        );
    }

    #[test]
    fn test_motion_frame_roundtrip() {
        let cmd = MotionCommand {
            position: -2.5,
            velocity: 12.0,
            torque: -3.3,
            kp: 77.0,
            kd: 1.25,
        };
        let frame = cmd.to_frame(motor(9));
        let (id, back) = MotionCommand::from_frame(&frame).unwrap();

        assert_eq!(id, 9);
        assert!((back.position - cmd.position).abs() <= crate::scale::POSITION.step());
        assert!((back.velocity - cmd.velocity).abs() <= crate::scale::VELOCITY.step());
        assert!((back.torque - cmd.torque).abs() <= crate::scale::TORQUE.step());
        assert!((back.kp - cmd.kp).abs() <= crate::scale::KP.step());
        assert!((back.kd - cmd.kd).abs() <= crate::scale::KD.step());
    }

    #[test]
    fn test_enable_stop_frames() {
        let enable = Command::Enable.to_frame(motor(3), 0xFD);
        assert_eq!(split_id(enable.id), (3, 0x00FD, 3));
        assert_eq!(enable.data, [0; 8]);

        let stop = Command::Stop.to_frame(motor(3), 0);
        assert_eq!(split_id(stop.id), (4, 0, 3));
        assert_eq!(stop.data, [0; 8]);
    }

    #[test]
    fn test_clear_fault_shares_stop_code() {
        let frame = Command::ClearFault.to_frame(motor(3), 0);
        assert_eq!(split_id(frame.id).0, CommandKind::Stop as u8);
        assert_eq!(frame.data[0], 0x01);
    }

    #[test]
    fn test_set_zero_frame() {
        let frame = Command::SetMechanicalZero.to_frame(motor(2), 0);
        assert_eq!(split_id(frame.id), (6, 0, 2));
        assert_eq!(frame.data[0], 0x01);
    }

    #[test]
    fn test_set_motor_id_frame() {
        let frame = Command::SetMotorId { new_id: motor(9) }.to_frame(motor(127), 0);
        assert_eq!(split_id(frame.id), (7, 0, 127));
        assert_eq!(frame.data[0], 9);
    }

    #[test]
    fn test_restore_config_frame() {
        let frame = Command::RestoreConfig.to_frame(motor(4), 0xAB);
        assert_eq!(split_id(frame.id), (8, 0x03AB, 4));
        assert_eq!(frame.data, [0; 8]);
    }

    #[test]
    fn test_write_param_float_layout() {
        let frame = Command::WriteParam {
            index: param::SPD_REF,
            value: ParamValue::F32(2.0),
        }
        .to_frame(motor(1), 0);

        assert_eq!(split_id(frame.id), (18, 0, 1));
        // 索引小端
        assert_eq!(frame.data[0..2], [0x0A, 0x70]);
        // f32 2.0 小端
        assert_eq!(frame.data[4..8], [0x00, 0x00, 0x00, 0x40]);
    }

    #[test]
    fn test_set_mode_is_run_mode_write() {
        let frame = Command::set_mode(RunMode::Speed).to_frame(motor(1), 0);
        assert_eq!(split_id(frame.id).0, CommandKind::WriteParam as u8);
        assert_eq!(frame.data[0..2], [0x05, 0x70]);
        assert_eq!(frame.data[4], 2);
    }

    #[test]
    fn test_read_param_frame() {
        let frame = Command::ReadParam { index: param::VBUS }.to_frame(motor(6), 0xFD);
        assert_eq!(split_id(frame.id), (17, 0x00FD, 6));
        assert_eq!(frame.data[0..2], [0x2B, 0x30]);
        assert_eq!(frame.data[2..], [0; 6]);
    }

    #[test]
    fn test_every_command_pads_payload_to_8_bytes() {
        let commands = [
            Command::Enable,
            Command::Stop,
            Command::ClearFault,
            Command::SetMechanicalZero,
            Command::SetMotorId { new_id: motor(2) },
            Command::RestoreConfig,
            Command::RequestStatus,
            Command::RequestDeviceId,
            Command::ReadParam { index: param::VBUS },
            Command::WriteParam {
                index: param::LOC_REF,
                value: ParamValue::F32(0.5),
            },
            Command::Motion(MotionCommand {
                position: 0.0,
                velocity: 0.0,
                torque: 0.0,
                kp: 0.0,
                kd: 0.0,
            }),
        ];
        for cmd in commands {
            assert_eq!(cmd.to_frame(motor(1), 0).len, 8, "{cmd:?}");
        }
    }

    #[test]
    fn test_request_frames_have_empty_payload() {
        let status = Command::RequestStatus.to_frame(motor(1), 0xFD);
        assert_eq!(split_id(status.id), (2, 0x00FD, 1));
        assert_eq!(status.data, [0; 8]);

        let dev = Command::RequestDeviceId.to_frame(motor(1), 0xFD);
        assert_eq!(split_id(dev.id), (0, 0x00FD, 1));
        assert_eq!(dev.data, [0; 8]);
    }
}
