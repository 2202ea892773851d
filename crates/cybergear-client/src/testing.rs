//! 测试用模拟电机
//!
//! 实现 [`CanAdapter`]，在 `send` 时解析指令并把合适的应答帧排进
//! 接收队列，行为贴近真实电机：按 ID 应答、回显主机 ID、
//! 清故障后不再置故障位。

use cybergear_can::{CanAdapter, CanError};
use cybergear_protocol::command::{CommandKind, pack_id, split_id};
use cybergear_protocol::{CgFrame, MotorFeedback, StatusBits};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub struct MockMotor {
    pub motor_id: u8,
    pub host_id: u8,
    /// 不应答任何指令（超时测试）
    pub silent: bool,
    /// `send` 直接报 IO 错误（设备拔出测试）
    pub fail_sends: bool,
    /// 以故障上报帧应答
    pub reply_with_fault_report: bool,
    pub mcu_id: [u8; 8],
    /// 电机收到的全部帧
    pub writes: Vec<CgFrame>,

    status_byte: u8,
    position: f64,
    velocity: f64,
    torque: f64,
    temperature: f64,
    params: HashMap<u16, [u8; 4]>,
    interleave: Vec<u8>,
    rx: VecDeque<CgFrame>,
}

impl MockMotor {
    pub fn new(motor_id: u8, host_id: u8) -> Self {
        Self {
            motor_id,
            host_id,
            silent: false,
            fail_sends: false,
            reply_with_fault_report: false,
            mcu_id: [0; 8],
            writes: Vec::new(),
            status_byte: 0x80, // Run 状态，无故障
            position: 0.5,
            velocity: 0.0,
            torque: 0.0,
            temperature: 30.0,
            params: HashMap::new(),
            interleave: Vec::new(),
            rx: VecDeque::new(),
        }
    }

    /// 覆写状态字节（bit 0..5 故障位，bit 6..7 运行状态）
    pub fn set_status(&mut self, byte: u8) {
        self.status_byte = byte;
    }

    pub fn set_param_f32(&mut self, index: u16, value: f32) {
        self.params.insert(index, value.to_le_bytes());
    }

    /// 每次应答前先吐出一帧来自其他电机的反馈（测试丢弃逻辑）
    pub fn interleave_feedback_from(&mut self, motor_id: u8) {
        self.interleave.push(motor_id);
    }

    fn feedback_frame(&self, motor_id: u8, host_id: u8, status_byte: u8) -> CgFrame {
        MotorFeedback {
            motor_id,
            host_id,
            position: self.position,
            velocity: self.velocity,
            torque: self.torque,
            temperature: self.temperature,
            status: StatusBits::from_byte(status_byte),
        }
        .to_frame()
    }

    fn fault_report_frame(&self, host_id: u8) -> CgFrame {
        let mut data = [0u8; 8];
        data[0] = 0b0000_0100; // 欠压故障
        CgFrame::new(
            pack_id(CommandKind::FaultReport, self.motor_id as u16, host_id),
            &data,
        )
    }
}

impl CanAdapter for MockMotor {
    fn send(&mut self, frame: &CgFrame) -> Result<(), CanError> {
        if self.fail_sends {
            return Err(CanError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "usb adapter unplugged",
            )));
        }
        self.writes.push(*frame);
        if self.silent {
            return Ok(());
        }

        let (code, data2, target) = split_id(frame.id);
        let Ok(kind) = CommandKind::try_from(code) else {
            return Ok(());
        };
        // 运控帧的数据区是力矩，不含主机 ID
        let host = if kind == CommandKind::MotionControl {
            self.host_id
        } else {
            (data2 & 0xFF) as u8
        };
        if target != self.motor_id {
            return Ok(());
        }

        for other in std::mem::take(&mut self.interleave) {
            let extra = self.feedback_frame(other, host, 0x80);
            self.rx.push_back(extra);
        }

        if self.reply_with_fault_report {
            let report = self.fault_report_frame(host);
            self.rx.push_back(report);
            return Ok(());
        }

        let reply = match kind {
            CommandKind::ReadParam => {
                let index = u16::from_le_bytes([frame.data[0], frame.data[1]]);
                let raw = self.params.get(&index).copied().unwrap_or([0; 4]);
                let mut data = [0u8; 8];
                data[0..2].copy_from_slice(&index.to_le_bytes());
                data[4..8].copy_from_slice(&raw);
                CgFrame::new(
                    pack_id(CommandKind::ReadParam, self.motor_id as u16, host),
                    &data,
                )
            }
            CommandKind::DeviceId => CgFrame::new(
                pack_id(CommandKind::DeviceId, self.motor_id as u16, host),
                &self.mcu_id,
            ),
            CommandKind::SetMotorId => {
                self.motor_id = frame.data[0];
                self.feedback_frame(self.motor_id, host, self.status_byte)
            }
            // 清故障：固件清掉故障位
            CommandKind::Stop if frame.data[0] == 0x01 => {
                self.status_byte &= 0xC0;
                self.feedback_frame(self.motor_id, host, self.status_byte)
            }
            _ => self.feedback_frame(self.motor_id, host, self.status_byte),
        };
        self.rx.push_back(reply);
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<CgFrame, CanError> {
        self.rx.pop_front().ok_or(CanError::Timeout)
    }
}
