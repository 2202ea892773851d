//! 客户端层错误类型定义

use crate::session::SessionState;
use cybergear_can::CanError;
use cybergear_protocol::{FaultReport, ProtocolError};
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// CAN 适配层错误（设备 IO 失败不重试，立即上抛）
    #[error("CAN adapter error: {0}")]
    Can(#[from] CanError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 重试预算耗尽仍无匹配应答
    #[error("No reply from motor {motor_id} after {attempts} attempts")]
    Timeout { motor_id: u8, attempts: u32 },

    /// 当前会话状态下不允许该指令（固件要求，不重试）
    #[error("Motor {motor_id} is in state {state:?}, command not allowed")]
    InvalidState { motor_id: u8, state: SessionState },

    /// 查询了本会话从未交互过的电机 ID
    #[error("Motor {motor_id} has never been addressed in this session")]
    UnknownMotorId { motor_id: u8 },

    /// 电机以故障帧应答
    #[error("Motor {motor_id} reported a hardware fault")]
    MotorFault { motor_id: u8, report: FaultReport },

    /// 锁被毒化（线程 panic）
    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,
}
