//! 每电机会话状态机
//!
//! 固件要求模式切换必须在驱动不输出力矩时进行，零位/改 ID/恢复出厂
//! 必须在停止状态下进行；这里把这些顺序约束显式化，非法顺序在发出
//! 指令前就以 [`ClientError::InvalidState`] 拒绝。
//!
//! 状态图：
//!
//! ```text
//! Disabled → Enabled → Active(mode) ⟶ Faulted
//!     ↑_________Stop_________|            |
//!     ↑____________ClearFault_____________|
//! ```
//!
//! 任何携带故障位的反馈帧都会把会话打入 Faulted，只有 ClearFault
//! 能回到 Disabled。

use crate::error::ClientError;
use cybergear_protocol::param::{IQ_REF, LIMIT_CUR, LIMIT_SPD, LOC_REF, RUN_MODE, SPD_REF};
use cybergear_protocol::{Command, MotorFeedback, RunMode};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

/// 会话视角下的电机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 未使能
    Disabled,
    /// 已使能，未进入控制模式
    Enabled,
    /// 已使能并处于某个控制模式
    Active(RunMode),
    /// 故障待清除
    Faulted,
}

/// 单个电机的会话状态
///
/// 首次交互时惰性创建，会话存续期间不会隐式销毁。
#[derive(Debug, Clone)]
pub struct MotorState {
    /// 电机总线 ID
    pub id: u8,
    /// 最近一次选定的控制模式（`None` 为 Idle）
    pub mode: Option<RunMode>,
    /// 使能标志
    pub enabled: bool,
    /// 故障标志，只有 ClearFault 能清除
    pub faulted: bool,
    /// 最近一帧状态反馈
    pub last_feedback: Option<MotorFeedback>,
    /// 最近一次成功交互的时间
    pub last_updated: Option<Instant>,
}

impl MotorState {
    fn new(id: u8) -> Self {
        Self {
            id,
            mode: None,
            enabled: false,
            faulted: false,
            last_feedback: None,
            last_updated: None,
        }
    }

    /// 由标志位推导会话状态
    pub fn state(&self) -> SessionState {
        if self.faulted {
            SessionState::Faulted
        } else if !self.enabled {
            SessionState::Disabled
        } else {
            match self.mode {
                None => SessionState::Enabled,
                Some(mode) => SessionState::Active(mode),
            }
        }
    }
}

/// 全部电机的会话集合
#[derive(Debug, Default)]
pub struct MotorSession {
    states: HashMap<u8, MotorState>,
}

impl MotorSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询某电机的会话状态（从未交互过返回 `None`）
    pub fn get(&self, motor_id: u8) -> Option<&MotorState> {
        self.states.get(&motor_id)
    }

    fn entry(&mut self, motor_id: u8) -> &mut MotorState {
        self.states.entry(motor_id).or_insert_with(|| {
            debug!(motor_id, "creating session state");
            MotorState::new(motor_id)
        })
    }

    /// 指令发出前的顺序检查
    ///
    /// 违反状态机的指令立即失败，不发往总线、不重试。
    pub fn authorize(&mut self, motor_id: u8, command: &Command) -> Result<(), ClientError> {
        let state = self.entry(motor_id).state();
        let allowed = match command {
            // 停止与各类读取随时可发；清故障正是为 Faulted 准备的
            Command::Stop
            | Command::ClearFault
            | Command::RequestStatus
            | Command::RequestDeviceId
            | Command::ReadParam { .. } => true,

            Command::Enable => state != SessionState::Faulted,

            // 运控帧要求已处于运控模式
            Command::Motion(_) => state == SessionState::Active(RunMode::Impedance),

            // 零位/改 ID/恢复出厂要求驱动已停止
            Command::SetMechanicalZero | Command::SetMotorId { .. } | Command::RestoreConfig => {
                state == SessionState::Disabled
            }

            Command::WriteParam { index, .. } => match *index {
                // 模式切换只允许在 Disabled / Enabled 下进行
                RUN_MODE => matches!(state, SessionState::Disabled | SessionState::Enabled),
                LOC_REF => state == SessionState::Active(RunMode::Position),
                SPD_REF => state == SessionState::Active(RunMode::Speed),
                IQ_REF => state == SessionState::Active(RunMode::Torque),
                LIMIT_SPD | LIMIT_CUR => {
                    matches!(state, SessionState::Enabled | SessionState::Active(_))
                }
                _ => state != SessionState::Faulted,
            },
        };

        if allowed {
            Ok(())
        } else {
            Err(ClientError::InvalidState { motor_id, state })
        }
    }

    /// 指令得到匹配应答后提交状态迁移
    pub fn commit(&mut self, motor_id: u8, command: &Command) {
        match command {
            Command::Enable => {
                self.entry(motor_id).enabled = true;
            }
            Command::Stop => {
                let st = self.entry(motor_id);
                st.enabled = false;
                st.mode = None;
            }
            Command::ClearFault => {
                let st = self.entry(motor_id);
                st.faulted = false;
                st.enabled = false;
                st.mode = None;
                debug!(motor_id, "fault cleared, session back to Disabled");
            }
            Command::SetMotorId { new_id } => {
                self.rename(motor_id, new_id.get());
            }
            Command::WriteParam { index, value } if *index == RUN_MODE => {
                if let Ok(mode) = RunMode::from_wire(value.as_f32() as u8) {
                    self.entry(motor_id).mode = Some(mode);
                }
            }
            _ => {}
        }
        self.entry(motor_id).last_updated = Some(Instant::now());
    }

    /// 记录一帧状态反馈（无论是否是被等待的那帧）
    ///
    /// 未知电机 ID 只记录告警，帧照常处理——总线可能被其他主机共享。
    /// 带故障位的反馈无条件把会话打入 Faulted。
    pub fn observe_feedback(&mut self, feedback: &MotorFeedback) {
        if !self.states.contains_key(&feedback.motor_id) {
            warn!(
                motor_id = feedback.motor_id,
                "feedback from a motor this session never addressed"
            );
        }
        let st = self.entry(feedback.motor_id);
        if feedback.has_fault() && !st.faulted {
            warn!(motor_id = feedback.motor_id, "fault flags set, session now Faulted");
        }
        if feedback.has_fault() {
            st.faulted = true;
        }
        st.last_feedback = Some(*feedback);
        st.last_updated = Some(Instant::now());
    }

    /// 标记故障（收到故障上报帧时）
    pub fn mark_faulted(&mut self, motor_id: u8) {
        self.entry(motor_id).faulted = true;
    }

    /// 电机改 ID 后迁移会话状态
    pub fn rename(&mut self, old_id: u8, new_id: u8) {
        if old_id == new_id {
            return;
        }
        let mut st = self.states.remove(&old_id).unwrap_or_else(|| MotorState::new(old_id));
        st.id = new_id;
        self.states.insert(new_id, st);
        debug!(old_id, new_id, "session state migrated to new motor id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cybergear_protocol::param::ParamValue;

    fn set_mode_cmd(mode: RunMode) -> Command {
        Command::set_mode(mode)
    }

    fn feedback(motor_id: u8, status_byte: u8) -> MotorFeedback {
        use cybergear_protocol::command::{CommandKind, pack_id};
        use cybergear_protocol::CgFrame;
        let data2 = ((status_byte as u16) << 8) | motor_id as u16;
        let frame = CgFrame::new(pack_id(CommandKind::Feedback, data2, 0), &[0u8; 8]);
        MotorFeedback::try_from(&frame).unwrap()
    }

    #[test]
    fn test_initial_state_is_disabled() {
        let mut session = MotorSession::new();
        session.authorize(1, &Command::Enable).unwrap();
        assert_eq!(session.get(1).unwrap().state(), SessionState::Disabled);
    }

    #[test]
    fn test_enable_then_set_mode_reaches_active() {
        let mut session = MotorSession::new();
        session.authorize(1, &Command::Enable).unwrap();
        session.commit(1, &Command::Enable);
        assert_eq!(session.get(1).unwrap().state(), SessionState::Enabled);

        let cmd = set_mode_cmd(RunMode::Position);
        session.authorize(1, &cmd).unwrap();
        session.commit(1, &cmd);
        assert_eq!(
            session.get(1).unwrap().state(),
            SessionState::Active(RunMode::Position)
        );
    }

    #[test]
    fn test_set_mode_allowed_from_disabled() {
        let mut session = MotorSession::new();
        let cmd = set_mode_cmd(RunMode::Speed);
        session.authorize(1, &cmd).unwrap();
        session.commit(1, &cmd);
        // 未使能时仍是 Disabled，使能后直接进入所选模式
        assert_eq!(session.get(1).unwrap().state(), SessionState::Disabled);
        session.commit(1, &Command::Enable);
        assert_eq!(
            session.get(1).unwrap().state(),
            SessionState::Active(RunMode::Speed)
        );
    }

    #[test]
    fn test_set_mode_rejected_while_active() {
        let mut session = MotorSession::new();
        session.commit(1, &Command::Enable);
        session.commit(1, &set_mode_cmd(RunMode::Impedance));

        let err = session
            .authorize(1, &set_mode_cmd(RunMode::Torque))
            .unwrap_err();
        match err {
            ClientError::InvalidState { motor_id: 1, state } => {
                assert_eq!(state, SessionState::Active(RunMode::Impedance));
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_resets_mode_from_any_state() {
        let mut session = MotorSession::new();
        session.commit(1, &Command::Enable);
        session.commit(1, &set_mode_cmd(RunMode::Torque));

        session.authorize(1, &Command::Stop).unwrap();
        session.commit(1, &Command::Stop);
        assert_eq!(session.get(1).unwrap().state(), SessionState::Disabled);

        // 停止后允许重新选模式
        session.authorize(1, &set_mode_cmd(RunMode::Speed)).unwrap();
    }

    #[test]
    fn test_fault_feedback_forces_faulted_until_cleared() {
        let mut session = MotorSession::new();
        session.commit(1, &Command::Enable);
        session.commit(1, &set_mode_cmd(RunMode::Position));

        // bit2 过温故障
        session.observe_feedback(&feedback(1, 0b0000_0100));
        assert_eq!(session.get(1).unwrap().state(), SessionState::Faulted);

        // Faulted 下模式切换、使能都被拒绝
        assert!(session.authorize(1, &set_mode_cmd(RunMode::Speed)).is_err());
        assert!(session.authorize(1, &Command::Enable).is_err());
        // 但停止、清故障、读取仍然允许
        session.authorize(1, &Command::Stop).unwrap();
        session.authorize(1, &Command::RequestStatus).unwrap();
        session.authorize(1, &Command::ClearFault).unwrap();

        session.commit(1, &Command::ClearFault);
        assert_eq!(session.get(1).unwrap().state(), SessionState::Disabled);
        session.authorize(1, &set_mode_cmd(RunMode::Speed)).unwrap();
    }

    #[test]
    fn test_stop_does_not_clear_fault() {
        let mut session = MotorSession::new();
        session.observe_feedback(&feedback(1, 0b0000_0001));
        session.commit(1, &Command::Stop);
        assert_eq!(session.get(1).unwrap().state(), SessionState::Faulted);
    }

    #[test]
    fn test_motion_requires_impedance_mode() {
        let mut session = MotorSession::new();
        let motion = Command::Motion(cybergear_protocol::MotionCommand {
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
            kp: 0.0,
            kd: 0.0,
        });

        assert!(session.authorize(1, &motion).is_err());

        session.commit(1, &Command::Enable);
        session.commit(1, &set_mode_cmd(RunMode::Impedance));
        session.authorize(1, &motion).unwrap();
    }

    #[test]
    fn test_setpoint_writes_require_matching_mode() {
        let mut session = MotorSession::new();
        session.commit(1, &Command::Enable);
        session.commit(1, &set_mode_cmd(RunMode::Speed));

        let spd = Command::WriteParam {
            index: SPD_REF,
            value: ParamValue::F32(2.0),
        };
        let loc = Command::WriteParam {
            index: LOC_REF,
            value: ParamValue::F32(1.0),
        };
        session.authorize(1, &spd).unwrap();
        assert!(session.authorize(1, &loc).is_err());
    }

    #[test]
    fn test_zero_and_set_id_require_stopped() {
        let mut session = MotorSession::new();
        session.commit(1, &Command::Enable);

        assert!(session.authorize(1, &Command::SetMechanicalZero).is_err());
        let new_id = cybergear_protocol::MotorId::new(5).unwrap();
        assert!(session.authorize(1, &Command::SetMotorId { new_id }).is_err());

        session.commit(1, &Command::Stop);
        session.authorize(1, &Command::SetMechanicalZero).unwrap();
        session.authorize(1, &Command::SetMotorId { new_id }).unwrap();
    }

    #[test]
    fn test_rename_migrates_state() {
        let mut session = MotorSession::new();
        session.commit(1, &Command::Enable);
        session.commit(
            1,
            &Command::SetMotorId {
                new_id: cybergear_protocol::MotorId::new(9).unwrap(),
            },
        );

        assert!(session.get(1).is_none());
        let st = session.get(9).unwrap();
        assert_eq!(st.id, 9);
        assert!(st.enabled);
    }

    #[test]
    fn test_observe_feedback_creates_unknown_entry() {
        let mut session = MotorSession::new();
        session.observe_feedback(&feedback(42, 0));
        let st = session.get(42).unwrap();
        assert!(st.last_feedback.is_some());
        assert!(!st.faulted);
    }
}
