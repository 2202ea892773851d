//! 同步指令收发
//!
//! 编码 → 写适配器 → 循环读帧直到匹配应答或超时 → 更新会话。
//! 协议是严格的请求-应答模型，且应答只能按电机 ID 关联，
//! 所以适配器放在互斥锁后面，整个写-读周期独占通道；
//! 并发调用会在锁上自然串行化。
//!
//! 超时按整轮重试（重新写再重新等），设备 IO 错误与状态机违例
//! 不重试，立即上抛。

use crate::error::ClientError;
use crate::session::{MotorSession, MotorState, SessionState};
use cybergear_can::{CanAdapter, CanError};
use cybergear_protocol::{
    Command, DeviceIdReply, Inbound, MotorFeedback, MotorId, ParamReadReply,
};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 一次指令交换的结果
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// 状态反馈（绝大多数指令的应答形式）
    Feedback(MotorFeedback),
    /// 参数读取应答
    Param(ParamReadReply),
    /// MCU 标识应答
    DeviceId(DeviceIdReply),
}

impl Outcome {
    /// 取出状态反馈，其他应答类型返回 `None`
    pub fn feedback(&self) -> Option<MotorFeedback> {
        match self {
            Outcome::Feedback(fb) => Some(*fb),
            _ => None,
        }
    }
}

/// 同步指令分发器
///
/// 独占一个 [`CanAdapter`]，维护所有电机的 [`MotorSession`]。
pub struct Dispatcher<A: CanAdapter> {
    adapter: Mutex<A>,
    session: Mutex<MotorSession>,
    host_id: u8,
    reply_timeout: Duration,
    max_retries: u32,
}

impl<A: CanAdapter> Dispatcher<A> {
    pub fn new(adapter: A, host_id: u8, reply_timeout: Duration, max_retries: u32) -> Self {
        Self {
            adapter: Mutex::new(adapter),
            session: Mutex::new(MotorSession::new()),
            host_id,
            reply_timeout,
            max_retries,
        }
    }

    /// 主机 ID
    pub fn host_id(&self) -> u8 {
        self.host_id
    }

    /// 某电机的会话状态快照
    pub fn motor_state(&self, motor_id: u8) -> Option<MotorState> {
        self.session
            .lock()
            .ok()
            .and_then(|session| session.get(motor_id).cloned())
    }

    /// 某电机的会话状态（从未交互过返回 `None`）
    pub fn session_state(&self, motor_id: u8) -> Option<SessionState> {
        self.motor_state(motor_id).map(|st| st.state())
    }

    /// 最近一帧状态反馈；从未交互过的 ID 返回 [`ClientError::UnknownMotorId`]
    pub fn last_feedback(&self, motor_id: u8) -> Result<MotorFeedback, ClientError> {
        self.motor_state(motor_id)
            .and_then(|st| st.last_feedback)
            .ok_or(ClientError::UnknownMotorId { motor_id })
    }

    /// 发出一条指令并等待匹配应答
    ///
    /// 1. 会话状态检查（违例立即失败，不上总线）
    /// 2. 编码、写出，循环读帧直到匹配应答或单轮超时
    /// 3. 超时则整轮重试，最多 `max_retries` 次
    /// 4. 成功后提交会话状态迁移
    pub fn send_and_await(&self, motor_id: MotorId, command: Command) -> Result<Outcome, ClientError> {
        {
            let mut session = self.session.lock().map_err(|_| ClientError::PoisonedLock)?;
            session.authorize(motor_id.get(), &command)?;
        }

        // 改 ID 指令的应答来自新 ID
        let reply_id = match &command {
            Command::SetMotorId { new_id } => new_id.get(),
            _ => motor_id.get(),
        };

        let frame = command.to_frame(motor_id, self.host_id);
        let mut adapter = self.adapter.lock().map_err(|_| ClientError::PoisonedLock)?;

        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!(
                    motor_id = motor_id.get(),
                    kind = ?command.kind(),
                    attempt,
                    "retrying command"
                );
            }
            adapter.send(&frame)?;

            match self.await_reply(&mut *adapter, reply_id, &command) {
                Ok(outcome) => {
                    let mut session =
                        self.session.lock().map_err(|_| ClientError::PoisonedLock)?;
                    session.commit(motor_id.get(), &command);
                    return Ok(outcome);
                }
                // 单轮超时：重试整个写-读周期
                Err(ClientError::Can(CanError::Timeout)) => continue,
                Err(e) => return Err(e),
            }
        }

        warn!(
            motor_id = motor_id.get(),
            attempts, "no matching reply, giving up"
        );
        Err(ClientError::Timeout {
            motor_id: motor_id.get(),
            attempts,
        })
    }

    /// 读帧直到出现目标电机的匹配应答或超时
    ///
    /// 其他电机的帧只记录进会话后丢弃（总线可能被多主机共享），
    /// 解析失败的帧丢弃后继续读。
    fn await_reply(
        &self,
        adapter: &mut A,
        reply_id: u8,
        command: &Command,
    ) -> Result<Outcome, ClientError> {
        let deadline = Instant::now() + self.reply_timeout;

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or(ClientError::Can(CanError::Timeout))?;

            let frame = adapter.receive(remaining)?;
            let inbound = match Inbound::parse(&frame) {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!(error = %e, "dropping malformed frame 0x{:08X}", frame.id);
                    continue;
                }
            };

            match inbound {
                Inbound::Feedback(fb) => {
                    {
                        let mut session =
                            self.session.lock().map_err(|_| ClientError::PoisonedLock)?;
                        session.observe_feedback(&fb);
                    }
                    if fb.motor_id == reply_id
                        && fb.host_id == self.host_id
                        && expects_feedback(command)
                    {
                        return Ok(Outcome::Feedback(fb));
                    }
                    trace!(
                        motor_id = fb.motor_id,
                        host_id = fb.host_id,
                        "discarding feedback for another motor/host"
                    );
                }

                Inbound::ParamValue(reply) => {
                    if let Command::ReadParam { index } = command
                        && reply.motor_id == reply_id
                        && reply.host_id == self.host_id
                        && reply.index == *index
                    {
                        return Ok(Outcome::Param(reply));
                    }
                    trace!(motor_id = reply.motor_id, "discarding unmatched param reply");
                }

                Inbound::DeviceId(reply) => {
                    if matches!(command, Command::RequestDeviceId)
                        && reply.motor_id == reply_id
                        && reply.host_id == self.host_id
                    {
                        return Ok(Outcome::DeviceId(reply));
                    }
                    trace!(motor_id = reply.motor_id, "discarding unmatched device id reply");
                }

                Inbound::Fault(report) => {
                    {
                        let mut session =
                            self.session.lock().map_err(|_| ClientError::PoisonedLock)?;
                        session.mark_faulted(report.motor_id);
                    }
                    warn!(motor_id = report.motor_id, "motor reported a fault frame");
                    if report.motor_id == reply_id {
                        return Err(ClientError::MotorFault {
                            motor_id: reply_id,
                            report,
                        });
                    }
                }

                // 总线上其他主机发出的指令帧，与本次交换无关
                Inbound::Motion { motor_id, .. } => {
                    trace!(motor_id, "ignoring motion frame from another host");
                }
                Inbound::Request { kind, motor_id, .. } => {
                    trace!(?kind, motor_id, "ignoring command frame from another host");
                }
            }
        }
    }
}

/// 该指令是否以状态反馈作为应答
fn expects_feedback(command: &Command) -> bool {
    !matches!(
        command,
        Command::ReadParam { .. } | Command::RequestDeviceId
    )
}
