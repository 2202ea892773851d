//! 面向调用方的高层电机 API
//!
//! 把固件要求的指令顺序（先停止、先选模式、先使能）封装进各个
//! 控制方法，调用方直接给物理量即可。所有指令走同一个
//! [`Dispatcher`]，天然满足一次一条在途指令的约束。

use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::ClientError;
use crate::session::SessionState;
use cybergear_can::CanAdapter;
use cybergear_protocol::param::{self, ParamValue};
use cybergear_protocol::{
    Command, MotionCommand, MotorFeedback, MotorId, ParamReadReply, RunMode, scale,
};
use tracing::info;

/// 力矩常数：额定力矩 / 额定电流（Nm/A）
const TORQUE_CONSTANT: f64 = scale::TORQUE.max / scale::CURRENT.max;

/// CyberGear 电机客户端
///
/// 通过 [`CyberGear::open`] 按配置打开串口并选定适配器型号；
/// 连接随值的生命周期存在，drop 时串口在所有路径上确定性释放。
pub struct CyberGear {
    dispatcher: Dispatcher<Box<dyn CanAdapter + Send>>,
}

impl CyberGear {
    /// 按配置打开串口并构建客户端
    pub fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let adapter = config.adapter.open(&config.port, config.baud_rate)?;
        info!(
            port = %config.port,
            adapter = %config.adapter,
            host_id = config.host_id,
            "cybergear client connected"
        );
        Ok(Self::with_adapter(adapter, config))
    }

    /// 使用现成的适配器构建客户端（测试、自定义传输）
    pub fn with_adapter(adapter: Box<dyn CanAdapter + Send>, config: &ClientConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(
                adapter,
                config.host_id,
                config.reply_timeout(),
                config.max_retries,
            ),
        }
    }

    /// 底层分发器
    pub fn dispatcher(&self) -> &Dispatcher<Box<dyn CanAdapter + Send>> {
        &self.dispatcher
    }

    // ========================================================================
    // 基础指令
    // ========================================================================

    /// 电机使能
    pub fn enable(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(id, Command::Enable)
    }

    /// 停止运行
    pub fn stop(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(id, Command::Stop)
    }

    /// 切换控制模式
    ///
    /// 只允许在 Disabled / Enabled 状态下调用，
    /// 处于活动控制模式或故障时返回 [`ClientError::InvalidState`]。
    pub fn set_mode(&self, id: MotorId, mode: RunMode) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(id, Command::set_mode(mode))
    }

    /// 清除故障，会话回到 Disabled
    pub fn clear_fault(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(id, Command::ClearFault)
    }

    // ========================================================================
    // 运动控制
    // ========================================================================

    /// 运控（阻抗）模式：位置/速度目标 + kp/kd 增益 + 前馈力矩
    ///
    /// 单位：rad、rad/s、Nm。越界值按固件行为饱和到量化区间。
    pub fn impedance_control(
        &self,
        id: MotorId,
        position: f64,
        velocity: f64,
        torque: f64,
        kp: f64,
        kd: f64,
    ) -> Result<MotorFeedback, ClientError> {
        self.ensure_mode(id, RunMode::Impedance)?;
        self.feedback_command(
            id,
            Command::Motion(MotionCommand {
                position,
                velocity,
                torque,
                kp,
                kd,
            }),
        )
    }

    /// 位置模式：以限速 `velocity` 转到 `position`
    pub fn set_position(
        &self,
        id: MotorId,
        position: f64,
        velocity: f64,
    ) -> Result<MotorFeedback, ClientError> {
        self.ensure_mode(id, RunMode::Position)?;
        self.write_param_f32(id, param::LIMIT_CUR, scale::CURRENT.max as f32)?;
        self.write_param_f32(id, param::LIMIT_SPD, velocity as f32)?;
        self.feedback_command(
            id,
            Command::WriteParam {
                index: param::LOC_REF,
                value: ParamValue::F32(position as f32),
            },
        )
    }

    /// 速度模式：以 `velocity` 持续旋转
    pub fn set_velocity(&self, id: MotorId, velocity: f64) -> Result<MotorFeedback, ClientError> {
        self.ensure_mode(id, RunMode::Speed)?;
        self.write_param_f32(id, param::LIMIT_CUR, scale::CURRENT.max as f32)?;
        self.feedback_command(
            id,
            Command::WriteParam {
                index: param::SPD_REF,
                value: ParamValue::F32(velocity as f32),
            },
        )
    }

    /// 力矩（电流）模式：输出 `torque`（Nm）
    pub fn set_torque(&self, id: MotorId, torque: f64) -> Result<MotorFeedback, ClientError> {
        self.ensure_mode(id, RunMode::Torque)?;
        // 力矩换算成 iq 电流指令，按电流区间饱和
        let iq = (torque / TORQUE_CONSTANT).clamp(scale::CURRENT.min, scale::CURRENT.max);
        self.feedback_command(
            id,
            Command::WriteParam {
                index: param::IQ_REF,
                value: ParamValue::F32(iq as f32),
            },
        )
    }

    // ========================================================================
    // 维护操作
    // ========================================================================

    /// 设置机械零位（内部先停止，原先使能的电机完成后恢复使能）
    pub fn set_zero(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        let was_enabled = self
            .dispatcher
            .motor_state(id.get())
            .map(|st| st.enabled)
            .unwrap_or(false);

        self.stop(id)?;
        let feedback = self.feedback_command(id, Command::SetMechanicalZero)?;
        if was_enabled {
            self.enable(id)?;
        }
        Ok(feedback)
    }

    /// 修改电机 CAN ID（断电保存），会话状态随之迁移
    pub fn set_id(&self, id: MotorId, new_id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.stop(id)?;
        let feedback = self.feedback_command(id, Command::SetMotorId { new_id })?;
        info!(old_id = id.get(), new_id = new_id.get(), "motor id changed");
        Ok(feedback)
    }

    /// 恢复出厂设置
    ///
    /// 完成后电机的 CAN ID 会回到出厂值 127。
    pub fn restore_config(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.stop(id)?;
        self.feedback_command(id, Command::RestoreConfig)
    }

    // ========================================================================
    // 读取
    // ========================================================================

    /// 主动查询一帧状态反馈
    pub fn request_status(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(id, Command::RequestStatus)
    }

    /// 读取当前位置与速度（rad，rad/s）
    pub fn read_position_velocity(&self, id: MotorId) -> Result<(f64, f64), ClientError> {
        let feedback = self.request_status(id)?;
        Ok((feedback.position, feedback.velocity))
    }

    /// 读取母线电压与 iq 电流（V，A）
    pub fn read_voltage_current(&self, id: MotorId) -> Result<(f64, f64), ClientError> {
        let voltage = self.read_param(id, param::VBUS)?.as_f32() as f64;
        let current = self.read_param(id, param::IQ_FILTER)?.as_f32() as f64;
        Ok((voltage, current))
    }

    /// 读取 MCU 唯一标识
    pub fn device_id(&self, id: MotorId) -> Result<[u8; 8], ClientError> {
        match self.dispatcher.send_and_await(id, Command::RequestDeviceId)? {
            Outcome::DeviceId(reply) => Ok(reply.mcu_id),
            other => Err(unexpected_outcome(id, &other)),
        }
    }

    /// 读取任意属性参数
    pub fn read_param(&self, id: MotorId, index: u16) -> Result<ParamReadReply, ClientError> {
        match self.dispatcher.send_and_await(id, Command::ReadParam { index })? {
            Outcome::Param(reply) => Ok(reply),
            other => Err(unexpected_outcome(id, &other)),
        }
    }

    /// 写入任意属性参数
    pub fn write_param(
        &self,
        id: MotorId,
        index: u16,
        value: ParamValue,
    ) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(id, Command::WriteParam { index, value })
    }

    /// 会话中缓存的最近一帧反馈
    pub fn last_feedback(&self, id: MotorId) -> Result<MotorFeedback, ClientError> {
        self.dispatcher.last_feedback(id.get())
    }

    /// 会话状态（从未交互过返回 `None`）
    pub fn session_state(&self, id: MotorId) -> Option<SessionState> {
        self.dispatcher.session_state(id.get())
    }

    // ========================================================================
    // 内部
    // ========================================================================

    /// 把会话推进到指定控制模式的使能状态
    ///
    /// 已在目标模式则不发任何帧；在其他活动模式则先停止；
    /// 之后按「选模式 → 使能」顺序走合法迁移。故障状态下由
    /// 模式切换的状态检查报 [`ClientError::InvalidState`]。
    fn ensure_mode(&self, id: MotorId, mode: RunMode) -> Result<(), ClientError> {
        let state = self.dispatcher.motor_state(id.get());

        if let Some(SessionState::Active(current)) =
            state.as_ref().map(|st| st.state())
        {
            if current == mode {
                return Ok(());
            }
            self.stop(id)?;
        }

        let st = self.dispatcher.motor_state(id.get());
        if st.as_ref().and_then(|st| st.mode) != Some(mode) {
            self.set_mode(id, mode)?;
        }
        if !st.as_ref().map(|st| st.enabled).unwrap_or(false) {
            self.enable(id)?;
        }
        Ok(())
    }

    fn write_param_f32(
        &self,
        id: MotorId,
        index: u16,
        value: f32,
    ) -> Result<MotorFeedback, ClientError> {
        self.feedback_command(
            id,
            Command::WriteParam {
                index,
                value: ParamValue::F32(value),
            },
        )
    }

    fn feedback_command(&self, id: MotorId, command: Command) -> Result<MotorFeedback, ClientError> {
        match self.dispatcher.send_and_await(id, command)? {
            Outcome::Feedback(feedback) => Ok(feedback),
            other => Err(unexpected_outcome(id, &other)),
        }
    }
}

/// 应答类型与指令不符——按协议帧损坏处理
fn unexpected_outcome(id: MotorId, outcome: &Outcome) -> ClientError {
    ClientError::Protocol(cybergear_protocol::ProtocolError::InvalidValue {
        field: format!("reply for motor {id}: {outcome:?}"),
        value: 0,
    })
}
