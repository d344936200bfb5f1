use std::sync::Arc;

use crate::{
    command::{
        InfoConfigurationCmd, LauncherCmd, SteeringWheelTorqueCmd, TurnSignalsCmd, VehicleMoveCmd,
    },
    frame::Frame,
    info::{
        LauncherInfo, ModeSource, SteeringWheelEpsTorquesInfo, SteeringWheelPoseVelocityInfo,
        VehicleMode, VehicleSpeedInfo, VehicleWheelsSpeedInfo,
    },
    record::{ProtocolError, Record},
    schedule::{ReceiveDispatch, SendScheduler},
};

/// Wire protocol revision. Selects which message definition table the
/// facade instantiates; V3 exists on paper but has no table yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ProtocolVersion {
    #[default]
    V2,
}

/// Functionality-oriented protocol configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OscarProtocolConfig {
    pub version: ProtocolVersion,

    /// Reject inbound frames whose trailing byte does not match the
    /// computed CRC8. Off by default: the physical modules are trusted
    /// as-is, matching deployed behavior.
    pub strict_crc: bool,

    pub vehicle_speed_info_need_to_receive: bool,
    pub vehicle_wheels_speed_info_need_to_receive: bool,
    /// Accepted for compatibility; no such record exists in V2, so this
    /// subscription is ignored.
    pub vehicle_moving_interception_info_need_to_receive: bool,
    pub steering_wheel_pose_velocity_info_need_to_receive: bool,
    pub steering_wheel_eps_torques_info_need_to_receive: bool,
    pub launcher_info_need_to_receive: bool,

    pub steering_wheel_torque_cmd_send_rate: f64,
    pub vehicle_move_cmd_send_rate: f64,
    pub emergency_stop_cmd_send_rate: f64,

    pub vehicle_speed_info_rate: f64,
    pub steering_wheel_pose_velocity_info_rate: f64,
    pub steering_wheel_eps_torques_info_rate: f64,
    pub launcher_info_rate: f64,
}

impl Default for OscarProtocolConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V2,
            strict_crc: false,

            vehicle_speed_info_need_to_receive: true,
            vehicle_wheels_speed_info_need_to_receive: true,
            vehicle_moving_interception_info_need_to_receive: true,
            steering_wheel_pose_velocity_info_need_to_receive: true,
            steering_wheel_eps_torques_info_need_to_receive: true,
            launcher_info_need_to_receive: true,

            steering_wheel_torque_cmd_send_rate: 60.0,
            vehicle_move_cmd_send_rate: 60.0,
            emergency_stop_cmd_send_rate: 30.0,

            vehicle_speed_info_rate: 80.0,
            steering_wheel_pose_velocity_info_rate: 80.0,
            steering_wheel_eps_torques_info_rate: 80.0,
            launcher_info_rate: 2.0,
        }
    }
}

/// Owns one record per defined message type together with the send
/// scheduler and receive dispatch table, and exposes the command/query
/// API driven by a control loop.
///
/// The facade has no threads of its own: a transport layer polls
/// [`raw_frames_to_send`](Self::raw_frames_to_send) on its send tick and
/// feeds inbound buffers to
/// [`update_data_from_raw`](Self::update_data_from_raw), possibly from
/// different threads than the command/query callers.
pub struct OscarProtocol {
    scheduler: Arc<SendScheduler>,
    dispatch: Arc<ReceiveDispatch>,

    steering_wheel_torque_cmd: SteeringWheelTorqueCmd,
    steering_wheel_interception_cmd: SteeringWheelTorqueCmd,
    vehicle_move_cmd: VehicleMoveCmd,
    vehicle_move_interception_cmd: VehicleMoveCmd,
    // Also carries the emergency-stop and hand-brake command fields
    launcher_cmd: LauncherCmd,
    turn_signals_cmd: TurnSignalsCmd,
    info_configuration_cmd: Option<InfoConfigurationCmd>,

    vehicle_speed_info: VehicleSpeedInfo,
    vehicle_wheels_speed_info: VehicleWheelsSpeedInfo,
    steering_wheel_pose_velocity_info: SteeringWheelPoseVelocityInfo,
    steering_wheel_eps_torques_info: SteeringWheelEpsTorquesInfo,
    // Also carries the emergency-stop and hand-brake info fields
    launcher_info: LauncherInfo,
}

impl OscarProtocol {
    pub fn new(config: OscarProtocolConfig) -> Result<Self, ProtocolError> {
        let scheduler = SendScheduler::new();
        let dispatch = ReceiveDispatch::new(config.strict_crc);

        // One record table per protocol version; only V2 is defined.
        let ProtocolVersion::V2 = config.version;

        // Interception toggles get their own records (same CAN ids) so a
        // one-shot never clobbers the payload of a periodically-sent
        // command record.
        let protocol = Self {
            steering_wheel_torque_cmd: SteeringWheelTorqueCmd::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            steering_wheel_interception_cmd: SteeringWheelTorqueCmd::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            vehicle_move_cmd: VehicleMoveCmd::new(Arc::clone(&scheduler), Arc::clone(&dispatch))?,
            vehicle_move_interception_cmd: VehicleMoveCmd::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            launcher_cmd: LauncherCmd::new(Arc::clone(&scheduler), Arc::clone(&dispatch))?,
            turn_signals_cmd: TurnSignalsCmd::new(Arc::clone(&scheduler), Arc::clone(&dispatch))?,
            info_configuration_cmd: Some(InfoConfigurationCmd::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?),

            vehicle_speed_info: VehicleSpeedInfo::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            vehicle_wheels_speed_info: VehicleWheelsSpeedInfo::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            steering_wheel_pose_velocity_info: SteeringWheelPoseVelocityInfo::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            steering_wheel_eps_torques_info: SteeringWheelEpsTorquesInfo::new(
                Arc::clone(&scheduler),
                Arc::clone(&dispatch),
            )?,
            launcher_info: LauncherInfo::new(Arc::clone(&scheduler), Arc::clone(&dispatch))?,

            scheduler,
            dispatch,
        };

        protocol.apply_config(&config);

        Ok(protocol)
    }

    /// Builds a protocol with [`OscarProtocolConfig::default`], logging a
    /// warning since a deployment normally supplies its own configuration.
    pub fn with_default_config() -> Result<Self, ProtocolError> {
        tracing::warn!("no configuration supplied, using default OSCAR protocol configuration (V2)");
        Self::new(OscarProtocolConfig::default())
    }

    fn apply_config(&self, config: &OscarProtocolConfig) {
        let _ = self
            .steering_wheel_torque_cmd
            .record()
            .set_send_rate(config.steering_wheel_torque_cmd_send_rate);
        let _ = self
            .vehicle_move_cmd
            .record()
            .set_send_rate(config.vehicle_move_cmd_send_rate);
        let _ = self
            .launcher_cmd
            .record()
            .set_send_rate(config.emergency_stop_cmd_send_rate);

        if config.vehicle_speed_info_need_to_receive {
            self.vehicle_speed_info.record().start_receiving();
            self.configure_received_info_rate(
                self.vehicle_speed_info.record(),
                config.vehicle_speed_info_rate,
            );
        }

        if config.vehicle_wheels_speed_info_need_to_receive {
            self.vehicle_wheels_speed_info.record().start_receiving();
        }

        if config.steering_wheel_pose_velocity_info_need_to_receive {
            self.steering_wheel_pose_velocity_info
                .record()
                .start_receiving();
            self.configure_received_info_rate(
                self.steering_wheel_pose_velocity_info.record(),
                config.steering_wheel_pose_velocity_info_rate,
            );
        }

        if config.steering_wheel_eps_torques_info_need_to_receive {
            self.steering_wheel_eps_torques_info
                .record()
                .start_receiving();
            self.configure_received_info_rate(
                self.steering_wheel_eps_torques_info.record(),
                config.steering_wheel_eps_torques_info_rate,
            );
        }

        // Emergency stop and hand brake ride on the launcher info record
        if config.launcher_info_need_to_receive {
            self.launcher_info.record().start_receiving();
            self.configure_received_info_rate(
                self.launcher_info.record(),
                config.launcher_info_rate,
            );
        }

        if config.vehicle_moving_interception_info_need_to_receive {
            tracing::debug!("vehicle moving interception info is not available in OSCAR_CAN_V2");
        }
    }

    /// Asks the remote module to emit an info record at `rate_hz` (or to
    /// stop when the rate is non-positive). Returns false when the
    /// protocol version has no info-configuration command channel.
    fn configure_received_info_rate(&self, record: &Arc<Record>, rate_hz: f64) -> bool {
        let Some(cmd) = &self.info_configuration_cmd else {
            return false;
        };

        if rate_hz > 0.0 {
            cmd.set_reply_delay(record.can_id(), 1.0 / rate_hz);
        } else {
            cmd.turn_off_replies(record.can_id());
        }
        record.set_configured_receive_rate(rate_hz);

        true
    }

    /* Remote info rates */

    /// Asks the vehicle to emit the speed info at `rate_hz`; a non-positive
    /// rate turns the emission off. Returns false when the protocol version
    /// has no info-configuration command channel.
    pub fn set_vehicle_speed_info_receive_rate(&self, rate_hz: f64) -> bool {
        self.configure_received_info_rate(self.vehicle_speed_info.record(), rate_hz)
    }

    pub fn set_vehicle_wheels_speed_info_receive_rate(&self, rate_hz: f64) -> bool {
        self.configure_received_info_rate(self.vehicle_wheels_speed_info.record(), rate_hz)
    }

    pub fn set_steering_wheel_pose_velocity_info_receive_rate(&self, rate_hz: f64) -> bool {
        self.configure_received_info_rate(self.steering_wheel_pose_velocity_info.record(), rate_hz)
    }

    pub fn set_steering_wheel_eps_torques_info_receive_rate(&self, rate_hz: f64) -> bool {
        self.configure_received_info_rate(self.steering_wheel_eps_torques_info.record(), rate_hz)
    }

    pub fn set_launcher_info_receive_rate(&self, rate_hz: f64) -> bool {
        self.configure_received_info_rate(self.launcher_info.record(), rate_hz)
    }

    /* Transport entry points */

    /// Serializes every record due at `now` (monotonic seconds); the
    /// transport layer puts the returned buffers on the bus.
    pub fn raw_frames_to_send(&self, now: f64) -> Vec<Frame> {
        self.scheduler.frames_to_send(now)
    }

    /// Routes inbound raw buffers received at `receive_time` to their
    /// records. Pass 0.0 when the transport has no timestamp.
    pub fn update_data_from_raw<'a>(
        &self,
        raws: impl IntoIterator<Item = &'a [u8]>,
        receive_time: f64,
    ) {
        self.dispatch.dispatch(raws, receive_time);
    }

    /* Launcher */

    pub fn auto_mode(&self) {
        self.launcher_cmd.auto_mode();
    }

    pub fn manual_mode(&self) {
        self.launcher_cmd.manual_mode();
    }

    pub fn get_mode(&self) -> (VehicleMode, ModeSource) {
        self.launcher_info.mode()
    }

    pub fn emergency_stop_on(&self) {
        self.launcher_cmd.emergency_stop_on();
    }

    pub fn emergency_stop_off(&self) {
        self.launcher_cmd.emergency_stop_off();
    }

    pub fn get_emergency_stop(&self) -> bool {
        let (state, _source) = self.launcher_info.emergency_stop();
        state == crate::command::Toggle::On
    }

    pub fn hand_brake_on(&self) {
        self.launcher_cmd.hand_brake_on();
    }

    pub fn hand_brake_off(&self) {
        self.launcher_cmd.hand_brake_off();
    }

    pub fn get_hand_brake(&self) -> bool {
        let (state, _source) = self.launcher_info.hand_brake();
        state == crate::command::Toggle::On
    }

    pub fn led_on(&self) {
        self.launcher_cmd.led_on();
    }

    pub fn led_off(&self) {
        self.launcher_cmd.led_off();
    }

    pub fn get_led(&self) -> bool {
        self.launcher_info.led_on()
    }

    /// Commands the opposite of the currently reported LED state.
    pub fn led_reverse(&self) {
        if self.get_led() {
            self.launcher_cmd.led_off();
        } else {
            self.launcher_cmd.led_on();
        }
    }

    /* Turn signals */

    pub fn left_turn_signal(&self) {
        self.turn_signals_cmd.left_signal();
    }

    pub fn right_turn_signal(&self) {
        self.turn_signals_cmd.right_signal();
    }

    pub fn emergency_signals(&self) {
        self.turn_signals_cmd.emergency_signals();
    }

    pub fn turn_off_signals(&self) {
        self.turn_signals_cmd.turn_off_signals();
    }

    /* Steering wheel */

    pub fn steering_wheel_interception_on(&self) {
        self.steering_wheel_interception_cmd.interception_on();
    }

    pub fn steering_wheel_interception_off(&self) {
        self.steering_wheel_interception_cmd.interception_off();
    }

    pub fn start_sending_steering_wheel_torque_cmd(&self) -> bool {
        self.steering_wheel_torque_cmd.record().start_sending()
    }

    pub fn stop_sending_steering_wheel_torque_cmd(&self) {
        self.steering_wheel_torque_cmd.record().stop_sending();
    }

    /// Updates the torque field transmitted by the periodic command
    /// record; does not itself trigger a send.
    pub fn set_steering_wheel_torque(&self, torque: f64) {
        self.steering_wheel_torque_cmd.set_torque(torque);
    }

    pub fn get_steering_wheel_angle_and_velocity(&self) -> (f64, f64) {
        self.steering_wheel_pose_velocity_info.angle_and_velocity()
    }

    pub fn get_steering_fraction(&self) -> f64 {
        self.steering_wheel_pose_velocity_info.fraction()
    }

    pub fn get_steering_wheel_and_eps_torques(&self) -> (f64, f64) {
        self.steering_wheel_eps_torques_info.torques()
    }

    /* Vehicle motion */

    pub fn vehicle_move_interception_on(&self) {
        self.vehicle_move_interception_cmd.interception_on();
    }

    pub fn vehicle_move_interception_off(&self) {
        self.vehicle_move_interception_cmd.interception_off();
    }

    pub fn start_sending_vehicle_move_cmd(&self) -> bool {
        self.vehicle_move_cmd.record().start_sending()
    }

    pub fn stop_sending_vehicle_move_cmd(&self) {
        self.vehicle_move_cmd.record().stop_sending();
    }

    pub fn set_vehicle_throttle(&self, throttle: f64) {
        self.vehicle_move_cmd.set_throttle(throttle);
    }

    pub fn get_vehicle_speed(&self) -> f64 {
        self.vehicle_speed_info.speed()
    }

    pub fn get_vehicle_encoder(&self) -> u8 {
        self.vehicle_speed_info.encoder()
    }

    pub fn get_vehicle_wheels_speed(&self) -> (f64, f64, f64, f64) {
        self.vehicle_wheels_speed_info.wheels_speed()
    }
}
