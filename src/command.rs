use std::sync::Arc;

use num_enum::IntoPrimitive;

use crate::{
    codec::split_be_u16,
    frame::{FrameKind, ModuleState},
    record::{ProtocolError, Record},
    schedule::{ReceiveDispatch, SendScheduler},
};

/* Command CAN identifiers, protocol version 2 */

pub const STEERING_WHEEL_TORQUE_CMD_V2: u16 = 0x7F9;
pub const VEHICLE_ACCELERATION_CMD_V2: u16 = 0x7EE;
pub const LAUNCHER_CMD_V2: u16 = 0x7FC;
pub const INFO_CONFIGURATION_CMD_V2: u16 = 0x7FD;
pub const TURN_SIGNALS_CMD_V2: u16 = 0x778;

/// Interception flag telling the vehicle's native controller to cede an
/// actuator to the external command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Interception {
    DontChange = 0x00,
    On = 0x01,
    Off = 0x02,
}

/// On/off field encoding shared by the LED, emergency-stop and hand-brake
/// command bytes and their info counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, num_enum::FromPrimitive)]
#[repr(u8)]
pub enum Toggle {
    #[default]
    DontChange = 0x00,
    On = 0x01,
    Off = 0x02,
}

/// Command-side launcher mode encoding. Deliberately not the same numbering
/// as the info side: manual is 0x03 here and 0x02 there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum LauncherMode {
    DontChange = 0x00,
    Auto = 0x01,
    RadioJoy = 0x02,
    Manual = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum SteeringDirection {
    Right = 0x01,
    Left = 0x02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum TurnSignal {
    DontChange = 0x00,
    Right = 0x01,
    Left = 0x02,
    Emergency = 0x03,
    Off = 0x04,
}

/// Sub-commands of the info-configuration channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum InfoModuleCommand {
    DontChange = 0x00,
    TurnOn = 0x01,
    TurnOff = 0x02,
    Restart = 0x03,
    SetDelay = 0x04,
}

/// Steering wheel control by torque.
///
/// Data layout: interception @0, direction @1, torque magnitude lo/hi @2-3
/// (tenths of the commanded unit, capped at 1000).
pub struct SteeringWheelTorqueCmd {
    record: Arc<Record>,
}

impl SteeringWheelTorqueCmd {
    pub const MAX_TORQUE: u16 = 1000;

    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                STEERING_WHEEL_TORQUE_CMD_V2,
                FrameKind::Cmd,
                ModuleState::WorkingActive,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn interception_on(&self) {
        self.record.reset_data();
        self.record.set_data_byte(0, Interception::On.into());
        self.record.send_once();
    }

    pub fn interception_off(&self) {
        self.record.reset_data();
        self.record.set_data_byte(0, Interception::Off.into());
        self.record.send_once();
    }

    /// Writes the torque field; the periodic registration picks it up on
    /// its next due tick, no send is triggered here. Out-of-range values
    /// clamp silently.
    pub fn set_torque(&self, torque: f64) {
        let direction = if torque > 0.0 {
            SteeringDirection::Left
        } else {
            SteeringDirection::Right
        };

        let magnitude = ((torque * 10.0).abs() as u16).min(Self::MAX_TORQUE);

        self.record.with_data(|data| {
            data[1] = direction.into();
            data[2] = (magnitude & 0x00FF) as u8;
            data[3] = (magnitude >> 8) as u8;
        });
    }
}

/// Vehicle longitudinal control.
///
/// Data layout: interception @0, throttle lo/hi @1-2 as 16-bit two's
/// complement in tenths, clamped to ±1000.
pub struct VehicleMoveCmd {
    record: Arc<Record>,
}

impl VehicleMoveCmd {
    pub const MAX_THROTTLE: i32 = 1000;

    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                VEHICLE_ACCELERATION_CMD_V2,
                FrameKind::Cmd,
                ModuleState::WorkingActive,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn interception_on(&self) {
        self.record.reset_data();
        self.record.set_data_byte(0, Interception::On.into());
        self.record.send_once();
    }

    pub fn interception_off(&self) {
        self.record.reset_data();
        self.record.set_data_byte(0, Interception::Off.into());
        self.record.send_once();
    }

    pub fn set_throttle(&self, throttle: f64) {
        let scaled = if throttle > 0.0 {
            ((throttle * 10.0) as i32).min(Self::MAX_THROTTLE)
        } else {
            ((throttle * 10.0) as i32).max(-Self::MAX_THROTTLE)
        };

        let encoded = crate::to_twos_complement(scaled, 16);

        self.record.with_data(|data| {
            data[1] = (encoded & 0x00FF) as u8;
            data[2] = (encoded >> 8) as u8;
        });
    }
}

/// Launcher command record, shared by the mode, LED, emergency-stop and
/// hand-brake one-shots. Each setter resets the data bytes to don't-change
/// and writes only its own byte: mode @0, led @1, emergency stop @2, hand
/// brake @3.
pub struct LauncherCmd {
    record: Arc<Record>,
}

impl LauncherCmd {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                LAUNCHER_CMD_V2,
                FrameKind::Cmd,
                ModuleState::WorkingActive,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    fn send_field(&self, index: usize, value: u8) {
        self.record.reset_data();
        self.record.set_data_byte(index, value);
        self.record.send_once();
    }

    pub fn auto_mode(&self) {
        self.send_field(0, LauncherMode::Auto.into());
    }

    pub fn manual_mode(&self) {
        self.send_field(0, LauncherMode::Manual.into());
    }

    pub fn led_on(&self) {
        self.send_field(1, Toggle::On.into());
    }

    pub fn led_off(&self) {
        self.send_field(1, Toggle::Off.into());
    }

    pub fn emergency_stop_on(&self) {
        self.send_field(2, Toggle::On.into());
    }

    pub fn emergency_stop_off(&self) {
        self.send_field(2, Toggle::Off.into());
    }

    pub fn hand_brake_on(&self) {
        self.send_field(3, Toggle::On.into());
    }

    pub fn hand_brake_off(&self) {
        self.send_field(3, Toggle::Off.into());
    }
}

/// Turn signal selection; one byte, mutually exclusive values.
pub struct TurnSignalsCmd {
    record: Arc<Record>,
}

impl TurnSignalsCmd {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                TURN_SIGNALS_CMD_V2,
                FrameKind::Cmd,
                ModuleState::WorkingActive,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    fn send_signal(&self, signal: TurnSignal) {
        self.record.reset_data();
        self.record.set_data_byte(0, signal.into());
        self.record.send_once();
    }

    pub fn left_signal(&self) {
        self.send_signal(TurnSignal::Left);
    }

    pub fn right_signal(&self) {
        self.send_signal(TurnSignal::Right);
    }

    pub fn emergency_signals(&self) {
        self.send_signal(TurnSignal::Emergency);
    }

    pub fn turn_off_signals(&self) {
        self.send_signal(TurnSignal::Off);
    }
}

/// One-shot channel telling a physical module how often to emit an info
/// record.
///
/// Data layout: target CAN id hi/lo @0-1, reply delay @2 in 10 ms units
/// (clamped to 0..=2500 ms, floored to 10 ms), sub-command @3.
pub struct InfoConfigurationCmd {
    record: Arc<Record>,
}

impl InfoConfigurationCmd {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                INFO_CONFIGURATION_CMD_V2,
                FrameKind::Cmd,
                ModuleState::WorkingActive,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    fn encode_delay(delay_s: f64) -> u8 {
        let mut millis = ((delay_s.abs() * 1000.0) as u32).min(2500);
        if millis > 0 && millis < 10 {
            millis = 10;
        }
        (millis / 10) as u8
    }

    fn send_delay(&self, target_can_id: u16, delay_s: f64) {
        let (hi, lo) = split_be_u16(target_can_id);
        let delay = Self::encode_delay(delay_s);

        self.record.with_data(|data| {
            data[0] = hi;
            data[1] = lo;
            data[2] = delay;
            data[3] = InfoModuleCommand::SetDelay.into();
        });
        self.record.send_once();
    }

    pub fn set_reply_delay(&self, target_can_id: u16, delay_s: f64) {
        self.send_delay(target_can_id, delay_s);
    }

    /// A set-delay with delay 0 tells the module to stop emitting.
    pub fn turn_off_replies(&self, target_can_id: u16) {
        self.send_delay(target_can_id, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::be_u16, from_twos_complement};

    fn harness() -> (Arc<SendScheduler>, Arc<ReceiveDispatch>) {
        (SendScheduler::new(), ReceiveDispatch::new(false))
    }

    #[test]
    fn torque_encodes_direction_and_magnitude() {
        let (scheduler, dispatch) = harness();
        let cmd = SteeringWheelTorqueCmd::new(scheduler, dispatch).unwrap();

        cmd.set_torque(12.3);
        let data = cmd.record().data();
        assert_eq!(data[1], u8::from(SteeringDirection::Left));
        assert_eq!(be_u16(data[3], data[2]), 123);

        cmd.set_torque(-45.6);
        let data = cmd.record().data();
        assert_eq!(data[1], u8::from(SteeringDirection::Right));
        assert_eq!(be_u16(data[3], data[2]), 456);
    }

    #[test]
    fn torque_round_trips_direction_and_magnitude() {
        let (scheduler, dispatch) = harness();
        let cmd = SteeringWheelTorqueCmd::new(scheduler, dispatch).unwrap();

        for tenths in [-1000i32, -999, -123, -1, 0, 1, 123, 999, 1000] {
            let torque = f64::from(tenths) / 10.0;
            cmd.set_torque(torque);

            let data = cmd.record().data();
            let direction = if torque > 0.0 {
                SteeringDirection::Left
            } else {
                SteeringDirection::Right
            };
            assert_eq!(data[1], u8::from(direction), "tenths = {tenths}");
            assert_eq!(
                i32::from(be_u16(data[3], data[2])),
                tenths.abs(),
                "tenths = {tenths}"
            );
        }
    }

    #[test]
    fn torque_clamps_to_max() {
        let (scheduler, dispatch) = harness();
        let cmd = SteeringWheelTorqueCmd::new(scheduler, dispatch).unwrap();

        cmd.set_torque(150.0);
        let data = cmd.record().data();
        assert_eq!(be_u16(data[3], data[2]), SteeringWheelTorqueCmd::MAX_TORQUE);

        cmd.set_torque(-9999.0);
        let data = cmd.record().data();
        assert_eq!(data[1], u8::from(SteeringDirection::Right));
        assert_eq!(be_u16(data[3], data[2]), SteeringWheelTorqueCmd::MAX_TORQUE);
    }

    #[test]
    fn throttle_clamps_and_encodes_twos_complement() {
        let (scheduler, dispatch) = harness();
        let cmd = VehicleMoveCmd::new(scheduler, dispatch).unwrap();

        cmd.set_throttle(150.0);
        let data = cmd.record().data();
        assert_eq!(be_u16(data[2], data[1]), 1000);

        cmd.set_throttle(-150.0);
        let data = cmd.record().data();
        assert_eq!(
            from_twos_complement(be_u16(data[2], data[1]), 16),
            -1000
        );

        cmd.set_throttle(-2.5);
        let data = cmd.record().data();
        assert_eq!(from_twos_complement(be_u16(data[2], data[1]), 16), -25);
    }

    #[test]
    fn interception_is_a_one_shot() {
        let (scheduler, dispatch) = harness();
        let cmd = VehicleMoveCmd::new(Arc::clone(&scheduler), dispatch).unwrap();

        cmd.interception_on();
        let frames = scheduler.frames_to_send(0.0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data()[0], u8::from(Interception::On));
        assert!(scheduler.frames_to_send(1.0).is_empty());
    }

    #[test]
    fn launcher_fields_do_not_clobber_each_other_on_the_wire() {
        let (scheduler, dispatch) = harness();
        let cmd = LauncherCmd::new(Arc::clone(&scheduler), dispatch).unwrap();

        cmd.emergency_stop_on();
        let frames = scheduler.frames_to_send(0.0);
        let data = frames[0].data();

        // Every sibling field says don't-change
        assert_eq!(data[0], u8::from(LauncherMode::DontChange));
        assert_eq!(data[1], u8::from(Toggle::DontChange));
        assert_eq!(data[2], u8::from(Toggle::On));
        assert_eq!(data[3], u8::from(Toggle::DontChange));
    }

    #[test]
    fn turn_signal_values() {
        let (scheduler, dispatch) = harness();
        let cmd = TurnSignalsCmd::new(Arc::clone(&scheduler), dispatch).unwrap();

        cmd.left_signal();
        cmd.right_signal();
        cmd.emergency_signals();
        cmd.turn_off_signals();

        let frames = scheduler.frames_to_send(0.0);
        let mut signals: Vec<u8> = frames.iter().map(|f| f.data()[0]).collect();
        signals.sort_unstable();

        assert_eq!(signals, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn info_configuration_delay_encoding() {
        assert_eq!(InfoConfigurationCmd::encode_delay(0.0), 0);
        assert_eq!(InfoConfigurationCmd::encode_delay(0.005), 1); // floored to 10 ms
        assert_eq!(InfoConfigurationCmd::encode_delay(0.5), 50);
        assert_eq!(InfoConfigurationCmd::encode_delay(1.0 / 80.0), 1);
        assert_eq!(InfoConfigurationCmd::encode_delay(10.0), 250); // capped at 2500 ms
    }

    #[test]
    fn info_configuration_frame_layout() {
        let (scheduler, dispatch) = harness();
        let cmd = InfoConfigurationCmd::new(Arc::clone(&scheduler), dispatch).unwrap();

        cmd.set_reply_delay(0x7F6, 0.5);
        let frames = scheduler.frames_to_send(0.0);
        let data = frames[0].data();

        assert_eq!(be_u16(data[0], data[1]), 0x7F6);
        assert_eq!(data[2], 50);
        assert_eq!(data[3], u8::from(InfoModuleCommand::SetDelay));
    }
}
