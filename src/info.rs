use std::sync::Arc;

use num_enum::{FromPrimitive, IntoPrimitive};

use crate::{
    codec::{be_u16, unpack_mode_field},
    command::Toggle,
    frame::{FrameKind, ModuleState},
    from_twos_complement,
    record::{ProtocolError, Record},
    schedule::{ReceiveDispatch, SendScheduler},
};

/* Info CAN identifiers, protocol version 2 */

pub const STEERING_WHEEL_POSE_VELOCITY_INFO_V2: u16 = 0x25;
pub const STEERING_WHEEL_EPS_TORQUE_INFO_V2: u16 = 0x260;
pub const VEHICLE_SPEED_INFO_V2: u16 = 0xB4;
pub const VEHICLE_WHEELS_SPEED_INFO_V2: u16 = 0xAA;
pub const LAUNCHER_INFO_V2: u16 = 0x7F6;

/// Vehicle control mode as reported by the launcher module. Info-side
/// numbering; the command side encodes manual as 0x03.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum VehicleMode {
    #[default]
    Unknown = 0x00,
    Auto = 0x01,
    Manual = 0x02,
    RadioJoy = 0x03,
}

/// Which actor last changed a launcher-reported field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ModeSource {
    #[default]
    Unknown = 0x00,
    Vehicle = 0x01,
    Button = 0x02,
    Remote = 0x03,
    Auto = 0x04,
    Cmd = 0x05,
}

/// Launcher status: mode @0 and LED @1 plus the emergency-stop @2 and
/// hand-brake @3 fields that share its CAN identifier. The mode, stop and
/// brake bytes pack a 3-bit state with a 3-bit source.
pub struct LauncherInfo {
    record: Arc<Record>,
}

impl LauncherInfo {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                LAUNCHER_INFO_V2,
                FrameKind::Info,
                ModuleState::Unknown,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn mode(&self) -> (VehicleMode, ModeSource) {
        let (mode, source) = unpack_mode_field(self.record.data()[0]);
        (VehicleMode::from(mode), ModeSource::from(source))
    }

    pub fn led_on(&self) -> bool {
        Toggle::from(self.record.data()[1]) == Toggle::On
    }

    pub fn emergency_stop(&self) -> (Toggle, ModeSource) {
        let (state, source) = unpack_mode_field(self.record.data()[2]);
        (Toggle::from(state), ModeSource::from(source))
    }

    pub fn hand_brake(&self) -> (Toggle, ModeSource) {
        let (state, source) = unpack_mode_field(self.record.data()[3]);
        (Toggle::from(state), ModeSource::from(source))
    }
}

/// Vehicle speed report: encoder tick byte @1, speed hi/lo @2-3 in
/// hundredths of km/h.
pub struct VehicleSpeedInfo {
    record: Arc<Record>,
}

impl VehicleSpeedInfo {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                VEHICLE_SPEED_INFO_V2,
                FrameKind::Info,
                ModuleState::Unknown,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    /// Speed in m/s.
    pub fn speed(&self) -> f64 {
        let data = self.record.data();
        f64::from(be_u16(data[2], data[3])) / 3.6 / 100.0
    }

    /// Raw drive-shaft encoder byte: 6-8 wheel turns per 256 ticks, only
    /// meaningful above a minimum speed.
    pub fn encoder(&self) -> u8 {
        self.record.data()[1]
    }
}

/// Wheel speed report. The 4-byte data window carries one axle pair
/// (front-right hi/lo @0-1, front-left hi/lo @2-3); the rear pair of the
/// query mirrors the front.
pub struct VehicleWheelsSpeedInfo {
    record: Arc<Record>,
}

impl VehicleWheelsSpeedInfo {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                VEHICLE_WHEELS_SPEED_INFO_V2,
                FrameKind::Info,
                ModuleState::Unknown,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    /// Per-wheel speed in m/s, ordered (fr, fl, rr, rl).
    pub fn wheels_speed(&self) -> (f64, f64, f64, f64) {
        let data = self.record.data();
        let fr = wheel_speed(be_u16(data[0], data[1]));
        let fl = wheel_speed(be_u16(data[2], data[3]));

        (fr, fl, fr, fl)
    }
}

fn wheel_speed(raw: u16) -> f64 {
    (f64::from(raw) * 0.01 - 67.67) / 3.6
}

/// Steering wheel pose: 12-bit two's-complement angle @0-1 (1.5 units per
/// LSB) and 12-bit velocity @2-3; the top nibble of byte 2 carries the
/// fractional angle in tenths.
pub struct SteeringWheelPoseVelocityInfo {
    record: Arc<Record>,
}

impl SteeringWheelPoseVelocityInfo {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                STEERING_WHEEL_POSE_VELOCITY_INFO_V2,
                FrameKind::Info,
                ModuleState::Unknown,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn angle(&self) -> f64 {
        let data = self.record.data();
        decode_angle(&data)
    }

    pub fn velocity(&self) -> f64 {
        let data = self.record.data();
        decode_velocity(&data)
    }

    /// Both values from a single snapshot of the data bytes.
    pub fn angle_and_velocity(&self) -> (f64, f64) {
        let data = self.record.data();
        (decode_angle(&data), decode_velocity(&data))
    }

    pub fn fraction(&self) -> f64 {
        let data = self.record.data();
        0.1 * f64::from(from_twos_complement(u16::from(data[2] >> 4), 4))
    }
}

fn decode_angle(data: &[u8; 4]) -> f64 {
    1.5 * f64::from(from_twos_complement(be_u16(data[0] & 0x0F, data[1]), 12))
}

fn decode_velocity(data: &[u8; 4]) -> f64 {
    f64::from(from_twos_complement(be_u16(data[2] & 0x0F, data[3]), 12))
}

/// Driver and EPS torque report: 16-bit two's-complement driver torque
/// @0-1, EPS assist torque @2-3 scaled by 0.73.
pub struct SteeringWheelEpsTorquesInfo {
    record: Arc<Record>,
}

impl SteeringWheelEpsTorquesInfo {
    pub(crate) fn new(
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            record: Record::new(
                STEERING_WHEEL_EPS_TORQUE_INFO_V2,
                FrameKind::Info,
                ModuleState::Unknown,
                scheduler,
                dispatch,
            )?,
        })
    }

    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn steering_wheel_torque(&self) -> f64 {
        let data = self.record.data();
        f64::from(from_twos_complement(be_u16(data[0], data[1]), 16))
    }

    pub fn eps_torque(&self) -> f64 {
        let data = self.record.data();
        0.73 * f64::from(from_twos_complement(be_u16(data[2], data[3]), 16))
    }

    pub fn torques(&self) -> (f64, f64) {
        let data = self.record.data();
        (
            f64::from(from_twos_complement(be_u16(data[0], data[1]), 16)),
            0.73 * f64::from(from_twos_complement(be_u16(data[2], data[3]), 16)),
        )
    }
}
