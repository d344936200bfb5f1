//! Protocol core for the OSCAR drive-by-wire vehicle platform.
//!
//! Everything here operates on byte buffers and timestamps; the physical CAN
//! transceiver lives outside this crate. A transport layer polls
//! [`OscarProtocol::raw_frames_to_send`] on its send tick and feeds inbound
//! buffers to [`OscarProtocol::update_data_from_raw`], while a control loop
//! calls the command/query methods from its own thread.

mod codec;
mod command;
mod frame;
mod info;
mod protocol;
mod record;
mod schedule;

// id(2) + cnc + kind + data(4) + state + crc
pub const FRAME_SIZE: usize = 10;
pub const FRAME_DATA_SIZE: usize = 4;

/// Byte count covered by the trailing CRC (everything before it).
pub const FRAME_CRC_OFFSET: usize = FRAME_SIZE - 1;

/// Rolling sequence counter upper bound; the next increment wraps to 0x00.
pub const CNC_MAX: u8 = 0xFE;
/// Sequence counter value meaning "not cycling".
pub const CNC_UNSET: u8 = 0xFF;

pub use codec::{crc8, from_twos_complement, to_twos_complement};
pub use command::*;
pub use frame::*;
pub use info::*;
pub use protocol::*;
pub use record::*;
pub use schedule::*;

pub use embedded_can::StandardId;
