use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    codec::{be_u16, crc8},
    FRAME_CRC_OFFSET, FRAME_DATA_SIZE, FRAME_SIZE,
};

/// Errors which can arise while interpreting a raw OSCAR frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Received a buffer of {0} bytes (OSCAR frames are exactly 10 bytes)")]
    Length(usize),
    #[error("Tried to decode frame kind but it was invalid ({0:?})")]
    InvalidKind(u8),
    #[error("Tried to decode module state but it was invalid ({0:?})")]
    InvalidState(u8),
}

/// Message class carried in byte 3 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[num_enum(error_type(name = FrameError, constructor = FrameError::InvalidKind))]
#[repr(u8)]
pub enum FrameKind {
    Info = 0x01,
    Cmd = 0x02,
    Ack = 0x03,
}

/// Coarse health/activity flag carried in byte 8 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[num_enum(error_type(name = FrameError, constructor = FrameError::InvalidState))]
#[repr(u8)]
pub enum ModuleState {
    #[default]
    Unknown = 0x00,
    WorkingActive = 0x01,
    WorkingInactive = 0x02,
    Error = 0x03,
    Debug = 0x04,
}

/// One 10-byte OSCAR wire message:
///
/// ```text
/// offset 0-1: CAN identifier, big-endian u16
/// offset 2  : sequence ("cnc") byte, 0x00-0xFE rolling or 0xFF unset
/// offset 3  : kind byte (0x01 Info, 0x02 Cmd, 0x03 Ack)
/// offset 4-7: data (4 bytes, message-type-specific)
/// offset 8  : module state byte
/// offset 9  : CRC8 over offsets 0-8
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl From<[u8; FRAME_SIZE]> for Frame {
    fn from(bytes: [u8; FRAME_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Frame {
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, FrameError> {
        let bytes: [u8; FRAME_SIZE] = buffer
            .try_into()
            .map_err(|_| FrameError::Length(buffer.len()))?;

        Ok(Self(bytes))
    }

    pub fn can_id(&self) -> u16 {
        be_u16(self.0[0], self.0[1])
    }

    pub fn cnc(&self) -> u8 {
        self.0[2]
    }

    pub fn kind(&self) -> Result<FrameKind, FrameError> {
        self.0[3].try_into()
    }

    pub fn kind_byte(&self) -> u8 {
        self.0[3]
    }

    /// The 4 message-type-specific data bytes.
    pub fn data(&self) -> &[u8; FRAME_DATA_SIZE] {
        let [_, _, _, _, data @ .., _, _] = &self.0;
        data
    }

    pub fn state(&self) -> Result<ModuleState, FrameError> {
        self.0[8].try_into()
    }

    pub fn state_byte(&self) -> u8 {
        self.0[8]
    }

    pub fn crc(&self) -> u8 {
        self.0[FRAME_CRC_OFFSET]
    }

    /// Whether the trailing CRC byte matches a CRC8 over the first nine
    /// bytes. Never checked on the receive path unless strict mode is on.
    pub fn crc_valid(&self) -> bool {
        crc8(&self.0[..FRAME_CRC_OFFSET]) == self.crc()
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc8;

    fn sample() -> [u8; FRAME_SIZE] {
        let mut bytes = [0x07, 0xF9, 0xFF, 0x02, 0x00, 0x02, 0x7B, 0x00, 0x01, 0x00];
        bytes[9] = crc8(&bytes[..9]);
        bytes
    }

    #[test]
    fn accessors() {
        let frame = Frame::from(sample());

        assert_eq!(frame.can_id(), 0x7F9);
        assert_eq!(frame.cnc(), 0xFF);
        assert_eq!(frame.kind(), Ok(FrameKind::Cmd));
        assert_eq!(frame.data(), &[0x00, 0x02, 0x7B, 0x00]);
        assert_eq!(frame.state(), Ok(ModuleState::WorkingActive));
        assert!(frame.crc_valid());
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            Frame::from_bytes(&[0u8; 8]),
            Err(FrameError::Length(8))
        );
        assert_eq!(
            Frame::from_bytes(&[0u8; 11]),
            Err(FrameError::Length(11))
        );
    }

    #[test]
    fn invalid_kind_and_state() {
        let mut bytes = sample();
        bytes[3] = 0x09;
        bytes[8] = 0x7F;

        let frame = Frame::from(bytes);

        assert_eq!(frame.kind(), Err(FrameError::InvalidKind(0x09)));
        assert_eq!(frame.state(), Err(FrameError::InvalidState(0x7F)));
    }

    #[test]
    fn crc_mismatch_detected() {
        let mut bytes = sample();
        bytes[6] ^= 0xFF;

        assert!(!Frame::from(bytes).crc_valid());
    }
}
