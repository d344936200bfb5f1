use std::sync::Arc;

use embedded_can::StandardId;
use parking_lot::Mutex;

use crate::{
    codec::crc8,
    frame::{Frame, FrameKind, ModuleState},
    schedule::{ReceiveDispatch, SendScheduler},
    CNC_MAX, CNC_UNSET, FRAME_CRC_OFFSET, FRAME_DATA_SIZE, FRAME_SIZE,
};

/// Errors raised while assembling the protocol's record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("CAN identifier {0:#05X} is outside the 11-bit standard range")]
    InvalidCanId(u16),
    #[error("CAN identifier {0:#05X} is already claimed by another record")]
    DuplicateCanId(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    #[default]
    Unregistered,
    Once,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveMode {
    #[default]
    Unregistered,
    Once,
    Periodic,
}

/// Live wire state of one record: everything that ends up in the frame
/// besides the fixed identifier and kind bytes.
#[derive(Debug, Clone)]
struct WireState {
    cnc: u8,
    data: [u8; FRAME_DATA_SIZE],
    state: u8,
    crc: u8,
}

#[derive(Debug, Clone)]
struct SendState {
    mode: SendMode,
    rate: f64,
    next_send_time: f64,
    real_rate: f64,
}

#[derive(Debug, Clone, Default)]
struct ReceiveState {
    mode: ReceiveMode,
    configured_rate: Option<f64>,
    real_rate: f64,
    last_time: f64,
}

/// One protocol message's live state: its CAN identifier, rolling sequence
/// counter, 4 data bytes and scheduling metadata.
///
/// Wire state and scheduling state sit behind separate per-record locks so a
/// command setter on one record never blocks a query on another, and no lock
/// is ever held across I/O.
pub struct Record {
    identifier: u64,
    can_id: StandardId,
    kind: FrameKind,
    wire: Mutex<WireState>,
    send: Mutex<SendState>,
    receive: Mutex<ReceiveState>,
    scheduler: Arc<SendScheduler>,
    dispatch: Arc<ReceiveDispatch>,
}

impl Record {
    /// Builds a record bound to its scheduler and dispatch table. Info
    /// records claim their CAN identifier in the dispatch table up front;
    /// a second distinct record claiming the same identifier is a
    /// construction error.
    pub(crate) fn new(
        can_id: u16,
        kind: FrameKind,
        state: ModuleState,
        scheduler: Arc<SendScheduler>,
        dispatch: Arc<ReceiveDispatch>,
    ) -> Result<Arc<Self>, ProtocolError> {
        let standard_id = StandardId::new(can_id).ok_or(ProtocolError::InvalidCanId(can_id))?;
        let identifier = scheduler.allocate_identifier();

        if kind == FrameKind::Info {
            dispatch.claim(can_id, identifier)?;
        }

        Ok(Arc::new(Self {
            identifier,
            can_id: standard_id,
            kind,
            wire: Mutex::new(WireState {
                cnc: CNC_UNSET,
                data: [0; FRAME_DATA_SIZE],
                state: state.into(),
                crc: 0,
            }),
            send: Mutex::new(SendState {
                mode: SendMode::Unregistered,
                rate: -1.0,
                next_send_time: 0.0,
                real_rate: 0.0,
            }),
            receive: Mutex::new(ReceiveState::default()),
            scheduler,
            dispatch,
        }))
    }

    pub fn can_id(&self) -> u16 {
        self.can_id.as_raw()
    }

    pub fn standard_id(&self) -> StandardId {
        self.can_id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub(crate) fn identifier(&self) -> u64 {
        self.identifier
    }

    /* Wire state */

    /// Serializes the current wire state, recomputing the trailing CRC so
    /// the returned frame is always internally consistent.
    pub fn raw(&self) -> Frame {
        let mut bytes = [0u8; FRAME_SIZE];
        let raw_id = self.can_id.as_raw();
        bytes[0] = (raw_id >> 8) as u8;
        bytes[1] = (raw_id & 0x00FF) as u8;
        bytes[3] = self.kind.into();

        let mut wire = self.wire.lock();
        bytes[2] = wire.cnc;
        bytes[4..8].copy_from_slice(&wire.data);
        bytes[8] = wire.state;

        let crc = crc8(&bytes[..FRAME_CRC_OFFSET]);
        wire.crc = crc;
        bytes[FRAME_CRC_OFFSET] = crc;

        Frame::from(bytes)
    }

    /// Overwrites sequence counter, data bytes, state and CRC from an
    /// inbound frame and refreshes the measured receive rate when a
    /// timestamp is supplied. The frame's CRC is stored, not verified.
    pub fn update_from_raw(&self, raw: &[u8], receive_time: Option<f64>) {
        if raw.len() != FRAME_SIZE {
            tracing::debug!(
                can_id = self.can_id(),
                len = raw.len(),
                "dropping frame with unexpected length"
            );
            return;
        }

        if let Some(time) = receive_time {
            let mut receive = self.receive.lock();
            let delay = time - receive.last_time;
            if delay != 0.0 {
                receive.real_rate = 1.0 / delay;
                receive.last_time = time;
            }
        }

        let mut wire = self.wire.lock();
        wire.cnc = raw[2];
        wire.data.copy_from_slice(&raw[4..8]);
        wire.state = raw[8];
        wire.crc = raw[FRAME_CRC_OFFSET];
    }

    /// Snapshot of the 4 data bytes.
    pub fn data(&self) -> [u8; FRAME_DATA_SIZE] {
        self.wire.lock().data
    }

    pub(crate) fn reset_data(&self) {
        self.wire.lock().data = [0; FRAME_DATA_SIZE];
    }

    pub(crate) fn set_data_byte(&self, index: usize, value: u8) {
        self.wire.lock().data[index] = value;
    }

    /// Runs `f` over the data bytes under the wire lock so multi-byte
    /// fields are written atomically with respect to serialization.
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut [u8; FRAME_DATA_SIZE]) -> R) -> R {
        f(&mut self.wire.lock().data)
    }

    pub fn set_state(&self, state: ModuleState) {
        self.wire.lock().state = state.into();
    }

    pub(crate) fn reset_cnc(&self) {
        self.wire.lock().cnc = 0x00;
    }

    pub(crate) fn unset_cnc(&self) {
        self.wire.lock().cnc = CNC_UNSET;
    }

    pub(crate) fn increment_cnc(&self) {
        let mut wire = self.wire.lock();
        wire.cnc = match wire.cnc {
            CNC_UNSET => CNC_UNSET,
            CNC_MAX => 0x00,
            cnc => cnc + 1,
        };
    }

    pub fn cnc(&self) -> u8 {
        self.wire.lock().cnc
    }

    /* Send lifecycle */

    /// Requests one-shot transmission of the current wire state. A copy of
    /// the record with a fresh internal identifier is registered instead of
    /// the record itself, so an active periodic registration is never
    /// disturbed.
    pub fn send_once(self: &Arc<Self>) {
        let copy = self.clone_for_send_once();
        self.scheduler.register(copy);
    }

    /// Value clone with a fresh identifier, registered for exactly one send.
    pub(crate) fn clone_for_send_once(self: &Arc<Self>) -> Arc<Record> {
        let wire = self.wire.lock().clone();

        Arc::new(Record {
            identifier: self.scheduler.allocate_identifier(),
            can_id: self.can_id,
            kind: self.kind,
            wire: Mutex::new(wire),
            send: Mutex::new(SendState {
                mode: SendMode::Once,
                rate: -1.0,
                next_send_time: 0.0,
                real_rate: 0.0,
            }),
            receive: Mutex::new(ReceiveState::default()),
            scheduler: Arc::clone(&self.scheduler),
            dispatch: Arc::clone(&self.dispatch),
        })
    }

    /// Switches to periodic transmission. Fails if no valid send rate has
    /// been set.
    pub fn start_sending(self: &Arc<Self>) -> bool {
        {
            let mut send = self.send.lock();
            if send.rate <= 0.0 {
                return false;
            }
            send.mode = SendMode::Periodic;
        }

        self.reset_cnc();
        self.scheduler.register(Arc::clone(self));
        true
    }

    /// Unregisters from the scheduler; idempotent.
    pub fn stop_sending(&self) {
        self.send.lock().mode = SendMode::Unregistered;
        self.unset_cnc();
        self.scheduler.unregister(self.identifier);
    }

    pub fn set_send_rate(&self, rate: f64) -> bool {
        if rate > 0.0 {
            self.send.lock().rate = rate;
            true
        } else {
            false
        }
    }

    pub fn send_rate(&self) -> f64 {
        self.send.lock().rate
    }

    pub fn real_send_rate(&self) -> f64 {
        self.send.lock().real_rate
    }

    pub fn send_mode(&self) -> SendMode {
        self.send.lock().mode
    }

    pub fn next_send_time(&self) -> f64 {
        self.send.lock().next_send_time
    }

    pub(crate) fn send_due(&self, now: f64) -> bool {
        let send = self.send.lock();
        send.mode != SendMode::Unregistered && send.next_send_time - now <= 0.0
    }

    /// Re-arms a periodic record after a send. The measured rate folds in
    /// how far past (or before) the deadline this poll ran.
    pub(crate) fn rearm(&self, now: f64) {
        let mut send = self.send.lock();
        let time_left = send.next_send_time - now;
        send.next_send_time = now + 1.0 / send.rate;
        send.real_rate = send.rate + time_left;
    }

    /* Receive lifecycle */

    pub fn receive_once(self: &Arc<Self>) {
        self.receive.lock().mode = ReceiveMode::Once;
        self.dispatch.register(Arc::clone(self));
    }

    pub fn start_receiving(self: &Arc<Self>) {
        self.receive.lock().mode = ReceiveMode::Periodic;
        self.dispatch.register(Arc::clone(self));
    }

    pub fn stop_receiving(&self) {
        self.receive.lock().mode = ReceiveMode::Unregistered;
        self.dispatch.unregister(self.can_id());
    }

    pub(crate) fn set_configured_receive_rate(&self, rate: f64) {
        self.receive.lock().configured_rate = Some(rate);
    }

    pub fn configured_receive_rate(&self) -> Option<f64> {
        self.receive.lock().configured_rate
    }

    pub fn receive_mode(&self) -> ReceiveMode {
        self.receive.lock().mode
    }

    /// Rate measured from the spacing of timestamped inbound frames.
    pub fn real_receive_rate(&self) -> f64 {
        self.receive.lock().real_rate
    }

    pub fn last_receive_time(&self) -> f64 {
        self.receive.lock().last_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc8;

    fn record(can_id: u16, kind: FrameKind) -> Arc<Record> {
        Record::new(
            can_id,
            kind,
            ModuleState::WorkingActive,
            SendScheduler::new(),
            ReceiveDispatch::new(false),
        )
        .unwrap()
    }

    #[test]
    fn raw_is_always_crc_consistent() {
        let record = record(0x7F9, FrameKind::Cmd);
        record.set_data_byte(2, 0x7B);

        let frame = record.raw();
        assert_eq!(frame.crc(), crc8(&frame.as_bytes()[..9]));

        record.set_data_byte(3, 0x01);
        let frame = record.raw();
        assert_eq!(frame.crc(), crc8(&frame.as_bytes()[..9]));
        assert!(frame.crc_valid());
    }

    #[test]
    fn raw_layout() {
        let record = record(0x7F9, FrameKind::Cmd);

        let bytes = record.raw().as_bytes().to_owned();
        assert_eq!(bytes[0], 0x07);
        assert_eq!(bytes[1], 0xF9);
        assert_eq!(bytes[2], CNC_UNSET);
        assert_eq!(bytes[3], 0x02);
        assert_eq!(bytes[8], 0x01);
    }

    #[test]
    fn update_from_raw_overwrites_wire_state() {
        let record = record(0xB4, FrameKind::Info);

        let mut raw = [0u8; FRAME_SIZE];
        raw[0] = 0x00;
        raw[1] = 0xB4;
        raw[2] = 0x12;
        raw[3] = 0x01;
        raw[4..8].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        raw[8] = 0x02;
        raw[9] = crc8(&raw[..9]);

        record.update_from_raw(&raw, Some(1.0));

        assert_eq!(record.cnc(), 0x12);
        assert_eq!(record.data(), [0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(record.last_receive_time(), 1.0);
    }

    #[test]
    fn update_from_raw_measures_receive_rate() {
        let record = record(0xB4, FrameKind::Info);
        let raw = [0u8; FRAME_SIZE];

        record.update_from_raw(&raw, Some(10.0));
        record.update_from_raw(&raw, Some(10.5));

        assert!((record.real_receive_rate() - 2.0).abs() < 1e-9);
        assert_eq!(record.last_receive_time(), 10.5);

        // Same timestamp twice leaves the measurement untouched
        record.update_from_raw(&raw, Some(10.5));
        assert!((record.real_receive_rate() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn short_buffers_are_ignored() {
        let record = record(0xB4, FrameKind::Info);
        record.update_from_raw(&[0x00, 0xB4, 0x01], Some(1.0));

        assert_eq!(record.data(), [0; FRAME_DATA_SIZE]);
        assert_eq!(record.last_receive_time(), 0.0);
    }

    #[test]
    fn cnc_wraps_at_fe() {
        let record = record(0x7F9, FrameKind::Cmd);

        record.reset_cnc();
        for _ in 0..=u32::from(CNC_MAX) {
            record.increment_cnc();
        }

        // 0x00 -> 0xFE then one more wraps around
        assert_eq!(record.cnc(), 0x00);
    }

    #[test]
    fn unset_cnc_stays_unset() {
        let record = record(0x7F9, FrameKind::Cmd);

        assert_eq!(record.cnc(), CNC_UNSET);
        record.increment_cnc();
        assert_eq!(record.cnc(), CNC_UNSET);
    }

    #[test]
    fn send_rate_validation() {
        let record = record(0x7F9, FrameKind::Cmd);

        assert!(!record.set_send_rate(0.0));
        assert!(!record.set_send_rate(-5.0));
        assert!(!record.start_sending());

        assert!(record.set_send_rate(60.0));
        assert!(record.start_sending());
        assert_eq!(record.send_mode(), SendMode::Periodic);
    }

    #[test]
    fn duplicate_info_can_id_fails_fast() {
        let scheduler = SendScheduler::new();
        let dispatch = ReceiveDispatch::new(false);

        let _first = Record::new(
            0xB4,
            FrameKind::Info,
            ModuleState::Unknown,
            Arc::clone(&scheduler),
            Arc::clone(&dispatch),
        )
        .unwrap();

        let second = Record::new(
            0xB4,
            FrameKind::Info,
            ModuleState::Unknown,
            scheduler,
            dispatch,
        );

        assert_eq!(second.err(), Some(ProtocolError::DuplicateCanId(0xB4)));
    }

    #[test]
    fn invalid_can_id_rejected() {
        let result = Record::new(
            0x800,
            FrameKind::Cmd,
            ModuleState::Unknown,
            SendScheduler::new(),
            ReceiveDispatch::new(false),
        );

        assert_eq!(result.err(), Some(ProtocolError::InvalidCanId(0x800)));
    }
}
