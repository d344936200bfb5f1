use std::collections::{hash_map::Entry, HashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    codec::be_u16,
    frame::Frame,
    record::{ProtocolError, Record, SendMode},
    FRAME_SIZE,
};

/// Tracks the records that must be transmitted and decides at each poll
/// which are due.
///
/// The registration table lock is distinct from the per-record wire/state
/// locks: registration and payload mutation are independent concerns, and
/// serialization happens after the table lock is released. Ordering across
/// several due records within one poll follows map iteration order and is
/// deliberately unspecified.
pub struct SendScheduler {
    entries: Mutex<HashMap<u64, Arc<Record>>>,
    identifier_counter: AtomicU64,
}

impl SendScheduler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            identifier_counter: AtomicU64::new(0),
        })
    }

    /// Issues a unique internal identifier; every record and every one-shot
    /// copy gets its own.
    pub(crate) fn allocate_identifier(&self) -> u64 {
        self.identifier_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, record: Arc<Record>) {
        self.entries.lock().insert(record.identifier(), record);
    }

    pub(crate) fn unregister(&self, identifier: u64) {
        self.entries.lock().remove(&identifier);
    }

    pub(crate) fn is_registered(&self, identifier: u64) -> bool {
        self.entries.lock().contains_key(&identifier)
    }

    /// Serializes every due record. Periodic entries are re-armed one period
    /// ahead of `now` and their sequence counter advances; one-shot entries
    /// are dropped after inclusion.
    pub fn frames_to_send(&self, now: f64) -> Vec<Frame> {
        let due: Vec<Arc<Record>> = {
            let entries = self.entries.lock();
            entries
                .values()
                .filter(|record| record.send_due(now))
                .cloned()
                .collect()
        };

        let mut frames = Vec::with_capacity(due.len());

        for record in due {
            frames.push(record.raw());

            match record.send_mode() {
                SendMode::Periodic => {
                    record.rearm(now);
                    record.increment_cnc();
                }
                SendMode::Once => self.unregister(record.identifier()),
                SendMode::Unregistered => {}
            }
        }

        frames
    }
}

/// Routes inbound raw frames to the record owning their CAN identifier.
///
/// Identifiers are claimed once at record construction, which is what makes
/// a duplicate a fail-fast error; the active entry set then only changes
/// through explicit start/stop receiving calls.
pub struct ReceiveDispatch {
    claimed: Mutex<HashMap<u16, u64>>,
    entries: Mutex<HashMap<u16, Arc<Record>>>,
    strict_crc: bool,
}

impl ReceiveDispatch {
    pub(crate) fn new(strict_crc: bool) -> Arc<Self> {
        Arc::new(Self {
            claimed: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            strict_crc,
        })
    }

    /// Reserves `can_id` for the record with the given internal identifier.
    pub(crate) fn claim(&self, can_id: u16, identifier: u64) -> Result<(), ProtocolError> {
        match self.claimed.lock().entry(can_id) {
            Entry::Occupied(entry) if *entry.get() != identifier => {
                Err(ProtocolError::DuplicateCanId(can_id))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(identifier);
                Ok(())
            }
        }
    }

    pub(crate) fn register(&self, record: Arc<Record>) {
        self.entries.lock().insert(record.can_id(), record);
    }

    pub(crate) fn unregister(&self, can_id: u16) {
        self.entries.lock().remove(&can_id);
    }

    pub(crate) fn is_registered(&self, can_id: u16) -> bool {
        self.entries.lock().contains_key(&can_id)
    }

    /// Routes each buffer by the big-endian CAN id in its first two bytes.
    /// Unknown identifiers are dropped without complaint; unregistered
    /// traffic is expected on a shared bus. A receive time of 0.0 means the
    /// transport had no timestamp for the batch.
    pub fn dispatch<'a>(&self, raws: impl IntoIterator<Item = &'a [u8]>, receive_time: f64) {
        let receive_time = (receive_time != 0.0).then_some(receive_time);

        for raw in raws {
            if raw.len() < 2 {
                tracing::debug!(len = raw.len(), "dropping truncated frame");
                continue;
            }

            let can_id = be_u16(raw[0], raw[1]);
            let record = { self.entries.lock().get(&can_id).cloned() };

            let Some(record) = record else {
                tracing::debug!(can_id, "dropping frame for unregistered CAN id");
                continue;
            };

            if self.strict_crc {
                match Frame::from_bytes(raw) {
                    Ok(frame) if !frame.crc_valid() => {
                        tracing::debug!(can_id, "dropping frame with mismatched CRC");
                        continue;
                    }
                    Err(_) if raw.len() != FRAME_SIZE => {
                        tracing::debug!(can_id, len = raw.len(), "dropping malformed frame");
                        continue;
                    }
                    _ => {}
                }
            }

            record.update_from_raw(raw, receive_time);
        }
    }
}
