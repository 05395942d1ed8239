//! Double-buffered frame handoff
//!
//! Two fixed slots and a ready index. The producer always writes into the
//! slot that is *not* ready, then publishes it by swapping the index under a
//! mutex. Consumers read the index under the same mutex and then read the
//! slot contents without any lock.
//!
//! Slot contents are only protected by alternation: a slot published at
//! sequence `n` is not written again before sequence `n + 2`. A consumer
//! therefore has one full frame period to finish reading. Slot bytes are
//! atomics so that a consumer violating that window reads mixed frames
//! instead of racing.

use crate::signal::lock;
use crate::FRAME_BYTES;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// Number of buffer slots
pub const SLOT_COUNT: usize = 2;

/// Fixed storage for one encoded frame
#[derive(Debug)]
pub struct Slot {
    bytes: Box<[AtomicU8]>,
}

impl Slot {
    fn new() -> Self {
        Self {
            bytes: (0..FRAME_BYTES).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Overwrite the slot with `frame`
    pub fn store(&self, frame: &[u8; FRAME_BYTES]) {
        for (cell, &b) in self.bytes.iter().zip(frame.iter()) {
            cell.store(b, Ordering::Relaxed);
        }
    }

    /// Copy the slot into `out`
    pub fn load(&self, out: &mut [u8; FRAME_BYTES]) {
        for (b, cell) in out.iter_mut().zip(self.bytes.iter()) {
            *b = cell.load(Ordering::Relaxed);
        }
    }
}

/// Slot and publish sequence of the most recently completed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyFrame {
    /// Slot index holding the frame
    pub slot: usize,
    /// Publish sequence number, 1 for the first frame
    pub sequence: u64,
}

#[derive(Debug)]
struct ReadyIndex {
    slot: usize,
    sequence: u64,
}

/// Two-slot exchange between one producer and any number of readers
#[derive(Debug)]
pub struct FrameExchange {
    slots: [Slot; SLOT_COUNT],
    ready: Mutex<ReadyIndex>,
}

impl FrameExchange {
    /// Create an exchange with nothing published yet
    ///
    /// Slot 1 is nominally ready so the first frame is written into slot 0.
    pub fn new() -> Self {
        Self {
            slots: [Slot::new(), Slot::new()],
            ready: Mutex::new(ReadyIndex {
                slot: 1,
                sequence: 0,
            }),
        }
    }

    /// Slot the producer may write next (never the ready one)
    pub fn write_slot(&self) -> usize {
        let ready = lock(&self.ready, "exchange");
        (ready.slot + 1) % SLOT_COUNT
    }

    /// Borrow a slot by index
    ///
    /// # Panics
    /// Panics if `index >= SLOT_COUNT`.
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Mark `slot` as the ready frame; returns the new publish sequence
    ///
    /// Only the producer calls this, after it finished writing `slot`.
    pub fn publish(&self, slot: usize) -> u64 {
        debug_assert!(slot < SLOT_COUNT);
        let mut ready = lock(&self.ready, "exchange");
        ready.slot = slot;
        ready.sequence += 1;
        ready.sequence
    }

    /// Most recently published frame, `None` before the first publish
    pub fn current_ready(&self) -> Option<ReadyFrame> {
        let ready = lock(&self.ready, "exchange");
        (ready.sequence > 0).then_some(ReadyFrame {
            slot: ready.slot,
            sequence: ready.sequence,
        })
    }

    /// Write `frame` into the free slot and publish it
    pub fn publish_frame(&self, frame: &[u8; FRAME_BYTES]) -> ReadyFrame {
        let slot = self.write_slot();
        self.slots[slot].store(frame);
        let sequence = self.publish(slot);
        ReadyFrame { slot, sequence }
    }

    /// Copy the ready frame into `out`
    pub fn read_ready(&self, out: &mut [u8; FRAME_BYTES]) -> Option<ReadyFrame> {
        let ready = self.current_ready()?;
        self.slots[ready.slot].load(out);
        Some(ready)
    }
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new()
    }
}
