//! Lock-free log of validated endstop edges.
//!
//! The timer interrupt produces, the foreground consumes.  Each entry is
//! packed into one `AtomicU32` so a slot is always written whole.
//!
//! ```text
//!  bit 31      bits 24..=30     bits 0..=23
//! ┌────────┬──────────────────┬──────────────┐
//! │ rising │ EndstopId index  │ tick (wraps) │
//! └────────┴──────────────────┴──────────────┘
//! ```

use core::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering};

use super::EndstopId;

/// Maximum number of pending transitions.
/// Power of 2 for efficient ring buffer modulo.
pub const TRANSITION_LOG_CAP: usize = 32;

const TICK_MASK: u32 = 0x00FF_FFFF;

/// One validated level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub id: EndstopId,
    pub rising: bool,
    /// Detector period counter, truncated to 24 bits.
    pub tick: u32,
}

impl Transition {
    fn pack(self) -> u32 {
        (u32::from(self.rising) << 31) | ((self.id as u32) << 24) | (self.tick & TICK_MASK)
    }

    fn unpack(raw: u32) -> Option<Self> {
        let id = EndstopId::from_index(((raw >> 24) & 0x7F) as u8)?;
        Some(Self {
            id,
            rising: raw >> 31 == 1,
            tick: raw & TICK_MASK,
        })
    }
}

// ── SPSC ring ─────────────────────────────────────────────────

pub struct TransitionLog {
    head: AtomicU8,
    tail: AtomicU8,
    dropped: AtomicU16,
    slots: [AtomicU32; TRANSITION_LOG_CAP],
}

impl TransitionLog {
    pub const fn new() -> Self {
        Self {
            head: AtomicU8::new(0),
            tail: AtomicU8::new(0),
            dropped: AtomicU16::new(0),
            slots: [const { AtomicU32::new(0) }; TRANSITION_LOG_CAP],
        }
    }

    /// Producer side.  Returns `false` if the ring is full (entry dropped).
    pub fn push(&self, id: EndstopId, rising: bool, tick: u32) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let next_head = (head + 1) % TRANSITION_LOG_CAP as u8;

        if next_head == tail {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.slots[head as usize].store(Transition { id, rising, tick }.pack(), Ordering::Relaxed);
        self.head.store(next_head, Ordering::Release);
        true
    }

    /// Consumer side.  Returns `None` when empty.
    pub fn pop(&self) -> Option<Transition> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let head = self.head.load(Ordering::Acquire);

            if tail == head {
                return None;
            }

            let raw = self.slots[tail as usize].load(Ordering::Relaxed);
            self.tail.store((tail + 1) % TRANSITION_LOG_CAP as u8, Ordering::Release);

            if let Some(t) = Transition::unpack(raw) {
                return Some(t);
            }
        }
    }

    /// Drain all pending transitions in FIFO order.
    pub fn drain(&self, mut handler: impl FnMut(Transition)) {
        while let Some(t) = self.pop() {
            handler(t);
        }
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed) as usize;
        let tail = self.tail.load(Ordering::Relaxed) as usize;
        (head + TRANSITION_LOG_CAP - tail) % TRANSITION_LOG_CAP
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries lost because the consumer fell behind.
    pub fn dropped(&self) -> u16 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new()
    }
}
