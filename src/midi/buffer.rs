//! Time-ordered MIDI event buffers.

use super::event::MidiEvent;
use crate::ring::PlaybackBuffer;
use tracing::warn;

/// Anything MIDI events can be delivered into: the per-track event ring on
/// the butler side, or the process-cycle destination buffer on the RT side.
pub trait EventSink {
    /// Deliver one event. Returns false when the sink is full.
    fn push(&mut self, ev: MidiEvent) -> bool;
}

/// Fixed-capacity destination buffer for one process cycle.
///
/// Capacity is reserved up front; pushing past it drops the event and
/// counts it instead of reallocating, so the type is safe to fill from the
/// realtime thread.
#[derive(Debug)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    dropped: usize,
}

impl MidiBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            dropped: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Events dropped because the cycle buffer was full.
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }
}

impl EventSink for MidiBuffer {
    #[inline]
    fn push(&mut self, ev: MidiEvent) -> bool {
        if self.events.len() < self.events.capacity() {
            self.events.push(ev);
            true
        } else {
            self.dropped += 1;
            false
        }
    }
}

/// SPSC ring of time-ordered MIDI events between butler and RT thread.
///
/// The butler appends events in playback order; the RT side consumes them
/// through half-open time windows. Same producer/consumer discipline as the
/// audio rings.
pub struct MidiRing {
    ring: PlaybackBuffer<MidiEvent>,
}

impl MidiRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: PlaybackBuffer::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn read_space(&self) -> usize {
        self.ring.read_space()
    }

    #[inline]
    pub fn write_space(&self) -> usize {
        self.ring.write_space()
    }

    /// Append one event. Events must arrive in playback order.
    pub fn write(&self, ev: MidiEvent) -> bool {
        self.ring.write(std::slice::from_ref(&ev)) == 1
    }

    /// Timestamp of the next unconsumed event.
    pub fn peek_time(&self) -> Option<i64> {
        let mut ev = [MidiEvent::default()];
        if self.ring.peek(&mut ev, 0) == 1 {
            Some(ev[0].time)
        } else {
            None
        }
    }

    /// Drop events stamped before `time`. Returns how many were discarded.
    pub fn skip_to(&self, time: i64) -> usize {
        let mut skipped = 0;
        while let Some(t) = self.peek_time() {
            if t >= time {
                break;
            }
            self.ring.increment_read_ptr(1);
            skipped += 1;
        }
        if skipped > 0 {
            warn!(skipped, time, "skipped stale MIDI events");
        }
        skipped
    }

    /// Consume events in `[start, end)` into `dst`, restamping them
    /// relative to the window: an event at `start` lands at `rebase`.
    ///
    /// Events found before `start` are consumed and dropped (the caller is
    /// expected to have `skip_to`'d first). Returns the number delivered.
    pub fn read_into(
        &self,
        dst: &mut dyn EventSink,
        start: i64,
        end: i64,
        rebase: i64,
    ) -> usize {
        let mut delivered = 0;
        let mut stale = 0;
        let mut ev = [MidiEvent::default()];

        while self.ring.peek(&mut ev, 0) == 1 {
            let t = ev[0].time;
            if t >= end {
                break;
            }
            self.ring.increment_read_ptr(1);
            if t < start {
                stale += 1;
                continue;
            }
            if !dst.push(ev[0].with_time(rebase + (t - start))) {
                break;
            }
            delivered += 1;
        }

        if stale > 0 {
            warn!(stale, start, "dropped MIDI events behind the read window");
        }
        delivered
    }

    /// Consume events inside `[start, end)`, stopping at the first event
    /// outside the window without discarding it.
    ///
    /// Used for loop playback, where ring order is playback order but
    /// timestamps wrap: an event stamped before `start` belongs to a later
    /// lap and must stay buffered. Restamps like
    /// [`read_into`](MidiRing::read_into).
    pub fn read_window(
        &self,
        dst: &mut dyn EventSink,
        start: i64,
        end: i64,
        rebase: i64,
    ) -> usize {
        let mut delivered = 0;
        let mut ev = [MidiEvent::default()];

        while self.ring.peek(&mut ev, 0) == 1 {
            let t = ev[0].time;
            if t < start || t >= end {
                break;
            }
            self.ring.increment_read_ptr(1);
            if !dst.push(ev[0].with_time(rebase + (t - start))) {
                break;
            }
            delivered += 1;
        }
        delivered
    }

    /// Discard everything buffered. Butler-side, with the RT reader parked.
    pub fn reset(&self) {
        self.ring.reset();
    }
}
