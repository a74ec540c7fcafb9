//! Tracking of sounding notes so they can be resolved with note-offs.

use super::buffer::EventSink;
use super::event::MidiEvent;

/// Which notes are currently sounding, per channel.
///
/// A bitmask of channels per note number: fixed size, no allocation, safe
/// to consult and update from the realtime thread.
#[derive(Debug, Clone)]
pub struct NoteTracker {
    channels_for_note: [u16; 128],
}

impl NoteTracker {
    pub fn new() -> Self {
        Self {
            channels_for_note: [0; 128],
        }
    }

    /// Update the tracker from one delivered event.
    pub fn track(&mut self, ev: &MidiEvent) {
        let Some(note) = ev.note() else { return };
        let bit = 1u16 << ev.channel_num();
        if ev.is_note_on() {
            self.channels_for_note[note as usize] |= bit;
        } else if ev.is_note_off() {
            self.channels_for_note[note as usize] &= !bit;
        }
    }

    /// Number of notes currently sounding.
    pub fn in_count(&self) -> usize {
        self.channels_for_note
            .iter()
            .map(|m| m.count_ones() as usize)
            .sum()
    }

    /// Emit a note-off at `time` for every sounding note, clearing the
    /// tracker. Returns how many were emitted.
    pub fn resolve(&mut self, dst: &mut dyn EventSink, time: i64) -> usize {
        let mut emitted = 0;
        for (note, mask) in self.channels_for_note.iter_mut().enumerate() {
            let mut m = *mask;
            while m != 0 {
                let channel = m.trailing_zeros() as u8;
                m &= m - 1;
                if dst.push(MidiEvent::note_off(time, channel, note as u8, 64)) {
                    emitted += 1;
                }
            }
            *mask = 0;
        }
        emitted
    }

    pub fn reset(&mut self) {
        self.channels_for_note = [0; 128];
    }
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new()
    }
}
