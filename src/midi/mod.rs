//! MIDI event types, ring buffer and note tracking.

mod buffer;
mod event;
mod tracker;

pub use buffer::{EventSink, MidiBuffer, MidiRing};
pub use event::MidiEvent;
pub use tracker::NoteTracker;
