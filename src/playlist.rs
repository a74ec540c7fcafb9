//! Collaborator contracts: playlists, monitoring, loop locations.
//!
//! The engine never owns audio or MIDI content. Region resolution, codecs
//! and caching live behind these traits and are injected per track.

use crate::error::Result;
use crate::midi::{EventSink, NoteTracker};
use serde::{Deserialize, Serialize};

/// Source of audio material, addressed in session samples.
pub trait AudioPlaylist: Send + Sync {
    /// Fill `dst` with samples of `channel` starting at `pos`. Returns the
    /// number of samples produced, short only at the edges of the material.
    fn read(&self, dst: &mut [f32], pos: i64, channel: usize) -> Result<usize>;

    /// One past the last sample of material.
    fn length(&self) -> i64;
}

/// Source of MIDI material, addressed in session samples.
pub trait MidiPlaylist: Send + Sync {
    /// Deliver events placed within the timeline window
    /// `[start, start + n)` into `dst` in playback order, updating
    /// `tracker` with every note on/off delivered. With `loop_range` set,
    /// event timestamps are emitted wrapped into the loop, so laps past the
    /// first replay the loop's content. Returns the number of events
    /// delivered.
    fn read(
        &self,
        dst: &mut dyn EventSink,
        start: i64,
        n: i64,
        loop_range: Option<LoopSpan>,
        tracker: &mut NoteTracker,
    ) -> Result<usize>;

    /// One past the last event of material.
    fn length(&self) -> i64;
}

/// Which signal sources are audible on a track's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonitorState(u8);

impl MonitorState {
    pub const OFF: MonitorState = MonitorState(0);
    pub const DISK: MonitorState = MonitorState(1);
    pub const INPUT: MonitorState = MonitorState(2);

    #[inline]
    pub fn disk(&self) -> bool {
        self.0 & Self::DISK.0 != 0
    }

    #[inline]
    pub fn input(&self) -> bool {
        self.0 & Self::INPUT.0 != 0
    }
}

impl std::ops::BitOr for MonitorState {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        MonitorState(self.0 | rhs.0)
    }
}

/// A loop location, half-open `[start, end)` in session samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpan {
    pub start: i64,
    pub end: i64,
}

impl LoopSpan {
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(end > start);
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Map an arbitrary position into the loop by wrapping anything at or
    /// past the end back into `[start, end)`.
    pub fn squish(&self, pos: i64) -> i64 {
        if pos >= self.end {
            self.start + (pos - self.start) % self.len()
        } else {
            pos
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_state_flags() {
        let both = MonitorState::DISK | MonitorState::INPUT;
        assert!(both.disk());
        assert!(both.input());
        assert!(!MonitorState::OFF.disk());
        assert!(MonitorState::DISK.disk());
        assert!(!MonitorState::DISK.input());
    }

    #[test]
    fn test_squish() {
        let lp = LoopSpan::new(100, 200);
        assert_eq!(lp.squish(150), 150);
        assert_eq!(lp.squish(200), 100);
        assert_eq!(lp.squish(250), 150);
        assert_eq!(lp.squish(300), 100);
        // Positions before the loop are left alone
        assert_eq!(lp.squish(50), 50);
    }

    #[test]
    fn test_span_len() {
        assert_eq!(LoopSpan::new(0, 1000).len(), 1000);
        assert!(!LoopSpan::new(0, 1000).is_empty());
    }
}
