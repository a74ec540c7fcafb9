//! RT-safe MIDI event with a session-sample timestamp.

use midi_msg::{Channel, ChannelVoiceMsg};

/// A channel voice message stamped with the session sample it occurs at.
///
/// `Copy` and fixed-size so it can live in the lock-free event ring and be
/// moved on the realtime path without allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Absolute session time in samples.
    pub time: i64,
    /// MIDI channel (0-15).
    pub channel: Channel,
    /// The channel voice message.
    pub msg: ChannelVoiceMsg,
}

impl MidiEvent {
    #[inline]
    pub fn new(time: i64, channel: Channel, msg: ChannelVoiceMsg) -> Self {
        Self { time, channel, msg }
    }

    #[inline]
    pub fn note_on(time: i64, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time,
            channel: Channel::from_u8(channel),
            msg: ChannelVoiceMsg::NoteOn { note, velocity },
        }
    }

    #[inline]
    pub fn note_off(time: i64, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time,
            channel: Channel::from_u8(channel),
            msg: ChannelVoiceMsg::NoteOff { note, velocity },
        }
    }

    #[inline]
    pub fn channel_num(&self) -> u8 {
        self.channel as u8
    }

    /// Note-on with a nonzero velocity.
    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.msg, ChannelVoiceMsg::NoteOn { velocity, .. } if velocity > 0)
    }

    /// Note-off, including the running-status note-on-velocity-zero form.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.msg,
            ChannelVoiceMsg::NoteOff { .. } | ChannelVoiceMsg::NoteOn { velocity: 0, .. }
        )
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.msg {
            ChannelVoiceMsg::NoteOn { note, .. }
            | ChannelVoiceMsg::NoteOff { note, .. }
            | ChannelVoiceMsg::PolyPressure { note, .. } => Some(note),
            _ => None,
        }
    }

    /// Same event shifted to a new timestamp.
    #[inline]
    pub fn with_time(&self, time: i64) -> Self {
        Self { time, ..*self }
    }
}

impl Default for MidiEvent {
    fn default() -> Self {
        Self::note_off(0, 0, 0, 0)
    }
}
