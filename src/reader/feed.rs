//! Butler half of the disk reader: refill, seek and overwrite.

use super::shared::ReaderShared;
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::midi::{EventSink, MidiEvent, MidiRing, NoteTracker};
use crate::playlist::{AudioPlaylist, MidiPlaylist};
use crate::ring::PlaybackBuffer;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Whether a refill pass left work behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// The buffers are as full as this pass will make them.
    Done,
    /// Another pass would move at least a chunk more.
    MoreWork,
}

thread_local! {
    // Refill scratch, reused across tracks on the thread doing the I/O.
    static REFILL_SCRATCH: RefCell<Vec<f32>> = const { RefCell::new(Vec::new()) };
}

/// Adapts the MIDI event ring to the playlist's event sink argument.
struct RingSink<'a>(&'a MidiRing);

impl EventSink for RingSink<'_> {
    fn push(&mut self, ev: MidiEvent) -> bool {
        self.0.write(ev)
    }
}

/// Butler-side half of a track's disk reader.
///
/// Sole writer of the track's audio rings and MIDI ring, sole owner of the
/// playlist cursors. May allocate and block on I/O.
pub struct ReaderFeed {
    track: usize,
    rings: Vec<Arc<PlaybackBuffer<f32>>>,
    midi_ring: Option<Arc<MidiRing>>,
    shared: Arc<ReaderShared>,
    audio_playlist: Option<Arc<dyn AudioPlaylist>>,
    midi_playlist: Option<Arc<dyn MidiPlaylist>>,
    /// Next playlist position the audio refill will read from.
    file_sample_audio: i64,
    /// Next playlist position the MIDI refill will read from.
    file_sample_midi: i64,
    tracker: NoteTracker,
    samples_read_at_last_seek: u32,
    config: StreamConfig,
}

impl ReaderFeed {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        track: usize,
        rings: Vec<Arc<PlaybackBuffer<f32>>>,
        midi_ring: Option<Arc<MidiRing>>,
        shared: Arc<ReaderShared>,
        audio_playlist: Option<Arc<dyn AudioPlaylist>>,
        midi_playlist: Option<Arc<dyn MidiPlaylist>>,
        config: StreamConfig,
    ) -> Self {
        Self {
            track,
            rings,
            midi_ring,
            shared,
            audio_playlist,
            midi_playlist,
            file_sample_audio: 0,
            file_sample_midi: 0,
            tracker: NoteTracker::new(),
            samples_read_at_last_seek: 0,
            config,
        }
    }

    #[inline]
    pub fn track(&self) -> usize {
        self.track
    }

    #[inline]
    pub fn shared(&self) -> &Arc<ReaderShared> {
        &self.shared
    }

    #[inline]
    pub fn file_sample_audio(&self) -> i64 {
        self.file_sample_audio
    }

    #[inline]
    pub fn file_sample_midi(&self) -> i64 {
        self.file_sample_midi
    }

    /// One butler pass over both domains.
    pub fn refill(&mut self, speed: f64) -> Result<RefillOutcome> {
        let outcome = self.refill_audio(speed)?;
        self.refill_midi(speed)?;
        Ok(outcome)
    }

    /// Top up the audio rings from the playlist.
    ///
    /// Skips the pass entirely when less than a chunk of space is free at
    /// normal speeds; at |speed| >= 2 the buffers drain fast enough that any
    /// space is worth filling. When slaved to an external master the refill
    /// is more conservative still and waits for half the ring.
    pub fn refill_audio(&mut self, speed: f64) -> Result<RefillOutcome> {
        let Some(playlist) = self.audio_playlist.clone() else {
            return Ok(RefillOutcome::Done);
        };
        if self.rings.is_empty() {
            return Ok(RefillOutcome::Done);
        }

        let capacity = self.rings[0].capacity();
        let mut total_space = self
            .rings
            .iter()
            .map(|r| r.write_space())
            .min()
            .unwrap_or(0);
        self.shared
            .set_fill(1.0 - total_space as f32 / capacity as f32);

        if self.config.fill_level > 0 && self.config.fill_level < capacity - 1 {
            total_space = total_space.saturating_sub(self.config.fill_level);
        }
        if total_space == 0 {
            return Ok(RefillOutcome::Done);
        }
        if speed.abs() < 2.0 && total_space < self.config.chunk_samples {
            return Ok(RefillOutcome::Done);
        }
        if self.shared.slaved() && total_space < capacity / 2 {
            return Ok(RefillOutcome::Done);
        }

        let to_read = self.config.optimize_read_samples(total_space).min(total_space);
        if to_read == 0 {
            return Ok(RefillOutcome::Done);
        }
        let reversed = speed < 0.0;

        REFILL_SCRATCH.with(|scratch| -> Result<()> {
            let mut buf = scratch.borrow_mut();
            buf.resize(to_read, 0.0);

            for (channel, ring) in self.rings.iter().enumerate() {
                if reversed {
                    // Read forward from below the cursor, then flip the
                    // block so the ring holds it in playback order. Capped
                    // at the start of material, zero-filling the rest.
                    let start = (self.file_sample_audio - to_read as i64).max(0);
                    let have = (self.file_sample_audio - start).max(0) as usize;
                    if have > 0 {
                        let n = read_audio(&*playlist, &mut buf[..have], start, channel)?;
                        buf[n..have].fill(0.0);
                        buf[..have].reverse();
                    }
                    buf[have..].fill(0.0);
                } else {
                    let n = read_audio(
                        &*playlist,
                        &mut buf[..to_read],
                        self.file_sample_audio,
                        channel,
                    )?;
                    buf[n..to_read].fill(0.0);
                }

                let written = ring.write(&buf[..to_read]);
                debug_assert_eq!(written, to_read);
            }
            Ok(())
        })?;

        if reversed {
            self.file_sample_audio = (self.file_sample_audio - to_read as i64).max(0);
        } else {
            self.file_sample_audio += to_read as i64;
        }

        let min_free = self
            .rings
            .iter()
            .map(|r| r.write_space())
            .min()
            .unwrap_or(0);
        self.shared
            .set_fill(1.0 - min_free as f32 / capacity as f32);

        if total_space - to_read > self.config.chunk_samples {
            Ok(RefillOutcome::MoreWork)
        } else {
            Ok(RefillOutcome::Done)
        }
    }

    /// Read MIDI ahead of the playback cursor into the event ring.
    ///
    /// Reverse MIDI playback is unsupported: the refill short-circuits and
    /// the RT side silences the MIDI destination.
    pub fn refill_midi(&mut self, speed: f64) -> Result<()> {
        let (Some(playlist), Some(ring)) = (self.midi_playlist.clone(), self.midi_ring.clone())
        else {
            return Ok(());
        };
        if speed < 0.0 {
            return Ok(());
        }
        if self.file_sample_midi >= playlist.length() {
            return Ok(());
        }

        let written = self.shared.midi_samples_written();
        let read = self.shared.midi_samples_read();
        let lag = written.wrapping_sub(read);
        // A lag beyond half the counter range means the RT cursor overtook
        // the write cursor after an overwrite; refill unconditionally.
        let overtaken = lag > u32::MAX / 2;
        if !overtaken && lag as usize >= self.config.midi_readahead {
            return Ok(());
        }
        if ring.write_space() == 0 {
            return Ok(());
        }

        let want = if overtaken {
            self.config.midi_readahead
        } else {
            self.config.midi_readahead - lag as usize
        };
        let to_read = (want as i64).min((playlist.length() - self.file_sample_midi).max(0));
        if to_read <= 0 {
            return Ok(());
        }

        let mut sink = RingSink(&ring);
        playlist
            .read(
                &mut sink,
                self.file_sample_midi,
                to_read,
                self.shared.loop_location(),
                &mut self.tracker,
            )
            .map_err(|e| {
                error!(track = self.track, %e, "MIDI playlist read failed");
                e
            })?;

        self.file_sample_midi += to_read;
        if overtaken {
            self.shared
                .set_midi_samples_written(read.wrapping_add(to_read as u32));
        } else {
            self.shared.add_midi_samples_written(to_read as u32);
        }
        Ok(())
    }

    /// Relocate the feed: drop everything buffered, move all cursors to
    /// `target` and prime the rings again.
    ///
    /// Runs on the butler with the RT half parked by the transport
    /// protocol, which is what makes the ring resets safe.
    pub fn seek(&mut self, target: i64, complete_refill: bool, speed: f64) -> Result<()> {
        if self.shared.declicking() {
            warn!(
                track = self.track,
                target, "seek while declick in progress; may click"
            );
        }
        debug!(track = self.track, target, complete_refill, "seek");

        self.shared.set_pending_overwrite(false);
        for ring in &self.rings {
            ring.reset();
        }
        if let Some(ring) = &self.midi_ring {
            ring.reset();
        }

        let consumed = self.shared.midi_samples_read();
        if consumed == self.samples_read_at_last_seek {
            self.tracker.reset();
        }
        self.samples_read_at_last_seek = consumed;
        self.shared.set_midi_samples_written(consumed);

        self.file_sample_audio = target;
        self.file_sample_midi = target;
        self.shared.set_playback_sample(target);

        if complete_refill {
            while self.refill(speed)? == RefillOutcome::MoreWork {}
        } else {
            self.refill(speed)?;
        }
        Ok(())
    }

    /// Rebuild the buffered material in place after the playlist changed
    /// under the playback position.
    ///
    /// The RT half flushed the read side and raised `pending_overwrite`;
    /// here the rings are refilled from the snapshot position and the flag
    /// is cleared. On error the flag stays up so the next butler pass
    /// retries.
    pub fn overwrite_existing_buffers(&mut self, speed: f64) -> Result<()> {
        debug_assert!(self.shared.pending_overwrite());
        let pos = self.shared.overwrite_sample();
        let reversed = speed < 0.0;
        debug!(track = self.track, pos, reversed, "overwrite buffers");

        if let Some(playlist) = self.audio_playlist.clone() {
            let size = self.rings.first().map(|r| r.capacity() - 1).unwrap_or(0);
            // Scratch the size of the ring, per call; released on return.
            let mut scratch = vec![0.0f32; size];

            for (channel, ring) in self.rings.iter().enumerate() {
                ring.reset();
                if reversed {
                    let start = (pos - size as i64).max(0);
                    let have = (pos - start).max(0) as usize;
                    scratch.fill(0.0);
                    if have > 0 {
                        let n = read_audio(&*playlist, &mut scratch[..have], start, channel)?;
                        scratch[n..have].fill(0.0);
                        scratch[..have].reverse();
                    }
                } else {
                    let n = read_audio(&*playlist, &mut scratch, pos, channel)?;
                    scratch[n..].fill(0.0);
                }
                ring.write(&scratch);
            }

            self.file_sample_audio = if reversed {
                (pos - size as i64).max(0)
            } else {
                pos + size as i64
            };
        }

        if let (Some(playlist), Some(ring)) = (self.midi_playlist.clone(), self.midi_ring.clone())
        {
            ring.reset();
            let mut sink = RingSink(&ring);
            // The replacement material may not contain the offs for notes
            // already sounding, so close them out at the splice point.
            self.tracker.resolve(&mut sink, pos);

            let mut advanced = 0i64;
            if !reversed {
                let to_read =
                    (self.config.chunk_samples as i64).min((playlist.length() - pos).max(0));
                if to_read > 0 {
                    playlist.read(
                        &mut sink,
                        pos,
                        to_read,
                        self.shared.loop_location(),
                        &mut self.tracker,
                    )?;
                    advanced = to_read;
                }
            }
            self.file_sample_midi = pos + advanced;
            let read = self.shared.midi_samples_read();
            self.shared
                .set_midi_samples_written(read.wrapping_add(advanced as u32));
        }

        self.shared.set_pending_overwrite(false);
        Ok(())
    }

    /// Swap in freshly allocated rings after a buffer-size change. Used by
    /// [`DiskReader::resized`](super::DiskReader::resized), which owns both
    /// halves at that point.
    pub(crate) fn with_rings(
        mut self,
        rings: Vec<Arc<PlaybackBuffer<f32>>>,
        config: StreamConfig,
    ) -> Self {
        self.rings = rings;
        self.config = config;
        self
    }
}

fn read_audio(
    playlist: &dyn AudioPlaylist,
    dst: &mut [f32],
    pos: i64,
    channel: usize,
) -> Result<usize> {
    playlist.read(dst, pos, channel).map_err(|e| {
        error!(pos, channel, %e, "audio playlist read failed");
        match e {
            Error::PlaylistRead { .. } => e,
            other => Error::PlaylistRead {
                position: pos,
                reason: other.to_string(),
            },
        }
    })
}
