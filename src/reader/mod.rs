//! Per-track disk streaming reader.
//!
//! Each playback-capable track owns a pair of halves created together:
//! [`DiskReader`] runs on the realtime thread and pulls from the channel
//! rings, [`ReaderFeed`] runs on the butler thread and keeps them filled.
//! The halves share the rings and a block of atomics ([`ReaderShared`]).

mod feed;
mod shared;

pub use feed::{ReaderFeed, RefillOutcome};
pub use shared::ReaderShared;

use crate::config::StreamConfig;
use crate::declick::DeclickRamp;
use crate::midi::{MidiBuffer, MidiRing, NoteTracker};
use crate::playlist::{AudioPlaylist, LoopSpan, MidiPlaylist, MonitorState};
use crate::ring::PlaybackBuffer;
use crate::signals::{Signal, SignalHub};
use std::sync::Arc;
use tracing::warn;

/// Session-wide facts the process callback passes into every `run` call.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    pub monitor: MonitorState,
    /// A session-level locate is still in flight; ring contents are stale.
    pub global_locate_pending: bool,
}

/// One audio channel's ring plus the scratch block used when the disk
/// signal has to be mixed on top of input monitoring.
struct ChannelInfo {
    ring: Arc<PlaybackBuffer<f32>>,
    scratch: Box<[f32]>,
}

pub struct DiskReaderBuilder {
    track: usize,
    config: StreamConfig,
    n_channels: usize,
    audio_playlist: Option<Arc<dyn AudioPlaylist>>,
    midi_playlist: Option<Arc<dyn MidiPlaylist>>,
    hub: Option<Arc<SignalHub>>,
}

impl DiskReaderBuilder {
    pub fn channels(mut self, n: usize) -> Self {
        self.n_channels = n;
        self
    }

    pub fn audio_playlist(mut self, playlist: Arc<dyn AudioPlaylist>) -> Self {
        self.audio_playlist = Some(playlist);
        self
    }

    /// Attaching a MIDI playlist also gives the track a MIDI event ring.
    pub fn midi_playlist(mut self, playlist: Arc<dyn MidiPlaylist>) -> Self {
        self.midi_playlist = Some(playlist);
        self
    }

    pub fn signals(mut self, hub: Arc<SignalHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn build(self) -> (DiskReader, ReaderFeed) {
        let shared = Arc::new(ReaderShared::new());
        let rings: Vec<Arc<PlaybackBuffer<f32>>> = (0..self.n_channels)
            .map(|_| Arc::new(PlaybackBuffer::with_capacity(self.config.ring_capacity)))
            .collect();
        let midi_ring = self
            .midi_playlist
            .is_some()
            .then(|| Arc::new(MidiRing::with_capacity(self.config.midi_ring_capacity)));

        let channels = rings
            .iter()
            .map(|ring| ChannelInfo {
                ring: Arc::clone(ring),
                scratch: vec![0.0; self.config.max_block_samples].into_boxed_slice(),
            })
            .collect();

        let reader = DiskReader {
            track: self.track,
            channels,
            midi_ring: midi_ring.clone(),
            shared: Arc::clone(&shared),
            declick: DeclickRamp::new(self.config.sample_rate, 0.0),
            declick_offs: 0,
            tracker: NoteTracker::new(),
            midi_scratch: MidiBuffer::with_capacity(self.config.midi_ring_capacity),
            active: true,
            config: self.config,
            hub: self.hub,
            last_need_butler: false,
        };

        let feed = ReaderFeed::new(
            self.track,
            rings,
            midi_ring,
            shared,
            self.audio_playlist,
            self.midi_playlist,
            self.config,
        );

        (reader, feed)
    }
}

/// Realtime half of a track's disk streaming engine.
pub struct DiskReader {
    track: usize,
    channels: Vec<ChannelInfo>,
    midi_ring: Option<Arc<MidiRing>>,
    shared: Arc<ReaderShared>,
    declick: DeclickRamp,
    /// Samples consumed (without advancing) while declicking out.
    declick_offs: usize,
    tracker: NoteTracker,
    midi_scratch: MidiBuffer,
    active: bool,
    config: StreamConfig,
    hub: Option<Arc<SignalHub>>,
    last_need_butler: bool,
}

impl DiskReader {
    pub fn builder(track: usize, config: StreamConfig) -> DiskReaderBuilder {
        DiskReaderBuilder {
            track,
            config,
            n_channels: 0,
            audio_playlist: None,
            midi_playlist: None,
            hub: None,
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
    pub fn playback_sample(&self) -> i64 {
        self.shared.playback_sample()
    }

    #[inline]
    pub fn need_butler(&self) -> bool {
        self.shared.need_butler()
    }

    #[inline]
    pub fn declick_gain(&self) -> f32 {
        self.declick.gain()
    }

    /// Whether the stop/locate fadeout has finished.
    #[inline]
    pub fn declick_done(&self) -> bool {
        self.declick.at_target(0.0)
    }

    pub fn set_loop_location(&self, span: Option<LoopSpan>) {
        self.shared.set_loop_location(span);
    }

    /// Mark the buffered material stale after an edit: snapshot the
    /// playback position, throw away the readable side of every audio ring
    /// and hand the rebuild to the butler. RT-safe.
    pub fn set_pending_overwrite(&mut self) {
        self.shared
            .set_overwrite_sample(self.shared.playback_sample());
        for chan in &self.channels {
            chan.ring.read_flush();
        }
        self.shared.set_pending_overwrite(true);
    }

    /// Realtime pull: serve one cycle of audio and MIDI.
    ///
    /// `speed` distinguishes direction and standstill only (-1, 0, +1);
    /// varispeed resampling happens downstream. Never allocates, never
    /// blocks; on underrun it signals once and leaves all state untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        out: &mut [&mut [f32]],
        midi_out: Option<&mut MidiBuffer>,
        start_sample: i64,
        end_sample: i64,
        speed: f64,
        nframes: usize,
        result_required: bool,
        ctx: &CycleContext,
    ) {
        if let Some(active) = self.shared.take_pending_active() {
            self.active = active;
        }
        if !self.active {
            for buf in out.iter_mut() {
                buf[..nframes].fill(0.0);
            }
            return;
        }

        let target_gain: f32 = if speed == 0.0 || !ctx.monitor.disk() {
            0.0
        } else {
            1.0
        };
        if !self.config.transport_fades || self.channels.is_empty() {
            self.declick.set_gain(target_gain);
        }
        self.shared
            .set_declicking(!self.declick.at_target(target_gain));

        // Stopped, disk-only monitoring, no fade left to play out.
        if speed == 0.0
            && ctx.monitor.disk()
            && !ctx.monitor.input()
            && self.declick.at_target(target_gain)
        {
            return;
        }

        let disk_samples = if speed != 0.0 { nframes } else { 0 };
        let reversed = speed < 0.0;
        if disk_samples > 0 {
            self.declick_offs = 0;
        }

        // Internal seek: bridge a cursor discontinuity out of the buffered
        // material. Failure here is an engine invariant violation; release
        // builds degrade to a cycle of silence.
        let playback = self.shared.playback_sample();
        if start_sample != playback && target_gain != 0.0 {
            let distance = if reversed {
                playback - start_sample
            } else {
                start_sample - playback
            };
            if !self.channels.iter().all(|c| c.ring.can_seek(distance)) {
                debug_assert!(
                    false,
                    "internal seek of {distance} samples exceeds buffered range"
                );
                for buf in out.iter_mut() {
                    buf[..nframes].fill(0.0);
                }
                return;
            }
            for chan in &self.channels {
                if distance >= 0 {
                    chan.ring.increment_read_ptr(distance as usize);
                } else {
                    chan.ring.decrement_read_ptr(-distance as usize);
                }
            }
            self.shared.set_playback_sample(start_sample);
        }

        let skip_disk = !result_required
            || !ctx.monitor.disk()
            || ctx.global_locate_pending
            || self.shared.pending_overwrite()
            || self.shared.no_disk_output();

        if skip_disk {
            if !ctx.global_locate_pending && !self.shared.no_disk_output() {
                for chan in &self.channels {
                    chan.ring.increment_read_ptr(disk_samples);
                }
            }
            if !ctx.monitor.input() {
                for buf in out.iter_mut() {
                    buf[..nframes].fill(0.0);
                }
            }
            // Nothing from disk reaches the output, so there is no ramp to
            // play out either.
            self.declick.set_gain(target_gain);
        } else {
            // The rings only ever grow on the far side, so checking before
            // reading keeps underruns side-effect free.
            if disk_samples > 0 {
                let available = self
                    .channels
                    .iter()
                    .map(|c| c.ring.read_space())
                    .min()
                    .unwrap_or(usize::MAX);
                if available < disk_samples {
                    warn!(
                        track = self.track,
                        available, wanted = disk_samples, "disk underrun"
                    );
                    if let Some(hub) = &self.hub {
                        hub.emit(Signal::Underrun { track: self.track });
                    }
                    return;
                }
            }

            let scale = (out.len() as f32 / self.channels.len().max(1) as f32).min(1.0);
            let fading_out = target_gain == 0.0 && !self.declick.at_target(0.0);
            let ramp_in = self.declick;
            let mut ramp_out = self.declick;
            let mut peeked = usize::MAX;

            for (chan, buf) in self.channels.iter_mut().zip(out.iter_mut()) {
                let mirror = ctx.monitor.input();
                if mirror {
                    let dest = &mut chan.scratch[..nframes];

                    if disk_samples > 0 {
                        let got = chan.ring.read(dest);
                        debug_assert_eq!(got, disk_samples);
                    } else if fading_out {
                        let got = chan.ring.peek(dest, self.declick_offs);
                        dest[got..].fill(0.0);
                        peeked = peeked.min(got);
                    } else {
                        dest.fill(0.0);
                    }

                    let mut ramp = ramp_in;
                    ramp.apply(dest, target_gain);
                    ramp_out = ramp;

                    if scale < 1.0 {
                        for sample in dest.iter_mut() {
                            *sample *= scale;
                        }
                    }

                    for (o, s) in buf[..nframes].iter_mut().zip(dest.iter()) {
                        *o += *s;
                    }
                } else {
                    let dest = &mut buf[..nframes];

                    if disk_samples > 0 {
                        let got = chan.ring.read(dest);
                        debug_assert_eq!(got, disk_samples);
                    } else if fading_out {
                        let got = chan.ring.peek(dest, self.declick_offs);
                        dest[got..].fill(0.0);
                        peeked = peeked.min(got);
                    } else {
                        dest.fill(0.0);
                    }

                    let mut ramp = ramp_in;
                    ramp.apply(dest, target_gain);
                    ramp_out = ramp;

                    if scale < 1.0 {
                        for sample in dest.iter_mut() {
                            *sample *= scale;
                        }
                    }
                }
            }

            self.declick = ramp_out;
            if fading_out && peeked != usize::MAX {
                self.declick_offs += peeked;
            }
        }

        // MIDI: pulled whenever disk is audible and the cursor is valid.
        if self.midi_ring.is_some()
            && ctx.monitor.disk()
            && !ctx.global_locate_pending
            && speed != 0.0
        {
            if reversed {
                // Reverse MIDI playback is unsupported; the destination
                // stays silent and the butler stops reading ahead.
                if self.shared.loop_location().is_some() {
                    warn!(track = self.track, "loop ignored during reverse playback");
                }
            } else {
                let ring = self.midi_ring.clone().expect("midi ring checked above");
                let loop_loc = self.shared.loop_location();
                if self.shared.no_disk_output() {
                    self.midi_scratch.clear();
                    Self::pull_midi(
                        &ring,
                        &mut self.tracker,
                        loop_loc,
                        &mut self.midi_scratch,
                        start_sample,
                        end_sample,
                        nframes,
                    );
                    self.shared.add_midi_samples_read(disk_samples as u32);
                } else if let Some(dst) = midi_out {
                    Self::pull_midi(
                        &ring,
                        &mut self.tracker,
                        loop_loc,
                        dst,
                        start_sample,
                        end_sample,
                        nframes,
                    );
                    self.shared.add_midi_samples_read(disk_samples as u32);
                }
            }
        }

        // Cursor update.
        if !ctx.global_locate_pending && disk_samples > 0 {
            let cur = self.shared.playback_sample();
            let next = if reversed {
                cur - disk_samples as i64
            } else {
                cur + disk_samples as i64
            };
            self.shared.set_playback_sample(next);
        }

        self.update_butler_demand();
    }

    /// Loop-aware MIDI delivery out of the event ring.
    fn pull_midi(
        ring: &MidiRing,
        tracker: &mut NoteTracker,
        loop_loc: Option<LoopSpan>,
        dst: &mut MidiBuffer,
        start_sample: i64,
        end_sample: i64,
        nframes: usize,
    ) {
        fn track_delivered(dst: &MidiBuffer, tracker: &mut NoteTracker, from: usize) -> usize {
            for ev in &dst.as_slice()[from..] {
                tracker.track(ev);
            }
            dst.len()
        }
        let mut track_from = dst.len();

        if let Some(lp) = loop_loc {
            let effective_start = lp.squish(start_sample);
            if effective_start == lp.start {
                // New lap: anything still sounding from the previous one
                // gets a note-off at the top of the cycle.
                tracker.resolve(dst, 0);
            }
            let first = (lp.end - effective_start).min(nframes as i64);
            if (nframes as i64) > first {
                // The loop end falls inside this cycle: read out the lap,
                // close sounding notes at the wrap point, then continue
                // from the loop start.
                ring.read_window(dst, effective_start, lp.end, 0);
                track_from = track_delivered(dst, tracker, track_from);
                tracker.resolve(dst, first);
                track_from = dst.len();
                ring.read_window(dst, lp.start, lp.start + (nframes as i64 - first), first);
            } else {
                ring.read_window(dst, effective_start, effective_start + nframes as i64, 0);
            }
        } else {
            ring.skip_to(start_sample);
            ring.read_into(dst, start_sample, end_sample.max(start_sample), 0);
        }

        track_delivered(dst, tracker, track_from);
    }

    /// Decide whether the butler should be woken, and publish the fill
    /// gauge while we are at it.
    fn update_butler_demand(&mut self) {
        let mut need = false;

        if let Some(min_free) = self.channels.iter().map(|c| c.ring.write_space()).min() {
            let capacity = self.channels[0].ring.capacity();
            self.shared
                .set_fill(1.0 - min_free as f32 / capacity as f32);
            need |= if self.shared.slaved() {
                min_free >= capacity / 2
            } else {
                min_free >= self.config.chunk_samples
            };
        }

        if self.midi_ring.is_some() {
            let written = self.shared.midi_samples_written();
            let read = self.shared.midi_samples_read();
            let lag = written.wrapping_sub(read);
            if lag > u32::MAX / 2 {
                // Read overtook write after an overwrite; force a wakeup.
                need = true;
            } else {
                need |= (lag as usize) < self.config.midi_readahead;
            }
        }

        self.shared.set_need_butler(need);
        if need && !self.last_need_butler {
            if let Some(hub) = &self.hub {
                hub.emit(Signal::NeedButler { track: self.track });
            }
        }
        self.last_need_butler = need;
    }

    /// Rebuild a reader pair with a new per-channel ring capacity, keeping
    /// playlists, cursors and shared control state. Both halves must be
    /// surrendered, which guarantees no thread is touching the old rings.
    pub fn resized(reader: DiskReader, feed: ReaderFeed, capacity: usize) -> (DiskReader, ReaderFeed) {
        let mut config = reader.config;
        config.ring_capacity = capacity.max(4096);

        let rings: Vec<Arc<PlaybackBuffer<f32>>> = (0..reader.channels.len())
            .map(|_| Arc::new(PlaybackBuffer::with_capacity(config.ring_capacity)))
            .collect();

        let channels = rings
            .iter()
            .map(|ring| ChannelInfo {
                ring: Arc::clone(ring),
                scratch: vec![0.0; config.max_block_samples].into_boxed_slice(),
            })
            .collect();

        let new_reader = DiskReader {
            channels,
            config,
            ..reader
        };
        let new_feed = feed.with_rings(rings, config);
        (new_reader, new_feed)
    }
}
