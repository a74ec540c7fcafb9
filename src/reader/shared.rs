//! State shared between a track's realtime half and its butler half.

use crate::lockfree::{AtomicFlag, AtomicFloat};
use crate::playlist::LoopSpan;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

const ACTIVE_NONE: u8 = 0;
const ACTIVE_ON: u8 = 1;
const ACTIVE_OFF: u8 = 2;

/// Atomics coordinating one track's RT and butler halves.
///
/// Everything here is wait-free from both sides. The `playback_sample`
/// cursor is written by the RT half while rolling and by the butler during a
/// seek, when the locate protocol guarantees the RT half is not consuming.
#[derive(Debug)]
pub struct ReaderShared {
    pending_overwrite: AtomicFlag,
    need_butler: AtomicFlag,
    no_disk_output: AtomicFlag,
    slaved: AtomicFlag,
    declicking: AtomicFlag,
    overwrite_sample: AtomicI64,
    playback_sample: AtomicI64,
    /// Samples of timeline the RT side has consumed from the MIDI ring.
    samples_read_from_midi_ring: AtomicU32,
    /// Samples of timeline the butler has read ahead into the MIDI ring.
    samples_written_to_midi_ring: AtomicU32,
    pending_active: AtomicU8,
    /// Diagnostic gauge: fraction of the least-filled audio ring in use.
    fill: AtomicFloat,
    loop_location: ArcSwapOption<LoopSpan>,
}

impl ReaderShared {
    pub fn new() -> Self {
        Self {
            pending_overwrite: AtomicFlag::new(false),
            need_butler: AtomicFlag::new(false),
            no_disk_output: AtomicFlag::new(false),
            slaved: AtomicFlag::new(false),
            declicking: AtomicFlag::new(false),
            overwrite_sample: AtomicI64::new(0),
            playback_sample: AtomicI64::new(0),
            samples_read_from_midi_ring: AtomicU32::new(0),
            samples_written_to_midi_ring: AtomicU32::new(0),
            pending_active: AtomicU8::new(ACTIVE_NONE),
            fill: AtomicFloat::new(0.0),
            loop_location: ArcSwapOption::empty(),
        }
    }

    #[inline]
    pub fn pending_overwrite(&self) -> bool {
        self.pending_overwrite.get()
    }

    #[inline]
    pub fn set_pending_overwrite(&self, value: bool) {
        self.pending_overwrite.set(value);
    }

    #[inline]
    pub fn need_butler(&self) -> bool {
        self.need_butler.get()
    }

    #[inline]
    pub fn set_need_butler(&self, value: bool) {
        self.need_butler.set(value);
    }

    #[inline]
    pub fn no_disk_output(&self) -> bool {
        self.no_disk_output.get()
    }

    pub fn set_no_disk_output(&self, value: bool) {
        self.no_disk_output.set(value);
    }

    #[inline]
    pub fn slaved(&self) -> bool {
        self.slaved.get()
    }

    pub fn set_slaved(&self, value: bool) {
        self.slaved.set(value);
    }

    /// True while the RT half is still ramping gain; a seek arriving now
    /// may click.
    #[inline]
    pub fn declicking(&self) -> bool {
        self.declicking.get()
    }

    #[inline]
    pub fn set_declicking(&self, value: bool) {
        self.declicking.set(value);
    }

    #[inline]
    pub fn overwrite_sample(&self) -> i64 {
        self.overwrite_sample.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_overwrite_sample(&self, pos: i64) {
        self.overwrite_sample.store(pos, Ordering::Release);
    }

    #[inline]
    pub fn playback_sample(&self) -> i64 {
        self.playback_sample.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_playback_sample(&self, pos: i64) {
        self.playback_sample.store(pos, Ordering::Release);
    }

    #[inline]
    pub fn midi_samples_read(&self) -> u32 {
        self.samples_read_from_midi_ring.load(Ordering::Acquire)
    }

    #[inline]
    pub fn add_midi_samples_read(&self, n: u32) {
        self.samples_read_from_midi_ring
            .fetch_add(n, Ordering::AcqRel);
    }

    #[inline]
    pub fn midi_samples_written(&self) -> u32 {
        self.samples_written_to_midi_ring.load(Ordering::Acquire)
    }

    #[inline]
    pub fn add_midi_samples_written(&self, n: u32) {
        self.samples_written_to_midi_ring
            .fetch_add(n, Ordering::AcqRel);
    }

    #[inline]
    pub fn set_midi_samples_written(&self, n: u32) {
        self.samples_written_to_midi_ring
            .store(n, Ordering::Release);
    }

    /// Request that the RT half flips its active state next cycle.
    pub fn request_active(&self, active: bool) {
        let v = if active { ACTIVE_ON } else { ACTIVE_OFF };
        self.pending_active.store(v, Ordering::Release);
    }

    /// Consume a pending active flip, at most one per cycle.
    pub fn take_pending_active(&self) -> Option<bool> {
        match self.pending_active.swap(ACTIVE_NONE, Ordering::AcqRel) {
            ACTIVE_ON => Some(true),
            ACTIVE_OFF => Some(false),
            _ => None,
        }
    }

    #[inline]
    pub fn fill(&self) -> f32 {
        self.fill.get()
    }

    #[inline]
    pub fn set_fill(&self, fill: f32) {
        self.fill.set(fill);
    }

    /// Current loop location, lock-free on the RT path.
    #[inline]
    pub fn loop_location(&self) -> Option<LoopSpan> {
        self.loop_location.load().as_deref().copied()
    }

    /// Publish a new loop location. Control thread only.
    pub fn set_loop_location(&self, span: Option<LoopSpan>) {
        self.loop_location.store(span.map(std::sync::Arc::new));
    }
}

impl Default for ReaderShared {
    fn default() -> Self {
        Self::new()
    }
}
