//! Streaming engine configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the per-track disk buffers and the butler thread.
///
/// Capacities are in samples per channel. The usable capacity of every ring
/// is `ring_capacity - 1` (one slot is reserved to distinguish empty from
/// full).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Per-channel ring capacity in samples. Default: 262144 (~5.5s @ 48kHz)
    pub ring_capacity: usize,
    /// MIDI event ring capacity. Default: 1024
    pub midi_ring_capacity: usize,
    /// Refill chunk size in samples. Default: 65536
    pub chunk_samples: usize,
    /// Headroom the refill leaves unfilled, in samples. Default: 0
    pub fill_level: usize,
    /// How far ahead of the playback cursor MIDI is read, in samples.
    /// Default: 4096
    pub midi_readahead: usize,
    /// Bit depth of the session's audio files, used to size disk reads.
    /// Default: 32
    pub file_bits_per_sample: usize,
    /// Sample rate the declick coefficient is derived from. Default: 48000.0
    pub sample_rate: f64,
    /// Largest block `run()` will be asked to produce. Default: 8192
    pub max_block_samples: usize,
    /// When false, declick gain changes take effect immediately.
    /// Default: true
    pub transport_fades: bool,
    /// When true, multiple tracks are refilled concurrently via rayon.
    /// Default: true
    pub parallel_io: bool,
}

/// Smallest single disk read the refill will issue, in bytes.
pub const MIN_READ_BYTES: usize = 256 * 1024;
/// Largest single disk read the refill will issue, in bytes.
pub const MAX_READ_BYTES: usize = 4 * 1024 * 1024;
/// Disk reads are rounded down to a multiple of this, in bytes.
pub const READ_ALIGN_BYTES: usize = 16 * 1024;

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 262_144,
            midi_ring_capacity: 1024,
            chunk_samples: 65_536,
            fill_level: 0,
            midi_readahead: 4096,
            file_bits_per_sample: 32,
            sample_rate: 48_000.0,
            max_block_samples: 8192,
            transport_fades: true,
            parallel_io: true,
        }
    }
}

impl StreamConfig {
    pub fn with_ring_capacity(capacity: usize) -> Self {
        Self {
            ring_capacity: capacity.max(4096),
            ..Default::default()
        }
    }

    /// Clamp a refill request to the optimized disk read size.
    ///
    /// The request is converted to bytes at the session's native file bit
    /// width, clamped to `[MIN_READ_BYTES, MAX_READ_BYTES]`, rounded down to
    /// a 16 KiB multiple and converted back to samples.
    pub fn optimize_read_samples(&self, want_samples: usize) -> usize {
        let bytes_per_sample = (self.file_bits_per_sample / 8).max(1);
        let want_bytes = want_samples.saturating_mul(bytes_per_sample);
        let clamped = want_bytes.clamp(MIN_READ_BYTES, MAX_READ_BYTES);
        let aligned = (clamped / READ_ALIGN_BYTES) * READ_ALIGN_BYTES;
        aligned / bytes_per_sample
    }
}
