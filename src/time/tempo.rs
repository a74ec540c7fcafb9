//! Tempo map collaborator: musical time to wall-clock and sample time.

use super::beats::Beats;

/// Bidirectional mapping between musical time and real/sample time.
///
/// The engine never owns a tempo map; one is injected wherever MIDI
/// scheduling needs it.
pub trait TempoMap: Send + Sync {
    fn beats_to_seconds(&self, beats: Beats) -> f64;
    fn seconds_to_beats(&self, seconds: f64) -> Beats;

    fn beats_to_samples(&self, beats: Beats, sample_rate: f64) -> i64 {
        (self.beats_to_seconds(beats) * sample_rate).round() as i64
    }

    fn samples_to_beats(&self, samples: i64, sample_rate: f64) -> Beats {
        self.seconds_to_beats(samples as f64 / sample_rate)
    }
}

/// Fixed-tempo map.
#[derive(Debug, Clone, Copy)]
pub struct ConstantTempo {
    bpm: f64,
}

impl ConstantTempo {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: bpm.clamp(20.0, 999.0),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }
}

impl Default for ConstantTempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl TempoMap for ConstantTempo {
    fn beats_to_seconds(&self, beats: Beats) -> f64 {
        beats.to_double() * 60.0 / self.bpm
    }

    fn seconds_to_beats(&self, seconds: f64) -> Beats {
        Beats::from_double(seconds * self.bpm / 60.0)
    }
}
