//! Gain declicking for transport starts, stops and locates.

/// Numerator of the smoothing coefficient; `a = 4550 / sample_rate` gives a
/// roughly 10 ms fade at 44.1 kHz.
const RATE_COEFF: f32 = 4550.0;
/// Once the gain is this close to the target it is snapped exactly onto it.
const SNAP_THRESHOLD: f32 = 1e-5;
/// The gain update is amortized over blocks of this many samples.
const BLOCK: usize = 16;

/// One-pole exponential gain ramp applied on the realtime path.
///
/// State is a single scalar gain; each [`apply`](DeclickRamp::apply) call
/// multiplies a block of samples by it while easing it toward the requested
/// target. Never allocates.
#[derive(Debug, Clone, Copy)]
pub struct DeclickRamp {
    gain: f32,
    coeff: f32,
}

impl DeclickRamp {
    pub fn new(sample_rate: f64, initial_gain: f32) -> Self {
        Self {
            gain: initial_gain,
            coeff: RATE_COEFF / sample_rate as f32,
        }
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Jump straight to `gain`, used when transport fades are disabled.
    #[inline]
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    #[inline]
    pub fn at_target(&self, target: f32) -> bool {
        self.gain == target
    }

    /// Scale `buf` by the ramp while moving the gain toward `target`.
    ///
    /// With the gain already at the target this degenerates to a constant
    /// multiply (a no-op at unity). Otherwise the ramp is monotonic in
    /// magnitude; the update `g += a * (target - g)` runs once per
    /// 16-sample block and the gain is snapped onto the target once within
    /// `1e-5` of it, so f32 rounding can never leave it oscillating.
    pub fn apply(&mut self, buf: &mut [f32], target: f32) {
        if (self.gain - target).abs() < SNAP_THRESHOLD {
            self.gain = target;
        }

        if self.gain == target {
            if self.gain != 1.0 {
                for sample in buf.iter_mut() {
                    *sample *= self.gain;
                }
            }
            return;
        }

        let mut offset = 0;
        while offset < buf.len() {
            let chunk = (buf.len() - offset).min(BLOCK);
            for sample in &mut buf[offset..offset + chunk] {
                *sample *= self.gain;
            }
            self.gain += self.coeff * (target - self.gain);
            if (self.gain - target).abs() < SNAP_THRESHOLD {
                self.gain = target;
            }
            offset += chunk;

            if self.gain == target && self.gain == 1.0 {
                return;
            }
            if self.gain == target && self.gain == 0.0 {
                buf[offset..].fill(0.0);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_gain_short_circuit() {
        let mut ramp = DeclickRamp::new(44_100.0, 1.0);
        let mut buf = [0.5f32; 64];
        ramp.apply(&mut buf, 1.0);
        assert!(buf.iter().all(|&s| s == 0.5));
        assert_eq!(ramp.gain(), 1.0);
    }

    #[test]
    fn test_silence_at_zero() {
        let mut ramp = DeclickRamp::new(44_100.0, 0.0);
        let mut buf = [0.5f32; 64];
        ramp.apply(&mut buf, 0.0);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fade_out_monotonic_and_converges() {
        let mut ramp = DeclickRamp::new(44_100.0, 1.0);
        let mut last = 1.0f32;
        let mut converged_at = None;

        for block in 0..64 {
            let mut buf = [1.0f32; 64];
            ramp.apply(&mut buf, 0.0);
            for &s in buf.iter() {
                assert!(s <= last + f32::EPSILON, "gain increased during fadeout");
                last = s;
            }
            if ramp.at_target(0.0) && converged_at.is_none() {
                converged_at = Some((block + 1) * 64);
            }
        }

        // ln(1e-5) / ln(1 - 4550/44100) blocks of 16 samples, ~1700 samples
        let samples = converged_at.expect("fadeout never converged");
        assert!(samples <= 4096, "converged after {samples} samples");
    }

    #[test]
    fn test_fade_in_reaches_unity() {
        let mut ramp = DeclickRamp::new(48_000.0, 0.0);
        for _ in 0..64 {
            let mut buf = [1.0f32; 64];
            ramp.apply(&mut buf, 1.0);
        }
        assert_eq!(ramp.gain(), 1.0);
    }

    #[test]
    fn test_no_overshoot() {
        let mut ramp = DeclickRamp::new(8_000.0, 1.0);
        for _ in 0..256 {
            let mut buf = [1.0f32; 16];
            ramp.apply(&mut buf, 0.0);
            assert!(ramp.gain() >= 0.0);
        }
        assert_eq!(ramp.gain(), 0.0);
    }

    #[test]
    fn test_deterministic_for_rate() {
        let run = || {
            let mut ramp = DeclickRamp::new(44_100.0, 1.0);
            let mut out = Vec::new();
            for _ in 0..8 {
                let mut buf = [1.0f32; 32];
                ramp.apply(&mut buf, 0.0);
                out.extend_from_slice(&buf);
            }
            out
        };
        assert_eq!(run(), run());
    }
}
