//! Rate Adapter
//!
//! Converts a subframe from the sample rate declared by its sender to the
//! receiver's configured rate. Equal rates are a plain copy. Differing
//! rates go through an arbitrary-ratio polyphase resampler: a windowed-sinc
//! prototype lowpass split across a bank of phase filters, with the output
//! position advanced by the rate ratio and the nearest phase applied.
//!
//! A zero rate on either side is a misconfiguration that cannot be
//! recovered mid-stream and is reported as a configuration error.

use num_complex::Complex32;
use std::f32::consts::PI;
use tracing::warn;

use crate::RadioError;

/// Phase resolution of the filter bank.
const NUM_PHASES: usize = 32;

/// FIR taps applied per output sample.
const TAPS_PER_PHASE: usize = 8;

/// Fraction of the narrower Nyquist band kept by the anti-alias filter.
const CUTOFF_FACTOR: f32 = 0.45;

/// Resample `input` from `rate_in` to `rate_out`.
///
/// With equal rates the output is byte-identical to the input and the
/// sample count is unchanged.
pub fn resample(
    rate_in: f64,
    rate_out: f64,
    input: &[Complex32],
) -> Result<Vec<Complex32>, RadioError> {
    if rate_in == 0.0 {
        return Err(RadioError::Config(
            "input sample rate is zero, check the link configuration".into(),
        ));
    }
    if rate_out == 0.0 {
        return Err(RadioError::Config(
            "output sample rate is zero, check the link configuration".into(),
        ));
    }

    if rate_in == rate_out {
        return Ok(input.to_vec());
    }

    let ratio = rate_out / rate_in;
    if ratio > 1.0 {
        // Upsampled streams have been unreliable to decode downstream.
        warn!(
            rate_in_mhz = rate_in / 1e6,
            rate_out_mhz = rate_out / 1e6,
            ratio,
            "upsampling, peer may fail to decode"
        );
    }

    Ok(ArbResampler::new(ratio).process(input))
}

/// Arbitrary-ratio polyphase resampler, built per call.
struct ArbResampler {
    /// Input positions consumed per output sample
    step: f64,
    ratio: f64,
    /// Filter bank, one FIR per phase
    filters: Vec<Vec<f32>>,
}

impl ArbResampler {
    fn new(ratio: f64) -> Self {
        // Prototype designed at the phase-interpolated rate; cutoff sits at
        // the narrower of the two Nyquist bands.
        let cutoff = CUTOFF_FACTOR * ratio.min(1.0) as f32 / NUM_PHASES as f32;
        let prototype = design_lowpass(NUM_PHASES * TAPS_PER_PHASE, cutoff);

        // Unity DC gain per phase.
        let sum: f32 = prototype.iter().sum();
        let gain = NUM_PHASES as f32 / sum;

        let mut filters = vec![vec![0.0f32; TAPS_PER_PHASE]; NUM_PHASES];
        for (i, &tap) in prototype.iter().enumerate() {
            filters[i % NUM_PHASES][i / NUM_PHASES] = tap * gain;
        }

        Self {
            step: 1.0 / ratio,
            ratio,
            filters,
        }
    }

    fn process(&self, input: &[Complex32]) -> Vec<Complex32> {
        let expected = (input.len() as f64 * self.ratio).ceil() as usize;
        let mut output = Vec::with_capacity(expected);

        let center = (TAPS_PER_PHASE / 2) as i64;
        let mut pos = 0.0f64;

        while pos < input.len() as f64 {
            let base = pos.floor() as i64;
            let frac = pos - base as f64;
            let phase = ((frac * NUM_PHASES as f64) as usize).min(NUM_PHASES - 1);

            let mut acc = Complex32::new(0.0, 0.0);
            for (k, &coeff) in self.filters[phase].iter().enumerate() {
                let idx = base + k as i64 - center;
                if idx >= 0 && (idx as usize) < input.len() {
                    acc += input[idx as usize] * coeff;
                }
            }

            output.push(acc);
            pos += self.step;
        }

        output
    }
}

/// Windowed-sinc lowpass design, Hamming window, cutoff in cycles per
/// sample at the interpolated rate.
fn design_lowpass(num_taps: usize, normalized_cutoff: f32) -> Vec<f32> {
    let center = (num_taps - 1) as f32 / 2.0;
    let omega_c = 2.0 * PI * normalized_cutoff;

    (0..num_taps)
        .map(|i| {
            let n = i as f32 - center;
            let sinc = if n.abs() < 1e-10 {
                omega_c / PI
            } else {
                (omega_c * n).sin() / (PI * n)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * i as f32 / (num_taps - 1) as f32).cos();
            sinc * window
        })
        .collect()
}
