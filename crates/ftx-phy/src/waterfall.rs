use std::f32::consts::PI;

use ftx_core::SpectrumProfile;
use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::PhyError;

const LOG_FLOOR: f32 = 1e-6;

/// Spectrogram of a receive window. `mag` holds log-power standardised to
/// zero mean and unit variance along time within each frequency column; the
/// raw linear powers are kept for the SNR estimate.
#[derive(Debug, Clone)]
pub struct Waterfall {
    mag: Vec<f32>,
    power: Vec<f32>,
    num_blocks: usize,
    num_bins: usize,
    bin_hz: f32,
    step_s: f32,
    nfft: usize,
}

impl Waterfall {
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Hertz per frequency bin.
    #[must_use]
    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    /// Seconds per time block.
    #[must_use]
    pub fn step_s(&self) -> f32 {
        self.step_s
    }

    #[must_use]
    pub fn nfft(&self) -> usize {
        self.nfft
    }

    #[must_use]
    pub fn mag_at(&self, block: usize, bin: usize) -> f32 {
        self.mag[block * self.num_bins + bin]
    }

    #[must_use]
    pub fn power_at(&self, block: usize, bin: usize) -> f32 {
        self.power[block * self.num_bins + bin]
    }
}

/// Reusable spectrogram builder. Owns the FFT plan, window and scratch
/// buffers so batch decoding does not reallocate per slot.
pub struct SpectrumAnalyzer {
    planner: RealFftPlanner<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            input: Vec::new(),
            spectrum: Vec::new(),
            scratch: Vec::new(),
            window: Vec::new(),
        }
    }

    pub fn build(
        &mut self,
        samples: &[f32],
        sample_rate_hz: f32,
        profile: &SpectrumProfile,
    ) -> Result<Waterfall, PhyError> {
        let SpectrumProfile { nfft, nstep } = *profile;
        if nfft < 2 || nfft % 2 != 0 || nstep == 0 || !(sample_rate_hz > 0.0) {
            return Err(PhyError::InvalidInput);
        }
        if samples.len() < nfft {
            return Err(PhyError::InputTooShort);
        }

        let r2c = self.planner.plan_fft_forward(nfft);
        self.input.resize(nfft, 0.0);
        self.spectrum.resize(nfft / 2 + 1, Complex::default());
        self.scratch.resize(r2c.get_scratch_len(), Complex::default());
        if self.window.len() != nfft {
            self.window = (0..nfft)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / nfft as f32).cos())
                .collect();
        }

        let num_blocks = (samples.len() - nfft) / nstep + 1;
        let num_bins = nfft / 2 + 1;
        let mut power = vec![0.0f32; num_blocks * num_bins];

        for block in 0..num_blocks {
            let frame = &samples[block * nstep..block * nstep + nfft];
            for ((slot, &s), &w) in self.input.iter_mut().zip(frame).zip(&self.window) {
                *slot = s * w;
            }
            r2c.process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
                .map_err(|_| PhyError::InvalidInput)?;
            let row = &mut power[block * num_bins..(block + 1) * num_bins];
            for (slot, x) in row.iter_mut().zip(&self.spectrum) {
                *slot = x.norm_sqr();
            }
        }

        // Standardise each frequency column across time so the sync score is
        // comparable between quiet and busy parts of the passband. Column
        // statistics run in f64; the log-power values cluster tightly and the
        // variance cancellation is not representable in f32.
        let mut mag = vec![0.0f32; power.len()];
        let inv_n = 1.0 / num_blocks as f64;
        for bin in 0..num_bins {
            let mut sum = 0.0f64;
            let mut sum2 = 0.0f64;
            for block in 0..num_blocks {
                let x = f64::from((power[block * num_bins + bin] + LOG_FLOOR).log10());
                sum += x;
                sum2 += x * x;
            }
            let mean = sum * inv_n;
            let variance = (sum2 * inv_n - mean * mean).max(0.0);
            let inv_std = 1.0 / variance.sqrt().max(1e-9);
            for block in 0..num_blocks {
                let x = f64::from((power[block * num_bins + bin] + LOG_FLOOR).log10());
                mag[block * num_bins + bin] = ((x - mean) * inv_std) as f32;
            }
        }

        Ok(Waterfall {
            mag,
            power,
            num_blocks,
            num_bins,
            bin_hz: sample_rate_hz / nfft as f32,
            step_s: nstep as f32 / sample_rate_hz,
            nfft,
        })
    }
}

/// One-shot spectrogram construction; batch callers should hold a
/// [`SpectrumAnalyzer`] instead.
pub fn build_spectrogram(
    samples: &[f32],
    sample_rate_hz: f32,
    profile: &SpectrumProfile,
) -> Result<Waterfall, PhyError> {
    SpectrumAnalyzer::new().build(samples, sample_rate_hz, profile)
}
