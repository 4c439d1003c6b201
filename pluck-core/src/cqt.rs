//! # Constant-Q Transform Module
//!
//! Log-frequency spectral analysis for note classification. Implements the
//! spectral-kernel formulation of the constant-Q transform: every bin owns a
//! Hann-windowed complex sinusoid whose length shrinks as frequency rises,
//! the kernels are moved to the frequency domain once, and each analysis
//! frame then costs one forward FFT plus a sparse dot product per bin.
//!
//! ## Features
//! - One FFT plan, reused for kernels and frames
//! - Sparse kernels (coefficients under 1% of the kernel peak are dropped)
//! - Centred frames with zero padding at the signal edges
//! - Output as `bins x frames` magnitudes

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::config::TransformConfig;
use crate::error::ConfigError;
use crate::tuning;

/// Kernel coefficients below this fraction of the kernel peak are dropped.
const SPARSITY: f32 = 0.01;

/// Non-zero frequency-domain coefficients of one bin's kernel, already
/// conjugated and scaled by `1 / fft_len`.
#[derive(Debug, Clone)]
struct SparseKernel {
    entries: Vec<(usize, Complex<f32>)>,
}

impl SparseKernel {
    /// Correlates the kernel with a frame spectrum.
    #[inline]
    fn apply(&self, spectrum: &[Complex<f32>]) -> Complex<f32> {
        self.entries
            .iter()
            .fold(Complex::new(0.0, 0.0), |acc, &(j, k)| acc + spectrum[j] * k)
    }
}

/// A precomputed constant-Q filter bank.
pub struct ConstantQ {
    hop_length: usize,
    fft_len: usize,
    frequencies: Vec<f32>,
    kernels: Vec<SparseKernel>,
    fft: Arc<dyn Fft<f32>>,
}

impl ConstantQ {
    /// Builds the filter bank for `config` at `sample_rate`.
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - Rate of the signals that will be transformed, in Hz
    /// * `config` - Bin grid: lowest note, bin count, bins per octave, hop
    ///
    /// # Returns
    ///
    /// The transform with one sparse kernel per bin. The FFT length is the
    /// smallest power of two that holds the longest (lowest) kernel. Any
    /// grid `TransformConfig::validate` rejects is returned as that error.
    pub fn new(sample_rate: u32, config: &TransformConfig) -> Result<Self, ConfigError> {
        config.validate(sample_rate)?;

        let frequencies =
            tuning::cqt_frequencies(config.fmin_hz()?, config.n_bins, config.bins_per_octave);
        let sr = sample_rate as f32;
        let q = 1.0 / (2.0_f32.powf(1.0 / config.bins_per_octave as f32) - 1.0);

        // The lowest bin has the longest kernel and sets the frame size.
        let longest = kernel_length(q, sr, frequencies[0]);
        let fft_len = longest.next_power_of_two();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_len);

        let kernels = frequencies
            .iter()
            .map(|&freq| build_kernel(fft.as_ref(), fft_len, kernel_length(q, sr, freq), freq, sr))
            .collect();

        Ok(Self {
            hop_length: config.hop_length,
            fft_len,
            frequencies,
            kernels,
            fft,
        })
    }

    /// Magnitude of every bin over every frame, as `result[bin][frame]`.
    ///
    /// Frame `t` is centred on sample `t * hop_length`; there are
    /// `1 + signal.len() / hop_length` frames. Samples outside the signal
    /// count as zero.
    pub fn transform(&self, signal: &[f32]) -> Vec<Vec<f32>> {
        let n_frames = 1 + signal.len() / self.hop_length;
        let mut out = vec![Vec::with_capacity(n_frames); self.kernels.len()];
        let mut frame = vec![Complex::new(0.0, 0.0); self.fft_len];
        let half = (self.fft_len / 2) as isize;

        for t in 0..n_frames {
            let start = (t * self.hop_length) as isize - half;
            for (i, slot) in frame.iter_mut().enumerate() {
                let idx = start + i as isize;
                let sample = if idx >= 0 && (idx as usize) < signal.len() {
                    signal[idx as usize]
                } else {
                    0.0
                };
                *slot = Complex::new(sample, 0.0);
            }

            self.fft.process(&mut frame);

            for (row, kernel) in out.iter_mut().zip(&self.kernels) {
                row.push(kernel.apply(&frame).norm());
            }
        }
        out
    }

    /// Centre frequency of each bin in Hz.
    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    pub fn n_bins(&self) -> usize {
        self.kernels.len()
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// FFT size used per analysis frame.
    pub fn fft_len(&self) -> usize {
        self.fft_len
    }
}

/// Kernel length `ceil(Q * sr / f)` for a bin at `freq`.
fn kernel_length(q: f32, sample_rate: f32, freq: f32) -> usize {
    ((q * sample_rate / freq).ceil() as usize).max(1)
}

/// Hann window of `len` points, zero at both ends.
fn hann(n: usize, len: usize) -> f32 {
    if len < 2 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * PI * n as f32 / (len - 1) as f32).cos())
}

/// Builds one bin's kernel: a windowed complex sinusoid at `freq`, centred in
/// an `fft_len` frame, transformed and sparsified.
fn build_kernel(
    fft: &dyn Fft<f32>,
    fft_len: usize,
    len: usize,
    freq: f32,
    sample_rate: f32,
) -> SparseKernel {
    let mut buffer = vec![Complex::new(0.0, 0.0); fft_len];
    let offset = (fft_len - len) / 2;
    let omega = 2.0 * PI * freq / sample_rate;
    // Centre the sinusoid's phase on the frame centre
    let centre = (fft_len / 2) as f32;

    for n in 0..len {
        let pos = offset + n;
        let w = hann(n, len) / len as f32;
        let phase = omega * (pos as f32 - centre);
        buffer[pos] = Complex::new(w * phase.cos(), w * phase.sin());
    }

    fft.process(&mut buffer);

    let peak = buffer.iter().map(|c| c.norm()).fold(0.0_f32, f32::max);
    let scale = 1.0 / fft_len as f32;
    let entries = buffer
        .iter()
        .enumerate()
        .filter(|(_, c)| c.norm() >= peak * SPARSITY)
        .map(|(j, c)| (j, c.conj() * scale))
        .collect();

    SparseKernel { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f32 / SR as f32).sin())
            .collect()
    }

    fn peak_bin(cqt: &[Vec<f32>]) -> usize {
        let energies: Vec<f32> = cqt
            .iter()
            .map(|row| row.iter().sum::<f32>() / row.len() as f32)
            .collect();
        crate::classifier::argmax(&energies)
    }

    #[test]
    fn output_shape_follows_hop_and_bins() {
        let cqt = ConstantQ::new(SR, &TransformConfig::default()).unwrap();
        assert_eq!(cqt.n_bins(), 49);
        assert_eq!(cqt.fft_len(), 16_384);

        let out = cqt.transform(&vec![0.0; 3 * 4096]);
        assert_eq!(out.len(), 49);
        assert!(out.iter().all(|row| row.len() == 1 + 3 * 4096 / 2048));
    }

    #[test]
    fn silence_has_zero_energy() {
        let cqt = ConstantQ::new(SR, &TransformConfig::default()).unwrap();
        let out = cqt.transform(&vec![0.0; 8192]);
        assert!(out.iter().flatten().all(|&m| m == 0.0));
    }

    #[test]
    fn sine_peaks_in_its_own_bin() {
        let cqt = ConstantQ::new(SR, &TransformConfig::default()).unwrap();
        for bin in [0usize, 5, 12, 24, 31, 48] {
            let freq = cqt.frequencies()[bin];
            let out = cqt.transform(&sine(freq, 1000.0, 16_384));
            assert_eq!(peak_bin(&out), bin, "sine at {freq:.2} Hz");
        }
    }

    #[test]
    fn empty_signal_yields_one_silent_frame() {
        let cqt = ConstantQ::new(SR, &TransformConfig::default()).unwrap();
        let out = cqt.transform(&[]);
        assert!(out.iter().all(|row| row == &vec![0.0]));
    }

    #[test]
    fn invalid_grid_is_rejected() {
        let config = TransformConfig {
            bins_per_octave: 0,
            ..TransformConfig::default()
        };
        assert!(ConstantQ::new(SR, &config).is_err());
    }
}
