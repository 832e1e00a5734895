//! MFCC feature extraction.
//!
//! Follows the usual librosa recipe so that features match what the
//! classifier was trained on: centered frames with zero padding, periodic
//! Hann window, power spectrum, Slaney-style mel filterbank with area
//! normalization, power-to-dB with an 80 dB floor below the peak, and an
//! orthonormal DCT-II over the mel bands.

use crate::engine::InferenceError;

use realfft::{num_complex::Complex, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Parameters of the cepstral transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfccConfig {
    /// Coefficients kept per frame
    pub n_mfcc: usize,
    /// FFT size, also the analysis window length
    pub n_fft: usize,
    /// Samples between successive frames
    pub hop_length: usize,
    /// Sample rate the peer captures at, in Hz
    pub sample_rate: u32,
    /// Mel bands computed before the DCT
    pub n_mels: usize,
    /// Lowest filterbank frequency, in Hz
    pub fmin: f32,
    /// Highest filterbank frequency, in Hz. `None` means Nyquist.
    pub fmax: Option<f32>,
    /// Dynamic range kept below the loudest bin, in dB
    pub top_db: Option<f32>,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_mfcc: 13,
            n_fft: 2048,
            hop_length: 512,
            sample_rate: 16000,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            top_db: Some(80.0),
        }
    }
}

const AMIN: f32 = 1e-10;

/// A `(frames, coefficients)` matrix stored row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    frames: usize,
    coeffs: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Wrap row-major `data`. Fails if the sizes disagree.
    pub fn new(frames: usize, coeffs: usize, data: Vec<f32>) -> Result<Self, InferenceError> {
        if frames * coeffs != data.len() {
            return Err(InferenceError::InvalidInput(format!(
                "{} values cannot form a {}x{} matrix",
                data.len(),
                frames,
                coeffs
            )));
        }
        Ok(Self {
            frames,
            coeffs,
            data,
        })
    }

    /// `(frames, coefficients)`
    pub fn shape(&self) -> (usize, usize) {
        (self.frames, self.coeffs)
    }

    /// Coefficients of one frame.
    pub fn row(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.coeffs..(frame + 1) * self.coeffs]
    }

    /// All values, frame after frame.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Shape and data of a single-example batch, `[1, frames, coefficients]`.
    pub fn to_batch(&self) -> ([usize; 3], Vec<f32>) {
        ([1, self.frames, self.coeffs], self.data.clone())
    }
}

/// MFCC extractor with a pre-planned FFT and pre-computed filterbank.
pub struct MfccExtractor {
    config: MfccConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<Vec<f32>>,
    dct: Vec<Vec<f32>>,
    fft_input: Vec<f32>,
    fft_output: Vec<Complex<f32>>,
}

impl MfccExtractor {
    /// Plan the transform for `config`.
    pub fn new(config: MfccConfig) -> Result<Self, InferenceError> {
        if config.n_fft == 0 || config.hop_length == 0 || config.n_mels == 0 {
            return Err(InferenceError::InvalidInput(
                "n_fft, hop_length and n_mels must be positive".to_string(),
            ));
        }
        if config.n_mfcc > config.n_mels {
            return Err(InferenceError::InvalidInput(format!(
                "cannot keep {} coefficients from {} mel bands",
                config.n_mfcc, config.n_mels
            )));
        }

        let window = periodic_hann(config.n_fft);
        let nyquist = config.sample_rate as f32 / 2.0;
        let mel_filterbank = create_mel_filterbank(
            config.n_mels,
            config.n_fft,
            config.sample_rate as f32,
            config.fmin,
            config.fmax.unwrap_or(nyquist),
        );
        let dct = create_dct_matrix(config.n_mfcc, config.n_mels);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);
        let fft_input = fft.make_input_vec();
        let fft_output = fft.make_output_vec();

        Ok(Self {
            config,
            fft,
            window,
            mel_filterbank,
            dct,
            fft_input,
            fft_output,
        })
    }

    /// The parameters this extractor was planned with.
    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Number of frames produced for `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.config.hop_length
    }

    /// Compute the MFCC matrix of `audio`.
    pub fn compute(&mut self, audio: &[f32]) -> Result<FeatureMatrix, InferenceError> {
        if audio.is_empty() {
            return Err(InferenceError::InvalidInput("empty window".to_string()));
        }

        let n_fft = self.config.n_fft;
        let pad = n_fft / 2;
        let n_frames = self.frame_count(audio.len());

        let mut mel_db: Vec<Vec<f32>> = Vec::with_capacity(n_frames);
        for frame in 0..n_frames {
            // Frame `frame` starts at `frame * hop` in the padded signal, i.e.
            // `pad` samples earlier in the original one
            let start = (frame * self.config.hop_length) as isize - pad as isize;
            for (i, slot) in self.fft_input.iter_mut().enumerate() {
                let idx = start + i as isize;
                let sample = if idx >= 0 && (idx as usize) < audio.len() {
                    audio[idx as usize]
                } else {
                    0.0
                };
                *slot = sample * self.window[i];
            }

            self.fft
                .process(&mut self.fft_input, &mut self.fft_output)
                .map_err(|e| InferenceError::InvalidInput(format!("FFT failed: {}", e)))?;

            let power: Vec<f32> = self.fft_output.iter().map(|c| c.norm_sqr()).collect();

            let frame_db = self
                .mel_filterbank
                .iter()
                .map(|filter| {
                    let energy: f32 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                    10.0 * energy.max(AMIN).log10()
                })
                .collect();
            mel_db.push(frame_db);
        }

        if let Some(top_db) = self.config.top_db {
            let peak = mel_db
                .iter()
                .flatten()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            let floor = peak - top_db;
            for v in mel_db.iter_mut().flatten() {
                *v = v.max(floor);
            }
        }

        let data = mel_db
            .iter()
            .flat_map(|bands| {
                self.dct
                    .iter()
                    .map(move |basis| basis.iter().zip(bands).map(|(b, m)| b * m).sum::<f32>())
            })
            .collect();

        FeatureMatrix::new(n_frames, self.config.n_mfcc, data)
    }
}

fn periodic_hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / len as f64).cos()) as f32)
        .collect()
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular filters over the `n_fft / 2 + 1` FFT bins, each scaled to unit
/// area.
fn create_mel_filterbank(
    n_mels: usize,
    n_fft: usize,
    sample_rate: f32,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_min = hz_to_mel(fmin as f64);
    let mel_max = hz_to_mel(fmax as f64);
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|i| {
            let (left, center, right) = (hz_points[i], hz_points[i + 1], hz_points[i + 2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis, `n_out` rows of `n_in` weights.
fn create_dct_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f32>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| (scale * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos()) as f32)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_roundtrip() {
        for hz in [0.0, 300.0, 999.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn filterbank_shape() {
        let filterbank = create_mel_filterbank(128, 2048, 16000.0, 0.0, 8000.0);
        assert_eq!(filterbank.len(), 128);
        for filter in &filterbank {
            assert_eq!(filter.len(), 1025);
            assert!(filter.iter().all(|&w| w >= 0.0));
        }
        // Upper bands are wide enough to cover at least one bin
        assert!(filterbank[127].iter().any(|&w| w > 0.0));
    }

    #[test]
    fn dct_rows_are_orthonormal() {
        let dct = create_dct_matrix(13, 128);
        for a in 0..13 {
            for b in 0..13 {
                let dot: f32 = dct[a].iter().zip(&dct[b]).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "rows {} and {}", a, b);
            }
        }
    }

    #[test]
    fn feature_shape_follows_hop() {
        let mut extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let audio = vec![0.0; 16000];
        let features = extractor.compute(&audio).unwrap();
        assert_eq!(features.shape(), (1 + 16000 / 512, 13));
        assert_eq!(features.to_batch().0, [1, 32, 13]);
    }

    #[test]
    fn short_window_still_yields_a_frame() {
        let mut extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let features = extractor.compute(&[0.25; 100]).unwrap();
        assert_eq!(features.shape(), (1, 13));
    }

    #[test]
    fn tone_differs_from_silence() {
        let mut extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let tone: Vec<f32> = (0..8000)
            .map(|i| (2.0 * PI * 440.0 * i as f64 / 16000.0).sin() as f32 * 0.5)
            .collect();
        let silence = extractor.compute(&vec![0.0; 8000]).unwrap();
        let voiced = extractor.compute(&tone).unwrap();

        // Silence floors at -100 dB everywhere, a tone lifts c0 well above it
        assert!(voiced.row(5)[0] > silence.row(5)[0] + 100.0);
        assert!(voiced.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_empty_window() {
        let mut extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        assert!(extractor.compute(&[]).is_err());
    }

    #[test]
    fn matrix_size_checked() {
        assert!(FeatureMatrix::new(2, 3, vec![0.0; 5]).is_err());
        let m = FeatureMatrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(m.row(1), &[3.0, 4.0]);
    }
}
