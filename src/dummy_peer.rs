//! Stand-ins for the microcontroller, for running a session with no hardware
//! attached.
//!
//! [`DummyPeer`] synthesizes an endless noisy tone, formatted exactly like the
//! firmware's record-mode output. [`ScriptedPeer`] replays a fixed list of
//! lines and errors, which makes transport behaviour reproducible in tests.

use crate::transport::{LineSource, TransportError};

use rand::prelude::*;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::thread;
use std::time::Duration;

/// Synthetic record-mode peer.
pub struct DummyPeer {
    amplitude: f64,
    frequency: f64,
    sample_rate: f64,
    noise: f64,
    offset: i32,
    pace: Option<Duration>,
    tick: u64,
    rng: StdRng,
}

impl DummyPeer {
    /// Start configuring a [`DummyPeer`].
    pub fn builder() -> DummyPeerBuilder {
        DummyPeerBuilder::default()
    }

    fn next_sample(&mut self) -> i32 {
        let t = self.tick as f64 / self.sample_rate;
        self.tick += 1;
        let tone = self.amplitude * (2.0 * PI * self.frequency * t).sin();
        let jitter = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..self.noise)
        } else {
            0.0
        };
        (tone + jitter).round() as i32 + self.offset
    }
}

impl LineSource for DummyPeer {
    fn read_line(&mut self) -> Result<String, TransportError> {
        if let Some(pace) = self.pace {
            thread::sleep(pace);
        }
        Ok(format!("{}\r\n", self.next_sample()))
    }
}

/// Builder for [`DummyPeer`].
#[derive(Debug, Clone)]
pub struct DummyPeerBuilder {
    amplitude: f64,
    frequency: f64,
    sample_rate: f64,
    noise: f64,
    offset: i32,
    pace: Option<Duration>,
    seed: Option<u64>,
}

impl Default for DummyPeerBuilder {
    fn default() -> Self {
        Self {
            amplitude: 700.0,
            frequency: 220.0,
            sample_rate: 16000.0,
            noise: 40.0,
            offset: 143,
            pace: None,
            seed: None,
        }
    }
}

impl DummyPeerBuilder {
    /// Peak amplitude of the tone, in raw sample units.
    pub fn amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Tone frequency in Hz.
    pub fn frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Rate at which the tone is sampled, in Hz.
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Half-width of the uniform noise added to every sample.
    pub fn noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// DC offset of the microphone.
    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }

    /// Sleep this long before every line, to mimic a slow serial link.
    pub fn pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Fix the noise generator seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Finish building.
    pub fn build(self) -> DummyPeer {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DummyPeer {
            amplitude: self.amplitude,
            frequency: self.frequency,
            sample_rate: self.sample_rate,
            noise: self.noise,
            offset: self.offset,
            pace: self.pace,
            tick: 0,
            rng,
        }
    }
}

/// Replays a fixed script, then reports [`TransportError::Disconnected`].
#[derive(Debug, Default)]
pub struct ScriptedPeer {
    script: VecDeque<Result<String, TransportError>>,
}

impl ScriptedPeer {
    /// A script made only of lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: lines.into_iter().map(|l| Ok(l.into())).collect(),
        }
    }

    /// A script of newline-terminated decimal samples.
    pub fn from_samples(samples: &[i32]) -> Self {
        Self::from_lines(samples.iter().map(|s| format!("{}\n", s)))
    }

    /// Append a line.
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.script.push_back(Ok(line.into()));
    }

    /// Append a failed read.
    pub fn push_error(&mut self, error: TransportError) {
        self.script.push_back(Err(error));
    }
}

impl LineSource for ScriptedPeer {
    fn read_line(&mut self) -> Result<String, TransportError> {
        self.script
            .pop_front()
            .unwrap_or(Err(TransportError::Disconnected))
    }
}
