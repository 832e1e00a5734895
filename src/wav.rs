//! WAV capture and replay with hound.
//!
//! [`record_to_wav`] stores what the peer streams so it can be labelled or
//! replayed later; [`WavReplay`] feeds a WAV file back through the session
//! as if the peer were sending it line by line.

use crate::feed::SampleFeed;
use crate::transport::{LineSource, TransportError};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{info, warn};
use std::{collections::VecDeque, path::Path};
use thiserror::Error;

const NUM_CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Errors raised while reading or writing WAV files.
#[derive(Debug, Error)]
pub enum WavError {
    /// hound could not read or write the file
    #[error("wav error: {0}")]
    Hound(#[from] hound::Error),

    /// The link failed in a way retrying cannot fix.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Replays the first channel of a WAV file as decimal sample lines.
#[derive(Debug)]
pub struct WavReplay {
    samples: VecDeque<i32>,
    sample_rate: u32,
}

impl WavReplay {
    /// Read every sample of `path` into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WavError> {
        let mut reader = WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        // Float files are scaled to the 16-bit range the peer produces
        let interleaved: Vec<i32> = match spec.sample_format {
            SampleFormat::Int => reader.samples::<i32>().collect::<Result<_, _>>()?,
            SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v * i16::MAX as f32).round() as i32))
                .collect::<Result<_, _>>()?,
        };
        let samples: VecDeque<i32> = interleaved.into_iter().step_by(channels).collect();

        if spec.channels > 1 {
            warn!("{:?} has {} channels, replaying the first", path.as_ref(), spec.channels);
        }
        info!(
            "Replaying {} samples at {} Hz from {:?}",
            samples.len(),
            spec.sample_rate,
            path.as_ref()
        );

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Sample rate the file was recorded at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples not yet replayed.
    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl LineSource for WavReplay {
    fn read_line(&mut self) -> Result<String, TransportError> {
        self.samples
            .pop_front()
            .map(|s| format!("{}\n", s))
            .ok_or(TransportError::Disconnected)
    }
}

/// What a recording captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordStats {
    /// Samples written
    pub written: usize,
    /// Reads that ran out of retries and were skipped
    pub missed: usize,
    /// Samples outside the 16-bit range that were clamped
    pub clipped: usize,
}

/// Read `count` samples from `feed` and write them as 16-bit mono PCM.
///
/// Stops early, keeping what was written, if the peer disconnects.
pub async fn record_to_wav(
    feed: &mut SampleFeed,
    path: impl AsRef<Path>,
    count: usize,
    sample_rate: u32,
    retry_limit: usize,
) -> Result<RecordStats, WavError> {
    let spec = WavSpec {
        channels: NUM_CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    let mut stats = RecordStats::default();

    for _ in 0..count {
        match feed.read_sample(retry_limit).await {
            Ok(sample) => {
                let clamped = sample.0.clamp(i16::MIN as i32, i16::MAX as i32);
                if clamped != sample.0 {
                    stats.clipped += 1;
                }
                writer.write_sample(clamped as i16)?;
                stats.written += 1;
            }
            Err(TransportError::RetriesExhausted(_)) => stats.missed += 1,
            Err(TransportError::Disconnected) => {
                warn!("Peer disconnected after {} samples", stats.written);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    writer.finalize()?;
    info!(
        "Recorded {} samples to {:?} ({} missed, {} clipped)",
        stats.written,
        path.as_ref(),
        stats.missed,
        stats.clipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_peer::ScriptedPeer;
    use crate::sample_decoder::RawSample;
    use tempfile::tempdir;

    #[tokio::test]
    async fn record_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let mut peer = ScriptedPeer::from_samples(&[-553, 0, 839]);
        peer.push_line("nope\n");
        peer.push_line("40000\n");
        let mut feed = SampleFeed::spawn(peer, 8);

        let stats = record_to_wav(&mut feed, &path, 10, 16000, 2).await.unwrap();
        assert_eq!(
            stats,
            RecordStats {
                written: 4,
                missed: 0,
                clipped: 1
            }
        );

        let mut replay = WavReplay::open(&path).unwrap();
        assert_eq!(replay.sample_rate(), 16000);
        assert_eq!(replay.remaining(), 4);
        let lines: Vec<i32> = (0..4)
            .map(|_| replay.read_line().unwrap().parse::<RawSample>().unwrap().0)
            .collect();
        assert_eq!(lines, vec![-553, 0, 839, i16::MAX as i32]);
        assert!(matches!(
            replay.read_line(),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn stereo_replays_first_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for (l, r) in [(1i16, -1i16), (2, -2), (3, -3)] {
            writer.write_sample(l).unwrap();
            writer.write_sample(r).unwrap();
        }
        writer.finalize().unwrap();

        let mut replay = WavReplay::open(&path).unwrap();
        assert_eq!(replay.read_line().unwrap(), "1\n");
        assert_eq!(replay.read_line().unwrap(), "2\n");
        assert_eq!(replay.read_line().unwrap(), "3\n");
    }
}
