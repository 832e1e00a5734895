//! Learns the peer's raw amplitude range once per session and maps raw
//! samples into [-1, 1].

use crate::feed::SampleFeed;
use crate::transport::TransportError;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower bound of the normalized range.
pub const NORMALIZED_MIN: f64 = -1.0;
/// Upper bound of the normalized range.
pub const NORMALIZED_MAX: f64 = 1.0;

/// Errors raised while calibrating.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Not a single read succeeded during the capture.
    #[error("no samples were captured during calibration")]
    NoSamples,

    /// Every captured sample had the same value, so there is no range.
    #[error("calibration captured a flat signal at {0}")]
    Degenerate(i32),

    /// The link failed in a way retrying cannot fix.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Observed `(min, max)` of the raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRange {
    /// Smallest raw value seen
    pub min: i32,
    /// Largest raw value seen
    pub max: i32,
}

impl CalibrationRange {
    /// Range spanned by `samples`.
    pub fn from_samples<I: IntoIterator<Item = i32>>(samples: I) -> Result<Self, CalibrationError> {
        let (min, max) = samples
            .into_iter()
            .fold(None, |acc: Option<(i32, i32)>, s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            })
            .ok_or(CalibrationError::NoSamples)?;

        if min == max {
            return Err(CalibrationError::Degenerate(min));
        }
        Ok(Self { min, max })
    }

    /// Map a raw sample into [-1, 1]. Values outside the calibration range
    /// land outside [-1, 1]; they are not clamped.
    pub fn normalize(&self, raw: i32) -> f32 {
        normalize(
            raw as f64,
            self.min as f64,
            self.max as f64,
            NORMALIZED_MIN,
            NORMALIZED_MAX,
        ) as f32
    }
}

/// Affine map taking `old_min..old_max` onto `new_min..new_max`.
pub fn normalize(value: f64, old_min: f64, old_max: f64, new_min: f64, new_max: f64) -> f64 {
    (value - old_min) * (new_max - new_min) / (old_max - old_min) + new_min
}

/// Capture `buffer_size` raw samples and return their range.
///
/// Reads that exhaust their retries are skipped. A disconnect ends the
/// capture with an error.
pub async fn calibrate(
    feed: &mut SampleFeed,
    buffer_size: usize,
    retry_limit: usize,
) -> Result<CalibrationRange, CalibrationError> {
    let mut captured = Vec::with_capacity(buffer_size);
    let mut missed = 0;

    for _ in 0..buffer_size {
        match feed.read_sample(retry_limit).await {
            Ok(sample) => captured.push(sample.0),
            Err(TransportError::RetriesExhausted(_)) => missed += 1,
            Err(e) => return Err(e.into()),
        }
    }
    if missed > 0 {
        warn!("Calibration skipped {} of {} samples", missed, buffer_size);
    }

    let range = CalibrationRange::from_samples(captured)?;
    info!("Calibrated raw range to [{}, {}]", range.min, range.max);
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_peer::ScriptedPeer;

    #[test]
    fn endpoints_map_exactly() {
        let range = CalibrationRange { min: -553, max: 839 };
        assert_eq!(range.normalize(839), 1.0);
        assert_eq!(range.normalize(-553), -1.0);
        let zero = range.normalize(0);
        assert!((zero - (2.0 * 553.0 / 1392.0 - 1.0) as f32).abs() < 1e-6);
    }

    #[test]
    fn normalize_is_monotonic() {
        let range = CalibrationRange { min: -40, max: 1000 };
        let mapped: Vec<f32> = (-100..1100).map(|r| range.normalize(r)).collect();
        assert!(mapped.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn generic_affine_map() {
        assert_eq!(normalize(5.0, 0.0, 10.0, 0.0, 100.0), 50.0);
        assert_eq!(normalize(0.0, 0.0, 10.0, -1.0, 1.0), -1.0);
        assert_eq!(normalize(10.0, 0.0, 10.0, -1.0, 1.0), 1.0);
    }

    #[test]
    fn range_from_samples() {
        let range = CalibrationRange::from_samples([12, -553, 839, 0, 4]).unwrap();
        assert_eq!(range, CalibrationRange { min: -553, max: 839 });
        assert!(matches!(
            CalibrationRange::from_samples(Vec::new()),
            Err(CalibrationError::NoSamples)
        ));
        assert!(matches!(
            CalibrationRange::from_samples([3, 3, 3]),
            Err(CalibrationError::Degenerate(3))
        ));
    }

    #[tokio::test]
    async fn calibrates_from_feed() {
        let mut peer = ScriptedPeer::from_samples(&[0, -553, 839]);
        peer.push_error(TransportError::Timeout);
        peer.push_line("17\n");
        let mut feed = SampleFeed::spawn(peer, 16);

        let range = calibrate(&mut feed, 4, 10).await.unwrap();
        assert_eq!(range, CalibrationRange { min: -553, max: 839 });
    }

    #[tokio::test]
    async fn calibration_fails_on_disconnect() {
        let peer = ScriptedPeer::from_samples(&[1, 2]);
        let mut feed = SampleFeed::spawn(peer, 16);
        assert!(matches!(
            calibrate(&mut feed, 4, 10).await,
            Err(CalibrationError::Transport(TransportError::Disconnected))
        ));
    }
}
