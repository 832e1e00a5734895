//! Fixed-size sliding window of normalized samples.
//!
//! Every round keeps the first `overlap` slots (after moving the buffer left
//! by `overlap`) and rewrites the remaining `buffer_size - overlap` slots with
//! fresh samples, so consecutive windows share context.

use crate::calibration::CalibrationRange;
use crate::feed::SampleFeed;
use crate::transport::TransportError;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the buffer moves left before the tail is refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowPolicy {
    /// Rotate left by `overlap`. Slots the refill does not reach can hold
    /// entries wrapped around from the front of the previous window.
    Rotate,
    /// Shift left by `overlap` and zero the vacated tail.
    #[default]
    Shift,
}

/// Errors raised by the window.
#[derive(Debug, Error)]
pub enum WindowError {
    /// The overlap must leave at least one slot to refill.
    #[error("overlap {overlap} must be smaller than the buffer size {buffer_size}")]
    InvalidOverlap {
        /// Requested overlap
        overlap: usize,
        /// Requested capacity
        buffer_size: usize,
    },

    /// The link failed in a way retrying cannot fix.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What one refill did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefillStats {
    /// Slots written with a fresh sample
    pub fresh: usize,
    /// Slots left untouched because every read attempt failed
    pub missed: usize,
}

/// The window buffer. Its length never changes.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: Vec<f32>,
    overlap: usize,
    policy: WindowPolicy,
}

impl SlidingWindow {
    /// A zeroed window of `buffer_size` slots.
    pub fn new(buffer_size: usize, overlap: usize, policy: WindowPolicy) -> Result<Self, WindowError> {
        if overlap >= buffer_size {
            return Err(WindowError::InvalidOverlap {
                overlap,
                buffer_size,
            });
        }
        Ok(Self {
            samples: vec![0.0; buffer_size],
            overlap,
            policy,
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; a window has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Slots carried over between rounds.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Current contents.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Copy of the current contents, for work done outside the lock.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.clone()
    }

    /// Move the buffer left by `overlap` according to the policy.
    pub fn advance(&mut self) {
        match self.policy {
            WindowPolicy::Rotate => self.samples.rotate_left(self.overlap),
            WindowPolicy::Shift => {
                let len = self.samples.len();
                self.samples.copy_within(self.overlap.., 0);
                self.samples[len - self.overlap..].fill(0.0);
            }
        }
    }

    /// Write one normalized value into refill slot `slot`, counted from the
    /// first slot after the overlap.
    pub fn write_fresh(&mut self, slot: usize, value: f32) {
        self.samples[self.overlap + slot] = value;
    }

    /// Advance, then read `buffer_size - overlap` samples from `feed` into
    /// the tail. A slot whose read runs out of retries keeps its post-advance
    /// value.
    pub async fn refill(
        &mut self,
        feed: &mut SampleFeed,
        calibration: &CalibrationRange,
        retry_limit: usize,
    ) -> Result<RefillStats, WindowError> {
        self.advance();

        let mut stats = RefillStats::default();
        for slot in 0..self.samples.len() - self.overlap {
            match feed.read_sample(retry_limit).await {
                Ok(raw) => {
                    self.write_fresh(slot, calibration.normalize(raw.0));
                    stats.fresh += 1;
                }
                Err(TransportError::RetriesExhausted(n)) => {
                    debug!("Slot {} kept its old value after {} attempts", self.overlap + slot, n);
                    stats.missed += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if stats.missed > 0 {
            warn!(
                "Refill missed {} of {} samples",
                stats.missed,
                stats.fresh + stats.missed
            );
        }
        Ok(stats)
    }
}
