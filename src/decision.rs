//! Turns class probabilities into an emotion label and a command byte.
//!
//! The raw confidences of the classifier are not on the same scale for every
//! class, so each one is multiplied by a per-class weight from the
//! [`RecognitionMask`] before picking the winner.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors raised while deciding.
#[derive(Debug, Error, PartialEq)]
pub enum DecisionError {
    /// Probabilities, mask and emotion table must all have one entry per
    /// class.
    #[error("got {probabilities} probabilities, {mask} mask weights and {emotions} emotions")]
    LengthMismatch {
        /// Length of the probability vector
        probabilities: usize,
        /// Length of the mask
        mask: usize,
        /// Number of known emotions
        emotions: usize,
    },

    /// Nothing to choose from.
    #[error("no classes to choose from")]
    Empty,

    /// A command must fit in one byte on the wire.
    #[error("command {0:?} is not a single ascii byte")]
    NonAsciiCommand(char),
}

/// Per-class multipliers applied to the probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionMask(pub Vec<f32>);

impl Default for RecognitionMask {
    fn default() -> Self {
        Self(vec![1.0, 30000.0, 40000.0, 500.0])
    }
}

impl RecognitionMask {
    /// Element-wise product with `probabilities`.
    pub fn apply(&self, probabilities: &[f32]) -> Vec<f32> {
        probabilities.iter().zip(&self.0).map(|(p, w)| p * w).collect()
    }
}

/// A class the classifier knows, with the byte that selects its indicator
/// state on the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emotion {
    /// Human-readable name
    pub label: String,
    /// Command character sent to the peer
    pub command: char,
}

/// The classes in model output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionTable(pub Vec<Emotion>);

impl Default for EmotionTable {
    fn default() -> Self {
        Self(
            [
                ("neutral", 'a'),
                ("happy", 'b'),
                ("surprise", 'c'),
                ("unpleasant", 'd'),
            ]
            .into_iter()
            .map(|(label, command)| Emotion {
                label: label.to_string(),
                command,
            })
            .collect(),
        )
    }
}

impl EmotionTable {
    /// Number of classes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no classes are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that every command fits in one byte.
    pub fn validate(&self) -> Result<(), DecisionError> {
        match self.0.iter().find(|e| !e.command.is_ascii()) {
            Some(e) => Err(DecisionError::NonAsciiCommand(e.command)),
            None => Ok(()),
        }
    }
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Index of the winning class
    pub index: usize,
    /// Its label
    pub label: String,
    /// Byte to send to the peer
    pub command: u8,
    /// Masked scores the winner was picked from
    pub scores: Vec<f32>,
}

/// Index of the largest value. On ties the lower index wins; NaN never wins.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) => match v.partial_cmp(&b) {
                Some(Ordering::Greater) => Some((i, v)),
                _ => best,
            },
            None if v.is_nan() => None,
            None => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Weight `probabilities` by `mask` and pick the winning emotion.
pub fn decide(
    probabilities: &[f32],
    mask: &RecognitionMask,
    emotions: &EmotionTable,
) -> Result<Decision, DecisionError> {
    if probabilities.len() != mask.0.len() || probabilities.len() != emotions.len() {
        return Err(DecisionError::LengthMismatch {
            probabilities: probabilities.len(),
            mask: mask.0.len(),
            emotions: emotions.len(),
        });
    }

    let scores = mask.apply(probabilities);
    let index = argmax(&scores).ok_or(DecisionError::Empty)?;
    let emotion = &emotions.0[index];
    if !emotion.command.is_ascii() {
        return Err(DecisionError::NonAsciiCommand(emotion.command));
    }

    Ok(Decision {
        index,
        label: emotion.label.clone(),
        command: emotion.command as u8,
        scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_surprise_wins() {
        let probabilities = [0.99700433, 0.8471093, 2.38675348, 1.45389081];
        let decision = decide(
            &probabilities,
            &RecognitionMask::default(),
            &EmotionTable::default(),
        )
        .unwrap();

        assert_eq!(decision.index, 2);
        assert_eq!(decision.label, "surprise");
        assert_eq!(decision.command, b'c');
        assert!((decision.scores[1] - 25413.28).abs() < 0.1);
        assert!((decision.scores[2] - 95470.14).abs() < 0.1);
    }

    #[test]
    fn heavier_weight_flips_winner() {
        let probabilities = [0.99700433, 0.8471093, 2.38675348, 1.45389081];
        let mask = RecognitionMask(vec![1.0, 300000.0, 40000.0, 500.0]);
        let decision = decide(&probabilities, &mask, &EmotionTable::default()).unwrap();
        assert_eq!(decision.label, "happy");
        assert_eq!(decision.command, b'b');
    }

    #[test]
    fn ties_go_to_lower_index() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        let mask = RecognitionMask(vec![1.0; 4]);
        let decision = decide(&[0.25; 4], &mask, &EmotionTable::default()).unwrap();
        assert_eq!(decision.label, "neutral");
        assert_eq!(decision.command, b'a');
    }

    #[test]
    fn nan_never_wins() {
        assert_eq!(argmax(&[f32::NAN, 0.1, f32::NAN, 0.05]), Some(1));
        assert_eq!(argmax(&[f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn decide_is_deterministic() {
        let probabilities = [0.1, 0.0002, 0.00001, 0.01];
        let mask = RecognitionMask::default();
        let table = EmotionTable::default();
        let first = decide(&probabilities, &mask, &table).unwrap();
        for _ in 0..10 {
            assert_eq!(decide(&probabilities, &mask, &table).unwrap(), first);
        }
    }

    #[test]
    fn lengths_must_match() {
        let err = decide(&[0.5, 0.5], &RecognitionMask::default(), &EmotionTable::default());
        assert_eq!(
            err,
            Err(DecisionError::LengthMismatch {
                probabilities: 2,
                mask: 4,
                emotions: 4
            })
        );
    }

    #[test]
    fn table_rejects_wide_commands() {
        let table = EmotionTable(vec![Emotion {
            label: "joy".to_string(),
            command: 'é',
        }]);
        assert_eq!(table.validate(), Err(DecisionError::NonAsciiCommand('é')));
        assert!(EmotionTable::default().validate().is_ok());
    }
}
