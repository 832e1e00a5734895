//! One host/peer session: activation, calibration and inference rounds.
//!
//! All session state is carried by a [`Session`] value that rounds share
//! through an `Arc`. The window and the sample feed sit behind a single
//! async mutex, so rounds take turns filling the buffer and never interleave
//! samples; feature extraction and inference run on a snapshot after the
//! lock is released.

use crate::calibration::{calibrate, CalibrationError, CalibrationRange};
use crate::config::{ConfigError, SessionConfig};
use crate::decision::{decide, Decision, DecisionError};
use crate::engine::{EmotionEngine, InferenceError};
use crate::features::MfccExtractor;
use crate::feed::SampleFeed;
use crate::transport::{CommandSink, LineSource, TransportError, RECORD_TOGGLE};
use crate::window::{RefillStats, SlidingWindow, WindowError};

use log::info;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Anything that can end a session or a round.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration was rejected before the session started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Activating the peer or sending a command failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No usable calibration range.
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    /// Refilling the window failed, usually because the peer is gone.
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Feature extraction or the model failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The scores could not be mapped to an emotion.
    #[error(transparent)]
    Decision(#[from] DecisionError),

    /// A previous round panicked while holding a lock.
    #[error("session state poisoned by a panicked round")]
    Poisoned,
}

/// Feature extraction followed by inference.
pub struct Pipeline {
    extractor: MfccExtractor,
    engine: Box<dyn EmotionEngine>,
}

impl Pipeline {
    /// Combine an extractor with a loaded engine.
    pub fn new(extractor: MfccExtractor, engine: Box<dyn EmotionEngine>) -> Self {
        Self { extractor, engine }
    }

    /// Class probabilities for one window of normalized samples.
    pub fn extract_and_infer(&mut self, window: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let features = self.extractor.compute(window)?;
        self.engine.infer(&features)
    }
}

struct Acquisition {
    feed: SampleFeed,
    window: SlidingWindow,
}

/// What one round produced.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Launch order of the round, from zero
    pub round: usize,
    /// The emotion picked and the command sent
    pub decision: Decision,
    /// How the window refill went
    pub refill: RefillStats,
    /// Time from entering the round to sending the command
    pub elapsed: Duration,
}

/// A live session with one peer.
pub struct Session {
    config: SessionConfig,
    calibration: CalibrationRange,
    acquisition: tokio::sync::Mutex<Acquisition>,
    pipeline: Mutex<Pipeline>,
    commands: Mutex<Box<dyn CommandSink>>,
}

impl Session {
    /// Put the peer in record mode, start reading, and calibrate.
    pub async fn start<L, C>(
        config: SessionConfig,
        source: L,
        mut commands: C,
        engine: Box<dyn EmotionEngine>,
    ) -> Result<Self, SessionError>
    where
        L: LineSource,
        C: CommandSink + 'static,
    {
        config.validate()?;
        let window = SlidingWindow::new(config.buffer_size, config.overlap, config.window_policy)?;
        let extractor = MfccExtractor::new(config.mfcc.clone())?;

        commands.write_byte(RECORD_TOGGLE)?;
        info!("Peer switched to record mode");

        let mut feed = SampleFeed::spawn(source, config.feed_capacity);
        let calibration = calibrate(&mut feed, config.buffer_size, config.retry_limit).await?;

        Ok(Self {
            calibration,
            acquisition: tokio::sync::Mutex::new(Acquisition { feed, window }),
            pipeline: Mutex::new(Pipeline::new(extractor, engine)),
            commands: Mutex::new(Box::new(commands)),
            config,
        })
    }

    /// The configuration the session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The range learned at start-up.
    pub fn calibration(&self) -> CalibrationRange {
        self.calibration
    }

    /// Refill the window, classify it, and send the command for the winner.
    pub async fn run_round(&self, round: usize) -> Result<RoundOutcome, SessionError> {
        let started = Instant::now();

        let (snapshot, refill) = {
            let mut acquisition = self.acquisition.lock().await;
            let Acquisition { feed, window } = &mut *acquisition;
            let refill = window
                .refill(feed, &self.calibration, self.config.retry_limit)
                .await?;
            (window.snapshot(), refill)
        };

        let probabilities = self
            .pipeline
            .lock()
            .map_err(|_| SessionError::Poisoned)?
            .extract_and_infer(&snapshot)?;

        let decision = decide(&probabilities, &self.config.mask, &self.config.emotions)?;

        self.commands
            .lock()
            .map_err(|_| SessionError::Poisoned)?
            .write_byte(decision.command)?;

        let elapsed = started.elapsed();
        info!(
            "Round {}: {} ({:?}) in {:.3}s",
            round,
            decision.label,
            decision.command as char,
            elapsed.as_secs_f64()
        );

        Ok(RoundOutcome {
            round,
            decision,
            refill,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_peer::ScriptedPeer;
    use crate::features::FeatureMatrix;
    use crate::transport::LoggedCommands;
    use crate::window::WindowPolicy;

    /// Engine that always returns the same probabilities and remembers the
    /// shape it was fed.
    struct Fixed {
        probabilities: Vec<f32>,
        shapes: std::sync::Arc<Mutex<Vec<(usize, usize)>>>,
    }

    impl EmotionEngine for Fixed {
        fn infer(&mut self, features: &FeatureMatrix) -> Result<Vec<f32>, InferenceError> {
            self.shapes.lock().unwrap().push(features.shape());
            Ok(self.probabilities.clone())
        }
    }

    fn small_config() -> SessionConfig {
        SessionConfig {
            buffer_size: 8,
            overlap: 4,
            window_policy: WindowPolicy::Shift,
            retry_limit: 3,
            feed_capacity: 16,
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn round_sends_masked_winner() {
        let samples: Vec<i32> = (0..8).chain(0..4).collect();
        let commands = LoggedCommands::new();
        let shapes = std::sync::Arc::new(Mutex::new(Vec::new()));
        let engine = Fixed {
            probabilities: vec![0.99700433, 0.8471093, 2.38675348, 1.45389081],
            shapes: shapes.clone(),
        };

        let session = Session::start(
            small_config(),
            ScriptedPeer::from_samples(&samples),
            commands.clone(),
            Box::new(engine),
        )
        .await
        .unwrap();
        assert_eq!(session.calibration(), CalibrationRange { min: 0, max: 7 });

        let outcome = session.run_round(0).await.unwrap();
        assert_eq!(outcome.decision.label, "surprise");
        assert_eq!(outcome.refill, RefillStats { fresh: 4, missed: 0 });
        assert_eq!(commands.sent(), vec![b'x', b'c']);
        assert_eq!(shapes.lock().unwrap()[0], (1, 13));
    }

    #[tokio::test]
    async fn failed_port_aborts_rounds_without_commands() {
        let mut peer = ScriptedPeer::from_samples(&[0, 1, 2, 3, 4, 5, 6, 7]);
        for _ in 0..20 {
            peer.push_error(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        let commands = LoggedCommands::new();
        let session = Session::start(
            small_config(),
            peer,
            commands.clone(),
            Box::new(Fixed {
                probabilities: vec![0.25; 4],
                shapes: Default::default(),
            }),
        )
        .await
        .unwrap();

        for round in 0..3 {
            assert!(matches!(
                session.run_round(round).await,
                Err(SessionError::Window(WindowError::Transport(
                    TransportError::Disconnected
                )))
            ));
        }
        assert_eq!(commands.sent(), vec![b'x']);
    }

    #[tokio::test]
    async fn round_fails_when_peer_is_gone() {
        let session = Session::start(
            small_config(),
            ScriptedPeer::from_samples(&[0, 1, 2, 3, 4, 5, 6, 7]),
            LoggedCommands::new(),
            Box::new(Fixed {
                probabilities: vec![0.25; 4],
                shapes: Default::default(),
            }),
        )
        .await
        .unwrap();

        assert!(matches!(
            session.run_round(0).await,
            Err(SessionError::Window(WindowError::Transport(
                TransportError::Disconnected
            )))
        ));
    }

    #[tokio::test]
    async fn bad_model_output_aborts_round() {
        let samples: Vec<i32> = (0..12).collect();
        let commands = LoggedCommands::new();
        let session = Session::start(
            small_config(),
            ScriptedPeer::from_samples(&samples),
            commands.clone(),
            Box::new(Fixed {
                probabilities: vec![0.5, 0.5],
                shapes: Default::default(),
            }),
        )
        .await
        .unwrap();

        assert!(matches!(
            session.run_round(0).await,
            Err(SessionError::Decision(DecisionError::LengthMismatch { .. }))
        ));
        // Only the activation byte went out
        assert_eq!(commands.sent(), vec![b'x']);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_activation() {
        let commands = LoggedCommands::new();
        let config = SessionConfig {
            overlap: 8,
            ..small_config()
        };
        let result = Session::start(
            config,
            ScriptedPeer::default(),
            commands.clone(),
            Box::new(Fixed {
                probabilities: vec![0.25; 4],
                shapes: Default::default(),
            }),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Config(_))));
        assert!(commands.sent().is_empty());
    }
}
