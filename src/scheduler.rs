//! Launches inference rounds back to back on the async runtime.
//!
//! Rounds are started one `inter_round_delay` apart without waiting for the
//! previous one to finish, then awaited together. The report carries the
//! wall-clock time of the whole batch, which stays close to
//! `rounds × delay` as long as rounds overlap.

use log::{info, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, Instant};

/// Why a round produced no result.
#[derive(Debug, Error)]
pub enum RoundError<E> {
    /// The round ran and returned an error.
    #[error("round failed: {0}")]
    Failed(E),

    /// The round's task panicked or was cancelled.
    #[error("round task did not complete: {0}")]
    Join(#[from] JoinError),
}

/// Outcome of a batch of rounds.
#[derive(Debug)]
pub struct RoundReport<T, E> {
    /// Wall-clock time from the first launch until the last round finished
    pub elapsed: Duration,
    /// Per-round results, in launch order
    pub outcomes: Vec<Result<T, RoundError<E>>>,
}

impl<T, E> RoundReport<T, E> {
    /// Rounds that returned a result.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Rounds that did not.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Fixed-cadence round launcher.
#[derive(Debug, Clone, Copy)]
pub struct RoundScheduler {
    rounds: usize,
    inter_round_delay: Duration,
}

impl RoundScheduler {
    /// Launch `rounds` rounds, `inter_round_delay` apart.
    pub fn new(rounds: usize, inter_round_delay: Duration) -> Self {
        Self {
            rounds,
            inter_round_delay,
        }
    }

    /// Run the batch. `make_round` builds the future for round `i`; each one
    /// is spawned as its own task.
    pub async fn run<F, Fut, T, E>(&self, mut make_round: F) -> RoundReport<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for round in 0..self.rounds {
            let fut = make_round(round);
            tasks.spawn(async move { (round, fut.await) });
            sleep(self.inter_round_delay).await;
        }

        let mut outcomes: Vec<Option<Result<T, RoundError<E>>>> =
            (0..self.rounds).map(|_| None).collect();
        let mut unplaced = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((round, result)) => {
                    if let Err(e) = &result {
                        warn!("Round {} failed: {}", round, e);
                    }
                    outcomes[round] = Some(result.map_err(RoundError::Failed));
                }
                Err(e) => {
                    warn!("Round task did not complete: {}", e);
                    unplaced.push(e);
                }
            }
        }

        // A task that panicked cannot tell us which round it was, so its
        // error takes the first empty slot
        let mut unplaced = unplaced.into_iter();
        let outcomes = outcomes
            .into_iter()
            .filter_map(|o| o.or_else(|| unplaced.next().map(|e| Err(RoundError::Join(e)))))
            .collect();

        let elapsed = started.elapsed();
        info!(
            "Ran {} rounds in {:.3}s",
            self.rounds,
            elapsed.as_secs_f64()
        );
        RoundReport { elapsed, outcomes }
    }
}
