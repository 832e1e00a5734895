//! Bridges the blocking serial reader onto the async side of the session.
//!
//! A dedicated thread pulls lines off a [`LineSource`], decodes them into
//! [`RawSample`]s and pushes every result, good or bad, into a bounded
//! channel. Rounds then await samples without blocking the runtime.

use crate::sample_decoder::RawSample;
use crate::transport::{LineSource, TransportError};

use log::{debug, info, warn};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

/// Default number of decoded lines buffered between the reader thread and
/// the rounds.
pub const DEFAULT_FEED_CAPACITY: usize = 4096;

type ReadResult = Result<RawSample, TransportError>;

/// Async stream of decoded samples backed by a reader thread.
pub struct SampleFeed {
    rx: mpsc::Receiver<ReadResult>,
    _reader: JoinHandle<()>,
}

impl SampleFeed {
    /// Start reading `source` on its own thread.
    pub fn spawn<L: LineSource>(source: L, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reader = thread::spawn(move || read_lines(source, tx));
        Self {
            rx,
            _reader: reader,
        }
    }

    /// Await one valid sample, giving up after `retry_limit` failed reads.
    ///
    /// Timeouts, undecodable and non-numeric lines each use up one attempt.
    /// Running out of attempts is reported as
    /// [`TransportError::RetriesExhausted`]; a closed source, or one whose
    /// port failed with an I/O error, is reported as
    /// [`TransportError::Disconnected`] straight away.
    pub async fn read_sample(&mut self, retry_limit: usize) -> ReadResult {
        for attempt in 1..=retry_limit {
            match self.rx.recv().await {
                Some(Ok(sample)) => return Ok(sample),
                Some(Err(TransportError::Disconnected)) | None => {
                    return Err(TransportError::Disconnected)
                }
                Some(Err(e)) => {
                    debug!("Sample read attempt {}/{} failed: {}", attempt, retry_limit, e);
                }
            }
        }
        Err(TransportError::RetriesExhausted(retry_limit))
    }
}

fn read_lines<L: LineSource>(mut source: L, tx: mpsc::Sender<ReadResult>) {
    loop {
        let item = match source.read_line() {
            Ok(line) => line
                .parse::<RawSample>()
                .map_err(|e| TransportError::Parse(e.input)),
            // A port that fails outside of a timeout does not come back
            Err(TransportError::Io(e)) => {
                warn!("Serial port failed, treating the peer as gone: {}", e);
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(e),
        };
        let closed = matches!(item, Err(TransportError::Disconnected));
        // The receiving side is gone once the session is dropped
        if tx.blocking_send(item).is_err() || closed {
            break;
        }
    }
    info!("Sample reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_peer::ScriptedPeer;

    #[tokio::test]
    async fn skips_bad_lines_within_budget() {
        let peer = ScriptedPeer::from_lines(["oops\n", "", "42\n"]);
        let mut feed = SampleFeed::spawn(peer, 8);
        assert_eq!(feed.read_sample(10).await.unwrap(), RawSample(42));
    }

    #[tokio::test]
    async fn exhausts_after_limit() {
        let mut peer = ScriptedPeer::from_lines(["a\n", "b\n"]);
        peer.push_error(TransportError::Timeout);
        peer.push_line("7\n");
        let mut feed = SampleFeed::spawn(peer, 8);

        assert!(matches!(
            feed.read_sample(3).await,
            Err(TransportError::RetriesExhausted(3))
        ));
        // The good line that followed is still there for the next read
        assert_eq!(feed.read_sample(3).await.unwrap(), RawSample(7));
    }

    #[tokio::test]
    async fn io_failure_ends_the_feed() {
        let mut peer = ScriptedPeer::from_lines(["5\n"]);
        peer.push_error(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()));
        peer.push_line("6\n");
        let mut feed = SampleFeed::spawn(peer, 8);

        assert_eq!(feed.read_sample(10).await.unwrap(), RawSample(5));
        assert!(matches!(
            feed.read_sample(10).await,
            Err(TransportError::Disconnected)
        ));
        // Nothing after the failure is delivered
        assert!(matches!(
            feed.read_sample(10).await,
            Err(TransportError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn reports_disconnect() {
        let peer = ScriptedPeer::from_lines(["1\n"]);
        let mut feed = SampleFeed::spawn(peer, 8);
        assert_eq!(feed.read_sample(10).await.unwrap(), RawSample(1));
        assert!(matches!(
            feed.read_sample(10).await,
            Err(TransportError::Disconnected)
        ));
    }
}
