//! emolink listens to a microcontroller's microphone over a serial line,
//! classifies the speaker's emotion, and tells the microcontroller which
//! colour to show.
//!
//! The peer streams one raw sample per text line while in record mode. The
//! host learns the amplitude range once ([`calibration`]), keeps a sliding
//! window of normalized samples ([`window`]), turns each window into MFCC
//! features ([`features`]), runs a compact classifier on them ([`engine`]),
//! weights the class probabilities and picks a winner ([`decision`]), and
//! sends back a one-byte command. A [`session::Session`] ties these together
//! for one peer, and the [`scheduler`] launches rounds at a fixed cadence.
//!
//! Without hardware, [`dummy_peer`] simulates the microcontroller and
//! [`wav`] replays recordings through the same pipeline.

#![warn(missing_docs)]
#[allow(missing_docs)]
pub mod args;
pub mod calibration;
pub mod config;
pub mod decision;
pub mod dummy_peer;
pub mod engine;
pub mod features;
pub mod feed;
pub mod gui;
pub mod sample_decoder;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod wav;
pub mod window;
