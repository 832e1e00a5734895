// Commandline argument parser using clap for emolink

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct EmoArgs {
    #[command(subcommand)]
    /// Which task to perform
    pub command: CommandTask,

    /// Session configuration in RON format. Defaults apply if it is missing
    #[arg(short = 'c', long = "config", default_value = "emolink.ron", global = true)]
    pub config: PathBuf,

    /// Serial device of the peer. Prompts with a device selector when omitted
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<String>,

    /// Override the configured baud rate
    #[arg(short = 'b', long = "baud", global = true)]
    pub baud: Option<u32>,

    /// Use a synthetic peer instead of a serial device
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Override the configured model path
    #[arg(short = 'm', long = "model", global = true)]
    pub model: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Stream from the peer and light its indicator with each prediction
    #[command(about)]
    Listen(ListenCommand),

    /// Capture raw samples from the peer into a WAV file
    #[command(about)]
    Record(RecordCommand),

    /// Run the inference rounds over a WAV file instead of a live peer
    #[command(about)]
    Classify(ClassifyCommand),

    /// List the serial devices that are available
    #[command(about)]
    Ports,

    /// Write the effective configuration to the config path
    #[command(about)]
    InitConfig,
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct ListenCommand {
    /// Number of rounds to run, overriding the config
    #[arg(short = 'n', long = "rounds")]
    pub rounds: Option<usize>,

    /// Milliseconds between round launches, overriding the config
    #[arg(short = 'd', long = "delay")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct RecordCommand {
    /// Filename for the WAV capture
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,

    /// Number of samples to capture
    #[arg(short = 'n', long = "samples", default_value_t = 16000 * 5)]
    pub samples: usize,
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct ClassifyCommand {
    /// WAV file to classify
    pub file: PathBuf,

    /// Number of rounds; defaults to as many full refills as the file holds
    #[arg(short = 'n', long = "rounds")]
    pub rounds: Option<usize>,
}
