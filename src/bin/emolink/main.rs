//! Host side of the emolink peer: streams samples over serial, predicts
//! emotions, and sends the indicator commands back.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use emolink::{
    args::{
        ClassifyCommand,
        CommandTask::{Classify, InitConfig, Listen, Ports, Record},
        EmoArgs, ListenCommand, RecordCommand,
    },
    config::SessionConfig,
    dummy_peer::DummyPeer,
    engine::{EmotionEngine, OnnxEngine},
    feed::SampleFeed,
    gui::device_selector,
    scheduler::{RoundReport, RoundScheduler},
    session::{RoundOutcome, Session, SessionError},
    transport::{CommandSink, LineSource, LoggedCommands, SerialTransport, RECORD_TOGGLE},
    wav::{record_to_wav, WavReplay},
};
use log::info;
use std::{sync::Arc, time::Duration};

// Example:
// RUST_LOG=info cargo run --bin emolink -- --port /dev/ttyACM0 listen -n 10
// cargo run --bin emolink -- --simulate record --out take.wav -n 32000
// cargo run --bin emolink -- classify take.wav

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = EmoArgs::parse();

    let mut config = SessionConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if let Some(baud) = args.baud {
        config.baud = baud;
    }
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }

    match &args.command {
        Ports => list_ports(),
        InitConfig => {
            config.save(&args.config)?;
            println!("Wrote {:?}", args.config);
            Ok(())
        }
        Listen(listen) => run_listen(&args, config, listen).await,
        Record(record) => run_record(&args, config, record).await,
        Classify(classify) => run_classify(config, classify).await,
    }
}

fn list_ports() -> Result<()> {
    let available_ports = SerialTransport::available_ports()?;
    println!("Available devices:");
    for port in available_ports {
        println!("\t{}", port.to_string_lossy());
    }
    Ok(())
}

type Link = (Box<dyn LineSource>, Box<dyn CommandSink>);

/// Open the peer named on the command line, ask for one, or simulate it.
fn open_link(args: &EmoArgs, config: &SessionConfig) -> Result<Link> {
    if args.simulate {
        info!("Using a simulated peer");
        let peer = DummyPeer::builder()
            .sample_rate(config.mfcc.sample_rate as f64)
            .build();
        return Ok((Box::new(peer), Box::new(LoggedCommands::new())));
    }

    let port = match &args.port {
        Some(port) => port.clone(),
        None => device_selector(SerialTransport::available_ports()?)?
            .ok_or_else(|| anyhow!("No device selected"))?
            .to_string_lossy()
            .into_owned(),
    };

    let transport = SerialTransport::open(&port, config.baud, config.read_timeout())?;
    Ok((Box::new(transport.lines()), Box::new(transport.commands())))
}

fn load_engine(config: &SessionConfig) -> Result<Box<dyn EmotionEngine>> {
    let engine = OnnxEngine::load(&config.model_path, config.engine_threads)
        .with_context(|| format!("Failed to load model {:?}", config.model_path))?;
    Ok(Box::new(engine))
}

async fn run_listen(args: &EmoArgs, mut config: SessionConfig, listen: &ListenCommand) -> Result<()> {
    if let Some(rounds) = listen.rounds {
        config.rounds = rounds;
    }
    if let Some(delay_ms) = listen.delay_ms {
        config.inter_round_delay_ms = delay_ms;
    }

    let engine = load_engine(&config)?;
    let (source, commands) = open_link(args, &config)?;
    let scheduler = RoundScheduler::new(config.rounds, config.inter_round_delay());
    let session = Arc::new(Session::start(config, source, commands, engine).await?);

    let report = run_rounds(&session, scheduler).await;
    print_report(&report);
    Ok(())
}

async fn run_record(args: &EmoArgs, config: SessionConfig, record: &RecordCommand) -> Result<()> {
    let (source, mut commands) = open_link(args, &config)?;
    commands.write_byte(RECORD_TOGGLE)?;

    let mut feed = SampleFeed::spawn(source, config.feed_capacity);
    let stats = record_to_wav(
        &mut feed,
        &record.outfile,
        record.samples,
        config.mfcc.sample_rate,
        config.retry_limit,
    )
    .await;

    // Leave the peer idle again whether or not the capture worked
    commands.write_byte(RECORD_TOGGLE)?;
    let stats = stats?;
    println!(
        "Wrote {} samples to {:?} ({} missed, {} clipped)",
        stats.written, record.outfile, stats.missed, stats.clipped
    );
    Ok(())
}

async fn run_classify(config: SessionConfig, classify: &ClassifyCommand) -> Result<()> {
    let replay = WavReplay::open(&classify.file)?;
    if replay.sample_rate() != config.mfcc.sample_rate {
        log::warn!(
            "{:?} is sampled at {} Hz, features assume {} Hz",
            classify.file,
            replay.sample_rate(),
            config.mfcc.sample_rate
        );
    }

    // Calibration consumes one buffer, each round another `buffer_size - overlap`
    let stride = config.buffer_size - config.overlap;
    let available = replay.remaining().saturating_sub(config.buffer_size) / stride;
    let rounds = classify.rounds.unwrap_or(available);
    if rounds == 0 {
        bail!(
            "{:?} holds {} samples, too few for one round of {} after calibration",
            classify.file,
            replay.remaining(),
            stride
        );
    }

    let engine = load_engine(&config)?;
    let session =
        Arc::new(Session::start(config, replay, LoggedCommands::new(), engine).await?);
    let report = run_rounds(&session, RoundScheduler::new(rounds, Duration::ZERO)).await;
    print_report(&report);
    Ok(())
}

async fn run_rounds(
    session: &Arc<Session>,
    scheduler: RoundScheduler,
) -> RoundReport<RoundOutcome, SessionError> {
    info!(
        "Calibration range [{}, {}]",
        session.calibration().min,
        session.calibration().max
    );
    scheduler
        .run(|round| {
            let session = Arc::clone(session);
            async move { session.run_round(round).await }
        })
        .await
}

fn print_report(report: &RoundReport<RoundOutcome, SessionError>) {
    for (round, outcome) in report.outcomes.iter().enumerate() {
        match outcome {
            Ok(o) => println!(
                "round {:>3}: {:<10} '{}' scores {:?}",
                round, o.decision.label, o.decision.command as char, o.decision.scores
            ),
            Err(e) => println!("round {:>3}: failed: {}", round, e),
        }
    }
    println!(
        "{} of {} rounds succeeded in {:.3}s",
        report.succeeded(),
        report.outcomes.len(),
        report.elapsed.as_secs_f64()
    );
}
