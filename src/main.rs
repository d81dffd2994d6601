use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use cpal::traits::StreamTrait;
use tracing_subscriber::EnvFilter;

use jarvis_runtime::backend::HttpBackend;
use jarvis_runtime::config::RecognizerKind;
use jarvis_runtime::session::{
    Collaborators, ConversationStore, JsonlStore, PlaybackSignal, Runtime, SessionMachine, Signal,
    signal_channel,
};
use jarvis_runtime::voice::{
    CaptureSession, ConsoleRecognizer, EngineError, EngineFactory, InputGate, MicRecorder, MicrophoneRecognizer,
    Player, RecognitionEngine, SAMPLE_RATE, SpeakerPlayer, SpeechSynthesizer, SpeechToText, build_input_stream,
    calculate_energy, open_input, samples_to_wav,
};
use jarvis_runtime::{Config, ConsoleShell};

/// Jarvis - Hands-free voice assistant runtime
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through the configured TTS voice
    Say {
        /// Text to speak
        text: String,
    },
    /// Show which action a command would trigger
    Dispatch {
        /// What the user said
        text: String,
        /// Assistant reply, checked for control markers
        #[arg(long, default_value = "")]
        reply: String,
    },
    /// Show the saved conversation
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,jarvis_runtime=info",
        1 => "info,jarvis_runtime=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant().await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Say { text } => say(&text).await,
        Command::Dispatch { text, reply } => dispatch(&text, &reply),
        Command::History { limit } => history(limit),
    }
}

/// Run the voice session until teardown or Ctrl-C
#[allow(clippy::future_not_send)]
async fn run_assistant() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let (sink, rx) = signal_channel();
    let gate = InputGate::new();
    let engines = engine_factory(&config, &sink, &gate)?;

    let machine = SessionMachine::new(config.session_options(), config.dispatcher()?)?;
    let capture = CaptureSession::new(config.session.capture_limit, config.session.min_capture_bytes);
    let backend = HttpBackend::new(config.backend.url.clone(), config.backend.timeout)?;
    let store = JsonlStore::in_dir(&config.data_dir)?;
    let speech = config
        .speech_synthesizer()?
        .map(|tts| Arc::new(tts) as Arc<dyn SpeechSynthesizer>);

    let parts = Collaborators {
        engines,
        recorder: Box::new(MicRecorder::new(sink.clone(), gate)),
        player: Box::new(SpeakerPlayer::new(sink.clone())),
        backend: Arc::new(backend),
        shell: Box::new(ConsoleShell::new()),
        store: Box::new(store),
        speech,
    };
    let runtime = Runtime::new(machine, capture, parts, config.backend.timeout, (sink.clone(), rx));

    let interrupt = sink.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            interrupt.send(Signal::Teardown);
        }
    });

    sink.send(Signal::Activate);
    tracing::info!(
        wake_word = %config.wake_word,
        recognizer = %config.recognition.engine,
        backend = %config.backend.url,
        "jarvis ready - say \"{}\"",
        config.wake_word
    );

    runtime.run().await?;
    Ok(())
}

/// Build the recognition engine factory for the configured recognizer
fn engine_factory(
    config: &Config,
    sink: &jarvis_runtime::SignalSink,
    gate: &InputGate,
) -> anyhow::Result<EngineFactory> {
    let sink = sink.clone();
    match config.recognition.engine {
        RecognizerKind::Console => Ok(Box::new(move || -> Result<Box<dyn RecognitionEngine>, EngineError> {
            Ok(Box::new(ConsoleRecognizer::new(sink.clone())))
        })),
        RecognizerKind::Microphone => {
            let provider = config.recognition.stt_provider;
            let api_key = config.stt_api_key().unwrap_or_default().to_string();
            let stt = Arc::new(SpeechToText::new(provider, api_key, config.recognition.stt_model.clone())?);
            let handle = tokio::runtime::Handle::current();
            let gate = gate.clone();

            Ok(Box::new(move || -> Result<Box<dyn RecognitionEngine>, EngineError> {
                Ok(Box::new(MicrophoneRecognizer::new(
                    sink.clone(),
                    Arc::clone(&stt),
                    handle.clone(),
                    gate.clone(),
                )))
            }))
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (device, config) = open_input()?;
    let buffer: Arc<Mutex<Vec<f32>>> = Arc::default();
    let stream = build_input_stream(&device, &config, Arc::clone(&buffer))?;
    stream.play()?;

    println!("Sample rate: {} Hz", config.sample_rate.0);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]", i + 1, energy, peak, meter);
    }

    drop(stream);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let num_samples = SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();
    let wav = samples_to_wav(&samples, SAMPLE_RATE)?;

    let (sink, mut rx) = signal_channel();
    let mut player = SpeakerPlayer::new(sink);
    player.play(wav)?;

    match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        Ok(Some(Signal::Playback(PlaybackSignal::Ended))) => {}
        Ok(Some(Signal::Playback(PlaybackSignal::Failed(reason)))) => anyhow::bail!("playback failed: {reason}"),
        _ => anyhow::bail!("playback did not finish"),
    }

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Synthesize `text` and play it
#[allow(clippy::future_not_send)]
async fn say(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let Some(tts) = config.speech_synthesizer()? else {
        anyhow::bail!("speech is off or no key is set for {}", config.speech.provider);
    };

    let audio = tts.synthesize(text).await?;
    println!("Synthesized {} bytes with {}", audio.len(), config.speech.provider);

    let (sink, mut rx) = signal_channel();
    let mut player = SpeakerPlayer::new(sink);
    player.play(audio)?;

    match tokio::time::timeout(Duration::from_secs(60), rx.recv()).await {
        Ok(Some(Signal::Playback(PlaybackSignal::Ended))) => Ok(()),
        Ok(Some(Signal::Playback(PlaybackSignal::Failed(reason)))) => anyhow::bail!("playback failed: {reason}"),
        _ => anyhow::bail!("playback did not finish"),
    }
}

/// Show the action a command maps to
fn dispatch(text: &str, reply: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let dispatcher = config.dispatcher()?;

    match dispatcher.dispatch(text, reply) {
        Some(result) => {
            println!("action: {:?}", result.action);
            println!("source: {:?}", result.source);
            println!("reply:  {}", result.reply);
        }
        None => println!("no matching intent"),
    }
    Ok(())
}

/// Print the most recent conversation entries
fn history(limit: usize) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = JsonlStore::in_dir(&config.data_dir)?;
    let entries = store.load()?;

    if entries.is_empty() {
        println!("No conversation history at {}", store.path().display());
        return Ok(());
    }

    let skip = entries.len().saturating_sub(limit);
    for entry in entries.iter().skip(skip) {
        println!(
            "{} {:>9}: {}",
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            entry.role.as_str(),
            entry.text
        );
    }
    Ok(())
}
