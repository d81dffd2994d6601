//! Command recording from the microphone
//!
//! Device work happens on worker threads. The session loop only ever spawns
//! them and hears back through the signal sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::adapter::Recorder;
use crate::session::{RecordingSignal, Signal, SignalSink};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Attempts to open the input device before giving up
const OPEN_ATTEMPTS: u32 = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a worker waits for the other user of the device to close it
pub const GATE_WAIT: Duration = Duration::from_secs(2);

/// Exclusive hold on the physical input device
///
/// The recognizer and the recorder open the microphone on their own threads.
/// Whoever arrives second waits here until the first has closed its stream.
#[derive(Debug, Clone, Default)]
pub struct InputGate {
    device: Arc<Mutex<()>>,
}

impl InputGate {
    /// Create an unheld gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the device; `None` if it stayed held
    #[must_use]
    pub fn acquire(&self, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.device.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) if Instant::now() >= deadline => return None,
                Err(TryLockError::WouldBlock) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Whether a worker currently has the device open
    #[must_use]
    pub fn is_held(&self) -> bool {
        matches!(self.device.try_lock(), Err(TryLockError::WouldBlock))
    }
}

/// Find the default input device and a config close to 16kHz mono
///
/// # Errors
///
/// Returns error if no input device is available
pub fn open_input() -> Result<(Device, StreamConfig)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    let config = match preferred {
        Some(supported) => supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
        None => device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .config(),
    };

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio input opened"
    );

    Ok((device, config))
}

/// Build an input stream that appends mono samples to `buffer`
///
/// # Errors
///
/// Returns error if the device refuses the stream
#[allow(clippy::cast_precision_loss)]
pub fn build_input_stream(device: &Device, config: &StreamConfig, buffer: Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    if channels == 1 {
                        buf.extend_from_slice(data);
                    } else {
                        buf.extend(
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                        );
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(stream)
}

/// Records command clips from the default input device
///
/// Each recording runs on its own thread and reports through the signal sink,
/// including a device that never opens.
pub struct MicRecorder {
    sink: SignalSink,
    gate: InputGate,
    active: Option<ActiveRecording>,
}

struct ActiveRecording {
    stop: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
}

impl MicRecorder {
    /// Create a recorder reporting to `sink` that shares the device through `gate`
    #[must_use]
    pub const fn new(sink: SignalSink, gate: InputGate) -> Self {
        Self {
            sink,
            gate,
            active: None,
        }
    }
}

impl Recorder for MicRecorder {
    fn start(&mut self, max_duration: Duration) -> Result<()> {
        self.abort();

        let stop = Arc::new(AtomicBool::new(false));
        let discard = Arc::new(AtomicBool::new(false));

        let job = RecordingJob {
            max_duration,
            stop: Arc::clone(&stop),
            discard: Arc::clone(&discard),
            sink: self.sink.clone(),
            gate: self.gate.clone(),
        };

        std::thread::Builder::new()
            .name("command-recorder".to_string())
            .spawn(move || job.run())?;

        self.active = Some(ActiveRecording { stop, discard });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::SeqCst);
        }
    }

    fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            active.discard.store(true, Ordering::SeqCst);
            active.stop.store(true, Ordering::SeqCst);
        }
    }

    fn probe(&mut self) -> Result<()> {
        let sink = self.sink.clone();
        let gate = self.gate.clone();

        std::thread::Builder::new()
            .name("microphone-check".to_string())
            .spawn(move || {
                // one of our own workers has it open
                let Some(_device) = gate.acquire(Duration::ZERO) else {
                    return;
                };
                match open_briefly() {
                    Ok(()) => {
                        tracing::info!("microphone available again");
                        sink.send(Signal::MicrophoneReleased);
                    }
                    Err(e) => tracing::debug!(error = %e, "microphone still unavailable"),
                }
            })?;
        Ok(())
    }
}

fn open_briefly() -> Result<()> {
    let (device, config) = open_input()?;
    let stream = build_input_stream(&device, &config, Arc::default())?;
    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(())
}

struct RecordingJob {
    max_duration: Duration,
    stop: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    sink: SignalSink,
    gate: InputGate,
}

impl RecordingJob {
    fn run(self) {
        let Some(_device) = self.gate.acquire(GATE_WAIT) else {
            self.fail("microphone still held by recognition");
            return;
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (stream, sample_rate) = match open_with_retry(&buffer, &self.stop) {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(&e.to_string());
                return;
            }
        };

        if let Err(e) = stream.play() {
            self.fail(&e.to_string());
            return;
        }

        let started = Instant::now();
        while !self.stop.load(Ordering::SeqCst) && started.elapsed() < self.max_duration {
            std::thread::sleep(POLL_INTERVAL);
        }
        drop(stream);

        if self.discard.load(Ordering::SeqCst) {
            tracing::debug!("recording discarded");
            return;
        }

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        tracing::debug!(
            samples = samples.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "recording complete"
        );

        let signal = match samples_to_wav(&samples, sample_rate) {
            Ok(wav) => RecordingSignal::Finished(wav),
            Err(e) => RecordingSignal::Failed(e.to_string()),
        };
        self.sink.recording(signal);
    }

    fn fail(&self, reason: &str) {
        if self.discard.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(reason, "command recording could not start");
        self.sink.recording(RecordingSignal::Failed(reason.to_string()));
    }
}

fn open_with_retry(buffer: &Arc<Mutex<Vec<f32>>>, stop: &AtomicBool) -> Result<(Stream, u32)> {
    let mut last_error = None;

    for attempt in 1..=OPEN_ATTEMPTS {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let opened = open_input()
            .and_then(|(device, config)| Ok((build_input_stream(&device, &config, Arc::clone(buffer))?, config.sample_rate.0)));

        match opened {
            Ok(opened) => return Ok(opened),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "failed to open microphone");
                last_error = Some(e);
                std::thread::sleep(Duration::from_millis(200) * attempt);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Audio("microphone unavailable".to_string())))
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
