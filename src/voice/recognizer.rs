//! Continuous recognition engines
//!
//! [`MicrophoneRecognizer`] segments the microphone stream by energy and
//! transcribes each utterance. [`ConsoleRecognizer`] treats lines typed on
//! stdin as final results. Both tag every callback with the run they were
//! started as.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::StreamTrait;

use super::adapter::{EngineError, RecognitionEngine, RecognitionErrorKind, RunId};
use super::capture::{GATE_WAIT, InputGate, build_input_stream, open_input, samples_to_wav};
use super::segmenter::SpeechSegmenter;
use super::stt::SpeechToText;
use crate::session::{RecognitionSignal, Signal, SignalSink};

/// How often buffered microphone audio is handed to the segmenter
const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// Microphone recognition using energy segmentation and a cloud STT provider
///
/// `start` only spawns the worker. Opening the device, and any failure doing
/// so, happens on the worker thread.
pub struct MicrophoneRecognizer {
    sink: SignalSink,
    stt: Arc<SpeechToText>,
    runtime: tokio::runtime::Handle,
    gate: InputGate,
    active: Option<ActiveRun>,
}

struct ActiveRun {
    /// Dropping the sender wakes the worker
    stop: mpsc::Sender<()>,
    alive: Arc<AtomicBool>,
}

impl MicrophoneRecognizer {
    /// Create a recognizer; transcription runs on `runtime` and the device is
    /// shared through `gate`
    #[must_use]
    pub const fn new(
        sink: SignalSink,
        stt: Arc<SpeechToText>,
        runtime: tokio::runtime::Handle,
        gate: InputGate,
    ) -> Self {
        Self {
            sink,
            stt,
            runtime,
            gate,
            active: None,
        }
    }

    fn running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.alive.load(Ordering::SeqCst))
    }
}

impl RecognitionEngine for MicrophoneRecognizer {
    fn start(&mut self, run: RunId) -> Result<(), EngineError> {
        if self.running() {
            return Err(EngineError::AlreadyStarted);
        }

        let (stop, stopped) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let worker = RecognitionWorker {
            run,
            alive: Arc::clone(&alive),
            sink: self.sink.clone(),
            stt: Arc::clone(&self.stt),
            runtime: self.runtime.clone(),
            gate: self.gate.clone(),
        };

        std::thread::Builder::new()
            .name("recognition".to_string())
            .spawn(move || worker.run(&stopped))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn recognition thread");
                EngineError::Poisoned
            })?;

        self.active = Some(ActiveRun { stop, alive });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(active) = self.active.take() {
            let _ = active.stop.send(());
        }
        Ok(())
    }

    fn is_running(&self) -> Option<bool> {
        Some(self.running())
    }
}

struct RecognitionWorker {
    run: RunId,
    alive: Arc<AtomicBool>,
    sink: SignalSink,
    stt: Arc<SpeechToText>,
    runtime: tokio::runtime::Handle,
    gate: InputGate,
}

impl RecognitionWorker {
    fn run(self, stopped: &mpsc::Receiver<()>) {
        let failure = self.listen(stopped);
        self.alive.store(false, Ordering::SeqCst);

        if let Some(kind) = failure {
            self.sink.recognition(self.run, RecognitionSignal::Error(kind));
        }
        self.sink.recognition(self.run, RecognitionSignal::Ended);
    }

    /// Listen until stopped; the device is closed by the time this returns
    fn listen(&self, stopped: &mpsc::Receiver<()>) -> Option<RecognitionErrorKind> {
        let Some(_device) = self.gate.acquire(GATE_WAIT) else {
            tracing::warn!(run = self.run, "microphone still held by command capture");
            return Some(RecognitionErrorKind::AudioCapture);
        };
        if !matches!(stopped.try_recv(), Err(mpsc::TryRecvError::Empty)) {
            return None;
        }

        let buffer: Arc<Mutex<Vec<f32>>> = Arc::default();
        let opened = open_input().and_then(|(device, config)| {
            let stream = build_input_stream(&device, &config, Arc::clone(&buffer))?;
            Ok((stream, config.sample_rate.0))
        });

        let (stream, sample_rate) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(error = %e, "recognition could not open the microphone");
                return Some(RecognitionErrorKind::AudioCapture);
            }
        };

        if let Err(e) = stream.play() {
            tracing::warn!(error = %e, "recognition stream refused to start");
            return Some(RecognitionErrorKind::AudioCapture);
        }
        tracing::debug!(run = self.run, "recognition listening");

        let failed: Arc<Mutex<Option<RecognitionErrorKind>>> = Arc::default();
        let mut segmenter = SpeechSegmenter::new();

        loop {
            match stopped.recv_timeout(CHUNK_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
            }

            if let Some(kind) = failed.lock().ok().and_then(|mut slot| slot.take()) {
                return Some(kind);
            }

            let samples = buffer
                .lock()
                .map(|mut buf| std::mem::take(&mut *buf))
                .unwrap_or_default();

            if let Some(utterance) = segmenter.push(&samples) {
                self.transcribe(&utterance, sample_rate, &failed);
            }
        }
    }

    /// Hand an utterance to the STT service without holding up the stream
    fn transcribe(&self, samples: &[f32], sample_rate: u32, failed: &Arc<Mutex<Option<RecognitionErrorKind>>>) {
        let wav = match samples_to_wav(samples, sample_rate) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return;
            }
        };

        let run = self.run;
        let sink = self.sink.clone();
        let stt = Arc::clone(&self.stt);
        let failed = Arc::clone(failed);

        self.runtime.spawn(async move {
            match stt.transcribe(&wav).await {
                Ok(text) if text.trim().is_empty() => {}
                Ok(text) => {
                    sink.recognition(run, RecognitionSignal::Final(text));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "utterance transcription failed");
                    if let Ok(mut slot) = failed.lock() {
                        slot.get_or_insert(e.kind());
                    }
                }
            }
        });
    }
}

/// Recognition from stdin, one final result per line
///
/// Lines typed while recognition is stopped are dropped. End of input tears
/// the session down.
pub struct ConsoleRecognizer {
    sink: SignalSink,
    listening: Arc<AtomicBool>,
    run: Arc<AtomicU64>,
    reader_started: bool,
}

impl ConsoleRecognizer {
    /// Create a console recognizer reporting to `sink`
    #[must_use]
    pub fn new(sink: SignalSink) -> Self {
        Self {
            sink,
            listening: Arc::new(AtomicBool::new(false)),
            run: Arc::new(AtomicU64::new(0)),
            reader_started: false,
        }
    }

    fn spawn_reader(&mut self) -> Result<(), EngineError> {
        if self.reader_started {
            return Ok(());
        }

        let sink = self.sink.clone();
        let listening = Arc::clone(&self.listening);
        let run = Arc::clone(&self.run);

        std::thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    let line = line.trim();
                    if line.is_empty() || !listening.load(Ordering::SeqCst) {
                        continue;
                    }
                    let current = run.load(Ordering::SeqCst);
                    if !sink.recognition(current, RecognitionSignal::Final(line.to_string())) {
                        return;
                    }
                }
                tracing::info!("console input closed");
                sink.send(Signal::Teardown);
            })
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn console reader");
                EngineError::Poisoned
            })?;

        self.reader_started = true;
        Ok(())
    }
}

impl RecognitionEngine for ConsoleRecognizer {
    fn start(&mut self, run: RunId) -> Result<(), EngineError> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        self.run.store(run, Ordering::SeqCst);
        if let Err(e) = self.spawn_reader() {
            self.listening.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.sink.recognition(self.run.load(Ordering::SeqCst), RecognitionSignal::Ended);
        }
        Ok(())
    }

    fn is_running(&self) -> Option<bool> {
        Some(self.listening.load(Ordering::SeqCst))
    }
}
