//! Session runtime
//!
//! Drives a [`SessionMachine`] with real collaborators. Platform callbacks
//! arrive as [`Signal`]s; the runtime updates the recognition manager, the
//! microphone arbiter and the capture session, feeds the resulting event to
//! the machine and carries out the effects it returns. Effects that complete
//! synchronously (a refused start, an undecodable segment) are fed straight
//! back before the next signal is read. Anything slow (backend calls, speech
//! synthesis, device work) runs elsewhere and reports back as a signal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use uuid::Uuid;

use super::conversation::{ConversationEntry, ConversationStore};
use super::event::{Effect, Event, PlaybackSignal, RecognitionSignal, RecordingSignal, Signal, SignalSink};
use super::machine::SessionMachine;
use super::state::SessionState;
use crate::backend::{BackendError, CommandBackend, CommandRequest};
use crate::shell::Shell;
use crate::voice::{
    AudioSegment, CaptureSession, EngineFactory, MicArbiter, MicHolder, Player, RecognitionManager, Recorder, RunId,
    SpeechSynthesizer, StartOutcome,
};

/// Slack past the recording ceiling before the recorder is stopped by force
const CAPTURE_GRACE: Duration = Duration::from_secs(1);

/// Ceiling on synthesizing one spoken notice
const SPEECH_TIMEOUT: Duration = Duration::from_secs(15);

/// Platform and application collaborators of a runtime
pub struct Collaborators {
    /// Builds continuous recognition engines
    pub engines: EngineFactory,
    /// Command recorder
    pub recorder: Box<dyn Recorder>,
    /// Reply player
    pub player: Box<dyn Player>,
    /// Command endpoint
    pub backend: Arc<dyn CommandBackend>,
    /// Application shell
    pub shell: Box<dyn Shell>,
    /// Conversation persistence
    pub store: Box<dyn ConversationStore>,
    /// Voices notices and fallback replies; text only when absent
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
}

/// Async driver for one voice session
pub struct Runtime {
    id: Uuid,
    machine: SessionMachine,
    recognition: RecognitionManager,
    mic: MicArbiter,
    capture: CaptureSession,
    recorder: Box<dyn Recorder>,
    player: Box<dyn Player>,
    backend: Arc<dyn CommandBackend>,
    shell: Box<dyn Shell>,
    store: Box<dyn ConversationStore>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    backend_timeout: Duration,
    sink: SignalSink,
    signals: mpsc::UnboundedReceiver<Signal>,
    finished: bool,
}

impl Runtime {
    /// Create a runtime over `channel`; the adapters in `parts` must report to
    /// the same channel's sink
    ///
    /// History is loaded from the store once; a store that cannot be read
    /// starts the session with no history.
    pub fn new(
        mut machine: SessionMachine,
        capture: CaptureSession,
        parts: Collaborators,
        backend_timeout: Duration,
        channel: (SignalSink, mpsc::UnboundedReceiver<Signal>),
    ) -> Self {
        match parts.store.load() {
            Ok(entries) => machine.seed_history(entries),
            Err(e) => tracing::warn!(error = %e, "failed to load conversation history"),
        }

        let (sink, signals) = channel;
        Self {
            id: Uuid::new_v4(),
            machine,
            recognition: RecognitionManager::new(parts.engines),
            mic: MicArbiter::new(),
            capture,
            recorder: parts.recorder,
            player: parts.player,
            backend: parts.backend,
            shell: parts.shell,
            store: parts.store,
            speech: parts.speech,
            backend_timeout,
            sink,
            signals,
            finished: false,
        }
    }

    /// Session id used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Sender for signals into this runtime
    #[must_use]
    pub fn sink(&self) -> SignalSink {
        self.sink.clone()
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// The session machine
    #[must_use]
    pub const fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    /// Whether the lifecycle manager considers recognition running
    #[must_use]
    pub const fn is_recognition_active(&self) -> bool {
        self.recognition.is_active()
    }

    /// Recognition engines built so far
    #[must_use]
    pub const fn engines_created(&self) -> u32 {
        self.recognition.instances_created()
    }

    /// Recognition run currently accepted, if any
    #[must_use]
    pub const fn recognition_run(&self) -> Option<RunId> {
        self.recognition.current_run()
    }

    /// Current microphone owner
    #[must_use]
    pub const fn mic_holder(&self) -> Option<MicHolder> {
        self.mic.holder()
    }

    /// Whether the session has been torn down
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run until teardown
    ///
    /// Signals are handled in arrival order; the watchdog ticks in between.
    ///
    /// # Errors
    ///
    /// Returns error if the signal channel closes before teardown
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) -> crate::Result<()> {
        let span = tracing::info_span!("session", id = %self.id);
        async move {
            let period = self.machine.options().watchdog_interval;
            let mut watchdog = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(watchdog_secs = period.as_secs(), "voice session running");

            while !self.finished {
                tokio::select! {
                    signal = self.signals.recv() => {
                        let Some(signal) = signal else {
                            return Err(crate::Error::Recognition("signal channel closed".to_string()));
                        };
                        self.handle_signal(signal);
                    }
                    _ = watchdog.tick() => self.tick(),
                }
            }

            tracing::info!("voice session finished");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Wait for the next signal and handle it; `false` once torn down or the
    /// channel is closed
    #[allow(clippy::future_not_send)]
    pub async fn process_next(&mut self) -> bool {
        if self.finished {
            return false;
        }
        match self.signals.recv().await {
            Some(signal) => {
                self.handle_signal(signal);
                !self.finished
            }
            None => false,
        }
    }

    /// Handle every signal already queued, without waiting
    pub fn drain(&mut self) {
        while !self.finished {
            let Ok(signal) = self.signals.try_recv() else {
                break;
            };
            self.handle_signal(signal);
        }
    }

    /// Handle one signal
    pub fn handle_signal(&mut self, signal: Signal) {
        let teardown = matches!(signal, Signal::Teardown);
        if let Some(event) = self.translate(signal) {
            self.dispatch(event);
        }
        if teardown {
            self.finished = true;
        }
    }

    /// Run one watchdog check
    pub fn tick(&mut self) {
        let recognition_active = self.recognition.is_active();
        self.dispatch(Event::Tick { recognition_active });
    }

    fn translate(&mut self, signal: Signal) -> Option<Event> {
        let event = match signal {
            Signal::Activate => Event::Activate,
            Signal::Teardown => Event::Teardown,
            Signal::Visibility { hidden } => Event::VisibilityChanged { hidden },
            Signal::MicrophoneContended => Event::MicrophoneContended,
            Signal::MicrophoneReleased => Event::MicrophoneReleased,
            Signal::Recognition { run, signal } => return self.on_recognition(run, signal),
            Signal::Recording(recording) => {
                if !self.capture.is_active() {
                    tracing::debug!("recording callback without capture in progress");
                    return None;
                }
                match recording {
                    RecordingSignal::Finished(bytes) => match self.capture.finish(bytes, &mut self.mic) {
                        Ok(audio) => Event::CommandCaptured(audio),
                        Err(e) => Event::CaptureFailed(e),
                    },
                    RecordingSignal::Failed(reason) => Event::CaptureFailed(self.capture.fail(&reason, &mut self.mic)),
                }
            }
            Signal::Playback(PlaybackSignal::Ended) => Event::PlaybackFinished,
            Signal::Playback(PlaybackSignal::Failed(reason)) => Event::PlaybackFailed(reason),
            Signal::Backend { generation, outcome } => Event::BackendReplied { generation, outcome },
            Signal::CaptureDeadline { generation } => {
                if self.capture.generation() == Some(generation) {
                    tracing::warn!(generation, "recorder overran its ceiling, stopping it");
                    self.recorder.stop();
                }
                return None;
            }
            Signal::RecoveryElapsed { generation } => Event::RecoveryElapsed { generation },
            Signal::Speech { generation, audio } => Event::SpeechReady { generation, audio },
        };
        Some(event)
    }

    /// Engine callbacks only count for the run the manager is tracking
    fn on_recognition(&mut self, run: RunId, signal: RecognitionSignal) -> Option<Event> {
        if !self.recognition.accepts(run) {
            tracing::trace!(run, current = ?self.recognition.current_run(), "callback from a finished run dropped");
            return None;
        }

        let event = match signal {
            RecognitionSignal::Partial(text) => Event::PartialResult(text),
            RecognitionSignal::Final(text) => Event::FinalResult(text),
            RecognitionSignal::Error(kind) => {
                self.recognition.on_error(kind, run, &mut self.mic)?;
                Event::RecognitionFailed(kind)
            }
            RecognitionSignal::Ended => Event::RecognitionEnded {
                unexpected: self.recognition.on_ended(run, &mut self.mic),
            },
        };
        Some(event)
    }

    fn dispatch(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for effect in self.machine.handle(event) {
                if let Some(feedback) = self.apply(effect) {
                    pending.push_back(feedback);
                }
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::StartRecognition(reason) => match self.recognition.start(reason, &mut self.mic) {
                StartOutcome::Started | StartOutcome::AlreadyRunning => Some(Event::RecognitionStarted),
                StartOutcome::MicrophoneBusy => {
                    tracing::warn!(%reason, holder = ?self.mic.holder(), "microphone busy, watchdog will retry");
                    None
                }
                StartOutcome::Failed(kind) => Some(Event::StartFailed { reason, kind }),
            },
            Effect::StopRecognition(reason) => {
                self.recognition.stop(reason, &mut self.mic);
                None
            }
            Effect::BeginCapture {
                generation,
                max_duration,
            } => match self.capture.begin(generation, &mut self.mic, self.recorder.as_mut()) {
                Ok(()) => {
                    self.schedule(max_duration + CAPTURE_GRACE, Signal::CaptureDeadline { generation });
                    None
                }
                Err(e) => Some(Event::CaptureFailed(e)),
            },
            Effect::AbortCapture => {
                self.capture.abort(&mut self.mic, self.recorder.as_mut());
                None
            }
            Effect::Submit { generation, request } => {
                self.submit(generation, request);
                None
            }
            Effect::Play(segment) => self.play(&segment).err().map(Event::PlaybackFailed),
            Effect::StopPlayback => {
                self.player.stop();
                None
            }
            Effect::ScheduleRecovery { generation, after } => {
                self.schedule(after, Signal::RecoveryElapsed { generation });
                None
            }
            Effect::ProbeMicrophone => {
                self.check_microphone();
                None
            }
            Effect::Navigate(path) => {
                self.shell.navigate(&path);
                None
            }
            Effect::PerformFeature(feature) => {
                self.shell.perform(feature);
                None
            }
            Effect::Close => {
                self.shell.close();
                None
            }
            Effect::Record(entry) => {
                self.record(&entry);
                None
            }
            Effect::Notify(notice) => {
                self.shell.notify(&notice);
                None
            }
            Effect::Speak { generation, text } => {
                self.speak(generation, text);
                None
            }
        }
    }

    fn submit(&self, generation: u64, request: CommandRequest) {
        let backend = Arc::clone(&self.backend);
        let sink = self.sink.clone();
        let limit = self.backend_timeout;

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(limit, backend.submit(request))
                .await
                .unwrap_or(Err(BackendError::Timeout(limit)));
            if !sink.send(Signal::Backend { generation, outcome }) {
                tracing::debug!(generation, "session gone before backend replied");
            }
        });
    }

    fn play(&mut self, segment: &AudioSegment) -> Result<(), String> {
        let audio = segment.decode().map_err(|e| e.to_string())?;
        self.player.play(audio).map_err(|e| {
            tracing::warn!(error = %e, "reply segment failed to start");
            e.to_string()
        })
    }

    /// The recorder reports `MicrophoneReleased` itself once the device opens
    fn check_microphone(&mut self) {
        if !self.mic.is_free() {
            return;
        }
        if let Err(e) = self.recorder.probe() {
            tracing::debug!(error = %e, "microphone check not scheduled");
        }
    }

    fn speak(&self, generation: u64, text: String) {
        let Some(speech) = self.speech.clone() else {
            tracing::trace!("no synthesizer, notice shown only");
            return;
        };
        let sink = self.sink.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(SPEECH_TIMEOUT, speech.synthesize(&text)).await {
                Ok(Ok(audio)) => {
                    if !sink.send(Signal::Speech { generation, audio }) {
                        tracing::debug!(generation, "session gone before speech was ready");
                    }
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "speech synthesis failed"),
                Err(_) => tracing::warn!(timeout_secs = SPEECH_TIMEOUT.as_secs(), "speech synthesis timed out"),
            }
        });
    }

    fn record(&mut self, entry: &ConversationEntry) {
        if let Err(e) = self.store.append(entry) {
            tracing::warn!(error = %e, "failed to persist conversation entry");
        }
        self.shell.show(entry);
    }

    fn schedule(&self, after: Duration, signal: Signal) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sink.send(signal);
        });
    }
}
