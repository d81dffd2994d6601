//! Shared test utilities
//!
//! Fake platform adapters that record every call, plus a harness wiring them
//! into a [`Runtime`]. Fake engines tag their callbacks with the run they
//! were started as, like the real ones.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use jarvis_runtime::backend::{BackendError, CommandBackend, CommandReply, CommandRequest};
use jarvis_runtime::intent::{FeatureAction, IntentDispatcher};
use jarvis_runtime::session::{
    Collaborators, ConversationEntry, ConversationStore, Notice, PlaybackSignal, RecognitionSignal, RecordingSignal,
    Role, Runtime, SessionMachine, SessionOptions, SessionState, Signal, SignalSink, signal_channel,
};
use jarvis_runtime::shell::Shell;
use jarvis_runtime::voice::{
    AudioSegment, CaptureSession, EngineError, EngineFactory, MicHolder, Player, RecognitionEngine,
    RecognitionErrorKind, Recorder, RunId, SpeechSynthesizer,
};

/// What the fake recognition engines have been asked to do
#[derive(Debug, Default)]
pub struct EngineLog {
    pub instances: u32,
    pub starts: u32,
    pub stops: u32,
    /// Engines currently running
    pub live: u32,
    /// Run of the most recent successful start
    pub run: Option<RunId>,
    /// Errors returned by upcoming `start` calls, in order
    pub start_errors: Vec<EngineError>,
    /// Running flag of each engine built, in build order
    running: Vec<Arc<AtomicBool>>,
}

impl EngineLog {
    /// Stop the newest engine without being asked; returns whether it was running
    pub fn die(&mut self) -> bool {
        let Some(running) = self.running.last() else {
            return false;
        };
        let was_running = running.swap(false, Ordering::SeqCst);
        if was_running {
            self.live -= 1;
        }
        was_running
    }
}

struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
    sink: SignalSink,
    running: Arc<AtomicBool>,
    run: RunId,
}

impl RecognitionEngine for FakeEngine {
    fn start(&mut self, run: RunId) -> Result<(), EngineError> {
        let mut log = self.log.lock().unwrap();
        log.starts += 1;
        if !log.start_errors.is_empty() {
            return Err(log.start_errors.remove(0));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        log.live += 1;
        log.run = Some(run);
        self.run = run;
        Ok(())
    }

    /// Like a real engine, the end of the stopped run is reported late
    fn stop(&mut self) -> Result<(), EngineError> {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        if self.running.swap(false, Ordering::SeqCst) {
            log.live -= 1;
            self.sink.recognition(self.run, RecognitionSignal::Ended);
        }
        Ok(())
    }
}

/// Factory building fake engines that share `log`
pub fn fake_engines(log: &Arc<Mutex<EngineLog>>, sink: &SignalSink) -> EngineFactory {
    let log = Arc::clone(log);
    let sink = sink.clone();
    Box::new(move || -> Result<Box<dyn RecognitionEngine>, EngineError> {
        let running = Arc::new(AtomicBool::new(false));
        let mut shared = log.lock().unwrap();
        shared.instances += 1;
        shared.running.push(Arc::clone(&running));
        drop(shared);
        Ok(Box::new(FakeEngine {
            log: Arc::clone(&log),
            sink: sink.clone(),
            running,
            run: 0,
        }))
    })
}

/// What the fake recorder has been asked to do
#[derive(Debug)]
pub struct RecorderLog {
    pub starts: Vec<Duration>,
    pub stops: u32,
    pub aborts: u32,
    /// Background microphone checks requested
    pub checks: u32,
    /// Clip delivered as soon as recording starts; `None` keeps recording
    /// until stopped
    pub clip: Option<Vec<u8>>,
    /// A recording is waiting for `stop`
    pub recording: bool,
    /// Whether the device is currently free
    pub available: bool,
}

impl Default for RecorderLog {
    fn default() -> Self {
        Self {
            starts: Vec::new(),
            stops: 0,
            aborts: 0,
            checks: 0,
            clip: Some(vec![7; 4096]),
            recording: false,
            available: true,
        }
    }
}

struct FakeRecorder {
    log: Arc<Mutex<RecorderLog>>,
    sink: SignalSink,
}

impl Recorder for FakeRecorder {
    fn start(&mut self, max_duration: Duration) -> jarvis_runtime::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.starts.push(max_duration);
        match log.clip.clone() {
            Some(clip) => {
                self.sink.recording(RecordingSignal::Finished(clip));
            }
            None => log.recording = true,
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        if std::mem::take(&mut log.recording) {
            self.sink.recording(RecordingSignal::Finished(vec![7; 4096]));
        }
    }

    fn abort(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.aborts += 1;
        log.recording = false;
    }

    /// Answers through the sink, as the device check runs off the loop
    fn probe(&mut self) -> jarvis_runtime::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.checks += 1;
        if log.available {
            self.sink.send(Signal::MicrophoneReleased);
        }
        Ok(())
    }
}

/// What the fake player has been asked to do
#[derive(Debug, Default)]
pub struct PlayerLog {
    pub played: Vec<Vec<u8>>,
    pub stops: u32,
    /// Leave segments playing until the test ends them
    pub manual: bool,
}

/// Segment the fake player reports as failed mid-playback
pub const FAILING_AUDIO: &[u8] = b"fail";

struct FakePlayer {
    log: Arc<Mutex<PlayerLog>>,
    sink: SignalSink,
}

impl Player for FakePlayer {
    fn play(&mut self, audio: Vec<u8>) -> jarvis_runtime::Result<()> {
        let mut log = self.log.lock().unwrap();
        let signal = if audio == FAILING_AUDIO {
            PlaybackSignal::Failed("device error".to_string())
        } else {
            PlaybackSignal::Ended
        };
        log.played.push(audio);
        if !log.manual {
            self.sink.playback(signal);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}

/// Texts the fake synthesizer was asked to say
#[derive(Debug, Default)]
pub struct SpeechLog {
    pub spoken: Vec<String>,
    /// Fail every synthesis
    pub broken: bool,
}

/// Audio the fake synthesizer produces for `text`
pub fn speech_audio(text: &str) -> Vec<u8> {
    format!("speech:{text}").into_bytes()
}

struct FakeSynth(Arc<Mutex<SpeechLog>>);

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> jarvis_runtime::Result<Vec<u8>> {
        let mut log = self.0.lock().unwrap();
        log.spoken.push(text.to_string());
        if log.broken {
            return Err(jarvis_runtime::Error::Tts("voice service down".to_string()));
        }
        Ok(speech_audio(text))
    }
}

/// How the fake backend answers
#[derive(Debug, Clone)]
pub enum BackendBehavior {
    Reply(CommandReply),
    Fail(BackendError),
    /// Never answer
    Hang,
}

/// Scripted command backend
#[derive(Debug)]
pub struct FakeBackend {
    behavior: Mutex<BackendBehavior>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CommandRequest>>,
}

impl FakeBackend {
    pub fn new(behavior: BackendBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, behavior: BackendBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CommandRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CommandBackend for FakeBackend {
    async fn submit(&self, request: CommandRequest) -> Result<CommandReply, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            BackendBehavior::Reply(reply) => Ok(reply),
            BackendBehavior::Fail(error) => Err(error),
            BackendBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Calls made on the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCall {
    Navigate(String),
    Perform(FeatureAction),
    Close,
    Notify(Notice),
}

#[derive(Debug, Default)]
pub struct ShellLog {
    pub calls: Vec<ShellCall>,
}

struct FakeShell(Arc<Mutex<ShellLog>>);

impl Shell for FakeShell {
    fn navigate(&mut self, path: &str) {
        self.0.lock().unwrap().calls.push(ShellCall::Navigate(path.to_string()));
    }

    fn perform(&mut self, feature: FeatureAction) {
        self.0.lock().unwrap().calls.push(ShellCall::Perform(feature));
    }

    fn close(&mut self) {
        self.0.lock().unwrap().calls.push(ShellCall::Close);
    }

    fn notify(&mut self, notice: &Notice) {
        self.0.lock().unwrap().calls.push(ShellCall::Notify(notice.clone()));
    }
}

/// Conversation store shared with the test
#[derive(Debug, Default, Clone)]
pub struct SharedStore(pub Arc<Mutex<Vec<ConversationEntry>>>);

impl ConversationStore for SharedStore {
    fn append(&mut self, entry: &ConversationEntry) -> jarvis_runtime::Result<()> {
        self.0.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn load(&self) -> jarvis_runtime::Result<Vec<ConversationEntry>> {
        Ok(self.0.lock().unwrap().clone())
    }
}

/// Reply with `n` playable segments
pub fn reply(transcript: &str, text: &str, n: u8) -> CommandReply {
    CommandReply {
        transcript: transcript.to_string(),
        reply: text.to_string(),
        segments: (0..n).map(|i| AudioSegment::from_bytes(&[i + 1; 32])).collect(),
    }
}

/// A runtime wired to fakes
pub struct Harness {
    pub runtime: Runtime,
    pub sink: SignalSink,
    pub engine: Arc<Mutex<EngineLog>>,
    pub recorder: Arc<Mutex<RecorderLog>>,
    pub player: Arc<Mutex<PlayerLog>>,
    pub backend: Arc<FakeBackend>,
    pub shell: Arc<Mutex<ShellLog>>,
    pub store: SharedStore,
    pub speech: Arc<Mutex<SpeechLog>>,
}

impl Harness {
    /// Harness whose backend answers with `behavior`; notices are text only
    pub fn new(behavior: BackendBehavior) -> Self {
        Self::build(behavior, Vec::new(), false)
    }

    /// Harness whose store already holds `history`
    pub fn with_history(behavior: BackendBehavior, history: Vec<ConversationEntry>) -> Self {
        Self::build(behavior, history, false)
    }

    /// Harness that also speaks notices through a fake synthesizer
    pub fn speaking(behavior: BackendBehavior) -> Self {
        Self::build(behavior, Vec::new(), true)
    }

    fn build(behavior: BackendBehavior, history: Vec<ConversationEntry>, speaking: bool) -> Self {
        let (sink, rx) = signal_channel();
        let engine = Arc::new(Mutex::new(EngineLog::default()));
        let recorder = Arc::new(Mutex::new(RecorderLog::default()));
        let player = Arc::new(Mutex::new(PlayerLog::default()));
        let speech = Arc::new(Mutex::new(SpeechLog::default()));
        let backend = Arc::new(FakeBackend::new(behavior));
        let shell = Arc::new(Mutex::new(ShellLog::default()));
        let store = SharedStore(Arc::new(Mutex::new(history)));

        let dispatcher = IntentDispatcher::with_routes(&[]).unwrap();
        let machine = SessionMachine::new(SessionOptions::default(), dispatcher).unwrap();

        let parts = Collaborators {
            engines: fake_engines(&engine, &sink),
            recorder: Box::new(FakeRecorder {
                log: Arc::clone(&recorder),
                sink: sink.clone(),
            }),
            player: Box::new(FakePlayer {
                log: Arc::clone(&player),
                sink: sink.clone(),
            }),
            backend: Arc::clone(&backend) as Arc<dyn CommandBackend>,
            shell: Box::new(FakeShell(Arc::clone(&shell))),
            store: Box::new(store.clone()),
            speech: speaking.then(|| Arc::new(FakeSynth(Arc::clone(&speech))) as Arc<dyn SpeechSynthesizer>),
        };

        let runtime = Runtime::new(
            machine,
            CaptureSession::default(),
            parts,
            Duration::from_secs(45),
            (sink.clone(), rx),
        );

        Self {
            runtime,
            sink,
            engine,
            recorder,
            player,
            backend,
            shell,
            store,
            speech,
        }
    }

    /// Let spawned tasks run and handle everything they sent
    pub async fn settle(&mut self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            self.runtime.drain();
        }
        self.assert_exclusive_microphone();
    }

    /// Advance (paused) time, then settle
    pub async fn advance(&mut self, by: Duration) {
        tokio::time::sleep(by).await;
        self.settle().await;
    }

    /// Send a signal and settle
    pub async fn send(&mut self, signal: Signal) {
        self.sink.send(signal);
        self.settle().await;
    }

    pub async fn activate(&mut self) {
        self.send(Signal::Activate).await;
    }

    /// Run the newest engine was started as
    pub fn engine_run(&self) -> RunId {
        self.engine.lock().unwrap().run.unwrap_or_default()
    }

    /// Deliver a callback from the newest engine
    pub async fn recognized(&mut self, signal: RecognitionSignal) {
        let run = self.engine_run();
        self.sink.recognition(run, signal);
        self.settle().await;
    }

    pub async fn partial(&mut self, text: &str) {
        self.recognized(RecognitionSignal::Partial(text.to_string())).await;
    }

    pub async fn final_result(&mut self, text: &str) {
        self.recognized(RecognitionSignal::Final(text.to_string())).await;
    }

    /// The running engine dies, optionally reporting `error` first
    pub async fn engine_dies(&mut self, error: Option<RecognitionErrorKind>) {
        assert!(self.engine.lock().unwrap().die(), "no engine running");
        let run = self.engine_run();
        if let Some(kind) = error {
            self.sink.recognition(run, RecognitionSignal::Error(kind));
        }
        self.recognized(RecognitionSignal::Ended).await;
    }

    /// Texts handed to the synthesizer so far
    pub fn spoken(&self) -> Vec<String> {
        self.speech.lock().unwrap().spoken.clone()
    }

    pub fn state(&self) -> SessionState {
        self.runtime.state()
    }

    pub fn is_listening(&self) -> bool {
        self.state().is_passive() && self.runtime.is_recognition_active()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.shell
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                ShellCall::Notify(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn shell_calls(&self) -> Vec<ShellCall> {
        self.shell.lock().unwrap().calls.clone()
    }

    pub fn stored(&self, role: Role) -> Vec<String> {
        self.store
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.role == role)
            .map(|e| e.text.clone())
            .collect()
    }

    /// Recognition and command capture never hold the microphone together,
    /// and recognition only runs while passively listening
    pub fn assert_exclusive_microphone(&self) {
        let state = self.runtime.state();
        let holder = self.runtime.mic_holder();

        if self.runtime.is_recognition_active() {
            assert_eq!(holder, Some(MicHolder::Recognition), "state {state}");
            assert!(state.is_passive(), "recognition active in {state}");
        }
        if state == SessionState::Capturing {
            assert_eq!(holder, Some(MicHolder::Capture));
        }
        if holder == Some(MicHolder::Capture) {
            assert_eq!(state, SessionState::Capturing);
        }
        assert!(self.engine.lock().unwrap().live <= 1, "duplicate recognition engines");
    }
}
