//! Session orchestrator
//!
//! Pure state machine for one voice session. Every input is an [`Event`] and
//! every side effect is an [`Effect`] handed back to the caller, so the whole
//! command cycle can be driven and inspected without audio hardware.
//!
//! Each command cycle and each suspension bumps a generation counter.
//! Backend replies and recovery timers carry the generation they were issued
//! in; anything from an older generation is dropped.

use std::time::Duration;

use super::conversation::{Conversation, ConversationEntry, HISTORY_LIMIT};
use super::event::{Effect, Event, Notice, SuspendCause};
use super::state::{SessionState, Suspension};
use super::watchdog::{self, Backoff, TickAction};
use crate::Result;
use crate::backend::{BackendError, CommandReply, CommandRequest};
use crate::error::VoiceError;
use crate::intent::{IntentAction, IntentDispatcher, strip_markers};
use crate::voice::{
    AudioSegment, DEFAULT_CAPTURE_LIMIT, ErrorClass, PendingCommandAudio, PlaybackQueue, QueueStep,
    RecognitionErrorKind, StartReason, StopReason, WakeWordDetector,
};

/// Reply when the backend is down and nothing matched locally
pub const FALLBACK_APOLOGY: &str = "Sorry, I couldn't reach the assistant service. Please try again.";

/// Tunables for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Trigger token
    pub wake_word: String,
    /// Command recording ceiling
    pub capture_limit: Duration,
    /// First recovery delay
    pub restart_delay: Duration,
    /// Watchdog period; also caps the recovery delay
    pub watchdog_interval: Duration,
    /// Entries sent to the backend for context
    pub history_window: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            wake_word: "jarvis".to_string(),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            restart_delay: watchdog::DEFAULT_RESTART_DELAY,
            watchdog_interval: watchdog::DEFAULT_WATCHDOG_INTERVAL,
            history_window: 20,
        }
    }
}

/// The session orchestrator
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    generation: u64,
    suspension: Suspension,
    detector: WakeWordDetector,
    conversation: Conversation,
    queue: PlaybackQueue,
    dispatcher: IntentDispatcher,
    backoff: Backoff,
    options: SessionOptions,
    command_hint: String,
    /// A spoken notice is playing
    announcing: bool,
}

impl SessionMachine {
    /// Create an idle session
    ///
    /// # Errors
    ///
    /// Returns error if the wake word is empty
    pub fn new(options: SessionOptions, dispatcher: IntentDispatcher) -> Result<Self> {
        let detector = WakeWordDetector::new(&options.wake_word)?;
        Ok(Self {
            state: SessionState::Idle,
            generation: 0,
            suspension: Suspension::default(),
            detector,
            conversation: Conversation::bounded(HISTORY_LIMIT),
            queue: PlaybackQueue::new(),
            dispatcher,
            backoff: Backoff::new(options.restart_delay, options.watchdog_interval),
            options,
            command_hint: String::new(),
            announcing: false,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current generation
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Active suspension conditions
    #[must_use]
    pub const fn suspension(&self) -> Suspension {
        self.suspension
    }

    /// Conversation so far
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Reply playback queue
    #[must_use]
    pub const fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Session tunables
    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Seed history loaded from the conversation store
    pub fn seed_history(&mut self, entries: impl IntoIterator<Item = ConversationEntry>) {
        self.conversation.extend(entries);
        tracing::debug!(entries = self.conversation.len(), "conversation history seeded");
    }

    /// Apply one event and return the effects to carry out, in order
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let from = self.state;
        let name = event.name();

        let effects = match event {
            Event::Activate => self.on_activate(),
            Event::Teardown => self.on_teardown(),
            Event::RecognitionStarted => {
                if self.state == SessionState::Listening {
                    self.state = SessionState::AwaitingWakeWord;
                }
                Vec::new()
            }
            Event::PartialResult(text) => self.on_transcript(&text, false),
            Event::FinalResult(text) => self.on_transcript(&text, true),
            Event::RecognitionFailed(kind) => self.on_recognition_failed(kind),
            Event::StartFailed { reason, kind } => self.on_start_failed(reason, kind),
            Event::RecognitionEnded { unexpected } => {
                if unexpected && self.state.is_passive() {
                    self.recover()
                } else {
                    Vec::new()
                }
            }
            Event::CommandCaptured(audio) => self.on_captured(audio),
            Event::CaptureFailed(error) => self.on_capture_failed(&error),
            Event::BackendReplied { generation, outcome } => self.on_backend(generation, outcome),
            Event::PlaybackFinished => self.on_playback_step(None),
            Event::PlaybackFailed(reason) => self.on_playback_step(Some(&reason)),
            Event::VisibilityChanged { hidden: true } => {
                self.suspension.hidden = true;
                self.suspend(SuspendCause::Hidden)
            }
            Event::VisibilityChanged { hidden: false } => {
                self.suspension.hidden = false;
                self.resume(false)
            }
            Event::MicrophoneContended => {
                self.suspension.contended = true;
                self.suspend(SuspendCause::Contended)
            }
            Event::MicrophoneReleased => {
                let was_contended = self.suspension.contended;
                self.suspension.contended = false;
                self.resume(was_contended)
            }
            Event::RecoveryElapsed { generation } => {
                if generation == self.generation && self.state == SessionState::Recovering {
                    vec![self.start_listening(StartReason::Recovery)]
                } else {
                    tracing::trace!(generation, current = self.generation, "stale recovery timer");
                    Vec::new()
                }
            }
            Event::Tick { recognition_active } => self.on_tick(recognition_active),
            Event::SpeechReady { generation, audio } => self.on_speech(generation, &audio),
        };

        if from != self.state {
            tracing::debug!(%from, to = %self.state, event = name, generation = self.generation, "session transition");
        }

        effects
    }

    fn on_activate(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Idle {
            tracing::trace!(state = %self.state, "already active");
            return Vec::new();
        }

        self.backoff.reset();
        if let Some(cause) = self.suspend_cause() {
            self.state = SessionState::Suspended;
            return vec![Effect::Notify(Notice::Suspended(cause))];
        }

        vec![self.start_listening(StartReason::Activation)]
    }

    fn on_teardown(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::StopRecognition(StopReason::Teardown)];
        match self.state {
            SessionState::Capturing => effects.push(Effect::AbortCapture),
            SessionState::Playing => effects.push(Effect::StopPlayback),
            _ => effects.extend(self.silence()),
        }

        self.queue.clear();
        self.generation += 1;
        self.state = SessionState::Idle;
        effects
    }

    fn on_transcript(&mut self, text: &str, is_final: bool) -> Vec<Effect> {
        if !self.state.is_passive() {
            tracing::trace!(state = %self.state, "transcript outside passive listening ignored");
            return Vec::new();
        }

        self.backoff.reset();
        let hit = if is_final {
            self.detector.observe_final(text)
        } else {
            self.detector.observe_partial(text)
        };
        if !hit {
            return Vec::new();
        }

        self.generation += 1;
        self.command_hint = self.detector.command_hint().unwrap_or_default();
        self.state = SessionState::Capturing;

        tracing::info!(generation = self.generation, hint = %self.command_hint, "wake word, capturing command");
        let mut effects: Vec<Effect> = self.silence().into_iter().collect();
        effects.extend([
            Effect::StopRecognition(StopReason::WakeWord),
            Effect::BeginCapture {
                generation: self.generation,
                max_duration: self.options.capture_limit,
            },
            Effect::Notify(Notice::Listening),
        ]);
        effects
    }

    /// A restart the session scheduled itself is not retried faster than the
    /// watchdog would retry it
    fn on_start_failed(&mut self, reason: StartReason, kind: RecognitionErrorKind) -> Vec<Effect> {
        let scheduled = matches!(reason, StartReason::Recovery | StartReason::Watchdog);
        if scheduled && kind.class() == ErrorClass::Transient && self.state.is_passive() {
            tracing::warn!(%reason, error = %kind, "recognition restart refused");
            return self.retry_after(self.options.watchdog_interval);
        }
        self.on_recognition_failed(kind)
    }

    fn on_recognition_failed(&mut self, kind: RecognitionErrorKind) -> Vec<Effect> {
        let recognizing = self.state.is_passive() || self.state == SessionState::Recovering;

        match kind.class() {
            ErrorClass::Transient if self.state.is_passive() => self.recover(),
            ErrorClass::Transient => Vec::new(),
            ErrorClass::Contention => {
                self.suspension.contended = true;
                self.suspend(SuspendCause::Contended)
            }
            ErrorClass::Fatal if recognizing => {
                self.generation += 1;
                self.state = SessionState::Idle;
                let notice = Notice::RecognitionUnavailable(kind);
                let mut effects = vec![Effect::StopRecognition(StopReason::Fatal)];
                effects.extend(self.speak(&notice.to_string()));
                effects.push(Effect::Notify(notice));
                effects
            }
            ErrorClass::Fatal => {
                tracing::warn!(error = %kind, state = %self.state, "fatal recognition error outside listening ignored");
                Vec::new()
            }
        }
    }

    fn on_captured(&mut self, audio: PendingCommandAudio) -> Vec<Effect> {
        if self.state != SessionState::Capturing {
            tracing::debug!(state = %self.state, "late command clip dropped");
            return Vec::new();
        }

        self.state = SessionState::AwaitingBackend;
        let request = CommandRequest {
            audio,
            transcript_hint: self.command_hint.clone(),
            conversation: self.conversation.window(self.options.history_window),
        };

        tracing::debug!(
            generation = self.generation,
            bytes = request.audio.len(),
            history = request.conversation.len(),
            "submitting command"
        );
        vec![Effect::Submit {
            generation: self.generation,
            request,
        }]
    }

    fn on_capture_failed(&mut self, error: &VoiceError) -> Vec<Effect> {
        if self.state != SessionState::Capturing {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if matches!(error, VoiceError::NoSpeechDetected { .. }) {
            let notice = Notice::NoSpeechDetected;
            let text = notice.to_string();
            effects.push(self.record(ConversationEntry::assistant(text.clone())));
            effects.push(Effect::Notify(notice));
            effects.push(self.start_listening(StartReason::CycleComplete));
            effects.extend(self.speak(&text));
        } else {
            tracing::warn!(error = %error, "command capture failed");
            effects.push(self.start_listening(StartReason::CycleComplete));
        }
        effects
    }

    fn on_backend(&mut self, generation: u64, outcome: std::result::Result<CommandReply, BackendError>) -> Vec<Effect> {
        if generation != self.generation || self.state != SessionState::AwaitingBackend {
            tracing::debug!(generation, current = self.generation, "stale backend reply discarded");
            return Vec::new();
        }

        match outcome {
            Ok(reply) => self.on_reply(reply),
            Err(error) => self.on_backend_error(error),
        }
    }

    fn on_reply(&mut self, reply: CommandReply) -> Vec<Effect> {
        let mut effects = Vec::new();

        let user_text = if reply.transcript.trim().is_empty() {
            self.command_hint.clone()
        } else {
            reply.transcript.trim().to_string()
        };
        if !user_text.is_empty() {
            effects.push(self.record(ConversationEntry::user(user_text.clone())));
        }

        let spoken = strip_markers(&reply.reply);
        if !spoken.is_empty() {
            effects.push(self.record(ConversationEntry::assistant(spoken)));
        }

        if let Some(result) = self.dispatcher.dispatch(&user_text, &reply.reply) {
            effects.extend(action_effects(&result.action));
        }

        tracing::info!(segments = reply.segments.len(), "backend replied");
        effects.extend(self.play(reply.segments));
        effects
    }

    fn on_backend_error(&mut self, error: BackendError) -> Vec<Effect> {
        tracing::warn!(error = %error, hint = %self.command_hint, "backend unavailable, dispatching locally");

        let mut effects = Vec::new();
        let result = self.dispatcher.fallback(&self.command_hint);
        let reply = result.as_ref().map_or_else(|| FALLBACK_APOLOGY.to_string(), |r| r.reply.clone());

        effects.push(self.record(ConversationEntry::assistant(reply.clone())));
        if let Some(result) = result {
            effects.extend(action_effects(&result.action));
        }
        effects.push(Effect::Notify(Notice::BackendUnavailable(VoiceError::from(error))));
        effects.push(self.start_listening(StartReason::CycleComplete));
        effects.extend(self.speak(&reply));
        effects
    }

    fn play(&mut self, segments: Vec<AudioSegment>) -> Vec<Effect> {
        match self.queue.enqueue(segments) {
            Some(first) => {
                self.state = SessionState::Playing;
                vec![Effect::Play(first)]
            }
            None => vec![self.start_listening(StartReason::CycleComplete)],
        }
    }

    fn on_playback_step(&mut self, failure: Option<&str>) -> Vec<Effect> {
        if self.announcing {
            self.announcing = false;
            if let Some(reason) = failure {
                tracing::warn!(reason, "spoken notice failed");
            }
            return Vec::new();
        }
        if self.state != SessionState::Playing {
            return Vec::new();
        }

        let step = match failure {
            Some(reason) => self.queue.skip(reason),
            None => self.queue.finished(),
        };

        match step {
            QueueStep::Play(next) => vec![Effect::Play(next)],
            QueueStep::Drained => vec![self.start_listening(StartReason::CycleComplete)],
        }
    }

    fn suspend(&mut self, cause: SuspendCause) -> Vec<Effect> {
        match self.state {
            SessionState::Idle => {
                tracing::debug!(?cause, "suspension noted while idle");
                return Vec::new();
            }
            SessionState::Suspended => return Vec::new(),
            _ => {}
        }

        let mut effects: Vec<Effect> = self.silence().into_iter().collect();
        match self.state {
            SessionState::Listening | SessionState::AwaitingWakeWord => {
                effects.push(Effect::StopRecognition(StopReason::Suspend));
            }
            SessionState::Capturing => effects.push(Effect::AbortCapture),
            SessionState::Playing => {
                self.queue.clear();
                effects.push(Effect::StopPlayback);
            }
            _ => {}
        }

        self.generation += 1;
        self.state = SessionState::Suspended;
        tracing::info!(?cause, "session suspended");
        effects.push(Effect::Notify(Notice::Suspended(cause)));
        effects
    }

    fn resume(&mut self, after_contention: bool) -> Vec<Effect> {
        if self.state != SessionState::Suspended || self.suspension.is_active() {
            return Vec::new();
        }

        self.backoff.reset();
        tracing::info!(after_contention, "session resumed");
        let notice = Notice::Resumed { after_contention };
        let mut effects = vec![self.start_listening(StartReason::Resume)];
        effects.extend(self.speak(&notice.to_string()));
        effects.push(Effect::Notify(notice));
        effects
    }

    fn recover(&mut self) -> Vec<Effect> {
        let after = self.backoff.next_delay();
        tracing::debug!(attempt = self.backoff.attempts(), "recognition ended, backing off");
        self.retry_after(after)
    }

    fn retry_after(&mut self, after: Duration) -> Vec<Effect> {
        self.state = SessionState::Recovering;
        tracing::debug!(delay_ms = after.as_millis(), "scheduling recognition restart");
        vec![Effect::ScheduleRecovery {
            generation: self.generation,
            after,
        }]
    }

    /// Ask for `text` to be spoken
    ///
    /// Text naming the wake word is only shown, since hearing it back would
    /// trigger a command cycle.
    fn speak(&self, text: &str) -> Option<Effect> {
        let wake_word = self.options.wake_word.to_lowercase();
        if text.trim().is_empty() || text.to_lowercase().contains(&wake_word) {
            return None;
        }
        Some(Effect::Speak {
            generation: self.generation,
            text: text.to_string(),
        })
    }

    fn on_speech(&mut self, generation: u64, audio: &[u8]) -> Vec<Effect> {
        let quiet = self.state.is_passive() || matches!(self.state, SessionState::Idle | SessionState::Recovering);
        if generation != self.generation || !quiet {
            tracing::debug!(generation, state = %self.state, "spoken notice no longer relevant");
            return Vec::new();
        }

        self.announcing = true;
        vec![Effect::Play(AudioSegment::from_bytes(audio))]
    }

    /// Cut a spoken notice short
    fn silence(&mut self) -> Option<Effect> {
        std::mem::take(&mut self.announcing).then_some(Effect::StopPlayback)
    }

    fn on_tick(&mut self, recognition_active: bool) -> Vec<Effect> {
        match watchdog::on_tick(self.state, self.suspension, recognition_active) {
            TickAction::Nothing => Vec::new(),
            TickAction::RestartRecognition => {
                tracing::info!(state = %self.state, "watchdog restarting recognition");
                vec![self.start_listening(StartReason::Watchdog)]
            }
            TickAction::ProbeMicrophone => vec![Effect::ProbeMicrophone],
        }
    }

    fn start_listening(&mut self, reason: StartReason) -> Effect {
        self.state = SessionState::Listening;
        self.detector.reset();
        self.command_hint.clear();
        Effect::StartRecognition(reason)
    }

    fn record(&mut self, entry: ConversationEntry) -> Effect {
        self.conversation.push(entry.clone());
        Effect::Record(entry)
    }

    const fn suspend_cause(&self) -> Option<SuspendCause> {
        if self.suspension.contended {
            Some(SuspendCause::Contended)
        } else if self.suspension.hidden {
            Some(SuspendCause::Hidden)
        } else {
            None
        }
    }
}

fn action_effects(action: &IntentAction) -> Vec<Effect> {
    match action {
        IntentAction::Navigate { path, .. } => vec![Effect::Navigate(path.clone())],
        IntentAction::Feature(feature) => vec![Effect::PerformFeature(*feature)],
        IntentAction::Close => vec![Effect::Close],
        IntentAction::Greet | IntentAction::Help | IntentAction::UnknownDestination => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::FeatureAction;
    use crate::session::Role;

    fn machine() -> SessionMachine {
        let dispatcher = IntentDispatcher::with_routes(&[]).unwrap();
        SessionMachine::new(SessionOptions::default(), dispatcher).unwrap()
    }

    fn listening() -> SessionMachine {
        let mut m = machine();
        m.handle(Event::Activate);
        m.handle(Event::RecognitionStarted);
        m
    }

    fn capturing(said: &str) -> SessionMachine {
        let mut m = listening();
        m.handle(Event::FinalResult(said.to_string()));
        assert_eq!(m.state(), SessionState::Capturing);
        m
    }

    fn awaiting_backend(said: &str) -> SessionMachine {
        let mut m = capturing(said);
        m.handle(Event::CommandCaptured(PendingCommandAudio::new(vec![1; 2048], "audio/wav")));
        assert_eq!(m.state(), SessionState::AwaitingBackend);
        m
    }

    fn segments(n: u8) -> Vec<AudioSegment> {
        (0..n).map(|i| AudioSegment::from_bytes(&[i; 16])).collect()
    }

    fn reply(transcript: &str, text: &str, segments: Vec<AudioSegment>) -> CommandReply {
        CommandReply {
            transcript: transcript.to_string(),
            reply: text.to_string(),
            segments,
        }
    }

    fn assistant_entries(m: &SessionMachine) -> Vec<String> {
        m.conversation()
            .iter()
            .filter(|e| e.role == Role::Assistant)
            .map(|e| e.text.clone())
            .collect()
    }

    #[test]
    fn activation_starts_listening() {
        let mut m = machine();
        assert_eq!(m.handle(Event::Activate), vec![Effect::StartRecognition(StartReason::Activation)]);
        assert_eq!(m.state(), SessionState::Listening);

        assert!(m.handle(Event::Activate).is_empty());
        m.handle(Event::RecognitionStarted);
        assert_eq!(m.state(), SessionState::AwaitingWakeWord);
    }

    #[test]
    fn wake_word_mid_partial_fires_once() {
        let mut m = listening();
        let effects = m.handle(Event::PartialResult("hello jarvis please".to_string()));

        assert_eq!(
            effects,
            vec![
                Effect::StopRecognition(StopReason::WakeWord),
                Effect::BeginCapture {
                    generation: 1,
                    max_duration: DEFAULT_CAPTURE_LIMIT,
                },
                Effect::Notify(Notice::Listening),
            ]
        );
        assert!(m.handle(Event::PartialResult("hello jarvis please open".to_string())).is_empty());
        assert!(m.handle(Event::FinalResult("hello jarvis please open".to_string())).is_empty());
    }

    #[test]
    fn captured_clip_is_submitted_with_hint() {
        let mut m = capturing("jarvis go to the home page");
        let effects = m.handle(Event::CommandCaptured(PendingCommandAudio::new(vec![1; 2048], "audio/wav")));

        let [Effect::Submit { generation, request }] = effects.as_slice() else {
            panic!("expected a single submit, got {effects:?}");
        };
        assert_eq!(*generation, m.generation());
        assert_eq!(request.transcript_hint, "go to the home page");
        assert_eq!(request.audio.len(), 2048);
    }

    #[test]
    fn history_window_is_bounded() {
        let mut m = machine();
        m.seed_history((0..30).map(|i| ConversationEntry::user(format!("turn {i}"))));
        m.handle(Event::Activate);
        m.handle(Event::FinalResult("jarvis".to_string()));

        let effects = m.handle(Event::CommandCaptured(PendingCommandAudio::new(vec![1; 2048], "audio/wav")));
        let [Effect::Submit { request, .. }] = effects.as_slice() else {
            panic!("expected submit");
        };
        assert_eq!(request.conversation.len(), 20);
        assert_eq!(request.conversation[0].text, "turn 10");
    }

    #[test]
    fn empty_capture_reports_no_speech() {
        let mut m = capturing("jarvis");
        let effects = m.handle(Event::CaptureFailed(VoiceError::NoSpeechDetected { bytes: 0 }));

        assert_eq!(m.state(), SessionState::Listening);
        assert!(effects.contains(&Effect::Notify(Notice::NoSpeechDetected)));
        assert!(effects.contains(&Effect::StartRecognition(StartReason::CycleComplete)));
        assert_eq!(
            effects.last(),
            Some(&Effect::Speak {
                generation: m.generation(),
                text: Notice::NoSpeechDetected.to_string(),
            })
        );
        assert!(!effects.iter().any(|e| matches!(e, Effect::Submit { .. })));
        assert_eq!(assistant_entries(&m).len(), 1);
    }

    #[test]
    fn reply_plays_segments_then_listens() {
        let mut m = awaiting_backend("jarvis open the quiz");
        let segs = segments(2);
        let effects = m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Ok(reply("open the quiz", "Here is your quiz. [FEATURE:quiz]", segs.clone())),
        });

        assert!(effects.contains(&Effect::PerformFeature(FeatureAction::Quiz)));
        assert_eq!(effects.last(), Some(&Effect::Play(segs[0].clone())));
        assert_eq!(m.state(), SessionState::Playing);
        assert_eq!(assistant_entries(&m), ["Here is your quiz."]);

        assert_eq!(m.handle(Event::PlaybackFinished), vec![Effect::Play(segs[1].clone())]);
        assert_eq!(
            m.handle(Event::PlaybackFinished),
            vec![Effect::StartRecognition(StartReason::CycleComplete)]
        );
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn reply_without_audio_returns_to_listening() {
        let mut m = awaiting_backend("jarvis hello");
        let effects = m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Ok(reply("hello", "Hi!", Vec::new())),
        });
        assert_eq!(effects.last(), Some(&Effect::StartRecognition(StartReason::CycleComplete)));
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn failed_segment_is_skipped() {
        let mut m = awaiting_backend("jarvis");
        let segs = segments(3);
        m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Ok(reply("", "", segs.clone())),
        });

        assert_eq!(m.handle(Event::PlaybackFinished), vec![Effect::Play(segs[1].clone())]);
        assert_eq!(
            m.handle(Event::PlaybackFailed("decode error".to_string())),
            vec![Effect::Play(segs[2].clone())]
        );
        m.handle(Event::PlaybackFinished);
        assert_eq!(m.state(), SessionState::Listening);
        assert_eq!(m.queue().attempted(), 3);
    }

    #[test]
    fn backend_failure_falls_back_locally() {
        let mut m = awaiting_backend("jarvis go to the deaf assistance page");
        let effects = m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Err(BackendError::Timeout(Duration::from_secs(45))),
        });

        assert!(effects.contains(&Effect::Navigate("/deaf".to_string())));
        assert!(effects.contains(&Effect::Notify(Notice::BackendUnavailable(
            VoiceError::BackendTimeout(Duration::from_secs(45))
        ))));
        assert_eq!(m.state(), SessionState::Listening);
        assert_eq!(assistant_entries(&m), ["Okay, navigating to Deaf Assistance now."]);
    }

    #[test]
    fn fallback_without_match_apologizes() {
        let mut m = awaiting_backend("jarvis what is the weather");
        m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Err(BackendError::Unreachable("connection refused".to_string())),
        });
        assert_eq!(assistant_entries(&m), [FALLBACK_APOLOGY]);
    }

    #[test]
    fn stale_backend_reply_is_discarded() {
        let mut m = awaiting_backend("jarvis");
        let stale = m.generation();
        m.handle(Event::VisibilityChanged { hidden: true });
        m.handle(Event::VisibilityChanged { hidden: false });

        let effects = m.handle(Event::BackendReplied {
            generation: stale,
            outcome: Ok(reply("x", "late", segments(1))),
        });
        assert!(effects.is_empty());
        assert_eq!(m.state(), SessionState::Listening);
        assert!(m.conversation().is_empty());
    }

    #[test]
    fn hidden_tab_stops_playback_and_resumes() {
        let mut m = awaiting_backend("jarvis");
        m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Ok(reply("", "", segments(2))),
        });

        let effects = m.handle(Event::VisibilityChanged { hidden: true });
        assert_eq!(
            effects,
            vec![
                Effect::StopPlayback,
                Effect::Notify(Notice::Suspended(SuspendCause::Hidden)),
            ]
        );
        assert_eq!(m.state(), SessionState::Suspended);
        assert!(m.handle(Event::PlaybackFinished).is_empty());

        let effects = m.handle(Event::VisibilityChanged { hidden: false });
        assert_eq!(
            effects,
            vec![
                Effect::StartRecognition(StartReason::Resume),
                Effect::Speak {
                    generation: m.generation(),
                    text: "Voice assistant resumed.".to_string(),
                },
                Effect::Notify(Notice::Resumed { after_contention: false }),
            ]
        );
    }

    #[test]
    fn contention_suspends_until_released() {
        let mut m = listening();
        let effects = m.handle(Event::RecognitionFailed(RecognitionErrorKind::AudioCapture));
        assert_eq!(
            effects,
            vec![
                Effect::StopRecognition(StopReason::Suspend),
                Effect::Notify(Notice::Suspended(SuspendCause::Contended)),
            ]
        );

        assert_eq!(m.handle(Event::Tick { recognition_active: false }), vec![Effect::ProbeMicrophone]);

        let effects = m.handle(Event::MicrophoneReleased);
        assert!(effects.contains(&Effect::Notify(Notice::Resumed { after_contention: true })));
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn both_conditions_must_clear() {
        let mut m = listening();
        m.handle(Event::VisibilityChanged { hidden: true });
        m.handle(Event::MicrophoneContended);

        assert!(m.handle(Event::VisibilityChanged { hidden: false }).is_empty());
        assert_eq!(m.state(), SessionState::Suspended);
        assert!(!m.handle(Event::MicrophoneReleased).is_empty());
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn suspension_while_idle_is_remembered() {
        let mut m = machine();
        assert!(m.handle(Event::VisibilityChanged { hidden: true }).is_empty());
        assert_eq!(
            m.handle(Event::Activate),
            vec![Effect::Notify(Notice::Suspended(SuspendCause::Hidden))]
        );
        assert_eq!(m.state(), SessionState::Suspended);
    }

    #[test]
    fn transient_error_backs_off_then_restarts() {
        let mut m = listening();
        let effects = m.handle(Event::RecognitionFailed(RecognitionErrorKind::NoSpeech));
        assert_eq!(
            effects,
            vec![Effect::ScheduleRecovery {
                generation: 0,
                after: Duration::from_millis(500),
            }]
        );
        assert_eq!(m.state(), SessionState::Recovering);

        assert!(m.handle(Event::RecognitionEnded { unexpected: false }).is_empty());
        assert_eq!(
            m.handle(Event::RecoveryElapsed { generation: 0 }),
            vec![Effect::StartRecognition(StartReason::Recovery)]
        );

        let effects = m.handle(Event::RecognitionEnded { unexpected: true });
        assert_eq!(
            effects,
            vec![Effect::ScheduleRecovery {
                generation: 0,
                after: Duration::from_secs(1),
            }]
        );
    }

    #[test]
    fn refused_restart_waits_a_watchdog_interval() {
        let mut m = listening();
        m.handle(Event::RecognitionFailed(RecognitionErrorKind::Network));
        assert_eq!(
            m.handle(Event::RecoveryElapsed { generation: 0 }),
            vec![Effect::StartRecognition(StartReason::Recovery)]
        );

        let effects = m.handle(Event::StartFailed {
            reason: StartReason::Recovery,
            kind: RecognitionErrorKind::Network,
        });
        assert_eq!(
            effects,
            vec![Effect::ScheduleRecovery {
                generation: 0,
                after: watchdog::DEFAULT_WATCHDOG_INTERVAL,
            }]
        );
        assert_eq!(m.state(), SessionState::Recovering);
        assert!(m.handle(Event::Tick { recognition_active: false }).is_empty());
    }

    #[test]
    fn refused_first_start_uses_backoff() {
        let mut m = machine();
        m.handle(Event::Activate);
        let effects = m.handle(Event::StartFailed {
            reason: StartReason::Activation,
            kind: RecognitionErrorKind::Network,
        });
        assert_eq!(
            effects,
            vec![Effect::ScheduleRecovery {
                generation: 0,
                after: Duration::from_millis(500),
            }]
        );
    }

    #[test]
    fn stale_recovery_timer_is_ignored() {
        let mut m = listening();
        m.handle(Event::RecognitionFailed(RecognitionErrorKind::Network));
        m.handle(Event::Teardown);
        assert!(m.handle(Event::RecoveryElapsed { generation: 0 }).is_empty());
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn fatal_error_turns_assistant_off() {
        let mut m = listening();
        let effects = m.handle(Event::RecognitionFailed(RecognitionErrorKind::NotAllowed));
        assert_eq!(
            effects,
            vec![
                Effect::StopRecognition(StopReason::Fatal),
                Effect::Speak {
                    generation: m.generation(),
                    text: Notice::RecognitionUnavailable(RecognitionErrorKind::NotAllowed).to_string(),
                },
                Effect::Notify(Notice::RecognitionUnavailable(RecognitionErrorKind::NotAllowed)),
            ]
        );
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn watchdog_only_restarts_dead_listening() {
        let mut m = listening();
        assert!(m.handle(Event::Tick { recognition_active: true }).is_empty());
        assert_eq!(
            m.handle(Event::Tick { recognition_active: false }),
            vec![Effect::StartRecognition(StartReason::Watchdog)]
        );

        let mut m = capturing("jarvis");
        assert!(m.handle(Event::Tick { recognition_active: false }).is_empty());
    }

    #[test]
    fn teardown_aborts_capture() {
        let mut m = capturing("jarvis");
        assert_eq!(
            m.handle(Event::Teardown),
            vec![Effect::StopRecognition(StopReason::Teardown), Effect::AbortCapture]
        );
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.handle(Event::CommandCaptured(PendingCommandAudio::new(vec![1; 2048], "audio/wav"))).is_empty());
    }

    #[test]
    fn spoken_notice_plays_between_commands() {
        let mut m = capturing("jarvis");
        m.handle(Event::CaptureFailed(VoiceError::NoSpeechDetected { bytes: 0 }));
        m.handle(Event::RecognitionStarted);

        let speech = vec![3; 64];
        assert_eq!(
            m.handle(Event::SpeechReady {
                generation: m.generation(),
                audio: speech.clone(),
            }),
            vec![Effect::Play(AudioSegment::from_bytes(&speech))]
        );
        assert!(m.handle(Event::PlaybackFinished).is_empty());
        assert_eq!(m.state(), SessionState::AwaitingWakeWord);
    }

    #[test]
    fn wake_word_cuts_spoken_notice_short() {
        let mut m = listening();
        m.handle(Event::SpeechReady {
            generation: m.generation(),
            audio: vec![3; 64],
        });

        let effects = m.handle(Event::FinalResult("jarvis open the quiz".to_string()));
        assert_eq!(effects.first(), Some(&Effect::StopPlayback));
        assert_eq!(m.state(), SessionState::Capturing);
    }

    #[test]
    fn speech_for_an_old_generation_is_dropped() {
        let mut m = listening();
        let issued = m.generation();
        m.handle(Event::VisibilityChanged { hidden: true });
        m.handle(Event::VisibilityChanged { hidden: false });

        assert!(m
            .handle(Event::SpeechReady {
                generation: issued,
                audio: vec![3; 64],
            })
            .is_empty());
    }

    #[test]
    fn text_naming_the_wake_word_is_not_spoken() {
        let m = listening();
        assert!(m.speak("Say Jarvis to begin.").is_none());
        assert!(m.speak("   ").is_none());
        assert!(m.speak("Voice assistant resumed.").is_some());
    }

    #[test]
    fn close_intent_reaches_shell() {
        let mut m = awaiting_backend("jarvis close the assistant");
        let effects = m.handle(Event::BackendReplied {
            generation: m.generation(),
            outcome: Ok(reply("close the assistant", "Closing the assistant.", Vec::new())),
        });
        assert!(effects.contains(&Effect::Close));
    }
}
