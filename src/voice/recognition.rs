//! Recognition lifecycle management
//!
//! Owns the single continuous recognition engine. Start and stop are
//! idempotent, and the `active` flag here is the only record of whether
//! recognition is running. Each start issues a fresh [`RunId`]; callbacks
//! tagged with any other run are late arrivals from a stopped run and never
//! touch the flag.

use std::fmt;

use super::adapter::{EngineError, EngineFactory, ErrorClass, RecognitionEngine, RecognitionErrorKind, RunId};
use super::mic::{MicArbiter, MicHolder, MicLease};

/// Why recognition is being started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    /// Assistant activated
    Activation,
    /// Command cycle finished
    CycleComplete,
    /// Delayed restart after a transient failure or unexpected end
    Recovery,
    /// Suspension cleared
    Resume,
    /// Watchdog found recognition silently dead
    Watchdog,
}

/// Why recognition is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Wake word heard, command capture follows
    WakeWord,
    /// Tab hidden or microphone contended
    Suspend,
    /// Fatal recognition error
    Fatal,
    /// Session teardown
    Teardown,
}

impl fmt::Display for StartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Activation => "activation",
            Self::CycleComplete => "cycle-complete",
            Self::Recovery => "recovery",
            Self::Resume => "resume",
            Self::Watchdog => "watchdog",
        };
        f.write_str(s)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WakeWord => "wake-word",
            Self::Suspend => "suspend",
            Self::Fatal => "fatal",
            Self::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Engine started
    Started,
    /// Engine was already running; treated as success
    AlreadyRunning,
    /// The microphone is held by command capture
    MicrophoneBusy,
    /// Engine refused; recognition stays inactive
    Failed(RecognitionErrorKind),
}

impl StartOutcome {
    /// Whether recognition is running after this outcome
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::AlreadyRunning)
    }
}

/// Manages the continuous recognition engine
pub struct RecognitionManager {
    factory: EngineFactory,
    engine: Option<Box<dyn RecognitionEngine>>,
    lease: Option<MicLease>,
    active: bool,
    /// Run the active flag belongs to
    run: Option<RunId>,
    /// Run the current engine instance last started
    engine_run: Option<RunId>,
    last_issued: RunId,
    instances_created: u32,
}

impl RecognitionManager {
    /// Create a manager; the engine is built lazily on first start
    #[must_use]
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: None,
            lease: None,
            active: false,
            run: None,
            engine_run: None,
            last_issued: 0,
            instances_created: 0,
        }
    }

    /// Whether recognition is currently running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Run recognition is currently active as
    #[must_use]
    pub const fn current_run(&self) -> Option<RunId> {
        self.run
    }

    /// Whether a callback tagged `run` belongs to the active run
    #[must_use]
    pub fn accepts(&self, run: RunId) -> bool {
        self.run == Some(run)
    }

    /// Number of engine instances built so far
    #[must_use]
    pub const fn instances_created(&self) -> u32 {
        self.instances_created
    }

    /// Start recognition
    ///
    /// Idempotent: an already-active manager, an engine that reports itself
    /// running, or an engine that throws "already started" all count as
    /// success without touching the instance. A poisoned engine is dropped
    /// and rebuilt on the next call.
    pub fn start(&mut self, reason: StartReason, mic: &mut MicArbiter) -> StartOutcome {
        if self.active {
            tracing::trace!(%reason, "recognition already active");
            return StartOutcome::AlreadyRunning;
        }

        let lease = match mic.acquire(MicHolder::Recognition) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(%reason, error = %e, "cannot start recognition");
                return StartOutcome::MicrophoneBusy;
            }
        };

        let candidate = self.last_issued + 1;
        let engine = match self.engine_or_create() {
            Ok(engine) => engine,
            Err(kind) => {
                mic.release(lease);
                return StartOutcome::Failed(kind);
            }
        };

        if engine.is_running() == Some(true) {
            tracing::debug!(%reason, "engine reports running, adopting it");
            self.adopt_running(lease, candidate);
            return StartOutcome::AlreadyRunning;
        }

        match engine.start(candidate) {
            Ok(()) => {
                tracing::debug!(%reason, run = candidate, "recognition started");
                self.last_issued = candidate;
                self.engine_run = Some(candidate);
                self.adopt(lease, candidate);
                StartOutcome::Started
            }
            Err(EngineError::AlreadyStarted) => {
                tracing::debug!(%reason, "engine already started, adopting it");
                self.adopt_running(lease, candidate);
                StartOutcome::AlreadyRunning
            }
            Err(EngineError::Poisoned) => {
                tracing::warn!(%reason, "recognition engine poisoned, discarding instance");
                self.engine = None;
                self.engine_run = None;
                mic.release(lease);
                StartOutcome::Failed(RecognitionErrorKind::Other)
            }
            Err(EngineError::Failed(kind)) => {
                tracing::warn!(%reason, error = %kind, "recognition start failed");
                mic.release(lease);
                StartOutcome::Failed(kind)
            }
        }
    }

    /// Stop recognition; failures are logged and treated as stopped
    pub fn stop(&mut self, reason: StopReason, mic: &mut MicArbiter) {
        if !self.active {
            tracing::trace!(%reason, "recognition already stopped");
            return;
        }

        self.deactivate(mic);

        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.stop() {
                tracing::warn!(%reason, error = %e, "recognition stop failed, treating as stopped");
            }
        }

        tracing::debug!(%reason, "recognition stopped");
    }

    /// Engine reported the end of `run`
    ///
    /// Returns `true` when the active run ended without being asked to. An
    /// end for any other run is stale and ignored.
    pub fn on_ended(&mut self, run: RunId, mic: &mut MicArbiter) -> bool {
        if !self.accepts(run) {
            tracing::trace!(run, current = ?self.run, "end of a finished run ignored");
            return false;
        }

        tracing::debug!(run, "recognition ended without a stop request");
        self.deactivate(mic);
        true
    }

    /// Engine reported an error for `run`
    ///
    /// An error ends the active run, so the manager goes inactive and gives
    /// the microphone back. Returns the error class for the caller's
    /// recovery policy, or `None` when the error belongs to a stale run.
    pub fn on_error(&mut self, kind: RecognitionErrorKind, run: RunId, mic: &mut MicArbiter) -> Option<ErrorClass> {
        if !self.accepts(run) {
            tracing::debug!(run, error = %kind, "error from a finished run ignored");
            return None;
        }

        let class = kind.class();
        match class {
            ErrorClass::Fatal => tracing::error!(error = %kind, "recognition unavailable"),
            ErrorClass::Contention => tracing::warn!(error = %kind, "microphone contended"),
            ErrorClass::Transient => tracing::debug!(error = %kind, "transient recognition error"),
        }

        self.deactivate(mic);
        Some(class)
    }

    fn adopt(&mut self, lease: MicLease, run: RunId) {
        self.lease = Some(lease);
        self.run = Some(run);
        self.active = true;
    }

    /// Take over an engine that was already running, keeping the run it was
    /// started as when known
    fn adopt_running(&mut self, lease: MicLease, candidate: RunId) {
        let run = *self.engine_run.get_or_insert(candidate);
        self.last_issued = self.last_issued.max(run);
        self.adopt(lease, run);
    }

    fn deactivate(&mut self, mic: &mut MicArbiter) {
        self.active = false;
        self.run = None;
        if let Some(lease) = self.lease.take() {
            mic.release(lease);
        }
    }

    fn engine_or_create(&mut self) -> Result<&mut Box<dyn RecognitionEngine>, RecognitionErrorKind> {
        if self.engine.is_none() {
            let engine = (self.factory)().map_err(|e| {
                tracing::error!(error = %e, "failed to create recognition engine");
                match e {
                    EngineError::Failed(kind) => kind,
                    EngineError::AlreadyStarted | EngineError::Poisoned => RecognitionErrorKind::Other,
                }
            })?;
            self.instances_created += 1;
            tracing::debug!(instance = self.instances_created, "recognition engine created");
            self.engine = Some(engine);
        }

        self.engine.as_mut().ok_or(RecognitionErrorKind::Other)
    }
}

impl fmt::Debug for RecognitionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionManager")
            .field("active", &self.active)
            .field("run", &self.run)
            .field("has_engine", &self.engine.is_some())
            .field("instances_created", &self.instances_created)
            .finish_non_exhaustive()
    }
}
