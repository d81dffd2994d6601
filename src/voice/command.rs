//! Command capture session
//!
//! After the wake word, records one fixed-length command clip. The session
//! holds the microphone lease for the length of the recording and returns it
//! on every exit path.

use std::fmt;
use std::time::Duration;

use super::adapter::Recorder;
use super::mic::{MicArbiter, MicHolder, MicLease};
use crate::error::VoiceError;

/// Default recording ceiling
pub const DEFAULT_CAPTURE_LIMIT: Duration = Duration::from_secs(7);

/// Clips smaller than this are treated as silence
pub const DEFAULT_MIN_CAPTURE_BYTES: usize = 1000;

/// Audio captured for one command, waiting to be submitted
#[derive(Clone, PartialEq, Eq)]
pub struct PendingCommandAudio {
    bytes: Vec<u8>,
    mime_type: &'static str,
}

impl PendingCommandAudio {
    /// Wrap captured bytes
    #[must_use]
    pub const fn new(bytes: Vec<u8>, mime_type: &'static str) -> Self {
        Self { bytes, mime_type }
    }

    /// Captured bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME type of the clip
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PendingCommandAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommandAudio")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Records one command clip at a time
#[derive(Debug)]
pub struct CaptureSession {
    max_duration: Duration,
    min_bytes: usize,
    mime_type: &'static str,
    lease: Option<MicLease>,
    generation: Option<u64>,
}

impl CaptureSession {
    /// Create a capture session with the given limits
    #[must_use]
    pub const fn new(max_duration: Duration, min_bytes: usize) -> Self {
        Self {
            max_duration,
            min_bytes,
            mime_type: "audio/wav",
            lease: None,
            generation: None,
        }
    }

    /// Override the MIME type reported for recordings
    #[must_use]
    pub const fn with_mime_type(mut self, mime_type: &'static str) -> Self {
        self.mime_type = mime_type;
        self
    }

    /// Recording ceiling
    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Whether a recording is in progress
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.lease.is_some()
    }

    /// Generation of the recording in progress
    #[must_use]
    pub const fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Take the microphone and start recording
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::MicrophoneBusy`] if recognition still holds the
    /// microphone, or [`VoiceError::Recording`] if the device refuses; the
    /// microphone is free again in both cases
    pub fn begin(
        &mut self,
        generation: u64,
        mic: &mut MicArbiter,
        recorder: &mut dyn Recorder,
    ) -> Result<(), VoiceError> {
        if self.is_active() {
            return Err(VoiceError::MicrophoneBusy(MicHolder::Capture));
        }

        let lease = mic.acquire(MicHolder::Capture)?;

        if let Err(e) = recorder.start(self.max_duration) {
            mic.release(lease);
            tracing::warn!(generation, error = %e, "command recording failed to start");
            return Err(VoiceError::Recording(e.to_string()));
        }

        tracing::debug!(generation, max_secs = self.max_duration.as_secs(), "command capture started");
        self.lease = Some(lease);
        self.generation = Some(generation);
        Ok(())
    }

    /// Recording finished; validate the clip and release the microphone
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NoSpeechDetected`] when the clip is empty or
    /// smaller than the minimum size
    pub fn finish(&mut self, bytes: Vec<u8>, mic: &mut MicArbiter) -> Result<PendingCommandAudio, VoiceError> {
        self.release(mic);

        if bytes.len() < self.min_bytes.max(1) {
            tracing::info!(bytes = bytes.len(), min = self.min_bytes, "no speech in command clip");
            return Err(VoiceError::NoSpeechDetected { bytes: bytes.len() });
        }

        tracing::debug!(bytes = bytes.len(), "command clip captured");
        Ok(PendingCommandAudio::new(bytes, self.mime_type))
    }

    /// Recording failed on the device; release the microphone
    pub fn fail(&mut self, reason: &str, mic: &mut MicArbiter) -> VoiceError {
        self.release(mic);
        tracing::warn!(reason, "command recording failed");
        VoiceError::Recording(reason.to_string())
    }

    /// Abandon the recording in progress
    pub fn abort(&mut self, mic: &mut MicArbiter, recorder: &mut dyn Recorder) {
        if self.is_active() {
            recorder.abort();
            self.release(mic);
            tracing::debug!("command capture aborted");
        }
    }

    fn release(&mut self, mic: &mut MicArbiter) {
        self.generation = None;
        if let Some(lease) = self.lease.take() {
            mic.release(lease);
        }
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT, DEFAULT_MIN_CAPTURE_BYTES)
    }
}
