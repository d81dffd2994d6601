//! Response playback queue
//!
//! Reply audio arrives as an ordered list of segments. They play strictly one
//! at a time; a segment that fails is dropped and the queue moves on, so the
//! queue always drains.

use std::collections::VecDeque;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::VoiceError;

/// One discrete unit of reply audio
///
/// Kept encoded until it is about to play; a bad payload only fails the one
/// segment.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioSegment {
    payload: String,
}

impl AudioSegment {
    /// Segment from a base64 payload, with or without a `data:` URL prefix
    #[must_use]
    pub fn from_base64(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Segment from raw audio bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(bytes),
        }
    }

    /// Decode to audio bytes
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Playback`] if the payload is empty or not base64
    pub fn decode(&self) -> Result<Vec<u8>, VoiceError> {
        let data = self
            .payload
            .split_once(',')
            .map_or(self.payload.as_str(), |(_, data)| data)
            .trim();

        if data.is_empty() {
            return Err(VoiceError::Playback("empty audio segment".to_string()));
        }

        STANDARD
            .decode(data)
            .map_err(|e| VoiceError::Playback(format!("segment decode error: {e}")))
    }
}

impl fmt::Debug for AudioSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSegment")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// What the queue wants next after the current segment ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStep {
    /// Play this segment now
    Play(AudioSegment),
    /// Nothing left; playback complete
    Drained,
}

/// FIFO of reply segments, at most one playing
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    pending: VecDeque<AudioSegment>,
    playing: bool,
    attempted: usize,
    skipped: usize,
}

impl PlaybackQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append segments; returns the segment to start if nothing is playing
    pub fn enqueue(&mut self, segments: impl IntoIterator<Item = AudioSegment>) -> Option<AudioSegment> {
        self.pending.extend(segments);
        if self.playing {
            return None;
        }
        self.advance()
    }

    /// Current segment ended naturally
    pub fn finished(&mut self) -> QueueStep {
        self.playing = false;
        self.step()
    }

    /// Current segment failed to decode or play; drop it and move on
    pub fn skip(&mut self, reason: &str) -> QueueStep {
        if self.playing {
            self.skipped += 1;
            tracing::warn!(reason, skipped = self.skipped, "skipping reply segment");
        }
        self.playing = false;
        self.step()
    }

    /// Drop everything, including the segment in flight
    pub fn clear(&mut self) {
        self.pending.clear();
        self.playing = false;
    }

    /// Whether a segment is playing
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    /// Segments waiting behind the current one
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Segments started since creation
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.attempted
    }

    /// Segments dropped because they failed
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    fn step(&mut self) -> QueueStep {
        self.advance().map_or_else(
            || {
                tracing::debug!(attempted = self.attempted, skipped = self.skipped, "playback complete");
                QueueStep::Drained
            },
            QueueStep::Play,
        )
    }

    fn advance(&mut self) -> Option<AudioSegment> {
        let next = self.pending.pop_front()?;
        self.playing = true;
        self.attempted += 1;
        Some(next)
    }
}
