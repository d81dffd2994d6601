//! Energy-based speech segmentation
//!
//! Splits a continuous microphone stream into utterances: speech starts when
//! RMS energy crosses a threshold and ends after a run of silence.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to emit (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Longest utterance kept before it is cut (in samples)
const MAX_SPEECH_SAMPLES: usize = 16000 * 15;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Accumulating an utterance
    Speaking,
}

/// Splits audio into utterances
#[derive(Debug, Clone)]
pub struct SpeechSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    voiced: usize,
    threshold: f32,
}

impl SpeechSegmenter {
    /// Create a segmenter with the default threshold
    #[must_use]
    pub const fn new() -> Self {
        Self::with_threshold(ENERGY_THRESHOLD)
    }

    /// Create a segmenter with a custom energy threshold
    #[must_use]
    pub const fn with_threshold(threshold: f32) -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            voiced: 0,
            threshold,
        }
    }

    /// Feed samples; returns a finished utterance when one completes
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    self.voiced = samples.len();
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            SegmenterState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                    self.voiced += samples.len();
                } else {
                    self.silence_counter += samples.len();
                }

                let ended = self.silence_counter > SILENCE_SAMPLES;
                if (ended && self.voiced > MIN_SPEECH_SAMPLES)
                    || self.speech_buffer.len() >= MAX_SPEECH_SAMPLES
                {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(segment);
                }

                if ended {
                    tracing::trace!("segment too short, discarding");
                    self.reset();
                }
                None
            }
        }
    }

    /// Whether an utterance is in progress
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == SegmenterState::Speaking
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
        self.voiced = 0;
    }
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 1600;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn emits_utterance_after_silence() {
        let mut seg = SpeechSegmenter::new();
        let speech = vec![0.2f32; CHUNK];
        let silence = vec![0.0f32; CHUNK];

        for _ in 0..5 {
            assert!(seg.push(&speech).is_none());
        }
        assert!(seg.is_speaking());

        let mut emitted = None;
        for _ in 0..10 {
            if let Some(u) = seg.push(&silence) {
                emitted = Some(u);
                break;
            }
        }

        let utterance = emitted.expect("utterance");
        assert!(utterance.len() > 5 * CHUNK);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn short_blip_is_discarded() {
        let mut seg = SpeechSegmenter::new();
        assert!(seg.push(&[0.2f32; 100]).is_none());

        for _ in 0..10 {
            assert!(seg.push(&[0.0f32; CHUNK]).is_none());
        }
        assert!(!seg.is_speaking());
    }

    #[test]
    fn silence_never_starts_speech() {
        let mut seg = SpeechSegmenter::new();
        for _ in 0..20 {
            assert!(seg.push(&[0.001f32; CHUNK]).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }
}
