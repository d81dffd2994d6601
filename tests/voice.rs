//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use jarvis_runtime::voice::{
    AudioSegment, CaptureSession, DetectorState, MicArbiter, MicHolder, PlaybackQueue, QueueStep, SAMPLE_RATE,
    SegmenterState, SpeechSegmenter, WakeWordDetector, calculate_energy, decode, extract_command, samples_to_wav,
};
use std::io::Cursor;

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

#[test]
fn test_wake_word_detector_creation() {
    let detector = WakeWordDetector::new("  JARVIS ").unwrap();

    assert_eq!(detector.state(), DetectorState::Idle);
    assert_eq!(detector.wake_word(), "jarvis");
    assert!(!detector.is_activated());
    assert!(detector.trigger_transcript().is_none());
}

#[test]
fn test_empty_wake_word_rejected() {
    assert!(WakeWordDetector::new("   ").is_err());
}

#[test]
fn test_wake_word_after_earlier_results() {
    let mut detector = WakeWordDetector::new("jarvis").unwrap();

    assert!(!detector.observe_final("hey jar"));
    assert!(!detector.observe_partial("vis"));
    assert!(detector.observe_final("jarvis open the quiz"));
    assert_eq!(detector.command_hint().as_deref(), Some("open the quiz"));
}

#[test]
fn test_wake_word_resets_between_turns() {
    let mut detector = WakeWordDetector::new("jarvis").unwrap();

    assert!(detector.observe_partial("ok jarvis"));
    assert!(!detector.observe_partial("ok jarvis"));

    detector.reset();
    assert_eq!(detector.state(), DetectorState::Idle);
    assert!(detector.cumulative().is_empty());
    assert!(detector.observe_partial("jarvis again"));
}

#[test]
fn test_extract_command() {
    assert_eq!(extract_command("Hey Jarvis, open the summary", "jarvis"), "open the summary");
    assert_eq!(extract_command("jarvis", "jarvis"), "");
    assert_eq!(extract_command("open the summary", "jarvis"), "open the summary");
}

#[test]
fn test_segmenter_emits_utterance_after_silence() {
    let mut segmenter = SpeechSegmenter::new();
    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    let silence = generate_silence(0.6);

    assert!(segmenter.push(&speech).is_none());
    assert_eq!(segmenter.state(), SegmenterState::Speaking);

    let utterance = segmenter.push(&silence).expect("utterance after trailing silence");
    assert_eq!(utterance.len(), speech.len() + silence.len());
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_segmenter_discards_short_blip() {
    let mut segmenter = SpeechSegmenter::new();

    assert!(segmenter.push(&generate_sine_samples(440.0, 0.1, 0.3)).is_none());
    assert!(segmenter.is_speaking());
    assert!(segmenter.push(&generate_silence(0.6)).is_none());
    assert!(!segmenter.is_speaking());
}

#[test]
fn test_segmenter_ignores_silence() {
    let mut segmenter = SpeechSegmenter::new();
    for _ in 0..10 {
        assert!(segmenter.push(&generate_silence(0.1)).is_none());
    }
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_energy_calculation() {
    assert!(calculate_energy(&generate_silence(0.1)) < f32::EPSILON);
    let energy = calculate_energy(&generate_sine_samples(440.0, 0.1, 0.3));
    // RMS of a sine is amplitude / sqrt(2)
    assert!((energy - 0.3 / std::f32::consts::SQRT_2).abs() < 0.01);
}

#[test]
fn test_wav_encoding() {
    let samples = generate_sine_samples(440.0, 0.5, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_decode_wav_reply() {
    let samples = generate_sine_samples(220.0, 0.25, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let decoded = decode(&wav).unwrap();
    assert_eq!(decoded.sample_rate, SAMPLE_RATE);
    assert_eq!(decoded.samples.len(), samples.len());
    for (a, b) in decoded.samples.iter().zip(&samples) {
        assert!((a - b).abs() < 0.001);
    }
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(decode(b"definitely not audio").is_err());
}

#[test]
fn test_segment_accepts_data_url() {
    let wav = samples_to_wav(&generate_silence(0.01), SAMPLE_RATE).unwrap();
    let encoded = AudioSegment::from_bytes(&wav);
    let bytes = encoded.decode().unwrap();
    assert_eq!(bytes, wav);

    use base64::Engine as _;
    let url = format!(
        "data:audio/wav;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&wav)
    );
    assert_eq!(AudioSegment::from_base64(url).decode().unwrap(), wav);
    assert!(AudioSegment::from_base64("data:audio/wav;base64,").decode().is_err());
}

#[test]
fn test_playback_queue_drains_despite_failures() {
    let segments: Vec<AudioSegment> = (1..=4u8).map(|i| AudioSegment::from_bytes(&[i; 4])).collect();
    let mut queue = PlaybackQueue::new();

    let mut current = queue.enqueue(segments.clone());
    let mut played = Vec::new();
    let mut index = 0;
    while let Some(segment) = current {
        played.push(segment);
        index += 1;
        // every other segment fails
        let step = if index % 2 == 0 { queue.skip("device error") } else { queue.finished() };
        current = match step {
            QueueStep::Play(next) => Some(next),
            QueueStep::Drained => None,
        };
    }

    assert_eq!(played, segments);
    assert_eq!(queue.attempted(), 4);
    assert_eq!(queue.skipped(), 2);
    assert!(!queue.is_playing());
}

#[derive(Default)]
struct NullRecorder {
    starts: usize,
    aborts: usize,
}

impl jarvis_runtime::voice::Recorder for NullRecorder {
    fn start(&mut self, _max_duration: std::time::Duration) -> jarvis_runtime::Result<()> {
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {}

    fn abort(&mut self) {
        self.aborts += 1;
    }

    fn probe(&mut self) -> jarvis_runtime::Result<()> {
        Ok(())
    }
}

#[test]
fn test_capture_holds_microphone_until_finished() {
    let mut mic = MicArbiter::new();
    let mut recorder = NullRecorder::default();
    let mut capture = CaptureSession::default();

    capture.begin(1, &mut mic, &mut recorder).unwrap();
    assert_eq!(mic.holder(), Some(MicHolder::Capture));
    assert!(mic.acquire(MicHolder::Recognition).is_err());

    let audio = capture.finish(vec![0; 2048], &mut mic).unwrap();
    assert_eq!(audio.len(), 2048);
    assert!(mic.is_free());
    assert_eq!(recorder.starts, 1);
}

#[test]
fn test_capture_refused_while_recognition_holds_microphone() {
    let mut mic = MicArbiter::new();
    let lease = mic.acquire(MicHolder::Recognition).unwrap();
    let mut recorder = NullRecorder::default();
    let mut capture = CaptureSession::default();

    assert!(capture.begin(1, &mut mic, &mut recorder).is_err());
    assert_eq!(recorder.starts, 0);
    assert!(!capture.is_active());

    mic.release(lease);
    capture.begin(2, &mut mic, &mut recorder).unwrap();
    capture.abort(&mut mic, &mut recorder);
    assert_eq!(recorder.aborts, 1);
    assert!(mic.is_free());
}
