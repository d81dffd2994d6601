//! Reply audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::adapter::Player;
use crate::session::{PlaybackSignal, SignalSink};
use crate::{Error, Result};

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playing time
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Plays one reply segment at a time on the default output device
///
/// Decoding and playback both run on a worker thread, which reports `Ended`
/// or `Failed` through the sink. A stopped segment reports nothing.
pub struct SpeakerPlayer {
    sink: SignalSink,
    current: Option<Arc<AtomicBool>>,
}

impl SpeakerPlayer {
    /// Create a player reporting to `sink`
    #[must_use]
    pub const fn new(sink: SignalSink) -> Self {
        Self { sink, current: None }
    }
}

impl Player for SpeakerPlayer {
    fn play(&mut self, audio: Vec<u8>) -> Result<()> {
        self.stop();

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let sink = self.sink.clone();

        std::thread::Builder::new()
            .name("reply-playback".to_string())
            .spawn(move || {
                let result = decode_playable(&audio).and_then(|decoded| play_blocking(decoded, &flag));
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                let signal = match result {
                    Ok(()) => PlaybackSignal::Ended,
                    Err(e) => PlaybackSignal::Failed(e.to_string()),
                };
                sink.playback(signal);
            })?;

        self.current = Some(cancelled);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancelled) = self.current.take() {
            cancelled.store(true, Ordering::SeqCst);
        }
    }
}

fn decode_playable(audio: &[u8]) -> Result<DecodedAudio> {
    let decoded = decode(audio)?;
    if decoded.samples.is_empty() {
        return Err(Error::Audio("segment contains no audio".to_string()));
    }
    Ok(decoded)
}

/// Decode a reply segment (WAV or MP3) to mono samples
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode(audio: &[u8]) -> Result<DecodedAudio> {
    if audio.starts_with(b"RIFF") {
        decode_wav(audio)
    } else {
        decode_mp3(audio)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(wav)).map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let frame_samples: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 decode error: no frames".to_string()));
    }

    Ok(DecodedAudio { samples, sample_rate })
}

#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Play samples, returning when done or cancelled
fn play_blocking(audio: DecodedAudio, cancelled: &AtomicBool) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(audio.sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio(format!("no output config for {} Hz", audio.sample_rate)))?;

    let config: StreamConfig = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);
    let total = audio.samples.len();
    let expected = audio.duration();

    let samples = Arc::new(audio.samples);
    let position = Arc::new(AtomicUsize::new(0));
    let callback_samples = Arc::clone(&samples);
    let callback_position = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let pos = callback_position.load(Ordering::Relaxed);
                    let sample = callback_samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < callback_samples.len() {
                        callback_position.store(pos + 1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let start = Instant::now();
    let timeout = expected + Duration::from_millis(500);

    while position.load(Ordering::Relaxed) < total {
        if cancelled.load(Ordering::SeqCst) {
            tracing::debug!("playback cancelled");
            return Ok(());
        }
        if start.elapsed() > timeout {
            tracing::warn!(played = position.load(Ordering::Relaxed), total, "playback stalled");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // let the device drain its buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = total, "segment playback complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn decodes_wav_segment() {
        let wav = samples_to_wav(&[0.5; 1600], 16000).unwrap();
        let decoded = decode(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples.len(), 1600);
        assert!((decoded.samples[0] - 0.5).abs() < 0.001);
        assert_eq!(decoded.duration(), Duration::from_millis(100));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode(b"definitely not audio").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn undecodable_segment_fails_through_the_sink() {
        let (sink, mut rx) = crate::session::signal_channel();
        let mut player = SpeakerPlayer::new(sink);
        player.play(b"definitely not audio".to_vec()).unwrap();

        assert!(matches!(
            rx.blocking_recv(),
            Some(crate::session::Signal::Playback(PlaybackSignal::Failed(reason))) if reason.contains("decode")
        ));
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }
}
