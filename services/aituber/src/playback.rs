//! Audio playback on the default output device.

use crate::speech::SpeechError;
use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::Cursor;
use std::path::Path;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tracing::debug;

/// Plays a synthesized clip to completion.
pub trait AudioOutput: Send + Sync {
    /// Blocks until the file has finished playing.
    fn play_mp3_file(&self, path: &Path) -> Result<(), SpeechError>;
}

/// Playback through the system's default output device.
pub struct CpalOutput;

impl AudioOutput for CpalOutput {
    fn play_mp3_file(&self, path: &Path) -> Result<(), SpeechError> {
        let bytes = std::fs::read(path)?;
        let (samples, sample_rate) = decode_mp3(&bytes)?;
        play_samples_blocking(&samples, sample_rate)
    }
}

fn play_samples_blocking(samples: &[f32], sample_rate: u32) -> Result<(), SpeechError> {
    if samples.is_empty() {
        return Ok(());
    }

    // The device is re-resolved for every clip rather than held open between
    // sentences; a stale handle would otherwise survive a default-device
    // switch.
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SpeechError::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| SpeechError::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| SpeechError::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = config.channels as usize;

    let total = samples.len();
    let samples = Arc::new(samples.to_vec());
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let cb_samples = Arc::clone(&samples);
    let cb_position = Arc::clone(&position);
    let cb_finished = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = cb_position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = if pos < cb_samples.len() {
                        let sample = cb_samples[pos];
                        pos += 1;
                        sample
                    } else {
                        cb_finished.store(true, Ordering::Relaxed);
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
                cb_position.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| SpeechError::Audio(e.to_string()))?;

    stream.play().map_err(|e| SpeechError::Audio(e.to_string()))?;

    // Poll for completion, with a watchdog derived from the clip length so a
    // wedged device cannot hang the speech queue forever.
    let duration_ms = (total as u64 * 1000) / u64::from(sample_rate);
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            tracing::warn!("playback watchdog expired before the clip drained");
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    std::thread::sleep(std::time::Duration::from_millis(100));

    drop(stream);
    debug!(samples = total, "playback complete");
    Ok(())
}

/// Decodes MP3 bytes to mono f32 samples plus the clip's sample rate.
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32), SpeechError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 24_000u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right =
                            f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        (left + right) / 2.0
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(SpeechError::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}
