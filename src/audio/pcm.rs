//! Frame geometry and sample helpers for 48 kHz stereo s16le PCM.
//!
//! Discord expects 20ms of audio per frame:
//! 48000 Hz * 0.02 s = 960 samples per channel, 1920 interleaved samples,
//! 3840 bytes of PCM.

use std::time::Duration;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Samples per channel per frame, the size the Opus encoder wants
pub const FRAME_SIZE_PER_CHANNEL: usize = (SAMPLE_RATE as usize) / 50;
pub const SAMPLES_PER_FRAME: usize = FRAME_SIZE_PER_CHANNEL * CHANNELS;
pub const FRAME_BYTES: usize = SAMPLES_PER_FRAME * 2;

/// Escala cada muestra s16le por `volume`, saturando al rango de i16
pub fn scale_pcm(buffer: &mut [u8], volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }

    for chunk in buffer.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        let scaled = (sample as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32);
        chunk.copy_from_slice(&(scaled as i16).to_le_bytes());
    }
}

/// Convierte bytes s16le en exactamente `samples` muestras, rellenando con silencio o truncando
pub fn pcm_to_samples(buffer: &[u8], samples: usize) -> Vec<i16> {
    let mut out: Vec<i16> = buffer
        .chunks_exact(2)
        .take(samples)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    out.resize(samples, 0);
    out
}
