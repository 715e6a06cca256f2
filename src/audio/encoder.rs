use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;

use crate::{audio::pcm::SAMPLES_PER_FRAME, error::PlaybackError};

/// Tamaño máximo de un paquete Opus (recomendación de libopus)
const MAX_PACKET_SIZE: usize = 4000;

/// Codifica un frame PCM de 20ms al formato del transporte
pub trait FrameEncoder: Send {
    /// `pcm` siempre trae `SAMPLES_PER_FRAME` muestras intercaladas
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PlaybackError>;
}

/// Encoder Opus para voz de Discord (48kHz, estéreo, modo audio)
pub struct OpusFrameEncoder {
    encoder: Encoder,
    buffer: Vec<u8>,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32) -> Result<Self, PlaybackError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| PlaybackError::FrameEncode(format!("no se pudo crear el encoder Opus: {}", e)))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))
            .map_err(|e| PlaybackError::FrameEncode(format!("bitrate inválido {}: {}", bitrate, e)))?;

        Ok(Self {
            encoder,
            buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PlaybackError> {
        if pcm.len() != SAMPLES_PER_FRAME {
            return Err(PlaybackError::FrameEncode(format!(
                "se esperaban {} muestras, llegaron {}",
                SAMPLES_PER_FRAME,
                pcm.len()
            )));
        }

        let len = self
            .encoder
            .encode(pcm, &mut self.buffer)
            .map_err(|e| PlaybackError::FrameEncode(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&self.buffer[..len]))
    }
}
