//! Voice transport backed by songbird.
//!
//! Songbird owns the Discord voice gateway and RTP. Frames produced by the
//! streaming engine are already Opus, so the adapter hands them to songbird as
//! a live DCA1 stream (magic, JSON header, then length-prefixed Opus packets).
//! Songbird's DCA reader consumes that and passes the packets through to the
//! voice connection untouched while the track volume stays at 1.0.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::{CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler},
    input::{AudioStream as SongbirdStream, Input, LiveInput},
    tracks::TrackHandle,
    Call, Songbird,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use symphonia::core::{io::MediaSource, probe::Hint};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{VoiceConnection, VoiceTransport};
use crate::{
    audio::pcm::{FRAME_DURATION, FRAME_SIZE_PER_CHANNEL, SAMPLE_RATE},
    error::VoiceError,
};

/// Frames en vuelo entre el stream y songbird (~200ms)
const FRAME_BUFFER: usize = 10;

/// Paquete Opus de silencio
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Cabecera DCA1 con la metadata JSON que espera el lector de songbird
fn dca_header() -> Vec<u8> {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null
            }
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SIZE_PER_CHANNEL,
            "abr": null,
            "vbr": true,
            "channels": 2
        },
        "info": null,
        "origin": null,
        "extra": null
    })
    .to_string();

    let mut header = Vec::with_capacity(8 + metadata.len());
    header.extend_from_slice(b"DCA1");
    header.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    header.extend_from_slice(metadata.as_bytes());
    header
}

/// Fuente DCA en vivo alimentada por el canal de frames
///
/// Si no llega un frame a tiempo entrega silencio para no frenar al mixer;
/// cuando el canal se cierra devuelve EOF.
pub struct DcaFrameSource {
    frames: flume::Receiver<Bytes>,
    pending: Bytes,
    wait: Duration,
}

impl DcaFrameSource {
    pub fn new(frames: flume::Receiver<Bytes>) -> Self {
        Self {
            frames,
            pending: Bytes::from(dca_header()),
            wait: FRAME_DURATION,
        }
    }

    fn frame_record(packet: &[u8]) -> Bytes {
        let mut record = BytesMut::with_capacity(2 + packet.len());
        record.put_i16_le(packet.len() as i16);
        record.put_slice(packet);
        record.freeze()
    }
}

impl Read for DcaFrameSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            let packet = match self.frames.recv_timeout(self.wait) {
                Ok(packet) => packet,
                Err(flume::RecvTimeoutError::Timeout) => Bytes::from_static(&OPUS_SILENCE),
                Err(flume::RecvTimeoutError::Disconnected) => return Ok(0),
            };
            self.pending = Self::frame_record(&packet);
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

impl Seek for DcaFrameSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream en vivo"))
    }
}

impl MediaSource for DcaFrameSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Marca la conexión como caída o recuperada según los eventos del driver
struct DriverStateHandler {
    guild_id: GuildId,
    connected: Arc<AtomicBool>,
    value: bool,
}

#[async_trait]
impl VoiceEventHandler for DriverStateHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.connected.store(self.value, Ordering::SeqCst);
        if self.value {
            debug!("🔗 Driver de voz conectado en guild {}", self.guild_id);
        } else {
            warn!("🔌 Driver de voz desconectado en guild {}", self.guild_id);
        }
        None
    }
}

pub struct SongbirdConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    frames: flume::Sender<Bytes>,
    track: TrackHandle,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn is_ready(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        // Ocupado significa que otro lo está usando; se reintentará en el siguiente sondeo
        self.call
            .try_lock()
            .map(|call| call.current_connection().is_some())
            .unwrap_or(false)
    }

    fn sender(&self) -> Option<flume::Sender<Bytes>> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.frames.clone())
    }

    fn set_speaking(&self, speaking: bool) -> Result<(), VoiceError> {
        // songbird gestiona el indicador de habla según haya audio
        debug!("🗣️ speaking={} en guild {}", speaking, self.guild_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.track.stop() {
            debug!("Track de songbird ya detenido: {}", e);
        }
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| VoiceError::Leave(e.to_string()))
    }
}

/// Transporte de voz sobre el gestor de songbird registrado en serenity
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| VoiceError::Join(e.to_string()))?;

        let (tx, rx) = flume::bounded(FRAME_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));

        let mut hint = Hint::new();
        hint.with_extension("dca");
        let input = Input::Live(
            LiveInput::Raw(SongbirdStream {
                input: Box::new(DcaFrameSource::new(rx)) as Box<dyn MediaSource>,
                hint: Some(hint),
            }),
            None,
        );

        let track = {
            let mut handler = call.lock().await;
            for (event, value) in [(CoreEvent::DriverDisconnect, false), (CoreEvent::DriverReconnect, true)] {
                handler.add_global_event(
                    Event::Core(event),
                    DriverStateHandler {
                        guild_id,
                        connected: connected.clone(),
                        value,
                    },
                );
            }
            handler.play_input(input)
        };

        info!("🎧 Canal de audio DCA abierto para guild {}", guild_id);
        Ok(Arc::new(SongbirdConnection {
            guild_id,
            channel_id,
            manager: self.manager.clone(),
            call,
            frames: tx,
            track,
            connected,
        }))
    }
}
