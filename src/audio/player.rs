use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        encoder::{FrameEncoder, OpusFrameEncoder},
        pipeline::MediaTools,
        queue::{QueueInfo, QueueManager},
        stream::{AudioStream, StreamOutcome, StreamSettings},
        track::Track,
    },
    error::{ExtractionError, PlaybackError},
    sources::TrackResolver,
    voice::VoiceSessionManager,
};

/// Crea un encoder nuevo para cada stream
pub type EncoderFactory = Arc<dyn Fn() -> Result<Box<dyn FrameEncoder>, PlaybackError> + Send + Sync>;

/// Fábrica de encoders Opus con el bitrate indicado
pub fn opus_encoders(bitrate: u32) -> EncoderFactory {
    Arc::new(move || Ok(Box::new(OpusFrameEncoder::new(bitrate)?) as Box<dyn FrameEncoder>))
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub stream: StreamSettings,
    /// Tiempo con la cola vacía antes de abandonar el canal
    pub inactivity_timeout: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            inactivity_timeout: Duration::from_secs(300),
        }
    }
}

/// Resultado de encolar uno o varios tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayOutcome {
    /// Posición (0 = siguiente) del primer track agregado en la lista de pendientes
    pub position: usize,
    /// La reproducción arrancó con esta llamada
    pub now_playing: bool,
}

/// Stream registrado para una guild; su lock serializa las transiciones
#[derive(Default)]
struct GuildPlayback {
    stream: Option<Arc<AudioStream>>,
}

struct PlayerInner {
    queues: QueueManager,
    voice: VoiceSessionManager,
    resolver: Arc<dyn TrackResolver>,
    tools: Arc<MediaTools>,
    encoders: EncoderFactory,
    settings: PlayerSettings,
    root: CancellationToken,
    playback: DashMap<GuildId, Arc<Mutex<GuildPlayback>>>,
}

/// Orquestador de reproducción: cola + sesión de voz + stream activo por guild
#[derive(Clone)]
pub struct AudioPlayer {
    inner: Arc<PlayerInner>,
}

impl AudioPlayer {
    pub fn new(
        queues: QueueManager,
        voice: VoiceSessionManager,
        resolver: Arc<dyn TrackResolver>,
        tools: MediaTools,
        encoders: EncoderFactory,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                queues,
                voice,
                resolver,
                tools: Arc::new(tools),
                encoders,
                settings,
                root: CancellationToken::new(),
                playback: DashMap::new(),
            }),
        }
    }

    pub fn queues(&self) -> &QueueManager {
        &self.inner.queues
    }

    pub fn voice(&self) -> &VoiceSessionManager {
        &self.inner.voice
    }

    fn slot(&self, guild_id: GuildId) -> Arc<Mutex<GuildPlayback>> {
        self.inner
            .playback
            .entry(guild_id)
            .or_default()
            .clone()
    }

    /// Resuelve la búsqueda y la encola
    ///
    /// Si la extracción falla no se toca ni la cola ni la sesión de voz.
    pub async fn play_query(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        query: &str,
        requested_by: UserId,
        requester_name: &str,
    ) -> Result<(Track, PlayOutcome), PlaybackError> {
        let track = self
            .inner
            .resolver
            .resolve(query, requested_by, requester_name)
            .await
            .map_err(|e| {
                warn!("❌ No se pudo resolver '{}': {}", query, e);
                PlaybackError::Extraction(e)
            })?;

        let outcome = self.play(guild_id, channel_id, track.clone()).await?;
        Ok((track, outcome))
    }

    /// Encola un track y arranca la reproducción si la guild estaba inactiva
    pub async fn play(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        track: Track,
    ) -> Result<PlayOutcome, PlaybackError> {
        self.play_all(guild_id, channel_id, vec![track]).await
    }

    /// Encola un lote ya resuelto, en orden
    pub async fn play_all(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        tracks: Vec<Track>,
    ) -> Result<PlayOutcome, PlaybackError> {
        if tracks.is_empty() {
            return Err(ExtractionError::NotFound("lista vacía".to_string()).into());
        }

        let slot = self.slot(guild_id);
        let mut playback = slot.lock().await;

        // La capacidad se comprueba antes de unirse al canal
        let queue = self.inner.queues.get_queue(guild_id);
        queue.check_capacity(tracks.len())?;

        self.inner.voice.connect(guild_id, channel_id).await?;

        let position = match queue.add_all(tracks) {
            Ok(position) => position,
            Err(e) => {
                if playback.stream.is_none() {
                    self.inner
                        .voice
                        .arm_inactivity(guild_id, self.inner.settings.inactivity_timeout);
                }
                return Err(e);
            }
        };

        let idle = playback.stream.is_none() && !queue.is_playing();
        if idle {
            self.advance_locked(guild_id, &mut playback)?;
        }

        Ok(PlayOutcome {
            position,
            now_playing: idle && playback.stream.is_some(),
        })
    }

    /// Saca el siguiente track y lo pone a sonar; con la cola vacía arma la inactividad
    fn advance_locked(
        &self,
        guild_id: GuildId,
        playback: &mut GuildPlayback,
    ) -> Result<(), PlaybackError> {
        let queue = self.inner.queues.get_queue(guild_id);
        playback.stream = None;

        loop {
            let Some(track) = queue.next() else {
                queue.finish();
                if self.inner.voice.is_connected(guild_id) {
                    self.inner
                        .voice
                        .arm_inactivity(guild_id, self.inner.settings.inactivity_timeout);
                }
                info!("📭 Cola vacía en guild {}", guild_id);
                return Ok(());
            };

            self.inner.voice.disarm_inactivity(guild_id);
            queue.begin(track.clone());

            match self.start_stream(guild_id, track.clone()) {
                Ok(stream) => {
                    info!("🎵 Reproduciendo '{}' en guild {}", track.title(), guild_id);
                    playback.stream = Some(stream.clone());
                    self.watch(guild_id, stream);
                    return Ok(());
                }
                Err(e) if e.is_fatal_for_attempt() => {
                    error!("❌ No se puede reproducir en guild {}: {}", guild_id, e);
                    queue.finish();
                    if self.inner.voice.is_connected(guild_id) {
                        self.inner
                            .voice
                            .arm_inactivity(guild_id, self.inner.settings.inactivity_timeout);
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!("⚠️ Saltando '{}' en guild {}: {}", track.title(), guild_id, e);
                }
            }
        }
    }

    fn start_stream(&self, guild_id: GuildId, track: Track) -> Result<Arc<AudioStream>, PlaybackError> {
        let session = self
            .inner
            .voice
            .session(guild_id)
            .ok_or(PlaybackError::NotConnected)?;
        let encoder = (self.inner.encoders)()?;

        let stream = Arc::new(AudioStream::new(
            guild_id,
            track,
            session,
            self.inner.voice.volume_handle(guild_id),
            self.inner.tools.clone(),
            encoder,
            self.inner.settings.stream.clone(),
        ));
        stream.start(&self.inner.root)?;
        Ok(stream)
    }

    /// Avanza la cola cuando el stream termina, sea cual sea el resultado
    fn watch(&self, guild_id: GuildId, stream: Arc<AudioStream>) {
        let player = self.clone();
        tokio::spawn(async move {
            let outcome = stream.wait().await;
            player.on_stream_end(guild_id, stream.id(), outcome).await;
        });
    }

    async fn on_stream_end(&self, guild_id: GuildId, stream_id: u64, outcome: StreamOutcome) {
        let slot = self.slot(guild_id);
        let mut playback = slot.lock().await;

        // stop() ya desregistró el stream; no hay nada que avanzar
        if playback.stream.as_ref().map(|s| s.id()) != Some(stream_id) {
            debug!("Stream {} de guild {} ya no está registrado", stream_id, guild_id);
            return;
        }

        let queue = self.inner.queues.get_queue(guild_id);
        match &outcome {
            StreamOutcome::Finished => debug!("Track terminado en guild {}", guild_id),
            StreamOutcome::Cancelled if queue.should_skip() => info!("⏭️ Track saltado en guild {}", guild_id),
            StreamOutcome::Cancelled => debug!("Stream cancelado en guild {}", guild_id),
            StreamOutcome::Failed(reason) => {
                warn!("⚠️ El track falló en guild {}, avanzando: {}", guild_id, reason)
            }
        }

        if self.inner.root.is_cancelled() {
            playback.stream = None;
            queue.finish();
            return;
        }

        if let Err(e) = self.advance_locked(guild_id, &mut playback) {
            error!("❌ No se pudo avanzar la cola en guild {}: {}", guild_id, e);
        }
    }

    /// Salta el track actual; el avance lo hace el cierre del stream
    ///
    /// El lock de la guild se mantiene hasta que el stream termina, así el
    /// track informado es siempre el del stream detenido.
    pub async fn skip(&self, guild_id: GuildId) -> Result<Track, PlaybackError> {
        let slot = self.slot(guild_id);
        let playback = slot.lock().await;
        let queue = self.inner.queues.get_queue(guild_id);

        let Some(stream) = playback.stream.clone() else {
            return Err(PlaybackError::NothingPlaying);
        };
        let current = stream.track().clone();

        queue.skip();
        info!("⏭️ Saltando '{}' en guild {}", current.title(), guild_id);
        if !stream.stop().await {
            warn!("⚠️ El stream saltado en guild {} no terminó a tiempo", guild_id);
        }
        Ok(current)
    }

    /// Detiene todo, limpia la cola y abandona el canal; sin efecto si está inactiva
    ///
    /// Devuelve `true` si había algo sonando o conectado.
    pub async fn stop(&self, guild_id: GuildId) -> bool {
        let slot = self.slot(guild_id);
        let mut playback = slot.lock().await;
        let stream = playback.stream.take();
        let connected = self.inner.voice.is_connected(guild_id);

        self.inner.queues.clear_queue(guild_id);

        if let Some(stream) = &stream {
            if !stream.stop().await {
                warn!("⚠️ El stream de guild {} no terminó a tiempo", guild_id);
            }
        }
        self.inner.voice.disconnect(guild_id).await;

        if stream.is_some() || connected {
            info!("⏹️ Reproducción detenida en guild {}", guild_id);
        }
        stream.is_some() || connected
    }

    /// El bot fue desconectado del canal `channel_id` desde fuera
    ///
    /// Solo actúa si la sesión registrada sigue en ese canal: los avisos de
    /// salida que provoca el propio bot (mover de canal, `/stop`, inactividad)
    /// llegan cuando la sesión ya cambió o ya no existe. Devuelve `true` si
    /// la guild se limpió.
    pub async fn handle_voice_disconnect(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let slot = self.slot(guild_id);
        let mut playback = slot.lock().await;

        let registered = self.inner.voice.session(guild_id).map(|s| s.channel_id());
        if registered != Some(channel_id) {
            debug!(
                "Salida del canal {} en guild {} ignorada (sesión actual: {:?})",
                channel_id, guild_id, registered
            );
            return false;
        }

        self.inner.voice.forget(guild_id);
        self.inner.queues.clear_queue(guild_id);
        if let Some(stream) = playback.stream.take() {
            info!("🔌 Desconectado del canal de voz en guild {}, deteniendo stream", guild_id);
            stream.stop().await;
        }
        true
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<Track, PlaybackError> {
        let slot = self.slot(guild_id);
        let playback = slot.lock().await;
        let queue = self.inner.queues.get_queue(guild_id);

        let (Some(stream), Some(current)) = (playback.stream.as_ref(), queue.current()) else {
            return Err(PlaybackError::NothingPlaying);
        };

        stream.pause();
        queue.set_paused(true);
        info!("⏸️ Reproducción pausada en guild {}", guild_id);
        Ok(current)
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<Track, PlaybackError> {
        let slot = self.slot(guild_id);
        let playback = slot.lock().await;
        let queue = self.inner.queues.get_queue(guild_id);

        let (Some(stream), Some(current)) = (playback.stream.as_ref(), queue.current()) else {
            return Err(PlaybackError::NothingPlaying);
        };
        if !queue.is_paused() {
            return Err(PlaybackError::NotPaused);
        }

        stream.resume();
        queue.set_paused(false);
        info!("▶️ Reproducción reanudada en guild {}", guild_id);
        Ok(current)
    }

    /// Ajusta el volumen en porcentaje; solo se aceptan valores de 0 a 100
    pub fn set_volume_percent(&self, guild_id: GuildId, percent: i64) -> Result<(), PlaybackError> {
        if !(0..=100).contains(&percent) {
            return Err(PlaybackError::VolumeOutOfRange(percent as f32 / 100.0));
        }
        self.inner.voice.set_volume(guild_id, percent as f32 / 100.0)
    }

    pub fn volume_percent(&self, guild_id: GuildId) -> u8 {
        (self.inner.voice.volume(guild_id) * 100.0).round() as u8
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        self.inner.queues.get_queue(guild_id).current()
    }

    pub fn snapshot(&self, guild_id: GuildId) -> QueueInfo {
        self.inner.queues.get_queue(guild_id).info()
    }

    /// Detiene todos los streams, cierra las sesiones y limpia las colas
    pub async fn shutdown(&self) {
        info!("🛑 Apagando el reproductor...");
        self.inner.root.cancel();

        let slots: Vec<_> = self
            .inner
            .playback
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (guild_id, slot) in slots {
            let stream = slot.lock().await.stream.take();
            if let Some(stream) = stream {
                if !stream.stop().await {
                    warn!("⚠️ Stream de guild {} posiblemente abandonado al apagar", guild_id);
                }
            }
        }

        self.inner.voice.disconnect_all().await;
        self.inner.queues.cleanup_all();
        info!("✅ Reproductor apagado");
    }
}
