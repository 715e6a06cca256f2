//! # Voice Module
//!
//! Voice-session lifecycle for every guild.
//!
//! The playback core only depends on the narrow contract in this module:
//!
//! - [`VoiceTransport`] joins a channel and hands back a [`VoiceConnection`]
//! - [`VoiceConnection`] reports readiness, exposes the frame accept channel,
//!   toggles the speaking flag and disconnects
//!
//! [`VoiceSessionManager`] keeps at most one connection per guild, owns the
//! per-guild volume (independent of any stream) and the inactivity timers that
//! tear idle sessions down.
//!
//! The wire protocol itself lives behind the transport; see
//! [`songbird_transport`] for the songbird-backed adapter.

pub mod songbird_transport;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::error::{PlaybackError, VoiceError};

/// Conexión de voz activa para una guild
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    /// El transporte terminó el handshake y acepta audio
    fn is_ready(&self) -> bool;

    /// Canal donde se entregan frames Opus de 20ms; `None` mientras no esté listo
    fn sender(&self) -> Option<flume::Sender<Bytes>>;

    fn set_speaking(&self, speaking: bool) -> Result<(), VoiceError>;

    async fn disconnect(&self) -> Result<(), VoiceError>;
}

/// Fábrica de conexiones de voz
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError>;
}

/// Volumen compartido entre el comando y el stream activo
#[derive(Debug, Clone)]
pub struct VolumeHandle(Arc<RwLock<f32>>);

impl VolumeHandle {
    pub fn new(volume: f32) -> Self {
        Self(Arc::new(RwLock::new(volume.clamp(0.0, 1.0))))
    }

    pub fn get(&self) -> f32 {
        *self.0.read()
    }

    /// Ajusta el volumen saturando a [0, 1]
    pub fn set(&self, volume: f32) {
        *self.0.write() = volume.clamp(0.0, 1.0);
    }
}

/// Registro de sesiones de voz por guild
pub struct VoiceSessionManager {
    transport: Arc<dyn VoiceTransport>,
    sessions: Arc<DashMap<GuildId, Arc<dyn VoiceConnection>>>,
    volumes: DashMap<GuildId, VolumeHandle>,
    inactivity_timers: DashMap<GuildId, JoinHandle<()>>,
    connect_locks: DashMap<GuildId, Arc<Mutex<()>>>,
    default_volume: f32,
    ready_timeout: Duration,
}

impl VoiceSessionManager {
    pub fn new(transport: Arc<dyn VoiceTransport>, default_volume: f32, ready_timeout: Duration) -> Self {
        Self {
            transport,
            sessions: Arc::new(DashMap::new()),
            volumes: DashMap::new(),
            inactivity_timers: DashMap::new(),
            connect_locks: DashMap::new(),
            default_volume: default_volume.clamp(0.0, 1.0),
            ready_timeout,
        }
    }

    /// Conecta (o mueve) la sesión de la guild al canal indicado
    ///
    /// Espera a que el transporte esté listo como mucho `ready_timeout`; si no
    /// lo está, desconecta el intento a medias y devuelve `SessionTimeout`.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, PlaybackError> {
        let lock = self
            .connect_locks
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = self.session(guild_id) {
            if existing.channel_id() == channel_id {
                return Ok(existing);
            }

            info!(
                "🔀 Moviendo sesión de voz en guild {} de {} a {}",
                guild_id,
                existing.channel_id(),
                channel_id
            );
            self.sessions.remove(&guild_id);
            if let Err(e) = existing.disconnect().await {
                warn!("⚠️ Error al abandonar canal previo en guild {}: {}", guild_id, e);
            }
        }

        let connection = self.transport.connect(guild_id, channel_id).await?;

        if !wait_until_ready(connection.as_ref(), self.ready_timeout).await {
            warn!(
                "⏰ La sesión de voz de guild {} no estuvo lista en {:?}",
                guild_id, self.ready_timeout
            );
            if let Err(e) = connection.disconnect().await {
                warn!("⚠️ Error al limpiar conexión incompleta: {}", e);
            }
            return Err(PlaybackError::SessionTimeout(self.ready_timeout));
        }

        self.sessions.insert(guild_id, connection.clone());
        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(connection)
    }

    pub fn session(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceConnection>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Desconecta y elimina la sesión (no-op si no existe)
    pub async fn disconnect(&self, guild_id: GuildId) {
        self.disarm_inactivity(guild_id);

        if let Some((_, session)) = self.sessions.remove(&guild_id) {
            if let Err(e) = session.disconnect().await {
                warn!("⚠️ Error al desconectar guild {}: {}", guild_id, e);
            }
            info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        }
    }

    /// Olvida una sesión que el transporte ya cerró por su cuenta
    pub fn forget(&self, guild_id: GuildId) {
        self.disarm_inactivity(guild_id);
        if self.sessions.remove(&guild_id).is_some() {
            debug!("🔌 Sesión de guild {} eliminada del registro", guild_id);
        }
    }

    pub async fn disconnect_all(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
        for guild_id in guilds {
            self.disconnect(guild_id).await;
        }
        for entry in self.inactivity_timers.iter() {
            entry.value().abort();
        }
        self.inactivity_timers.clear();
    }

    /// Handle compartido que el stream lee en cada frame
    pub fn volume_handle(&self, guild_id: GuildId) -> VolumeHandle {
        self.volumes
            .entry(guild_id)
            .or_insert_with(|| VolumeHandle::new(self.default_volume))
            .clone()
    }

    pub fn volume(&self, guild_id: GuildId) -> f32 {
        self.volumes
            .get(&guild_id)
            .map(|v| v.get())
            .unwrap_or(self.default_volume)
    }

    /// Ajusta el volumen de la guild; rechaza valores fuera de [0, 1]
    pub fn set_volume(&self, guild_id: GuildId, volume: f32) -> Result<(), PlaybackError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlaybackError::VolumeOutOfRange(volume));
        }
        self.volume_handle(guild_id).set(volume);
        info!("🔊 Volumen de guild {} ajustado a {}%", guild_id, (volume * 100.0).round() as u32);
        Ok(())
    }

    /// Programa la desconexión automática de una guild inactiva
    pub fn arm_inactivity(&self, guild_id: GuildId, timeout: Duration) {
        let sessions = self.sessions.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, session)) = sessions.remove(&guild_id) {
                if let Err(e) = session.disconnect().await {
                    warn!("⚠️ Error al desconectar por inactividad: {}", e);
                }
                info!("💤 Desconectado por inactividad en guild {}", guild_id);
            }
        });

        if let Some(previous) = self.inactivity_timers.insert(guild_id, timer) {
            previous.abort();
        }
        debug!("⏲️ Temporizador de inactividad armado para guild {} ({:?})", guild_id, timeout);
    }

    pub fn disarm_inactivity(&self, guild_id: GuildId) {
        if let Some((_, timer)) = self.inactivity_timers.remove(&guild_id) {
            timer.abort();
            debug!("⏲️ Temporizador de inactividad cancelado para guild {}", guild_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Sondea la conexión cada 100ms hasta que esté lista o venza el plazo
pub(crate) async fn wait_until_ready(connection: &dyn VoiceConnection, timeout: Duration) -> bool {
    let poll = async {
        while !(connection.is_ready() && connection.sender().is_some()) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}
