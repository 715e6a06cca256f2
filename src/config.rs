use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::audio::{
    pipeline::MediaTools,
    player::PlayerSettings,
    stream::StreamSettings,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub opus_bitrate: u32,

    // Tiempos (segundos)
    pub inactivity_timeout_secs: u64,
    pub voice_ready_timeout_secs: u64,
    pub stop_timeout_secs: u64,

    // Herramientas externas
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Herramientas multimedia desde el entorno, sin exigir credenciales de Discord
    pub fn load_media_tools() -> MediaTools {
        dotenvy::dotenv().ok();
        Self::media_tools_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn media_tools_from_lookup<F>(lookup: F) -> MediaTools
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        MediaTools::with_binaries(
            value("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            value("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
        )
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            // Discord
            discord_token: value("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: parse(
                "APPLICATION_ID",
                Some(value("APPLICATION_ID").context("APPLICATION_ID no está definido")?),
                0,
            )?,
            guild_id: value("GUILD_ID").and_then(|s| s.trim().parse().ok()),

            // Audio
            default_volume: parse("DEFAULT_VOLUME", value("DEFAULT_VOLUME"), defaults.default_volume)?,
            max_queue_size: parse("MAX_QUEUE_SIZE", value("MAX_QUEUE_SIZE"), defaults.max_queue_size)?,
            opus_bitrate: parse("OPUS_BITRATE", value("OPUS_BITRATE"), defaults.opus_bitrate)?,

            // Tiempos
            inactivity_timeout_secs: parse(
                "INACTIVITY_TIMEOUT_SECS",
                value("INACTIVITY_TIMEOUT_SECS"),
                defaults.inactivity_timeout_secs,
            )?,
            voice_ready_timeout_secs: parse(
                "VOICE_READY_TIMEOUT_SECS",
                value("VOICE_READY_TIMEOUT_SECS"),
                defaults.voice_ready_timeout_secs,
            )?,
            stop_timeout_secs: parse(
                "STOP_TIMEOUT_SECS",
                value("STOP_TIMEOUT_SECS"),
                defaults.stop_timeout_secs,
            )?,

            // Herramientas
            ytdlp_path: value("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: value("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0.0 and 1.0
    /// - Opus bitrate must be within 8..=510 kbps
    /// - Queue size and every timeout must be greater than zero
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 1.0, got: {}", self.default_volume);
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.inactivity_timeout_secs == 0 || self.voice_ready_timeout_secs == 0 || self.stop_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging, without the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {}kbps, cola máx. {}\n  \
            Timeouts: inactividad {}, voz {}, stop {}\n  \
            Tools: {} | {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.opus_bitrate / 1000,
            self.max_queue_size,
            humantime::format_duration(self.inactivity_timeout()),
            humantime::format_duration(self.voice_ready_timeout()),
            humantime::format_duration(self.stop_timeout()),
            self.ytdlp_path,
            self.ffmpeg_path,
        )
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn voice_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_ready_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn media_tools(&self) -> MediaTools {
        MediaTools::with_binaries(&self.ytdlp_path, &self.ffmpeg_path)
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            stream: StreamSettings {
                ready_timeout: self.voice_ready_timeout(),
                stop_timeout: self.stop_timeout(),
                ..StreamSettings::default()
            },
            inactivity_timeout: self.inactivity_timeout(),
        }
    }
}

fn parse<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            default_volume: 0.5,
            max_queue_size: 1000,
            opus_bitrate: 128_000,

            // Timeouts
            inactivity_timeout_secs: 300,
            voice_ready_timeout_secs: 10,
            stop_timeout_secs: 5,

            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}
