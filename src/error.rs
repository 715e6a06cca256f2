//! # Error Taxonomy
//!
//! Typed errors for the playback pipeline. Structural errors abort the current
//! attempt or track only; per-frame errors (`FrameEncode`, `FrameSendTimeout`)
//! are logged by the streaming loop and never escape it.
//!
//! Every variant maps to a short user-facing message through
//! [`PlaybackError::user_message`]. Internal detail (subprocess stderr, exit
//! codes) stays in the `Display` output, which only reaches the logs.

use std::time::Duration;
use thiserror::Error;

/// Errores del resolvedor de tracks
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no se encontraron resultados para: {0}")]
    NotFound(String),

    #[error("contenido privado o no disponible: {0}")]
    Unavailable(String),

    #[error("error de red transitorio: {0}")]
    Network(String),

    #[error("respuesta del extractor inválida: {0}")]
    Malformed(String),

    #[error("herramienta requerida no encontrada: {0}")]
    ToolMissing(String),
}

/// Errores del transporte de voz
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    #[error("fallo al unirse al canal de voz: {0}")]
    Join(String),

    #[error("fallo al abandonar el canal de voz: {0}")]
    Leave(String),

    #[error("fallo al cambiar estado de habla: {0}")]
    Speaking(String),

    #[error("canal de envío de audio cerrado")]
    SendClosed,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("herramienta requerida no disponible: {0}")]
    ToolMissing(String),

    #[error("fallo de extracción: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("la sesión de voz no estuvo lista en {0:?}")]
    SessionTimeout(Duration),

    #[error("el subproceso {process} terminó inesperadamente: {status}")]
    SubprocessCrash { process: String, status: String },

    #[error("fallo al codificar frame: {0}")]
    FrameEncode(String),

    #[error("timeout enviando frame tras {0:?}")]
    FrameSendTimeout(Duration),

    #[error("el stream no terminó en {0:?}")]
    StopTimeout(Duration),

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("no hay nada en pausa")]
    NotPaused,

    #[error("volumen fuera de rango: {0}")]
    VolumeOutOfRange(f32),

    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("no hay sesión de voz activa")]
    NotConnected,

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    /// Mensaje corto para mostrar al usuario
    pub fn user_message(&self) -> String {
        match self {
            Self::ToolMissing(_) => "❌ El reproductor no está disponible en este momento".to_string(),
            Self::Extraction(ExtractionError::Network(_)) => {
                "❌ No se pudo cargar la canción (error de red), inténtalo de nuevo".to_string()
            }
            Self::Extraction(_) => "❌ No se pudo encontrar o cargar la canción solicitada".to_string(),
            Self::SessionTimeout(_) => "❌ El canal de voz no respondió a tiempo, inténtalo de nuevo".to_string(),
            Self::SubprocessCrash { .. } => "⚠️ La reproducción se interrumpió".to_string(),
            Self::FrameEncode(_) | Self::FrameSendTimeout(_) | Self::StopTimeout(_) => {
                "⚠️ Problema temporal de audio".to_string()
            }
            Self::NothingPlaying => "❌ No hay nada reproduciéndose".to_string(),
            Self::NotPaused => "❌ No hay nada en pausa".to_string(),
            Self::VolumeOutOfRange(_) => "❌ El volumen debe estar entre 0 y 100".to_string(),
            Self::QueueFull(max) => format!("❌ La cola está llena (máximo {} canciones)", max),
            Self::NotConnected => "❌ No estoy conectado a un canal de voz".to_string(),
            Self::Voice(_) => "❌ No se pudo conectar al canal de voz".to_string(),
            Self::Io(_) => "❌ Error interno de reproducción".to_string(),
        }
    }

    /// Indica si el error aborta el intento completo (no tiene sentido probar el siguiente track)
    pub fn is_fatal_for_attempt(&self) -> bool {
        matches!(self, Self::ToolMissing(_) | Self::NotConnected)
    }
}
