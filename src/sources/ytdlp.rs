use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{process::Stdio, time::Duration};
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info, warn};

use super::{is_url, TrackResolver};
use crate::{audio::track::Track, error::ExtractionError};

/// Consultas simultáneas a yt-dlp
const MAX_CONCURRENT_LOOKUPS: usize = 3;

/// Metadata que imprime `yt-dlp --dump-json`
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
}

/// Clasifica el stderr de yt-dlp en errores de extracción tipados
pub struct StderrPatterns {
    not_found: Regex,
    unavailable: Regex,
    network: Regex,
}

impl StderrPatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            unavailable: Regex::new(
                r"(?i)private video|video unavailable|not available|sign in to confirm|members[- ]only|has been removed|copyright|age[- ]restricted",
            )?,
            not_found: Regex::new(
                r"(?i)no video results|unable to find|not found|http error 404|unsupported url|is not a valid url",
            )?,
            network: Regex::new(
                r"(?i)timed out|connection (reset|refused|aborted)|network is unreachable|temporary failure|name resolution|http error 5\d\d|unable to download (webpage|api page)",
            )?,
        })
    }

    pub fn classify(&self, stderr: &str) -> ExtractionError {
        let detail = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("sin detalle")
            .trim()
            .to_string();

        if self.unavailable.is_match(stderr) {
            ExtractionError::Unavailable(detail)
        } else if self.not_found.is_match(stderr) {
            ExtractionError::NotFound(detail)
        } else if self.network.is_match(stderr) {
            ExtractionError::Network(detail)
        } else {
            ExtractionError::Unavailable(detail)
        }
    }
}

/// Resolvedor basado en `yt-dlp --dump-json`
pub struct YtDlpResolver {
    program: String,
    patterns: StderrPatterns,
    rate_limiter: Semaphore,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            program: program.into(),
            patterns: StderrPatterns::new()?,
            rate_limiter: Semaphore::new(MAX_CONCURRENT_LOOKUPS),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn target_for(query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch:{}", query)
        }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
        requester_name: &str,
    ) -> Result<Track, ExtractionError> {
        if query.trim().is_empty() {
            return Err(ExtractionError::NotFound("búsqueda vacía".to_string()));
        }

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let target = Self::target_for(query);
        info!("🔍 Resolviendo: {}", target);

        let command = Command::new(&self.program)
            .args(["--dump-json", "--no-playlist", "--no-warnings", &target])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractionError::ToolMissing(self.program.clone()));
            }
            Ok(Err(e)) => return Err(ExtractionError::Network(e.to_string())),
            Err(_) => {
                warn!("⏰ yt-dlp no respondió en {:?} para '{}'", self.timeout, target);
                return Err(ExtractionError::Network(format!("timeout tras {:?}", self.timeout)));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr.trim());
            return Err(self.patterns.classify(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let track = parse_track(&stdout, query, requested_by, requester_name)?;
        info!("✅ Resuelto: {} ({})", track.title(), track.url_preview());
        Ok(track)
    }
}

/// Construye el track a partir de la primera línea JSON de yt-dlp
pub fn parse_track(
    stdout: &str,
    query: &str,
    requested_by: UserId,
    requester_name: &str,
) -> Result<Track, ExtractionError> {
    let Some(line) = stdout.lines().find(|line| !line.trim().is_empty()) else {
        return Err(ExtractionError::NotFound(query.to_string()));
    };

    let info: YtDlpInfo =
        serde_json::from_str(line).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    // El extractor vuelve a resolver la página; la URL directa caduca
    let source = info
        .webpage_url
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| info.url.clone().filter(|u| !u.is_empty()))
        .ok_or_else(|| ExtractionError::Malformed("respuesta sin URL reproducible".to_string()))?;

    let title = info
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    let mut track = Track::new(title, source, requested_by).with_requester_name(requester_name);
    if let Some(page) = info.webpage_url {
        track = track.with_webpage_url(page);
    }
    if let Some(artist) = info.uploader {
        track = track.with_artist(artist);
    }
    if let Some(secs) = info.duration.filter(|d| d.is_finite() && *d > 0.0) {
        track = track.with_duration(Duration::from_secs_f64(secs));
    }
    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail(thumbnail);
    }
    Ok(track)
}
