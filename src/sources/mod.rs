pub mod ytdlp;

use async_trait::async_trait;
use serenity::model::id::UserId;

use crate::{audio::track::Track, error::ExtractionError};

pub use ytdlp::YtDlpResolver;

/// Convierte una búsqueda o URL en un track reproducible
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
        requester_name: &str,
    ) -> Result<Track, ExtractionError>;
}

/// Indica si la entrada es una URL http(s) y no un texto de búsqueda
pub fn is_url(query: &str) -> bool {
    url::Url::parse(query.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}
