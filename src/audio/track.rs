use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::time::Duration;

/// Representa un track reproducible
///
/// Lo crea el resolvedor y es de solo lectura a partir de ahí; la cola y el
/// stream guardan copias baratas.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    title: String,
    url: String,
    webpage_url: Option<String>,
    artist: Option<String>,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    requested_by: UserId,
    requester_name: String,
    added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, url: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            webpage_url: None,
            artist: None,
            duration: None,
            thumbnail: None,
            requested_by,
            requester_name: String::new(),
            added_at: Utc::now(),
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    /// URI que se entrega al extractor
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn webpage_url(&self) -> Option<&str> {
        self.webpage_url.as_deref()
    }
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn requester_name(&self) -> &str {
        &self.requester_name
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    // Builders
    pub fn with_webpage_url(mut self, webpage_url: impl Into<String>) -> Self {
        self.webpage_url = Some(webpage_url.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_requester_name(mut self, name: impl Into<String>) -> Self {
        self.requester_name = name.into();
        self
    }

    /// Vista corta de la URL para logs
    pub fn url_preview(&self) -> String {
        if self.url.chars().count() > 50 {
            let head: String = self.url.chars().take(50).collect();
            format!("{}...", head)
        } else {
            self.url.clone()
        }
    }
}
