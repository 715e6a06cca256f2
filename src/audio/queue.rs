use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{audio::track::Track, error::PlaybackError};

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Track>,
    current: Option<Track>,
    playing: bool,
    paused: bool,
    skip: bool,
}

/// Cola de reproducción de una guild
///
/// Todo el estado vive detrás de un único lock, así que ninguna operación
/// observa un estado a medio actualizar de otra.
#[derive(Debug)]
pub struct GuildQueue {
    state: Mutex<QueueState>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size,
        }
    }

    /// Agrega un track al final y devuelve su posición (0 = siguiente)
    pub fn add(&self, track: Track) -> Result<usize, PlaybackError> {
        let mut state = self.state.lock();
        if state.items.len() >= self.max_size {
            return Err(PlaybackError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", track.title());
        state.items.push_back(track);
        Ok(state.items.len() - 1)
    }

    /// Comprueba que `incoming` tracks caben sin agregarlos
    pub fn check_capacity(&self, incoming: usize) -> Result<(), PlaybackError> {
        self.fits(self.state.lock().items.len(), incoming)
    }

    fn fits(&self, pending: usize, incoming: usize) -> Result<(), PlaybackError> {
        if pending + incoming > self.max_size {
            return Err(PlaybackError::QueueFull(self.max_size));
        }
        Ok(())
    }

    /// Agrega varios tracks en orden; todo o nada
    pub fn add_all(&self, tracks: Vec<Track>) -> Result<usize, PlaybackError> {
        let mut state = self.state.lock();
        self.fits(state.items.len(), tracks.len())?;

        let first = state.items.len();
        let count = tracks.len();
        state.items.extend(tracks);
        info!("➕ Agregadas {} canciones a la cola", count);
        Ok(first)
    }

    /// Saca el siguiente track (FIFO estricto)
    pub fn next(&self) -> Option<Track> {
        let next = self.state.lock().items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola (FIFO): {}", track.title()),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    pub fn current(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    pub fn set_current(&self, track: Option<Track>) {
        self.state.lock().current = track;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Marca el track actual para saltar
    pub fn skip(&self) {
        self.state.lock().skip = true;
    }

    pub fn should_skip(&self) -> bool {
        self.state.lock().skip
    }

    pub fn set_skip(&self, skip: bool) {
        self.state.lock().skip = skip;
    }

    /// Marca un track como actual y reproduciéndose en un solo paso
    pub fn begin(&self, track: Track) {
        let mut state = self.state.lock();
        state.current = Some(track);
        state.playing = true;
        state.paused = false;
        state.skip = false;
    }

    /// Vuelve al estado inactivo sin tocar los pendientes
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.playing = false;
        state.paused = false;
        state.skip = false;
    }

    /// Limpia la cola y resetea todo el estado
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.current = None;
        state.playing = false;
        state.paused = false;
        state.skip = false;
        info!("🗑️ Cola limpiada");
    }

    /// Copia ordenada de los tracks pendientes
    pub fn snapshot(&self) -> Vec<Track> {
        self.state.lock().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Obtiene información completa de la cola, tomada bajo un único lock
    pub fn info(&self) -> QueueInfo {
        let state = self.state.lock();
        let queue_duration: Duration = state.items.iter().filter_map(|t| t.duration()).sum();
        let current_duration = state
            .current
            .as_ref()
            .and_then(|t| t.duration())
            .unwrap_or_default();

        QueueInfo {
            current: state.current.clone(),
            items: state.items.iter().cloned().collect(),
            total_items: state.items.len(),
            playing: state.playing,
            paused: state.paused,
            total_duration: queue_duration + current_duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub current: Option<Track>,
    pub items: Vec<Track>,
    pub total_items: usize,
    pub playing: bool,
    pub paused: bool,
    pub total_duration: Duration,
}

impl QueueInfo {
    /// Obtiene una página específica de la cola (1-indexed)
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let safe_page = page.max(1);
        let start = (safe_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.items.len());
        let total_pages = if self.total_items == 0 {
            1
        } else {
            self.total_items.div_ceil(items_per_page)
        };

        QueuePage {
            items: if start < self.items.len() {
                self.items[start..end].to_vec()
            } else {
                Vec::new()
            },
            current_page: safe_page,
            total_pages,
            total_items: self.total_items,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.items.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Registro de colas por guild, creadas bajo demanda
pub struct QueueManager {
    queues: DashMap<GuildId, Arc<GuildQueue>>,
    max_size: usize,
}

impl QueueManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            queues: DashMap::new(),
            max_size,
        }
    }

    /// Obtiene o crea la cola de una guild
    pub fn get_queue(&self, guild_id: GuildId) -> Arc<GuildQueue> {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildQueue::new(self.max_size)))
            .clone()
    }

    pub fn clear_queue(&self, guild_id: GuildId) {
        if let Some(queue) = self.queues.get(&guild_id) {
            queue.clear();
        }
    }

    /// Limpia todas las colas (shutdown)
    pub fn cleanup_all(&self) {
        for entry in self.queues.iter() {
            entry.value().clear();
        }
        self.queues.clear();
        info!("🧹 Todas las colas limpiadas");
    }

    pub fn guild_count(&self) -> usize {
        self.queues.len()
    }
}
