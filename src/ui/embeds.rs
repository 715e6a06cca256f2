use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    player::PlayOutcome,
    queue::{QueueInfo, QueuePage},
    track::Track,
};

/// Canciones por página en la vista de cola
pub const QUEUE_PAGE_SIZE: usize = 10;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Player";

fn base_track_embed(track: &Track, title: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title()))
        .field("🎤 Artista", track.artist().unwrap_or("Desconocido"), true)
        .field("⏱️ Duración", duration_label(track.duration()), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by()), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(track.webpage_url().unwrap_or(track.url()))
        .timestamp(Timestamp::now())
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    base_track_embed(track, "🎵 Reproduciendo Ahora")
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea el embed de respuesta a `/play`
pub fn create_track_added_embed(track: &Track, outcome: &PlayOutcome) -> CreateEmbed {
    if outcome.now_playing {
        return create_now_playing_embed(track);
    }

    base_track_embed(track, "✅ Canción Agregada")
        .color(colors::MUSIC_PURPLE)
        .field("📍 Posición en cola", (outcome.position + 1).to_string(), true)
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente cuando le toque",
        ))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(queue_info: &QueueInfo, page: usize) -> CreateEmbed {
    let queue_page = queue_info.get_page(page, QUEUE_PAGE_SIZE);

    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now());

    if queue_info.is_idle() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    let mut embed = embed;
    if let Some(current) = &queue_info.current {
        let status = if queue_info.paused { "⏸️ En pausa" } else { "▶️ Reproduciendo" };
        embed = embed.field(status, track_line(current), false);
    }

    let listing = up_next_listing(&queue_page);
    if !listing.is_empty() {
        embed = embed.field("Próximas canciones", listing, false);
    }

    embed
        .field("Información", queue_summary(queue_info), false)
        .footer(CreateEmbedFooter::new(page_footer(&queue_page)))
}

/// Crea un embed de error con el mensaje ya preparado para el usuario
pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn track_line(track: &Track) -> String {
    match track.artist() {
        Some(artist) => format!("**{}** - {}", track.title(), artist),
        None => format!("**{}**", track.title()),
    }
}

/// Lista numerada de la página; la numeración sigue la posición real en cola
fn up_next_listing(page: &QueuePage) -> String {
    let offset = page.current_page.saturating_sub(1) * QUEUE_PAGE_SIZE;
    page.items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let duration = item
                .duration()
                .map(|d| format!(" `[{}]`", format_duration(d)))
                .unwrap_or_default();
            format!("**{}**. {}{}\n", offset + i + 1, item.title(), duration)
        })
        .collect()
}

fn queue_summary(queue_info: &QueueInfo) -> String {
    let mut info = format!("**Total:** {} canciones en cola", queue_info.total_items);
    if queue_info.total_duration > Duration::ZERO {
        info.push_str(&format!(
            " • **Duración:** {}",
            format_duration(queue_info.total_duration)
        ));
    }
    info
}

fn page_footer(page: &QueuePage) -> String {
    if page.total_pages > 1 {
        format!(
            "Página {} de {} • Guild Player",
            page.current_page, page.total_pages
        )
    } else {
        STANDARD_FOOTER.to_string()
    }
}

fn duration_label(duration: Option<Duration>) -> String {
    duration
        .map(format_duration)
        .unwrap_or_else(|| "🔴 En vivo".to_string())
}

/// Formatea una duración como `m:ss` o `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
