use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::track::Track,
    bot::GuildPlayerBot,
    error::PlaybackError,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &GuildPlayerBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, "❌ Este comando solo funciona dentro de un servidor", true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, guild_id, bot).await?,
        "pause" => {
            let result = bot.player.pause(guild_id).await;
            respond(ctx, &command, &control_reply("⏸️ Pausado", result), false).await?
        }
        "resume" => {
            let result = bot.player.resume(guild_id).await;
            respond(ctx, &command, &control_reply("▶️ Reanudado", result), false).await?
        }
        "skip" => handle_skip(ctx, &command, guild_id, bot).await?,
        "stop" => {
            let stopped = bot.player.stop(guild_id).await;
            respond(ctx, &command, stop_reply(stopped), false).await?
        }
        "queue" => handle_queue(ctx, &command, guild_id, bot).await?,
        "volume" => {
            let level = option_i64(&command, "level");
            let reply = volume_reply(bot, guild_id, level);
            respond(ctx, &command, &reply, false).await?
        }
        _ => respond(ctx, &command, "❌ Comando no reconocido", true).await?,
    }

    Ok(())
}

// Handlers específicos

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &GuildPlayerBot,
) -> Result<()> {
    let Some(query) = option_str(command, "query") else {
        return respond(ctx, command, "❌ Debes indicar una canción o URL", true).await;
    };

    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, "❌ Debes estar en un canal de voz", true).await;
    };

    // La extracción puede tardar varios segundos
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let requester = command
        .member
        .as_ref()
        .map(|member| member.display_name().to_string())
        .unwrap_or_else(|| command.user.name.clone());

    let response = match bot
        .player
        .play_query(guild_id, channel_id, query, command.user.id, &requester)
        .await
    {
        Ok((track, outcome)) => {
            EditInteractionResponse::new().embed(embeds::create_track_added_embed(&track, &outcome))
        }
        Err(e) => {
            warn!("❌ /play falló en guild {}: {}", guild_id, e);
            EditInteractionResponse::new().embed(embeds::create_error_embed(&e.user_message()))
        }
    };

    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &GuildPlayerBot,
) -> Result<()> {
    // Detener el stream puede esperar hasta el timeout de parada
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = control_reply("⏭️ Saltado", bot.player.skip(guild_id).await);
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
        .await?;
    Ok(())
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &GuildPlayerBot,
) -> Result<()> {
    let page = option_i64(command, "page").unwrap_or(1).max(1) as usize;
    let queue_info = bot.player.snapshot(guild_id);
    let embed = embeds::create_queue_embed(&queue_info, page);

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;

    Ok(())
}

// Respuestas

fn control_reply(action: &str, result: Result<Track, PlaybackError>) -> String {
    match result {
        Ok(track) => format!("{}: **{}**", action, track.title()),
        Err(e) => e.user_message(),
    }
}

fn stop_reply(stopped: bool) -> &'static str {
    if stopped {
        "⏹️ Reproducción detenida, cola limpiada y canal abandonado"
    } else {
        "❌ No hay nada que detener"
    }
}

fn volume_reply(bot: &GuildPlayerBot, guild_id: GuildId, level: Option<i64>) -> String {
    match level {
        Some(level) => match bot.player.set_volume_percent(guild_id, level) {
            Ok(()) => format!("🔊 Volumen ajustado a {}%", level),
            Err(e) => e.user_message(),
        },
        None => format!("🔊 Volumen actual: {}%", bot.player.volume_percent(guild_id)),
    }
}

// Funciones auxiliares

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: &str,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
        .filter(|value| !value.trim().is_empty())
}

fn option_i64(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_replies_name_the_track_or_explain_the_error() {
        let track = Track::new("Song", "https://example.com/s", UserId::new(1));
        assert_eq!(control_reply("⏸️ Pausado", Ok(track)), "⏸️ Pausado: **Song**");
        assert_eq!(
            control_reply("⏭️ Saltado", Err(PlaybackError::NothingPlaying)),
            "❌ No hay nada reproduciéndose"
        );
        assert_eq!(
            control_reply("▶️ Reanudado", Err(PlaybackError::NotPaused)),
            "❌ No hay nada en pausa"
        );
    }

    #[test]
    fn stop_reply_distinguishes_idle_guilds() {
        assert!(stop_reply(true).starts_with("⏹️"));
        assert_eq!(stop_reply(false), "❌ No hay nada que detener");
    }
}
