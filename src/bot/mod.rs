//! # Bot Module
//!
//! Serenity adapter over [`AudioPlayer`]: slash command registration,
//! interaction dispatch and voice state tracking. All playback semantics live
//! in the player; this layer only maps interactions to calls and results to
//! replies.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::player::AudioPlayer, config::Config};

/// Manejador de eventos de Discord para el reproductor
pub struct GuildPlayerBot {
    config: Arc<Config>,
    pub player: AudioPlayer,
}

impl GuildPlayerBot {
    pub fn new(config: Arc<Config>, player: AudioPlayer) -> Self {
        Self { config, player }
    }

    /// Registra los comandos en la guild de desarrollo o globalmente
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for GuildPlayerBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si el bot sale del canal por fuera de `/stop`, la guild vuelve a inactiva
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let (Some(guild_id), Some(left)) = (new.guild_id, old.and_then(|o| o.channel_id)) else {
            return;
        };

        if self.player.handle_voice_disconnect(guild_id, left).await {
            info!("🔌 Bot desconectado del canal {} en guild {}", left, guild_id);
        }
    }
}
