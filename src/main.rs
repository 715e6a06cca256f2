use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use guild_player::{
    audio::{
        player::{opus_encoders, AudioPlayer},
        queue::QueueManager,
    },
    bot::GuildPlayerBot,
    config::Config,
    sources::YtDlpResolver,
    voice::{songbird_transport::SongbirdTransport, VoiceSessionManager},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_player=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Player v{}", env!("CARGO_PKG_VERSION"));

    // El health check no necesita credenciales de Discord
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check();
    }

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let songbird = Songbird::serenity();

    let transport = Arc::new(SongbirdTransport::new(songbird.clone()));
    let voice = VoiceSessionManager::new(transport, config.default_volume, config.voice_ready_timeout());
    let resolver = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone())?);
    let player = AudioPlayer::new(
        QueueManager::new(config.max_queue_size),
        voice,
        resolver,
        config.media_tools(),
        opus_encoders(config.opus_bitrate),
        config.player_settings(),
    );

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = GuildPlayerBot::new(config.clone(), player.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

fn health_check() -> Result<()> {
    Config::load_media_tools().verify()?;
    println!("OK");
    Ok(())
}
