//! Real-time streaming engine for a single track.
//!
//! An [`AudioStream`] owns the `extractor | transcoder` subprocess pair for one
//! track and pumps its PCM output into the voice session: read 20ms, scale by
//! the guild volume, encode, wait for the next tick, send. Every wait point
//! observes the stream's cancellation token, so [`AudioStream::stop`] tears
//! the whole thing down within a bounded time.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serenity::model::id::GuildId;
use tokio::{
    io::{AsyncRead, AsyncReadExt, BufReader},
    process::ChildStdout,
    sync::watch,
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        encoder::FrameEncoder,
        pcm::{pcm_to_samples, scale_pcm, FRAME_BYTES, FRAME_DURATION, SAMPLES_PER_FRAME},
        pipeline::{log_stderr, MediaTools, SpawnedTool},
        track::Track,
    },
    error::{PlaybackError, VoiceError},
    voice::{wait_until_ready, VoiceConnection, VolumeHandle},
};

/// Buffer de lectura sobre la salida del transcodificador
const READ_BUFFER_SIZE: usize = 64 * 1024;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Límites de tiempo del streaming
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub ready_timeout: Duration,
    pub send_timeout: Duration,
    pub pause_poll: Duration,
    pub stop_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_millis(100),
            pause_poll: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Resultado final de un stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// El transcodificador llegó a EOF
    Finished,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Starting,
    Streaming,
    Paused,
    Ended(StreamOutcome),
}

impl StreamState {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended(_))
    }
}

/// Mantiene el indicador de habla activo mientras vive
struct SpeakingGuard {
    session: Arc<dyn VoiceConnection>,
    guild_id: GuildId,
}

impl SpeakingGuard {
    fn engage(session: Arc<dyn VoiceConnection>, guild_id: GuildId) -> Self {
        if let Err(e) = session.set_speaking(true) {
            warn!("⚠️ No se pudo activar speaking en guild {}: {}", guild_id, e);
        }
        Self { session, guild_id }
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        if let Err(e) = self.session.set_speaking(false) {
            warn!("⚠️ No se pudo desactivar speaking en guild {}: {}", self.guild_id, e);
        }
    }
}

/// Stream de audio de un track hacia la sesión de voz de una guild
pub struct AudioStream {
    id: u64,
    guild_id: GuildId,
    track: Track,
    session: Arc<dyn VoiceConnection>,
    volume: VolumeHandle,
    tools: Arc<MediaTools>,
    encoder: Mutex<Option<Box<dyn FrameEncoder>>>,
    settings: StreamSettings,
    cancel: CancellationToken,
    paused: AtomicBool,
    started: AtomicBool,
    crash: Mutex<Option<String>>,
    frames_sent: AtomicU64,
    state: watch::Sender<StreamState>,
}

impl AudioStream {
    pub fn new(
        guild_id: GuildId,
        track: Track,
        session: Arc<dyn VoiceConnection>,
        volume: VolumeHandle,
        tools: Arc<MediaTools>,
        encoder: Box<dyn FrameEncoder>,
        settings: StreamSettings,
    ) -> Self {
        let (state, _) = watch::channel(StreamState::Starting);
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            guild_id,
            track,
            session,
            volume,
            tools,
            encoder: Mutex::new(Some(encoder)),
            settings,
            cancel: CancellationToken::new(),
            paused: AtomicBool::new(false),
            started: AtomicBool::new(false),
            crash: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            state,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Lanza los subprocesos y la tarea de streaming
    ///
    /// Cancelar `parent` cancela este stream. Si las herramientas no están en
    /// el host devuelve `ToolMissing` sin lanzar nada.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), PlaybackError> {
        if let Err(e) = self.launch(parent) {
            self.publish(StreamState::Ended(StreamOutcome::Failed(e.to_string())));
            return Err(e);
        }
        Ok(())
    }

    fn launch(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), PlaybackError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(std::io::Error::other("el stream ya fue iniciado").into());
        }

        self.tools.verify()?;
        let encoder = self
            .encoder
            .lock()
            .take()
            .ok_or_else(|| PlaybackError::FrameEncode("encoder no disponible".to_string()))?;

        let pipeline = self.tools.spawn(self.track.url())?;
        info!("🎵 Iniciando stream de '{}' en guild {}", self.track.title(), self.guild_id);

        let link = {
            let parent = parent.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let monitors = [pipeline.extractor, pipeline.transcoder]
            .into_iter()
            .map(|mut tool| {
                if let Some(stderr) = tool.take_stderr() {
                    tokio::spawn(log_stderr(tool.name.clone(), stderr));
                }
                tokio::spawn(self.clone().monitor(tool))
            })
            .collect::<Vec<_>>();

        let streamer = {
            let stream = self.clone();
            tokio::spawn(async move { stream.stream_frames(pipeline.output, encoder).await })
        };

        tokio::spawn(self.clone().supervise(streamer, monitors, link));
        Ok(())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        debug!("⏸️ Stream {} en pausa", self.id);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        debug!("▶️ Stream {} reanudado", self.id);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// El siguiente frame ya sale con el nuevo volumen
    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    /// Espera el estado terminal del stream
    pub async fn wait(&self) -> StreamOutcome {
        let mut rx = self.state.subscribe();
        let outcome = match rx.wait_for(StreamState::is_ended).await {
            Ok(state) => match &*state {
                StreamState::Ended(outcome) => outcome.clone(),
                _ => StreamOutcome::Cancelled,
            },
            Err(_) => StreamOutcome::Cancelled,
        };
        outcome
    }

    /// Cancela el stream y espera (acotado) a que termine
    ///
    /// Devuelve `false` si no terminó dentro de `stop_timeout`.
    pub async fn stop(&self) -> bool {
        self.cancel.cancel();

        if !self.started.load(Ordering::SeqCst) {
            self.publish(StreamState::Ended(StreamOutcome::Cancelled));
            return true;
        }

        let mut rx = self.state.subscribe();
        let finished = timeout(self.settings.stop_timeout, rx.wait_for(StreamState::is_ended))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        if !finished {
            warn!(
                "⚠️ {}: stream {} de guild {} posiblemente abandonado",
                PlaybackError::StopTimeout(self.settings.stop_timeout),
                self.id,
                self.guild_id
            );
        }
        finished
    }

    fn publish(&self, next: StreamState) {
        self.state.send_if_modified(|state| {
            if state.is_ended() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Vigila un subproceso; al cancelar lo mata y lo recoge
    async fn monitor(self: Arc<Self>, mut tool: SpawnedTool) {
        tokio::select! {
            biased;
            status = tool.child.wait() => match status {
                Ok(status) if status.success() => {
                    debug!("✅ {} terminó correctamente (stream {})", tool.name, self.id);
                }
                Ok(status) => {
                    if !self.cancel.is_cancelled() {
                        let crash = PlaybackError::SubprocessCrash {
                            process: tool.name.clone(),
                            status: status.to_string(),
                        };
                        error!("💥 {} en stream {}", crash, self.id);
                        *self.crash.lock() = Some(crash.to_string());
                        self.cancel.cancel();
                    }
                }
                Err(e) => warn!("⚠️ No se pudo esperar a {}: {}", tool.name, e),
            },
            _ = self.cancel.cancelled() => {
                if let Err(e) = tool.child.start_kill() {
                    debug!("{} ya había terminado: {}", tool.name, e);
                }
                let _ = tool.child.wait().await;
                debug!("🔪 {} terminado (stream {})", tool.name, self.id);
            }
        }
    }

    async fn supervise(
        self: Arc<Self>,
        streamer: JoinHandle<StreamOutcome>,
        monitors: Vec<JoinHandle<()>>,
        link: JoinHandle<()>,
    ) {
        let mut outcome = streamer
            .await
            .unwrap_or_else(|e| StreamOutcome::Failed(format!("tarea de streaming abortada: {}", e)));

        let mut monitors = Box::pin(futures::future::join_all(monitors));
        // Tras EOF los subprocesos salen solos; se les da margen para reportar su código
        let reaped = outcome == StreamOutcome::Finished
            && timeout(self.settings.stop_timeout, &mut monitors).await.is_ok();
        self.cancel.cancel();
        if !reaped {
            monitors.await;
        }
        link.abort();

        if let Some(reason) = self.crash.lock().take() {
            outcome = StreamOutcome::Failed(reason);
        }

        match &outcome {
            StreamOutcome::Finished => info!(
                "🏁 Stream de '{}' terminado en guild {} ({} frames)",
                self.track.title(),
                self.guild_id,
                self.frames_sent()
            ),
            StreamOutcome::Cancelled => info!("⏹️ Stream {} cancelado en guild {}", self.id, self.guild_id),
            StreamOutcome::Failed(reason) => {
                error!("❌ Stream {} falló en guild {}: {}", self.id, self.guild_id, reason)
            }
        }
        self.publish(StreamState::Ended(outcome));
    }

    async fn stream_frames(
        &self,
        output: ChildStdout,
        mut encoder: Box<dyn FrameEncoder>,
    ) -> StreamOutcome {
        let ready = tokio::select! {
            ready = wait_until_ready(self.session.as_ref(), self.settings.ready_timeout) => ready,
            _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
        };
        if !ready {
            return StreamOutcome::Failed(PlaybackError::SessionTimeout(self.settings.ready_timeout).to_string());
        }
        let Some(sender) = self.session.sender() else {
            return StreamOutcome::Failed(PlaybackError::NotConnected.to_string());
        };

        let _speaking = SpeakingGuard::engage(self.session.clone(), self.guild_id);
        self.publish(StreamState::Streaming);

        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, output);
        let mut buffer = vec![0u8; FRAME_BYTES];
        let mut ticker = interval(FRAME_DURATION);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut dropped = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return StreamOutcome::Cancelled;
            }

            if self.is_paused() {
                self.publish(StreamState::Paused);
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.pause_poll) => continue,
                    _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                }
            }
            self.publish(StreamState::Streaming);

            let filled = tokio::select! {
                read = read_frame(&mut reader, &mut buffer) => match read {
                    Ok(n) => n,
                    Err(e) => return StreamOutcome::Failed(PlaybackError::Io(e).to_string()),
                },
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
            };
            if filled == 0 {
                return StreamOutcome::Finished;
            }
            let last = filled < FRAME_BYTES;
            if last {
                debug!("Último frame incompleto ({} bytes), rellenando con silencio", filled);
                buffer[filled..].fill(0);
            }

            scale_pcm(&mut buffer, self.volume.get());
            let samples = pcm_to_samples(&buffer, SAMPLES_PER_FRAME);

            match encoder.encode(&samples) {
                Ok(packet) => {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                    }

                    let sent = tokio::select! {
                        sent = timeout(self.settings.send_timeout, sender.send_async(packet)) => sent,
                        _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                    };
                    match sent {
                        Ok(Ok(())) => {
                            self.frames_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(_)) => return StreamOutcome::Failed(VoiceError::SendClosed.to_string()),
                        Err(_) => {
                            dropped += 1;
                            if dropped % 50 == 1 {
                                warn!(
                                    "⚠️ {} (stream {}, {} frames descartados)",
                                    PlaybackError::FrameSendTimeout(self.settings.send_timeout),
                                    self.id,
                                    dropped
                                );
                            }
                        }
                    }
                }
                Err(e) => warn!("⚠️ Frame descartado en stream {}: {}", self.id, e),
            }

            if last {
                return StreamOutcome::Finished;
            }
        }
    }
}

/// Llena `buffer` hasta el final o hasta EOF; devuelve los bytes leídos
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        cat_tools, constant_frames, crashing_tools, decode_frame, endless_tools, eventually,
        live_processes_matching, numbered_frames, pcm_fixture, FakeConnection, PassthroughEncoder,
        StallingEncoder,
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};
    use std::time::Instant;

    fn settings() -> StreamSettings {
        StreamSettings {
            ready_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_millis(100),
            pause_poll: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(2),
        }
    }

    fn ready_session() -> Arc<FakeConnection> {
        Arc::new(FakeConnection::new(ChannelId::new(10), true, None))
    }

    fn stream_for(
        url: &str,
        session: Arc<FakeConnection>,
        tools: MediaTools,
        volume: f32,
        settings: StreamSettings,
    ) -> Arc<AudioStream> {
        Arc::new(AudioStream::new(
            GuildId::new(1),
            Track::new("fixture", url, UserId::new(7)),
            session,
            VolumeHandle::new(volume),
            Arc::new(tools),
            Box::new(PassthroughEncoder),
            settings,
        ))
    }

    #[tokio::test]
    async fn streams_fixture_to_completion() {
        let fixture = pcm_fixture(&constant_frames(1000, 5));
        let session = ready_session();
        let stream = stream_for(
            fixture.path().to_str().unwrap(),
            session.clone(),
            cat_tools(),
            1.0,
            settings(),
        );

        stream.start(&CancellationToken::new()).unwrap();
        assert_eq!(stream.wait().await, StreamOutcome::Finished);

        let frames = session.take_frames();
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|f| f.len() == FRAME_BYTES));
        assert!(frames.iter().all(|f| decode_frame(f).iter().all(|s| *s == 1000)));
        assert_eq!(session.speaking_history(), vec![true, false]);
        assert_eq!(stream.state(), StreamState::Ended(StreamOutcome::Finished));
    }

    #[tokio::test]
    async fn frames_are_paced_at_twenty_milliseconds() {
        let fixture = pcm_fixture(&numbered_frames(25));
        let session = ready_session();
        let stream = stream_for(fixture.path().to_str().unwrap(), session.clone(), cat_tools(), 1.0, settings());

        let started = Instant::now();
        stream.start(&CancellationToken::new()).unwrap();
        assert_eq!(stream.wait().await, StreamOutcome::Finished);
        let elapsed = started.elapsed();

        // El primer tick es inmediato: 24 intervalos de 20ms como mínimo
        assert!(elapsed >= Duration::from_millis(480), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
        let order: Vec<i16> = session.take_frames().iter().map(|f| decode_frame(f)[0]).collect();
        assert_eq!(order, (1..=25).collect::<Vec<i16>>());
    }

    #[tokio::test]
    async fn truncated_tail_is_zero_padded() {
        let mut samples = constant_frames(300, 1);
        samples.extend(std::iter::repeat(300).take(100));
        let fixture = pcm_fixture(&samples);
        let session = ready_session();
        let stream = stream_for(fixture.path().to_str().unwrap(), session.clone(), cat_tools(), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        assert_eq!(stream.wait().await, StreamOutcome::Finished);

        let frames = session.take_frames();
        assert_eq!(frames.len(), 2);
        let tail = decode_frame(&frames[1]);
        assert_eq!(tail.len(), SAMPLES_PER_FRAME);
        assert!(tail[..100].iter().all(|s| *s == 300));
        assert!(tail[100..].iter().all(|s| *s == 0));
    }

    #[tokio::test]
    async fn volume_change_applies_to_following_frames() {
        let fixture = pcm_fixture(&constant_frames(1000, 40));
        let session = ready_session();
        let stream = stream_for(fixture.path().to_str().unwrap(), session.clone(), cat_tools(), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        assert!(eventually(Duration::from_secs(2), || session.frame_count() >= 2).await);
        stream.set_volume(0.25);
        assert_eq!(stream.wait().await, StreamOutcome::Finished);

        let frames = session.take_frames();
        assert_eq!(frames.len(), 40);
        assert_eq!(decode_frame(&frames[0])[0], 1000);
        assert_eq!(decode_frame(&frames[39])[0], 250);
    }

    #[tokio::test]
    async fn pause_and_resume_keep_every_frame_in_order() {
        let fixture = pcm_fixture(&numbered_frames(20));
        let session = ready_session();
        let stream = stream_for(fixture.path().to_str().unwrap(), session.clone(), cat_tools(), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        assert!(eventually(Duration::from_secs(2), || session.frame_count() >= 3).await);

        stream.pause();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(stream.state(), StreamState::Paused);
        let during_pause = session.frame_count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.frame_count(), during_pause);

        stream.resume();
        assert_eq!(stream.wait().await, StreamOutcome::Finished);

        let order: Vec<i16> = session.take_frames().iter().map(|f| decode_frame(f)[0]).collect();
        assert_eq!(order, (1..=20).collect::<Vec<i16>>());
    }

    #[tokio::test]
    async fn stop_while_paused_cancels_promptly() {
        let fixture = pcm_fixture(&constant_frames(10, 2));
        let path = fixture.path().to_str().unwrap().to_string();
        let session = ready_session();
        let stream = stream_for(&path, session.clone(), endless_tools(), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        assert!(eventually(Duration::from_secs(2), || session.frame_count() >= 1).await);
        stream.pause();
        assert!(eventually(Duration::from_secs(1), || stream.state() == StreamState::Paused).await);

        let started = Instant::now();
        assert!(stream.stop().await);
        assert!(started.elapsed() < Duration::from_millis(500), "{:?}", started.elapsed());
        assert_eq!(stream.state(), StreamState::Ended(StreamOutcome::Cancelled));
        assert!(eventually(Duration::from_secs(1), || live_processes_matching(&path) == 0).await);
    }

    #[tokio::test]
    async fn subprocess_crash_fails_the_stream() {
        let session = ready_session();
        let stream = stream_for("ignored", session.clone(), crashing_tools(FRAME_BYTES), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        match stream.wait().await {
            StreamOutcome::Failed(reason) => assert!(reason.contains("el subproceso sh"), "{}", reason),
            other => panic!("esperaba Failed, obtuve {:?}", other),
        }
        assert_eq!(session.speaking_history().last(), Some(&false));
    }

    #[tokio::test]
    async fn stop_kills_subprocesses_within_bound() {
        let fixture = pcm_fixture(&constant_frames(10, 2));
        let path = fixture.path().to_str().unwrap().to_string();
        let session = ready_session();
        let stream = stream_for(&path, session.clone(), endless_tools(), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        assert!(eventually(Duration::from_secs(2), || session.frame_count() >= 2).await);
        assert!(live_processes_matching(&path) >= 1);

        let started = Instant::now();
        assert!(stream.stop().await);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stream.state(), StreamState::Ended(StreamOutcome::Cancelled));
        assert!(eventually(Duration::from_secs(1), || live_processes_matching(&path) == 0).await);
        assert_eq!(session.speaking_history(), vec![true, false]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_reports_abandoned_stream_after_timeout() {
        let fixture = pcm_fixture(&constant_frames(10, 50));
        let session = ready_session();
        let stream = Arc::new(AudioStream::new(
            GuildId::new(1),
            Track::new("lento", fixture.path().to_str().unwrap(), UserId::new(7)),
            session.clone(),
            VolumeHandle::new(1.0),
            Arc::new(cat_tools()),
            Box::new(StallingEncoder(Duration::from_millis(1500))),
            StreamSettings {
                stop_timeout: Duration::from_millis(200),
                ..settings()
            },
        ));

        stream.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        assert!(!stream.stop().await);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn session_never_ready_fails_with_timeout() {
        let fixture = pcm_fixture(&constant_frames(10, 2));
        let session = Arc::new(FakeConnection::new(ChannelId::new(10), false, None));
        let stream = stream_for(
            fixture.path().to_str().unwrap(),
            session.clone(),
            cat_tools(),
            1.0,
            StreamSettings {
                ready_timeout: Duration::from_millis(200),
                ..settings()
            },
        );

        stream.start(&CancellationToken::new()).unwrap();
        match stream.wait().await {
            StreamOutcome::Failed(reason) => assert!(reason.contains("lista"), "{}", reason),
            other => panic!("esperaba Failed, obtuve {:?}", other),
        }
        assert!(session.speaking_history().is_empty());
    }

    #[tokio::test]
    async fn stop_during_readiness_wait_cancels_before_timeout() {
        let fixture = pcm_fixture(&constant_frames(10, 2));
        let session = Arc::new(FakeConnection::new(ChannelId::new(10), false, None));
        let stream = stream_for(
            fixture.path().to_str().unwrap(),
            session.clone(),
            cat_tools(),
            1.0,
            StreamSettings {
                ready_timeout: Duration::from_secs(5),
                ..settings()
            },
        );

        stream.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        assert!(stream.stop().await);
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert_eq!(stream.wait().await, StreamOutcome::Cancelled);
        assert!(session.speaking_history().is_empty());
        assert_eq!(session.frame_count(), 0);
    }

    #[tokio::test]
    async fn session_that_becomes_ready_late_still_streams() {
        let fixture = pcm_fixture(&constant_frames(10, 3));
        let session = Arc::new(FakeConnection::new(ChannelId::new(10), false, None));
        let stream = stream_for(fixture.path().to_str().unwrap(), session.clone(), cat_tools(), 1.0, settings());

        stream.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(stream.state(), StreamState::Starting);
        session.set_ready(true);

        assert_eq!(stream.wait().await, StreamOutcome::Finished);
        assert_eq!(session.frame_count(), 3);
    }

    #[tokio::test]
    async fn frames_not_accepted_in_time_are_dropped() {
        let fixture = pcm_fixture(&constant_frames(10, 8));
        let session = Arc::new(FakeConnection::new(ChannelId::new(10), true, Some(1)));
        let stream = stream_for(
            fixture.path().to_str().unwrap(),
            session.clone(),
            cat_tools(),
            1.0,
            StreamSettings {
                send_timeout: Duration::from_millis(10),
                ..settings()
            },
        );

        stream.start(&CancellationToken::new()).unwrap();
        assert_eq!(stream.wait().await, StreamOutcome::Finished);
        assert_eq!(stream.frames_sent(), 1);
        assert_eq!(session.frame_count(), 1);
    }

    #[tokio::test]
    async fn missing_tool_fails_start_without_spawning() {
        let session = ready_session();
        let tools = MediaTools::with_binaries("missing-extractor-5521", "cat");
        let stream = stream_for("whatever", session.clone(), tools, 1.0, settings());

        let result = stream.start(&CancellationToken::new());
        assert!(matches!(result, Err(PlaybackError::ToolMissing(ref name)) if name == "missing-extractor-5521"));
        assert!(matches!(stream.state(), StreamState::Ended(StreamOutcome::Failed(_))));
        assert!(session.speaking_history().is_empty());
    }

    #[tokio::test]
    async fn cancelling_parent_token_cancels_stream() {
        let fixture = pcm_fixture(&constant_frames(10, 2));
        let session = ready_session();
        let stream = stream_for(fixture.path().to_str().unwrap(), session.clone(), endless_tools(), 1.0, settings());
        let parent = CancellationToken::new();

        stream.start(&parent).unwrap();
        assert!(eventually(Duration::from_secs(2), || session.frame_count() >= 1).await);
        parent.cancel();

        assert_eq!(
            timeout(Duration::from_secs(2), stream.wait()).await.unwrap(),
            StreamOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn stop_before_start_is_immediate() {
        let session = ready_session();
        let stream = stream_for("x", session, cat_tools(), 1.0, settings());
        assert!(stream.stop().await);
        assert_eq!(stream.wait().await, StreamOutcome::Cancelled);
    }
}
