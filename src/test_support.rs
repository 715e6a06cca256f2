//! Fakes shared by the unit tests: an in-memory voice transport and PCM
//! fixtures played through real `cat`/`sh` subprocesses.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    io::Write,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tempfile::NamedTempFile;

use crate::{
    audio::{
        encoder::FrameEncoder,
        pcm::FRAME_BYTES,
        pipeline::{MediaTools, ToolCommand, URL_PLACEHOLDER},
    },
    error::{PlaybackError, VoiceError},
    voice::{VoiceConnection, VoiceTransport},
};

pub struct FakeConnection {
    channel_id: ChannelId,
    ready: AtomicBool,
    tx: flume::Sender<Bytes>,
    rx: flume::Receiver<Bytes>,
    speaking: Mutex<Vec<bool>>,
    disconnects: AtomicUsize,
}

impl FakeConnection {
    pub fn new(channel_id: ChannelId, ready: bool, capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(cap) => flume::bounded(cap),
            None => flume::unbounded(),
        };
        Self {
            channel_id,
            ready: AtomicBool::new(ready),
            tx,
            rx,
            speaking: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Drena los frames recibidos hasta ahora
    pub fn take_frames(&self) -> Vec<Bytes> {
        self.rx.try_iter().collect()
    }

    pub fn frame_count(&self) -> usize {
        self.rx.len()
    }

    pub fn speaking_history(&self) -> Vec<bool> {
        self.speaking.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn sender(&self) -> Option<flume::Sender<Bytes>> {
        self.is_ready().then(|| self.tx.clone())
    }

    fn set_speaking(&self, speaking: bool) -> Result<(), VoiceError> {
        self.speaking.lock().push(speaking);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    never_ready: bool,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Default::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock()[index].clone()
    }

    pub fn last_connection(&self) -> Arc<FakeConnection> {
        self.connections
            .lock()
            .last()
            .cloned()
            .expect("no connections yet")
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        let connection = Arc::new(FakeConnection::new(channel_id, !self.never_ready, None));
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Archivo temporal con muestras s16le
pub fn pcm_fixture(samples: &[i16]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile");
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    file.write_all(&bytes).expect("write fixture");
    file.flush().expect("flush fixture");
    file
}

/// `frames` frames completos de una muestra constante
pub fn constant_frames(value: i16, frames: usize) -> Vec<i16> {
    vec![value; frames * FRAME_BYTES / 2]
}

/// Extractor `cat <archivo>` y transcodificador `cat`: el PCM del fixture pasa intacto
pub fn cat_tools() -> MediaTools {
    MediaTools::new(
        ToolCommand::new("cat", [URL_PLACEHOLDER]),
        ToolCommand::new("cat", Vec::<String>::new()),
    )
}

/// Herramientas que emiten `bytes` de silencio y luego fallan con código 3
pub fn crashing_tools(bytes: usize) -> MediaTools {
    MediaTools::new(
        ToolCommand::new("sh", ["-c".to_string(), format!("head -c {} /dev/zero; exit 3", bytes)]),
        ToolCommand::new("cat", Vec::<String>::new()),
    )
}

/// Extractor guionado por URL: las que contienen `crash` emiten dos frames y
/// fallan con código 3, el resto se leen como archivo PCM
pub fn scripted_tools() -> MediaTools {
    MediaTools::new(
        ToolCommand::new(
            "sh",
            [
                "-c",
                "case \"$1\" in *crash*) head -c 7680 /dev/zero; exit 3;; *) exec cat \"$1\";; esac",
                "sh",
                URL_PLACEHOLDER,
            ],
        ),
        ToolCommand::new("cat", Vec::<String>::new()),
    )
}

/// Herramientas que emiten el fixture y luego se quedan esperando sin fin;
/// la ruta del fixture aparece en el cmdline para poder rastrear el proceso
pub fn endless_tools() -> MediaTools {
    MediaTools::new(
        ToolCommand::new("tail", ["-c", "+1", "-f", URL_PLACEHOLDER]),
        ToolCommand::new("cat", Vec::<String>::new()),
    )
}

/// Encoder que devuelve el PCM tal cual, para inspeccionar lo enviado
pub struct PassthroughEncoder;

impl FrameEncoder for PassthroughEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PlaybackError> {
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(Bytes::from(bytes))
    }
}

/// Encoder que bloquea el hilo en cada frame
pub struct StallingEncoder(pub Duration);

impl FrameEncoder for StallingEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PlaybackError> {
        std::thread::sleep(self.0);
        PassthroughEncoder.encode(pcm)
    }
}

pub fn decode_frame(frame: &Bytes) -> Vec<i16> {
    frame
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// `frames` frames donde el frame i contiene la muestra `i + 1`
pub fn numbered_frames(frames: usize) -> Vec<i16> {
    (0..frames)
        .flat_map(|i| std::iter::repeat((i + 1) as i16).take(FRAME_BYTES / 2))
        .collect()
}

/// Espera hasta que `check` sea cierto o venza `timeout`
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Cuenta procesos vivos cuyo cmdline contiene `needle` (solo Linux)
pub fn live_processes_matching(needle: &str) -> usize {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()))
        .filter_map(|e| std::fs::read(e.path().join("cmdline")).ok())
        .filter(|cmdline| String::from_utf8_lossy(cmdline).contains(needle))
        .count()
}
