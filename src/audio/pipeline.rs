use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
};
use tracing::{debug, info};

use crate::error::PlaybackError;

/// Marcador que se reemplaza por la URI del track en los argumentos
pub const URL_PLACEHOLDER: &str = "{url}";

/// Programa externo más sus argumentos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn args_for(&self, url: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, url))
            .collect()
    }

    /// Busca el binario igual que haría el shell (ruta explícita o PATH)
    pub fn resolve(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return is_executable(program).then(|| program.to_path_buf());
        }

        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }
}

/// Archivo regular con algún bit de ejecución
fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Herramientas de extracción (yt-dlp) y transcodificación (ffmpeg)
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub extractor: ToolCommand,
    pub transcoder: ToolCommand,
}

impl MediaTools {
    pub fn new(extractor: ToolCommand, transcoder: ToolCommand) -> Self {
        Self {
            extractor,
            transcoder,
        }
    }

    /// yt-dlp -> ffmpeg produciendo PCM s16le 48kHz estéreo
    pub fn with_binaries(ytdlp: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        let extractor = ToolCommand::new(
            ytdlp,
            ["-f", "bestaudio", "--no-playlist", "--quiet", "-o", "-", URL_PLACEHOLDER],
        );
        let transcoder = ToolCommand::new(
            ffmpeg,
            [
                "-nostdin",
                "-hide_banner",
                "-loglevel",
                "warning",
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
                "-i",
                "pipe:0",
                "-vn",
                "-ac",
                "2",
                "-ar",
                "48000",
                "-af",
                "aresample=async=1:min_hard_comp=0.100:first_pts=0",
                "-f",
                "s16le",
                "pipe:1",
            ],
        );
        Self::new(extractor, transcoder)
    }

    /// Verifica que ambas herramientas estén disponibles
    pub fn verify(&self) -> Result<(), PlaybackError> {
        for tool in [&self.extractor, &self.transcoder] {
            match tool.resolve() {
                Some(path) => debug!("✅ {} disponible en {}", tool.program, path.display()),
                None => return Err(PlaybackError::ToolMissing(tool.program.clone())),
            }
        }
        Ok(())
    }

    /// Lanza extractor | transcodificador y devuelve la salida PCM
    pub fn spawn(&self, url: &str) -> Result<MediaPipeline, PlaybackError> {
        let mut extractor = Command::new(&self.extractor.program)
            .args(self.extractor.args_for(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let extractor_out = extractor
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("extractor sin stdout"))?;
        let transcoder_in: Stdio = match extractor_out.try_into() {
            Ok(stdio) => stdio,
            Err(e) => {
                let _ = extractor.start_kill();
                return Err(e.into());
            }
        };

        let mut transcoder = match Command::new(&self.transcoder.program)
            .args(self.transcoder.args_for(url))
            .stdin(transcoder_in)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = extractor.start_kill();
                return Err(e.into());
            }
        };

        let output = match transcoder.stdout.take() {
            Some(out) => out,
            None => {
                let _ = extractor.start_kill();
                let _ = transcoder.start_kill();
                return Err(std::io::Error::other("transcodificador sin stdout").into());
            }
        };

        info!(
            "🚀 Pipeline iniciado: {} (pid {:?}) -> {} (pid {:?})",
            self.extractor.program,
            extractor.id(),
            self.transcoder.program,
            transcoder.id()
        );

        Ok(MediaPipeline {
            extractor: SpawnedTool::new(&self.extractor.program, extractor),
            transcoder: SpawnedTool::new(&self.transcoder.program, transcoder),
            output,
        })
    }
}

/// Subproceso lanzado junto con su nombre para logs
pub struct SpawnedTool {
    pub name: String,
    pub child: Child,
}

impl SpawnedTool {
    fn new(name: &str, child: Child) -> Self {
        Self {
            name: name.to_string(),
            child,
        }
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }
}

pub struct MediaPipeline {
    pub extractor: SpawnedTool,
    pub transcoder: SpawnedTool,
    /// PCM crudo del transcodificador
    pub output: ChildStdout,
}

/// Reenvía stderr de una herramienta a los logs hasta EOF
pub async fn log_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(tool = %name, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn placeholder_is_replaced_with_url() {
        let tool = ToolCommand::new("yt-dlp", ["-o", "-", "{url}", "--x={url}"]);
        assert_eq!(
            tool.args_for("https://a.b/c"),
            vec!["-o", "-", "https://a.b/c", "--x=https://a.b/c"]
        );
    }

    #[test]
    fn resolve_finds_programs_on_path_and_rejects_missing() {
        assert!(ToolCommand::new("sh", Vec::<String>::new()).resolve().is_some());
        assert!(ToolCommand::new("definitely-not-a-real-tool-4821", Vec::<String>::new())
            .resolve()
            .is_none());
        assert!(ToolCommand::new("/nonexistent/dir/ffmpeg", Vec::<String>::new())
            .resolve()
            .is_none());
    }

    #[test]
    fn resolve_rejects_files_without_execute_permission() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "#!/bin/sh\nexit 0\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(ToolCommand::new(&path, Vec::<String>::new()).resolve().is_none());
        assert!(matches!(
            MediaTools::with_binaries(&path, "cat").verify(),
            Err(PlaybackError::ToolMissing(_))
        ));

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(
            ToolCommand::new(&path, Vec::<String>::new()).resolve(),
            Some(PathBuf::from(&path))
        );
    }

    #[test]
    fn verify_reports_the_missing_tool() {
        let tools = MediaTools::with_binaries("sh", "missing-transcoder-7731");
        match tools.verify() {
            Err(PlaybackError::ToolMissing(name)) => assert_eq!(name, "missing-transcoder-7731"),
            other => panic!("esperaba ToolMissing, obtuve {:?}", other),
        }
    }

    #[tokio::test]
    async fn extractor_output_flows_through_transcoder() {
        let tools = MediaTools::new(
            ToolCommand::new("sh", ["-c", "printf 'hola-{url}'"]),
            ToolCommand::new("cat", Vec::<String>::new()),
        );
        let mut pipeline = tools.spawn("xyz").unwrap();

        let mut out = String::new();
        pipeline.output.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hola-xyz");

        assert!(pipeline.extractor.child.wait().await.unwrap().success());
        assert!(pipeline.transcoder.child.wait().await.unwrap().success());
    }
}
