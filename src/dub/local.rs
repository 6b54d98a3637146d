//! Synthesis through a local TTS worker.
//!
//! The worker is started once as `<cmd> --serve`, loads its model, then
//! answers one JSON request per stdin line:
//!
//! ```text
//! {"text":"Bonjour","language":"French","output":"/tmp/.../clip-0.wav","ref_audio":null,"ref_text":null}
//! ```
//!
//! with one stdout line, `{"ok":true}` or `{"ok":false,"error":"..."}`.
//! Requests go through the single worker one at a time. The worker is
//! stopped by [`Synthesizer::release`], killed if it stops answering, and
//! killed when dropped.

use super::{wav, SynthesizedAudio, Synthesizer, VoiceReference};
use crate::config::Config;
use crate::error::{CapabilityError, CapabilityResult};
use crate::languages::{is_synthesis_language, language_name};
use crate::storage::is_non_empty_file;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct WorkerRequest<'a> {
    text: &'a str,
    language: &'a str,
    output: &'a Path,
    ref_audio: Option<&'a Path>,
    ref_text: Option<&'a str>,
}

#[derive(Deserialize)]
struct WorkerReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// A running TTS process with its model loaded.
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    /// Clips are written here and removed once read.
    scratch: TempDir,
}

impl Worker {
    fn spawn(command: &Path) -> CapabilityResult<Self> {
        let mut child = Command::new(command)
            .arg("--serve")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CapabilityError::Unavailable(format!(
                    "failed to execute {}: {}",
                    command.display(),
                    e
                ))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(CapabilityError::Unavailable(
                "TTS worker pipes are not available".to_string(),
            ));
        };
        let scratch = tempfile::tempdir()
            .map_err(|e| CapabilityError::Unavailable(format!("temp directory: {}", e)))?;

        info!("Started TTS worker {} (pid {:?})", command.display(), child.id());
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            scratch,
        })
    }

    /// Send one request and wait for its reply line.
    async fn send(&mut self, request: &WorkerRequest<'_>) -> CapabilityResult<WorkerReply> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| CapabilityError::Unsupported(format!("TTS request: {}", e)))?;
        line.push('\n');

        let io_error = |e: std::io::Error| CapabilityError::Unavailable(format!("TTS worker: {}", e));
        self.stdin.write_all(line.as_bytes()).await.map_err(io_error)?;
        self.stdin.flush().await.map_err(io_error)?;

        let reply = self
            .stdout
            .next_line()
            .await
            .map_err(io_error)?
            .ok_or_else(|| CapabilityError::Unavailable("TTS worker exited".to_string()))?;
        serde_json::from_str(reply.trim()).map_err(|e| {
            CapabilityError::InvalidResponse(format!("TTS worker reply '{}': {}", reply.trim(), e))
        })
    }

    /// Close stdin and give the worker a moment to exit before killing it.
    async fn shutdown(self) {
        let Worker {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("TTS worker exited with {}", status),
            _ => Self::kill_child(&mut child).await,
        }
    }

    async fn kill(mut self) {
        Self::kill_child(&mut self.child).await;
    }

    async fn kill_child(child: &mut Child) {
        if let Err(e) = child.kill().await {
            warn!("Failed to stop TTS worker: {}", e);
        }
    }
}

pub struct LocalSpeech {
    command: PathBuf,
    timeout: Duration,
    worker: Mutex<Option<Worker>>,
    requests: AtomicU64,
}

impl LocalSpeech {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(300),
            worker: Mutex::new(None),
            requests: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.tts_command).with_timeout(Duration::from_secs(config.tts_timeout_secs))
    }

    /// Longest wait for one reply, including the model load on first use.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Synthesizer for LocalSpeech {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice_ref: Option<&VoiceReference>,
    ) -> CapabilityResult<SynthesizedAudio> {
        if !is_synthesis_language(language) {
            return Err(CapabilityError::Unsupported(format!(
                "no voice for language '{}'",
                language
            )));
        }
        if let Some(voice) = voice_ref {
            if !is_non_empty_file(&voice.audio) {
                return Err(CapabilityError::VoiceRefInvalid(format!(
                    "{} is missing or empty",
                    voice.audio.display()
                )));
            }
        }

        let mut slot = self.worker.lock().await;
        let mut worker = match slot.take() {
            Some(worker) => worker,
            None => Worker::spawn(&self.command)?,
        };

        let output = worker.scratch.path().join(format!(
            "clip-{}.wav",
            self.requests.fetch_add(1, Ordering::Relaxed)
        ));
        let request = WorkerRequest {
            text,
            language: language_name(language),
            output: &output,
            ref_audio: voice_ref.map(|v| v.audio.as_path()),
            ref_text: voice_ref.map(|v| v.text.as_str()),
        };

        let reply = match tokio::time::timeout(self.timeout, worker.send(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                worker.kill().await;
                return Err(e);
            }
            Err(_) => {
                worker.kill().await;
                return Err(CapabilityError::Timeout(format!(
                    "no reply from TTS worker within {}s",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let result = if reply.ok {
            wav::read(&output)
                .map_err(|e| CapabilityError::InvalidResponse(format!("TTS output: {}", e)))
        } else {
            Err(CapabilityError::Unavailable(format!(
                "TTS worker: {}",
                reply.error.as_deref().unwrap_or("unknown error")
            )))
        };
        if output.exists() {
            if let Err(e) = std::fs::remove_file(&output) {
                debug!("Could not remove {}: {}", output.display(), e);
            }
        }
        *slot = Some(worker);

        let audio = result?;
        debug!(
            "Synthesized {:.2}s at {} Hz",
            audio.duration().as_secs_f64(),
            audio.sample_rate
        );
        Ok(audio)
    }

    fn name(&self) -> &'static str {
        "local-speech"
    }

    fn supports_voice_cloning(&self) -> bool {
        true
    }

    async fn release(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_language() {
        let speech = LocalSpeech::new("dubsub-tts");
        let result = speech.synthesize("مرحبا", "ar", None).await;
        assert!(matches!(result, Err(CapabilityError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_missing_reference_audio() {
        let speech = LocalSpeech::new("dubsub-tts");
        let voice = VoiceReference {
            audio: "/nonexistent/ref.wav".into(),
            text: "bonjour".into(),
        };
        let result = speech.synthesize("Bonjour", "fr", Some(&voice)).await;
        assert!(matches!(result, Err(CapabilityError::VoiceRefInvalid(_))));
    }

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        let speech = LocalSpeech::new("/nonexistent/dubsub-tts");
        let result = speech.synthesize("Bonjour", "fr", None).await;
        assert!(matches!(result, Err(CapabilityError::Unavailable(_))));
    }

    #[cfg(unix)]
    mod worker_tests {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-tts");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Copies a fixture clip to each requested output.
        fn fake_worker(dir: &Path) -> PathBuf {
            wav::write(&dir.join("fixture.wav"), &vec![0.5; 2400], 24_000).unwrap();
            let d = dir.display();
            script(
                dir,
                &format!(
                    r#"echo "$1" >> '{d}/spawns'
while IFS= read -r line; do
  out=$(printf '%s\n' "$line" | sed -n 's/.*"output":"\([^"]*\)".*/\1/p')
  cp '{d}/fixture.wav' "$out"
  echo '{{"ok":true}}'
done"#
                ),
            )
        }

        fn spawns(dir: &Path) -> Vec<String> {
            std::fs::read_to_string(dir.join("spawns"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        #[tokio::test]
        async fn test_worker_started_once_per_stage() {
            let dir = TempDir::new().unwrap();
            let speech = LocalSpeech::new(fake_worker(dir.path())).with_timeout(Duration::from_secs(10));

            let first = speech.synthesize("Bonjour", "fr", None).await.unwrap();
            let second = speech.synthesize("Merci", "fr", None).await.unwrap();
            assert_eq!(first.samples.len(), 2400);
            assert_eq!(second.sample_rate, 24_000);
            assert_eq!(spawns(dir.path()), vec!["--serve"]);

            speech.release().await;
            speech.synthesize("Encore", "fr", None).await.unwrap();
            assert_eq!(spawns(dir.path()).len(), 2);
            speech.release().await;
        }

        #[tokio::test]
        async fn test_error_reply_keeps_worker() {
            let dir = TempDir::new().unwrap();
            let d = dir.path().display();
            let command = script(
                dir.path(),
                &format!(
                    r#"echo "$1" >> '{d}/spawns'
while IFS= read -r line; do
  echo '{{"ok":false,"error":"voice not found"}}'
done"#
                ),
            );
            let speech = LocalSpeech::new(command).with_timeout(Duration::from_secs(10));

            for _ in 0..2 {
                match speech.synthesize("Bonjour", "fr", None).await {
                    Err(CapabilityError::Unavailable(detail)) => {
                        assert!(detail.contains("voice not found"))
                    }
                    other => panic!("unexpected result: {other:?}"),
                }
            }
            assert_eq!(spawns(dir.path()).len(), 1);
            speech.release().await;
        }

        #[tokio::test]
        async fn test_worker_ignoring_stdin_is_killed() {
            let dir = TempDir::new().unwrap();
            let d = dir.path().display();
            let command = script(dir.path(), &format!("echo $$ > '{d}/pid'\nexec sleep 30"));
            let speech = LocalSpeech::new(command).with_timeout(Duration::from_millis(300));

            let result = speech.synthesize("Bonjour", "fr", None).await;
            assert!(matches!(result, Err(CapabilityError::Timeout(_))));

            let pid = std::fs::read_to_string(dir.path().join("pid")).unwrap();
            #[cfg(target_os = "linux")]
            assert!(!Path::new(&format!("/proc/{}", pid.trim())).exists());
            #[cfg(not(target_os = "linux"))]
            let _ = pid;
        }

        #[tokio::test]
        async fn test_exited_worker_is_unavailable() {
            let dir = TempDir::new().unwrap();
            let speech = LocalSpeech::new(script(dir.path(), "exit 3"))
                .with_timeout(Duration::from_secs(10));
            let result = speech.synthesize("Bonjour", "fr", None).await;
            assert!(matches!(result, Err(CapabilityError::Unavailable(_))));
        }
    }
}
