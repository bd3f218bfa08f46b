//! Transcription worker supervisor.
//!
//! Runs exactly one transcription job per supervisor instance: spawns the
//! external engine process, relays progress from its diagnostic stream,
//! enforces a hard wall-clock timeout and supports cancellation with a
//! short grace period before the process is killed.
//!
//! Engine contract: `<engine> -m <model> -f <audio> -l <lang> --output-json
//! --print-progress`, progress reported as `progress: N%` lines on stderr,
//! transcript JSON on stdout on clean exit.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use crate::bus::{AppEvent, EventBus};
use crate::domain::TranscriptionSegment;

/// How long a cooperative shutdown may take before the process is killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

/// Errors that can occur while running a transcription job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("recording id is required")]
    MissingRecordingId,

    #[error("audio file path is required")]
    MissingFilePath,

    #[error("audio file not found: {0}")]
    AudioFileNotFound(PathBuf),

    #[error("speech model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("transcription engine not found: {0}")]
    EngineNotFound(PathBuf),

    #[error("failed to start transcription engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transcription engine exited with code {0}")]
    ExitCode(i32),

    #[error("transcription engine terminated by signal")]
    Signalled,

    #[error("failed to parse engine output: {0}")]
    OutputUnparseable(#[source] serde_json::Error),

    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),

    #[error("transcription cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Precondition errors fail before any resource is allocated.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingRecordingId
                | Self::MissingFilePath
                | Self::AudioFileNotFound(_)
                | Self::ModelNotFound(_)
                | Self::EngineNotFound(_)
        )
    }
}

/// One transcription request.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub recording_id: String,
    pub file_path: PathBuf,
    pub language: Option<String>,
}

/// Engine paths and limits for one job.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub engine_path: PathBuf,
    pub model_path: PathBuf,
    pub timeout: Duration,
}

/// Parsed engine result.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub confidence: f64,
    pub segments: Vec<TranscriptionSegment>,
}

/// Engine JSON output shape.
#[derive(Debug, Deserialize)]
struct EngineOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    segments: Vec<EngineSegment>,
}

#[derive(Debug, Deserialize)]
struct EngineSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Supervisor for a single transcription job.
///
/// The queue manager constructs a fresh supervisor per job; `transcribe`
/// completes exactly once per instance.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    bus: EventBus,
    cancel: CancellationToken,
    progress: Arc<AtomicI64>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            cancel: CancellationToken::new(),
            progress: Arc::new(AtomicI64::new(-1)),
        }
    }

    /// Ask the job to stop.
    ///
    /// The running engine gets a cooperative shutdown (stdin closed) and is
    /// killed after a short grace period. Idempotent, and safe to call on a
    /// supervisor that never started or has already finished.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Last progress percentage reported by the engine, if any.
    pub fn progress(&self) -> Option<u32> {
        let value = self.progress.load(Ordering::SeqCst);
        (value >= 0).then_some(value as u32)
    }

    /// Run the job to completion.
    pub async fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcript, WorkerError> {
        self.validate(request)?;

        if self.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let language = request.language.as_deref().unwrap_or("en");

        let mut child = Command::new(&self.config.engine_path)
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("-f")
            .arg(&request.file_path)
            .arg("-l")
            .arg(language)
            .arg("--output-json")
            .arg("--print-progress")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let mut stdin = child.stdin.take();

        let stderr = child.stderr.take().ok_or_else(|| {
            WorkerError::Io(std::io::Error::other("engine stderr unavailable"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            WorkerError::Io(std::io::Error::other("engine stdout unavailable"))
        })?;

        // Relay changed progress values while the job runs.
        let progress = Arc::clone(&self.progress);
        let bus = self.bus.clone();
        let recording_id = request.recording_id.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = progress_percent(&line) {
                    let last = progress.load(Ordering::SeqCst);
                    if i64::from(percent) > last {
                        progress.store(i64::from(percent), Ordering::SeqCst);
                        bus.emit(AppEvent::TranscriptionProgress {
                            recording_id: recording_id.clone(),
                            percent_complete: percent,
                        });
                    }
                }
            }
        });

        let stdout_task = tokio::spawn(async move {
            let mut reader = stdout;
            let mut output = String::new();
            let _ = reader.read_to_string(&mut output).await;
            output
        });

        let status = tokio::select! {
            status = child.wait() => status?,

            _ = self.cancel.cancelled() => {
                shutdown_child(&mut child, stdin.take()).await;
                stderr_task.abort();
                stdout_task.abort();
                return Err(WorkerError::Cancelled);
            }

            _ = tokio::time::sleep(self.config.timeout) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                stdout_task.abort();
                return Err(WorkerError::Timeout(self.config.timeout));
            }
        };

        drop(stdin);
        let _ = stderr_task.await;
        let output = stdout_task.await.unwrap_or_default();

        if !status.success() {
            return match status.code() {
                Some(code) => Err(WorkerError::ExitCode(code)),
                None => Err(WorkerError::Signalled),
            };
        }

        let mut transcript = parse_transcript(&output)?;
        if transcript.language.is_empty() {
            transcript.language = language.to_string();
        }

        Ok(transcript)
    }

    fn validate(&self, request: &TranscriptionRequest) -> Result<(), WorkerError> {
        if request.recording_id.is_empty() {
            return Err(WorkerError::MissingRecordingId);
        }
        if request.file_path.as_os_str().is_empty() {
            return Err(WorkerError::MissingFilePath);
        }
        if !request.file_path.is_file() {
            return Err(WorkerError::AudioFileNotFound(request.file_path.clone()));
        }
        if !self.config.model_path.is_file() {
            return Err(WorkerError::ModelNotFound(self.config.model_path.clone()));
        }
        // A bare command name resolves via PATH at spawn time.
        if self.config.engine_path.components().count() > 1 && !self.config.engine_path.is_file() {
            return Err(WorkerError::EngineNotFound(self.config.engine_path.clone()));
        }
        Ok(())
    }
}

/// Cooperative shutdown: close stdin, then kill after the grace period.
async fn shutdown_child(child: &mut Child, stdin: Option<ChildStdin>) {
    drop(stdin);

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Extract a percentage from a `progress: N%` diagnostic line.
fn progress_percent(line: &str) -> Option<u32> {
    static PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
    let re = PROGRESS_RE.get_or_init(|| {
        Regex::new(r"progress:\s*(\d+)%").expect("valid progress pattern")
    });

    let caps = re.captures(line)?;
    caps.get(1)?.as_str().parse::<u32>().ok().map(|p| p.min(100))
}

fn parse_transcript(output: &str) -> Result<Transcript, WorkerError> {
    let engine: EngineOutput =
        serde_json::from_str(output.trim()).map_err(WorkerError::OutputUnparseable)?;

    let segments: Vec<TranscriptionSegment> = engine
        .segments
        .into_iter()
        .map(|s| TranscriptionSegment {
            start_time: s.start,
            end_time: s.end,
            text: s.text,
            confidence: s.confidence,
        })
        .collect();

    let confidence = engine.confidence.unwrap_or_else(|| {
        let known: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
        if known.is_empty() {
            0.0
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        }
    });

    Ok(Transcript {
        text: engine.text.trim().to_string(),
        language: engine.language,
        confidence,
        segments,
    })
}
