//! Worker Supervisor Integration Tests
//!
//! Timeout enforcement, cancellation and failure classification against
//! fake engine executables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use scribed::bus::EventBus;
use scribed::transcribe::{TranscriptionRequest, WorkerConfig, WorkerError, WorkerSupervisor};

const HANGING_ENGINE: &str = "#!/bin/sh\nsleep 30\n";

const GARBAGE_ENGINE: &str = "#!/bin/sh\necho 'this is not json'\n";

const SILENT_ENGINE: &str = "#!/bin/sh\nexit 0\n";

const CRASHING_ENGINE: &str = "#!/bin/sh\necho 'segfault adjacent' >&2\nexit 7\n";

struct Fixture {
    _temp: TempDir,
    audio: PathBuf,
    model: PathBuf,
    engine: PathBuf,
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn fixture(engine_body: &str) -> Fixture {
    let temp = TempDir::new().unwrap();
    let engine = write_script(temp.path(), "engine.sh", engine_body);

    let model = temp.path().join("model.bin");
    std::fs::write(&model, b"fake model").unwrap();

    let audio = temp.path().join("audio.wav");
    std::fs::write(&audio, b"fake audio").unwrap();

    Fixture {
        engine,
        model,
        audio,
        _temp: temp,
    }
}

fn supervisor(fx: &Fixture, job_timeout: Duration) -> WorkerSupervisor {
    WorkerSupervisor::new(
        WorkerConfig {
            engine_path: fx.engine.clone(),
            model_path: fx.model.clone(),
            timeout: job_timeout,
        },
        EventBus::new(64),
    )
}

fn request(fx: &Fixture) -> TranscriptionRequest {
    TranscriptionRequest {
        recording_id: "rec-1".to_string(),
        file_path: fx.audio.clone(),
        language: Some("en".to_string()),
    }
}

#[tokio::test]
async fn test_timeout_kills_the_engine() {
    let fx = fixture(HANGING_ENGINE);
    let supervisor = supervisor(&fx, Duration::from_millis(300));

    let started = std::time::Instant::now();
    let err = supervisor.transcribe(&request(&fx)).await.unwrap_err();

    assert!(matches!(err, WorkerError::Timeout(_)));
    // The call returns promptly once the deadline passes, engine reaped.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_terminate_cancels_a_running_job() {
    let fx = fixture(HANGING_ENGINE);
    let supervisor = std::sync::Arc::new(supervisor(&fx, Duration::from_secs(60)));

    let handle = {
        let supervisor = std::sync::Arc::clone(&supervisor);
        let request = request(&fx);
        tokio::spawn(async move { supervisor.transcribe(&request).await })
    };

    // Let the engine start, then ask it to stop.
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.terminate();

    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("terminate did not release the job")
        .unwrap();
    assert!(matches!(result, Err(WorkerError::Cancelled)));

    // Terminating again is harmless.
    supervisor.terminate();
}

#[tokio::test]
async fn test_terminate_before_transcribe() {
    let fx = fixture(HANGING_ENGINE);
    let supervisor = supervisor(&fx, Duration::from_secs(60));

    supervisor.terminate();
    let err = supervisor.transcribe(&request(&fx)).await.unwrap_err();
    assert!(matches!(err, WorkerError::Cancelled));
}

#[tokio::test]
async fn test_garbage_output_is_unparseable_not_crash() {
    let fx = fixture(GARBAGE_ENGINE);
    let supervisor = supervisor(&fx, Duration::from_secs(10));

    let err = supervisor.transcribe(&request(&fx)).await.unwrap_err();
    assert!(matches!(err, WorkerError::OutputUnparseable(_)));
}

#[tokio::test]
async fn test_empty_output_on_clean_exit_is_unparseable() {
    let fx = fixture(SILENT_ENGINE);
    let supervisor = supervisor(&fx, Duration::from_secs(10));

    let err = supervisor.transcribe(&request(&fx)).await.unwrap_err();
    assert!(matches!(err, WorkerError::OutputUnparseable(_)));
}

#[tokio::test]
async fn test_nonzero_exit_is_a_crash() {
    let fx = fixture(CRASHING_ENGINE);
    let supervisor = supervisor(&fx, Duration::from_secs(10));

    let err = supervisor.transcribe(&request(&fx)).await.unwrap_err();
    match err {
        WorkerError::ExitCode(code) => assert_eq!(code, 7),
        other => panic!("expected ExitCode, got {other:?}"),
    }
    // The message is suitable for direct display on the recording.
    assert!(!format!("{}", WorkerError::ExitCode(7)).is_empty());
}
