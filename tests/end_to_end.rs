//! End-to-End Tests
//!
//! Drives the full application — watcher, store, queue, worker — with fake
//! ffprobe and engine executables, through the public operation surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use scribed::app::App;
use scribed::bus::AppEvent;
use scribed::config::Config;
use scribed::domain::RecordingStatus;

const PROBE_JSON: &str = r#"{"streams":[{"codec_name":"pcm_s16le","channels":1,"sample_rate":"16000"}],"format":{"format_name":"wav","duration":"3.0","bit_rate":"256000"}}"#;

/// Engine: hangs on *slow* files, crashes on *bad* files, otherwise
/// reports progress and emits a transcript.
const ENGINE: &str = r#"#!/bin/sh
case "$4" in
  *slow*) sleep 30 ;;
  *bad*)
    echo "model exploded" >&2
    exit 1
    ;;
esac
echo "progress: 25%" >&2
echo "progress: 75%" >&2
echo "progress: 100%" >&2
printf '{"text":"it works end to end","language":"en","segments":[{"start":0.0,"end":3.0,"text":"it works end to end","confidence":0.95}]}'
"#;

struct Fixture {
    _temp: TempDir,
    audio_dir: PathBuf,
    app: App,
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

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("home");

    let probe_body = format!("#!/bin/sh\ncat <<'EOF'\n{}\nEOF\n", PROBE_JSON);
    let ffprobe = write_script(temp.path(), "ffprobe.sh", &probe_body);
    let engine = write_script(temp.path(), "engine.sh", ENGINE);

    let model = temp.path().join("model.bin");
    std::fs::write(&model, b"fake model").unwrap();

    let audio_dir = temp.path().join("audio");
    std::fs::create_dir_all(&audio_dir).unwrap();

    let mut config = Config::with_home(home);
    config.engine_path = engine;
    config.ffprobe_path = ffprobe;
    config.model_path = model;
    config.debounce = Duration::from_millis(200);
    config.retry_delay = Duration::from_millis(200);

    Fixture {
        audio_dir,
        app: App::new(config).unwrap(),
        _temp: temp,
    }
}

async fn wait_for_completed(
    rx: &mut tokio::sync::broadcast::Receiver<AppEvent>,
    recording_id: &str,
) {
    timeout(Duration::from_secs(15), async {
        loop {
            if let AppEvent::TranscriptionCompleted { recording_id: id } =
                rx.recv().await.unwrap()
            {
                if id == recording_id {
                    return;
                }
            }
        }
    })
    .await
    .expect("transcription did not complete");
}

#[tokio::test]
async fn test_watch_then_transcribe_happy_path() {
    let fx = fixture();
    let mut rx = fx.app.subscribe();

    std::fs::write(fx.audio_dir.join("meeting.wav"), b"audio").unwrap();
    fx.app.watch_directory(&fx.audio_dir).await.unwrap();

    // The initial scan registered the file.
    let recordings = fx.app.get_audio_files().unwrap();
    assert_eq!(recordings.len(), 1);
    let recording = &recordings[0];
    assert_eq!(recording.status, RecordingStatus::Unprocessed);
    assert!((recording.duration - 3.0).abs() < 1e-9);

    assert!(fx.app.start_transcription(&recording.id, None).unwrap());

    // Persisted transitions arrive in order, each after its store write.
    let mut transitions = Vec::new();
    timeout(Duration::from_secs(15), async {
        loop {
            if let AppEvent::RecordingChanged { recording_id, status, .. } =
                rx.recv().await.unwrap()
            {
                if recording_id == recording.id {
                    transitions.push(status);
                    if status == RecordingStatus::Completed {
                        break;
                    }
                }
            }
        }
    })
    .await
    .expect("no completion");

    assert_eq!(
        transitions,
        vec![
            RecordingStatus::Pending,
            RecordingStatus::Processing,
            RecordingStatus::Completed
        ]
    );

    let transcript = fx.app.get_transcription(&recording.id).unwrap().unwrap();
    assert_eq!(transcript.content, "it works end to end");
    assert!(!transcript.segments.is_empty());
    assert!(transcript.segments[0].end_time >= transcript.segments[0].start_time);

    let status = fx
        .app
        .get_transcription_status(&recording.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.status, RecordingStatus::Completed);

    fx.app.cleanup();
}

#[tokio::test]
async fn test_cancel_before_start_leaves_no_transcript() {
    let fx = fixture();

    std::fs::write(fx.audio_dir.join("slow.wav"), b"audio").unwrap();
    std::fs::write(fx.audio_dir.join("waiting.wav"), b"audio").unwrap();
    fx.app.scan_directory(&fx.audio_dir).await.unwrap();

    let slow = fx
        .app
        .get_audio_files()
        .unwrap()
        .into_iter()
        .find(|r| r.filename == "slow.wav")
        .unwrap();
    let waiting = fx
        .app
        .get_audio_files()
        .unwrap()
        .into_iter()
        .find(|r| r.filename == "waiting.wav")
        .unwrap();

    let mut rx = fx.app.subscribe();
    fx.app.start_transcription(&slow.id, None).unwrap();
    fx.app.start_transcription(&waiting.id, None).unwrap();

    // Cancel the queued item before it ever starts processing.
    assert!(fx.app.cancel_transcription(&waiting.id).unwrap());

    let status = fx
        .app
        .get_transcription_status(&waiting.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.status, RecordingStatus::Cancelled);
    assert!(fx.app.get_transcription(&waiting.id).unwrap().is_none());

    // Cancel the active job too and watch it wind down.
    fx.app.cancel_transcription(&slow.id).unwrap();
    timeout(Duration::from_secs(10), async {
        loop {
            if let AppEvent::RecordingChanged {
                recording_id,
                status: RecordingStatus::Cancelled,
                ..
            } = rx.recv().await.unwrap()
            {
                if recording_id == slow.id {
                    return;
                }
            }
        }
    })
    .await
    .expect("active job was not cancelled");

    fx.app.cleanup();
}

#[tokio::test]
async fn test_auto_transcribe_setting() {
    let fx = fixture();
    fx.app.save_setting("auto_transcribe", "true").unwrap();

    let mut rx = fx.app.subscribe();

    let path = fx.audio_dir.join("hands-free.wav");
    std::fs::write(&path, b"audio").unwrap();
    let recording = fx.app.add_audio_file(&path).await.unwrap();

    // The listener picks up the new recording and drives it to completion.
    wait_for_completed(&mut rx, &recording.id).await;

    let transcript = fx.app.get_transcription(&recording.id).unwrap().unwrap();
    assert!(!transcript.content.is_empty());

    fx.app.cleanup();
}

#[tokio::test]
async fn test_failed_job_surfaces_error_and_message() {
    let fx = fixture();

    let path = fx.audio_dir.join("bad.wav");
    std::fs::write(&path, b"audio").unwrap();
    let recording = fx.app.add_audio_file(&path).await.unwrap();

    let mut rx = fx.app.subscribe();
    fx.app.start_transcription(&recording.id, None).unwrap();

    let message = timeout(Duration::from_secs(15), async {
        loop {
            if let AppEvent::TranscriptionError {
                recording_id,
                message,
            } = rx.recv().await.unwrap()
            {
                if recording_id == recording.id {
                    return message;
                }
            }
        }
    })
    .await
    .expect("no error event");
    assert!(!message.is_empty());

    let status = fx
        .app
        .get_transcription_status(&recording.id)
        .unwrap()
        .unwrap();
    assert_eq!(status.status, RecordingStatus::Error);
    assert!(status.error.is_some());

    fx.app.cleanup();
}

#[tokio::test]
async fn test_progress_reaches_observers() {
    let fx = fixture();

    let path = fx.audio_dir.join("talk.wav");
    std::fs::write(&path, b"audio").unwrap();
    let recording = fx.app.add_audio_file(&path).await.unwrap();

    let mut rx = fx.app.subscribe();
    fx.app.start_transcription(&recording.id, None).unwrap();

    let mut percents = Vec::new();
    timeout(Duration::from_secs(15), async {
        loop {
            match rx.recv().await.unwrap() {
                AppEvent::TranscriptionProgress {
                    recording_id,
                    percent_complete,
                } if recording_id == recording.id => percents.push(percent_complete),
                AppEvent::TranscriptionCompleted { recording_id }
                    if recording_id == recording.id =>
                {
                    break;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("no completion");

    assert_eq!(percents, vec![25, 75, 100]);

    fx.app.cleanup();
}

#[tokio::test]
async fn test_delete_recording_cascades_and_notifies() {
    let fx = fixture();

    let path = fx.audio_dir.join("ephemeral.wav");
    std::fs::write(&path, b"audio").unwrap();
    let recording = fx.app.add_audio_file(&path).await.unwrap();

    let mut rx = fx.app.subscribe();
    fx.app.delete_recording(&recording.id).unwrap();

    match timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Ok(AppEvent::RecordingRemoved { filepath })) => assert_eq!(filepath, path),
        other => panic!("expected RecordingRemoved, got {:?}", other),
    }

    assert!(fx.app.get_recording(&recording.id).unwrap().is_none());
    assert!(fx.app.get_transcription(&recording.id).unwrap().is_none());
}
