//! Command-line interface for scribed.
//!
//! Provides commands for scanning and watching directories, managing
//! recordings, running and cancelling transcriptions, and inspecting
//! settings and configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::app::App;
use crate::bus::AppEvent;
use crate::config::Config;
use crate::domain::RecordingStatus;
use crate::store::settings::SETTING_AUTO_TRANSCRIBE;

/// scribed - audio recording watcher and transcription queue
#[derive(Parser, Debug)]
#[command(name = "scribed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a directory once and register every audio file in it
    Scan {
        /// Directory to scan
        path: PathBuf,
    },

    /// Watch directories continuously for audio files
    Watch {
        /// Directories to watch
        paths: Vec<PathBuf>,

        /// Transcribe every newly discovered recording automatically
        #[arg(long)]
        auto: bool,
    },

    /// Register a single audio file
    Add {
        /// Audio file to register
        file: PathBuf,
    },

    /// Transcribe a recording and print the transcript
    Transcribe {
        /// Recording id (see `scribed list`)
        id: Option<String>,

        /// Register and transcribe this file instead of an existing id
        #[arg(long)]
        path: Option<PathBuf>,

        /// Language code passed to the engine
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Cancel a queued or running transcription
    Cancel {
        /// Recording id
        id: String,
    },

    /// Show transcription status for a recording
    Status {
        /// Recording id
        id: String,
    },

    /// List recordings
    List {
        /// Filter by status (unprocessed, pending, processing, completed,
        /// error, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of recordings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a recording and its transcript
    Show {
        /// Recording id
        id: String,
    },

    /// Delete a recording and its transcript
    Delete {
        /// Recording id
        id: String,
    },

    /// Manage persisted settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Show resolved configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// List all settings
    List,

    /// Get one setting
    Get { key: String },

    /// Set one setting
    Set { key: String, value: String },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load()?;

        match self.command {
            Commands::Scan { path } => execute_scan(config, path).await,
            Commands::Watch { paths, auto } => execute_watch(config, paths, auto).await,
            Commands::Add { file } => execute_add(config, file).await,
            Commands::Transcribe { id, path, language } => {
                execute_transcribe(config, id, path, language).await
            }
            Commands::Cancel { id } => execute_cancel(config, id).await,
            Commands::Status { id } => execute_status(config, id).await,
            Commands::List { status, limit } => execute_list(config, status, limit).await,
            Commands::Show { id } => execute_show(config, id).await,
            Commands::Delete { id } => execute_delete(config, id).await,
            Commands::Settings { command } => execute_settings(config, command).await,
            Commands::Config => execute_config(config),
        }
    }
}

async fn execute_scan(config: Config, path: PathBuf) -> Result<()> {
    let app = App::new(config)?;

    println!("Scanning: {}", path.display());
    let summary = app
        .scan_directory(&path)
        .await
        .with_context(|| format!("Failed to scan {}", path.display()))?;

    println!();
    println!("Scan results:");
    println!("  Ingested: {}", summary.ingested);
    println!("  Errors:   {}", summary.errors);
    println!("  Skipped:  {}", summary.skipped);

    Ok(())
}

async fn execute_watch(config: Config, paths: Vec<PathBuf>, auto: bool) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("No directories given. Usage: scribed watch <dir>...");
    }

    let app = App::new(config)?;
    if auto {
        app.save_setting(SETTING_AUTO_TRANSCRIBE, "true")?;
    }

    let mut rx = app.subscribe();

    for path in &paths {
        app.watch_directory(path)
            .await
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        println!("Watching: {}", path.display());
    }
    println!("Press Ctrl+C to stop");
    println!();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => print_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        println!("... {} events skipped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopping watches...");
                app.cleanup();
                break;
            }
        }
    }

    Ok(())
}

async fn execute_add(config: Config, file: PathBuf) -> Result<()> {
    let app = App::new(config)?;

    let recording = app
        .add_audio_file(&file)
        .await
        .with_context(|| format!("Failed to add {}", file.display()))?;

    println!("Added: {} ({})", recording.filename, recording.id);
    println!("  Duration: {:.1}s", recording.duration);
    println!("  Format:   {} / {}", recording.metadata.format, recording.metadata.codec);

    Ok(())
}

async fn execute_transcribe(
    config: Config,
    id: Option<String>,
    path: Option<PathBuf>,
    language: Option<String>,
) -> Result<()> {
    let app = App::new(config)?;

    let recording_id = match (id, path) {
        (Some(id), None) => id,
        (None, Some(path)) => {
            let recording = app
                .add_audio_file(&path)
                .await
                .with_context(|| format!("Failed to add {}", path.display()))?;
            println!("Added: {} ({})", recording.filename, recording.id);
            recording.id
        }
        _ => anyhow::bail!("Give either a recording id or --path <file>"),
    };

    // Subscribe before enqueueing so no event is missed.
    let mut rx = app.subscribe();
    app.start_transcription(&recording_id, language)?;
    println!("Transcribing {}...", recording_id);

    loop {
        let event = rx.recv().await.context("event stream closed")?;
        match event {
            AppEvent::TranscriptionProgress {
                recording_id: id,
                percent_complete,
            } if id == recording_id => {
                println!("  {}%", percent_complete);
            }
            AppEvent::TranscriptionCompleted { recording_id: id } if id == recording_id => {
                println!();
                match app.get_transcription(&recording_id)? {
                    Some(t) => {
                        println!("Language: {}  Confidence: {:.2}", t.language, t.confidence);
                        println!();
                        println!("{}", t.content);
                    }
                    None => println!("Completed, but no transcript found"),
                }
                return Ok(());
            }
            AppEvent::TranscriptionError {
                recording_id: id,
                message,
            } if id == recording_id => {
                anyhow::bail!("Transcription failed: {}", message);
            }
            AppEvent::RecordingChanged {
                recording_id: id,
                status: RecordingStatus::Cancelled,
                ..
            } if id == recording_id => {
                println!("Transcription cancelled");
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn execute_cancel(config: Config, id: String) -> Result<()> {
    let app = App::new(config)?;

    if app.cancel_transcription(&id)? {
        println!("Cancelled transcription for {}", id);
    } else {
        println!("No queued or running transcription for {}", id);
    }

    Ok(())
}

async fn execute_status(config: Config, id: String) -> Result<()> {
    let app = App::new(config)?;

    match app.get_transcription_status(&id)? {
        Some(status) => {
            println!("Status: {}", status.status);
            if let Some(error) = status.error {
                println!("Error:  {}", error);
            }
            if let Some(progress) = app.get_transcription_progress(&id) {
                println!("Progress: {}%", progress.percent_complete);
            }
        }
        None => println!("Unknown recording: {}", id),
    }

    Ok(())
}

async fn execute_list(config: Config, status: Option<String>, limit: usize) -> Result<()> {
    let app = App::new(config)?;

    let status_filter = match status.as_deref() {
        Some(s) => Some(
            RecordingStatus::parse(s)
                .with_context(|| format!("Unknown status: {s}"))?,
        ),
        None => None,
    };

    let recordings = app.get_audio_files()?;
    let filtered: Vec<_> = recordings
        .into_iter()
        .filter(|r| status_filter.map(|s| r.status == s).unwrap_or(true))
        .collect();

    if filtered.is_empty() {
        println!("No recordings");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:>9} {:<30}",
        "ID", "STATUS", "DURATION", "FILE"
    );
    println!("{}", "-".repeat(92));

    for recording in filtered.iter().take(limit) {
        let file_name = if recording.filename.len() > 28 {
            format!("{}...", &recording.filename[..25])
        } else {
            recording.filename.clone()
        };

        println!(
            "{:<38} {:<12} {:>8.1}s {:<30}",
            recording.id,
            recording.status.to_string(),
            recording.duration,
            file_name
        );
    }

    let total = filtered.len();
    if total > limit {
        println!();
        println!("  (showing {} of {} recordings)", limit, total);
    }

    Ok(())
}

async fn execute_show(config: Config, id: String) -> Result<()> {
    let app = App::new(config)?;

    let recording = app
        .get_recording(&id)?
        .with_context(|| format!("Unknown recording: {id}"))?;

    println!("Recording {}", recording.id);
    println!("  File:     {}", recording.filepath.display());
    println!("  Size:     {} bytes", recording.filesize);
    println!("  Duration: {:.1}s", recording.duration);
    println!(
        "  Format:   {} / {}",
        recording.metadata.format, recording.metadata.codec
    );
    println!("  Status:   {}", recording.status);
    if let Some(ref error) = recording.error_message {
        println!("  Error:    {}", error);
    }

    if let Some(transcript) = app.get_transcription(&id)? {
        println!();
        println!(
            "Transcript ({}, confidence {:.2}):",
            transcript.language, transcript.confidence
        );
        println!();
        println!("{}", transcript.content);
    }

    Ok(())
}

async fn execute_delete(config: Config, id: String) -> Result<()> {
    let app = App::new(config)?;

    app.delete_recording(&id)
        .with_context(|| format!("Failed to delete {id}"))?;
    println!("Deleted recording {}", id);

    Ok(())
}

async fn execute_settings(config: Config, command: SettingsCommands) -> Result<()> {
    let app = App::new(config)?;

    match command {
        SettingsCommands::List => {
            let settings = app.get_settings()?;
            if settings.is_empty() {
                println!("No settings");
            }
            for (key, value) in settings {
                println!("{} = {}", key, value);
            }
        }
        SettingsCommands::Get { key } => match app.get_setting(&key)? {
            Some(value) => println!("{}", value),
            None => println!("(unset)"),
        },
        SettingsCommands::Set { key, value } => {
            app.save_setting(&key, &value)?;
            println!("{} = {}", key, value);
        }
    }

    Ok(())
}

fn execute_config(config: Config) -> Result<()> {
    println!("scribed configuration");
    println!();
    println!("Home:     {}", config.home.display());
    println!("Database: {}", config.db_path.display());
    println!("Engine:   {}", config.engine_path.display());
    println!("Model:    {}", config.model_path.display());
    println!("ffprobe:  {}", config.ffprobe_path.display());
    println!();
    println!("Timeout:      {:?}", config.transcription_timeout);
    println!("Language:     {}", config.language);
    println!("Debounce:     {:?}", config.debounce);
    println!("Retry delay:  {:?}", config.retry_delay);
    println!("Max attempts: {}", config.max_retry_attempts);
    match config.config_file {
        Some(ref path) => println!("Config file:  {}", path.display()),
        None => println!("Config file:  (none found)"),
    }

    Ok(())
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::RecordingAdded { recording } => {
            println!("+ {} ({})", recording.filename, recording.id);
        }
        AppEvent::RecordingChanged {
            recording_id,
            status,
            error,
        } => match error {
            Some(error) => println!("~ {} -> {} ({})", recording_id, status, error),
            None => println!("~ {} -> {}", recording_id, status),
        },
        AppEvent::RecordingRemoved { filepath } => {
            println!("- {}", filepath.display());
        }
        AppEvent::ScanProgress {
            directory,
            processed,
            total,
        } => {
            if processed == total {
                println!("scanned {} ({} entries)", directory.display(), total);
            }
        }
        AppEvent::TranscriptionProgress {
            recording_id,
            percent_complete,
        } => {
            println!("  {} {}%", recording_id, percent_complete);
        }
        AppEvent::TranscriptionCompleted { recording_id } => {
            println!("✓ transcribed {}", recording_id);
        }
        AppEvent::TranscriptionError {
            recording_id,
            message,
        } => {
            println!("✗ {} failed: {}", recording_id, message);
        }
        AppEvent::IngestError { filepath, message } => {
            println!("✗ {}: {}", filepath.display(), message);
        }
    }
}
