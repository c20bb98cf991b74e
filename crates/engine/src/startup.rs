//! Preflight checks run before the first stream start
//!
//! - encoder binary runs and is new enough for the `xfade` filter
//! - the slot alias directory is writable (persistent strategy only)
//!
//! Hardware encoder availability is taken from configuration and never probed.

use crate::config::{Config, StrategyKind};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Oldest encoder major version with the `xfade` filter
pub const MIN_FFMPEG_MAJOR: u32 = 4;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("Slot alias directory unusable: {0}")]
    AliasDir(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
///
/// Git snapshot builds ("N-112345-g...") carry no release number and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Run `<ffmpeg> -version` and check the major version. Returns the parsed version, if any.
pub fn check_ffmpeg(ffmpeg_path: &str) -> Result<Option<u32>, StartupError> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is FFmpeg installed and in PATH? Error: {}",
                ffmpeg_path, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_path, output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    match parse_ffmpeg_version(&version_output) {
        Some(major) if major < MIN_FFMPEG_MAJOR => Err(StartupError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            MIN_FFMPEG_MAJOR, major
        ))),
        Some(major) => Ok(Some(major)),
        None => {
            warn!(
                first_line = version_output.lines().next().unwrap_or("(empty)"),
                "could not parse FFmpeg version, assuming a snapshot build"
            );
            Ok(None)
        }
    }
}

/// Create the alias directory and prove it accepts new files
pub fn check_alias_dir(dir: &Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| StartupError::AliasDir(format!("{}: {}", dir.display(), e)))?;
    let probe = dir.join(".loopcast-write-probe");
    std::fs::write(&probe, b"")
        .map_err(|e| StartupError::AliasDir(format!("{}: {}", dir.display(), e)))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

/// Run all startup checks in order
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let version = check_ffmpeg(&cfg.stream.ffmpeg_path)?;
    info!(ffmpeg = %cfg.stream.ffmpeg_path, major = ?version, "encoder binary found");

    if cfg.stream.strategy == StrategyKind::Persistent {
        check_alias_dir(&cfg.stream.alias_dir)?;
    }
    Ok(())
}
