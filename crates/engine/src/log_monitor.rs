//! Encoder diagnostic stream analysis
//!
//! One [`LogMonitor`] per encoder process. It drains the process's stderr
//! lines without blocking, keeps the latest progress sample, classifies
//! warning/error lines and answers whether the encoder looks healthy.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::process::{drain_available, unix_timestamp_ms};

/// A progress sample older than this is stale
pub const METRICS_STALE_AFTER: Duration = Duration::from_secs(5);
pub const MIN_HEALTHY_FPS: f64 = 10.0;
pub const MIN_HEALTHY_SPEED: f64 = 0.5;
pub const MAX_DROPPED_FRAMES: u64 = 100;

/// Longest stored error message, in characters
pub const MAX_MESSAGE_CHARS: usize = 200;
/// Characters of the message used for deduplication
const DEDUP_PREFIX_CHARS: usize = 100;
const MAX_RECENT_ERRORS: usize = 50;
/// Dedup keys remembered per process; the oldest key is forgotten first
const MAX_DEDUP_KEYS: usize = 512;
const STDERR_TAIL_LINES: usize = 20;

/// Latest progress sample. Overwritten on every metric line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetrics {
    pub frame: u64,
    pub fps: f64,
    pub bitrate: String,
    pub speed: f64,
    /// Encoder timestamp as printed (`HH:MM:SS.ss`)
    pub elapsed: String,
    pub elapsed_secs: f64,
    pub dup_frames: u64,
    pub drop_frames: u64,
    pub updated_at_unix_ms: i64,
}

/// Diagnostic line severity, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    ConnectionFailure,
    InvalidCodec,
    FileNotFound,
    StreamError,
    EncoderError,
    DecoderError,
    MemoryError,
    IoError,
    RtmpError,
    AudioError,
    VideoError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ConnectionFailure => "connection-failure",
            ErrorCategory::InvalidCodec => "invalid-codec",
            ErrorCategory::FileNotFound => "file-not-found",
            ErrorCategory::StreamError => "stream-error",
            ErrorCategory::EncoderError => "encoder-error",
            ErrorCategory::DecoderError => "decoder-error",
            ErrorCategory::MemoryError => "memory-error",
            ErrorCategory::IoError => "io-error",
            ErrorCategory::RtmpError => "rtmp-error",
            ErrorCategory::AudioError => "audio-error",
            ErrorCategory::VideoError => "video-error",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered match table: the first category with a matching needle wins
const CATEGORY_PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::ConnectionFailure,
        &[
            "connection refused",
            "connection reset",
            "connection timed out",
            "failed to connect",
            "could not connect",
            "network is unreachable",
            "no route to host",
            "broken pipe",
        ],
    ),
    (
        ErrorCategory::InvalidCodec,
        &[
            "unknown encoder",
            "unknown decoder",
            "codec not found",
            "encoder not found",
            "decoder not found",
            "invalid codec",
            "unsupported codec",
        ],
    ),
    (
        ErrorCategory::FileNotFound,
        &["no such file or directory", "file not found", "does not exist"],
    ),
    (
        ErrorCategory::MemoryError,
        &["cannot allocate memory", "out of memory", "memory allocation"],
    ),
    (
        ErrorCategory::IoError,
        &["i/o error", "input/output error", "permission denied", "end of file"],
    ),
    (ErrorCategory::RtmpError, &["rtmp"]),
    (ErrorCategory::EncoderError, &["encoder", "encoding"]),
    (
        ErrorCategory::DecoderError,
        &["decoder", "decoding", "invalid data found"],
    ),
    (ErrorCategory::AudioError, &["audio"]),
    (ErrorCategory::VideoError, &["video"]),
    (ErrorCategory::StreamError, &["stream", "muxer", "demuxer"]),
];

/// A recorded warning or error line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub timestamp_unix_ms: i64,
    pub severity: Severity,
    pub category: ErrorCategory,
    /// Level prefixes stripped, truncated
    pub message: String,
    pub raw: String,
}

/// Why the encoder is considered unhealthy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HealthIssue {
    #[error("no progress metrics received yet")]
    NoMetrics,

    #[error("progress metrics stale for {0:.1?}")]
    Stale(Duration),

    #[error("fps too low: {0:.1}")]
    LowFps(f64),

    #[error("encoding speed too low: {0:.2}x")]
    SlowSpeed(f64),

    #[error("too many dropped frames: {0}")]
    TooManyDrops(u64),
}

fn metric_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([a-z]+)=\s*(\S+)").unwrap_or_else(|e| unreachable!("static pattern: {}", e))
    })
}

fn level_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[(panic|fatal|error|warning|info|verbose|debug|trace)\]")
            .unwrap_or_else(|e| unreachable!("static pattern: {}", e))
    })
}

/// Parse a progress line, e.g.
/// `frame= 120 fps= 30 q=28.0 size= 512kB time=00:00:04.00 bitrate=1048.6kbits/s dup=0 drop=2 speed=1.01x`.
/// Requires frame, fps, time, bitrate and speed.
pub fn parse_metrics_line(line: &str) -> Option<LogMetrics> {
    if !line.contains("frame=") {
        return None;
    }

    let mut frame = None;
    let mut fps = None;
    let mut elapsed = None;
    let mut bitrate = None;
    let mut speed = None;
    let mut dup_frames = 0;
    let mut drop_frames = 0;

    for caps in metric_field_re().captures_iter(line) {
        let value = &caps[2];
        match &caps[1] {
            "frame" => frame = value.parse::<u64>().ok(),
            "fps" => fps = Some(parse_number(value)),
            "time" => elapsed = Some(value.to_string()),
            "bitrate" => bitrate = Some(value.to_string()),
            "speed" => speed = Some(parse_number(value.trim_end_matches('x'))),
            "dup" => dup_frames = value.parse().unwrap_or(0),
            "drop" => drop_frames = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let elapsed = elapsed?;
    Some(LogMetrics {
        frame: frame?,
        fps: fps?,
        bitrate: bitrate?,
        speed: speed?,
        elapsed_secs: parse_timestamp(&elapsed),
        elapsed,
        dup_frames,
        drop_frames,
        updated_at_unix_ms: unix_timestamp_ms(),
    })
}

/// "N/A" and garbage read as 0
fn parse_number(value: &str) -> f64 {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// `HH:MM:SS.ss` to seconds; negative or malformed timestamps read as 0
fn parse_timestamp(value: &str) -> f64 {
    if value.starts_with('-') {
        return 0.0;
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }
    let h = parse_number(parts[0]);
    let m = parse_number(parts[1]);
    let s = parse_number(parts[2]);
    let total = h * 3600.0 + m * 60.0 + s;
    if total > 0.0 {
        total
    } else {
        0.0
    }
}

/// Severity from an explicit `[level]` token, else from keywords in the line
pub fn detect_severity(line: &str) -> Severity {
    let mut best: Option<Severity> = None;
    for caps in level_token_re().captures_iter(line) {
        let level = match caps[1].to_ascii_lowercase().as_str() {
            "panic" | "fatal" => Severity::Fatal,
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        };
        best = Some(best.map_or(level, |b| b.max(level)));
    }
    if let Some(level) = best {
        return level;
    }

    let lower = line.to_ascii_lowercase();
    if lower.contains("fatal") || lower.contains("panic") {
        Severity::Fatal
    } else if ["error", "failed", "could not", "unable to", "invalid"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Severity::Error
    } else if lower.contains("warning") || lower.contains("deprecated") {
        Severity::Warning
    } else {
        Severity::Info
    }
}

pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    CATEGORY_PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Strip leading `[...]` prefixes (`[flv @ 0x..]`, `[error]`) and truncate
pub fn clean_message(line: &str) -> String {
    let mut rest = line.trim();
    while rest.starts_with('[') {
        match rest.find(']') {
            Some(end) => rest = rest[end + 1..].trim_start(),
            None => break,
        }
    }
    rest.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Classify a line; `None` for anything below warning
pub fn classify_line(line: &str) -> Option<ClassifiedError> {
    let severity = detect_severity(line);
    if severity < Severity::Warning {
        return None;
    }
    let message = clean_message(line);
    if message.is_empty() {
        return None;
    }
    Some(ClassifiedError {
        timestamp_unix_ms: unix_timestamp_ms(),
        severity,
        category: categorize(&message),
        message,
        raw: line.to_string(),
    })
}

type DedupKey = (ErrorCategory, String);

/// Per-process diagnostic state
#[derive(Debug, Default)]
pub struct LogMonitor {
    rx: Option<mpsc::Receiver<String>>,
    metrics: Option<LogMetrics>,
    last_sample: Option<Instant>,
    errors: VecDeque<ClassifiedError>,
    seen: HashSet<DedupKey>,
    seen_order: VecDeque<DedupKey>,
    stderr_tail: VecDeque<String>,
    lines_seen: u64,
}

impl LogMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all state and start reading from `rx`
    pub fn attach(&mut self, rx: mpsc::Receiver<String>) {
        self.reset();
        self.rx = Some(rx);
    }

    /// Discard all state from the previous process
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Consume every buffered line without waiting. Returns the number consumed.
    pub fn drain(&mut self) -> usize {
        let lines = match self.rx.as_mut() {
            Some(rx) => drain_available(rx),
            None => Vec::new(),
        };
        let count = lines.len();
        for line in lines {
            self.feed_line(&line);
        }
        count
    }

    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.lines_seen += 1;

        if let Some(sample) = parse_metrics_line(line) {
            self.metrics = Some(sample);
            self.last_sample = Some(Instant::now());
            return;
        }

        if self.stderr_tail.len() == STDERR_TAIL_LINES {
            self.stderr_tail.pop_front();
        }
        self.stderr_tail.push_back(line.to_string());

        let Some(classified) = classify_line(line) else {
            return;
        };
        let key = (
            classified.category,
            classified.message.chars().take(DEDUP_PREFIX_CHARS).collect::<String>(),
        );
        if !self.remember(key) {
            debug!(category = %classified.category, "duplicate encoder error suppressed");
            return;
        }

        if classified.severity >= Severity::Error {
            warn!(
                severity = %classified.severity,
                category = %classified.category,
                message = %classified.message,
                "encoder reported error"
            );
        }
        if self.errors.len() == MAX_RECENT_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(classified);
    }

    /// Returns false when the key is already known
    fn remember(&mut self, key: DedupKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen_order.len() == MAX_DEDUP_KEYS {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.seen_order.push_back(key);
        true
    }

    pub fn metrics(&self) -> Option<&LogMetrics> {
        self.metrics.as_ref()
    }

    /// Recorded errors, oldest first
    pub fn errors(&self) -> impl Iterator<Item = &ClassifiedError> {
        self.errors.iter()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// The newest `n` errors, oldest first
    pub fn recent_errors(&self, n: usize) -> Vec<ClassifiedError> {
        let skip = self.errors.len().saturating_sub(n);
        self.errors.iter().skip(skip).cloned().collect()
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.iter().cloned().collect()
    }

    /// Last few non-progress lines joined for error messages
    pub fn stderr_summary(&self, lines: usize) -> String {
        let skip = self.stderr_tail.len().saturating_sub(lines);
        self.stderr_tail
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }

    pub fn is_healthy(&self) -> bool {
        self.health_check().is_ok()
    }

    pub fn health_check(&self) -> Result<(), HealthIssue> {
        self.health_check_at(Instant::now())
    }

    pub fn health_check_at(&self, now: Instant) -> Result<(), HealthIssue> {
        let (Some(metrics), Some(sampled_at)) = (&self.metrics, self.last_sample) else {
            return Err(HealthIssue::NoMetrics);
        };
        let age = now.saturating_duration_since(sampled_at);
        if age > METRICS_STALE_AFTER {
            return Err(HealthIssue::Stale(age));
        }
        if metrics.fps < MIN_HEALTHY_FPS {
            return Err(HealthIssue::LowFps(metrics.fps));
        }
        if metrics.speed < MIN_HEALTHY_SPEED {
            return Err(HealthIssue::SlowSpeed(metrics.speed));
        }
        if metrics.drop_frames > MAX_DROPPED_FRAMES {
            return Err(HealthIssue::TooManyDrops(metrics.drop_frames));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PROGRESS: &str = "frame= 1200 fps= 30 q=28.0 size=    5120kB time=00:00:40.00 bitrate=1048.6kbits/s dup=3 drop=2 speed=1.01x";

    #[test]
    fn test_parse_progress_line() {
        let m = parse_metrics_line(PROGRESS).unwrap();
        assert_eq!(m.frame, 1200);
        assert_eq!(m.fps, 30.0);
        assert_eq!(m.bitrate, "1048.6kbits/s");
        assert_eq!(m.elapsed, "00:00:40.00");
        assert_eq!(m.elapsed_secs, 40.0);
        assert_eq!(m.dup_frames, 3);
        assert_eq!(m.drop_frames, 2);
        assert!((m.speed - 1.01).abs() < 1e-9);
    }

    #[test]
    fn test_parse_progress_line_with_na_fields() {
        let line = "frame=    0 fps=0.0 q=0.0 size=N/A time=-00:00:00.01 bitrate=N/A speed=N/A";
        let m = parse_metrics_line(line).unwrap();
        assert_eq!(m.frame, 0);
        assert_eq!(m.speed, 0.0);
        assert_eq!(m.elapsed_secs, 0.0);
        assert_eq!(m.drop_frames, 0);
    }

    #[test]
    fn test_incomplete_progress_line_rejected() {
        assert!(parse_metrics_line("frame= 10 fps= 30").is_none());
        assert!(parse_metrics_line("Input #0, mov,mp4 from 'a.mp4':").is_none());
    }

    #[test]
    fn test_severity_tokens_outrank_keywords() {
        assert_eq!(detect_severity("[error] Connection refused"), Severity::Error);
        assert_eq!(detect_severity("[flv @ 0x5581] [fatal] boom"), Severity::Fatal);
        assert_eq!(detect_severity("[panic] out of memory"), Severity::Fatal);
        assert_eq!(detect_severity("[info] error concealment enabled"), Severity::Info);
        assert_eq!(
            detect_severity("[warning] Past duration 0.99 too large"),
            Severity::Warning
        );
        assert_eq!(detect_severity("Could not open file"), Severity::Error);
        assert_eq!(detect_severity("Stream mapping:"), Severity::Info);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            categorize("Connection refused"),
            ErrorCategory::ConnectionFailure
        );
        assert_eq!(
            categorize("Unknown encoder 'h264_nvenc'"),
            ErrorCategory::InvalidCodec
        );
        assert_eq!(
            categorize("/loops/a.mp4: No such file or directory"),
            ErrorCategory::FileNotFound
        );
        assert_eq!(
            categorize("Cannot allocate memory"),
            ErrorCategory::MemoryError
        );
        assert_eq!(categorize("av_interleaved_write_frame(): Input/output error"), ErrorCategory::IoError);
        assert_eq!(categorize("RTMP_ReadPacket, failed"), ErrorCategory::RtmpError);
        assert_eq!(
            categorize("Error while decoding stream #0:0"),
            ErrorCategory::DecoderError
        );
        assert_eq!(categorize("Error initializing output stream"), ErrorCategory::StreamError);
        assert_eq!(categorize("something odd"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_clean_message_strips_prefixes_and_truncates() {
        assert_eq!(
            clean_message("[flv @ 0x55d1] [error] Failed to update header"),
            "Failed to update header"
        );
        let long = format!("[error] {}", "x".repeat(500));
        assert_eq!(clean_message(&long).chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_duplicate_error_recorded_once() {
        let mut monitor = LogMonitor::new();
        monitor.feed_line("[error] Connection refused");
        monitor.feed_line("[error] Connection refused");

        let errors: Vec<_> = monitor.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::ConnectionFailure);
        assert_eq!(errors[0].severity, Severity::Error);
        assert_eq!(errors[0].message, "Connection refused");
    }

    #[test]
    fn test_dedup_memory_is_bounded() {
        let mut monitor = LogMonitor::new();
        for i in 0..5_000u64 {
            monitor.feed_line(&format!(
                "[mp4 @ 0x55d5] [warning] Non-monotonous DTS in output stream 0:0; previous: {}, current: {}; changing to {}",
                i * 512,
                i * 512 - (i % 7),
                i * 512 + 1
            ));
        }
        assert_eq!(monitor.seen.len(), MAX_DEDUP_KEYS);
        assert_eq!(monitor.seen_order.len(), MAX_DEDUP_KEYS);
        assert_eq!(monitor.error_count(), MAX_RECENT_ERRORS);

        // recent keys still suppress repeats
        monitor.feed_line(
            "[mp4 @ 0x55d5] [warning] Non-monotonous DTS in output stream 0:0; previous: 2559488, current: 2559487; changing to 2559489",
        );
        assert_eq!(monitor.seen.len(), MAX_DEDUP_KEYS);
        assert!(monitor.seen_order.back().is_some_and(|(_, m)| m.contains("previous: 2559488")));
    }

    #[test]
    fn test_info_lines_not_recorded_but_tailed() {
        let mut monitor = LogMonitor::new();
        monitor.feed_line("Stream mapping:");
        monitor.feed_line(PROGRESS);
        assert_eq!(monitor.error_count(), 0);
        assert_eq!(monitor.stderr_tail(), vec!["Stream mapping:"]);
        assert_eq!(monitor.lines_seen(), 2);
    }

    #[test]
    fn test_reset_forgets_previous_process() {
        let mut monitor = LogMonitor::new();
        monitor.feed_line("[error] Connection refused");
        monitor.feed_line(PROGRESS);
        monitor.reset();
        assert!(monitor.metrics().is_none());
        assert_eq!(monitor.error_count(), 0);

        // same error is new again for the next process
        monitor.feed_line("[error] Connection refused");
        assert_eq!(monitor.error_count(), 1);
    }

    #[test]
    fn test_health_rules() {
        let mut monitor = LogMonitor::new();
        assert_eq!(monitor.health_check(), Err(HealthIssue::NoMetrics));

        monitor.feed_line(PROGRESS);
        assert!(monitor.is_healthy());

        let later = Instant::now() + Duration::from_secs(6);
        assert!(matches!(
            monitor.health_check_at(later),
            Err(HealthIssue::Stale(_))
        ));

        monitor.feed_line("frame= 10 fps= 5 time=00:00:01.00 bitrate=100kbits/s speed=1.0x");
        assert_eq!(monitor.health_check(), Err(HealthIssue::LowFps(5.0)));

        monitor.feed_line("frame= 10 fps= 30 time=00:00:01.00 bitrate=100kbits/s speed=0.3x");
        assert_eq!(monitor.health_check(), Err(HealthIssue::SlowSpeed(0.3)));

        monitor.feed_line(
            "frame= 10 fps= 30 time=00:00:01.00 bitrate=100kbits/s drop=101 speed=1.0x",
        );
        assert_eq!(monitor.health_check(), Err(HealthIssue::TooManyDrops(101)));
    }

    #[tokio::test]
    async fn test_drain_consumes_channel_without_blocking() {
        let (tx, rx) = mpsc::channel(8);
        let mut monitor = LogMonitor::new();
        monitor.attach(rx);
        assert_eq!(monitor.drain(), 0);

        tx.send(PROGRESS.to_string()).await.unwrap();
        tx.send("[error] Connection refused".to_string()).await.unwrap();
        assert_eq!(monitor.drain(), 2);
        assert!(monitor.metrics().is_some());
        assert_eq!(monitor.error_count(), 1);
    }

    #[test]
    fn test_recent_errors_newest_last() {
        let mut monitor = LogMonitor::new();
        monitor.feed_line("[error] first failure");
        monitor.feed_line("[error] second failure");
        monitor.feed_line("[error] third failure");
        let recent = monitor.recent_errors(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].message, "third failure");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_classify_never_exceeds_message_limit(line in ".{0,600}") {
            if let Some(classified) = classify_line(&line) {
                prop_assert!(classified.message.chars().count() <= MAX_MESSAGE_CHARS);
                prop_assert!(classified.severity >= Severity::Warning);
            }
        }

        #[test]
        fn prop_error_token_is_at_least_error(msg in "[a-zA-Z ]{1,80}") {
            let line = format!("[error] x{}", msg);
            prop_assert!(detect_severity(&line) >= Severity::Error);
        }

        #[test]
        fn prop_progress_fields_round_trip(
            frame in 0u64..10_000_000,
            fps in 0u32..240,
            drop in 0u64..10_000,
        ) {
            let line = format!(
                "frame={} fps={} q=23.0 size=100kB time=00:01:00.00 bitrate=900.0kbits/s drop={} speed=1.00x",
                frame, fps, drop
            );
            let m = parse_metrics_line(&line).unwrap();
            prop_assert_eq!(m.frame, frame);
            prop_assert_eq!(m.fps, fps as f64);
            prop_assert_eq!(m.drop_frames, drop);
            prop_assert_eq!(m.elapsed_secs, 60.0);
        }
    }
}
