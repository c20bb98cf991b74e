//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Valid framerate range (inclusive)
pub const FRAMERATE_RANGE: (u32, u32) = (1, 60);

/// Valid crossfade duration range in seconds (inclusive)
pub const CROSSFADE_RANGE: (f64, f64) = (0.0, 10.0);

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value is outside its accepted range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// How a track change is carried out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Spawn a new encoder, overlap it with the old one, then kill the old one
    #[default]
    Handover,
    /// One long-running dual-input encoder whose inputs are swapped via slot aliases
    Persistent,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Handover => "handover",
            StrategyKind::Persistent => "persistent",
        }
    }

    /// Parse a strategy name, accepting the lowercase config spelling
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "handover" => Some(StrategyKind::Handover),
            "persistent" => Some(StrategyKind::Persistent),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video encoder family. Availability of the hardware encoder is taken on
/// trust from configuration, never probed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoProfile {
    /// Software libx264
    #[default]
    X264,
    /// NVIDIA h264_nvenc
    Nvenc,
}

impl VideoProfile {
    /// Encoder name passed to `-c:v`
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoProfile::X264 => "libx264",
            VideoProfile::Nvenc => "h264_nvenc",
        }
    }

    /// Preset used when the config does not name one
    pub fn default_preset(&self) -> &'static str {
        match self {
            VideoProfile::X264 => "veryfast",
            VideoProfile::Nvenc => "p4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "x264" | "libx264" => Some(VideoProfile::X264),
            "nvenc" | "h264_nvenc" => Some(VideoProfile::Nvenc),
            _ => None,
        }
    }
}

/// Output pipeline wiring: binary, audio source, publish endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Encoder binary (name on PATH or absolute path)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Continuously available network audio feed
    #[serde(default = "default_audio_url")]
    pub audio_url: String,
    /// Publish destination URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Container format for the output (`-f`)
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Directory holding the two slot aliases of the persistent strategy
    #[serde(default = "default_alias_dir")]
    pub alias_dir: PathBuf,
    /// Encoder log verbosity (`-loglevel level+<value>`)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_audio_url() -> String {
    "http://127.0.0.1:8000/stream".to_string()
}

fn default_endpoint() -> String {
    "rtmp://127.0.0.1/live/stream".to_string()
}

fn default_output_format() -> String {
    "flv".to_string()
}

fn default_alias_dir() -> PathBuf {
    env::temp_dir().join("loopcast-slots")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            audio_url: default_audio_url(),
            endpoint: default_endpoint(),
            output_format: default_output_format(),
            strategy: StrategyKind::default(),
            alias_dir: default_alias_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Video encoding parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    /// Output size as `WIDTHxHEIGHT`
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// Output framerate (1-60)
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default)]
    pub profile: VideoProfile,
    /// Target video bitrate, e.g. "4500k"
    #[serde(default = "default_video_bitrate")]
    pub bitrate: String,
    /// Rate-control buffer size (defaults to twice the bitrate)
    #[serde(default)]
    pub buffer_size: Option<String>,
    /// Encoder preset (defaults depend on the profile)
    #[serde(default)]
    pub preset: Option<String>,
    /// H.264 profile
    #[serde(default = "default_h264_profile")]
    pub h264_profile: String,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    /// GOP length in frames (defaults to two seconds of video)
    #[serde(default)]
    pub keyframe_interval: Option<u32>,
    /// NVENC constant-quality factor
    #[serde(default = "default_nvenc_cq")]
    pub nvenc_cq: u32,
    /// Per-input packet queue bound
    #[serde(default = "default_input_queue_size")]
    pub input_queue_size: u32,
}

fn default_resolution() -> String {
    "1280x720".to_string()
}

fn default_framerate() -> u32 {
    30
}

fn default_video_bitrate() -> String {
    "4500k".to_string()
}

fn default_h264_profile() -> String {
    "high".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_nvenc_cq() -> u32 {
    23
}

fn default_input_queue_size() -> u32 {
    512
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            framerate: default_framerate(),
            profile: VideoProfile::default(),
            bitrate: default_video_bitrate(),
            buffer_size: None,
            preset: None,
            h264_profile: default_h264_profile(),
            pixel_format: default_pixel_format(),
            keyframe_interval: None,
            nvenc_cq: default_nvenc_cq(),
            input_queue_size: default_input_queue_size(),
        }
    }
}

impl VideoConfig {
    /// Parse `resolution` into (width, height)
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.resolution.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse::<u32>().ok()?;
        let height = h.trim().parse::<u32>().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some((width, height))
    }

    pub fn effective_preset(&self) -> &str {
        self.preset
            .as_deref()
            .unwrap_or_else(|| self.profile.default_preset())
    }

    pub fn effective_keyframe_interval(&self) -> u32 {
        self.keyframe_interval.unwrap_or(self.framerate * 2)
    }

    /// Buffer size; `"4500k"` doubles to `"9000k"`, unparseable bitrates are reused as-is
    pub fn effective_buffer_size(&self) -> String {
        if let Some(ref size) = self.buffer_size {
            return size.clone();
        }
        let trimmed = self.bitrate.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);
        match digits.parse::<u64>().ok().and_then(|value| value.checked_mul(2)) {
            Some(doubled) => format!("{}{}", doubled, suffix),
            None => trimmed.to_string(),
        }
    }
}

/// Audio encoding parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_audio_codec")]
    pub codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: default_audio_codec(),
            bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// Timing of the visual handover between loops. All values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionConfig {
    /// Blend length of the dual-input crossfade (0-10)
    #[serde(default = "default_crossfade_duration")]
    pub crossfade_duration: f64,
    /// Named transition curve; unknown names fall back to "fade"
    #[serde(default = "default_transition_name")]
    pub name: String,
    /// Fade-in applied to a freshly spawned handover process
    #[serde(default = "default_fade_in_duration")]
    pub fade_in_duration: f64,
    /// Time both processes publish during a handover
    #[serde(default = "default_overlap_duration")]
    pub overlap_duration: f64,
    /// Time given to the persistent encoder to pick up a re-pointed slot alias
    #[serde(default = "default_preload_duration")]
    pub preload_duration: f64,
}

fn default_crossfade_duration() -> f64 {
    1.0
}

fn default_transition_name() -> String {
    "fade".to_string()
}

fn default_fade_in_duration() -> f64 {
    1.0
}

fn default_overlap_duration() -> f64 {
    2.0
}

fn default_preload_duration() -> f64 {
    1.0
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            crossfade_duration: default_crossfade_duration(),
            name: default_transition_name(),
            fade_in_duration: default_fade_in_duration(),
            overlap_duration: default_overlap_duration(),
            preload_duration: default_preload_duration(),
        }
    }
}

impl TransitionConfig {
    pub fn crossfade(&self) -> Duration {
        secs(self.crossfade_duration)
    }

    pub fn fade_in(&self) -> Duration {
        secs(self.fade_in_duration)
    }

    pub fn overlap(&self) -> Duration {
        secs(self.overlap_duration)
    }

    pub fn preload(&self) -> Duration {
        secs(self.preload_duration)
    }
}

/// Process supervision and recovery. All durations in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessConfig {
    /// Grace period after the graceful-stop signal before a forced kill
    #[serde(default = "default_termination_timeout")]
    pub termination_timeout: f64,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_restart_on_error")]
    pub restart_on_error: bool,
    /// Pause between stop and start during a restart
    #[serde(default = "default_restart_delay")]
    pub restart_delay: f64,
    /// Post-spawn liveness probe delay
    #[serde(default = "default_spawn_probe_delay")]
    pub spawn_probe_delay: f64,
    /// Monitoring tick
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: f64,
}

fn default_termination_timeout() -> f64 {
    5.0
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_restart_on_error() -> bool {
    true
}

fn default_restart_delay() -> f64 {
    2.0
}

fn default_spawn_probe_delay() -> f64 {
    0.5
}

fn default_monitor_interval() -> f64 {
    1.0
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            termination_timeout: default_termination_timeout(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_on_error: default_restart_on_error(),
            restart_delay: default_restart_delay(),
            spawn_probe_delay: default_spawn_probe_delay(),
            monitor_interval: default_monitor_interval(),
        }
    }
}

impl ProcessConfig {
    pub fn termination_timeout(&self) -> Duration {
        secs(self.termination_timeout)
    }

    pub fn restart_delay(&self) -> Duration {
        secs(self.restart_delay)
    }

    pub fn spawn_probe_delay(&self) -> Duration {
        secs(self.spawn_probe_delay)
    }

    pub fn monitor_interval(&self) -> Duration {
        secs(self.monitor_interval)
    }
}

/// Status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration structure. Immutable for the lifetime of one run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - LOOPCAST_FFMPEG_PATH -> stream.ffmpeg_path
    /// - LOOPCAST_AUDIO_URL -> stream.audio_url
    /// - LOOPCAST_ENDPOINT -> stream.endpoint
    /// - LOOPCAST_STRATEGY -> stream.strategy
    /// - LOOPCAST_VIDEO_PROFILE -> video.profile
    /// - LOOPCAST_MAX_RESTART_ATTEMPTS -> process.max_restart_attempts
    /// - LOOPCAST_RESTART_ON_ERROR -> process.restart_on_error
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("LOOPCAST_FFMPEG_PATH") {
            if !val.trim().is_empty() {
                self.stream.ffmpeg_path = val;
            }
        }

        if let Ok(val) = env::var("LOOPCAST_AUDIO_URL") {
            if !val.trim().is_empty() {
                self.stream.audio_url = val;
            }
        }

        if let Ok(val) = env::var("LOOPCAST_ENDPOINT") {
            if !val.trim().is_empty() {
                self.stream.endpoint = val;
            }
        }

        if let Ok(val) = env::var("LOOPCAST_STRATEGY") {
            if let Some(kind) = StrategyKind::parse(&val) {
                self.stream.strategy = kind;
            }
        }

        if let Ok(val) = env::var("LOOPCAST_VIDEO_PROFILE") {
            if let Some(profile) = VideoProfile::parse(&val) {
                self.video.profile = profile;
            }
        }

        if let Ok(val) = env::var("LOOPCAST_MAX_RESTART_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.process.max_restart_attempts = attempts;
            }
        }

        if let Ok(val) = env::var("LOOPCAST_RESTART_ON_ERROR") {
            if let Some(enabled) = parse_bool(&val) {
                self.process.restart_on_error = enabled;
            }
        }
    }

    /// Check value ranges. The transition name is deliberately not checked
    /// here; unknown names are substituted when the filter graph is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min_fps, max_fps) = FRAMERATE_RANGE;
        if self.video.framerate < min_fps || self.video.framerate > max_fps {
            return Err(ConfigError::Invalid(format!(
                "video.framerate must be within {}-{}, got {}",
                min_fps, max_fps, self.video.framerate
            )));
        }

        let (min_xf, max_xf) = CROSSFADE_RANGE;
        let crossfade = self.transition.crossfade_duration;
        if !crossfade.is_finite() || crossfade < min_xf || crossfade > max_xf {
            return Err(ConfigError::Invalid(format!(
                "transition.crossfade_duration must be within {}-{} seconds, got {}",
                min_xf, max_xf, crossfade
            )));
        }

        if self.video.dimensions().is_none() {
            return Err(ConfigError::Invalid(format!(
                "video.resolution must look like 1280x720, got '{}'",
                self.video.resolution
            )));
        }

        if self.stream.ffmpeg_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "stream.ffmpeg_path must not be empty".to_string(),
            ));
        }

        let durations = [
            ("transition.fade_in_duration", self.transition.fade_in_duration),
            ("transition.overlap_duration", self.transition.overlap_duration),
            ("transition.preload_duration", self.transition.preload_duration),
            ("process.termination_timeout", self.process.termination_timeout),
            ("process.restart_delay", self.process.restart_delay),
            ("process.spawn_probe_delay", self.process.spawn_probe_delay),
            ("process.monitor_interval", self.process.monitor_interval),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if self.process.monitor_interval == 0.0 {
            return Err(ConfigError::Invalid(
                "process.monitor_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests must not interleave
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("LOOPCAST_FFMPEG_PATH");
        env::remove_var("LOOPCAST_AUDIO_URL");
        env::remove_var("LOOPCAST_ENDPOINT");
        env::remove_var("LOOPCAST_STRATEGY");
        env::remove_var("LOOPCAST_VIDEO_PROFILE");
        env::remove_var("LOOPCAST_MAX_RESTART_ATTEMPTS");
        env::remove_var("LOOPCAST_RESTART_ON_ERROR");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            framerate in 1u32..=60,
            crossfade in 0.0f64..10.0,
            max_restarts in 0u32..16,
            restart_on_error in proptest::bool::ANY,
            width in 16u32..4096,
            height in 16u32..4096,
            nvenc in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[stream]
strategy = "persistent"

[video]
resolution = "{}x{}"
framerate = {}
profile = "{}"

[transition]
crossfade_duration = {}

[process]
max_restart_attempts = {}
restart_on_error = {}
"#,
                width,
                height,
                framerate,
                if nvenc { "nvenc" } else { "x264" },
                crossfade,
                max_restarts,
                restart_on_error
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.stream.strategy, StrategyKind::Persistent);
            prop_assert_eq!(config.video.dimensions(), Some((width, height)));
            prop_assert_eq!(config.video.framerate, framerate);
            prop_assert_eq!(
                config.video.profile,
                if nvenc { VideoProfile::Nvenc } else { VideoProfile::X264 }
            );
            prop_assert!((config.transition.crossfade_duration - crossfade).abs() < 1e-9);
            prop_assert_eq!(config.process.max_restart_attempts, max_restarts);
            prop_assert_eq!(config.process.restart_on_error, restart_on_error);
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_framerate_out_of_range_rejected(framerate in 61u32..1000) {
            let mut config = Config::default();
            config.video.framerate = framerate;
            prop_assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        #[test]
        fn prop_crossfade_out_of_range_rejected(crossfade in 10.001f64..1000.0) {
            let mut config = Config::default();
            config.transition.crossfade_duration = crossfade;
            prop_assert!(config.validate().is_err());
        }

        #[test]
        fn prop_env_overrides_max_restart_attempts(
            initial in 0u32..8,
            override_attempts in 0u32..64,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[process]
max_restart_attempts = {}
"#,
                initial
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("LOOPCAST_MAX_RESTART_ATTEMPTS", override_attempts.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.process.max_restart_attempts, override_attempts);
        }

        #[test]
        fn prop_env_overrides_restart_on_error(
            initial in proptest::bool::ANY,
            override_value in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[process]
restart_on_error = {}
"#,
                initial
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("LOOPCAST_RESTART_ON_ERROR", override_value.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.process.restart_on_error, override_value);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.stream.ffmpeg_path, "ffmpeg");
        assert_eq!(config.stream.strategy, StrategyKind::Handover);
        assert_eq!(config.stream.log_level, "info");
        assert_eq!(config.video.dimensions(), Some((1280, 720)));
        assert_eq!(config.video.framerate, 30);
        assert_eq!(config.video.profile, VideoProfile::X264);
        assert_eq!(config.video.effective_preset(), "veryfast");
        assert_eq!(config.video.effective_keyframe_interval(), 60);
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.transition.name, "fade");
        assert_eq!(config.process.termination_timeout(), Duration::from_secs(5));
        assert_eq!(config.process.max_restart_attempts, 3);
        assert!(config.process.restart_on_error);
        assert_eq!(config.status.bind, "127.0.0.1:7878");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[video]
profile = "nvenc"
bitrate = "6000k"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.video.profile, VideoProfile::Nvenc);
        assert_eq!(config.video.effective_preset(), "p4");
        assert_eq!(config.video.effective_buffer_size(), "12000k");
        assert_eq!(config.video.framerate, 30); // default
        assert!((config.transition.overlap_duration - 2.0).abs() < 1e-9); // default
    }

    #[test]
    fn test_buffer_size_from_oversized_bitrate() {
        let mut video = VideoConfig::default();
        video.bitrate = "18446744073709551615k".to_string();
        assert_eq!(video.effective_buffer_size(), "18446744073709551615k");

        video.bitrate = "9223372036854775807k".to_string();
        assert_eq!(video.effective_buffer_size(), "18446744073709551614k");

        video.bitrate = " 4500k ".to_string();
        assert_eq!(video.effective_buffer_size(), "9000k");
    }

    #[test]
    fn test_unknown_transition_name_is_not_a_validation_error() {
        let mut config = Config::default();
        config.transition.name = "spiral-of-doom".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_resolution_rejected() {
        let mut config = Config::default();
        config.video.resolution = "widescreen".to_string();
        assert!(config.validate().is_err());

        config.video.resolution = "0x720".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut config = Config::default();
        config.transition.overlap_duration = -1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap_duration"));
    }

    #[test]
    fn test_env_overrides_strategy_and_profile() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("LOOPCAST_STRATEGY", "persistent");
        env::set_var("LOOPCAST_VIDEO_PROFILE", "NVENC");
        env::set_var("LOOPCAST_ENDPOINT", "rtmp://example.invalid/live/key");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.stream.strategy, StrategyKind::Persistent);
        assert_eq!(config.video.profile, VideoProfile::Nvenc);
        assert_eq!(config.stream.endpoint, "rtmp://example.invalid/live/key");
    }

    #[test]
    fn test_invalid_env_values_keep_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("LOOPCAST_STRATEGY", "teleport");
        env::set_var("LOOPCAST_RESTART_ON_ERROR", "maybe");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.stream.strategy, StrategyKind::Handover);
        assert!(config.process.restart_on_error);
    }
}
