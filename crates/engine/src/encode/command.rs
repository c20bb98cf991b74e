//! Encoder invocation builder
//!
//! Turns the encoding configuration plus the loop source(s) into the ordered
//! argument list of one broadcast encoder process. Pure and deterministic:
//! the same inputs always produce the same argv.

use crate::config::{Config, VideoProfile};
use crate::filter_graph::{FilterGraphBuilder, OUTPUT_LABEL};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for command construction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// A video input path was empty
    #[error("Source path must not be empty")]
    EmptySource,

    /// No audio feed URL was supplied
    #[error("Audio URL must not be empty")]
    EmptyAudioUrl,

    /// No publish endpoint was supplied
    #[error("Output endpoint must not be empty")]
    EmptyEndpoint,
}

/// Video inputs of one encoder process
#[derive(Debug, Clone, PartialEq)]
pub enum VideoInputs {
    /// One looping file, normalized and optionally faded in
    Single(PathBuf),
    /// Two slot aliases blended by the live crossfade
    Dual([PathBuf; 2]),
}

impl VideoInputs {
    fn paths(&self) -> Vec<&Path> {
        match self {
            VideoInputs::Single(path) => vec![path.as_path()],
            VideoInputs::Dual([a, b]) => vec![a.as_path(), b.as_path()],
        }
    }
}

/// Parameters for one encoder invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StreamCommandParams {
    pub video: VideoInputs,
    /// Network audio feed consumed directly by the encoder
    pub audio_url: String,
    /// Publish destination
    pub endpoint: String,
    /// Fade video and audio in from black/silence
    pub fade_in: bool,
}

impl StreamCommandParams {
    /// Single looping source
    pub fn single(
        source: impl Into<PathBuf>,
        audio_url: impl Into<String>,
        endpoint: impl Into<String>,
        fade_in: bool,
    ) -> Self {
        Self {
            video: VideoInputs::Single(source.into()),
            audio_url: audio_url.into(),
            endpoint: endpoint.into(),
            fade_in,
        }
    }

    /// Two slot aliases read by a persistent crossfading process
    pub fn dual(
        slots: [PathBuf; 2],
        audio_url: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            video: VideoInputs::Dual(slots),
            audio_url: audio_url.into(),
            endpoint: endpoint.into(),
            fade_in: false,
        }
    }

    /// Single-source params wired to the configured audio feed and endpoint
    pub fn from_config(cfg: &Config, source: impl Into<PathBuf>, fade_in: bool) -> Self {
        Self::single(source, &cfg.stream.audio_url, &cfg.stream.endpoint, fade_in)
    }
}

/// Build the encoder argv (program name excluded)
///
/// Order is fixed:
/// 1. global flags (banner, log level, native-rate read)
/// 2. looping video input(s) and the audio input
/// 3. explicit stream mapping
/// 4. video filter graph
/// 5. profile-specific encoder flags, then shared rate-control/GOP flags
/// 6. audio filter and encoder flags
/// 7. output format and destination
pub fn build_stream_args(
    cfg: &Config,
    params: &StreamCommandParams,
) -> Result<Vec<String>, CommandError> {
    let video_paths = params.video.paths();
    if video_paths.iter().any(|p| p.as_os_str().is_empty()) {
        return Err(CommandError::EmptySource);
    }
    if params.audio_url.trim().is_empty() {
        return Err(CommandError::EmptyAudioUrl);
    }
    if params.endpoint.trim().is_empty() {
        return Err(CommandError::EmptyEndpoint);
    }

    let mut args: Vec<String> = Vec::with_capacity(64);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    // Global flags
    push(&["-hide_banner"]);
    push(&["-loglevel", &format!("level+{}", cfg.stream.log_level)]);

    // Inputs: loops are read at native rate, repeat forever and have a
    // bounded packet queue. `-re` is per input.
    let queue = cfg.video.input_queue_size.to_string();
    for path in &video_paths {
        let path = path.to_string_lossy();
        push(&["-re", "-stream_loop", "-1", "-thread_queue_size", &queue, "-i", &path]);
    }
    push(&["-thread_queue_size", &queue, "-i", &params.audio_url]);
    let audio_index = video_paths.len();

    // Video filter graph
    let graphs = FilterGraphBuilder::new(cfg);
    let graph = match params.video {
        VideoInputs::Single(_) => graphs.single_input(0, params.fade_in),
        VideoInputs::Dual(_) => graphs.live_crossfade(0, 1),
    };
    push(&["-filter_complex", &graph]);

    // Explicit mapping: video from the graph, audio from the audio input
    push(&["-map", &format!("[{}]", OUTPUT_LABEL)]);
    push(&["-map", &format!("{}:a", audio_index)]);

    // Video encoder
    let video = &cfg.video;
    push(&["-c:v", video.profile.encoder()]);
    match video.profile {
        VideoProfile::X264 => {
            push(&["-preset", video.effective_preset(), "-tune", "zerolatency"]);
        }
        VideoProfile::Nvenc => {
            push(&["-preset", video.effective_preset(), "-rc", "vbr"]);
            push(&["-cq", &video.nvenc_cq.to_string()]);
        }
    }
    push(&["-profile:v", &video.h264_profile]);
    let gop = video.effective_keyframe_interval().to_string();
    push(&[
        "-b:v",
        &video.bitrate,
        "-maxrate",
        &video.bitrate,
        "-bufsize",
        &video.effective_buffer_size(),
        "-g",
        &gop,
        "-keyint_min",
        &gop,
    ]);

    // Audio
    let fade_in_secs = cfg.transition.fade_in_duration;
    if params.fade_in && fade_in_secs > 0.0 {
        push(&["-af", &format!("afade=t=in:st=0:d={}", fade_in_secs)]);
    }
    let audio = &cfg.audio;
    push(&[
        "-c:a",
        &audio.codec,
        "-b:a",
        &audio.bitrate,
        "-ar",
        &audio.sample_rate.to_string(),
    ]);

    // Output
    push(&["-f", &cfg.stream.output_format, &params.endpoint]);

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    /// Values following each `-i`, in order
    fn inputs(args: &[String]) -> Vec<String> {
        args.windows(2)
            .filter(|pair| pair[0] == "-i")
            .map(|pair| pair[1].clone())
            .collect()
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("missing {} in {:?}", flag, args))
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("/[a-zA-Z0-9_/.-]{1,50}").unwrap()
    }

    #[test]
    fn test_single_source_layout() {
        let cfg = Config::default();
        let params = StreamCommandParams::single(
            "/loops/a.mp4",
            "http://radio.local/stream",
            "rtmp://live.local/app/key",
            false,
        );
        let args = build_stream_args(&cfg, &params).unwrap();

        assert_eq!(&args[..3], &["-hide_banner", "-loglevel", "level+info"]);
        assert_eq!(&args[3..5], &["-re", "-stream_loop"]);
        assert_eq!(
            inputs(&args),
            vec!["/loops/a.mp4".to_string(), "http://radio.local/stream".to_string()]
        );
        assert!(has_flag_with_value(&args, "-stream_loop", "-1"));
        assert!(has_flag_with_value(&args, "-map", "[vout]"));
        assert!(has_flag_with_value(&args, "-map", "1:a"));
        assert!(has_flag_with_value(&args, "-c:v", "libx264"));
        assert!(has_flag_with_value(&args, "-tune", "zerolatency"));
        assert!(has_flag_with_value(&args, "-bufsize", "9000k"));
        assert!(has_flag_with_value(&args, "-g", "60"));
        assert!(!args.iter().any(|a| a == "-af"));
        assert_eq!(
            &args[args.len() - 3..],
            &["-f", "flv", "rtmp://live.local/app/key"]
        );
    }

    #[test]
    fn test_stage_order() {
        let cfg = Config::default();
        let params = StreamCommandParams::from_config(&cfg, "/loops/a.mp4", true);
        let args = build_stream_args(&cfg, &params).unwrap();

        let order = [
            position(&args, "-re"),
            position(&args, "-i"),
            position(&args, "-filter_complex"),
            position(&args, "-map"),
            position(&args, "-c:v"),
            position(&args, "-b:v"),
            position(&args, "-af"),
            position(&args, "-c:a"),
            position(&args, "-f"),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "order: {:?}", order);
    }

    #[test]
    fn test_fade_in_affects_video_and_audio() {
        let cfg = Config::default();
        let params = StreamCommandParams::from_config(&cfg, "/loops/a.mp4", true);
        let args = build_stream_args(&cfg, &params).unwrap();

        let graph = &args[position(&args, "-filter_complex") + 1];
        assert!(graph.contains("fade=t=in:st=0:d=1"));
        assert!(has_flag_with_value(&args, "-af", "afade=t=in:st=0:d=1"));
    }

    #[test]
    fn test_nvenc_profile_flags() {
        let mut cfg = Config::default();
        cfg.video.profile = VideoProfile::Nvenc;
        let params = StreamCommandParams::from_config(&cfg, "/loops/a.mp4", false);
        let args = build_stream_args(&cfg, &params).unwrap();

        assert!(has_flag_with_value(&args, "-c:v", "h264_nvenc"));
        assert!(has_flag_with_value(&args, "-preset", "p4"));
        assert!(has_flag_with_value(&args, "-rc", "vbr"));
        assert!(has_flag_with_value(&args, "-cq", "23"));
        assert!(!args.iter().any(|a| a == "zerolatency"));
    }

    #[test]
    fn test_dual_inputs_map_audio_third() {
        let cfg = Config::default();
        let params = StreamCommandParams::dual(
            [PathBuf::from("/tmp/slot_0.mp4"), PathBuf::from("/tmp/slot_1.mp4")],
            "http://radio.local/stream",
            "rtmp://live.local/app/key",
        );
        let args = build_stream_args(&cfg, &params).unwrap();

        assert_eq!(inputs(&args).len(), 3);
        assert!(has_flag_with_value(&args, "-map", "2:a"));

        // every looped input is read at native rate, the live audio is not
        let re_positions: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-re")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(re_positions.len(), 2);
        for i in re_positions {
            assert_eq!(args[i + 1], "-stream_loop");
        }
        let audio_input = args
            .windows(2)
            .position(|pair| pair[0] == "-i" && pair[1] == "http://radio.local/stream")
            .unwrap();
        assert!(!args[audio_input.saturating_sub(3)..audio_input].contains(&"-re".to_string()));
        let graph = &args[position(&args, "-filter_complex") + 1];
        assert!(graph.contains("xfade=transition=fade"));
    }

    #[test]
    fn test_empty_source_rejected() {
        let cfg = Config::default();
        let params = StreamCommandParams::from_config(&cfg, "", false);
        assert_eq!(
            build_stream_args(&cfg, &params),
            Err(CommandError::EmptySource)
        );
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let cfg = Config::default();
        let params = StreamCommandParams::single("/loops/a.mp4", "http://a", " ", false);
        assert_eq!(
            build_stream_args(&cfg, &params),
            Err(CommandError::EmptyEndpoint)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_build_never_errors_for_valid_config(
            source in path_strategy(),
            framerate in 1u32..=60,
            crossfade in 0.0f64..=10.0,
            nvenc in proptest::bool::ANY,
            fade_in in proptest::bool::ANY,
        ) {
            let mut cfg = Config::default();
            cfg.video.framerate = framerate;
            cfg.transition.crossfade_duration = crossfade;
            cfg.video.profile = if nvenc { VideoProfile::Nvenc } else { VideoProfile::X264 };
            prop_assert!(cfg.validate().is_ok());

            let params = StreamCommandParams::from_config(&cfg, &source, fade_in);
            let args = build_stream_args(&cfg, &params);
            prop_assert!(args.is_ok());
            let args = args.unwrap();

            // exactly one -i per declared input, in declared order
            prop_assert_eq!(
                inputs(&args),
                vec![source.clone(), cfg.stream.audio_url.clone()]
            );
            let fps_filter = format!("fps={}", framerate);
            prop_assert!(args.iter().any(|a| a.contains(&fps_filter)));
        }

        #[test]
        fn prop_build_is_deterministic(
            first in path_strategy(),
            second in path_strategy(),
        ) {
            let cfg = Config::default();
            let params = StreamCommandParams::dual(
                [PathBuf::from(&first), PathBuf::from(&second)],
                "http://radio.local/stream",
                "rtmp://live.local/app/key",
            );
            let a = build_stream_args(&cfg, &params).unwrap();
            let b = build_stream_args(&cfg, &params).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(
                inputs(&a),
                vec![first, second, "http://radio.local/stream".to_string()]
            );
        }
    }
}
