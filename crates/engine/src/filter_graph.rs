//! Video filter-graph construction
//!
//! Produces the `-filter_complex` description for either a single looping
//! input (normalize only) or two slot inputs blended with a named crossfade.
//! Stateless besides the configuration it was built from.

use crate::config::Config;
use tracing::warn;

/// Transition used when the configured name is not recognised
pub const DEFAULT_TRANSITION: &str = "fade";

/// Label of the graph's final video pad, mapped into the output
pub const OUTPUT_LABEL: &str = "vout";

/// Transition curves accepted by the crossfade combinator
pub const TRANSITIONS: &[&str] = &[
    "fade", "fadeblack", "fadewhite", "fadegrays", "dissolve", "distance",
    "wipeleft", "wiperight", "wipeup", "wipedown",
    "slideleft", "slideright", "slideup", "slidedown",
    "smoothleft", "smoothright", "smoothup", "smoothdown",
    "circlecrop", "rectcrop", "circleopen", "circleclose",
    "vertopen", "vertclose", "horzopen", "horzclose",
    "radial", "pixelize", "diagtl", "diagtr", "diagbl", "diagbr",
    "hlslice", "hrslice", "vuslice", "vdslice", "hblur",
    "squeezeh", "squeezev", "zoomin",
];

/// Whether `name` is in the transition allow-list
pub fn is_known_transition(name: &str) -> bool {
    TRANSITIONS.contains(&name)
}

/// Offset at which to start a transition so that it finishes `overlap_before_end`
/// seconds before the end of a track. Never negative.
pub fn estimate_transition_offset(track_duration: f64, overlap_before_end: f64) -> f64 {
    let offset = track_duration - overlap_before_end;
    if offset.is_finite() && offset > 0.0 {
        offset
    } else {
        0.0
    }
}

/// Outcome of checking the configured transition name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionCheck {
    /// The configured name is in the allow-list and is used as-is
    Accepted(String),
    /// The configured name was unknown and replaced with the default
    Substituted { requested: String, used: String },
}

/// Builds video filter graphs from an immutable configuration
#[derive(Debug, Clone)]
pub struct FilterGraphBuilder {
    width: u32,
    height: u32,
    framerate: u32,
    pixel_format: String,
    transition: String,
    requested_transition: String,
    crossfade_duration: f64,
    fade_in_duration: f64,
}

impl FilterGraphBuilder {
    /// Create a builder; an unknown transition is replaced with
    /// [`DEFAULT_TRANSITION`] and the substitution is logged.
    pub fn new(cfg: &Config) -> Self {
        let (width, height) = cfg.video.dimensions().unwrap_or((1280, 720));
        let requested = cfg.transition.name.trim().to_string();
        let transition = if is_known_transition(&requested) {
            requested.clone()
        } else {
            warn!(
                requested = %requested,
                fallback = DEFAULT_TRANSITION,
                "unknown transition, substituting default"
            );
            DEFAULT_TRANSITION.to_string()
        };

        Self {
            width,
            height,
            framerate: cfg.video.framerate,
            pixel_format: cfg.video.pixel_format.clone(),
            transition,
            requested_transition: requested,
            crossfade_duration: cfg.transition.crossfade_duration.max(0.0),
            fade_in_duration: cfg.transition.fade_in_duration.max(0.0),
        }
    }

    /// The transition actually used in crossfade graphs
    pub fn transition(&self) -> &str {
        &self.transition
    }

    /// Report whether a substitution happened at construction time
    pub fn validate_transition(&self) -> TransitionCheck {
        if self.transition == self.requested_transition {
            TransitionCheck::Accepted(self.transition.clone())
        } else {
            TransitionCheck::Substituted {
                requested: self.requested_transition.clone(),
                used: self.transition.clone(),
            }
        }
    }

    /// Per-input normalization chain: reset timestamps, optional fade-in,
    /// scale, pixel format, fps.
    fn normalize_chain(&self, fade_in: bool) -> String {
        let mut filters = vec!["setpts=PTS-STARTPTS".to_string()];
        if fade_in && self.fade_in_duration > 0.0 {
            filters.push(format!("fade=t=in:st=0:d={}", self.fade_in_duration));
        }
        filters.push(format!("scale={}:{}", self.width, self.height));
        filters.push(format!("format={}", self.pixel_format));
        filters.push(format!("fps={}", self.framerate));
        filters.join(",")
    }

    /// Single-input graph: `[N:v]<normalize>[vout]`
    pub fn single_input(&self, input_index: usize, fade_in: bool) -> String {
        format!(
            "[{}:v]{}[{}]",
            input_index,
            self.normalize_chain(fade_in),
            OUTPUT_LABEL
        )
    }

    /// Dual-input graph: both inputs normalized independently, then blended
    /// with the configured transition starting at `offset` seconds.
    pub fn crossfade(&self, first_input: usize, second_input: usize, offset: f64) -> String {
        let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
        let chain = self.normalize_chain(false);
        format!(
            "[{a}:v]{chain}[v0];[{b}:v]{chain}[v1];[v0][v1]xfade=transition={t}:duration={d}:offset={o}[{out}]",
            a = first_input,
            b = second_input,
            chain = chain,
            t = self.transition,
            d = self.crossfade_duration,
            o = offset,
            out = OUTPUT_LABEL
        )
    }

    /// Crossfade graph used by the persistent pipeline.
    ///
    /// `xfade` runs once at offset 0, when the encoder starts. After the
    /// first `crossfade_duration` seconds the output shows `second_input`
    /// only, so later slot flips are not blended. A switch that lands in
    /// `first_input` replaces a slot that is no longer on screen and stays
    /// invisible until the next switch or restart.
    pub fn live_crossfade(&self, first_input: usize, second_input: usize) -> String {
        self.crossfade(first_input, second_input, 0.0)
    }
}
