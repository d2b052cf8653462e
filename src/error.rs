// ================================
// src/error.rs - error types
// ================================
use thiserror::Error;

/// Reasons a range frame is rejected before it reaches the pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("range frame has no samples")]
    Empty,

    #[error("angle_increment must be finite and positive, got {0}")]
    InvalidIncrement(f32),

    #[error("angle bounds must be finite and ordered, got [{min}, {max}]")]
    InvalidBounds { min: f32, max: f32 },

    /// Sample count disagrees with what the angle metadata describes.
    #[error("frame has {actual} samples but angle metadata describes {expected:.1}")]
    InconsistentLength { expected: f32, actual: usize },

    /// Sample count differs from the sensor's configured N.
    #[error("frame has {actual} samples, sensor is configured for {expected}")]
    UnexpectedLength { expected: usize, actual: usize },
}

/// A parameter update that would leave the controller in an unusable state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("window_half_size must be at least 1")]
    ZeroWindow,

    /// `2 * window_half_size + 1` does not fit in a `usize`.
    #[error("window_half_size {0} is too large")]
    WindowTooLarge(usize),

    #[error("max_actionable_dist must be finite and positive, got {0}")]
    InvalidActionableDist(f32),

    #[error("throttle must be finite, got {0}")]
    InvalidThrottle(f32),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid tuning: {0}")]
    InvalidTuning(&'static str),

    #[error(transparent)]
    Param(#[from] ParamError),
}
