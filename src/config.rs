// ================================
// src/config.rs - constants and configuration
// ================================
use crate::error::{ConfigError, ParamError};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Environment variable naming the node configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "./gap_follow.toml";

// Control parameter defaults
pub const DEFAULT_THROTTLE: f32 = 0.2;
pub const DEFAULT_WINDOW_HALF: usize = 40;
pub const DEFAULT_DISPARITY_EXTENDER: usize = 50;
pub const DEFAULT_MAX_ACTIONABLE_DIST: f32 = 2.0;

/// Samples per frame of the reference sensor (0.333° resolution over 360°).
pub const NOMINAL_SAMPLES: usize = 1080;

/// Distance subtracted from every reading inside the disparity bubble.
pub const BUBBLE_PENALTY: f32 = 1.5;

/// Front corridor is [N·1/6, N·5/6), i.e. ±90° around straight ahead.
pub const CORRIDOR_START_NUM: usize = 1;
pub const CORRIDOR_END_NUM: usize = 5;
pub const CORRIDOR_DENOMINATOR: usize = 6;

/// Largest commandable steering value. 1.0 is the actuator's full lock, not an angle.
pub const STEERING_LIMIT: f32 = 1.0;

/// Turn-rate damping, checked in order; deltas beyond the last tier are not damped.
pub const DEFAULT_DAMPING_TIERS: [DampingTier; 3] = [
    DampingTier {
        max_delta: 5,
        scale: 0.3,
    },
    DampingTier {
        max_delta: 10,
        scale: 0.4,
    },
    DampingTier {
        max_delta: 15,
        scale: 0.5,
    },
];

pub const DEFAULT_REPLAY_RATE_HZ: f64 = 40.0;

/// The four live tunables. A frame always works on one copy of this struct.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ControlParameters {
    pub throttle: f32,
    #[serde(rename = "window_half_size")]
    pub window_half: usize,
    pub disparity_extender: usize,
    pub max_actionable_dist: f32,
}

impl Default for ControlParameters {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_THROTTLE,
            window_half: DEFAULT_WINDOW_HALF,
            disparity_extender: DEFAULT_DISPARITY_EXTENDER,
            max_actionable_dist: DEFAULT_MAX_ACTIONABLE_DIST,
        }
    }
}

impl ControlParameters {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.window_half == 0 {
            return Err(ParamError::ZeroWindow);
        }
        if self
            .window_half
            .checked_mul(2)
            .and_then(|w| w.checked_add(1))
            .is_none()
        {
            return Err(ParamError::WindowTooLarge(self.window_half));
        }
        if !self.max_actionable_dist.is_finite() || self.max_actionable_dist <= 0.0 {
            return Err(ParamError::InvalidActionableDist(self.max_actionable_dist));
        }
        if !self.throttle.is_finite() {
            return Err(ParamError::InvalidThrottle(self.throttle));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DampingTier {
    pub max_delta: usize,
    pub scale: f32,
}

/// Front corridor expressed as fractions of the frame length.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CorridorFractions {
    pub start_num: usize,
    pub end_num: usize,
    pub denominator: usize,
}

impl Default for CorridorFractions {
    fn default() -> Self {
        Self {
            start_num: CORRIDOR_START_NUM,
            end_num: CORRIDOR_END_NUM,
            denominator: CORRIDOR_DENOMINATOR,
        }
    }
}

impl CorridorFractions {
    /// Half-open index range `[start, end)` of the corridor for a frame of `len` samples.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let start = len * self.start_num / self.denominator;
        let end = len * self.end_num / self.denominator;
        (start, end)
    }
}

/// Algorithm constants. Every key is optional in the config file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Tuning {
    pub bubble_penalty: f32,
    pub corridor: CorridorFractions,
    pub damping_tiers: Vec<DampingTier>,
    pub steering_limit: f32,
    /// When set, frames with a different sample count are rejected.
    pub expected_samples: Option<usize>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            bubble_penalty: BUBBLE_PENALTY,
            corridor: CorridorFractions::default(),
            damping_tiers: DEFAULT_DAMPING_TIERS.to_vec(),
            steering_limit: STEERING_LIMIT,
            expected_samples: None,
        }
    }
}

impl Tuning {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let corridor = &self.corridor;
        if corridor.denominator == 0 {
            return Err(ConfigError::InvalidTuning("corridor denominator must be non-zero"));
        }
        if corridor.start_num >= corridor.end_num || corridor.end_num > corridor.denominator {
            return Err(ConfigError::InvalidTuning(
                "corridor fractions must satisfy start < end <= denominator",
            ));
        }
        if !self.bubble_penalty.is_finite() || self.bubble_penalty < 0.0 {
            return Err(ConfigError::InvalidTuning("bubble_penalty must be >= 0"));
        }
        if !self.steering_limit.is_finite() || self.steering_limit <= 0.0 {
            return Err(ConfigError::InvalidTuning("steering_limit must be > 0"));
        }
        if self
            .damping_tiers
            .windows(2)
            .any(|pair| pair[0].max_delta >= pair[1].max_delta)
        {
            return Err(ConfigError::InvalidTuning(
                "damping tiers must have strictly increasing max_delta",
            ));
        }
        if self.expected_samples == Some(0) {
            return Err(ConfigError::InvalidTuning("expected_samples must be non-zero"));
        }
        Ok(())
    }
}

/// Topic names for whichever transport feeds the controller.
///
/// `scan` and `parameters` are subscribed by the transport binding that pushes
/// into the frame queue and the [`ParameterStore`](crate::ParameterStore); this
/// crate only reports them. `steering` and `throttle` are published to.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Topics {
    /// Inbound range frames.
    pub scan: String,
    pub steering: String,
    pub throttle: String,
    /// Inbound parameter updates.
    pub parameters: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            scan: "/autodrive/f1tenth_1/lidar".to_string(),
            steering: "/autodrive/f1tenth_1/steering_command".to_string(),
            throttle: "/autodrive/f1tenth_1/throttle_command".to_string(),
            parameters: "gap_follow_params".to_string(),
        }
    }
}

/// Node configuration loaded from TOML
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub parameters: ControlParameters,
    pub tuning: Tuning,
    pub topics: Topics,
    /// Parameter update file, watched for changes.
    pub params_path: Option<PathBuf>,
    /// Recorded frames replayed by the node binary.
    pub scan_file: Option<PathBuf>,
    pub replay_rate_hz: f64,
    pub debug_mode: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            parameters: ControlParameters::default(),
            tuning: Tuning::default(),
            topics: Topics::default(),
            params_path: None,
            scan_file: None,
            replay_rate_hz: DEFAULT_REPLAY_RATE_HZ,
            debug_mode: false,
        }
    }
}

impl NodeConfig {
    /// Path from `CONFIG_PATH`, falling back to `./gap_follow.toml`.
    pub fn config_path() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
            .into()
    }

    /// Load the configuration named by `CONFIG_PATH`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_path(Self::config_path())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&config_str, &path.display().to_string())
    }

    pub fn from_toml_str(config_str: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig =
            toml::from_str(config_str).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;
        config.parameters.validate()?;
        config.tuning.validate()?;
        if !config.replay_rate_hz.is_finite() || config.replay_rate_hz <= 0.0 {
            return Err(ConfigError::InvalidTuning("replay_rate_hz must be > 0"));
        }
        Ok(config)
    }
}
