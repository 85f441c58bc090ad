//! Runtime configuration.
//!
//! Values come from `STICKERBOT_*` environment variables (a `.env` file is
//! honoured through `dotenvy`), falling back to the defaults below.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Sticker bounding box in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 512;
/// Upload size ceiling for stickers.
pub const DEFAULT_MAX_BYTES: usize = 500 * 1024;
/// Maximum number of in-flight dispatcher tasks.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;

/// Encoding parameters shared by the conversion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeConfig {
    /// Square bounding box for output dimensions.
    pub max_dimension: u32,
    /// Byte ceiling for accepted output.
    pub max_bytes: usize,
    /// Quality for the first attempt (1-100).
    pub quality: u8,
    /// Quality for the degraded retry tier.
    pub degraded_quality: u8,
    /// Bounding box for the degraded retry tier.
    pub degraded_dimension: u32,
    /// Frame-rate cap for animated output.
    pub max_fps: u32,
    /// Frame-rate cap for the degraded retry tier.
    pub degraded_fps: u32,
    /// Longest stretch of a video source that is converted.
    pub max_video_duration: Duration,
    /// Deadline for a single external tool invocation.
    pub tool_timeout: Duration,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_bytes: DEFAULT_MAX_BYTES,
            quality: 75,
            degraded_quality: 50,
            degraded_dimension: 480,
            max_fps: 15,
            degraded_fps: 12,
            max_video_duration: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Capacity of the concurrency gate.
    pub max_in_flight: usize,
    /// Deadline for handling one inbound event end to end.
    pub task_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            task_timeout: Duration::from_secs(120),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub encode: EncodeConfig,
    pub dispatch: DispatchConfig,
    /// Directory where the local messenger stores uploaded media.
    pub outbox: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encode: EncodeConfig::default(),
            dispatch: DispatchConfig::default(),
            outbox: PathBuf::from("outbox"),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let encode = EncodeConfig {
            max_dimension: parse_var(
                &lookup,
                "STICKERBOT_MAX_DIMENSION",
                defaults.encode.max_dimension,
            )?,
            max_bytes: parse_var(&lookup, "STICKERBOT_MAX_BYTES", defaults.encode.max_bytes)?,
            quality: parse_var(&lookup, "STICKERBOT_QUALITY", defaults.encode.quality)?,
            degraded_quality: parse_var(
                &lookup,
                "STICKERBOT_DEGRADED_QUALITY",
                defaults.encode.degraded_quality,
            )?,
            degraded_dimension: parse_var(
                &lookup,
                "STICKERBOT_DEGRADED_DIMENSION",
                defaults.encode.degraded_dimension,
            )?,
            max_fps: parse_var(&lookup, "STICKERBOT_MAX_FPS", defaults.encode.max_fps)?,
            degraded_fps: parse_var(
                &lookup,
                "STICKERBOT_DEGRADED_FPS",
                defaults.encode.degraded_fps,
            )?,
            max_video_duration: Duration::from_secs(parse_var(
                &lookup,
                "STICKERBOT_MAX_VIDEO_SECS",
                defaults.encode.max_video_duration.as_secs(),
            )?),
            tool_timeout: Duration::from_secs(parse_var(
                &lookup,
                "STICKERBOT_TOOL_TIMEOUT_SECS",
                defaults.encode.tool_timeout.as_secs(),
            )?),
        };
        let dispatch = DispatchConfig {
            max_in_flight: parse_var(
                &lookup,
                "STICKERBOT_MAX_IN_FLIGHT",
                defaults.dispatch.max_in_flight,
            )?,
            task_timeout: Duration::from_secs(parse_var(
                &lookup,
                "STICKERBOT_TASK_TIMEOUT_SECS",
                defaults.dispatch.task_timeout.as_secs(),
            )?),
        };
        let outbox = lookup("STICKERBOT_OUTBOX")
            .map(PathBuf::from)
            .unwrap_or(defaults.outbox);

        let config = Self {
            encode,
            dispatch,
            outbox,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.dispatch.max_in_flight == 0 {
            return Err(invalid("STICKERBOT_MAX_IN_FLIGHT", "must be at least 1"));
        }
        if self.encode.max_dimension == 0 {
            return Err(invalid("STICKERBOT_MAX_DIMENSION", "must be at least 1"));
        }
        if self.encode.max_bytes == 0 {
            return Err(invalid("STICKERBOT_MAX_BYTES", "must be at least 1"));
        }
        for (key, quality) in [
            ("STICKERBOT_QUALITY", self.encode.quality),
            ("STICKERBOT_DEGRADED_QUALITY", self.encode.degraded_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(invalid(key, "must be between 1 and 100"));
            }
        }
        if self.encode.degraded_dimension == 0
            || self.encode.degraded_dimension > self.encode.max_dimension
        {
            return Err(invalid(
                "STICKERBOT_DEGRADED_DIMENSION",
                "must be between 1 and STICKERBOT_MAX_DIMENSION",
            ));
        }
        if self.encode.max_fps == 0 || self.encode.degraded_fps == 0 {
            return Err(invalid("STICKERBOT_MAX_FPS", "frame rates must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.encode.max_dimension, 512);
        assert_eq!(config.encode.max_bytes, 500 * 1024);
        assert_eq!(config.dispatch.max_in_flight, 20);
    }

    #[test]
    fn test_overrides_from_env() {
        let config = Config::from_lookup(lookup_from(&[
            ("STICKERBOT_MAX_IN_FLIGHT", "50"),
            ("STICKERBOT_QUALITY", "80"),
            ("STICKERBOT_TOOL_TIMEOUT_SECS", "5"),
            ("STICKERBOT_OUTBOX", "/tmp/out"),
        ]))
        .unwrap();
        assert_eq!(config.dispatch.max_in_flight, 50);
        assert_eq!(config.encode.quality, 80);
        assert_eq!(config.encode.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.outbox, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_blank_value_uses_default() {
        let config = Config::from_lookup(lookup_from(&[("STICKERBOT_QUALITY", "  ")])).unwrap();
        assert_eq!(config.encode.quality, 75);
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let err =
            Config::from_lookup(lookup_from(&[("STICKERBOT_MAX_BYTES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("STICKERBOT_MAX_BYTES"));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err =
            Config::from_lookup(lookup_from(&[("STICKERBOT_MAX_IN_FLIGHT", "0")])).unwrap_err();
        assert!(err.to_string().contains("STICKERBOT_MAX_IN_FLIGHT"));
    }

    #[test]
    fn test_quality_out_of_range_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("STICKERBOT_DEGRADED_QUALITY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("between 1 and 100"));
    }

    #[test]
    fn test_degraded_dimension_above_bound_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("STICKERBOT_DEGRADED_DIMENSION", "600")]))
            .unwrap_err();
        assert!(err.to_string().contains("STICKERBOT_DEGRADED_DIMENSION"));
    }
}
