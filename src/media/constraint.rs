//! Byte-ceiling enforcement across deterministic parameter tiers.

use std::future::Future;
use std::time::Duration;

use crate::config::EncodeConfig;
use crate::error::MediaError;

/// Dimensions tried by the built-in lossless encoder, largest first.
const BUILTIN_LADDER: [u32; 5] = [512, 480, 384, 320, 256];

/// Parameters for one encoding attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeParams {
    pub quality: u8,
    pub max_dimension: u32,
    pub max_fps: u32,
    pub max_duration: Duration,
}

impl EncodeParams {
    /// First-attempt parameters.
    pub fn from_config(config: &EncodeConfig) -> Self {
        Self {
            quality: config.quality,
            max_dimension: config.max_dimension,
            max_fps: config.max_fps,
            max_duration: config.max_video_duration,
        }
    }

    /// Parameters for the single degraded retry.
    pub fn degraded(config: &EncodeConfig) -> Self {
        Self {
            quality: config.degraded_quality,
            max_dimension: config.degraded_dimension,
            max_fps: config.degraded_fps,
            max_duration: config.max_video_duration,
        }
    }
}

/// An attempt that fit under the ceiling.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub data: Vec<u8>,
    pub params: EncodeParams,
    /// Number of attempts made, including the accepted one.
    pub attempts: usize,
}

/// Re-runs an encoding step with progressively cheaper parameters until the
/// output fits `max_bytes`.
#[derive(Debug, Clone)]
pub struct SizeConstraintEnforcer {
    max_bytes: usize,
    tiers: Vec<EncodeParams>,
}

impl SizeConstraintEnforcer {
    /// Build an enforcer over explicit tiers, tried in order.
    pub fn new(max_bytes: usize, tiers: Vec<EncodeParams>) -> Self {
        Self { max_bytes, tiers }
    }

    /// Default tier then degraded tier, for lossy tool output.
    pub fn from_config(config: &EncodeConfig) -> Self {
        let first = EncodeParams::from_config(config);
        let degraded = EncodeParams::degraded(config);
        let tiers = if degraded == first {
            vec![first]
        } else {
            vec![first, degraded]
        };
        Self::new(config.max_bytes, tiers)
    }

    /// Shrinking dimensions for the built-in lossless encoder, where quality
    /// has no effect.
    pub fn builtin_ladder(config: &EncodeConfig) -> Self {
        let first = EncodeParams::from_config(config);
        let mut dims: Vec<u32> = std::iter::once(config.max_dimension)
            .chain(std::iter::once(config.degraded_dimension))
            .chain(BUILTIN_LADDER)
            .filter(|dim| *dim <= config.max_dimension)
            .collect();
        dims.sort_unstable_by(|a, b| b.cmp(a));
        dims.dedup();

        let tiers = dims
            .into_iter()
            .map(|max_dimension| EncodeParams {
                max_dimension,
                ..first
            })
            .collect();
        Self::new(config.max_bytes, tiers)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn tiers(&self) -> &[EncodeParams] {
        &self.tiers
    }

    /// Run `attempt` once per tier until its output fits.
    ///
    /// Errors from `attempt` are returned immediately; only oversize output
    /// moves on to the next tier.
    pub async fn enforce<F, Fut>(&self, mut attempt: F) -> Result<Accepted, MediaError>
    where
        F: FnMut(EncodeParams) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, MediaError>>,
    {
        let mut last_size = None;
        for (idx, params) in self.tiers.iter().copied().enumerate() {
            let data = attempt(params).await?;
            if data.len() <= self.max_bytes {
                return Ok(Accepted {
                    data,
                    params,
                    attempts: idx + 1,
                });
            }
            tracing::debug!(
                size = data.len(),
                max = self.max_bytes,
                quality = params.quality,
                bound = params.max_dimension,
                "Output over size ceiling, retrying with next tier"
            );
            last_size = Some(data.len());
        }

        match last_size {
            Some(size) => Err(MediaError::SizeConstraintExceeded {
                size,
                max: self.max_bytes,
            }),
            None => Err(MediaError::Encode {
                reason: "no encoding tiers configured".to_string(),
            }),
        }
    }
}
