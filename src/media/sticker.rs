//! Sticker and image encoding policy.
//!
//! [`StickerEncoder`] picks a conversion path for each request:
//!
//! - **pass-through** for WebP that already fits the limits (metadata is
//!   stripped, pixels are untouched). Animated WebP only passes through when
//!   an animated sticker is wanted.
//! - **animated** for GIF and video sources when an animated sticker is
//!   wanted, degrading to a still sticker from the first frame
//! - **static** for everything else, through the external tools first and the
//!   built-in lossless encoder last
//!
//! The `/toimg` direction produces PNG.

use std::str::FromStr;
use std::sync::Arc;

use crate::config::EncodeConfig;
use crate::error::MediaError;
use crate::media::constraint::{EncodeParams, SizeConstraintEnforcer};
use crate::media::detection::{
    Format, MediaBlob, header_dimensions, is_animated_webp, sniff_format,
};
use crate::media::image::{DecodedImage, decode_and_fit};
use crate::media::optimize::strip_webp_metadata;
use crate::media::toolchain::{ConversionKind, ToolchainRunner};

/// Tool name reported for output produced in-process.
pub const BUILT_IN: &str = "built-in";

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    StaticSticker,
    AnimatedSticker,
    /// Plain PNG image.
    Image,
}

impl TargetKind {
    /// Sticker target matching the source: animated when it can move.
    pub fn sticker_for(blob: &MediaBlob) -> Self {
        if blob.is_animated() {
            Self::AnimatedSticker
        } else {
            Self::StaticSticker
        }
    }

    pub fn is_sticker(&self) -> bool {
        !matches!(self, Self::Image)
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaticSticker => write!(f, "static"),
            Self::AnimatedSticker => write!(f, "animated"),
            Self::Image => write!(f, "image"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" | "sticker" => Ok(Self::StaticSticker),
            "animated" => Ok(Self::AnimatedSticker),
            "image" | "png" => Ok(Self::Image),
            other => Err(format!(
                "unknown target '{other}', expected static, animated or image"
            )),
        }
    }
}

/// Output limits for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub max_dimension: u32,
    pub max_bytes: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::from(&EncodeConfig::default())
    }
}

impl From<&EncodeConfig> for Constraints {
    fn from(config: &EncodeConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            max_bytes: config.max_bytes,
        }
    }
}

/// A single conversion job.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: MediaBlob,
    pub target: TargetKind,
    pub constraints: Constraints,
}

impl ConversionRequest {
    pub fn new(source: MediaBlob, target: TargetKind) -> Self {
        Self {
            source,
            target,
            constraints: Constraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPath {
    PassThrough,
    Static,
    Animated,
    Image,
}

impl std::fmt::Display for ConversionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PassThrough => write!(f, "pass-through"),
            Self::Static => write!(f, "static"),
            Self::Animated => write!(f, "animated"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// A converted sticker or image.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub is_animated: bool,
    /// Tool that produced the bytes, or [`BUILT_IN`].
    pub tool: String,
    pub dimensions: (u32, u32),
    pub path: ConversionPath,
}

impl ConversionResult {
    /// File extension matching the output mimetype.
    pub fn extension(&self) -> &'static str {
        sniff_format(&self.data, None).extension()
    }

    fn from_bytes(data: Vec<u8>, tool: impl Into<String>, path: ConversionPath) -> Self {
        let format = sniff_format(&data, None);
        Self {
            is_animated: format == Format::WebP && is_animated_webp(&data),
            mime_type: format.mime_type(),
            dimensions: header_dimensions(&data).unwrap_or((0, 0)),
            tool: tool.into(),
            path,
            data,
        }
    }
}

/// Converts media according to a [`ConversionRequest`].
#[derive(Clone)]
pub struct StickerEncoder {
    config: EncodeConfig,
    runner: ToolchainRunner,
}

impl StickerEncoder {
    pub fn new(config: EncodeConfig, runner: ToolchainRunner) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &EncodeConfig {
        &self.config
    }

    pub fn runner(&self) -> &ToolchainRunner {
        &self.runner
    }

    /// Request with this encoder's configured limits.
    pub fn request(&self, source: MediaBlob, target: TargetKind) -> ConversionRequest {
        ConversionRequest::new(source, target).with_constraints(Constraints::from(&self.config))
    }

    /// Run a conversion.
    ///
    /// Tool failures are recovered internally. Errors surface only for
    /// sources that cannot be decoded, unsupported formats, and output that
    /// cannot be brought under the byte ceiling.
    pub async fn encode(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionResult, MediaError> {
        let config = self.effective_config(&request.constraints);
        let blob = &request.source;
        tracing::debug!(
            format = %blob.format(),
            target = %request.target,
            bytes = blob.len(),
            dimensions = ?blob.dimensions(),
            "Encoding media"
        );

        let result = match (request.target, blob.format()) {
            (_, Format::Unknown) => {
                return Err(MediaError::UnsupportedFormat {
                    format: blob.format().to_string(),
                });
            }
            (TargetKind::Image, _) => self.image(blob, &config).await?,
            (target, Format::WebP) if passes_through(blob, target, &request.constraints) => {
                pass_through(blob)
            }
            (TargetKind::AnimatedSticker, Format::Gif | Format::Video) => {
                self.animated(blob, &config).await?
            }
            _ => self.static_sticker(blob, &config).await?,
        };

        check_limits(&result, &request.constraints)?;
        tracing::info!(
            path = %result.path,
            tool = %result.tool,
            bytes = result.data.len(),
            width = result.dimensions.0,
            height = result.dimensions.1,
            animated = result.is_animated,
            "Conversion finished"
        );
        Ok(result)
    }

    fn effective_config(&self, constraints: &Constraints) -> EncodeConfig {
        let mut config = self.config.clone();
        config.max_dimension = constraints.max_dimension;
        config.max_bytes = constraints.max_bytes;
        config.degraded_dimension = config.degraded_dimension.min(constraints.max_dimension);
        config
    }

    async fn animated(
        &self,
        blob: &MediaBlob,
        config: &EncodeConfig,
    ) -> Result<ConversionResult, MediaError> {
        let kind = if blob.format() == Format::Gif {
            ConversionKind::GifToWebp
        } else {
            ConversionKind::VideoToWebp
        };
        let enforcer = SizeConstraintEnforcer::from_config(config);
        match self
            .runner
            .convert(kind, blob.data(), blob.dimensions(), &enforcer)
            .await
        {
            Ok(output) => Ok(ConversionResult::from_bytes(
                output.data,
                output.tool,
                ConversionPath::Animated,
            )),
            Err(e) => {
                tracing::warn!(
                    %kind,
                    error = %e,
                    "Animated conversion failed, using first frame"
                );
                self.static_sticker(blob, config).await
            }
        }
    }

    async fn static_sticker(
        &self,
        blob: &MediaBlob,
        config: &EncodeConfig,
    ) -> Result<ConversionResult, MediaError> {
        let image = Arc::new(self.first_frame(blob, config).await?);
        let prepared = {
            let image = Arc::clone(&image);
            blocking(move || image.encode_png()).await?
        };

        let enforcer = SizeConstraintEnforcer::from_config(config);
        match self
            .runner
            .convert(
                ConversionKind::StillToWebp,
                &prepared,
                Some(image.dimensions()),
                &enforcer,
            )
            .await
        {
            Ok(output) => {
                return Ok(ConversionResult::from_bytes(
                    output.data,
                    output.tool,
                    ConversionPath::Static,
                ));
            }
            Err(MediaError::ToolUnavailable { .. }) => {
                tracing::debug!("No external WebP encoder, using built-in encoder");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "External WebP encoding failed, using built-in encoder"
                );
            }
        }

        let data = builtin_encode(image, config, Format::WebP).await?;
        Ok(ConversionResult::from_bytes(data, BUILT_IN, ConversionPath::Static))
    }

    async fn image(
        &self,
        blob: &MediaBlob,
        config: &EncodeConfig,
    ) -> Result<ConversionResult, MediaError> {
        if blob.format() == Format::WebP {
            let enforcer = SizeConstraintEnforcer::from_config(config);
            match self
                .runner
                .convert(
                    ConversionKind::WebpToPng,
                    blob.data(),
                    blob.dimensions(),
                    &enforcer,
                )
                .await
            {
                Ok(output) => {
                    return Ok(ConversionResult::from_bytes(
                        output.data,
                        output.tool,
                        ConversionPath::Image,
                    ));
                }
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        "External WebP decoder unusable, using built-in decoder"
                    );
                }
            }
        }

        let image = Arc::new(self.first_frame(blob, config).await?);
        let data = builtin_encode(image, config, Format::Png).await?;
        Ok(ConversionResult::from_bytes(data, BUILT_IN, ConversionPath::Image))
    }

    /// Decode a still frame fitted to the bounding box.
    async fn first_frame(
        &self,
        blob: &MediaBlob,
        config: &EncodeConfig,
    ) -> Result<DecodedImage, MediaError> {
        let bound = config.max_dimension;
        let (data, format) = match blob.format() {
            Format::Video => {
                let frame_enforcer = SizeConstraintEnforcer::new(
                    usize::MAX,
                    vec![EncodeParams::from_config(config)],
                );
                let frame = self
                    .runner
                    .convert(ConversionKind::VideoFrame, blob.data(), None, &frame_enforcer)
                    .await?;
                (frame.data, Format::Png)
            }
            Format::Unknown => {
                return Err(MediaError::UnsupportedFormat {
                    format: blob.format().to_string(),
                });
            }
            format => (blob.data().to_vec(), format),
        };
        blocking(move || decode_and_fit(&data, format, bound)).await
    }
}

/// A compliant WebP is sent as is, unless it moves and a still sticker was asked for.
fn passes_through(blob: &MediaBlob, target: TargetKind, constraints: &Constraints) -> bool {
    let bound = constraints.max_dimension;
    let fits = blob.len() <= constraints.max_bytes
        && blob
            .dimensions()
            .is_some_and(|(w, h)| w > 0 && h > 0 && w <= bound && h <= bound);
    fits && (!blob.is_animated() || target == TargetKind::AnimatedSticker)
}

fn pass_through(blob: &MediaBlob) -> ConversionResult {
    let data = match strip_webp_metadata(blob.data()) {
        Ok(stripped) if stripped.len() <= blob.len() => stripped,
        Ok(_) => blob.data().to_vec(),
        Err(e) => {
            tracing::debug!(error = %e, "WebP metadata strip failed, passing original through");
            blob.data().to_vec()
        }
    };
    ConversionResult::from_bytes(data, BUILT_IN, ConversionPath::PassThrough)
}

/// Encode with the built-in encoders over the shrinking dimension ladder.
async fn builtin_encode(
    image: Arc<DecodedImage>,
    config: &EncodeConfig,
    output: Format,
) -> Result<Vec<u8>, MediaError> {
    let enforcer = SizeConstraintEnforcer::builtin_ladder(config);
    let accepted = enforcer
        .enforce(|params| {
            let image = Arc::clone(&image);
            async move {
                blocking(move || {
                    let fitted = image.fit_to_square(params.max_dimension);
                    match output {
                        Format::Png => fitted.encode_png(),
                        _ => fitted.encode_lossless_webp(),
                    }
                })
                .await
            }
        })
        .await?;
    tracing::debug!(
        format = %output,
        bytes = accepted.data.len(),
        bound = accepted.params.max_dimension,
        attempts = accepted.attempts,
        "Built-in encoder output accepted"
    );
    Ok(accepted.data)
}

async fn blocking<T, F>(work: F) -> Result<T, MediaError>
where
    F: FnOnce() -> Result<T, MediaError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MediaError::Encode {
            reason: format!("blocking task failed: {e}"),
        })?
}

fn check_limits(result: &ConversionResult, constraints: &Constraints) -> Result<(), MediaError> {
    if result.data.len() > constraints.max_bytes {
        return Err(MediaError::SizeConstraintExceeded {
            size: result.data.len(),
            max: constraints.max_bytes,
        });
    }
    let (w, h) = result.dimensions;
    if w == 0 || h == 0 || w > constraints.max_dimension || h > constraints.max_dimension {
        return Err(MediaError::Encode {
            reason: format!(
                "output {w}x{h} outside {0}x{0} bound",
                constraints.max_dimension
            ),
        });
    }
    if sniff_format(&result.data, None).mime_type() != result.mime_type {
        return Err(MediaError::Encode {
            reason: "output signature does not match its mimetype".to_string(),
        });
    }
    Ok(())
}
