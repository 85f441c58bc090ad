//! Media conversion pipeline.
//!
//! - Signature sniffing and header inspection
//! - Still-image decoding, resizing and built-in encoders
//! - External tool registry with ordered fallback
//! - Byte-ceiling enforcement over parameter tiers
//! - Sticker/image encoding policy

mod constraint;
mod detection;
mod image;
mod optimize;
mod sticker;
pub(crate) mod toolchain;

pub use constraint::{Accepted, EncodeParams, SizeConstraintEnforcer};
pub use detection::{
    Format, MediaBlob, header_dimensions, is_animated_webp, is_video_envelope, sniff_format,
};
pub use self::image::{DecodedImage, decode, decode_and_fit, fit_dimensions};
pub use optimize::strip_webp_metadata;
pub use sticker::{
    BUILT_IN, Constraints, ConversionPath, ConversionRequest, ConversionResult, StickerEncoder,
    TargetKind,
};
pub use toolchain::{
    ConversionKind, ConversionTool, ExternalTool, Invocation, TOOL_REGISTRY, ToolDescriptor,
    ToolOutput, ToolchainRunner,
};
