//! External conversion tools and the ordered fallback chain.
//!
//! Tools are described as data in [`TOOL_REGISTRY`]. For every
//! [`ConversionKind`] the runner tries the installed candidates in
//! registration order and stops at the first one whose output passes
//! validation and fits the byte ceiling.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MediaError, ToolError};
use crate::media::constraint::{EncodeParams, SizeConstraintEnforcer};
use crate::media::detection::{Format, header_dimensions, sniff_format};
use crate::media::image::fit_dimensions;

/// A conversion an external tool can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    /// Still image (prepared PNG) to WebP.
    StillToWebp,
    /// GIF to animated WebP.
    GifToWebp,
    /// Video to animated WebP.
    VideoToWebp,
    /// First video frame to PNG.
    VideoFrame,
    /// WebP sticker to PNG.
    WebpToPng,
}

impl std::fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StillToWebp => write!(f, "still-to-webp"),
            Self::GifToWebp => write!(f, "gif-to-webp"),
            Self::VideoToWebp => write!(f, "video-to-webp"),
            Self::VideoFrame => write!(f, "video-frame"),
            Self::WebpToPng => write!(f, "webp-to-png"),
        }
    }
}

impl ConversionKind {
    pub const ALL: [ConversionKind; 5] = [
        ConversionKind::StillToWebp,
        ConversionKind::GifToWebp,
        ConversionKind::VideoToWebp,
        ConversionKind::VideoFrame,
        ConversionKind::WebpToPng,
    ];

    /// Format of the file handed to the tool.
    pub fn input_format(&self) -> Format {
        match self {
            Self::StillToWebp => Format::Png,
            Self::GifToWebp => Format::Gif,
            Self::VideoToWebp | Self::VideoFrame => Format::Video,
            Self::WebpToPng => Format::WebP,
        }
    }

    /// Format the tool must produce.
    pub fn output_format(&self) -> Format {
        match self {
            Self::StillToWebp | Self::GifToWebp | Self::VideoToWebp => Format::WebP,
            Self::VideoFrame | Self::WebpToPng => Format::Png,
        }
    }
}

/// One tool invocation: paths inside a per-attempt scratch directory plus
/// the parameters of the current size tier.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub kind: ConversionKind,
    pub input: &'a Path,
    pub output: &'a Path,
    pub params: EncodeParams,
    /// Target size when the source is larger than the tier's bound.
    pub resize_to: Option<(u32, u32)>,
}

/// Static description of an external tool.
pub struct ToolDescriptor {
    pub name: &'static str,
    /// Binary names looked up on PATH, first match wins.
    pub binaries: &'static [&'static str],
    pub kinds: &'static [ConversionKind],
    /// Whether the argument template scales to `resize_to`.
    pub resizes: bool,
    /// Argument template.
    pub args: fn(&Invocation<'_>) -> Vec<OsString>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("binaries", &self.binaries)
            .field("kinds", &self.kinds)
            .field("resizes", &self.resizes)
            .finish()
    }
}

/// Known tools in preference order.
pub static TOOL_REGISTRY: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "cwebp",
        binaries: &["cwebp"],
        kinds: &[ConversionKind::StillToWebp],
        resizes: true,
        args: cwebp_args,
    },
    ToolDescriptor {
        name: "gif2webp",
        binaries: &["gif2webp"],
        kinds: &[ConversionKind::GifToWebp],
        // gif2webp has no scaling option
        resizes: false,
        args: gif2webp_args,
    },
    ToolDescriptor {
        name: "dwebp",
        binaries: &["dwebp"],
        kinds: &[ConversionKind::WebpToPng],
        resizes: true,
        args: dwebp_args,
    },
    ToolDescriptor {
        name: "ffmpeg",
        binaries: &["ffmpeg"],
        kinds: &[
            ConversionKind::GifToWebp,
            ConversionKind::VideoToWebp,
            ConversionKind::VideoFrame,
        ],
        resizes: true,
        args: ffmpeg_args,
    },
    ToolDescriptor {
        name: "imagemagick",
        binaries: &["magick", "convert"],
        kinds: &[ConversionKind::StillToWebp, ConversionKind::WebpToPng],
        resizes: true,
        args: imagemagick_args,
    },
];

fn cwebp_args(inv: &Invocation<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-quiet".into(),
        "-q".into(),
        inv.params.quality.to_string().into(),
        "-m".into(),
        "4".into(),
    ];
    push_resize(&mut args, inv.resize_to);
    args.extend([inv.input.into(), "-o".into(), inv.output.into()]);
    args
}

fn push_resize(args: &mut Vec<OsString>, resize_to: Option<(u32, u32)>) {
    if let Some((width, height)) = resize_to {
        args.extend([
            "-resize".into(),
            width.to_string().into(),
            height.to_string().into(),
        ]);
    }
}

fn gif2webp_args(inv: &Invocation<'_>) -> Vec<OsString> {
    vec![
        "-quiet".into(),
        "-lossy".into(),
        "-q".into(),
        inv.params.quality.to_string().into(),
        "-m".into(),
        "4".into(),
        inv.input.into(),
        "-o".into(),
        inv.output.into(),
    ]
}

fn dwebp_args(inv: &Invocation<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-quiet".into()];
    push_resize(&mut args, inv.resize_to);
    args.extend([inv.input.into(), "-o".into(), inv.output.into()]);
    args
}

fn ffmpeg_args(inv: &Invocation<'_>) -> Vec<OsString> {
    let bound = inv.params.max_dimension;
    let scale = format!("scale={bound}:{bound}:force_original_aspect_ratio=decrease:flags=lanczos");
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        inv.input.into(),
    ];
    match inv.kind {
        ConversionKind::VideoFrame => {
            args.extend(["-frames:v".into(), "1".into(), "-vf".into(), scale.into()]);
        }
        _ => {
            args.extend([
                "-t".into(),
                inv.params.max_duration.as_secs().max(1).to_string().into(),
                "-vf".into(),
                format!("fps={},{}", inv.params.max_fps, scale).into(),
                "-c:v".into(),
                "libwebp".into(),
                "-lossless".into(),
                "0".into(),
                "-q:v".into(),
                inv.params.quality.to_string().into(),
                "-compression_level".into(),
                "4".into(),
                "-loop".into(),
                "0".into(),
                "-an".into(),
            ]);
        }
    }
    args.push(inv.output.into());
    args
}

fn imagemagick_args(inv: &Invocation<'_>) -> Vec<OsString> {
    let bound = inv.params.max_dimension;
    // Only the first frame of an animated sticker is converted
    let mut input = OsString::from(inv.input);
    if inv.kind == ConversionKind::WebpToPng {
        input.push("[0]");
    }
    let mut args: Vec<OsString> = vec![
        input,
        "-resize".into(),
        format!("{bound}x{bound}>").into(),
    ];
    if inv.kind == ConversionKind::StillToWebp {
        args.extend([
            "-quality".into(),
            inv.params.quality.to_string().into(),
            "-define".into(),
            "webp:method=4".into(),
        ]);
    }
    args.push(inv.output.into());
    args
}

/// A converter the runner can invoke.
///
/// Implementors write their result to `invocation.output`; validation and
/// scratch-file handling belong to the runner.
#[async_trait]
pub trait ConversionTool: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: ConversionKind) -> bool;

    /// Whether a binary was found. Unavailable tools are never invoked.
    fn is_available(&self) -> bool;

    /// Whether the tool can scale its input into the tier's bound.
    /// Tools that cannot are only invoked for sources that already fit.
    fn resizes(&self) -> bool {
        true
    }

    async fn run(&self, invocation: &Invocation<'_>) -> Result<(), ToolError>;
}

/// A tool from [`TOOL_REGISTRY`] resolved against PATH.
#[derive(Debug)]
pub struct ExternalTool {
    descriptor: &'static ToolDescriptor,
    path: Option<PathBuf>,
    timeout: Duration,
}

impl ExternalTool {
    /// Look the descriptor's binaries up on PATH.
    pub fn locate(descriptor: &'static ToolDescriptor, timeout: Duration) -> Self {
        let path = descriptor
            .binaries
            .iter()
            .find_map(|binary| which::which(binary).ok());
        Self {
            descriptor,
            path,
            timeout,
        }
    }

    /// Resolved binary path, if installed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn descriptor(&self) -> &'static ToolDescriptor {
        self.descriptor
    }
}

#[async_trait]
impl ConversionTool for ExternalTool {
    fn name(&self) -> &str {
        self.descriptor.name
    }

    fn supports(&self, kind: ConversionKind) -> bool {
        self.descriptor.kinds.contains(&kind)
    }

    fn is_available(&self) -> bool {
        self.path.is_some()
    }

    fn resizes(&self) -> bool {
        self.descriptor.resizes
    }

    async fn run(&self, invocation: &Invocation<'_>) -> Result<(), ToolError> {
        let Some(path) = &self.path else {
            return Err(ToolError::ExecutionFailed {
                name: self.descriptor.name.to_string(),
                reason: "not installed".to_string(),
            });
        };

        let args = (self.descriptor.args)(invocation);
        tracing::debug!(
            tool = self.descriptor.name,
            kind = %invocation.kind,
            quality = invocation.params.quality,
            bound = invocation.params.max_dimension,
            "Invoking external tool"
        );

        let mut command = tokio::process::Command::new(path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    name: self.descriptor.name.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ToolError::ExecutionFailed {
                name: self.descriptor.name.to_string(),
                reason: format!("{}: {}", output.status, truncate(combined.trim(), 400)),
            });
        }

        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Output accepted from a tool chain.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub data: Vec<u8>,
    /// Name of the tool that produced the output.
    pub tool: String,
    pub dimensions: (u32, u32),
    /// Size tier the output was accepted at.
    pub params: EncodeParams,
}

/// Runs conversion kinds against an ordered set of tools.
#[derive(Clone, Default)]
pub struct ToolchainRunner {
    tools: Vec<Arc<dyn ConversionTool>>,
}

impl ToolchainRunner {
    /// Create a runner over an explicit tool list, in preference order.
    pub fn new(tools: Vec<Arc<dyn ConversionTool>>) -> Self {
        Self { tools }
    }

    /// A runner with no tools: every path goes straight to the built-in encoders.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look every entry of [`TOOL_REGISTRY`] up on PATH.
    pub fn from_registry(timeout: Duration) -> Self {
        let tools = TOOL_REGISTRY
            .iter()
            .map(|descriptor| {
                let tool = ExternalTool::locate(descriptor, timeout);
                match tool.path() {
                    Some(path) => tracing::info!(
                        tool = descriptor.name,
                        path = %path.display(),
                        "Conversion tool available"
                    ),
                    None => {
                        tracing::info!(tool = descriptor.name, "Conversion tool not installed")
                    }
                }
                Arc::new(tool) as Arc<dyn ConversionTool>
            })
            .collect();
        Self { tools }
    }

    /// All registered tools, installed or not.
    pub fn tools(&self) -> &[Arc<dyn ConversionTool>] {
        &self.tools
    }

    /// Installed tools for `kind`, in preference order.
    pub fn candidates(&self, kind: ConversionKind) -> Vec<Arc<dyn ConversionTool>> {
        self.tools
            .iter()
            .filter(|tool| tool.supports(kind) && tool.is_available())
            .cloned()
            .collect()
    }

    /// Run one tool once inside a scratch directory and validate its output.
    ///
    /// The scratch directory is removed when this returns, on every path.
    pub async fn invoke(
        &self,
        tool: &dyn ConversionTool,
        kind: ConversionKind,
        input: &[u8],
        source_dims: Option<(u32, u32)>,
        params: EncodeParams,
    ) -> Result<Vec<u8>, ToolError> {
        let bound = params.max_dimension;
        let resize_to = source_dims
            .and_then(|(w, h)| (w.max(h) > bound).then(|| fit_dimensions(w, h, bound)));
        if resize_to.is_some() && !tool.resizes() {
            let (w, h) = source_dims.unwrap_or_default();
            return Err(ToolError::ExecutionFailed {
                name: tool.name().to_string(),
                reason: format!("cannot scale {w}x{h} source into {bound}x{bound}"),
            });
        }

        let scratch = tempfile::Builder::new().prefix("stickerbot-").tempdir()?;
        let input_path = scratch
            .path()
            .join(format!("input.{}", kind.input_format().extension()));
        let output_path = scratch
            .path()
            .join(format!("output.{}", kind.output_format().extension()));
        tokio::fs::write(&input_path, input).await?;

        let invocation = Invocation {
            kind,
            input: &input_path,
            output: &output_path,
            params,
            resize_to,
        };
        tool.run(&invocation).await?;

        let data = match tokio::fs::read(&output_path).await {
            Ok(data) if !data.is_empty() => data,
            Ok(_) | Err(_) => {
                return Err(ToolError::ExecutionFailed {
                    name: tool.name().to_string(),
                    reason: "produced no output".to_string(),
                });
            }
        };

        validate_output(kind, &data, params.max_dimension).map_err(|reason| {
            ToolError::ExecutionFailed {
                name: tool.name().to_string(),
                reason,
            }
        })?;
        Ok(data)
    }

    /// Try every candidate for `kind` under the size enforcer.
    pub async fn convert(
        &self,
        kind: ConversionKind,
        input: &[u8],
        source_dims: Option<(u32, u32)>,
        enforcer: &SizeConstraintEnforcer,
    ) -> Result<ToolOutput, MediaError> {
        let candidates = self.candidates(kind);
        if candidates.is_empty() {
            return Err(MediaError::ToolUnavailable {
                kind: kind.to_string(),
            });
        }

        let mut last_failure = None;
        let mut oversize = None;
        for tool in candidates {
            let attempt = enforcer
                .enforce(|params| {
                    let tool = tool.as_ref();
                    async move {
                        self.invoke(tool, kind, input, source_dims, params)
                            .await
                            .map_err(|e| MediaError::ToolExecution {
                                kind: kind.to_string(),
                                reason: e.to_string(),
                            })
                    }
                })
                .await;

            match attempt {
                Ok(accepted) => {
                    let dimensions = header_dimensions(&accepted.data).unwrap_or((0, 0));
                    tracing::info!(
                        tool = tool.name(),
                        %kind,
                        bytes = accepted.data.len(),
                        attempts = accepted.attempts,
                        "Tool conversion succeeded"
                    );
                    return Ok(ToolOutput {
                        data: accepted.data,
                        tool: tool.name().to_string(),
                        dimensions,
                        params: accepted.params,
                    });
                }
                Err(err @ MediaError::SizeConstraintExceeded { .. }) => {
                    tracing::warn!(
                        tool = tool.name(),
                        %kind,
                        error = %err,
                        "Tool output too large"
                    );
                    oversize = Some(err);
                }
                Err(err) => {
                    tracing::warn!(tool = tool.name(), %kind, error = %err, "Tool attempt failed");
                    last_failure = Some(err);
                }
            }
        }

        Err(oversize
            .or(last_failure)
            .unwrap_or_else(|| MediaError::ToolUnavailable {
                kind: kind.to_string(),
            }))
    }
}

/// Check a tool's output before trusting it.
fn validate_output(kind: ConversionKind, data: &[u8], bound: u32) -> Result<(), String> {
    let format = sniff_format(data, None);
    if format != kind.output_format() {
        return Err(format!(
            "expected {} output, got {}",
            kind.output_format(),
            format
        ));
    }
    match header_dimensions(data) {
        Some((w, h)) if w == 0 || h == 0 => Err("output has zero dimension".to_string()),
        Some((w, h)) if w > bound || h > bound => {
            Err(format!("output {w}x{h} exceeds {bound}x{bound}"))
        }
        Some(_) => Ok(()),
        None => Err("unreadable output header".to_string()),
    }
}
