//! `convert`: one-shot conversion of a local file.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Config;
use crate::media::{ConversionResult, MediaBlob, StickerEncoder, TargetKind, ToolchainRunner};

pub async fn run_convert_command(
    config: &Config,
    input: &Path,
    output: Option<PathBuf>,
    target: TargetKind,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let blob = MediaBlob::sniff(data, None);

    let runner = ToolchainRunner::from_registry(config.encode.tool_timeout);
    let encoder = StickerEncoder::new(config.encode.clone(), runner);
    let result = encoder
        .encode(encoder.request(blob, target))
        .await
        .with_context(|| format!("Failed to convert {}", input.display()))?;

    let output = output.unwrap_or_else(|| default_output_path(input, &result));
    tokio::fs::write(&output, &result.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} -> {} ({} bytes, {}x{}, {}{}, via {})",
        input.display(),
        output.display(),
        result.data.len(),
        result.dimensions.0,
        result.dimensions.1,
        result.path,
        if result.is_animated { ", animated" } else { "" },
        result.tool
    );
    Ok(())
}

/// `<stem>.sticker.webp` or `<stem>.image.png` next to the input.
pub fn default_output_path(input: &Path, result: &ConversionResult) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let label = if result.mime_type == "image/png" {
        "image"
    } else {
        "sticker"
    };
    input.with_file_name(format!("{stem}.{label}.{}", result.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{BUILT_IN, ConversionPath};

    fn result(data: &[u8], mime_type: &'static str) -> ConversionResult {
        ConversionResult {
            data: data.to_vec(),
            mime_type,
            is_animated: false,
            tool: BUILT_IN.to_string(),
            dimensions: (1, 1),
            path: ConversionPath::Static,
        }
    }

    #[test]
    fn test_default_output_for_sticker() {
        let sticker = result(b"RIFF\0\0\0\0WEBP", "image/webp");
        assert_eq!(
            default_output_path(Path::new("/tmp/cat.gif"), &sticker),
            PathBuf::from("/tmp/cat.sticker.webp")
        );
    }

    #[test]
    fn test_default_output_for_image() {
        let image = result(b"\x89PNG\r\n\x1a\n", "image/png");
        assert_eq!(
            default_output_path(Path::new("sticker.webp"), &image),
            PathBuf::from("sticker.image.png")
        );
    }
}
