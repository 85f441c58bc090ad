//! Lightweight WebP optimization for stickers that are already compliant.
//!
//! Drops EXIF and XMP chunks from the RIFF container. Pixel data is never
//! touched, so dimensions and animation are preserved.

use crate::error::MediaError;

const VP8X_FLAG_EXIF: u8 = 0x08;
const VP8X_FLAG_XMP: u8 = 0x04;

/// Remove metadata chunks from a WebP file.
///
/// The result is never larger than the input.
pub fn strip_webp_metadata(data: &[u8]) -> Result<Vec<u8>, MediaError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return Err(malformed("missing RIFF/WEBP header"));
    }

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&data[0..12]);

    let mut offset = 12;
    let mut vp8x_flags_at = None;
    while offset < data.len() {
        if offset + 8 > data.len() {
            return Err(malformed("truncated chunk header"));
        }
        let fourcc = &data[offset..offset + 4];
        let size = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]) as usize;
        let padded = size + (size & 1);
        let end = offset + 8 + padded;
        // The final pad byte is sometimes omitted by encoders
        let end = if end > data.len() && offset + 8 + size == data.len() {
            data.len()
        } else {
            end
        };
        if end > data.len() {
            return Err(malformed("chunk runs past end of file"));
        }

        if fourcc != b"EXIF" && fourcc != b"XMP " {
            if fourcc == b"VP8X" {
                vp8x_flags_at = Some(out.len() + 8);
            }
            out.extend_from_slice(&data[offset..end]);
        }
        offset = end;
    }

    if let Some(at) = vp8x_flags_at
        && at < out.len()
    {
        out[at] &= !(VP8X_FLAG_EXIF | VP8X_FLAG_XMP);
    }

    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());

    Ok(out)
}

fn malformed(reason: &str) -> MediaError {
    MediaError::Decode {
        format: "webp".to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::detection::{header_dimensions, is_animated_webp};

    fn chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut c = Vec::new();
        c.extend_from_slice(fourcc);
        c.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        c.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            c.push(0);
        }
        c
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.iter().flatten().copied().collect();
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        data.extend_from_slice(b"WEBP");
        data.extend_from_slice(&body);
        data
    }

    fn vp8x(flags: u8, width: u32, height: u32) -> Vec<u8> {
        let mut payload = vec![flags, 0, 0, 0];
        payload.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
        payload.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
        chunk(b"VP8X", &payload)
    }

    #[test]
    fn test_strips_exif_and_xmp() {
        let data = riff(&[
            vp8x(0x02 | VP8X_FLAG_EXIF | VP8X_FLAG_XMP, 512, 512),
            chunk(b"ANIM", &[0u8; 6]),
            chunk(b"ANMF", &[1u8; 31]),
            chunk(b"EXIF", &[7u8; 200]),
            chunk(b"XMP ", &[9u8; 99]),
        ]);

        let stripped = strip_webp_metadata(&data).unwrap();
        assert!(stripped.len() < data.len());
        assert!(!stripped.windows(4).any(|w| w == b"EXIF"));
        assert!(!stripped.windows(4).any(|w| w == b"XMP "));
        assert_eq!(stripped[20] & (VP8X_FLAG_EXIF | VP8X_FLAG_XMP), 0);
        assert!(is_animated_webp(&stripped));
        assert_eq!(header_dimensions(&stripped), Some((512, 512)));

        let riff_size = u32::from_le_bytes([stripped[4], stripped[5], stripped[6], stripped[7]]);
        assert_eq!(riff_size as usize, stripped.len() - 8);
    }

    #[test]
    fn test_color_profile_is_kept() {
        let data = riff(&[
            vp8x(0x20 | VP8X_FLAG_EXIF, 64, 64),
            chunk(b"ICCP", &[5u8; 40]),
            chunk(b"VP8L", &[0x2F, 1, 2, 3, 4]),
            chunk(b"EXIF", &[7u8; 16]),
        ]);

        let stripped = strip_webp_metadata(&data).unwrap();
        assert!(stripped.windows(4).any(|w| w == b"ICCP"));
        assert!(!stripped.windows(4).any(|w| w == b"EXIF"));
        assert_eq!(stripped[20], 0x20);
    }

    #[test]
    fn test_without_metadata_is_identical() {
        let data = riff(&[vp8x(0x00, 100, 80), chunk(b"VP8L", &[0x2F, 1, 2, 3, 4])]);
        assert_eq!(strip_webp_metadata(&data).unwrap(), data);
    }

    #[test]
    fn test_truncated_chunk_is_error() {
        let mut data = riff(&[chunk(b"VP8L", &[0x2F; 20])]);
        data.truncate(data.len() - 10);
        assert!(strip_webp_metadata(&data).is_err());
    }

    #[test]
    fn test_rejects_non_webp() {
        assert!(strip_webp_metadata(b"GIF89a........").is_err());
    }
}
