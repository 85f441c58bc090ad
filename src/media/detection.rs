//! Signature sniffing and header inspection.
//!
//! Classification never trusts the declared transport mimetype when a magic
//! signature matches: some "video" messages are GIFs in disguise.

use serde::{Deserialize, Serialize};

/// Media formats the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    WebP,
    /// Any video container (MP4, MOV, WebM, MKV, AVI).
    Video,
    Unknown,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
            Self::Gif => write!(f, "gif"),
            Self::WebP => write!(f, "webp"),
            Self::Video => write!(f, "video"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Format {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Video => "video/mp4",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Get the file extension used for temporary files of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
            Self::Video => "mp4",
            Self::Unknown => "bin",
        }
    }

    /// Whether the format is a still image the decoder accepts directly.
    pub fn is_still_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

/// Classify a byte blob from its magic bytes.
///
/// `declared_mime` is only consulted once every signature check has failed.
pub fn sniff_format(data: &[u8], declared_mime: Option<&str>) -> Format {
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Format::WebP;
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Format::Gif;
    }

    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8 {
        return Format::Jpeg;
    }

    if data.len() >= 4 && &data[1..4] == b"PNG" {
        return Format::Png;
    }

    let declared_video = declared_mime
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "image/gif" || mime.starts_with("video/")
        })
        .unwrap_or(false);

    if declared_video || is_video_envelope(data) {
        return Format::Video;
    }

    Format::Unknown
}

/// Check for common video container headers.
pub fn is_video_envelope(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }

    // ISO base media (MP4/MOV/3GP): ftyp or moov box at offset 4
    if &data[4..8] == b"ftyp" || &data[4..8] == b"moov" {
        return true;
    }

    // WebM/MKV: EBML header
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return true;
    }

    &data[0..4] == b"RIFF" && &data[8..12] == b"AVI "
}

/// Check whether WebP data declares animation in its VP8X header.
pub fn is_animated_webp(data: &[u8]) -> bool {
    data.len() >= 21
        && &data[0..4] == b"RIFF"
        && &data[8..12] == b"WEBP"
        && &data[12..16] == b"VP8X"
        && data[20] & 0x02 != 0
}

/// Read image dimensions from container headers without decoding pixels.
pub fn header_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    match sniff_format(data, None) {
        Format::Png => png_dimensions(data),
        Format::Gif => gif_dimensions(data),
        Format::Jpeg => jpeg_dimensions(data),
        Format::WebP => webp_dimensions(data),
        Format::Video | Format::Unknown => None,
    }
}

fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some((width, height))
}

fn gif_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 10 {
        return None;
    }
    let width = u16::from_le_bytes([data[6], data[7]]) as u32;
    let height = u16::from_le_bytes([data[8], data[9]]) as u32;
    Some((width, height))
}

/// Scan JPEG data for a start-of-frame marker.
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = data[i + 1];
        // SOF0..SOF15 except DHT (C4), JPG (C8) and DAC (CC)
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if i + 8 >= data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }
        // Markers without a length field
        if marker == 0xD8 || marker == 0x01 || (0xD0..=0xD7).contains(&marker) || marker == 0xFF {
            i += 1;
            continue;
        }
        let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        i += 2 + len;
    }
    None
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 30 {
        return None;
    }
    match &data[12..16] {
        b"VP8 " => {
            // Frame tag (3 bytes) then start code 9D 01 2A
            if data[23..26] != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let width = u16::from_le_bytes([data[26], data[27]]) as u32 & 0x3FFF;
            let height = u16::from_le_bytes([data[28], data[29]]) as u32 & 0x3FFF;
            Some((width, height))
        }
        b"VP8L" => {
            if data[20] != 0x2F {
                return None;
            }
            let b = &data[21..25];
            let width = 1 + (b[0] as u32 | ((b[1] as u32 & 0x3F) << 8));
            let height =
                1 + ((b[1] as u32 >> 6) | ((b[2] as u32) << 2) | ((b[3] as u32 & 0x0F) << 10));
            Some((width, height))
        }
        b"VP8X" => {
            let width = 1 + u32::from_le_bytes([data[24], data[25], data[26], 0]);
            let height = 1 + u32::from_le_bytes([data[27], data[28], data[29], 0]);
            Some((width, height))
        }
        _ => None,
    }
}

/// A downloaded payload together with what sniffing learned about it.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    data: Vec<u8>,
    format: Format,
    dimensions: Option<(u32, u32)>,
    animated: bool,
}

impl MediaBlob {
    /// Sniff raw bytes. The declared mimetype is only a hint.
    pub fn sniff(data: Vec<u8>, declared_mime: Option<&str>) -> Self {
        let format = sniff_format(&data, declared_mime);
        let dimensions = header_dimensions(&data);
        let animated = match format {
            Format::WebP => is_animated_webp(&data),
            Format::Gif | Format::Video => true,
            _ => false,
        };
        Self {
            data,
            format,
            dimensions,
            animated,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Header dimensions, when the container exposes them.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Whether the source can carry more than one frame.
    pub fn is_animated(&self) -> bool {
        self.animated
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riff_webp(chunk: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&((4 + 8 + payload.len()) as u32).to_le_bytes());
        data.extend_from_slice(b"WEBP");
        data.extend_from_slice(chunk);
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_sniff_webp() {
        let data = riff_webp(b"VP8 ", &[0u8; 16]);
        assert_eq!(sniff_format(&data, None), Format::WebP);
    }

    #[test]
    fn test_sniff_gif_both_versions() {
        assert_eq!(sniff_format(b"GIF87a\x01\x00\x01\x00", None), Format::Gif);
        assert_eq!(sniff_format(b"GIF89a\x01\x00\x01\x00", None), Format::Gif);
    }

    #[test]
    fn test_sniff_jpeg_needs_only_two_bytes() {
        assert_eq!(sniff_format(&[0xFF, 0xD8], None), Format::Jpeg);
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0], None), Format::Jpeg);
    }

    #[test]
    fn test_sniff_png() {
        let data = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_format(&data, None), Format::Png);
    }

    #[test]
    fn test_signature_wins_over_declared_video() {
        assert_eq!(
            sniff_format(b"GIF89a\x10\x00\x10\x00", Some("video/mp4")),
            Format::Gif
        );
    }

    #[test]
    fn test_declared_gif_without_signature_is_video() {
        assert_eq!(sniff_format(&[0u8; 16], Some("image/gif")), Format::Video);
        assert_eq!(sniff_format(&[0u8; 16], Some("Video/MP4")), Format::Video);
    }

    #[test]
    fn test_sniff_mp4_envelope() {
        let mut data = vec![0x00, 0x00, 0x00, 0x18];
        data.extend_from_slice(b"ftypmp42");
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(sniff_format(&data, None), Format::Video);
    }

    #[test]
    fn test_sniff_webm_envelope() {
        let mut data = vec![0x1A, 0x45, 0xDF, 0xA3];
        data.extend_from_slice(&[0u8; 12]);
        assert_eq!(sniff_format(&data, None), Format::Video);
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff_format(&[0x00, 0x01, 0x02, 0x03], None), Format::Unknown);
        assert_eq!(sniff_format(&[], None), Format::Unknown);
        assert_eq!(sniff_format(b"hello", Some("text/plain")), Format::Unknown);
    }

    #[test]
    fn test_animated_webp_flag() {
        let mut payload = [0u8; 10];
        payload[0] = 0x02;
        let animated = riff_webp(b"VP8X", &payload);
        assert!(is_animated_webp(&animated));

        let still = riff_webp(b"VP8X", &[0u8; 10]);
        assert!(!is_animated_webp(&still));
    }

    #[test]
    fn test_vp8x_dimensions() {
        let mut payload = [0u8; 10];
        // canvas 512 x 300, stored minus one as 24-bit little endian
        payload[4..7].copy_from_slice(&511u32.to_le_bytes()[..3]);
        payload[7..10].copy_from_slice(&299u32.to_le_bytes()[..3]);
        let data = riff_webp(b"VP8X", &payload);
        assert_eq!(header_dimensions(&data), Some((512, 300)));
    }

    #[test]
    fn test_vp8l_dimensions() {
        // 100 x 200: width-1 = 99, height-1 = 199
        let w = 99u32;
        let h = 199u32;
        let bits = w | (h << 14);
        let mut payload = vec![0x2F];
        payload.extend_from_slice(&bits.to_le_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        let data = riff_webp(b"VP8L", &payload);
        assert_eq!(header_dimensions(&data), Some((100, 200)));
    }

    #[test]
    fn test_png_dimensions() {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x0D]);
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(&200u32.to_be_bytes());
        assert_eq!(header_dimensions(&data), Some((100, 200)));
    }

    #[test]
    fn test_gif_dimensions() {
        assert_eq!(
            header_dimensions(b"GIF89a\x40\x01\xF0\x00"),
            Some((320, 240))
        );
    }

    #[test]
    fn test_jpeg_dimensions() {
        let mut data = vec![0xFF, 0xD8];
        // APP0 segment of length 4
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        // SOF0: length, precision, height 480, width 640
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01, 0xE0, 0x02, 0x80, 0x03]);
        assert_eq!(header_dimensions(&data), Some((640, 480)));
    }

    #[test]
    fn test_truncated_jpeg_has_no_dimensions() {
        assert_eq!(header_dimensions(&[0xFF, 0xD8, 0x00, 0x00]), None);
    }

    #[test]
    fn test_media_blob_sniff() {
        let blob = MediaBlob::sniff(b"GIF89a\x02\x00\x03\x00rest".to_vec(), Some("video/mp4"));
        assert_eq!(blob.format(), Format::Gif);
        assert_eq!(blob.dimensions(), Some((2, 3)));
        assert!(blob.is_animated());
        assert_eq!(blob.len(), 14);
    }
}
