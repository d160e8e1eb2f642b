//! Image re-encoding that keeps only pixel data. Blocking; call from `spawn_blocking`.

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::{AnimationDecoder, DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Write};
use std::path::Path;
use thiserror::Error;

/// Maximum width or height accepted by the decoder.
const MAX_IMAGE_DIMENSION: u32 = 16384;

const JPEG_QUALITY: u8 = 90;

/// Decoded GIF pixels summed over every frame; each frame decodes to a full canvas.
const MAX_GIF_PIXELS: u64 = 16 * 1024 * 1024;
const MAX_GIF_FRAMES: u64 = 1000;

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("unsupported image format: {0:?}")]
    UnsupportedFormat(ImageFormat),
    #[error("image decode failed: {0}")]
    DecodeFailed(String),
    #[error("image encoding failed: {0}")]
    EncodeFailed(String),
    #[error("failed to replace file: {0}")]
    Io(#[from] io::Error),
}

/// Replaces the image at `path` with a clean re-encoding in the same format.
///
/// On error the original file is left in place; the caller decides what to do
/// with it.
pub fn sanitize(path: &Path, declared_format: ImageFormat) -> Result<(), SanitizeError> {
    let clean = match declared_format {
        ImageFormat::Png | ImageFormat::Jpeg => reencode_still(path, declared_format)?,
        ImageFormat::Gif => reencode_gif(path)?,
        other => return Err(SanitizeError::UnsupportedFormat(other)),
    };

    replace_atomically(path, &clean)?;

    tracing::debug!(
        path = %path.display(),
        format = ?declared_format,
        size_bytes = clean.len(),
        "image sanitized"
    );
    Ok(())
}

fn decoder_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    limits
}

fn open(path: &Path) -> Result<BufReader<File>, SanitizeError> {
    Ok(BufReader::new(File::open(path)?))
}

fn reencode_still(path: &Path, format: ImageFormat) -> Result<Vec<u8>, SanitizeError> {
    // No format guessing: the bytes must decode as what the extension claims.
    let mut reader = ImageReader::with_format(open(path)?, format);
    reader.limits(decoder_limits());
    let img = reader
        .decode()
        .map_err(|e| SanitizeError::DecodeFailed(e.to_string()))?;

    let mut out = Cursor::new(Vec::new());
    let encoded = match format {
        // JPEG has no alpha channel and only 8-bit samples.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)),
        _ => img.write_to(&mut out, format),
    };
    encoded.map_err(|e| SanitizeError::EncodeFailed(e.to_string()))?;

    Ok(out.into_inner())
}

/// GIFs are rebuilt frame by frame so animation, delays and transparency
/// survive. Frames are streamed into the encoder, never collected.
fn reencode_gif(path: &Path) -> Result<Vec<u8>, SanitizeError> {
    let decode_err = |e: image::ImageError| SanitizeError::DecodeFailed(e.to_string());
    let encode_err = |e: image::ImageError| SanitizeError::EncodeFailed(e.to_string());

    let mut decoder = GifDecoder::new(open(path)?).map_err(decode_err)?;
    decoder.set_limits(decoder_limits()).map_err(decode_err)?;

    let (width, height) = decoder.dimensions();
    let canvas = u64::from(width) * u64::from(height);
    if canvas > MAX_GIF_PIXELS {
        return Err(SanitizeError::DecodeFailed(format!(
            "GIF canvas {width}x{height} exceeds the decode budget"
        )));
    }

    let mut out = Vec::new();
    let mut frames: u64 = 0;
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).map_err(encode_err)?;

        for frame in decoder.into_frames() {
            frames += 1;
            if frames > MAX_GIF_FRAMES || frames * canvas > MAX_GIF_PIXELS {
                return Err(SanitizeError::DecodeFailed(format!(
                    "GIF exceeds the decode budget at frame {frames} ({width}x{height} canvas)"
                )));
            }
            encoder.encode_frame(frame.map_err(decode_err)?).map_err(encode_err)?;
        }
    }

    if frames == 0 {
        return Err(SanitizeError::DecodeFailed("GIF contains no frames".into()));
    }
    Ok(out)
}

/// Writes `data` next to `path` and renames it over the original, so readers
/// see either the old file or the complete new one.
fn replace_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("sanitized file has no parent directory"))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".sanitize-")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
