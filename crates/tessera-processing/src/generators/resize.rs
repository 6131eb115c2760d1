use super::{GeneratorError, Thumbnail};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tessera_core::ThumbnailSettings;

/// Decode `data`, fit it inside the configured bounds and encode it as JPEG.
///
/// CPU bound; callers run it on the blocking pool.
pub fn encode_thumbnail(
    data: &[u8],
    settings: &ThumbnailSettings,
) -> Result<Thumbnail, GeneratorError> {
    let image = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()
        .map_err(|e| GeneratorError::InvalidSource(e.to_string()))?;

    encode_image(image, settings)
}

pub(crate) fn encode_image(
    image: DynamicImage,
    settings: &ThumbnailSettings,
) -> Result<Thumbnail, GeneratorError> {
    let resized = if image.width() > settings.width || image.height() > settings.height {
        image.thumbnail(settings.width, settings.height)
    } else {
        image
    };
    let rgb = resized.to_rgb8();

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, settings.quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| GeneratorError::ProcessFailed {
            tool: "jpeg-encoder".to_string(),
            message: e.to_string(),
        })?;

    Ok(Thumbnail {
        width: rgb.width(),
        height: rgb.height(),
        data: Bytes::from(buffer),
    })
}

/// Re-encode externally produced image bytes off the async runtime
pub(crate) async fn encode_blocking(
    data: Vec<u8>,
    settings: &ThumbnailSettings,
) -> Result<Thumbnail, GeneratorError> {
    if data.is_empty() {
        return Err(GeneratorError::InvalidSource(
            "generator produced no image data".to_string(),
        ));
    }
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || encode_thumbnail(&data, &settings))
        .await
        .map_err(|e| GeneratorError::ProcessFailed {
            tool: "thumbnail-encoder".to_string(),
            message: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_large_image_fits_bounds_and_keeps_aspect() {
        let settings = ThumbnailSettings::default();
        let thumb = encode_thumbnail(&png(800, 400), &settings).unwrap();

        assert_eq!(thumb.width, 400);
        assert_eq!(thumb.height, 200);
        assert_eq!(
            image::guess_format(&thumb.data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let settings = ThumbnailSettings::default();
        let thumb = encode_thumbnail(&png(40, 30), &settings).unwrap();
        assert_eq!((thumb.width, thumb.height), (40, 30));
    }

    #[test]
    fn test_garbage_is_invalid_source() {
        let settings = ThumbnailSettings::default();
        let result = encode_thumbnail(b"definitely not an image", &settings);
        assert!(matches!(result, Err(GeneratorError::InvalidSource(_))));
    }
}
