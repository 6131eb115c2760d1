use super::resize::encode_thumbnail;
use super::{Generator, GeneratorError, SourceFile, Thumbnail};
use async_trait::async_trait;
use tessera_core::models::generator_names;
use tessera_core::ThumbnailSettings;
use tokio_util::sync::CancellationToken;

/// In-process decoder for common raster formats
pub struct BuiltinGenerator;

#[async_trait]
impl Generator for BuiltinGenerator {
    fn name(&self) -> &str {
        generator_names::BUILTIN
    }

    #[tracing::instrument(skip(self, settings, cancel), fields(generator = "builtin"))]
    async fn generate(
        &self,
        source: &SourceFile,
        settings: &ThumbnailSettings,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, GeneratorError> {
        let data = tokio::fs::read(&source.path).await?;
        if cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }

        let settings = settings.clone();
        tokio::task::spawn_blocking(move || encode_thumbnail(&data, &settings))
            .await
            .map_err(|e| GeneratorError::ProcessFailed {
                tool: generator_names::BUILTIN.to_string(),
                message: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    async fn write_png(dir: &std::path::Path) -> SourceFile {
        let img = RgbaImage::from_pixel(1200, 900, Rgba([255, 0, 0, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        let path = dir.join("red.png");
        tokio::fs::write(&path, &buffer).await.unwrap();
        SourceFile {
            path,
            extension: "png".to_string(),
            size: buffer.len() as u64,
            is_local: true,
        }
    }

    #[tokio::test]
    async fn test_builtin_generates_bounded_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_png(dir.path()).await;

        let thumb = BuiltinGenerator
            .generate(&source, &ThumbnailSettings::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((thumb.width, thumb.height), (400, 300));
        assert_eq!(image::guess_format(&thumb.data).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_builtin_honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_png(dir.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = BuiltinGenerator
            .generate(&source, &ThumbnailSettings::default(), &cancel)
            .await;
        assert!(matches!(result, Err(GeneratorError::Cancelled)));
    }
}
