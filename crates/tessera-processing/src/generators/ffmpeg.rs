use super::process;
use super::resize::encode_blocking;
use super::{Generator, GeneratorError, SourceFile, Thumbnail};
use async_trait::async_trait;
use tessera_core::models::generator_names;
use tessera_core::ThumbnailSettings;
use tokio_util::sync::CancellationToken;

/// Captures one video frame at the configured offset
pub struct FfmpegGenerator {
    executable: String,
}

impl FfmpegGenerator {
    pub fn new(executable: String) -> Self {
        Self { executable }
    }

    fn args(source: &SourceFile, settings: &ThumbnailSettings) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{:.3}", settings.ffmpeg_capture_time_seconds.max(0.0)),
            "-i".to_string(),
            source.path.to_string_lossy().into_owned(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease",
                settings.width, settings.height
            ),
            "-f".to_string(),
            "image2".to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "pipe:1".to_string(),
        ]
    }
}

#[async_trait]
impl Generator for FfmpegGenerator {
    fn name(&self) -> &str {
        generator_names::FFMPEG
    }

    #[tracing::instrument(skip(self, settings, cancel), fields(generator = "ffmpeg"))]
    async fn generate(
        &self,
        source: &SourceFile,
        settings: &ThumbnailSettings,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, GeneratorError> {
        let frame = process::run(&self.executable, Self::args(source, settings), cancel).await?;
        // A seek past the end of a short clip exits 0 without writing a frame.
        if frame.is_empty() {
            return Err(GeneratorError::InvalidSource(format!(
                "no frame at {}s",
                settings.ffmpeg_capture_time_seconds
            )));
        }
        encode_blocking(frame, settings).await
    }
}
