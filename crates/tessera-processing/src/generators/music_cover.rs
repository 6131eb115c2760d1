use super::process;
use super::resize::encode_blocking;
use super::{Generator, GeneratorError, SourceFile, Thumbnail};
use async_trait::async_trait;
use tessera_core::models::generator_names;
use tessera_core::ThumbnailSettings;
use tokio_util::sync::CancellationToken;

/// Pulls the attached picture out of an audio file
pub struct MusicCoverGenerator {
    executable: String,
}

impl MusicCoverGenerator {
    pub fn new(executable: String) -> Self {
        Self { executable }
    }

    fn args(source: &SourceFile) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.path.to_string_lossy().into_owned(),
            "-an".to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2".to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "pipe:1".to_string(),
        ]
    }
}

#[async_trait]
impl Generator for MusicCoverGenerator {
    fn name(&self) -> &str {
        generator_names::MUSIC_COVER
    }

    #[tracing::instrument(skip(self, settings, cancel), fields(generator = "music_cover"))]
    async fn generate(
        &self,
        source: &SourceFile,
        settings: &ThumbnailSettings,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, GeneratorError> {
        let cover = process::run(&self.executable, Self::args(source), cancel).await?;
        if cover.is_empty() {
            return Err(GeneratorError::NotApplicable(
                "no embedded cover art".to_string(),
            ));
        }
        encode_blocking(cover, settings).await
    }
}
