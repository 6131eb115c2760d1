use super::process;
use super::resize::encode_blocking;
use super::{Generator, GeneratorError, SourceFile, Thumbnail};
use async_trait::async_trait;
use tessera_core::models::generator_names;
use tessera_core::ThumbnailSettings;
use tokio_util::sync::CancellationToken;

/// Thumbnails through libvips' `vipsthumbnail`
pub struct VipsGenerator {
    executable: String,
}

impl VipsGenerator {
    pub fn new(executable: String) -> Self {
        Self { executable }
    }

    fn args(source: &SourceFile, output: &str, settings: &ThumbnailSettings) -> Vec<String> {
        vec![
            source.path.to_string_lossy().into_owned(),
            "--size".to_string(),
            format!("{}x{}", settings.width, settings.height),
            "-o".to_string(),
            format!("{}[Q={}]", output, settings.quality),
        ]
    }
}

#[async_trait]
impl Generator for VipsGenerator {
    fn name(&self) -> &str {
        generator_names::VIPS
    }

    #[tracing::instrument(skip(self, settings, cancel), fields(generator = "vips"))]
    async fn generate(
        &self,
        source: &SourceFile,
        settings: &ThumbnailSettings,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, GeneratorError> {
        let workdir = tempfile::tempdir()?;
        let output = workdir.path().join("thumbnail.jpg");
        let output = output.to_string_lossy().into_owned();

        process::run(&self.executable, Self::args(source, &output, settings), cancel).await?;

        let data = tokio::fs::read(&output).await?;
        encode_blocking(data, settings).await
    }
}
