use super::process;
use super::resize::encode_blocking;
use super::{Generator, GeneratorError, SourceFile, Thumbnail};
use async_trait::async_trait;
use std::ffi::OsStr;
use tessera_core::models::generator_names;
use tessera_core::ThumbnailSettings;
use tokio_util::sync::CancellationToken;

/// Extracts the embedded preview of camera RAW files with `simple_dcraw -e -c`
pub struct LibrawGenerator {
    executable: String,
}

impl LibrawGenerator {
    pub fn new(executable: String) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl Generator for LibrawGenerator {
    fn name(&self) -> &str {
        generator_names::LIBRAW
    }

    #[tracing::instrument(skip(self, settings, cancel), fields(generator = "libraw"))]
    async fn generate(
        &self,
        source: &SourceFile,
        settings: &ThumbnailSettings,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, GeneratorError> {
        let preview = process::run(
            &self.executable,
            [OsStr::new("-e"), OsStr::new("-c"), source.path.as_os_str()],
            cancel,
        )
        .await?;

        encode_blocking(preview, settings).await
    }
}
