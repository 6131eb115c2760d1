//! One processing attempt for one file
//!
//! Metadata extraction runs next to thumbnail generation. The music extractor goes first on the
//! generation side because an embedded cover decides which generator runs.

use crate::chain::{GeneratorChain, Selection};
use crate::extractors::{ExifExtractor, ExtractedMetadata, MusicExtractor, MusicMetadata};
use crate::generators::{GeneratorError, GeneratorRegistry, SourceFile, Thumbnail};
use std::sync::Arc;
use tessera_core::models::{
    generator_names, ExtractorDescriptor, ExtractorKind, GeneratorDescriptor, SkipReason,
};
use tessera_core::{ProcessingSettings, ThumbnailSettings};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum PipelineOutcome {
    Generated {
        generator: String,
        thumbnail: Thumbnail,
        metadata: ExtractedMetadata,
    },
    Skipped {
        reason: SkipReason,
        metadata: ExtractedMetadata,
    },
}

impl PipelineOutcome {
    pub fn metadata(&self) -> &ExtractedMetadata {
        match self {
            PipelineOutcome::Generated { metadata, .. } | PipelineOutcome::Skipped { metadata, .. } => {
                metadata
            }
        }
    }
}

enum Generation {
    Done(String, Thumbnail),
    Skip(SkipReason),
}

#[derive(Clone)]
pub struct MediaPipeline {
    chain: GeneratorChain,
    registry: Arc<GeneratorRegistry>,
    exif: Option<ExtractorDescriptor>,
    music: Option<ExtractorDescriptor>,
    thumbnail: ThumbnailSettings,
}

impl MediaPipeline {
    pub fn from_settings(settings: &ProcessingSettings) -> Self {
        let registry = GeneratorRegistry::from_descriptors(&settings.generators);
        Self::with_registry(settings, registry)
    }

    pub fn with_registry(settings: &ProcessingSettings, registry: GeneratorRegistry) -> Self {
        Self {
            chain: GeneratorChain::new(settings.generators.clone()),
            registry: Arc::new(registry),
            exif: settings.extractor(ExtractorKind::Exif).cloned(),
            music: settings.extractor(ExtractorKind::Music).cloned(),
            thumbnail: settings.thumbnail.clone(),
        }
    }

    pub fn chain(&self) -> &GeneratorChain {
        &self.chain
    }

    #[tracing::instrument(skip(self, cancel), fields(extension = %source.extension, size_bytes = source.size))]
    pub async fn run(
        &self,
        source: &SourceFile,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, GeneratorError> {
        let generation = async {
            let music = self.extract_music(source).await;
            let generated = self.generate(source, music.as_ref(), cancel).await;
            (music, generated)
        };
        let (exif, (music, generated)) = tokio::join!(self.extract_exif(source), generation);
        let metadata = ExtractedMetadata { exif, music };

        match generated? {
            Generation::Done(generator, thumbnail) => Ok(PipelineOutcome::Generated {
                generator,
                thumbnail,
                metadata,
            }),
            Generation::Skip(reason) => Ok(PipelineOutcome::Skipped { reason, metadata }),
        }
    }

    async fn generate(
        &self,
        source: &SourceFile,
        music: Option<&MusicMetadata>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GeneratorError> {
        let descriptor = match self.cover_generator(music) {
            Some(cover) => cover,
            None => match self.chain.select(&source.extension, source.size) {
                Selection::Generator(descriptor) => descriptor,
                Selection::DirectServe => return Ok(Generation::Skip(SkipReason::DirectServe)),
                Selection::NoGeneratorApplicable => {
                    return Ok(Generation::Skip(SkipReason::NoGeneratorApplicable))
                }
            },
        };

        let Some(generator) = self.registry.get(&descriptor.name) else {
            tracing::warn!(generator = %descriptor.name, "Selected generator is not registered");
            return Ok(Generation::Skip(SkipReason::NoGeneratorApplicable));
        };

        match generator.generate(source, &self.thumbnail, cancel).await {
            Ok(thumbnail) => Ok(Generation::Done(descriptor.name.clone(), thumbnail)),
            Err(GeneratorError::InvalidSource(reason)) => {
                tracing::info!(generator = %descriptor.name, reason = %reason, "Source rejected by generator");
                Ok(Generation::Skip(SkipReason::InvalidSource))
            }
            Err(GeneratorError::NotApplicable(reason)) => {
                tracing::info!(generator = %descriptor.name, reason = %reason, "Generator not applicable");
                Ok(Generation::Skip(SkipReason::NoGeneratorApplicable))
            }
            Err(e) => Err(e),
        }
    }

    /// Music files with an embedded cover go straight to the cover generator
    fn cover_generator(&self, music: Option<&MusicMetadata>) -> Option<&GeneratorDescriptor> {
        if !music.is_some_and(|m| m.has_cover) {
            return None;
        }
        self.chain
            .get(generator_names::MUSIC_COVER)
            .filter(|d| d.enabled)
    }

    async fn extract_exif(&self, source: &SourceFile) -> Option<crate::extractors::ExifMetadata> {
        let descriptor = self.exif.as_ref()?;
        if !descriptor.applies(&source.extension, source.size, source.is_local) {
            return None;
        }
        match ExifExtractor::new(descriptor.use_brute_force)
            .extract(&source.path)
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "EXIF extraction failed");
                None
            }
        }
    }

    async fn extract_music(&self, source: &SourceFile) -> Option<MusicMetadata> {
        let descriptor = self.music.as_ref()?;
        if !descriptor.applies(&source.extension, source.size, source.is_local) {
            return None;
        }
        let ffprobe = descriptor
            .executable_path
            .clone()
            .unwrap_or_else(|| "ffprobe".to_string());
        match MusicExtractor::new(ffprobe).extract(&source.path).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(error = %e, "Music metadata extraction failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Generator;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_core::QueueSettings;

    struct FakeGenerator {
        name: &'static str,
        calls: AtomicUsize,
        fail_with_invalid: bool,
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(
            &self,
            _source: &SourceFile,
            _settings: &ThumbnailSettings,
            _cancel: &CancellationToken,
        ) -> Result<Thumbnail, GeneratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_invalid {
                return Err(GeneratorError::InvalidSource("corrupt".to_string()));
            }
            Ok(Thumbnail {
                data: bytes::Bytes::from_static(b"jpeg"),
                width: 1,
                height: 1,
            })
        }
    }

    fn settings() -> ProcessingSettings {
        ProcessingSettings {
            generators: vec![GeneratorDescriptor {
                name: generator_names::BUILTIN.to_string(),
                enabled: true,
                executable_path: None,
                max_file_size_bytes: 1024,
                supported_extensions: vec!["png".to_string()],
                direct_serve_extensions: vec!["svg".to_string()],
                priority: 1000,
            }],
            extractors: vec![],
            thumbnail: ThumbnailSettings::default(),
            queue: QueueSettings::default(),
        }
    }

    fn source(extension: &str, size: u64) -> SourceFile {
        SourceFile {
            path: PathBuf::from(format!("/nonexistent/file.{}", extension)),
            extension: extension.to_string(),
            size,
            is_local: true,
        }
    }

    fn pipeline(fail_with_invalid: bool) -> (MediaPipeline, Arc<FakeGenerator>) {
        let fake = Arc::new(FakeGenerator {
            name: generator_names::BUILTIN,
            calls: AtomicUsize::new(0),
            fail_with_invalid,
        });
        let mut registry = GeneratorRegistry::new();
        registry.register(generator_names::BUILTIN, fake.clone());
        (MediaPipeline::with_registry(&settings(), registry), fake)
    }

    #[tokio::test]
    async fn test_generates_with_selected_generator() {
        let (pipeline, fake) = pipeline(false);
        let outcome = pipeline
            .run(&source("png", 10), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            PipelineOutcome::Generated { generator, .. } => {
                assert_eq!(generator, generator_names::BUILTIN)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skips_without_calling_generator() {
        let (pipeline, fake) = pipeline(false);

        let oversized = pipeline
            .run(&source("png", 4096), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            oversized,
            PipelineOutcome::Skipped {
                reason: SkipReason::NoGeneratorApplicable,
                ..
            }
        ));

        let svg = pipeline
            .run(&source("svg", 10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            svg,
            PipelineOutcome::Skipped {
                reason: SkipReason::DirectServe,
                ..
            }
        ));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_source_is_skipped() {
        let (pipeline, _) = pipeline(true);
        let outcome = pipeline
            .run(&source("png", 10), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            PipelineOutcome::Skipped {
                reason: SkipReason::InvalidSource,
                ..
            }
        ));
        assert!(outcome.metadata().is_empty());
    }
}
