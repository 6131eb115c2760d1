//! Metadata extractors
//!
//! Extraction is best effort: a failing extractor is logged and leaves its section out of the
//! result, it never fails the job.

mod exif;
mod music;

pub use self::exif::{ExifExtractor, ExifMetadata};
pub use self::music::{MusicExtractor, MusicMetadata};

use serde::Serialize;

/// Metadata gathered for one file during a processing attempt
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<ExifMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<MusicMetadata>,
}

impl ExtractedMetadata {
    pub fn is_empty(&self) -> bool {
        self.exif.is_none() && self.music.is_none()
    }

    pub fn to_json(&self) -> Option<serde_json::Value> {
        if self.is_empty() {
            return None;
        }
        serde_json::to_value(self).ok()
    }
}
