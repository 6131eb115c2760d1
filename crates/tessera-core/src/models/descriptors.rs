//! Generator and extractor descriptors
//!
//! Descriptors are configuration, not runtime entities: they declare which files a processor
//! applies to. Matching is case-insensitive on the extension.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Names of the generators shipped with the processing crate.
pub mod generator_names {
    pub const VIPS: &str = "vips";
    pub const FFMPEG: &str = "ffmpeg";
    pub const LIBRAW: &str = "libraw";
    pub const MUSIC_COVER: &str = "music_cover";
    pub const BUILTIN: &str = "builtin";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorDescriptor {
    pub name: String,
    pub enabled: bool,
    /// Executable for external-process generators
    pub executable_path: Option<String>,
    pub max_file_size_bytes: u64,
    pub supported_extensions: Vec<String>,
    /// Formats served as-is instead of being thumbnailed
    #[serde(default)]
    pub direct_serve_extensions: Vec<String>,
    /// Chain order; lower runs first
    pub priority: i32,
}

impl GeneratorDescriptor {
    pub fn supports_extension(&self, extension: &str) -> bool {
        contains_ignore_case(&self.supported_extensions, extension)
    }

    pub fn serves_directly(&self, extension: &str) -> bool {
        contains_ignore_case(&self.direct_serve_extensions, extension)
    }

    pub fn accepts(&self, extension: &str, size: u64) -> bool {
        self.enabled && self.supports_extension(extension) && size <= self.max_file_size_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Exif,
    Music,
}

impl Display for ExtractorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ExtractorKind::Exif => write!(f, "exif"),
            ExtractorKind::Music => write!(f, "music"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorDescriptor {
    pub kind: ExtractorKind,
    pub enabled: bool,
    /// Ceiling for files resident on local storage
    pub max_size_local_bytes: u64,
    /// Ceiling for files fetched from a remote backend
    pub max_size_remote_bytes: u64,
    pub use_brute_force: bool,
    pub executable_path: Option<String>,
    pub supported_extensions: Vec<String>,
}

impl ExtractorDescriptor {
    pub fn applies(&self, extension: &str, size: u64, is_local: bool) -> bool {
        let ceiling = if is_local {
            self.max_size_local_bytes
        } else {
            self.max_size_remote_bytes
        };
        self.enabled && size <= ceiling && contains_ignore_case(&self.supported_extensions, extension)
    }
}

fn contains_ignore_case(list: &[String], extension: &str) -> bool {
    list.iter().any(|e| e.eq_ignore_ascii_case(extension))
}
