use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i32>,
    #[serde(default)]
    disposition: HashMap<String, i32>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MusicMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<i32>,
    pub has_cover: bool,
}

/// Tag and stream information through `ffprobe`
#[derive(Debug, Clone)]
pub struct MusicExtractor {
    ffprobe_path: String,
}

impl MusicExtractor {
    pub fn new(ffprobe_path: String) -> Self {
        Self { ffprobe_path }
    }

    #[tracing::instrument(skip(self, path), fields(extractor = "music"))]
    pub async fn extract(&self, path: &Path) -> anyhow::Result<MusicMetadata> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run ffprobe: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("ffprobe failed: {}", stderr.trim()));
        }

        parse_ffprobe(&output.stdout)
    }
}

fn parse_ffprobe(stdout: &[u8]) -> anyhow::Result<MusicMetadata> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| anyhow::anyhow!("Failed to parse ffprobe output: {}", e))?;

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    let has_cover = parsed.streams.iter().any(|s| {
        s.codec_type.as_deref() == Some("video")
            && s.disposition.get("attached_pic").copied() == Some(1)
    });

    // Container tags first, then stream tags (Ogg/Opus keep them on the stream).
    let tag = |name: &str| {
        parsed
            .format
            .as_ref()
            .and_then(|f| lookup(&f.tags, name))
            .or_else(|| audio.and_then(|s| lookup(&s.tags, name)))
    };

    Ok(MusicMetadata {
        title: tag("title"),
        artist: tag("artist"),
        album: tag("album"),
        duration_seconds: parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse().ok()),
        codec: audio.and_then(|s| s.codec_name.clone()),
        bitrate: parsed
            .format
            .as_ref()
            .and_then(|f| f.bit_rate.as_deref())
            .and_then(|b| b.parse().ok()),
        sample_rate: audio
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|r| r.parse().ok()),
        channels: audio.and_then(|s| s.channels),
        has_cover,
    })
}

fn lookup(tags: &HashMap<String, String>, name: &str) -> Option<String> {
    tags.iter()
        .find(|(key, value)| key.eq_ignore_ascii_case(name) && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}
