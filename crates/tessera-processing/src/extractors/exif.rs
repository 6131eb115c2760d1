use exif::{Exif, In, Reader, Tag, Value};
use img_parts::{jpeg::Jpeg, png::Png, ImageEXIF};
use serde::Serialize;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TIFF_LE: &[u8] = b"II*\0";
const TIFF_BE: &[u8] = b"MM\0*";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExifMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,
    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_number: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    /// Millimetres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitude: Option<f64>,
}

impl ExifMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn from_exif(exif: &Exif) -> Self {
        Self {
            make: ascii(exif, Tag::Make),
            model: ascii(exif, Tag::Model),
            lens: ascii(exif, Tag::LensModel),
            captured_at: ascii(exif, Tag::DateTimeOriginal).or_else(|| ascii(exif, Tag::DateTime)),
            exposure_time: rational(exif, Tag::ExposureTime),
            f_number: rational(exif, Tag::FNumber),
            iso: uint(exif, Tag::PhotographicSensitivity),
            focal_length: rational(exif, Tag::FocalLength),
            orientation: uint(exif, Tag::Orientation),
            gps_latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S'),
            gps_longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W'),
        }
    }
}

/// EXIF reader with an optional brute-force fallback
///
/// Strict mode only accepts a well-formed container. Brute force keeps whatever fields parse,
/// then looks for an EXIF block through the container parsers and finally by scanning the raw
/// bytes for an `Exif\0\0` or TIFF header.
#[derive(Debug, Clone)]
pub struct ExifExtractor {
    brute_force: bool,
}

impl ExifExtractor {
    pub fn new(brute_force: bool) -> Self {
        Self { brute_force }
    }

    /// `Ok(None)` when the file carries no readable EXIF data.
    pub async fn extract(&self, path: &Path) -> std::io::Result<Option<ExifMetadata>> {
        let path: PathBuf = path.to_path_buf();
        let brute_force = self.brute_force;
        tokio::task::spawn_blocking(move || {
            let data = std::fs::read(&path)?;
            Ok(read_exif(&data, brute_force))
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

fn read_exif(data: &[u8], brute_force: bool) -> Option<ExifMetadata> {
    let mut reader = Reader::new();
    let strict = reader.read_from_container(&mut BufReader::new(Cursor::new(data)));

    let exif = match strict {
        Ok(exif) => Some(exif),
        Err(e) if brute_force => {
            tracing::debug!(error = %e, "Strict EXIF parse failed, trying brute force");
            reader.continue_on_error(true);
            tolerant(reader.read_from_container(&mut BufReader::new(Cursor::new(data))))
                .or_else(|| embedded_block(data).and_then(|b| tolerant(reader.read_raw(b))))
                .or_else(|| scan_for_block(data).and_then(|b| tolerant(reader.read_raw(b))))
        }
        Err(_) => None,
    };

    exif.map(|e| ExifMetadata::from_exif(&e))
        .filter(|m| !m.is_empty())
}

fn tolerant(result: Result<Exif, exif::Error>) -> Option<Exif> {
    match result {
        Ok(exif) => Some(exif),
        Err(exif::Error::PartialResult(partial)) => {
            let (exif, errors) = partial.into_inner();
            tracing::debug!(skipped = errors.len(), "Kept partial EXIF result");
            Some(exif)
        }
        Err(_) => None,
    }
}

/// TIFF payload of the EXIF block as located by the JPEG/PNG container parsers
fn embedded_block(data: &[u8]) -> Option<Vec<u8>> {
    let bytes = bytes::Bytes::copy_from_slice(data);
    if let Ok(jpeg) = Jpeg::from_bytes(bytes.clone()) {
        return jpeg.exif().map(|b| b.to_vec());
    }
    if let Ok(png) = Png::from_bytes(bytes) {
        return png.exif().map(|b| b.to_vec());
    }
    None
}

fn scan_for_block(data: &[u8]) -> Option<Vec<u8>> {
    if let Some(pos) = find(data, EXIF_HEADER) {
        return Some(data[pos + EXIF_HEADER.len()..].to_vec());
    }
    [TIFF_LE, TIFF_BE]
        .iter()
        .filter_map(|marker| find(data, marker))
        .min()
        .map(|pos| data[pos..].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Ascii(ref values) => values
            .iter()
            .map(|v| String::from_utf8_lossy(v).trim_matches(char::from(0)).trim().to_string())
            .find(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Rational(ref values) => values
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.to_f64()),
        _ => None,
    }
}

fn uint(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

/// Degrees/minutes/seconds to signed decimal degrees
fn coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(ref dms) = field.value else {
        return None;
    };
    if dms.len() < 3 || dms.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;

    let negative = match exif.get_field(ref_tag, In::PRIMARY).map(|f| &f.value) {
        Some(Value::Ascii(values)) => values
            .first()
            .and_then(|v| v.first())
            .is_some_and(|c| c.eq_ignore_ascii_case(&negative_ref)),
        _ => false,
    };

    Some(if negative { -degrees } else { degrees })
}
