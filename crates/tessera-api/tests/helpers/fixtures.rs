//! Test fixtures: upload bodies and image blobs.

use std::io::Cursor;

/// Deterministic non-repeating bytes, so misordered chunks change the assembled file.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// PNG of the given dimensions.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 144, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}
