//! Storage key layout shared by every backend.
//!
//! - assembled files: `files/{file_id}/{name}`
//! - thumbnails: `thumbnails/{file_id}.jpg`
//! - staged chunks: `uploads/chunked/{session_id}/chunk.{index}`

use uuid::Uuid;

pub fn file_key(file_id: Uuid, name: &str) -> String {
    format!("files/{}/{}", file_id, name)
}

pub fn thumbnail_key(file_id: Uuid) -> String {
    format!("thumbnails/{}.jpg", file_id)
}

pub fn chunk_key(session_id: Uuid, index: u32) -> String {
    format!("uploads/chunked/{}/chunk.{}", session_id, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            file_key(id, "beach.jpg"),
            "files/00000000-0000-0000-0000-000000000000/beach.jpg"
        );
        assert_eq!(
            thumbnail_key(id),
            "thumbnails/00000000-0000-0000-0000-000000000000.jpg"
        );
        assert_eq!(
            chunk_key(id, 7),
            "uploads/chunked/00000000-0000-0000-0000-000000000000/chunk.7"
        );
    }
}
