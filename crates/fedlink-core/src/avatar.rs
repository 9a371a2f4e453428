use sha2::{Digest, Sha256};

/// SHA-256 hex fingerprint of an avatar change signal (a URL, an ETag, ...).
///
/// Providers that expose no deterministic signal get their avatar URL hashed
/// instead; dedup then only reacts to URL rotation, not actual image change,
/// which is the accepted weaker guarantee.
pub fn source_fingerprint(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sniff a downloaded avatar's format from its magic bytes.
///
/// Returns `(extension, mime type)`. Anything that isn't a recognized image
/// format is rejected so arbitrary provider responses are never persisted as
/// avatars.
pub fn detect_image_format(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(("jpg", "image/jpeg"));
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(("png", "image/png"));
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(("gif", "image/gif"));
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(("webp", "image/webp"));
    }
    None
}
