//! Content-identity hashing (spec.md §3 DesignFile.sha256, Attachment content hash).

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// SHA-256 of an in-memory buffer, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a reader, streamed in fixed-size chunks so large downloads
/// don't need to be buffered wholesale before hashing.
pub fn sha256_hex_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `sha256(sorted(relpath + ":" + size))[:32]` fingerprint used by the
/// bulk-folder scanner (spec.md §4.12).
pub fn content_fingerprint<'a>(entries: impl IntoIterator<Item = (&'a str, u64)>) -> String {
    let mut parts: Vec<String> = entries
        .into_iter()
        .map(|(rel, size)| format!("{}:{}", rel, size))
        .collect();
    parts.sort();
    let joined = parts.join("\n");
    let full = sha256_hex(joined.as_bytes());
    full.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
        );
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = content_fingerprint(vec![("b.stl", 10), ("a.stl", 20)]);
        let b = content_fingerprint(vec![("a.stl", 20), ("b.stl", 10)]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
