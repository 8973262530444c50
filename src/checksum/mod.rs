mod error;

pub use error::{ChecksumError, ChecksumResult};

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// SHA-256 over an in-memory buffer, lowercase hex encoded.
pub fn hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 over a file, streamed in fixed-size reads so whole-file checksums
/// don't require buffering the file in memory.
pub async fn hash_file(path: &Path) -> ChecksumResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ChecksumError::FileNotFound(format!("{}: {e}", path.display())))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// True iff `hash(data)` equals `expected` (case-insensitive hex compare).
pub fn verify(data: &[u8], expected: &str) -> bool {
    hash(data).eq_ignore_ascii_case(expected)
}

/// Validates that a string looks like a checksum this module produced:
/// exactly 64 lowercase hex characters.
pub fn validate_encoding(checksum: &str) -> ChecksumResult<()> {
    if checksum.len() != 64 {
        return Err(ChecksumError::InvalidLength(checksum.len()));
    }
    hex::decode(checksum)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_hash_is_64_lowercase_hex() {
        let digest = hash(b"Hello, World!");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_matches_known_vector() {
        // sha256("Hello, World!")
        assert_eq!(
            hash(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986"
        );
    }

    #[test]
    fn test_hash_is_pure() {
        let data = b"repeatable input";
        assert_eq!(hash(data), hash(data));
    }

    #[test]
    fn test_hash_differs_for_different_input() {
        assert_ne!(hash(b"a"), hash(b"b"));
    }

    #[test]
    fn test_verify_success_and_failure() {
        let data = b"chunk payload";
        let digest = hash(data);
        assert!(verify(data, &digest));
        assert!(!verify(data, "0".repeat(64).as_str()));
    }

    #[tokio::test]
    async fn test_hash_file_matches_in_memory_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();

        let mut file = tokio::fs::File::create(&path).await.unwrap();
        file.write_all(&data).await.unwrap();
        file.sync_all().await.unwrap();
        drop(file);

        let file_digest = hash_file(&path).await.unwrap();
        assert_eq!(file_digest, hash(&data));
    }

    #[tokio::test]
    async fn test_hash_file_missing() {
        let result = hash_file(Path::new("/nonexistent/path/does-not-exist")).await;
        assert!(matches!(result, Err(ChecksumError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_encoding() {
        assert!(validate_encoding(&hash(b"x")).is_ok());
        assert!(matches!(
            validate_encoding("short"),
            Err(ChecksumError::InvalidLength(5))
        ));
        assert!(matches!(
            validate_encoding(&"z".repeat(64)),
            Err(ChecksumError::InvalidEncoding(_))
        ));
    }
}
