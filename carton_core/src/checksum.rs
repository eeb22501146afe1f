//! File checksum primitive.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Computes a content digest of a file.
pub trait Checksum: Send + Sync {
    /// Digest of the file at `path`, lowercase hex. Fails if the path is unreadable.
    fn digest(&self, path: &Path) -> Result<String>;
}

/// MD5 digest, as stored in the `*_md5` catalog columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Checksum;

impl Checksum for Md5Checksum {
    fn digest(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(|e| Error::checksum(path, e.to_string()))?;
        let mut ctx = md5::Context::new();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Error::checksum(path, e.to_string()))?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }

        Ok(format!("{:x}", ctx.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_md5_known_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let digest = Md5Checksum.digest(&path).unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_md5_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(
            Md5Checksum.digest(&path).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_md5_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Md5Checksum.digest(&temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }));
    }
}
