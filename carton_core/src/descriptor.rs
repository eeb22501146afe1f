//! Reconciled file descriptors.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// File extension of every archive slice.
pub const ARCHIVE_EXTENSION: &str = ".car";

/// One reconciled catalog record: a source unit and the archive slice holding it.
///
/// Field order here is the key order of the JSON catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Unique per descriptor (UUID v4).
    pub id: String,
    pub source_name: String,
    pub source_path: String,
    pub source_size: u64,
    /// Empty when checksums were not requested or the source is not a file.
    #[serde(default)]
    pub source_checksum: String,
    pub archive_name: String,
    pub archive_path: String,
    #[serde(default)]
    pub archive_checksum: String,
    pub archive_url: String,
    pub archive_size: u64,
    pub payload_id: String,
    pub piece_id: String,
    #[serde(default)]
    pub scheduled_epoch: Option<i64>,
    #[serde(default)]
    pub source_ref: Option<i32>,
}

impl FileDescriptor {
    /// Create a descriptor for the archive named after `payload_id` inside `output_dir`.
    ///
    /// The archive name, path and url are derived from the payload id; source
    /// fields start empty and are filled in by policy resolution.
    pub fn for_payload(
        output_dir: &Path,
        payload_id: impl Into<String>,
        piece_id: impl Into<String>,
        archive_size: u64,
    ) -> Self {
        let payload_id = payload_id.into();
        let archive_name = archive_file_name(&payload_id);
        let archive_path = output_dir.join(&archive_name).display().to_string();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_name: String::new(),
            source_path: String::new(),
            source_size: 0,
            source_checksum: String::new(),
            archive_url: archive_name.clone(),
            archive_name,
            archive_path,
            archive_checksum: String::new(),
            archive_size,
            payload_id,
            piece_id: piece_id.into(),
            scheduled_epoch: None,
            source_ref: None,
        }
    }
}

/// Archive file name for a payload id.
pub fn archive_file_name(payload_id: &str) -> String {
    format!("{}{}", payload_id, ARCHIVE_EXTENSION)
}

/// Last component of `path`, or the whole path when it has none (e.g. `/`, `..`).
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_for_payload_derives_archive_fields() {
        let out = PathBuf::from("/data/out");
        let desc = FileDescriptor::for_payload(&out, "bafyabc", "baga123", 4096);

        assert_eq!(desc.archive_name, "bafyabc.car");
        assert_eq!(desc.archive_url, desc.archive_name);
        assert_eq!(
            desc.archive_path,
            out.join("bafyabc.car").display().to_string()
        );
        assert_eq!(desc.archive_size, 4096);
        assert_eq!(desc.piece_id, "baga123");
        assert!(desc.scheduled_epoch.is_none());
        assert!(desc.source_ref.is_none());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/data/input")), "input");
        assert_eq!(base_name(Path::new("input/a.txt")), "a.txt");
        assert_eq!(base_name(Path::new("/")), "/");
    }

    #[test]
    fn test_ids_are_unique() {
        let out = PathBuf::from("out");
        let a = FileDescriptor::for_payload(&out, "p", "q", 1);
        let b = FileDescriptor::for_payload(&out, "p", "q", 1);
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_json_field_names() {
        let desc = FileDescriptor::for_payload(Path::new("o"), "p", "q", 1);
        let value = serde_json::to_value(&desc).unwrap();
        let obj = value.as_object().unwrap();

        for key in [
            "id",
            "sourceName",
            "sourcePath",
            "sourceSize",
            "sourceChecksum",
            "archiveName",
            "archivePath",
            "archiveChecksum",
            "archiveUrl",
            "archiveSize",
            "payloadId",
            "pieceId",
            "scheduledEpoch",
            "sourceRef",
        ] {
            assert!(obj.contains_key(key), "missing key {}", key);
        }
        assert!(obj["scheduledEpoch"].is_null());
    }
}
