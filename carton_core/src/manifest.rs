//! Raw slicer manifest format.
//!
//! The slicer appends one line per archive slice to `manifest.csv` in the
//! output directory:
//!
//! ```text
//! payload_cid,filename,piece_cid,piece_size,detail
//! <payload>,<payload>.car,<piece>,<archive bytes>,{"Name":...,"Link":[...]}
//! ```
//!
//! The trailing detail column is a JSON document written without quoting, so
//! it may itself contain the separator. A row is therefore four fixed columns
//! plus one variable-width tail: everything from the fifth field on is joined
//! back together with the separator before decoding.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// File name of the raw manifest inside an output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.csv";

/// First line of every raw manifest.
pub const MANIFEST_HEADER: &str = "payload_cid,filename,piece_cid,piece_size,detail";

/// Column separator.
pub const FIELD_SEPARATOR: char = ',';

/// Minimum number of fields in a data row.
pub const MIN_FIELDS: usize = 5;

/// A source entry bundled into an archive slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLink {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Hash", alias = "hash", default)]
    pub hash: String,
    #[serde(rename = "Size", alias = "size", default)]
    pub size: u64,
}

/// Decoded trailing column of a manifest row.
///
/// Missing keys decode as zero values and a `null` link list as empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDetail {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Hash", alias = "hash", default)]
    pub hash: String,
    #[serde(rename = "Size", alias = "size", default)]
    pub size: u64,
    #[serde(
        rename = "Link",
        alias = "links",
        alias = "link",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub links: Vec<ManifestLink>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ManifestLink>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ManifestLink>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ManifestDetail {
    /// Sum of all link sizes.
    pub fn total_link_size(&self) -> u64 {
        self.links.iter().map(|l| l.size).sum()
    }
}

/// One data line of the raw manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifestRow {
    pub payload_id: String,
    /// Second column; carried for the writer, never consumed by reconciliation.
    pub file_name: String,
    pub piece_id: String,
    pub archive_size: u64,
    /// The rejoined JSON tail, exactly as it appeared on the line.
    pub detail: String,
}

impl RawManifestRow {
    /// Parse a data line. `line_no` is 1-based and only used for diagnostics.
    ///
    /// A malformed archive size is read as zero rather than rejected.
    pub fn parse(line_no: usize, line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() < MIN_FIELDS {
            return Err(Error::manifest_format(line_no, fields.len()));
        }

        let sep = FIELD_SEPARATOR.to_string();
        Ok(Self {
            payload_id: fields[0].to_string(),
            file_name: fields[1].to_string(),
            piece_id: fields[2].to_string(),
            archive_size: fields[3].parse::<u64>().unwrap_or(0),
            detail: fields[4..].join(&sep),
        })
    }

    /// Decode the JSON tail.
    pub fn decode_detail(&self) -> Result<ManifestDetail> {
        serde_json::from_str(&self.detail)
            .map_err(|e| Error::manifest_parse(self.detail.clone(), e.to_string()))
    }

    /// Build a row from a decoded detail (used by slicers).
    pub fn new(
        payload_id: impl Into<String>,
        file_name: impl Into<String>,
        piece_id: impl Into<String>,
        archive_size: u64,
        detail: &ManifestDetail,
    ) -> Result<Self> {
        Ok(Self {
            payload_id: payload_id.into(),
            file_name: file_name.into(),
            piece_id: piece_id.into(),
            archive_size,
            detail: serde_json::to_string(detail)?,
        })
    }

    /// Serialize to a manifest line (without trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.payload_id,
            self.file_name,
            self.piece_id,
            self.archive_size,
            self.detail,
            sep = FIELD_SEPARATOR
        )
    }
}

/// Read the data lines of the manifest in `output_dir`, header skipped.
///
/// Returns `(line_no, line)` pairs. Trailing blank lines are dropped; blank
/// lines between rows are kept and fail to parse like any short row.
pub fn read_lines(output_dir: &Path) -> Result<Vec<(usize, String)>> {
    let path = output_dir.join(MANIFEST_FILE_NAME);
    let content = fs::read_to_string(&path).map_err(|e| Error::io_at(&path, e))?;

    let mut lines: Vec<(usize, String)> = content
        .lines()
        .enumerate()
        .skip(1)
        .map(|(i, line)| (i + 1, line.to_string()))
        .collect();
    while lines.last().is_some_and(|(_, line)| line.trim().is_empty()) {
        lines.pop();
    }
    Ok(lines)
}

/// Append rows to the manifest in `output_dir`, writing the header first if
/// the manifest does not exist yet.
pub fn append_rows(output_dir: &Path, rows: &[RawManifestRow]) -> Result<()> {
    let path = output_dir.join(MANIFEST_FILE_NAME);
    let fresh = !path.exists();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io_at(&path, e))?;

    let mut buf = String::new();
    if fresh {
        buf.push_str(MANIFEST_HEADER);
        buf.push('\n');
    }
    for row in rows {
        buf.push_str(&row.to_line());
        buf.push('\n');
    }

    file.write_all(buf.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DETAIL: &str = r#"{"Name":"grp","Hash":"h","Size":300,"Link":[{"Name":"a","Hash":"x","Size":100},{"Name":"b","Hash":"y","Size":200}]}"#;

    #[test]
    fn test_parse_rejoins_detail() {
        let line = format!("pay,pay.car,piece,1234,{}", DETAIL);
        let row = RawManifestRow::parse(2, &line).unwrap();

        assert_eq!(row.payload_id, "pay");
        assert_eq!(row.piece_id, "piece");
        assert_eq!(row.archive_size, 1234);
        assert_eq!(row.detail, DETAIL);

        let detail = row.decode_detail().unwrap();
        assert_eq!(detail.links.len(), 2);
        assert_eq!(detail.total_link_size(), 300);
    }

    #[test]
    fn test_parse_too_few_fields() {
        let err = RawManifestRow::parse(3, "pay,pay.car,piece,12").unwrap_err();
        match err {
            Error::ManifestFormat { line, fields } => {
                assert_eq!(line, 3);
                assert_eq!(fields, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_lenient_size() {
        let row = RawManifestRow::parse(2, &format!("p,f,q,not-a-number,{}", DETAIL)).unwrap();
        assert_eq!(row.archive_size, 0);
    }

    #[test]
    fn test_decode_truncated_detail() {
        let row = RawManifestRow::parse(2, r#"p,f,q,1,{"Name":"a","Link":[{"Name":"x""#).unwrap();
        match row.decode_detail().unwrap_err() {
            Error::ManifestParse { fragment, .. } => {
                assert_eq!(fragment, r#"{"Name":"a","Link":[{"Name":"x""#)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_lowercase_keys() {
        let row = RawManifestRow::parse(
            2,
            r#"p,f,q,1,{"name":"a","hash":"h","size":5,"links":[{"name":"a","hash":"h","size":5}]}"#,
        )
        .unwrap();
        let detail = row.decode_detail().unwrap();
        assert_eq!(detail.links[0].name, "a");
        assert_eq!(detail.links[0].size, 5);
    }

    #[test]
    fn test_decode_null_links_and_missing_keys() {
        let row = RawManifestRow::parse(2, r#"p,f,q,1,{"Hash":"h","Link":null}"#).unwrap();
        let detail = row.decode_detail().unwrap();
        assert_eq!(detail.name, "");
        assert_eq!(detail.size, 0);
        assert!(detail.links.is_empty());
        assert_eq!(detail.total_link_size(), 0);

        let row = RawManifestRow::parse(2, r#"p,f,q,1,{"Name":"g","Link":[{"Hash":"x"}]}"#).unwrap();
        let detail = row.decode_detail().unwrap();
        assert_eq!(detail.links[0].name, "");
        assert_eq!(detail.links[0].size, 0);
    }

    #[test]
    fn test_read_lines_keeps_interior_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let content = format!("{}\na,b,c,1,{{}}\n\nd,e,f,2,{{}}\n\n", MANIFEST_HEADER);
        fs::write(temp_dir.path().join(MANIFEST_FILE_NAME), content).unwrap();

        let lines = read_lines(temp_dir.path()).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], (3, String::new()));
        assert_eq!(lines[2].0, 4);
        assert!(matches!(
            RawManifestRow::parse(lines[1].0, &lines[1].1),
            Err(Error::ManifestFormat { line: 3, fields: 1 })
        ));
    }

    #[test]
    fn test_append_writes_header_once() {
        let temp_dir = TempDir::new().unwrap();
        let detail: ManifestDetail = serde_json::from_str(DETAIL).unwrap();
        let row = RawManifestRow::new("p1", "p1.car", "q1", 10, &detail).unwrap();

        append_rows(temp_dir.path(), std::slice::from_ref(&row)).unwrap();
        append_rows(temp_dir.path(), &[row]).unwrap();

        let content = fs::read_to_string(temp_dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], MANIFEST_HEADER);

        let data = read_lines(temp_dir.path()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].0, 2);
        let parsed = RawManifestRow::parse(data[0].0, &data[0].1).unwrap();
        assert_eq!(parsed.decode_detail().unwrap(), detail);
    }

    #[test]
    fn test_read_lines_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            read_lines(temp_dir.path()),
            Err(Error::IoAt { .. })
        ));
    }
}
