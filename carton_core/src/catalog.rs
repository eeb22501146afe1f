//! Catalog output: JSON document and fixed-schema CSV export.

use crate::descriptor::FileDescriptor;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{Span, error, info, info_span};

/// Default JSON catalog file name.
pub const JSON_CATALOG_NAME: &str = "car.json";

/// Default CSV catalog file name.
pub const CSV_CATALOG_NAME: &str = "car.csv";

/// Column order of the CSV export.
pub const CSV_HEADER: [&str; 15] = [
    "id",
    "source_file_name",
    "source_file_path",
    "source_file_md5",
    "source_file_size",
    "car_file_name",
    "car_file_path",
    "car_file_md5",
    "car_file_url",
    "car_file_size",
    "pay_load_cid",
    "piece_cid",
    "start_epoch",
    "source_id",
    "deals",
];

/// Writes descriptor sets as a JSON catalog plus a CSV export.
#[derive(Debug, Clone)]
pub struct CatalogWriter {
    span: Span,
}

impl Default for CatalogWriter {
    fn default() -> Self {
        Self::new(info_span!("catalog"))
    }
}

impl CatalogWriter {
    /// Create a writer that logs under `span`.
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Write `descriptors` to `output_dir/json_name` and `output_dir/table_name`.
    ///
    /// Returns the path of the JSON catalog.
    pub fn write(
        &self,
        descriptors: &[FileDescriptor],
        output_dir: &Path,
        json_name: &str,
        table_name: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(output_dir).map_err(|e| {
            error!(parent: &self.span, dir = %output_dir.display(), error = %e, "cannot create output directory");
            Error::io_at(output_dir, e)
        })?;

        let json_path = output_dir.join(json_name);
        write_json(descriptors, &json_path).inspect_err(|e| {
            error!(parent: &self.span, path = %json_path.display(), error = %e, "failed to write json catalog");
        })?;
        info!(parent: &self.span, path = %json_path.display(), "metadata json file generated");

        let csv_path = output_dir.join(table_name);
        write_csv(descriptors, &csv_path).inspect_err(|e| {
            error!(parent: &self.span, path = %csv_path.display(), error = %e, "failed to write csv catalog");
        })?;
        info!(parent: &self.span, path = %csv_path.display(), rows = descriptors.len(), "metadata csv generated");

        Ok(json_path)
    }
}

/// Load a JSON catalog written by [`CatalogWriter::write`].
pub fn read_catalog(path: &Path) -> Result<Vec<FileDescriptor>> {
    let content = fs::read(path).map_err(|e| Error::io_at(path, e))?;
    Ok(serde_json::from_slice(&content)?)
}

/// Render one descriptor as its 15 CSV columns.
pub fn csv_columns(desc: &FileDescriptor) -> [String; 15] {
    [
        desc.id.clone(),
        desc.source_name.clone(),
        desc.source_path.clone(),
        desc.source_checksum.clone(),
        desc.source_size.to_string(),
        desc.archive_name.clone(),
        desc.archive_path.clone(),
        desc.archive_checksum.clone(),
        desc.archive_url.clone(),
        desc.archive_size.to_string(),
        desc.payload_id.clone(),
        desc.piece_id.clone(),
        desc.scheduled_epoch.map(|e| e.to_string()).unwrap_or_default(),
        desc.source_ref.map(|r| r.to_string()).unwrap_or_default(),
        // deals are attached later by the storage side
        String::new(),
    ]
}

fn write_json(descriptors: &[FileDescriptor], path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    descriptors.serialize(&mut ser)?;

    write_atomic(path, &buf)
}

fn write_csv(descriptors: &[FileDescriptor], path: &Path) -> Result<()> {
    let mut out = String::new();
    push_record(&mut out, CSV_HEADER.iter().copied());
    for desc in descriptors {
        let columns = csv_columns(desc);
        push_record(&mut out, columns.iter().map(String::as_str));
    }

    write_atomic(path, out.as_bytes())
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push('\n');
}

/// Quote a field when it contains a separator, quote or line break.
fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Write a file atomically using tempfile.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.persist(path)?;
    Ok(())
}
