//! Manifest reconciliation: raw slicer manifest in, catalog descriptors out.

use crate::catalog::{CSV_CATALOG_NAME, CatalogWriter, JSON_CATALOG_NAME};
use crate::checksum::{Checksum, Md5Checksum};
use crate::descriptor::{FileDescriptor, base_name};
use crate::error::{Error, Result};
use crate::manifest::{self, ManifestDetail, RawManifestRow};
use std::path::Path;
use tracing::{Span, debug, error, info, info_span};

/// How source entries were grouped into slicer jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcePolicy {
    /// The whole input root is one source unit.
    WholeDirectory,
    /// Every immediate entry of the input root is its own source unit.
    #[default]
    PerEntry,
}

impl SourcePolicy {
    /// Policy from the whole-directory flag.
    pub fn from_whole_directory(whole_directory: bool) -> Self {
        if whole_directory {
            SourcePolicy::WholeDirectory
        } else {
            SourcePolicy::PerEntry
        }
    }

    /// Returns the string representation of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePolicy::WholeDirectory => "whole-directory",
            SourcePolicy::PerEntry => "per-entry",
        }
    }
}

/// Turns the raw manifest of an output directory into descriptors and catalogs.
pub struct Reconciler {
    checksum: Box<dyn Checksum>,
    catalog: CatalogWriter,
    json_name: String,
    table_name: String,
    span: Span,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(info_span!("reconcile"))
    }
}

impl Reconciler {
    /// Create a reconciler using MD5 checksums and the default catalog names.
    pub fn new(span: Span) -> Self {
        Self {
            checksum: Box::new(Md5Checksum),
            catalog: CatalogWriter::new(span.clone()),
            json_name: JSON_CATALOG_NAME.to_string(),
            table_name: CSV_CATALOG_NAME.to_string(),
            span,
        }
    }

    /// Use a different checksum primitive.
    pub fn with_checksum(mut self, checksum: impl Checksum + 'static) -> Self {
        self.checksum = Box::new(checksum);
        self
    }

    /// Use different catalog file names.
    pub fn with_catalog_names(
        mut self,
        json_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        self.json_name = json_name.into();
        self.table_name = table_name.into();
        self
    }

    /// Reconcile the manifest in `output_dir` and write the catalogs there.
    ///
    /// Rows are processed in order; the first failing row aborts the whole
    /// run before any catalog file is written.
    pub fn reconcile(
        &self,
        output_dir: &Path,
        policy: SourcePolicy,
        compute_checksums: bool,
        input_root: &Path,
    ) -> Result<Vec<FileDescriptor>> {
        let lines = manifest::read_lines(output_dir).inspect_err(|e| {
            error!(parent: &self.span, dir = %output_dir.display(), error = %e, "cannot read raw manifest");
        })?;

        let mut descriptors = Vec::with_capacity(lines.len());
        for (line_no, line) in &lines {
            let desc = self
                .reconcile_row(*line_no, line, output_dir, policy, compute_checksums, input_root)
                .inspect_err(|e| {
                    error!(parent: &self.span, line = line_no, error = %e, "manifest row rejected");
                })?;
            descriptors.push(desc);
        }

        self.catalog
            .write(&descriptors, output_dir, &self.json_name, &self.table_name)?;

        info!(
            parent: &self.span,
            descriptors = descriptors.len(),
            policy = policy.as_str(),
            dir = %output_dir.display(),
            "manifest reconciled"
        );
        Ok(descriptors)
    }

    fn reconcile_row(
        &self,
        line_no: usize,
        line: &str,
        output_dir: &Path,
        policy: SourcePolicy,
        compute_checksums: bool,
        input_root: &Path,
    ) -> Result<FileDescriptor> {
        let row = RawManifestRow::parse(line_no, line)?;
        let detail = row.decode_detail()?;

        let mut desc =
            FileDescriptor::for_payload(output_dir, &row.payload_id, &row.piece_id, row.archive_size);
        resolve_source(&mut desc, &detail, policy, input_root)?;

        if compute_checksums {
            let source = Path::new(&desc.source_path);
            if source.is_file() {
                desc.source_checksum = self.digest(source)?;
            } else {
                debug!(parent: &self.span, path = %source.display(), "source not a file, skipping checksum");
            }
            desc.archive_checksum = self.digest(Path::new(&desc.archive_path))?;
        }

        Ok(desc)
    }

    fn digest(&self, path: &Path) -> Result<String> {
        self.checksum.digest(path).map_err(|e| match e {
            Error::Checksum { .. } => e,
            other => Error::checksum(path, other.to_string()),
        })
    }
}

/// Fill in the source fields of `desc` according to `policy`.
fn resolve_source(
    desc: &mut FileDescriptor,
    detail: &ManifestDetail,
    policy: SourcePolicy,
    input_root: &Path,
) -> Result<()> {
    match policy {
        SourcePolicy::WholeDirectory => {
            desc.source_name = base_name(input_root);
            desc.source_path = input_root.display().to_string();
            desc.source_size = detail.total_link_size();
        }
        SourcePolicy::PerEntry => {
            let link = detail.links.first().ok_or_else(|| {
                Error::manifest_parse(
                    serde_json::to_string(detail).unwrap_or_default(),
                    "detail has no links",
                )
            })?;
            desc.source_name = link.name.clone();
            desc.source_path = input_root.join(&link.name).display().to_string();
            desc.source_size = link.size;
        }
    }
    Ok(())
}
