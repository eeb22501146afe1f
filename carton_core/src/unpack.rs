//! Restore primitives: extract archive slices, then merge extracted parts.

use crate::archive::{self, RecordKind};
use crate::descriptor::ARCHIVE_EXTENSION;
use crate::error::{Error, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{Span, debug, info, info_span};

/// Staging directory for extracted file segments, inside the output directory.
pub const PARTS_DIR: &str = ".carton-parts";

/// Suffix of a staged segment file.
const PART_SUFFIX: &str = ".part";

/// Reverse of slicing, in two stages.
pub trait Unpacker: Send + Sync {
    /// Unpack every archive slice in `input_dir` into intermediates under `output_dir`.
    fn extract(&self, input_dir: &Path, output_dir: &Path, parallelism: usize) -> Result<()>;

    /// Reassemble the intermediates in `output_dir` into the original files.
    fn merge(&self, output_dir: &Path, parallelism: usize) -> Result<()>;
}

/// Built-in unpacker for the archive format of [`crate::archive`].
///
/// Directories are created directly in the output directory. File segments
/// are staged as `PARTS_DIR/<path>/<offset>.part` and concatenated by
/// [`Unpacker::merge`].
#[derive(Debug, Clone)]
pub struct LocalUnpacker {
    span: Span,
}

impl Default for LocalUnpacker {
    fn default() -> Self {
        Self::new(info_span!("unpacker"))
    }
}

impl LocalUnpacker {
    /// Create an unpacker that logs under `span`.
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    fn extract_archive(&self, archive: &Path, output_dir: &Path) -> Result<()> {
        let staging = output_dir.join(PARTS_DIR);

        let records = archive::read_archive(archive, |record, data| {
            let rel = archive::safe_relative(&record.path).ok_or_else(|| {
                Error::archive(archive, format!("unsafe record path: {:?}", record.path))
            })?;

            match record.kind {
                RecordKind::Dir => {
                    let dir = output_dir.join(&rel);
                    fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
                }
                RecordKind::File => {
                    let part_dir = staging.join(&rel);
                    fs::create_dir_all(&part_dir).map_err(|e| Error::io_at(&part_dir, e))?;
                    let part = part_dir.join(part_file_name(record.offset));
                    let mut out = BufWriter::new(
                        File::create(&part).map_err(|e| Error::io_at(&part, e))?,
                    );
                    io::copy(data, &mut out)?;
                    out.flush()?;
                }
            }
            Ok(())
        })?;

        debug!(parent: &self.span, archive = %archive.display(), records, "archive extracted");
        Ok(())
    }
}

impl Unpacker for LocalUnpacker {
    fn extract(&self, input_dir: &Path, output_dir: &Path, parallelism: usize) -> Result<()> {
        let mut archives = Vec::new();
        for entry in fs::read_dir(input_dir).map_err(|e| Error::io_at(input_dir, e))? {
            let path = entry?.path();
            let is_archive = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ARCHIVE_EXTENSION));
            if is_archive && path.is_file() {
                archives.push(path);
            }
        }
        archives.sort();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .build()?;
        pool.install(|| {
            archives
                .par_iter()
                .try_for_each(|archive| self.extract_archive(archive, output_dir))
        })?;

        info!(parent: &self.span, archives = archives.len(), input = %input_dir.display(), "archives extracted");
        Ok(())
    }

    fn merge(&self, output_dir: &Path, parallelism: usize) -> Result<()> {
        let staging = output_dir.join(PARTS_DIR);
        if !staging.exists() {
            return Ok(());
        }

        // file path (relative) -> parts sorted by offset
        let mut files: BTreeMap<PathBuf, BTreeMap<u64, PathBuf>> = BTreeMap::new();
        let walker = ignore::WalkBuilder::new(&staging)
            .standard_filters(false)
            .follow_links(false)
            .build();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let part = entry.path();
            let offset = part
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_part_offset)
                .ok_or_else(|| Error::archive(part, "unexpected file in staging directory"))?;
            let rel = part
                .parent()
                .and_then(|p| p.strip_prefix(&staging).ok())
                .ok_or_else(|| Error::archive(part, "part outside of staging directory"))?;

            files
                .entry(rel.to_path_buf())
                .or_default()
                .insert(offset, part.to_path_buf());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .build()?;
        pool.install(|| {
            files
                .par_iter()
                .try_for_each(|(rel, parts)| merge_parts(&output_dir.join(rel), parts))
        })?;

        fs::remove_dir_all(&staging).map_err(|e| Error::io_at(&staging, e))?;

        info!(parent: &self.span, files = files.len(), output = %output_dir.display(), "files merged");
        Ok(())
    }
}

/// Concatenate `parts` (keyed by offset) into `target`, rejecting gaps and overlaps.
fn merge_parts(target: &Path, parts: &BTreeMap<u64, PathBuf>) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    {
        let mut out = BufWriter::new(temp_file.as_file_mut());
        let mut expected = 0u64;
        for (&offset, part) in parts {
            if offset != expected {
                return Err(Error::archive(
                    target,
                    format!("segment at offset {} but expected {}", offset, expected),
                ));
            }
            let mut input = File::open(part).map_err(|e| Error::io_at(part, e))?;
            expected += io::copy(&mut input, &mut out)?;
        }
        out.flush()?;
    }
    temp_file.persist(target)?;
    Ok(())
}

fn part_file_name(offset: u64) -> String {
    format!("{:020}{}", offset, PART_SUFFIX)
}

fn parse_part_offset(name: &str) -> Option<u64> {
    name.strip_suffix(PART_SUFFIX)?.parse().ok()
}
