//! Archive slicing: the [`Slicer`] interface and the built-in [`LocalSlicer`].

use crate::archive::{ArchiveHeader, MAX_PATH_LEN, RecordHeader, RecordKind};
use crate::descriptor::{archive_file_name, base_name};
use crate::error::{Error, Result};
use crate::manifest::{self, ManifestDetail, ManifestLink, RawManifestRow};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{Span, debug, error, info, info_span, warn};

/// Minimum padded size used by [`Blake3Commitment`].
const MIN_PIECE_SIZE: u64 = 128;

/// Copy buffer size for segment data.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// One packaging job handed to a slicer.
#[derive(Debug, Clone)]
pub struct SliceJob {
    /// Maximum number of data bytes per slice.
    pub size_limit: u64,
    pub source_root: PathBuf,
    /// Entries to pack; each becomes one link in the manifest detail.
    pub targets: Vec<PathBuf>,
    pub output_dir: PathBuf,
    /// Name recorded in the manifest detail of every slice of this job.
    pub group_name: String,
    pub parallelism: usize,
}

/// Computes the storage-piece commitment of a finished archive slice.
pub trait PieceCommitment: Send + Sync {
    fn commit(&self, archive: &Path) -> Result<String>;
}

/// Splits source entries into size-bounded archive slices.
///
/// Implementations write slice files into `job.output_dir` and append one row
/// per slice to the raw manifest there, calling `commitment` once per slice.
pub trait Slicer: Send + Sync {
    fn slice(&self, job: &SliceJob, commitment: &dyn PieceCommitment) -> Result<()>;
}

/// BLAKE3 digest of the archive zero-padded to the next power of two.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Commitment;

impl PieceCommitment for Blake3Commitment {
    fn commit(&self, archive: &Path) -> Result<String> {
        let file = File::open(archive).map_err(|e| Error::io_at(archive, e))?;
        let mut hasher = blake3::Hasher::new();
        let size = std::io::copy(&mut BufReader::new(file), &mut hasher)?;

        let padded = size.max(MIN_PIECE_SIZE).next_power_of_two();
        let zeros = [0u8; COPY_BUF_SIZE];
        let mut remaining = padded - size;
        while remaining > 0 {
            let n = remaining.min(COPY_BUF_SIZE as u64) as usize;
            hasher.update(&zeros[..n]);
            remaining -= n as u64;
        }

        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// A contiguous piece of one source entry placed in a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    /// Index into `SliceJob::targets`.
    target: usize,
    kind: RecordKind,
    source: PathBuf,
    /// Archive path, relative to the target's parent.
    path: String,
    offset: u64,
    len: u64,
}

/// Built-in slicer writing the archive format of [`crate::archive`].
#[derive(Debug, Clone)]
pub struct LocalSlicer {
    span: Span,
}

impl Default for LocalSlicer {
    fn default() -> Self {
        Self::new(info_span!("slicer"))
    }
}

impl LocalSlicer {
    /// Create a slicer that logs under `span`.
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// List every entry of every target in archive order.
    fn collect_entries(&self, job: &SliceJob) -> Result<Vec<Segment>> {
        let mut entries = Vec::new();

        for (index, target) in job.targets.iter().enumerate() {
            let prefix = target_name(target)?;
            let metadata = fs::metadata(target).map_err(|e| Error::io_at(target, e))?;

            if metadata.is_file() {
                entries.push(Segment {
                    target: index,
                    kind: RecordKind::File,
                    source: target.clone(),
                    path: prefix,
                    offset: 0,
                    len: metadata.len(),
                });
                continue;
            }

            let walker = ignore::WalkBuilder::new(target)
                .standard_filters(false)
                .follow_links(false)
                .sort_by_file_name(|a, b| a.cmp(b))
                .build();

            for entry in walker {
                let entry = entry?;
                let path = entry.path();
                let rel = path.strip_prefix(target).map_err(|_| {
                    Error::archive(path, "walked outside of the packaging target")
                })?;

                let mut archive_path = prefix.clone();
                for part in rel.components() {
                    archive_path.push('/');
                    archive_path.push_str(&part.as_os_str().to_string_lossy());
                }

                if archive_path.len() > MAX_PATH_LEN {
                    return Err(Error::archive(path, "archive path is too long"));
                }

                let Some(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    entries.push(Segment {
                        target: index,
                        kind: RecordKind::Dir,
                        source: path.to_path_buf(),
                        path: archive_path,
                        offset: 0,
                        len: 0,
                    });
                } else if file_type.is_file() {
                    let len = entry.metadata()?.len();
                    entries.push(Segment {
                        target: index,
                        kind: RecordKind::File,
                        source: path.to_path_buf(),
                        path: archive_path,
                        offset: 0,
                        len,
                    });
                } else {
                    warn!(parent: &self.span, path = %path.display(), "skipping non-regular entry");
                }
            }
        }

        Ok(entries)
    }

    /// Write one slice and describe it as a manifest row.
    fn write_slice(
        &self,
        job: &SliceJob,
        segments: &[Segment],
        commitment: &dyn PieceCommitment,
    ) -> Result<RawManifestRow> {
        let mut temp_file = tempfile::NamedTempFile::new_in(&job.output_dir)?;
        let mut payload = blake3::Hasher::new();
        let mut links: BTreeMap<usize, (blake3::Hasher, u64)> = BTreeMap::new();
        let mut data_size = 0u64;

        {
            let mut out = BufWriter::new(temp_file.as_file_mut());
            out.write_all(&ArchiveHeader::new(segments.len() as u64).encode())?;

            let mut buf = vec![0u8; COPY_BUF_SIZE];
            for segment in segments {
                let record = RecordHeader {
                    kind: segment.kind,
                    path: segment.path.clone(),
                    offset: segment.offset,
                    len: segment.len,
                };
                let encoded = record.encode();
                out.write_all(&encoded)?;
                payload.update(&encoded);

                let (link, link_size) = links
                    .entry(segment.target)
                    .or_insert_with(|| (blake3::Hasher::new(), 0));

                if segment.kind == RecordKind::Dir {
                    continue;
                }

                let mut source =
                    File::open(&segment.source).map_err(|e| Error::io_at(&segment.source, e))?;
                source.seek(SeekFrom::Start(segment.offset))?;
                let mut source = source.take(segment.len);

                let mut copied = 0u64;
                loop {
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    out.write_all(&buf[..n])?;
                    payload.update(&buf[..n]);
                    link.update(&buf[..n]);
                    copied += n as u64;
                }
                if copied != segment.len {
                    return Err(Error::archive(
                        &segment.source,
                        format!(
                            "source changed while packing: expected {} bytes at offset {}, read {}",
                            segment.len, segment.offset, copied
                        ),
                    ));
                }

                *link_size += copied;
                data_size += copied;
            }

            out.flush()?;
        }

        let payload_id = payload.finalize().to_hex().to_string();
        let archive_name = archive_file_name(&payload_id);
        let archive_path = job.output_dir.join(&archive_name);
        temp_file.persist(&archive_path)?;

        let archive_size = fs::metadata(&archive_path)
            .map_err(|e| Error::io_at(&archive_path, e))?
            .len();
        let piece_id = commitment.commit(&archive_path)?;

        let links = links
            .into_iter()
            .map(|(target, (hasher, size))| {
                Ok(ManifestLink {
                    name: target_name(&job.targets[target])?,
                    hash: hasher.finalize().to_hex().to_string(),
                    size,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let detail = ManifestDetail {
            name: job.group_name.clone(),
            hash: payload_id.clone(),
            size: data_size,
            links,
        };

        debug!(
            parent: &self.span,
            payload = %payload_id,
            piece = %piece_id,
            records = segments.len(),
            bytes = data_size,
            "archive slice written"
        );

        RawManifestRow::new(payload_id, archive_name, piece_id, archive_size, &detail)
    }
}

impl Slicer for LocalSlicer {
    fn slice(&self, job: &SliceJob, commitment: &dyn PieceCommitment) -> Result<()> {
        if job.size_limit == 0 {
            return Err(Error::configuration("slice size limit must be positive"));
        }

        fs::create_dir_all(&job.output_dir).map_err(|e| Error::io_at(&job.output_dir, e))?;

        let entries = self.collect_entries(job)?;
        let slices = plan_slices(entries, job.size_limit);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(job.parallelism.max(1))
            .build()?;
        let rows = pool
            .install(|| {
                slices
                    .par_iter()
                    .map(|segments| self.write_slice(job, segments, commitment))
                    .collect::<Result<Vec<_>>>()
            })
            .inspect_err(|e| {
                error!(parent: &self.span, group = %job.group_name, error = %e, "slicing failed");
            })?;

        manifest::append_rows(&job.output_dir, &rows)?;

        info!(
            parent: &self.span,
            group = %job.group_name,
            slices = rows.len(),
            "archive slices created"
        );
        Ok(())
    }
}

/// Split entries into slices carrying at most `limit` data bytes each.
///
/// Files larger than the remaining room are split across slices. Directory
/// markers and empty files occupy no room.
fn plan_slices(entries: Vec<Segment>, limit: u64) -> Vec<Vec<Segment>> {
    let mut slices = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut used = 0u64;

    for entry in entries {
        if entry.kind == RecordKind::Dir || entry.len == 0 {
            current.push(entry);
            continue;
        }

        let size = entry.len;
        let mut offset = 0u64;
        while offset < size {
            if used == limit {
                slices.push(std::mem::take(&mut current));
                used = 0;
            }
            let take = (limit - used).min(size - offset);
            current.push(Segment {
                offset,
                len: take,
                ..entry.clone()
            });
            used += take;
            offset += take;
        }
    }

    if !current.is_empty() {
        slices.push(current);
    }
    slices
}

/// Link and archive-path name of a target.
///
/// Targets ending in `.` or `..` are named after their canonical path; a
/// filesystem root has no usable name.
fn target_name(target: &Path) -> Result<String> {
    if target.file_name().is_some() {
        return Ok(base_name(target));
    }
    let canonical = fs::canonicalize(target).map_err(|e| Error::io_at(target, e))?;
    match canonical.file_name() {
        Some(name) => Ok(name.to_string_lossy().into_owned()),
        None => Err(Error::configuration(format!(
            "cannot name archive entries for {}",
            target.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_archive;
    use tempfile::TempDir;

    fn job(root: &Path, targets: Vec<PathBuf>, out: &Path, group: &str, limit: u64) -> SliceJob {
        SliceJob {
            size_limit: limit,
            source_root: root.to_path_buf(),
            targets,
            output_dir: out.to_path_buf(),
            group_name: group.to_string(),
            parallelism: 2,
        }
    }

    fn rows(out: &Path) -> Vec<RawManifestRow> {
        manifest::read_lines(out)
            .unwrap()
            .into_iter()
            .map(|(n, l)| RawManifestRow::parse(n, &l).unwrap())
            .collect()
    }

    fn file_segment(len: u64) -> Segment {
        Segment {
            target: 0,
            kind: RecordKind::File,
            source: PathBuf::from("f"),
            path: "f".into(),
            offset: 0,
            len,
        }
    }

    #[test]
    fn test_plan_slices_splits_large_file() {
        let slices = plan_slices(vec![file_segment(250)], 100);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0][0].len, 100);
        assert_eq!(slices[1][0].offset, 100);
        assert_eq!(slices[2][0].len, 50);
    }

    #[test]
    fn test_plan_slices_packs_small_files_together() {
        let slices = plan_slices(vec![file_segment(40), file_segment(40), file_segment(40)], 100);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 3);
        assert_eq!(slices[0][2].len, 20);
        assert_eq!(slices[1][0].offset, 20);
        assert_eq!(slices[1][0].len, 20);
    }

    #[test]
    fn test_plan_slices_empty_file() {
        let slices = plan_slices(vec![file_segment(0)], 100);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0][0].len, 0);
    }

    #[test]
    fn test_slice_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("in");
        fs::create_dir(&src).unwrap();
        let file = src.join("a.bin");
        fs::write(&file, vec![7u8; 1000]).unwrap();
        let out = temp_dir.path().join("out");

        LocalSlicer::default()
            .slice(&job(&file, vec![file.clone()], &out, "a.bin", 1 << 20), &Blake3Commitment)
            .unwrap();

        let rows = rows(&out);
        assert_eq!(rows.len(), 1);
        let detail = rows[0].decode_detail().unwrap();
        assert_eq!(detail.name, "a.bin");
        assert_eq!(detail.size, 1000);
        assert_eq!(detail.links.len(), 1);
        assert_eq!(detail.links[0].name, "a.bin");
        assert_eq!(detail.links[0].size, 1000);
        assert_eq!(detail.links[0].hash, blake3::hash(&[7u8; 1000]).to_hex().to_string());

        let archive = out.join(archive_file_name(&rows[0].payload_id));
        assert_eq!(fs::metadata(&archive).unwrap().len(), rows[0].archive_size);
        assert_eq!(rows[0].piece_id, Blake3Commitment.commit(&archive).unwrap());
    }

    #[test]
    fn test_slice_directory_respects_limit() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("data");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("x"), vec![1u8; 300]).unwrap();
        fs::write(src.join("sub").join("y"), vec![2u8; 300]).unwrap();
        let out = temp_dir.path().join("out");

        LocalSlicer::default()
            .slice(&job(&src, vec![src.clone()], &out, "data", 256), &Blake3Commitment)
            .unwrap();

        let rows = rows(&out);
        assert_eq!(rows.len(), 3);

        let mut total = 0;
        for row in &rows {
            let detail = row.decode_detail().unwrap();
            assert!(detail.size <= 256);
            assert_eq!(detail.links.len(), 1);
            assert_eq!(detail.links[0].name, "data");
            total += detail.total_link_size();

            let archive = out.join(archive_file_name(&row.payload_id));
            read_archive(&archive, |record, _| {
                assert!(record.path.starts_with("data"));
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(total, 600);
    }

    #[test]
    fn test_slice_missing_target() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let out = temp_dir.path().join("out");

        let err = LocalSlicer::default()
            .slice(&job(&missing, vec![missing.clone()], &out, "m", 10), &Blake3Commitment)
            .unwrap_err();
        assert!(matches!(err, Error::IoAt { .. }));
        assert!(!out.join(manifest::MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn test_slice_names_parent_dir_target() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("sub")).unwrap();
        fs::write(data.join("x"), b"xyz").unwrap();
        let target = data.join("sub").join("..");
        let out = temp_dir.path().join("out");

        LocalSlicer::default()
            .slice(
                &job(&target, vec![target.clone()], &out, "..", 1024),
                &Blake3Commitment,
            )
            .unwrap();

        let rows = rows(&out);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].decode_detail().unwrap().links[0].name, "data");

        let mut paths = Vec::new();
        read_archive(&out.join(&rows[0].file_name), |record, _| {
            paths.push(record.path.clone());
            Ok(())
        })
        .unwrap();
        assert!(paths.contains(&"data/x".to_string()));
        for path in &paths {
            assert!(crate::archive::safe_relative(path).is_some(), "unsafe path {}", path);
        }
    }

    #[test]
    fn test_slice_zero_limit() {
        let temp_dir = TempDir::new().unwrap();
        let err = LocalSlicer::default()
            .slice(
                &job(temp_dir.path(), vec![], temp_dir.path(), "g", 0),
                &Blake3Commitment,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_commitment_pads_to_power_of_two() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("p");
        fs::write(&path, b"abc").unwrap();

        let mut padded = b"abc".to_vec();
        padded.resize(128, 0);
        assert_eq!(
            Blake3Commitment.commit(&path).unwrap(),
            blake3::hash(&padded).to_hex().to_string()
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 200,
                ..ProptestConfig::default()
            })]

            #[test]
            fn plan_respects_limit_and_keeps_bytes(
                sizes in prop::collection::vec(0u64..5000, 1..20),
                limit in 1u64..2048,
            ) {
                let entries: Vec<Segment> = sizes.iter().map(|&len| file_segment(len)).collect();
                let slices = plan_slices(entries, limit);

                let mut total = 0u64;
                for slice in &slices {
                    let used: u64 = slice.iter().map(|s| s.len).sum();
                    prop_assert!(used <= limit);
                    total += used;
                }
                prop_assert_eq!(total, sizes.iter().sum::<u64>());
            }
        }
    }
}
