//! Packaging orchestration: source units → slicer jobs → reconciled descriptors.

use crate::descriptor::{FileDescriptor, base_name};
use crate::error::{Error, Result};
use crate::reconcile::{Reconciler, SourcePolicy};
use crate::slicer::{Blake3Commitment, LocalSlicer, PieceCommitment, SliceJob, Slicer};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Span, error, info, info_span};

/// Default slice size limit (32 GiB).
pub const DEFAULT_SIZE_LIMIT: i64 = 32 * 1024 * 1024 * 1024;

/// Default slicer parallelism.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Options of one packaging run.
#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub output_dir: PathBuf,
    /// Maximum data bytes per archive slice; must be positive.
    pub size_limit: i64,
    pub policy: SourcePolicy,
    /// Passed through to the slicer.
    pub parallelism: usize,
    pub compute_checksums: bool,
}

impl PackageOptions {
    /// Options with defaults for everything but the output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            size_limit: DEFAULT_SIZE_LIMIT,
            policy: SourcePolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            compute_checksums: false,
        }
    }
}

/// Drives a [`Slicer`] over the source units of an input root and reconciles
/// the resulting manifest.
pub struct Packager<S: Slicer = LocalSlicer> {
    slicer: S,
    commitment: Box<dyn PieceCommitment>,
    reconciler: Reconciler,
    span: Span,
}

impl Default for Packager<LocalSlicer> {
    fn default() -> Self {
        let span = info_span!("package");
        Self::new(
            LocalSlicer::new(span.clone()),
            Reconciler::new(span.clone()),
            span,
        )
    }
}

impl<S: Slicer> Packager<S> {
    /// Create a packager around `slicer` and `reconciler`, logging under `span`.
    pub fn new(slicer: S, reconciler: Reconciler, span: Span) -> Self {
        Self {
            slicer,
            commitment: Box::new(Blake3Commitment),
            reconciler,
            span,
        }
    }

    /// Use a different piece commitment.
    pub fn with_commitment(mut self, commitment: impl PieceCommitment + 'static) -> Self {
        self.commitment = Box::new(commitment);
        self
    }

    /// Package `input_root` into `options.output_dir`.
    ///
    /// Any slicer failure aborts the run; slices already written stay on disk
    /// but are not reconciled.
    pub fn package(
        &self,
        input_root: &Path,
        options: &PackageOptions,
    ) -> Result<Vec<FileDescriptor>> {
        if options.size_limit <= 0 {
            let err = Error::configuration(format!(
                "slice size limit is too small: {}",
                options.size_limit
            ));
            error!(parent: &self.span, error = %err, "invalid packaging options");
            return Err(err);
        }

        let output_dir = &options.output_dir;
        fs::create_dir_all(output_dir).map_err(|e| {
            error!(parent: &self.span, dir = %output_dir.display(), error = %e, "cannot create output directory");
            Error::io_at(output_dir, e)
        })?;

        let input_root = named_root(input_root).inspect_err(|e| {
            error!(parent: &self.span, root = %input_root.display(), error = %e, "cannot resolve input root");
        })?;
        let input_root = input_root.as_path();

        for (source, group) in self.source_units(input_root, options.policy)? {
            let job = SliceJob {
                size_limit: options.size_limit as u64,
                source_root: source.clone(),
                targets: vec![source.clone()],
                output_dir: output_dir.clone(),
                group_name: group,
                parallelism: options.parallelism,
            };

            info!(parent: &self.span, source = %source.display(), "creating archive slices");
            self.slicer
                .slice(&job, self.commitment.as_ref())
                .inspect_err(|e| {
                    error!(parent: &self.span, source = %source.display(), error = %e, "slicing failed");
                })?;
            info!(parent: &self.span, source = %source.display(), "archive slices created");
        }

        let descriptors = self.reconciler.reconcile(
            output_dir,
            options.policy,
            options.compute_checksums,
            input_root,
        )?;

        info!(
            parent: &self.span,
            archives = descriptors.len(),
            dir = %output_dir.display(),
            "archive files have been created"
        );
        Ok(descriptors)
    }

    /// `(source, group name)` pairs for the policy, in name order.
    fn source_units(&self, input_root: &Path, policy: SourcePolicy) -> Result<Vec<(PathBuf, String)>> {
        match policy {
            SourcePolicy::WholeDirectory => {
                Ok(vec![(input_root.to_path_buf(), base_name(input_root))])
            }
            SourcePolicy::PerEntry => {
                let read_dir = fs::read_dir(input_root).map_err(|e| {
                    error!(parent: &self.span, root = %input_root.display(), error = %e, "cannot list input root");
                    Error::io_at(input_root, e)
                })?;

                let mut units = Vec::new();
                for entry in read_dir {
                    let entry = entry.map_err(|e| Error::io_at(input_root, e))?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    units.push((entry.path(), name));
                }
                units.sort_by(|a, b| a.1.cmp(&b.1));
                Ok(units)
            }
        }
    }
}

/// `root` as given, or canonicalized when it ends in `.` or `..` and so has
/// no name of its own to use as an archive path prefix.
fn named_root(root: &Path) -> Result<PathBuf> {
    if root.file_name().is_some() {
        return Ok(root.to_path_buf());
    }
    let canonical = fs::canonicalize(root).map_err(|e| Error::io_at(root, e))?;
    if canonical.file_name().is_none() {
        return Err(Error::configuration(format!(
            "input root {} has no name",
            root.display()
        )));
    }
    Ok(canonical)
}
