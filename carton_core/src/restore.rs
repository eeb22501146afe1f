//! Restore orchestration: extract every archive slice, then merge.

use crate::error::{Error, Result};
use crate::unpack::{LocalUnpacker, Unpacker};
use std::fs;
use std::path::Path;
use tracing::{Span, error, info, info_span};

/// Progress of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Idle,
    Validating,
    Extracting,
    Merging,
    Done,
    Failed,
}

impl RestoreState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreState::Idle => "idle",
            RestoreState::Validating => "validating",
            RestoreState::Extracting => "extracting",
            RestoreState::Merging => "merging",
            RestoreState::Done => "done",
            RestoreState::Failed => "failed",
        }
    }
}

/// Runs the extract and merge primitives of an [`Unpacker`] in sequence.
///
/// If merging fails after extraction succeeded, the extracted intermediates
/// are left in the output directory.
pub struct Restorer<U: Unpacker = LocalUnpacker> {
    unpacker: U,
    state: RestoreState,
    span: Span,
}

impl Default for Restorer<LocalUnpacker> {
    fn default() -> Self {
        let span = info_span!("restore");
        Self::new(LocalUnpacker::new(span.clone()), span)
    }
}

impl<U: Unpacker> Restorer<U> {
    /// Create a restorer around `unpacker`, logging under `span`.
    pub fn new(unpacker: U, span: Span) -> Self {
        Self {
            unpacker,
            state: RestoreState::Idle,
            span,
        }
    }

    /// State reached by the last run.
    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Restore the archive slices in `input_dir` into `output_dir`.
    pub fn restore(&mut self, input_dir: &Path, output_dir: &Path, parallelism: usize) -> Result<()> {
        let result = self.run(input_dir, output_dir, parallelism);
        match &result {
            Ok(()) => {
                self.state = RestoreState::Done;
                info!(parent: &self.span, dir = %output_dir.display(), "archive files have been restored");
            }
            Err(e) => {
                error!(parent: &self.span, stage = self.state.as_str(), error = %e, "restore failed");
                self.state = RestoreState::Failed;
            }
        }
        result
    }

    fn run(&mut self, input_dir: &Path, output_dir: &Path, parallelism: usize) -> Result<()> {
        self.state = RestoreState::Validating;
        fs::create_dir_all(output_dir).map_err(|e| Error::io_at(output_dir, e))?;

        self.state = RestoreState::Extracting;
        self.unpacker.extract(input_dir, output_dir, parallelism)?;

        self.state = RestoreState::Merging;
        self.unpacker.merge(output_dir, parallelism)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PackageOptions, Packager};
    use crate::reconcile::SourcePolicy;
    use crate::unpack::PARTS_DIR;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingUnpacker {
        calls: Mutex<Vec<String>>,
        fail_merge: bool,
    }

    impl Unpacker for RecordingUnpacker {
        fn extract(&self, _input_dir: &Path, output_dir: &Path, parallelism: usize) -> Result<()> {
            self.calls.lock().unwrap().push(format!("extract:{}", parallelism));
            fs::write(output_dir.join("intermediate"), b"x")?;
            Ok(())
        }

        fn merge(&self, _output_dir: &Path, parallelism: usize) -> Result<()> {
            self.calls.lock().unwrap().push(format!("merge:{}", parallelism));
            if self.fail_merge {
                return Err(Error::archive("merge", "scripted failure"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_extract_then_merge() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("restored");

        let mut restorer = Restorer::new(RecordingUnpacker::default(), Span::none());
        assert_eq!(restorer.state(), RestoreState::Idle);
        restorer.restore(temp_dir.path(), &out, 4).unwrap();

        assert_eq!(restorer.state(), RestoreState::Done);
        assert_eq!(
            *restorer.unpacker.calls.lock().unwrap(),
            vec!["extract:4".to_string(), "merge:4".to_string()]
        );
    }

    #[test]
    fn test_merge_failure_leaves_intermediates() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("restored");

        let unpacker = RecordingUnpacker {
            fail_merge: true,
            ..Default::default()
        };
        let mut restorer = Restorer::new(unpacker, Span::none());
        let err = restorer.restore(temp_dir.path(), &out, 1).unwrap_err();

        assert!(matches!(err, Error::Archive { .. }));
        assert_eq!(restorer.state(), RestoreState::Failed);
        assert!(out.join("intermediate").exists());
    }

    #[test]
    fn test_output_dir_not_creatable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, b"").unwrap();

        let mut restorer = Restorer::new(RecordingUnpacker::default(), Span::none());
        let err = restorer
            .restore(temp_dir.path(), &blocker.join("out"), 1)
            .unwrap_err();

        assert!(matches!(err, Error::IoAt { .. }));
        assert_eq!(restorer.state(), RestoreState::Failed);
        assert!(restorer.unpacker.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_package_then_restore() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("input");
        fs::create_dir_all(root.join("docs")).unwrap();
        let payload: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(root.join("blob.bin"), &payload).unwrap();
        fs::write(root.join("docs").join("readme.md"), b"# hi").unwrap();

        let cars = temp_dir.path().join("cars");
        let opts = PackageOptions {
            size_limit: 1000,
            policy: SourcePolicy::PerEntry,
            ..PackageOptions::new(&cars)
        };
        let descs = Packager::default().package(&root, &opts).unwrap();
        assert_eq!(descs.iter().filter(|d| d.source_name == "blob.bin").count(), 3);

        let restored = temp_dir.path().join("restored");
        Restorer::default().restore(&cars, &restored, 2).unwrap();

        assert_eq!(fs::read(restored.join("blob.bin")).unwrap(), payload);
        assert_eq!(fs::read(restored.join("docs").join("readme.md")).unwrap(), b"# hi");
        assert!(!restored.join(PARTS_DIR).exists());
    }

    #[test]
    fn test_whole_directory_parent_dir_root_restores() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("sub")).unwrap();
        fs::write(data.join("x"), b"payload").unwrap();
        let root = data.join("sub").join("..");

        let cars = temp_dir.path().join("cars");
        let opts = PackageOptions {
            policy: SourcePolicy::WholeDirectory,
            ..PackageOptions::new(&cars)
        };
        let descs = Packager::default().package(&root, &opts).unwrap();
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].source_name, "data");

        let restored = temp_dir.path().join("restored");
        let mut restorer = Restorer::default();
        restorer.restore(&cars, &restored, 1).unwrap();

        assert_eq!(restorer.state(), RestoreState::Done);
        assert_eq!(fs::read(restored.join("data").join("x")).unwrap(), b"payload");
        assert!(restored.join("data").join("sub").is_dir());
    }
}
