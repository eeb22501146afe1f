//! # Carton Core
//!
//! Packs a directory tree into size-bounded, content-addressed archive
//! slices and keeps a catalog of what went where.
//!
//! Packaging runs a [`Slicer`] over each source unit, which appends rows to a
//! raw `manifest.csv`. The [`Reconciler`] then turns that manifest into
//! [`FileDescriptor`]s and writes them as a JSON catalog plus a CSV export.
//! Restoring runs an [`Unpacker`] over the slices: extract, then merge.
//!
//! ## Features
//!
//! - Slices bounded by a byte limit; large files are split across slices
//! - BLAKE3 payload ids and padded piece commitments
//! - Optional MD5 checksums of sources and archives
//! - Whole-directory or per-entry grouping of the input root
//! - JSON-RPC envelopes for a remote dataset catalog
//!
//! ## Example
//!
//! ```no_run
//! use carton_core::{PackageOptions, Packager, Restorer, SourcePolicy};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = PackageOptions {
//!     policy: SourcePolicy::WholeDirectory,
//!     compute_checksums: true,
//!     ..PackageOptions::new("./cars")
//! };
//! let descriptors = Packager::default().package(Path::new("./my-data"), &options)?;
//! println!("Packed {} slices", descriptors.len());
//!
//! Restorer::default().restore(Path::new("./cars"), Path::new("./restored"), 2)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
mod catalog;
mod checksum;
mod descriptor;
mod error;
pub mod manifest;
mod package;
mod reconcile;
mod restore;
pub mod rpc;
mod slicer;
mod unpack;

pub use catalog::{CSV_CATALOG_NAME, CatalogWriter, JSON_CATALOG_NAME, read_catalog};
pub use checksum::{Checksum, Md5Checksum};
pub use descriptor::{ARCHIVE_EXTENSION, FileDescriptor};
pub use error::{Error, Result};
pub use package::{DEFAULT_PARALLELISM, DEFAULT_SIZE_LIMIT, PackageOptions, Packager};
pub use reconcile::{Reconciler, SourcePolicy};
pub use restore::{RestoreState, Restorer};
pub use slicer::{Blake3Commitment, LocalSlicer, PieceCommitment, SliceJob, Slicer};
pub use unpack::{LocalUnpacker, PARTS_DIR, Unpacker};
