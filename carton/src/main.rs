mod output;

use anyhow::{Context, Result};
use carton_core::{
    DEFAULT_PARALLELISM, DEFAULT_SIZE_LIMIT, JSON_CATALOG_NAME, PackageOptions, Packager,
    Restorer, SourcePolicy, read_catalog,
};
use clap::{Parser, Subcommand};
use output::{OutputWriter, PackOutput, RestoreOutput, ShowOutput, SliceInfo};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted when `--out` is not given.
const OUTPUT_ENV: &str = "CARTON_OUTPUT";

/// Parent of the generated output directories.
const DEFAULT_OUTPUT_ROOT: &str = "./carton-output";

/// Carton - pack datasets into size-bounded archive slices
#[derive(Parser)]
#[command(name = "carton")]
#[command(about = "Pack datasets into size-bounded, content-addressed archive slices", long_about = None)]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into archive slices and write the catalogs
    Pack {
        /// Input root directory
        input: PathBuf,

        /// Output directory (defaults to CARTON_OUTPUT env var or a fresh
        /// directory under ./carton-output)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Maximum payload bytes per slice
        #[arg(long, default_value_t = DEFAULT_SIZE_LIMIT, allow_negative_numbers = true)]
        slice_size: i64,

        /// Pack the whole input root as one source unit
        #[arg(long)]
        whole_dir: bool,

        /// Compute MD5 checksums of sources and archives
        #[arg(long)]
        md5: bool,

        /// Number of slices written concurrently
        #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
        parallel: usize,
    },

    /// Restore the original files from a directory of archive slices
    Restore {
        /// Directory holding the archive slices
        input: PathBuf,

        /// Directory to restore into
        output: PathBuf,

        /// Number of archives extracted concurrently
        #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
        parallel: usize,
    },

    /// Print the descriptors of a JSON catalog
    Show {
        /// Path to a car.json catalog, or the directory holding it
        catalog: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let output = OutputWriter::new(cli.json);
    let result = match cli.command {
        Commands::Pack {
            input,
            out,
            slice_size,
            whole_dir,
            md5,
            parallel,
        } => {
            let options = PackageOptions {
                size_limit: slice_size,
                policy: SourcePolicy::from_whole_directory(whole_dir),
                parallelism: parallel,
                compute_checksums: md5,
                ..PackageOptions::new(resolve_output_dir(out))
            };
            cmd_pack(&output, &input, &options)
        }
        Commands::Restore {
            input,
            output: dest,
            parallel,
        } => cmd_restore(&output, &input, &dest, parallel),
        Commands::Show { catalog } => cmd_show(&output, &catalog),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::from(1)
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Output directory: CLI arg > CARTON_OUTPUT env var > timestamped default.
fn resolve_output_dir(out: Option<PathBuf>) -> PathBuf {
    out.or_else(|| std::env::var(OUTPUT_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| {
            let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
            PathBuf::from(DEFAULT_OUTPUT_ROOT).join(format!("{}_{}", stamp, uuid::Uuid::new_v4()))
        })
}

fn cmd_pack(output: &OutputWriter, input: &Path, options: &PackageOptions) -> Result<()> {
    let descriptors = Packager::default()
        .package(input, options)
        .with_context(|| format!("Failed to pack {}", input.display()))?;

    let catalog = options.output_dir.join(JSON_CATALOG_NAME);
    let data = PackOutput {
        success: true,
        result_code: 0,
        output_dir: options.output_dir.display().to_string(),
        catalog: catalog.display().to_string(),
        policy: options.policy.as_str().to_string(),
        slices: descriptors.iter().map(SliceInfo::from).collect(),
    };

    output.write(&data, || {
        let mut text = String::new();
        for slice in &data.slices {
            let _ = writeln!(
                text,
                "{} {} {}",
                slice.payload_id, slice.archive_size, slice.source_name
            );
        }
        let _ = writeln!(text, "Packed {} slices", data.slices.len());
        let _ = writeln!(text, "Catalog: {}", data.catalog);
        text
    })
}

fn cmd_restore(output: &OutputWriter, input: &Path, dest: &Path, parallelism: usize) -> Result<()> {
    let mut restorer = Restorer::default();
    restorer
        .restore(input, dest, parallelism)
        .with_context(|| format!("Failed to restore {} into {}", input.display(), dest.display()))?;

    let data = RestoreOutput {
        success: true,
        result_code: 0,
        input_dir: input.display().to_string(),
        output_dir: dest.display().to_string(),
        state: restorer.state().as_str().to_string(),
    };

    output.write(&data, || format!("Restored {} into {}\n", data.input_dir, data.output_dir))
}

fn cmd_show(output: &OutputWriter, catalog: &Path) -> Result<()> {
    let path = if catalog.is_dir() {
        catalog.join(JSON_CATALOG_NAME)
    } else {
        catalog.to_path_buf()
    };

    let descriptors = read_catalog(&path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;

    let data = ShowOutput {
        success: true,
        result_code: 0,
        catalog: path.display().to_string(),
        descriptors,
    };

    output.write(&data, || {
        if data.descriptors.is_empty() {
            return "No descriptors in catalog\n".to_string();
        }
        let mut text = String::new();
        for desc in &data.descriptors {
            let _ = writeln!(
                text,
                "{} {} {} <- {} ({} bytes)",
                desc.archive_name, desc.archive_size, desc.piece_id, desc.source_name, desc.source_size
            );
        }
        text
    })
}
