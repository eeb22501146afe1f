//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use carton_core::FileDescriptor;
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// One archive slice produced by `pack`.
#[derive(Debug, Clone, Serialize)]
pub struct SliceInfo {
    pub payload_id: String,
    pub piece_id: String,
    pub archive_size: u64,
    pub source_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub archive_checksum: String,
}

impl From<&FileDescriptor> for SliceInfo {
    fn from(desc: &FileDescriptor) -> Self {
        Self {
            payload_id: desc.payload_id.clone(),
            piece_id: desc.piece_id.clone(),
            archive_size: desc.archive_size,
            source_name: desc.source_name.clone(),
            archive_checksum: desc.archive_checksum.clone(),
        }
    }
}

/// Output for `pack` command.
#[derive(Debug, Serialize)]
pub struct PackOutput {
    pub success: bool,
    pub result_code: u8,
    pub output_dir: String,
    pub catalog: String,
    pub policy: String,
    pub slices: Vec<SliceInfo>,
}

/// Output for `restore` command.
#[derive(Debug, Serialize)]
pub struct RestoreOutput {
    pub success: bool,
    pub result_code: u8,
    pub input_dir: String,
    pub output_dir: String,
    pub state: String,
}

/// Output for `show` command.
#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub success: bool,
    pub result_code: u8,
    pub catalog: String,
    pub descriptors: Vec<FileDescriptor>,
}
