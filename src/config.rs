//! Command-line configuration for flim-stack.
//!
//! Options come from:
//! - Command-line arguments via clap
//! - Environment variables with the `FLIM_` prefix
//! - The defaults below
//!
//! # Environment Variables
//!
//! - `FLIM_OUTPUT` - Store location for `convert` (default: `<folder>/<folder name>.zarr`)
//! - `FLIM_Z_OFFSET` - Z placement policy: `group-position` or `parsed-index`
//! - `FLIM_SAMPLE_CACHE_MB` - Decoded-sample cache budget in MB (default: 256)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::pipeline::ConvertOptions;
use crate::stack::{PlanOptions, ZOffsetPolicy};

// =============================================================================
// Default Values
// =============================================================================

/// Default decoded-sample cache budget in megabytes.
pub const DEFAULT_SAMPLE_CACHE_MB: usize = 256;

/// Largest accepted sample cache budget in megabytes.
pub const MAX_SAMPLE_CACHE_MB: usize = 64 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// flim-stack - Assemble folders of FLIM acquisitions into chunked stacks.
///
/// Files named with `_t<n>` and `_z<n>` indices are placed along the time
/// and z axes of a (channel, micro-time, time, z, y, x) array.
#[derive(Parser, Debug, Clone)]
#[command(name = "flim-stack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Convert a folder of acquisitions into a Zarr store.
    Convert(ConvertConfig),

    /// Describe the stack a file, folder, or store would produce.
    Inspect(InspectConfig),
}

/// Stack layout options shared by both commands.
#[derive(Args, Debug, Clone)]
pub struct LayoutArgs {
    /// Where a slice lands on the z axis.
    #[arg(
        long = "z-offset",
        value_enum,
        default_value_t = ZOffsetPolicy::GroupPosition,
        env = "FLIM_Z_OFFSET"
    )]
    pub z_offset: ZOffsetPolicy,
}

impl LayoutArgs {
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            z_policy: self.z_offset,
        }
    }
}

/// Arguments of `flim-stack convert`.
#[derive(Args, Debug, Clone)]
pub struct ConvertConfig {
    /// Folder holding the acquisitions.
    pub folder: PathBuf,

    /// Store location (default: `<folder>/<folder name>.zarr`).
    #[arg(short, long, env = "FLIM_OUTPUT")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Budget in MB for decoded samples kept between planning and writing.
    ///
    /// Zero decodes every file twice.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_CACHE_MB, env = "FLIM_SAMPLE_CACHE_MB")]
    pub sample_cache_mb: usize,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConvertConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.folder.is_dir() {
            return Err(format!("{} is not a folder", self.folder.display()));
        }
        if self.sample_cache_mb > MAX_SAMPLE_CACHE_MB {
            return Err(format!(
                "sample_cache_mb must be at most {}",
                MAX_SAMPLE_CACHE_MB
            ));
        }
        if let Some(ref output) = self.output {
            if output.extension().map_or(true, |ext| ext != "zarr") {
                return Err(format!(
                    "output {} must end in .zarr",
                    output.display()
                ));
            }
        }
        Ok(())
    }

    /// Sample cache budget in bytes.
    pub fn cache_bytes(&self) -> usize {
        self.sample_cache_mb * 1024 * 1024
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            plan: self.layout.plan_options(),
            output: self.output.clone(),
            cache_bytes: self.cache_bytes(),
        }
    }
}

/// Arguments of `flim-stack inspect`.
#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// File, folder, or `.zarr` store to describe.
    pub path: PathBuf,

    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Print the summary as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InspectConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("{} does not exist", self.path.display()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
