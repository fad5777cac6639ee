//! flim-stack - Assemble folders of FLIM acquisitions into chunked stacks.
//!
//! This binary parses the command line, configures logging, and runs the
//! requested command.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flim_stack::{
    config::{Cli, Command, ConvertConfig, InspectConfig},
    pipeline::{convert_folder, inspect, Inspection, TracingSink},
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Convert(config) => run_convert(config),
        Command::Inspect(config) => run_inspect(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "flim_stack=debug"
    } else {
        "flim_stack=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Convert Command
// =============================================================================

fn run_convert(config: ConvertConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Folder: {}", config.folder.display());
    if let Some(ref output) = config.output {
        info!("  Output: {}", output.display());
    }
    info!("  Z offset: {}", config.layout.z_offset);
    info!("  Sample cache: {}MB", config.sample_cache_mb);

    match convert_folder(&config.folder, &config.convert_options(), &TracingSink) {
        Ok(stack) => {
            info!(
                "Converted {} into {:?} {} stack",
                stack.path().display(),
                stack.shape(),
                stack.dtype()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Conversion failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(config: InspectConfig) -> ExitCode {
    // Quiet unless asked, so the summary is the only output
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let report = match inspect(&config.path, &config.layout.plan_options()) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_inspection(&report);
    }

    ExitCode::SUCCESS
}

fn print_inspection(report: &Inspection) {
    println!("FLIM Stack Summary");
    println!("══════════════════");
    println!();
    println!("Path:      {}", report.path.display());
    println!("Format:    {}", report.source);
    if report.files > 0 {
        println!("Files:     {}", report.files);
    }
    let [c, b, t, z, y, x] = report.shape;
    println!(
        "Shape:     {} ch × {} bins × {} t × {} z × {} × {}",
        c, b, t, z, y, x
    );
    println!("Dtype:     {}", report.dtype);
    if report.files > 0 {
        println!("On disk:   {:.2} MB", report.megabytes);
    }
    match report.in_memory {
        Some(true) => println!("Target:    in memory"),
        Some(false) => println!("Target:    chunked store"),
        None => println!("Target:    chunked store (already assembled)"),
    }
    if let Some(policy) = report.z_offset_policy {
        println!("Z offset:  {}", policy);
    }
    match report.laser_frequency_mhz {
        Some(mhz) => println!("Laser:     {:.3} MHz", mhz),
        None => println!("Laser:     unknown"),
    }
}
