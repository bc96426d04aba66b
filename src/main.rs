//! e2snap CLI - sparse snapshots of ext2/ext3 filesystems

use clap::Parser;
use e2snap::config::{CliArgs, Commands, RemoteSettings, SnapshotConfig};
use e2snap::core::SnapshotEngine;
use e2snap::error::{Result, SnapError};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; stdout may carry the image, so logs go to stderr
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info,e2snap=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    // Handle subcommands
    if let Some(command) = &args.command {
        return handle_command(command);
    }

    // Require source and destination for a snapshot
    if args.source.is_none() || args.destination.is_none() {
        eprintln!("Usage: e2snap <SOURCE> <DESTINATION|-> [CHANNEL] [OPTIONS]");
        eprintln!("       e2snap init-config [PATH]");
        eprintln!("       e2snap --help for more information");
        std::process::exit(1);
    }

    // Build configuration
    let config = SnapshotConfig::from_cli(&args).map_err(SnapError::Usage)?;

    if args.verbose > 0 {
        print_config(&config);
    }

    if config.dry_run {
        eprintln!("=== Dry Run Mode ===");
        eprintln!("Nothing will be written.");
        eprintln!();
    }

    let quiet = config.quiet;
    let result = SnapshotEngine::new(config).execute()?;

    // Print results
    if !quiet && !result.dry_run {
        result.print_summary();
    }

    if !result.is_complete() {
        std::process::exit(1);
    }

    Ok(())
}

fn handle_command(command: &Commands) -> Result<()> {
    match command {
        Commands::InitConfig { path } => {
            RemoteSettings::write_sample(path)?;
            eprintln!("Wrote sample configuration to {}", path.display());
            Ok(())
        }
    }
}

fn print_config(config: &SnapshotConfig) {
    eprintln!("=== Configuration ===");
    eprintln!("Source:      {}", config.source.display());
    if config.writes_to_stdout() {
        eprintln!("Destination: standard output");
    } else {
        eprintln!("Destination: {}", config.destination);
    }
    eprintln!("Buffer:      {}", humansize::format_size(config.buffer_size as u64, humansize::BINARY));
    eprintln!("Layout:      {:?}", config.layout);
    if let Some(channel) = &config.channel {
        eprintln!("Channel:     {}", channel);
        eprintln!("Config:      {}", config.config_path.display());
    }
    eprintln!();
}
