// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC Whispers CLI
//!
//! Command-line tool for forwarding OSC messages by path prefix.
//!
//! # Usage
//!
//! ```bash
//! # Forward using two rule files
//! oscwhispers -f main.otw extra.otw
//!
//! # Listen on another port, log every message
//! oscwhispers -f main.otw -p 9100 -V in out
//!
//! # Using a settings file (rule_files taken from it)
//! oscwhispers --config osctoolkit.toml
//!
//! # Check rule files and print the compiled table
//! oscwhispers check -f main.otw --json
//! ```

use clap::{Parser, Subcommand};
use osc_whispers::config::ConfigError;
use osc_whispers::transport::check_destinations;
use osc_whispers::{
    RouteStatsSnapshot, Router, RouterError, RouterStatsSnapshot, RuleTable, UdpTransport,
    VerboseChannel, VerbosityOverride, WhispersConfig,
};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// OSC Whispers - path-prefix OSC forwarding agent
#[derive(Parser, Debug)]
#[command(name = "oscwhispers")]
#[command(about = "OSC Whispers - forward OSC messages by path prefix")]
#[command(disable_version_flag = true)]
struct Args {
    /// Rule files, compiled in the given order
    #[arg(short = 'f', long = "file", num_args = 1..)]
    files: Vec<PathBuf>,

    /// Settings file path (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on (0.0.0.0 for all IPv4, :: for IPv6)
    #[arg(long)]
    listen_address: Option<IpAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log everything at info level
    #[arg(short, long, conflicts_with_all = ["channels", "quiet"])]
    verbose: bool,

    /// Log only the given events at info level (in, out, listen, forward)
    #[arg(short = 'V', value_name = "CHANNEL", num_args = 1.., conflicts_with = "quiet")]
    channels: Vec<VerboseChannel>,

    /// Disable all verbose output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Args {
    fn verbosity_override(&self) -> Option<VerbosityOverride> {
        if self.verbose {
            Some(VerbosityOverride::All)
        } else if self.quiet {
            Some(VerbosityOverride::Quiet)
        } else if !self.channels.is_empty() {
            Some(VerbosityOverride::Enable(self.channels.clone()))
        } else {
            None
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example settings file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "osctoolkit.toml")]
        output: PathBuf,
    },

    /// Compile rule files and print the forwarding table
    Check {
        /// Rule files
        #[arg(short = 'f', long = "file", num_args = 1.., required = true)]
        files: Vec<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let mut args = Args::parse();

    // Handle subcommands
    let result = match args.command.take() {
        Some(Commands::GenConfig { output }) => cmd_gen_config(&output),
        Some(Commands::Check { files, json }) => cmd_check(&files, json),
        None => run(args).await,
    };

    if let Err(e) = result {
        eprintln!("oscwhispers: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (config, loaded_from) = build_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match loaded_from {
        Some(path) => tracing::debug!("Loaded settings from {}", path.display()),
        None => tracing::debug!("No settings file found, using defaults"),
    }

    let rule_files = if args.files.is_empty() {
        config.rule_files.clone()
    } else {
        args.files.clone()
    };
    if rule_files.is_empty() {
        return Err(RouterError::Config(ConfigError::Invalid(
            "no rule files given (use -f or rule_files in the settings file)".into(),
        ))
        .into());
    }

    let table = RuleTable::from_files(&rule_files[..]).map_err(RouterError::Rules)?;

    for rule in table.rules() {
        if config.verbose.forwarding_rules {
            tracing::info!("{}: {}", rule.location, table.describe(rule));
        } else {
            tracing::debug!("{}: {}", rule.location, table.describe(rule));
        }
    }

    let transport = UdpTransport::connect(table.destinations())
        .await
        .map_err(RouterError::Transport)?;

    let router = Router::new(table).with_verbosity(config.verbose);
    let listen = SocketAddr::new(config.listen_address, config.listen_port);
    let handle = router.run_on(listen, transport).await?;

    if config.verbose.listen_port {
        tracing::info!("{} listening on {}", config.name, handle.local_addr());
    } else {
        tracing::debug!("{} listening on {}", config.name, handle.local_addr());
    }

    println!("OSC Whispers v{}", env!("CARGO_PKG_VERSION"));
    println!("Press Ctrl+C to stop...");

    // Stats reporting task
    let stats_interval = config.stats_interval_secs;
    let stats_handle = handle.clone();
    if stats_interval > 0 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                if let Ok(stats) = stats_handle.get_stats().await {
                    print_stats(&stats);
                }
            }
        });
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    // Print final stats
    if let Ok(stats) = handle.get_stats().await {
        println!("\nFinal Statistics:");
        print_stats(&stats);
    }
    handle.stop();

    Ok(())
}

fn build_config(args: &Args) -> Result<(WhispersConfig, Option<PathBuf>), ConfigError> {
    let (mut config, loaded_from) = match args.config {
        Some(ref path) => (WhispersConfig::from_file(path)?, Some(path.clone())),
        None => WhispersConfig::discover(&WhispersConfig::default_locations()[..])?,
    };

    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(address) = args.listen_address {
        config.listen_address = address;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }
    if let Some(interval) = args.stats_interval {
        config.stats_interval_secs = interval;
    }
    if let Some(over) = args.verbosity_override() {
        config.verbose.apply(&over);
    }

    config.validate()?;
    Ok((config, loaded_from))
}

fn cmd_gen_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&WhispersConfig::example())?;

    // Add comments
    let content = format!(
        r#"# OSC Whispers settings
# Generated by oscwhispers gen-config
#
# Rule file lines: PREFIX +|- HOST:PORT...
#   +  forward the address unchanged
#   -  strip the first address segment

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated settings file: {}", output.display());
    Ok(())
}

fn cmd_check(files: &[PathBuf], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let table = RuleTable::from_files(files)?;
    check_destinations(table.destinations())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    println!("Rules valid!");
    println!();
    println!("Destinations: {}", table.destinations().len());
    for entry in table.destinations().iter() {
        println!(
            "  [{}] {} (first seen {})",
            entry.id.index(),
            entry.destination,
            entry.first_seen
        );
    }
    println!("Rules: {}", table.rules().len());
    for (i, rule) in table.rules().iter().enumerate() {
        println!("  [{}] {}  ({})", i, table.describe(rule), rule.location);
    }
    Ok(())
}

fn print_stats(stats: &RouterStatsSnapshot) {
    println!("--- Router Statistics ({}s) ---", stats.uptime_secs);
    println!(
        "  {} packets, {} messages, {} unrouted, {} decode errors",
        stats.packets_received,
        stats.messages_received,
        stats.messages_unrouted,
        stats.decode_errors
    );
    for stat in &stats.routes {
        print_route_stats(stat);
    }
}

fn print_route_stats(stat: &RouteStatsSnapshot) {
    println!(
        "  /{}: {} matched, {} sent ({:.1} msg/s), {}, {} dropped, {} errors",
        stat.prefix,
        stat.messages_matched,
        stat.deliveries,
        stat.deliveries_per_second(),
        format_bytes(stat.bytes_forwarded),
        stat.messages_dropped,
        stat.errors
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
