//! Small demonstration binary: enumerate the current device tree, then
//! sit in a `poll()` loop printing hotplug events as they arrive.
//!
//! Mirrors the usage pattern in `original_source/test-monitor.c` --
//! scan once, print what was found, then watch for attach/detach
//! events -- built on top of `devctl`'s public API instead of the raw
//! C library.

use std::sync::Arc;

use clap::Parser;
use devctl::{Context, Device, Enumerator, Monitor, NodeType, UNLIMITED_DEPTH};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "devctl-cli", about = "Enumerate and watch the device tree")]
struct Args {
    /// Only print devices/events whose name starts with this prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Path to the driver-control device, if not the default.
    #[arg(long)]
    channel: Option<String>,

    /// Maximum recursion depth for the initial scan, or 0 for no limit
    /// (translated to `devctl::UNLIMITED_DEPTH`).
    #[arg(long, default_value_t = 16)]
    max_depth: u32,

    /// Skip the live monitor and exit after the initial scan.
    #[arg(long)]
    scan_only: bool,

    /// Log verbosity: error, warn, info, debug, or trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

fn matches_prefix(device: &Device, prefix: &Option<String>) -> bool {
    match prefix {
        Some(p) => device.devname().starts_with(p.as_str()),
        None => true,
    }
}

fn print_device(index: usize, device: &Device) {
    println!(
        "[{index}] devname={} driver={} devclass={} devsubclass={} event={} parent={} unit={} major(block)={:?}",
        device.devname(),
        device.driver(),
        device.devclass(),
        device.devsubclass(),
        device.event(),
        device.parent(),
        device.unit(),
        device.major(NodeType::Block),
    );
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .with_target(false)
        .init();

    if let Err(e) = run(args) {
        eprintln!("devctl-cli: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> devctl::Result<()> {
    let context = match &args.channel {
        Some(path) => Context::new_with_path(path)?,
        None => Context::new()?,
    };

    let max_depth = if args.max_depth == 0 { UNLIMITED_DEPTH } else { args.max_depth };
    let mut enumerator = Enumerator::new(&context);
    let found = enumerator.scan("", max_depth)?;
    info!(found, "initial scan complete");

    for (i, device) in enumerator.devices().iter().enumerate() {
        if matches_prefix(device, &args.prefix) {
            print_device(i, device);
        }
    }

    if args.scan_only {
        return Ok(());
    }

    let prefix = args.prefix.clone();
    let mut monitor = Monitor::new(&context);
    monitor.enable_receiving_filtered(Some(Arc::new(move |d: &Device| matches_prefix(d, &prefix))))?;

    info!("watching for hotplug events, press ctrl-c to stop");
    let mut i = 0;
    loop {
        match monitor.receive_device() {
            Ok(device) => {
                print_device(i, &device);
                i += 1;
            }
            Err(e) => {
                warn!(error = %e, "failed to receive device");
            }
        }
    }
}
