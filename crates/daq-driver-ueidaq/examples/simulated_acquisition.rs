//! Simulated acquisition example.
//!
//! Builds every map and data source described by a configuration file on top
//! of a free-running simulated IOM and runs a number of host cycles, printing
//! the status word, first timestamp and first channel of each.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p daq-driver-ueidaq --example simulated_acquisition -- \
//!     --config crates/daq-driver-ueidaq/config/ueidaq.example.toml --cycles 20
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use daq_driver_ueidaq::{StatusFlags, UeiSystem};
use tracing::{info, warn};
use ueidaq_core::{logging, UeiConfig};
use ueidaq_driver_mock::MockIom;

/// Run UEIDAQ data sources against a simulated IOM
#[derive(Parser, Debug)]
#[command(name = "simulated_acquisition")]
#[command(about = "Poll UEIDAQ maps on a simulated I/O module")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "config/ueidaq.example.toml")]
    config: PathBuf,

    /// Host cycles per data source
    #[arg(long, default_value = "10")]
    cycles: u32,

    /// Hardware ticks between simulated scans
    #[arg(long, default_value = "1")]
    timestamp_step: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = UeiConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    let driver = MockIom::free_running(&config.iom.name, args.timestamp_step);
    let system = UeiSystem::from_config(&config, Box::new(driver))?;
    let (registry, _, mut sources) = system.into_parts();
    info!(devices = registry.len(), data_sources = sources.len(), "Starting simulated acquisition");

    for cycle in 0..args.cycles {
        for source in &mut sources {
            if let Err(e) = source.synchronise() {
                warn!(source = %source.name(), cycle, error = %e, "Cycle failed");
                continue;
            }
            let buffer = source.last_buffer();
            let status = source.status(buffer).unwrap_or(0);
            let flags = StatusFlags::from_bits_truncate(status);
            let first = source.map().packet().value(0, 0);
            println!(
                "{:>4} {:<10} status={:#010x} flags={:?} t0={:?} ch0={:?}",
                cycle,
                source.name(),
                status,
                flags,
                source.timestamp(buffer, 0),
                first
            );
        }
    }

    for source in &mut sources {
        source.prepare_next_state()?;
        let stats = source.stats();
        info!(
            source = %source.name(),
            cycles = stats.cycles,
            packets = stats.packets,
            invalid = stats.invalid,
            errors = stats.errors,
            "Acquisition stopped"
        );
    }
    Ok(())
}
