// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod trace;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;

use ruzu_gpu::GpuMemoryManager;
use ruzu_memory::HostMemory;

use crate::trace::Replayer;

/// ruzu-trace - replay GPU address space traces
#[derive(Parser, Debug)]
#[command(name = "ruzu-trace", version, about = "Replay GPU address space operations and dump the block layout")]
struct Args {
    /// Path to the trace file
    trace: PathBuf,

    /// Path to config file (default: auto-detect)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump the block layout after the last command
    #[arg(short, long)]
    dump: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging. The env filter admits debug; the global max level
    // decides until the config has been read.
    let rust_log_set = std::env::var_os("RUST_LOG").is_some();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp_millis()
        .init();
    if !args.verbose && !rust_log_set {
        log::set_max_level(LevelFilter::Info);
    }

    let settings = config::load_config(args.config.as_deref());
    if settings.use_debug_logging && !rust_log_set {
        log::set_max_level(LevelFilter::Debug);
    }

    info!("ruzu-trace");
    info!(
        "GPU VA limit 0x{:X}, alloc base 0x{:X}, sparse pool 0x{:X}",
        settings.gpu_va_limit, settings.alloc_base, settings.sparse_pool_size
    );

    let text = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("Failed to read trace {}", args.trace.display()))?;
    let commands = trace::parse_trace(&text)
        .with_context(|| format!("Failed to parse trace {}", args.trace.display()))?;
    info!("Loaded {} commands", commands.len());

    let gpu = GpuMemoryManager::new(&settings).context("Failed to create GPU memory manager")?;
    let host = HostMemory::new(settings.host_memory_size)
        .context("Failed to allocate host memory")?;
    let replayer = Replayer::new(gpu, host);

    for (index, command) in commands.iter().enumerate() {
        let output = replayer
            .execute(command)
            .with_context(|| format!("Command {} ({:?}) failed", index + 1, command))?;
        if let Some(output) = output {
            println!("{}", output.trim_end());
        }
    }

    if args.dump {
        print!("{}", replayer.dump());
    }

    Ok(())
}
