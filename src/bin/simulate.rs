//! Swarm Simulation Binary
//!
//! Spins up an in-process swarm (healthy, slow, stalled and clueless seed
//! peers on a memory hub) and downloads a synthetic data set through it,
//! with a live progress bar and a telemetry report at the end.
//!
//! Run with: `cargo run --bin simulate -- --seeds 4 --stalled 1`

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swarm_fetcher::downloader::{DataDownloader, DownloadEvent, DownloaderConfig};
use swarm_fetcher::protocol::{DatasetId, WireMessage};
use swarm_fetcher::transport::memory::{MemoryHub, SeedConfig, SeedPeer};
use swarm_fetcher::transport::PeerId;

/// Simulate a swarm download over an in-process transport
#[derive(Debug, Parser)]
#[command(name = "simulate", version)]
struct Args {
    /// Size of the synthetic data set in bytes
    #[arg(long, default_value_t = 4_000_000)]
    length: usize,

    /// Chunk size in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: u32,

    /// Number of healthy seed peers
    #[arg(long, default_value_t = 3)]
    seeds: usize,

    /// Number of seeds that accept chunk requests but never answer
    #[arg(long, default_value_t = 1)]
    stalled: usize,

    /// Number of seeds that deny knowing the data set
    #[arg(long, default_value_t = 1)]
    clueless: usize,

    /// Upper bound on each healthy seed's per-reply delay (milliseconds)
    #[arg(long, default_value_t = 40)]
    max_delay_ms: u64,

    /// Give up after this many seconds without new data
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let mut rng = rand::thread_rng();
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data: Vec<u8> = (0..args.length).map(|_| rng.gen()).collect();

    info!(
        "Simulating {} byte data set in {} byte chunks across {} seeds ({} stalled, {} clueless)",
        args.length, args.chunk_size, args.seeds, args.stalled, args.clueless
    );

    // Keep the seeds alive for the duration of the run
    let mut seeds = Vec::new();
    let mut candidates = Vec::new();
    for index in 0..args.seeds {
        let delay = rng.gen_range(0..=args.max_delay_ms);
        let seed = SeedPeer::spawn(
            &hub,
            dataset_id,
            data.clone(),
            WireMessage::new(),
            SeedConfig {
                chunk_size: args.chunk_size,
                response_delay: Duration::from_millis(delay),
                ..SeedConfig::default()
            },
        );
        info!("Seed {} at {} replies after {}ms", index, seed.peer(), delay);
        candidates.push(seed.peer());
        seeds.push(seed);
    }
    for _ in 0..args.stalled {
        let seed = SeedPeer::spawn(
            &hub,
            dataset_id,
            data.clone(),
            WireMessage::new(),
            SeedConfig { chunk_size: args.chunk_size, serve_chunks: false, ..SeedConfig::default() },
        );
        warn!("Stalled seed at {}", seed.peer());
        candidates.push(seed.peer());
        seeds.push(seed);
    }
    for _ in 0..args.clueless {
        let seed = SeedPeer::spawn(
            &hub,
            dataset_id,
            Vec::new(),
            WireMessage::new(),
            SeedConfig { chunk_size: args.chunk_size, reply_no_info: true, ..SeedConfig::default() },
        );
        candidates.push(seed.peer());
        seeds.push(seed);
    }

    let transport = hub.attach(PeerId::random());
    let mut config = DownloaderConfig::new();
    // hedge stalled peers on a cadence visible within a simulation run
    config.dead_man_interval = Duration::from_secs(2);
    let downloader =
        DataDownloader::new(dataset_id, Arc::new(transport), candidates, config);

    let bar = ProgressBar::new(args.length as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .expect("static progress template is valid")
        .progress_chars("#>-"),
    );
    let mut events = downloader.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DownloadEvent::DataReceived { length, .. } => bar.inc(length as u64),
                DownloadEvent::Completed { .. } => {
                    bar.finish_with_message("complete");
                    break;
                }
            }
        }
    });

    let completed = downloader.download(args.timeout).await;
    if completed {
        let _ = progress.await;
    } else {
        progress.abort();
    }

    let status = downloader.status().await;
    println!("\n{}", status);

    if completed {
        let bytes = downloader
            .downloaded_bytes()
            .await
            .context("could not read back the payload")?;
        if bytes != data {
            warn!("Payload does not match the source data");
            return Ok(false);
        }
        info!("Payload verified byte-for-byte");
    } else {
        warn!("Download did not complete");
    }
    Ok(completed)
}
