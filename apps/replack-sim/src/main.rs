use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use ::config::ConfigError;
use replack_core::{CoreError, SeqRange, ServerAddr};
use replack_node::{
    AckError, AckTracker, ChannelCallback, Reaper, TrackerConfig, TrackerStatsSnapshot,
};
use replack_transport::channel_transport;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

mod config;
mod quorum;
mod replica;

use crate::config::SimConfig;
use crate::quorum::QuorumReport;
use crate::replica::{ReplicaBehavior, ReplicaReport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of writes to issue
    #[arg(long, short)]
    writes: Option<u64>,

    /// Seed for the replica reply schedule
    #[arg(long)]
    seed: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Error)]
enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid replica address {addr}: {source}")]
    Addr { addr: String, source: CoreError },
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Ack(#[from] AckError),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("{0} thread panicked")]
    Join(&'static str),
    #[error("failed to encode summary: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct SimSummary {
    writes: u64,
    replicas: usize,
    failed_writes: u64,
    expected_seq: u64,
    acked_seq: u64,
    elapsed_ms: u64,
    tracker: TrackerStatsSnapshot,
    replica: ReplicaReport,
    quorum: QuorumReport,
}

fn main() {
    let cli = Cli::parse();

    let filter = std::env::var("REPLACK_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match SimConfig::new(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(writes) = cli.writes {
        config.writes = writes;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let summary = match run(&config) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("{}", SimError::from(e));
                std::process::exit(1);
            }
        }
    } else {
        print_summary(&summary);
    }
}

fn parse_replicas(replicas: &[String]) -> Result<Vec<ServerAddr>, SimError> {
    replicas
        .iter()
        .map(|addr| {
            addr.parse().map_err(|source| SimError::Addr {
                addr: addr.clone(),
                source,
            })
        })
        .collect()
}

fn run(config: &SimConfig) -> Result<SimSummary, SimError> {
    let replicas = parse_replicas(&config.replicas)?;
    let tracker_config = TrackerConfig {
        queue_capacity: config.queue_capacity,
        timeout_delta: config.timeout_delta,
        ..TrackerConfig::default()
    };

    let (transport, dispatch_rx) = channel_transport(config.dispatch_buffer);
    let (callback, events) = ChannelCallback::new();
    let tracker = Arc::new(AckTracker::new(tracker_config, transport, callback)?);

    let replica_worker = replica::spawn(
        dispatch_rx,
        Arc::downgrade(&tracker),
        ReplicaBehavior {
            max_reply_delay: config.max_reply_delay,
            drop_probability: config.drop_probability,
            error_probability: config.error_probability,
            seed: config.seed,
        },
    )?;
    let replica_count = replicas.len();
    let watcher = thread::Builder::new()
        .name("replack-quorum".into())
        .spawn(move || quorum::watch(events, replica_count))?;
    let reaper = Reaper::spawn(Arc::downgrade(&tracker), config.reap_interval)?;

    info!(
        writes = config.writes,
        replicas = replica_count,
        capacity = config.queue_capacity,
        "starting simulation"
    );
    let started = Instant::now();
    let mut failed_writes = 0;
    let mut expected_seq = 0;
    for i in 0..config.writes {
        let start = i * config.batch_size + 1;
        let range = SeqRange::new(start, start + config.batch_size - 1)?;
        let payload = Bytes::from(format!("write-{i}"));
        match tracker.many_post(&replicas, range, config.pcode, config.write_timeout, payload) {
            Ok(()) => expected_seq = range.end(),
            Err(AckError::Dispatch(err)) => {
                warn!(seq = %range, %err, "write not fully dispatched");
                failed_writes += 1;
            }
            Err(err) => return Err(err.into()),
        }
        if !config.write_interval.is_zero() {
            thread::sleep(config.write_interval);
        }
    }

    let give_up = Instant::now() + config.write_timeout * 4;
    while tracker.drain() < expected_seq {
        if Instant::now() > give_up {
            warn!(
                acked_seq = tracker.acked_seq(),
                expected_seq,
                in_flight = tracker.in_flight(),
                "giving up waiting for acknowledgments"
            );
            break;
        }
        thread::sleep(config.reap_interval.min(Duration::from_millis(10)));
    }
    let elapsed = started.elapsed();

    reaper.stop();
    let acked_seq = tracker.acked_seq();
    let stats = tracker.stats();
    // last strong handle: closes the dispatch and event channels
    drop(tracker);

    let replica = replica_worker.join().map_err(|_| SimError::Join("replica"))?;
    let quorum = watcher.join().map_err(|_| SimError::Join("quorum"))?;

    info!(acked_seq, elapsed_ms = elapsed.as_millis() as u64, "simulation finished");
    Ok(SimSummary {
        writes: config.writes,
        replicas: replica_count,
        failed_writes,
        expected_seq,
        acked_seq,
        elapsed_ms: elapsed.as_millis() as u64,
        tracker: stats,
        replica,
        quorum,
    })
}

fn print_summary(summary: &SimSummary) {
    println!("writes:          {} ({} failed)", summary.writes, summary.failed_writes);
    println!("replicas:        {}", summary.replicas);
    println!("acked seq:       {} / {}", summary.acked_seq, summary.expected_seq);
    println!("elapsed:         {} ms", summary.elapsed_ms);
    println!(
        "nodes:           {} posted, {} succeeded, {} failed, {} timed out",
        summary.tracker.posted,
        summary.tracker.succeeded,
        summary.tracker.failed,
        summary.tracker.timed_out
    );
    println!(
        "replica replies: {} ok, {} refused, {} dropped",
        summary.replica.answered, summary.replica.refused, summary.replica.dropped
    );
    println!(
        "quorum:          {} reached, {} missed",
        summary.quorum.writes_with_quorum, summary.quorum.writes_without_quorum
    );
    println!(
        "round trip:      {} us mean, {} us max",
        summary.quorum.mean_round_trip_us, summary.quorum.max_round_trip_us
    );
}
