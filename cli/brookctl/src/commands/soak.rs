//! Soak command - drive synthetic load through one client.
//!
//! Workers pick random items and either read, invalidate or overwrite them
//! against a flaky backend. A sweeper invalidates whole buckets and evicts
//! expired cache entries. Counters are printed at the end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use brook_engine::{Client, CommandError, Dependencies, QueryFilter};
use clap::Args;
use colored::Colorize;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::CliError;
use crate::keys::{bucket_tag, item_path, Item, SetItem, Store, BUCKETS};
use crate::output::{print_output, print_warning, Metric};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SoakCommand {
    /// Number of distinct items.
    #[arg(long, default_value = "50")]
    keys: u32,

    /// Concurrent workers.
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Run time in seconds.
    #[arg(long, default_value = "10")]
    duration_secs: u64,

    /// Probability that a backend call fails.
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,

    /// Simulated backend latency in milliseconds.
    #[arg(long, default_value = "5")]
    latency_ms: u64,
}

/// Outcome counters shared by the workers.
#[derive(Debug, Default)]
struct Counters {
    served: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    writes: AtomicU64,
    relayed: AtomicU64,
}

impl Counters {
    fn record<T>(&self, result: &Result<T, CommandError>) {
        let counter = match result {
            Ok(_) => &self.served,
            Err(CommandError::Skipped(_)) => &self.skipped,
            Err(CommandError::Failed(_)) => &self.failed,
            Err(CommandError::Cancelled | CommandError::Actor(_)) => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

enum Op {
    Read,
    Invalidate,
    Write,
}

fn pick(keys: u32) -> (u32, Op) {
    let mut rng = rand::rng();
    let item = rng.random_range(0..keys);
    let op = match rng.random_range(0..10) {
        0 => Op::Write,
        1 => Op::Invalidate,
        _ => Op::Read,
    };
    (item, op)
}

impl SoakCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if self.keys == 0 {
            return Err(CliError::invalid("--keys", "must be at least 1").into());
        }
        if self.workers == 0 {
            return Err(CliError::invalid("--workers", "must be at least 1").into());
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(CliError::invalid("--failure-rate", "must be between 0 and 1").into());
        }

        let store = Store::flaky(self.failure_rate)
            .with_latency(Duration::from_millis(self.latency_ms));
        for n in 0..self.keys {
            store.insert(item_path(n), u64::from(n));
        }

        let client = Client::new(ctx.config, Dependencies::new().with(store.clone()))?;
        let counters = Arc::new(Counters::default());
        let deadline = Instant::now() + Duration::from_secs(self.duration_secs);
        info!(
            keys = self.keys,
            workers = self.workers,
            failure_rate = self.failure_rate,
            "Soak started"
        );

        let relay = client.error_relay().map(|relay| {
            let mut records = relay.subscribe();
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                while records.recv().await.is_ok() {
                    counters.relayed.fetch_add(1, Ordering::Relaxed);
                }
            })
        });

        let mut workers = Vec::with_capacity(self.workers + 1);
        for worker in 0..self.workers {
            let client = client.clone();
            let counters = Arc::clone(&counters);
            let keys = self.keys;
            workers.push(tokio::spawn(async move {
                while Instant::now() < deadline {
                    let (n, op) = pick(keys);
                    let item = match client.query(Item(n)) {
                        Ok(item) => item,
                        Err(e) => {
                            debug!(worker, error = %e, "Query unavailable");
                            break;
                        }
                    };
                    match op {
                        Op::Read => counters.record(&item.resume().await),
                        Op::Invalidate => counters.record(&item.invalidate().await),
                        Op::Write => {
                            let Ok(set) = client.mutation(SetItem(n)) else {
                                break;
                            };
                            let result = set.mutate(u64::from(n) + 1).await;
                            if result.is_ok() {
                                counters.writes.fetch_add(1, Ordering::Relaxed);
                            }
                            counters.record(&result);
                        }
                    }
                    // Yield between operations.
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }));
        }

        let sweeper = {
            let client = client.clone();
            tokio::spawn(async move {
                let mut bucket = 0;
                while Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    let filter = QueryFilter::new().with_tags([bucket_tag(bucket)]);
                    let invalidated = client.invalidate_queries(&filter);
                    let evicted = client.evict();
                    debug!(bucket, invalidated, evicted, "Sweep");
                    bucket = (bucket + 1) % BUCKETS;
                }
            })
        };
        workers.push(sweeper);

        for worker in workers {
            worker.await?;
        }

        let stats = client.stats();
        client.shutdown().await;
        if let Some(relay) = relay {
            relay.abort();
        }

        let backend = store.stats();
        let rows = vec![
            Metric::new("served", Counters::get(&counters.served)),
            Metric::new("skipped", Counters::get(&counters.skipped)),
            Metric::new("failed", Counters::get(&counters.failed)),
            Metric::new("cancelled", Counters::get(&counters.cancelled)),
            Metric::new("mutations", Counters::get(&counters.writes)),
            Metric::new("relayed errors", Counters::get(&counters.relayed)),
            Metric::new("backend calls", backend.calls),
            Metric::new("backend failures", backend.failures),
            Metric::new("active queries", stats.active_queries),
            Metric::new("cached queries", stats.cached_queries),
            Metric::new(
                "query cache hit ratio",
                format!("{:.2}", stats.query_cache.hit_ratio()),
            ),
            Metric::new("query cache evictions", stats.query_cache.evictions),
        ];
        print_output(&rows, ctx.format);

        if Counters::get(&counters.served) == 0 {
            print_warning("no request was served");
        } else {
            println!("{}", "Soak finished".green().bold());
        }
        Ok(())
    }
}
