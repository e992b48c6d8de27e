//! Demo command - walk through each resource kind.

use std::time::Duration;

use anyhow::Result;
use brook_engine::{Client, Dependencies, QueryFilter};
use brook_testing::ManualSource;
use clap::Args;
use tracing::info;

use crate::error::CliError;
use crate::keys::{bucket_tag, item_path, seeded_store, Clock, Feed, Item, SetItem};
use crate::output::{print_detail, print_output, print_step, print_success, Metric};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct DemoCommand {
    /// Simulated backend latency in milliseconds.
    #[arg(long, default_value = "50")]
    latency_ms: u64,

    /// Pages available to the feed.
    #[arg(long, default_value = "3")]
    pages: u32,
}

impl DemoCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if self.pages == 0 {
            return Err(CliError::invalid("--pages", "must be at least 1").into());
        }

        let mut config = ctx.config;
        config.query.stale_time = Duration::from_secs(30);
        config.query.keep_alive_time = Duration::from_millis(200);
        config.subscription.keep_alive_time = Duration::from_millis(200);
        config.gc_flush_window = Duration::from_millis(50);
        let settle = config.query.keep_alive_time + config.gc_flush_window * 2;

        let store =
            seeded_store(8, self.pages).with_latency(Duration::from_millis(self.latency_ms));
        let client = Client::new(config, Dependencies::new().with(store.clone()))?;
        info!("Demo client started");

        print_step(1, "Query: fetch once, then serve while fresh");
        let item = client.query(Item(1))?;
        let value = item.resume().await.map_err(CliError::step("query fetch"))?;
        print_detail("value", value);
        match item.resume().await {
            Ok(_) => print_detail("second resume", "served"),
            Err(e) => print_detail("second resume", e),
        }
        print_detail("backend calls", store.calls_for(&item_path(1)));

        print_step(2, "Invalidate by tag");
        let invalidated =
            client.invalidate_queries(&QueryFilter::new().with_tags([bucket_tag(1)]));
        tokio::time::sleep(Duration::from_millis(self.latency_ms * 2)).await;
        print_detail("invalidated", invalidated);
        print_detail("backend calls", store.calls_for(&item_path(1)));

        print_step(3, "Infinite query: load every page");
        let feed = client.infinite_query(Feed { pages: self.pages })?;
        feed.resume().await.map_err(CliError::step("feed fetch"))?;
        while feed.has_more() {
            feed.load_more().await.map_err(CliError::step("feed load more"))?;
        }
        let chunks = feed.state().reply.unwrap_or_default();
        let pages: Vec<String> = chunks
            .iter()
            .map(|chunk| format!("{}={}", chunk.param, chunk.data))
            .collect();
        print_detail("pages", pages.join(", "));
        let chunks = feed.invalidate().await.map_err(CliError::step("feed revalidate"))?;
        print_detail("after revalidate", format!("{} pages", chunks.len()));

        print_step(4, "Mutation: write, then invalidate the item");
        let set = client.mutation(SetItem(1))?;
        let written = set.mutate(42).await.map_err(CliError::step("mutation"))?;
        print_detail("written", written);
        tokio::time::sleep(Duration::from_millis(self.latency_ms * 2)).await;
        let current = item.state().reply.map(|v| v.to_string());
        print_detail("item now", current.unwrap_or_else(|| "-".to_string()));

        print_step(5, "Subscription: receive pushed ticks");
        let ticks = ManualSource::new();
        let clock = client.subscription(Clock {
            ticks: ticks.clone(),
        })?;
        clock.resume().await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        for tick in 1..=3 {
            ticks.emit(tick);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let latest = clock.state().reply.map(|v| v.to_string());
        print_detail("latest tick", latest.unwrap_or_else(|| "-".to_string()));

        print_step(6, "Freeze on release, rehydrate on reuse");
        drop(item);
        drop(clock);
        tokio::time::sleep(settle).await;
        let stats = client.stats();
        print_detail("cached queries", stats.cached_queries);
        print_detail("cached subscriptions", stats.cached_subscriptions);
        let calls = store.calls();
        let item = client.query(Item(1))?;
        let value = item.state().reply.map(|v| v.to_string());
        print_detail("rehydrated value", value.unwrap_or_else(|| "-".to_string()));
        print_detail("new backend calls", store.calls() - calls);

        print_step(7, "Summary");
        let stats = client.stats();
        let backend = store.stats();
        let rows = vec![
            Metric::new("active queries", stats.active_queries),
            Metric::new("active infinite queries", stats.active_infinite_queries),
            Metric::new("active mutations", stats.active_mutations),
            Metric::new("query cache hits", stats.query_cache.hits),
            Metric::new("backend calls", backend.calls),
            Metric::new("backend writes", backend.writes),
        ];
        print_output(&rows, ctx.format);

        client.shutdown().await;
        print_success("demo finished");
        Ok(())
    }
}
