//! Config command - show the effective engine configuration.

use anyhow::Result;
use clap::Args;

use crate::output::{print_output, Metric};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ConfigCommand {}

impl ConfigCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let config = &ctx.config;
        let ms = |d: std::time::Duration| format!("{}ms", d.as_millis());

        let mut rows = vec![
            Metric::new("query.stale_time", ms(config.query.stale_time)),
            Metric::new("query.gc_time", ms(config.query.gc_time)),
            Metric::new("query.keep_alive_time", ms(config.query.keep_alive_time)),
            Metric::new(
                "query.prefetch_window_time",
                ms(config.query.prefetch_window_time),
            ),
            Metric::new("query.retry.count", config.query.retry.count),
            Metric::new(
                "query.retry.initial_interval",
                ms(config.query.retry.initial_interval),
            ),
            Metric::new(
                "query.retry.max_interval",
                ms(config.query.retry.max_interval),
            ),
            Metric::new("mutation.keep_alive_time", ms(config.mutation.keep_alive_time)),
            Metric::new("subscription.gc_time", ms(config.subscription.gc_time)),
            Metric::new("query_cache_capacity", config.query_cache_capacity),
            Metric::new(
                "subscription_cache_capacity",
                config.subscription_cache_capacity,
            ),
            Metric::new("gc_flush_window", ms(config.gc_flush_window)),
            Metric::new("mailbox_size", config.mailbox_size),
            Metric::new(
                "triggers.network_resume_delay",
                ms(config.triggers.network_resume_delay),
            ),
            Metric::new(
                "triggers.focus_resume_delay",
                ms(config.triggers.focus_resume_delay),
            ),
            Metric::new("log_level", &config.log_level),
        ];
        match &config.relay {
            Some(relay) => rows.push(Metric::new("relay.dedup_window", ms(relay.dedup_window))),
            None => rows.push(Metric::new("relay", "disabled")),
        }

        print_output(&rows, ctx.format);
        Ok(())
    }
}
