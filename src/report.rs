//! Periodic CSV report of viewer count and global CPU usage.

use std::fs::File;
use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ReportConfig;
use crate::viewer::counter::ConnectionCounter;

pub const HEADER: &str = "timestamp, peerConnectionCount, cpuUsage\n";

pub fn format_row(at: DateTime<Utc>, connections: i64, cpu_usage: f32) -> String {
    format!(
        "{}, {}, {:.6}\n",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        connections,
        cpu_usage
    )
}

pub struct UsageReporter<W> {
    out: W,
    config: ReportConfig,
    counter: ConnectionCounter,
    system: System,
}

impl UsageReporter<File> {
    /// Truncates the report file and writes the header.
    pub fn create(config: ReportConfig, counter: ConnectionCounter) -> anyhow::Result<Self> {
        let file = File::create(&config.path)
            .with_context(|| format!("create report file {}", config.path.display()))?;
        UsageReporter::new(file, config, counter)
    }
}

impl<W: Write + Send + 'static> UsageReporter<W> {
    pub fn new(mut out: W, config: ReportConfig, counter: ConnectionCounter) -> anyhow::Result<Self> {
        out.write_all(HEADER.as_bytes())?;
        out.flush()?;

        let mut system = System::new();
        // usage is a delta between refreshes; prime the first sample
        system.refresh_cpu();

        Ok(Self {
            out,
            config,
            counter,
            system,
        })
    }

    fn write_row(&mut self) -> std::io::Result<()> {
        self.system.refresh_cpu();
        let cpu_usage = match self.system.global_cpu_info().cpu_usage() {
            usage if usage.is_finite() => usage,
            _ => 0.0,
        };
        let row = format_row(Utc::now(), self.counter.get(), cpu_usage);
        self.out.write_all(row.as_bytes())?;
        self.out.flush()
    }

    /// Writes one row per interval until cancelled. The first row comes one
    /// interval after start.
    pub async fn run(mut self, cancel: CancellationToken) -> W {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.write_row() {
                        log::warn!("write usage report: {}", e);
                    }
                }
            }
        }
        log::info!("usage reporter stopped");
        self.out
    }
}

/// Opens the report file up front so an unwritable path fails startup.
pub(crate) fn start_reporter(
    config: ReportConfig,
    counter: ConnectionCounter,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    log::info!(
        "writing usage report to {} every {:?}",
        config.path.display(),
        config.interval
    );
    let reporter = UsageReporter::create(config, counter)?;
    Ok(tokio::spawn(async move {
        reporter.run(cancel).await;
    }))
}
