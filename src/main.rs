use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;
mod ingest;
mod media;
mod report;
mod viewer;

use config::RelayConfig;
use ingest::source::FfmpegConnector;
use media::track::OutboundTrack;
use viewer::counter::ConnectionCounter;
use viewer::signaling::Signaler;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("webrtc", log::LevelFilter::Warn)
        .filter_module("interceptor", log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = RelayConfig::parse();

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    ffmpeg_source::init()?;

    let cancel = CancellationToken::new();
    let track = Arc::new(OutboundTrack::new());
    let counter = ConnectionCounter::new();
    let signaler = Arc::new(
        Signaler::new(config.signaling(), Arc::clone(&track), counter.clone())
            .context("build WebRTC API")?,
    );

    let reporter = report::start_reporter(config.report(), counter, cancel.clone())?;
    let api_server = api::start_api_server(
        cancel.clone(),
        Arc::clone(&signaler),
        config.listen,
        &config.static_dir,
    )
    .await?;
    let mut ingest = ingest::start_ingest(
        config.ingest(),
        Arc::new(FfmpegConnector),
        track,
        cancel.clone(),
    );

    // the ingest task finishes either on a fatal error or once cancelled
    let joined = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                log::info!("interrupted, shutting down");
                cancel.cancel();
            },
            joined = &mut ingest => break joined,
        }
    };
    cancel.cancel();

    signaler.close_all().await;
    join_task("API server", api_server).await;
    join_task("usage reporter", reporter).await;

    match joined.context("ingest task")? {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context("ingest stopped")),
    }
}

/// Waits for a background task. Returns false if it panicked or was aborted.
async fn join_task(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            log::error!("{} task failed: {}", name, e);
            false
        }
    }
}
