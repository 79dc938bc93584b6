pub mod config;
pub mod device;
pub mod swap;
pub mod uplink;

use crate::config::{Cli, Config};
use crate::device::{event_channels, DiscoveryHandle, GilrsDriver};
use crate::uplink::{Aggregator, ControlLink, UplinkFailure};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load(Cli::parse())?;
    info!(
        endpoint = %config.bottom_url,
        static_dir = %config.static_dir.display(),
        "topside starting; static assets are served by the web frontend"
    );

    // Control path first: without it there is nothing to drive.
    let link = ControlLink::connect(&config.bottom_url, None).await?;

    let (sinks, streams) = event_channels();
    let (intent_tx, intent_rx) = mpsc::channel(1);
    let (snapshot_tx, snapshot_rx) = mpsc::channel(8);
    let (link_failure_tx, mut link_failure_rx) = mpsc::channel(1);

    tokio::spawn(link.run(snapshot_rx, link_failure_tx));

    let driver = GilrsDriver::new(None);
    let _discovery = DiscoveryHandle::spawn(Box::new(driver), sinks, intent_tx, None);

    let aggregator = tokio::spawn(Aggregator::new(streams, intent_rx, snapshot_tx, None).run());

    // Recoverable conditions never reach this point; the first report here
    // ends the process and leaves restarting to the external supervisor.
    let fatal: UplinkFailure = tokio::select! {
        Some(e) = link_failure_rx.recv() => e.into(),
        result = aggregator => match result {
            Ok(Ok(())) => return Err(eyre!("aggregator loop ended without an error")),
            Ok(Err(e)) => e.into(),
            Err(join) => return Err(eyre!("aggregator task panicked: {join}")),
        },
    };
    error!("unrecoverable failure: {fatal}");
    Err(fatal.into())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
