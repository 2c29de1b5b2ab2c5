use std::future::pending;

use anyhow::{Context, Result};
use balance_controller_core::{
    BalanceError, RealtimeLoop, RiccatiController, TelemetryLink, TransportError, gain_latch,
};
use clap::Parser;
use log::{LevelFilter, error, info};
use tokio_serial::SerialPortBuilderExt;

use crate::{args::Cli, config::build_config, recorder::Recorder, serial::SerialWrapper};

mod args;
mod config;
mod recorder;
mod serial;

fn init_logger() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .filter(Some("balance_controller"), LevelFilter::Trace)
        .filter(Some("balance_controller_core"), LevelFilter::Trace)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let balance = RealtimeLoop::new(&config)?;

    let serial = tokio_serial::new(&cli.port, cli.baud)
        .open_native_async()
        .map_err(|e| BalanceError::from(TransportError::Open(e.to_string())))
        .with_context(|| format!("opening {} at {} baud", cli.port, cli.baud))?;
    info!("connected to {} at {} baud", cli.port, cli.baud);

    let mut recorder = cli.record.as_deref().map(Recorder::create).transpose()?;

    // solve for the gain while calibration runs, actuation waits on the latch
    let (publisher, gains) = gain_latch();
    let model = balance.model().clone();
    let weights = config.weights.clone();
    let settings = config.riccati.clone();
    let solver = tokio::task::spawn_blocking(move || {
        publisher.publish(RiccatiController::solve(&model, &weights, &settings));
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for ctrl-c, run until the stream ends: {}", e);
            pending::<()>().await;
        }
    };

    let result = balance
        .run(
            TelemetryLink::new(SerialWrapper(serial)),
            gains,
            shutdown,
            |frame| {
                if let Some(recorder) = recorder.as_mut() {
                    recorder.record(frame);
                }
            },
        )
        .await;

    let recording = recorder.map(Recorder::finish).transpose();
    let summary = result?;
    recording?;
    solver.await.context("gain solver panicked")?;

    info!(
        "{} cycles, {} actuated, {} numerical faults, {} skipped records",
        summary.cycles, summary.actuated_cycles, summary.numerical_faults, summary.skipped_records
    );
    Ok(())
}
