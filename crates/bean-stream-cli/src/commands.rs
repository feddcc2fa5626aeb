//! Command handlers for the bean-stream CLI

use std::fs::OpenOptions;
use std::io::{self, BufWriter};
use std::sync::Arc;
use std::time::Duration;

use bean_stream::{
    BeanDevice, BeanStream, Coalescer, CommandGate, EventReceiver, ReadingKind, StopOutcome,
    StreamConfig, StreamEvent, StreamOptions,
};
use bean_stream_ble::{BleBean, CharacteristicMap};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::sinks::{JsonLines, ReadingSink, RowLines, SerialText};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        let mut options = config.stream.clone();

        match cli.command {
            Commands::Poll(args) => {
                let characteristics = &config.ble.characteristics;
                args.apply(&mut options, |kind| characteristics.uuid_for(kind).is_some());
                let stream = open_stream(&config, &options).await?;
                info!("Polling readings, press Ctrl-C to stop.");
                run(&stream, &mut JsonLines::new(io::stdout())).await?;
            }
            Commands::Notify {
                scratch,
                high_water_mark,
            } => {
                options.notify_scratch = Some(scratch);
                options.high_water_mark = Some(high_water_mark);
                let stream = open_stream(&config, &options).await?;
                info!("Streaming scratch notifications, press Ctrl-C to stop.");
                run(&stream, &mut JsonLines::new(io::stdout())).await?;
            }
            Commands::Serial { output } => {
                options.listen_serial = true;
                let file = OpenOptions::new().create(true).append(true).open(&output)?;
                let stream = open_stream(&config, &options).await?;
                info!(
                    "Streaming serial data to '{}', press Ctrl-C to stop.",
                    output.display()
                );
                run(&stream, &mut SerialText::new(BufWriter::new(file))).await?;
            }
            Commands::Rows {
                interval,
                high_water_mark,
                max_age_ms,
            } => {
                options.poll = Some(interval);
                options.poll_accell = true;
                options.poll_temp = true;
                options.high_water_mark = Some(high_water_mark);
                let missing = unmapped_targets(
                    &config.ble.characteristics,
                    &[ReadingKind::Temperature, ReadingKind::Accelerometer],
                );
                if !missing.is_empty() {
                    return Err(CliError::Config(format!(
                        "rows needs characteristics for {:?}; map them under [ble.characteristics]",
                        missing
                    )));
                }
                let mut coalescer = Coalescer::new();
                if let Some(max_age) = max_age_ms {
                    coalescer = coalescer.with_max_age(Duration::from_millis(max_age));
                }
                let stream = open_stream(&config, &options).await?;
                info!("Streaming temp and accell rows, press Ctrl-C to stop.");
                run(&stream, &mut RowLines::new(coalescer, io::stdout())).await?;
            }
            Commands::WriteScratch { bank, value, hex } => {
                let bytes = if hex {
                    hex::decode(value.trim())?
                } else {
                    value.into_bytes()
                };
                let bean = open_bean(&config).await?;
                write_scratch(bean, bank, &bytes).await?;
                println!("Wrote {} bytes to scratch{}", bytes.len(), bank);
            }
        }
        Ok(())
    }
}

async fn open_bean(config: &AppConfig) -> Result<Arc<dyn BeanDevice>> {
    let bean = BleBean::open(config.device()?, config.ble.to_ble_config()).await?;
    Ok(Arc::new(bean))
}

async fn open_stream(config: &AppConfig, options: &StreamOptions) -> Result<BeanStream> {
    // Reject bad options before spending time on a scan
    let stream_config = StreamConfig::from_options(options)?;
    let targets: Vec<ReadingKind> = stream_config
        .poll_targets
        .iter()
        .chain(&stream_config.notify_targets)
        .copied()
        .collect();
    for kind in unmapped_targets(&config.ble.characteristics, &targets) {
        warn!(
            "No characteristic mapped for {}; its reads will fail. Map it under [ble.characteristics]",
            kind
        );
    }
    let bean = open_bean(config).await?;
    Ok(BeanStream::new(bean, stream_config))
}

/// Targets the BLE facade has no characteristic for
fn unmapped_targets(characteristics: &CharacteristicMap, targets: &[ReadingKind]) -> Vec<ReadingKind> {
    targets
        .iter()
        .copied()
        .filter(|kind| characteristics.uuid_for(*kind).is_none())
        .collect()
}

/// Connect, write one scratch bank and disconnect
pub async fn write_scratch(bean: Arc<dyn BeanDevice>, bank: u8, value: &[u8]) -> Result<()> {
    if !(1..=bean_stream::normalizer::SCRATCH_BANKS).contains(&bank) {
        return Err(CliError::Config(format!("scratch bank {} out of range 1..=5", bank)));
    }
    if value.is_empty() || value.len() > bean_stream::normalizer::MAX_SCRATCH_LEN {
        return Err(CliError::Config(format!(
            "scratch value must be 1..={} bytes",
            bean_stream::normalizer::MAX_SCRATCH_LEN
        )));
    }

    let gate = CommandGate::new(bean);
    gate.connect().await?;
    let result = gate.write(ReadingKind::Scratch(bank), value).await;
    if let Err(e) = gate.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    Ok(result?)
}

// ----------------------------------------------------------------------------
// Stream Driver
// ----------------------------------------------------------------------------

/// Drain a stream into a sink until it ends; returns the number of readings
///
/// The first Ctrl-C stops the stream gracefully (buffered readings are still
/// written), a second one forces teardown.
pub async fn run<S: ReadingSink>(stream: &BeanStream, sink: &mut S) -> Result<usize> {
    let events = tokio::spawn(log_events(stream.subscribe_events()));
    let mut readings = stream.start().await?;
    let interrupts = tokio::spawn(handle_interrupts(stream.clone()));

    let mut written = 0;
    let mut result = Ok(());
    while let Some(reading) = readings.next().await {
        if let Err(e) = sink.write(&reading) {
            result = Err(e);
            break;
        }
        written += 1;
    }
    drop(readings);

    let flushed = sink.flush();
    stream.ended().await;
    interrupts.abort();
    let _ = events.await;

    result?;
    flushed?;
    info!("Stream ended after {} readings", written);
    Ok(written)
}

async fn handle_interrupts(stream: BeanStream) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("Disconnecting... press Ctrl-C again to exit immediately.");

    let graceful = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.stop().await })
    };

    tokio::select! {
        _ = graceful => {}
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() && stream.stop().await == StopOutcome::Forced {
                warn!("Forced exit, buffered readings dropped");
            }
        }
    }
}

async fn log_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(StreamEvent::Ended { cause }) => {
                info!("Stream ended ({:?})", cause);
                break;
            }
            Ok(event) => warn!("{:?}", event),
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} stream events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bean_stream::{DeviceCall, FlowControl, MockBean};
    use clap::Parser;

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_until_disconnect() {
        let device = Arc::new(
            MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossless),
        );
        let stream = BeanStream::new(
            device.clone(),
            StreamConfig::new().with_notify_target(ReadingKind::Serial),
        );

        let feeder = {
            let device = device.clone();
            tokio::spawn(async move {
                while !device.notify(ReadingKind::Serial, b"hi".to_vec()).await {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                device.drop_link();
            })
        };

        let mut sink = SerialText::new(Vec::new());
        let written = run(&stream, &mut sink).await.unwrap();
        feeder.await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(sink.into_inner(), b"hi".to_vec());
        assert_eq!(device.disconnect_count(), 1);
    }

    #[test]
    fn test_unmapped_targets_on_stock_map() {
        let map = CharacteristicMap::default();
        let targets = [
            ReadingKind::Battery,
            ReadingKind::Temperature,
            ReadingKind::Accelerometer,
            ReadingKind::Scratch(1),
            ReadingKind::Serial,
        ];
        assert_eq!(
            unmapped_targets(&map, &targets),
            vec![ReadingKind::Temperature, ReadingKind::Accelerometer]
        );
    }

    #[tokio::test]
    async fn test_rows_rejected_without_mapped_characteristics() {
        let config = AppConfig::default().with_device(Some("bean".to_string()));
        let cli = Cli::try_parse_from(["bean-stream", "rows"]).unwrap();
        let result = CommandDispatcher::execute(cli, config).await;
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[tokio::test]
    async fn test_write_scratch_round_trip() {
        let device = Arc::new(MockBean::new("bean"));
        write_scratch(device.clone(), 3, b"on").await.unwrap();

        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::Connect,
                DeviceCall::Write(ReadingKind::Scratch(3), b"on".to_vec()),
                DeviceCall::Disconnect,
            ]
        );
        assert!(write_scratch(device.clone(), 6, b"on").await.is_err());
        assert!(write_scratch(device.clone(), 1, &[0u8; 21]).await.is_err());
        assert_eq!(device.calls().len(), 3);
    }
}
