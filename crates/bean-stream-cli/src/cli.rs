//! Command-line interface definitions and parsing

use std::path::PathBuf;

use bean_stream::{ReadingKind, StreamOptions};
use clap::{Args, Parser, Subcommand};

/// Poll interval used when neither the flags nor the config file set one
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Buffer capacity for the sink-oriented subcommands
pub const SINK_HIGH_WATER_MARK: usize = 32;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Bean address or local name (overrides the config file)
    #[arg(short, long)]
    pub device: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll readings and print them as JSON lines
    Poll(PollArgs),
    /// Print scratch notifications as JSON lines
    Notify {
        /// Scratch banks to subscribe to, e.g. "1,2,3"
        #[arg(short, long, default_value = "1,2,3")]
        scratch: String,
        /// Maximum number of undelivered readings
        #[arg(long, default_value_t = SINK_HIGH_WATER_MARK)]
        high_water_mark: usize,
    },
    /// Append serial output to a file
    Serial {
        /// Output file
        #[arg(short, long, default_value = "./serial.txt")]
        output: PathBuf,
    },
    /// Print coalesced temperature / acceleration rows as JSON
    Rows {
        /// Poll interval in milliseconds
        #[arg(short, long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
        interval: u64,
        /// Maximum number of undelivered readings
        #[arg(long, default_value_t = SINK_HIGH_WATER_MARK)]
        high_water_mark: usize,
        /// Discard a half-complete row older than this many milliseconds
        #[arg(long)]
        max_age_ms: Option<u64>,
    },
    /// Write a value to a scratch bank and exit
    WriteScratch {
        /// Scratch bank, 1 through 5
        bank: u8,
        /// Value to write
        value: String,
        /// Interpret the value as hex bytes
        #[arg(long)]
        hex: bool,
    },
}

/// Flags of the `poll` subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PollArgs {
    /// Poll interval in milliseconds
    #[arg(short, long)]
    pub interval: Option<u64>,
    /// Poll the accelerometer
    #[arg(long)]
    pub accell: bool,
    /// Poll the battery level
    #[arg(long)]
    pub batt: bool,
    /// Poll the temperature
    #[arg(long)]
    pub temp: bool,
    /// Scratch banks to poll, e.g. "1,2"
    #[arg(long)]
    pub scratch: Option<String>,
    /// Maximum number of undelivered readings
    #[arg(long)]
    pub high_water_mark: Option<usize>,
}

impl PollArgs {
    /// Overlay these flags on options loaded from the config file
    ///
    /// With no poll target selected anywhere, every target the device can
    /// serve (per `available`) is polled.
    pub fn apply(&self, options: &mut StreamOptions, available: impl Fn(ReadingKind) -> bool) {
        options.poll_accell |= self.accell;
        options.poll_batt |= self.batt;
        options.poll_temp |= self.temp;
        if let Some(scratch) = &self.scratch {
            options.poll_scratch = Some(scratch.clone());
        }
        if let Some(high_water_mark) = self.high_water_mark {
            options.high_water_mark = Some(high_water_mark);
        }
        if let Some(interval) = self.interval {
            options.poll = Some(interval);
        }

        let any_target = options.poll_accell
            || options.poll_batt
            || options.poll_temp
            || options.poll_scratch.is_some();
        if !any_target {
            options.poll_accell = available(ReadingKind::Accelerometer);
            options.poll_batt = available(ReadingKind::Battery);
            options.poll_temp = available(ReadingKind::Temperature);
            options.poll_scratch = Some("1,2".to_string());
        }
        options.poll.get_or_insert(DEFAULT_POLL_INTERVAL_MS);
    }
}
