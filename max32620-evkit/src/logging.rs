// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Functions for setting up the logging system

use core::str::FromStr;

use log::max_level;
use log::set_logger;
use log::set_max_level;
use log::trace;
use log::Level;
use log::LevelFilter;
use log::Log;
use log::Metadata;
use log::Record;

/// Log level used when `LP_LOGLEVEL` is not set
const DEFAULT_LEVEL: LevelFilter = LevelFilter::Info;

/// Setup logging
///
/// To change the log level set the environment variable `LP_LOGLEVEL`
/// before running `cargo run`.
///
/// This requires a clean rebuild because of
/// <https://github.com/rust-lang/cargo/issues/10358>
pub fn setup() {
    /// Log level
    const LEVEL: Option<&'static str> = option_env!("LP_LOGLEVEL");

    if set_logger(&ConsoleLogger).is_err() {
        return;
    }

    let level = LEVEL.map_or(DEFAULT_LEVEL, |lvl| {
        LevelFilter::from_str(lvl).unwrap_or(LevelFilter::Off)
    });
    set_max_level(level);

    trace!("Logger is ready");
}

/// Logger that prints messages to console
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.target().starts_with("max32620_lowpower::sim") {
            metadata.level() <= Level::Debug && metadata.level() <= max_level()
        } else {
            metadata.level() <= max_level()
        }
    }

    fn log(&self, record: &Record) {
        /// Modifier for restoring normal text style
        const RESET: &str = "\u{001B}[0m";
        /// Modifier for setting gray text
        const GRAY: &str = "\u{001B}[2m";
        /// Modifier for setting red text
        const RED: &str = "\u{001B}[31m";
        /// Modifier for setting green text
        const GREEN: &str = "\u{001B}[32m";
        /// Modifier for setting yellow text
        const YELLOW: &str = "\u{001B}[33m";
        /// Modifier for setting blue text
        const BLUE: &str = "\u{001B}[34m";
        /// Modifier for setting cyan text
        const CYAN: &str = "\u{001B}[35m";

        let color = match record.level() {
            Level::Error => RED,
            Level::Warn => YELLOW,
            Level::Info => GREEN,
            Level::Debug => BLUE,
            Level::Trace => CYAN,
        };

        if self.enabled(record.metadata()) {
            println!(
                "{}{:>5} {}{}{}{}]{} {}",
                color,
                record.level(),
                RESET,
                GRAY,
                record.target(),
                GRAY,
                RESET,
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
