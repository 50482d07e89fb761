// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Serial console of the EV kit
//!
//! Characters typed by the user arrive one by one on the receive pin, which
//! also wakes the chip up from LP1. Output is queued on a transmit FIFO
//! that must drain before the chip can sleep deeply.

use core::fmt::Arguments;
use core::fmt::Write as _;

use log::info;
use log::warn;

use heapless::String;

use max32620_lowpower::driver::Busy;
use max32620_lowpower::driver::PrepareForSleep;
use max32620_lowpower::sim::SimChip;
use max32620_lowpower::sim::Stimulus;
use max32620_lowpower::GpioWake;

use crate::random::Jitter;

/// Size of the command line buffer
pub const CMD_LINE_BUF_SIZE: usize = 80;

/// Size of a line of output
const OUTPUT_LINE_SIZE: usize = 128;

/// Backspace character
const BACKSPACE: u8 = 0x08;

/// Control-C character
const CTRL_C: u8 = 0x03;

/// Bytes shifted out of the transmit FIFO between two readiness polls
const TX_DRAIN_PER_POLL: usize = 32;

/// Hardware ticks between two keystrokes, lower bound
const KEYSTROKE_MIN_TICKS: u32 = 200;

/// Hardware ticks between two keystrokes, upper bound
const KEYSTROKE_MAX_TICKS: u32 = 600;

/// Receive pin of the console UART, with a weak pull-up
pub const CONSOLE_RX: GpioWake = GpioWake::new(0, 0);

/// A command entered on the console
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print the list of commands
    Help,

    /// Enable or disable tickless idle
    Tickless(bool),

    /// Print the uptime
    Uptime,

    /// Print the sleep statistics
    Stats,

    /// Anything else
    Unknown(String<CMD_LINE_BUF_SIZE>),
}

impl Command {
    /// Parse a command line, return `None` for an empty line
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        let command = match (name, words.next(), words.next()) {
            ("help", None, None) => Self::Help,
            ("tickless", Some("0"), None) => Self::Tickless(false),
            ("tickless", Some("1"), None) => Self::Tickless(true),
            ("uptime", None, None) => Self::Uptime,
            ("stats", None, None) => Self::Stats,
            _ => Self::Unknown(String::try_from(line).unwrap_or_default()),
        };
        Some(command)
    }
}

/// The console UART
#[derive(Debug)]
pub struct Console {
    /// Characters typed by the user over the whole session
    script: &'static [u8],

    /// Characters received so far
    received: usize,

    /// Command line being edited
    line: String<CMD_LINE_BUF_SIZE>,

    /// Bytes still in the transmit FIFO
    tx_pending: usize,
}

impl Console {
    /// Create a console that will receive a script of characters
    pub const fn new(script: &'static [u8]) -> Self {
        Self {
            script,
            received: 0,
            line: String::new(),
            tx_pending: 0,
        }
    }

    /// Print a line
    pub fn print(&mut self, args: Arguments<'_>) {
        let mut line: String<OUTPUT_LINE_SIZE> = String::new();
        if line.write_fmt(args).is_err() {
            warn!("Console line truncated");
        }
        info!(target: "console", "{line}");
        self.tx_pending = self.tx_pending.saturating_add(line.len() + 2);
    }

    /// Receive the next character, return a command when a line is complete
    pub fn receive(&mut self) -> Option<Command> {
        let byte = *self.script.get(self.received)?;
        self.received += 1;

        match byte {
            BACKSPACE => {
                self.line.pop();
                None
            }
            CTRL_C => {
                self.line.clear();
                self.print(format_args!("^C"));
                None
            }
            b'\r' | b'\n' => {
                let command = Command::parse(&self.line);
                self.line.clear();
                command
            }
            _ => {
                if self.line.push(char::from(byte)).is_err() {
                    warn!("Command line is full, drop {byte:#04x}");
                }
                None
            }
        }
    }
}

impl PrepareForSleep for Console {
    fn prepare_for_sleep(&mut self) -> Result<(), Busy> {
        if self.tx_pending == 0 {
            Ok(())
        } else {
            self.tx_pending = self.tx_pending.saturating_sub(TX_DRAIN_PER_POLL);
            Err(Busy)
        }
    }
}

/// Schedule the keystrokes of a line on the receive pin
///
/// The first keystroke happens `after` hardware ticks from now.
///
/// # Errors
///
/// Returns the first keystroke that could not be scheduled.
pub fn type_line(
    chip: &SimChip,
    jitter: &mut Jitter,
    after: u32,
    line: &[u8],
) -> Result<(), Stimulus> {
    let keystroke = Stimulus::GpioEdge {
        port: CONSOLE_RX.port,
        pin: CONSOLE_RX.pin,
    };

    let mut at = after;
    for _ in line {
        chip.schedule(at, keystroke)?;
        at = at.saturating_add(jitter.between(KEYSTROKE_MIN_TICKS, KEYSTROKE_MAX_TICKS));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive_all(console: &mut Console) -> Vec<Command> {
        let mut commands = Vec::new();
        for _ in 0..console.script.len() {
            if let Some(command) = console.receive() {
                commands.push(command);
            }
        }
        commands
    }

    #[test]
    fn parse_commands() {
        let mut console = Console::new(b"tickless 1\rtickless 0\ruptime\rstats\rhelp\r");
        assert_eq!(
            receive_all(&mut console),
            [
                Command::Tickless(true),
                Command::Tickless(false),
                Command::Uptime,
                Command::Stats,
                Command::Help,
            ]
        );
    }

    #[test]
    fn backspace_and_ctrl_c() {
        let mut console = Console::new(b"upx\x08time\rstat\x03\r");
        assert_eq!(receive_all(&mut console), [Command::Uptime]);
    }

    #[test]
    fn unknown_command() {
        let mut console = Console::new(b"tickless 2\r");
        let expected = Command::Unknown(String::try_from("tickless 2").unwrap());
        assert_eq!(receive_all(&mut console), [expected]);
    }

    #[test]
    fn end_of_script() {
        let mut console = Console::new(b"");
        assert_eq!(console.receive(), None);
    }

    #[test]
    fn transmit_fifo_drains_before_sleep() {
        let mut console = Console::new(b"");
        assert_eq!(console.prepare_for_sleep(), Ok(()));

        console.print(format_args!("Uptime is 0x00007800 (60 seconds)"));
        assert_eq!(console.prepare_for_sleep(), Err(Busy));
        assert_eq!(console.tx_pending, 3);
        assert_eq!(console.prepare_for_sleep(), Err(Busy));
        assert_eq!(console.prepare_for_sleep(), Ok(()));
    }

    #[test]
    fn keystrokes_are_scheduled() {
        let chip = SimChip::new();
        let mut jitter = Jitter::from_seed(7);
        type_line(&chip, &mut jitter, 100, b"stats\r").unwrap();
        assert_eq!(chip.scheduled(), 6);
    }
}
