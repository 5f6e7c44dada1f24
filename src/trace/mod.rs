//! Trace replay: a scripted stand-in for the emulation side.
//!
//! A script is a list of records, one per line:
//!
//! ```text
//! # comments run to the end of the line
//! sym 12 018000          # source line 12 assembled to absolute $018000
//! mapper 4               # iNES mapper of the cartridge
//! bank 0 12              # PRG window 0 ($8000) now shows bank 12; `-` unmaps it
//! reg ppu 3 00           # register 3 of the PPU file now holds $00
//! exec 8000 3            # the instruction at $8000 retired, taking 3 CPU cycles
//! write ppu 2004 7F      # a write of $7F to $2004
//! read cpu 0300 01       # a read of $01 from $0300
//! ```
//!
//! Addresses and values are hex, with an optional `$` or `0x` prefix; everything else is
//! decimal.

use nom_locate::LocatedSpan;
use thiserror::Error;

use crate::plat::{RegisterFile, Target};

pub mod parser;
pub mod runner;

pub use parser::parse_script;
pub use runner::{TraceRunner, TraceState};

/// Input span; the extra field carries the script name for error messages.
pub type Span<'a> = LocatedSpan<&'a str, &'a str>;

/// An error for the trace script parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("syntax error in {} at ({}:{}): {}", .name, .loc.0, .loc.1, .span)]
    Syntax {
        name: String,
        loc: (usize, usize),
        span: String,
    },
}

/// One replayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// Debug info: `sloc` assembled to `absolute`.
    Symbol { sloc: usize, absolute: u32 },
    /// A bank switch; `None` unmaps the window.
    Bank { window: usize, bank: Option<u32> },
    Mapper(u16),
    Register {
        file: RegisterFile,
        index: usize,
        value: u16,
    },
    /// An instruction retired.
    Exec { logical: u16, cycles: u64 },
    Access {
        target: Target,
        address: u16,
        value: u8,
        is_write: bool,
    },
}

/// A [Record] with the script line it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine {
    pub line: u32,
    pub record: Record,
}

/// A parsed script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub lines: Vec<TraceLine>,
}
