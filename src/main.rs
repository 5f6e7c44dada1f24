use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nesdbg::{
    dbg::DebuggerConfig,
    repl::Console,
    trace::{parse_script, TraceRunner},
};

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: simplelog::LevelFilter = simplelog::LevelFilter::Trace;
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: simplelog::LevelFilter = simplelog::LevelFilter::Info;

/// Replays an NES execution trace under the debugger.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Trace script to replay.
    trace: PathBuf,
    /// Replay pacing in records per second; 0 replays as fast as possible.
    #[arg(long, default_value_t = 0.0)]
    clock_hz: f64,
    /// Breakpoint table capacity.
    #[arg(long, default_value_t = 32)]
    breakpoints: usize,
    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<simplelog::LevelFilter>,
    /// Source line to break on before the replay starts. May be repeated.
    #[arg(long = "break-at")]
    break_at: Vec<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    simplelog::TermLogger::init(
        args.log_level.unwrap_or(DEFAULT_LOG_LEVEL),
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let src = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("reading {}", args.trace.display()))?;
    let script = parse_script(&src, &args.trace.display().to_string())?;
    let config = DebuggerConfig {
        breakpoint_capacity: args.breakpoints,
        ..Default::default()
    };
    let mut runner = TraceRunner::new(script, &config, args.clock_hz)?;
    runner.power_on()?;
    for sloc in args.break_at {
        if let Err(e) = runner.debugger_mut().break_at_line(sloc) {
            log::warn!("no breakpoint on line {}: {}", sloc, e);
        }
    }
    Console::new(&mut runner).run()
}
