//! Command line parsing.

use std::time::Duration;

use evalq::{BatchMode, ProbeMode};

use crate::error::{HammerError, Result};

pub const USAGE: &str = "\
Usage: evalq-hammer [options]
       evalq-hammer --host-worker [--step-delay-ms <ms>]

Options:
  --mode <mode>              queued, unqueued or interleaved [default: queued]
  --count <n>                Tasks in the batch [default: 3]
  --fanout <n>               Extra tasks per interleaved task [default: 2]
  --step-delay-ms <ms>       Simulated host delay per step [default: 50]
  --probe-interval-ms <ms>   Liveness probe interval (overrides EVALQ_PROBE_INTERVAL_MS)
  --probe <mode>             until-drained, bounded:N or disabled (overrides EVALQ_PROBE_MODE)
  --transport <kind>         inline or pipe [default: inline]
  --timeout-secs <s>         Give up waiting for the batch [default: 60]
  --json                     Print the summary as JSON
  --host-worker              Serve a simulated host over stdin/stdout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Simulated host in this process.
    Inline,
    /// Simulated host in a child process behind a pipe.
    Pipe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub mode: BatchMode,
    pub count: usize,
    pub step_delay: Duration,
    pub probe_interval: Option<Duration>,
    pub probe_mode: Option<ProbeMode>,
    pub transport: Transport,
    pub timeout: Duration,
    pub json: bool,
    pub host_worker: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: BatchMode::Queued,
            count: 3,
            step_delay: Duration::from_millis(50),
            probe_interval: None,
            probe_mode: None,
            transport: Transport::Inline,
            timeout: Duration::from_secs(60),
            json: false,
            host_worker: false,
        }
    }
}

pub fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut mode = "queued".to_string();
    let mut fanout = 2usize;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--mode" => mode = value(args, &mut i, flag)?.to_string(),
            "--count" => options.count = number(args, &mut i, flag)?,
            "--fanout" => fanout = number(args, &mut i, flag)?,
            "--step-delay-ms" => {
                options.step_delay = Duration::from_millis(number(args, &mut i, flag)?)
            }
            "--probe-interval-ms" => {
                let ms: u64 = number(args, &mut i, flag)?;
                if ms == 0 {
                    return Err(HammerError::usage("--probe-interval-ms must be positive"));
                }
                options.probe_interval = Some(Duration::from_millis(ms));
            }
            "--probe" => options.probe_mode = Some(value(args, &mut i, flag)?.parse()?),
            "--transport" => {
                options.transport = match value(args, &mut i, flag)? {
                    "inline" => Transport::Inline,
                    "pipe" => Transport::Pipe,
                    other => {
                        return Err(HammerError::usage(format!(
                            "invalid transport '{other}', expected 'inline' or 'pipe'"
                        )));
                    }
                }
            }
            "--timeout-secs" => {
                options.timeout = Duration::from_secs(number(args, &mut i, flag)?)
            }
            "--json" => options.json = true,
            "--host-worker" => options.host_worker = true,
            "--help" | "-h" => return Err(HammerError::usage("")),
            arg if arg.starts_with('-') => {
                return Err(HammerError::usage(format!("unknown flag: {arg}")));
            }
            arg => return Err(HammerError::usage(format!("unexpected argument: {arg}"))),
        }
        i += 1;
    }

    options.mode = match mode.as_str() {
        "queued" => BatchMode::Queued,
        "unqueued" => BatchMode::Unqueued,
        "interleaved" => BatchMode::Interleaved { fanout },
        other => {
            return Err(HammerError::usage(format!(
                "invalid mode '{other}', expected 'queued', 'unqueued' or 'interleaved'"
            )));
        }
    };

    Ok(options)
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| HammerError::usage(format!("{flag} requires a value")))
}

fn number<T: std::str::FromStr>(args: &[String], i: &mut usize, flag: &str) -> Result<T> {
    let raw = value(args, i, flag)?;
    raw.parse()
        .map_err(|_| HammerError::usage(format!("{flag} expects a number, got '{raw}'")))
}
