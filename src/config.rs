use std::time::Duration;

use crate::cli::Args;

/// Keep-alive comment cadence. Intermediaries drop idle connections well above this.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub const DEFAULT_TAIL_LINES: u64 = 200;
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024;

/// Process-wide settings shared by every log stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStreamConfig {
    pub default_tail: u64,
    pub max_chunk_bytes: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub heartbeat: Duration,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            default_tail: DEFAULT_TAIL_LINES,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            include: Vec::new(),
            exclude: Vec::new(),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

impl From<&Args> for LogStreamConfig {
    fn from(args: &Args) -> Self {
        Self {
            default_tail: args.default_tail,
            max_chunk_bytes: args.max_chunk_bytes,
            include: split_patterns(&args.include),
            exclude: split_patterns(&args.exclude),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_patterns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
