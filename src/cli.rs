use std::{net::SocketAddr, sync::OnceLock};

use clap::Parser;

/// Live container logs over Server-Sent Events.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address the HTTP server binds to.
    #[arg(short, long, env = "DOCKTAIL_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,
    /// Lines requested from the end of each log when neither `tail` nor `since` is given.
    #[arg(long, env = "DOCKTAIL_DEFAULT_TAIL", default_value_t = 200)]
    pub default_tail: u64,
    /// Largest chunk forwarded as a single event. Longer chunks keep only their tail.
    #[arg(long, env = "DOCKTAIL_MAX_CHUNK_BYTES", default_value_t = 64 * 1024)]
    pub max_chunk_bytes: usize,
    /// Comma-separated include patterns used when a request has no `include`.
    #[arg(long, env = "DOCKTAIL_INCLUDE", default_value = "")]
    pub include: String,
    /// Comma-separated exclude patterns used when a request has no `exclude`.
    #[arg(long, env = "DOCKTAIL_EXCLUDE", default_value = "")]
    pub exclude: String,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["docktail"]).expect("defaults should parse");
        assert_eq!(args.default_tail, 200);
        assert_eq!(args.max_chunk_bytes, 65536);
        assert_eq!(args.listen.port(), 3000);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "docktail",
            "--listen",
            "127.0.0.1:8080",
            "--default-tail",
            "50",
            "--include",
            "web, api",
        ])
        .expect("flags should parse");
        assert_eq!(args.default_tail, 50);
        assert_eq!(args.include, "web, api");
        assert_eq!(args.listen.to_string(), "127.0.0.1:8080");
    }
}
