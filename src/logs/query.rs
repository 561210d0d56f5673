//! Request parameters of the log stream endpoint.

use crate::config::{LogStreamConfig, split_patterns};

/// Query string as received. Every value stays a raw string so malformed
/// numbers fall back to defaults instead of rejecting the request.
#[derive(Debug, Default, Clone)]
pub struct StreamQuery {
    pub tail: Option<String>,
    pub since: Option<String>,
    pub follow: Option<String>,
    pub timestamps: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
}

/// Builds a query from decoded key/value pairs. The first occurrence of a
/// key wins and unknown keys are ignored.
impl FromIterator<(String, String)> for StreamQuery {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        let mut query = StreamQuery::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "tail" => &mut query.tail,
                "since" => &mut query.since,
                "follow" => &mut query.follow,
                "timestamps" => &mut query.timestamps,
                "include" => &mut query.include,
                "exclude" => &mut query.exclude,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailLines {
    Count(u64),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequestOptions {
    pub follow_logs: bool,
    pub include_timestamps: bool,
    /// Unix seconds.
    pub since_timestamp: Option<i64>,
    pub tail_lines: Option<TailLines>,
}

/// Lower-cased substring patterns selecting which containers to stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilters {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

fn parse_tail(value: Option<&str>) -> Option<TailLines> {
    match value?.trim() {
        "all" => Some(TailLines::All),
        other => other.parse().ok().map(TailLines::Count),
    }
}

fn parse_since(value: Option<&str>) -> Option<i64> {
    value?.trim().parse().ok()
}

/// Only the literal `false` turns a flag off.
fn parse_flag(value: Option<&str>) -> bool {
    value != Some("false")
}

/// Configured defaults apply only when the parameter is absent or empty. A
/// present value that splits into nothing yields no patterns.
fn resolve_patterns(value: Option<&str>, fallback: &[String]) -> Vec<String> {
    let patterns = match value {
        None | Some("") => fallback.to_vec(),
        Some(value) => split_patterns(value),
    };
    patterns.into_iter().map(|p| p.to_lowercase()).collect()
}

impl StreamQuery {
    pub fn resolve(&self, config: &LogStreamConfig) -> (StreamRequestOptions, ContainerFilters) {
        let since_timestamp = parse_since(self.since.as_deref());
        let mut tail_lines = parse_tail(self.tail.as_deref());
        if tail_lines.is_none() && since_timestamp.is_none() {
            tail_lines = Some(TailLines::Count(config.default_tail));
        }

        let options = StreamRequestOptions {
            follow_logs: parse_flag(self.follow.as_deref()),
            include_timestamps: parse_flag(self.timestamps.as_deref()),
            since_timestamp,
            tail_lines,
        };

        let filters = ContainerFilters {
            include_patterns: resolve_patterns(self.include.as_deref(), &config.include),
            exclude_patterns: resolve_patterns(self.exclude.as_deref(), &config.exclude),
        };

        (options, filters)
    }
}
