use chrono::{Local, NaiveDateTime, SubsecRound};

/// Wall-clock format used for measurements, the audit log and the CLI.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Length of a `TIMESTAMP_FORMAT` string.
pub const TIMESTAMP_LEN: usize = 19;

/// Current local wall-clock time truncated to whole seconds.
pub fn now_seconds() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the leading `YYYY-MM-DD HH:MM:SS` of `raw`; anything after it
/// (milliseconds, a logger suffix) is ignored.
pub fn parse_timestamp_prefix(raw: &str) -> Option<NaiveDateTime> {
    let head = raw.trim_start().get(..TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(head, TIMESTAMP_FORMAT).ok()
}

/// Render `err` and its `source()` chain, one cause per line.
pub fn error_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut out = vec![err.to_string()];
    let mut cur = err.source();
    while let Some(e) = cur {
        out.push(e.to_string());
        cur = e.source();
    }
    out
}
