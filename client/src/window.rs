//! Sale-window checks over start/end timestamps (seconds since epoch).

use chrono::{DateTime, Utc};

/// Anything exposing a presale's start and end times.
pub trait SaleWindow {
    fn start_time(&self) -> Option<i64>;
    fn end_time(&self) -> Option<i64>;
}

/// Open iff both bounds are present and positive and `start <= now < end`.
pub fn is_open(start: Option<i64>, end: Option<i64>, now: i64) -> bool {
    match (start, end) {
        (Some(start), Some(end)) if start > 0 && end > 0 => start <= now && now < end,
        _ => false,
    }
}

pub fn validate<W: SaleWindow + ?Sized>(record: &W, now: i64) -> bool {
    let (start, end) = (record.start_time(), record.end_time());
    let open = is_open(start, end, now);
    log::debug!("time validation: now={now} start={start:?} end={end:?} open={open}");
    open
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn describe_closed(now: i64, start: Option<i64>, end: Option<i64>) -> String {
    let bound = |ts: Option<i64>| ts.map(format_timestamp).unwrap_or_else(|| "unset".to_string());
    format!(
        "Presale is not active.\nCurrent time: {}\nStart time: {}\nEnd time: {}",
        format_timestamp(now),
        bound(start),
        bound(end)
    )
}
