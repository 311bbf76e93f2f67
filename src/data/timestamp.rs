use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;

/// Matches camera file names such as `testing_2017_06_08-12_19_44_091_cam_bot.png`.
pub const DEFAULT_TIMESTAMP_PATTERN: &str = r".*(?P<year>\w{4})_(?P<month>\w{2})_(?P<day>\w{2})-(?P<hour>\w{2})_(?P<minute>\w{2})_(?P<second>\w{2})_(?P<millisecond>\w{3})";

lazy_static! {
    static ref DEFAULT_RE: Regex =
        Regex::new(DEFAULT_TIMESTAMP_PATTERN).expect("default timestamp pattern is valid");
}

const FIELDS: [&str; 7] = ["year", "month", "day", "hour", "minute", "second", "millisecond"];

/// Extracts a timestamp from `text` using a regex whose named groups are
/// `year`, `month`, `day`, `hour`, `minute`, `second` and `millisecond`.
///
/// The pattern is anchored at the start of `text`.
pub fn parse_timestamp(pattern: &str, text: &str) -> crate::Result<NaiveDateTime> {
    let re = Regex::new(&format!("^(?:{})", pattern))
        .with_context(|| format!("invalid timestamp pattern `{}`", pattern))?;
    parse_with(&re, text)
}

/// [`parse_timestamp`] with [`DEFAULT_TIMESTAMP_PATTERN`].
pub fn parse_default_timestamp(text: &str) -> crate::Result<NaiveDateTime> {
    parse_with(&DEFAULT_RE, text)
}

fn parse_with(re: &Regex, text: &str) -> crate::Result<NaiveDateTime> {
    let captures = re
        .captures(text)
        .filter(|c| c.get(0).map_or(false, |m| m.start() == 0))
        .ok_or_else(|| anyhow!("`{}` does not match the timestamp pattern", text))?;

    let mut values = [0u32; 7];
    for (value, field) in values.iter_mut().zip(FIELDS) {
        let raw = captures
            .name(field)
            .ok_or_else(|| anyhow!("timestamp pattern has no `{}` group", field))?
            .as_str();
        *value = raw
            .parse()
            .with_context(|| format!("`{}` is not a valid {}", raw, field))?;
    }
    let [year, month, day, hour, minute, second, millisecond] = values;

    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, millisecond))
        .ok_or_else(|| anyhow!("`{}` holds an invalid date or time", text))
}
