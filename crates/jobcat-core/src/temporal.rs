//! Interpretation of the two date notations the job board prints.
//!
//! Relative text ("3시간 전 수정") becomes `now - duration`; partial closing
//! dates ("~08.25(월)") become midnight of that day in the current year. Both
//! are evaluated in Korea Standard Time, which has no daylight saving.

use chrono::{Datelike, FixedOffset, NaiveDate, TimeDelta, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::Timestamp;

/// Default age past which a listing is no longer ingested.
pub const RETENTION_WINDOW_HOURS: i64 = 24;

const KST_OFFSET_SECS: i32 = 9 * 3600;

lazy_static! {
    static ref RELATIVE_REGEX: Regex =
        Regex::new(r"(?P<num>[0-9]+)\s*(?P<unit>분|시간|일)\s*전\s*(?:등록|수정)?").unwrap();
    static ref DEADLINE_REGEX: Regex = Regex::new(r"~\s*(?P<mm>[0-9]{2})\.(?P<dd>[0-9]{2})").unwrap();
}

pub fn reference_offset() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("KST offset is within bounds")
}

pub fn reference_now() -> Timestamp {
    Utc::now().with_timezone(&reference_offset())
}

pub fn parse_relative(text: Option<&str>) -> Option<Timestamp> {
    parse_relative_at(text, reference_now())
}

/// Resolves the first "N분/시간/일 전" in `text` against `now`.
pub fn parse_relative_at(text: Option<&str>, now: Timestamp) -> Option<Timestamp> {
    let caps = RELATIVE_REGEX.captures(text?)?;
    let num: i64 = caps["num"].parse().ok()?;
    let delta = match &caps["unit"] {
        "분" => TimeDelta::try_minutes(num)?,
        "시간" => TimeDelta::try_hours(num)?,
        "일" => TimeDelta::try_days(num)?,
        _ => return None,
    };
    now.checked_sub_signed(delta)
}

pub fn parse_deadline(text: Option<&str>) -> Option<Timestamp> {
    parse_deadline_at(text, reference_now())
}

/// Resolves the first "~MM.DD" in `text` to midnight of that date in the
/// year of `now`. Dates that do not exist in that year yield `None`.
pub fn parse_deadline_at(text: Option<&str>, now: Timestamp) -> Option<Timestamp> {
    let caps = DEADLINE_REGEX.captures(text?)?;
    let month: u32 = caps["mm"].parse().ok()?;
    let day: u32 = caps["dd"].parse().ok()?;
    let offset = reference_offset();
    let year = now.with_timezone(&offset).year();
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(offset)
        .single()
}
