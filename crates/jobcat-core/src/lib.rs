//! Core domain model for the jobcat listing catalog.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod reconcile;
pub mod sectors;
pub mod temporal;

pub use reconcile::{merge_deadline, merge_last_modified, reconcile, MergeOutcome, MergeReport};
pub use sectors::parse_sectors;
pub use temporal::{
    parse_deadline, parse_deadline_at, parse_relative, parse_relative_at, reference_now,
    reference_offset, RETENTION_WINDOW_HOURS,
};

pub const CRATE_NAME: &str = "jobcat-core";

/// Absolute instant carried with the offset it was derived in.
pub type Timestamp = DateTime<FixedOffset>;

/// One row of a scraped snapshot, before any date interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub listing_id: i64,
    pub title: String,
    pub link: String,
    /// Raw sector cell; a string, a string-encoded list or a native list.
    #[serde(default)]
    pub sector: JsonValue,
    pub company: Option<String>,
    pub location: Option<String>,
    pub career: Option<String>,
    pub education: Option<String>,
    pub start_text: Option<String>,
    pub deadline_text: Option<String>,
}

/// A raw observation with its derived timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedObservation {
    pub raw: RawObservation,
    pub last_modified_at: Option<Timestamp>,
    pub deadline_at: Option<Timestamp>,
}

impl ParsedObservation {
    /// Derives both timestamps relative to `now`.
    ///
    /// The board puts "N시간 전 수정" in the deadline column for most rows and
    /// in the start column for the rest, so the deadline text is tried first.
    /// The closing date ("~08.25(월)") sits in the start column.
    pub fn from_raw(raw: RawObservation, now: Timestamp) -> Self {
        let last_modified_at = parse_relative_at(raw.deadline_text.as_deref(), now)
            .or_else(|| parse_relative_at(raw.start_text.as_deref(), now));
        let deadline_at = parse_deadline_at(raw.start_text.as_deref(), now);
        Self {
            raw,
            last_modified_at,
            deadline_at,
        }
    }

    pub fn listing_id(&self) -> i64 {
        self.raw.listing_id
    }
}

/// Incoming write for one listing, as handed to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingUpsert {
    pub listing_id: i64,
    pub title: String,
    pub link: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub career: Option<String>,
    pub education: Option<String>,
    pub sectors: Vec<String>,
    pub last_modified_at: Option<Timestamp>,
    pub deadline_at: Option<Timestamp>,
    pub start_raw: Option<String>,
    pub deadline_raw: Option<String>,
}

impl From<ParsedObservation> for ListingUpsert {
    fn from(parsed: ParsedObservation) -> Self {
        let ParsedObservation {
            raw,
            last_modified_at,
            deadline_at,
        } = parsed;
        Self {
            listing_id: raw.listing_id,
            sectors: parse_sectors(&raw.sector),
            title: raw.title,
            link: raw.link,
            company: raw.company,
            location: raw.location,
            career: raw.career,
            education: raw.education,
            last_modified_at,
            deadline_at,
            start_raw: raw.start_text,
            deadline_raw: raw.deadline_text,
        }
    }
}

/// Catalog row keyed by listing identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedListing {
    pub listing_id: i64,
    pub title: String,
    pub link: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub career: Option<String>,
    pub education: Option<String>,
    pub sectors: Vec<String>,
    pub last_modified_at: Option<Timestamp>,
    pub deadline_at: Option<Timestamp>,
    pub start_raw: Option<String>,
    pub deadline_raw: Option<String>,
    pub first_seen_at: Timestamp,
    pub last_seen_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> Timestamp {
        reference_offset()
            .with_ymd_and_hms(2026, 8, 20, 15, 0, 0)
            .single()
            .unwrap()
    }

    fn raw(start: Option<&str>, deadline: Option<&str>) -> RawObservation {
        RawObservation {
            listing_id: 51234567,
            title: "백엔드 개발자".into(),
            link: "https://www.saramin.co.kr/zf_user/jobs/relay/view?rec_idx=51234567".into(),
            sector: json!("['서버·백엔드','Java']"),
            company: Some("(주)예시".into()),
            location: Some("서울 강남구".into()),
            career: Some("경력 3년↑".into()),
            education: Some("대졸↑".into()),
            start_text: start.map(str::to_string),
            deadline_text: deadline.map(str::to_string),
        }
    }

    #[test]
    fn deadline_column_relative_text_wins() {
        let parsed = ParsedObservation::from_raw(raw(Some("~08.25(월)"), Some("3시간 전 수정")), now());
        assert_eq!(parsed.last_modified_at, Some(now() - Duration::hours(3)));
        assert_eq!(
            parsed.deadline_at,
            Some(reference_offset().with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn start_column_is_fallback_for_relative_text() {
        let parsed = ParsedObservation::from_raw(raw(Some("2일 전 등록"), Some("상시채용")), now());
        assert_eq!(parsed.last_modified_at, Some(now() - Duration::days(2)));
        assert_eq!(parsed.deadline_at, None);
    }

    #[test]
    fn unparseable_text_leaves_both_timestamps_empty() {
        let parsed = ParsedObservation::from_raw(raw(None, Some("채용시")), now());
        assert_eq!(parsed.last_modified_at, None);
        assert_eq!(parsed.deadline_at, None);
    }

    #[test]
    fn upsert_carries_parsed_sectors_and_raw_text() {
        let parsed = ParsedObservation::from_raw(raw(Some("~09.01"), Some("10분 전 등록")), now());
        let upsert = ListingUpsert::from(parsed);
        assert_eq!(upsert.sectors, vec!["서버·백엔드".to_string(), "Java".to_string()]);
        assert_eq!(upsert.start_raw.as_deref(), Some("~09.01"));
        assert_eq!(upsert.deadline_raw.as_deref(), Some("10분 전 등록"));
        assert_eq!(upsert.last_modified_at, Some(now() - Duration::minutes(10)));
    }
}
