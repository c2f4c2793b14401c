//! CSV snapshot reader for scraped job-board feeds.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use jobcat_core::RawObservation;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "jobcat-feed";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("snapshot is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("snapshot line {line}: {reason}")]
    InvalidRow { line: u64, reason: String },
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// A logical column and the header names the scraper has used for it.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl ColumnSpec {
    fn matches(&self, header: &str) -> bool {
        let header = header.trim_start_matches('\u{feff}').trim();
        header == self.name || self.aliases.contains(&header)
    }
}

const COLUMN_COUNT: usize = 10;

const LISTING_ID: usize = 0;
const TITLE: usize = 1;
const LINK: usize = 2;
const SECTOR: usize = 3;
const COMPANY: usize = 4;
const LOCATION: usize = 5;
const CAREER: usize = 6;
const EDUCATION: usize = 7;
const START_TEXT: usize = 8;
const DEADLINE_TEXT: usize = 9;

pub const REQUIRED_COLUMNS: [ColumnSpec; COLUMN_COUNT] = [
    ColumnSpec { name: "job_id", aliases: &[] },
    ColumnSpec { name: "job_title", aliases: &[] },
    ColumnSpec { name: "job_link", aliases: &[] },
    ColumnSpec { name: "job_sector", aliases: &[] },
    ColumnSpec { name: "company", aliases: &["comp_name"] },
    ColumnSpec { name: "work_place", aliases: &[] },
    ColumnSpec { name: "career", aliases: &[] },
    ColumnSpec { name: "education", aliases: &[] },
    ColumnSpec { name: "start_text", aliases: &["start_date"] },
    ColumnSpec { name: "deadline_text", aliases: &["deadline"] },
];

/// Header positions of every required column.
#[derive(Debug, Clone)]
struct ColumnIndex([usize; COLUMN_COUNT]);

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self, FeedError> {
        let mut positions = [0usize; COLUMN_COUNT];
        let mut missing = Vec::new();
        for (slot, spec) in REQUIRED_COLUMNS.iter().enumerate() {
            match headers.iter().position(|h| spec.matches(h)) {
                Some(pos) => positions[slot] = pos,
                None => missing.push(spec.name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(FeedError::MissingColumns(missing));
        }
        Ok(Self(positions))
    }

    fn cell<'r>(&self, record: &'r StringRecord, slot: usize) -> Option<&'r str> {
        record
            .get(self.0[slot])
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn owned(&self, record: &StringRecord, slot: usize) -> Option<String> {
        self.cell(record, slot).map(str::to_string)
    }

    fn observation(&self, record: &StringRecord, line: u64) -> Result<RawObservation, FeedError> {
        let invalid = |reason: String| FeedError::InvalidRow { line, reason };

        let id_text = self
            .cell(record, LISTING_ID)
            .ok_or_else(|| invalid("job_id is empty".to_string()))?;
        let listing_id = id_text
            .parse::<i64>()
            .map_err(|_| invalid(format!("job_id {id_text:?} is not an integer")))?;
        let title = self
            .owned(record, TITLE)
            .ok_or_else(|| invalid(format!("job_title is empty for job_id {listing_id}")))?;
        let link = self
            .owned(record, LINK)
            .ok_or_else(|| invalid(format!("job_link is empty for job_id {listing_id}")))?;

        Ok(RawObservation {
            listing_id,
            title,
            link,
            sector: self
                .owned(record, SECTOR)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
            company: self.owned(record, COMPANY),
            location: self.owned(record, LOCATION),
            career: self.owned(record, CAREER),
            education: self.owned(record, EDUCATION),
            start_text: self.owned(record, START_TEXT),
            deadline_text: self.owned(record, DEADLINE_TEXT),
        })
    }
}

/// Reads every row of the snapshot at `path`.
///
/// The header is checked against [`REQUIRED_COLUMNS`] before any row is
/// looked at.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Vec<RawObservation>, FeedError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FeedError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_snapshot_from(BufReader::new(file))
}

pub fn read_snapshot_from<R: Read>(reader: R) -> Result<Vec<RawObservation>, FeedError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let columns = ColumnIndex::resolve(&headers)?;

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        rows.push(columns.observation(&record, line)?);
    }
    debug!(rows = rows.len(), "read snapshot rows");
    Ok(rows)
}
