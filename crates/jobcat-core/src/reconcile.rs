//! Field-level merge policy between a stored listing and a new observation.

use serde::{Deserialize, Serialize};

use crate::{ListingUpsert, PersistedListing, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeReport {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
        }
    }

    pub fn merged(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Keeps the later of two modification times; an absent side never wins.
pub fn merge_last_modified(
    existing: Option<Timestamp>,
    incoming: Option<Timestamp>,
) -> Option<Timestamp> {
    match (existing, incoming) {
        (None, incoming) => incoming,
        (existing, None) => existing,
        (Some(existing), Some(incoming)) if incoming >= existing => Some(incoming),
        (existing, Some(_)) => existing,
    }
}

/// The first closing date ever recorded sticks.
pub fn merge_deadline(existing: Option<Timestamp>, incoming: Option<Timestamp>) -> Option<Timestamp> {
    existing.or(incoming)
}

/// Produces the row to store for `incoming` given what is stored today.
///
/// Descriptive fields and raw text always take the incoming values;
/// `first_seen_at` is only ever set here on insert.
pub fn reconcile(
    existing: Option<PersistedListing>,
    incoming: &ListingUpsert,
    seen_at: Timestamp,
) -> (PersistedListing, MergeOutcome) {
    let (first_seen_at, last_modified_at, deadline_at, outcome) = match existing {
        None => (
            seen_at,
            incoming.last_modified_at,
            incoming.deadline_at,
            MergeOutcome::Inserted,
        ),
        Some(stored) => (
            stored.first_seen_at,
            merge_last_modified(stored.last_modified_at, incoming.last_modified_at),
            merge_deadline(stored.deadline_at, incoming.deadline_at),
            MergeOutcome::Updated,
        ),
    };

    let listing = PersistedListing {
        listing_id: incoming.listing_id,
        title: incoming.title.clone(),
        link: incoming.link.clone(),
        company: incoming.company.clone(),
        location: incoming.location.clone(),
        career: incoming.career.clone(),
        education: incoming.education.clone(),
        sectors: incoming.sectors.clone(),
        last_modified_at,
        deadline_at,
        start_raw: incoming.start_raw.clone(),
        deadline_raw: incoming.deadline_raw.clone(),
        first_seen_at,
        last_seen_at: seen_at,
    };
    (listing, outcome)
}
