//! Immutable point-in-time universe compositions.
//!
//! Snapshots for one universe are keyed by (universe, date). Lookups use
//! last-snapshot-on-or-before semantics: a composition stays in force until
//! a later-dated snapshot supersedes it.

use crate::domain::criteria::ScreeningCriteria;
use crate::domain::error::VantageError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonAdded {
    /// Member of the first snapshot of its universe.
    InitialScreen,
    /// Newly admitted relative to the preceding snapshot.
    AddedByScreen,
    /// Carried over from the preceding snapshot.
    Retained,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMember {
    pub symbol: String,
    pub weight: f64,
    pub reason: ReasonAdded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub member_count: usize,
    pub mean_market_cap: Option<f64>,
    pub mean_quality_score: Option<f64>,
}

/// Snapshot content before the store assigns it a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub universe_id: String,
    pub snapshot_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub members: Vec<SnapshotMember>,
    pub criteria: ScreeningCriteria,
    pub turnover: f64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub summary: Option<SnapshotSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub seq: i64,
    pub universe_id: String,
    pub snapshot_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub members: Vec<SnapshotMember>,
    pub criteria: ScreeningCriteria,
    pub turnover: f64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub summary: Option<SnapshotSummary>,
}

impl UniverseSnapshot {
    pub fn from_new(seq: i64, new: NewSnapshot) -> Self {
        Self {
            seq,
            universe_id: new.universe_id,
            snapshot_date: new.snapshot_date,
            created_at: new.created_at,
            members: new.members,
            criteria: new.criteria,
            turnover: new.turnover,
            added: new.added,
            removed: new.removed,
            summary: new.summary,
        }
    }

    pub fn symbols(&self) -> BTreeSet<&str> {
        self.members.iter().map(|m| m.symbol.as_str()).collect()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.members.iter().any(|m| m.symbol == symbol)
    }

    pub fn weight_of(&self, symbol: &str) -> Option<f64> {
        self.members
            .iter()
            .find(|m| m.symbol == symbol)
            .map(|m| m.weight)
    }
}

/// Identifies the newest snapshot that can affect a date range. Cached
/// datasets embed it in their key, so a newly appended snapshot changes the
/// key and makes older entries unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotRevision {
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub turnover: f64,
}

/// Diff two member sets: `turnover = |added ∪ removed| / |previous ∪ current|`.
/// Empty on both sides yields zero turnover.
pub fn diff_members<'a, I, J>(previous: I, current: J) -> MembershipDiff
where
    I: IntoIterator<Item = &'a str>,
    J: IntoIterator<Item = &'a str>,
{
    let prev: BTreeSet<&str> = previous.into_iter().collect();
    let curr: BTreeSet<&str> = current.into_iter().collect();

    let added: Vec<String> = curr.difference(&prev).map(|s| s.to_string()).collect();
    let removed: Vec<String> = prev.difference(&curr).map(|s| s.to_string()).collect();
    let union = prev.union(&curr).count();

    let turnover = if union == 0 {
        0.0
    } else {
        (added.len() + removed.len()) as f64 / union as f64
    };

    MembershipDiff {
        added,
        removed,
        turnover,
    }
}

/// Build member records with equal inclusion weights, tagging each by how it
/// entered relative to `previous`.
pub fn build_members(symbols: &[String], previous: Option<&UniverseSnapshot>) -> Vec<SnapshotMember> {
    let mut sorted: Vec<&String> = symbols.iter().collect();
    sorted.sort();
    sorted.dedup();
    let weight = if sorted.is_empty() {
        0.0
    } else {
        1.0 / sorted.len() as f64
    };

    sorted
        .into_iter()
        .map(|symbol| {
            let reason = match previous {
                None => ReasonAdded::InitialScreen,
                Some(prev) if prev.contains(symbol) => ReasonAdded::Retained,
                Some(_) => ReasonAdded::AddedByScreen,
            };
            SnapshotMember {
                symbol: symbol.clone(),
                weight,
                reason,
            }
        })
        .collect()
}

/// Re-derive the membership diff and member reasons of `snapshot` against
/// the snapshot that now precedes it. Stored diffs are fixed at insert time,
/// so a back-dated insert can leave them pointing at the wrong predecessor.
pub fn rediff(snapshot: &mut UniverseSnapshot, previous: Option<&UniverseSnapshot>) {
    let diff = match previous {
        Some(prev) => diff_members(prev.symbols(), snapshot.symbols()),
        None => MembershipDiff {
            added: snapshot.members.iter().map(|m| m.symbol.clone()).collect(),
            removed: Vec::new(),
            turnover: 0.0,
        },
    };
    for member in &mut snapshot.members {
        member.reason = match previous {
            None => ReasonAdded::InitialScreen,
            Some(prev) if prev.contains(&member.symbol) => ReasonAdded::Retained,
            Some(_) => ReasonAdded::AddedByScreen,
        };
    }
    snapshot.added = diff.added;
    snapshot.removed = diff.removed;
    snapshot.turnover = diff.turnover;
}

/// Apply [`rediff`] along a date-ordered timeline whose first entry is
/// preceded by `predecessor`.
pub fn rediff_timeline(timeline: &mut [UniverseSnapshot], predecessor: Option<&UniverseSnapshot>) {
    let mut previous = predecessor.cloned();
    for snapshot in timeline.iter_mut() {
        rediff(snapshot, previous.as_ref());
        previous = Some(snapshot.clone());
    }
}

/// Latest snapshot with `snapshot_date <= date` from a date-ordered timeline.
pub fn composition_at<'a>(
    timeline: &'a [UniverseSnapshot],
    universe_id: &str,
    date: NaiveDate,
) -> Result<&'a UniverseSnapshot, VantageError> {
    let idx = timeline.partition_point(|s| s.snapshot_date <= date);
    idx.checked_sub(1)
        .map(|i| &timeline[i])
        .ok_or_else(|| VantageError::NoSnapshotAvailable {
            universe_id: universe_id.to_string(),
            date,
        })
}

/// Newest revision among snapshots.
pub fn latest_revision(timeline: &[UniverseSnapshot]) -> Option<SnapshotRevision> {
    timeline
        .iter()
        .map(|s| SnapshotRevision {
            seq: s.seq,
            created_at: s.created_at,
        })
        .max()
}
