//! Snapshot creation, lookup and backfill.

use crate::domain::calendar::Frequency;
use crate::domain::criteria::ScreeningCriteria;
use crate::domain::error::VantageError;
use crate::domain::fundamentals::FundamentalSnapshot;
use crate::domain::snapshot::{
    NewSnapshot, SnapshotRevision, SnapshotSummary, UniverseSnapshot, build_members,
    diff_members, rediff, rediff_timeline,
};
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::snapshot_port::{SnapshotStore, UniverseRepository};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_COVERAGE: f64 = 0.8;

type SnapshotKey = (String, NaiveDate);

/// One mutex per (universe, date), created on demand.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<SnapshotKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn get(&self, universe_id: &str, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry((universe_id.to_string(), date))
            .or_default()
            .clone()
    }

    fn release(&self, universe_id: &str, date: NaiveDate) {
        let mut map = self.inner.lock();
        let key = (universe_id.to_string(), date);
        // the registry holds one reference; only drop idle entries
        if map.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(&key);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub created: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
    pub failed: Vec<BackfillFailure>,
}

pub struct SnapshotService {
    universes: Arc<dyn UniverseRepository>,
    store: Arc<dyn SnapshotStore>,
    gateway: Arc<dyn MarketDataPort>,
    min_coverage: f64,
    locks: KeyLocks,
}

impl SnapshotService {
    pub fn new(
        universes: Arc<dyn UniverseRepository>,
        store: Arc<dyn SnapshotStore>,
        gateway: Arc<dyn MarketDataPort>,
    ) -> Self {
        Self {
            universes,
            store,
            gateway,
            min_coverage: DEFAULT_MIN_COVERAGE,
            locks: KeyLocks::default(),
        }
    }

    pub fn with_min_coverage(mut self, min_coverage: f64) -> Self {
        self.min_coverage = min_coverage;
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Screen the population listed on `as_of` and append the result.
    ///
    /// `criteria` overrides the universe's current criteria for this snapshot.
    pub fn create_snapshot(
        &self,
        universe_id: &str,
        as_of: NaiveDate,
        criteria: Option<ScreeningCriteria>,
        created_at: DateTime<Utc>,
    ) -> Result<UniverseSnapshot, VantageError> {
        let universe = self.universes.get_universe(universe_id)?;
        let criteria = criteria.unwrap_or(universe.criteria);
        criteria.validate().map_err(VantageError::invalid)?;

        let lock = self.locks.get(universe_id, as_of);
        let result = {
            let _guard = lock.lock();
            self.screen_and_append(universe_id, as_of, criteria, created_at)
        };
        drop(lock);
        self.locks.release(universe_id, as_of);
        result
    }

    fn screen_and_append(
        &self,
        universe_id: &str,
        as_of: NaiveDate,
        criteria: ScreeningCriteria,
        created_at: DateTime<Utc>,
    ) -> Result<UniverseSnapshot, VantageError> {
        if self.store.snapshot_exists(universe_id, as_of)? {
            return Err(VantageError::SnapshotExists {
                universe_id: universe_id.to_string(),
                date: as_of,
            });
        }

        let population = self.gateway.list_population(as_of)?;
        let fetched = self.gateway.fetch_fundamentals(&population, as_of)?;

        let mut resolved: Vec<FundamentalSnapshot> = Vec::with_capacity(fetched.len());
        for (symbol, outcome) in fetched {
            match outcome {
                Ok(f) => resolved.push(f),
                Err(e) => debug!(universe_id, %as_of, %symbol, error = %e, "fundamentals unavailable"),
            }
        }

        let coverage = if population.is_empty() {
            0.0
        } else {
            resolved.len() as f64 / population.len() as f64
        };
        if population.is_empty() || coverage < self.min_coverage {
            return Err(VantageError::ScreeningDataUnavailable {
                universe_id: universe_id.to_string(),
                date: as_of,
                resolved: resolved.len(),
                population: population.len(),
                required_fraction: self.min_coverage,
            });
        }

        let screened = criteria.screen(&resolved);
        let symbols: Vec<String> = screened.iter().map(|f| f.symbol.clone()).collect();
        let summary = summarize(&screened);

        let previous = self.store.latest_before(universe_id, as_of)?;
        let members = build_members(&symbols, previous.as_ref());
        let (added, removed, turnover) = match &previous {
            Some(prev) => {
                let diff = diff_members(
                    prev.members.iter().map(|m| m.symbol.as_str()),
                    members.iter().map(|m| m.symbol.as_str()),
                );
                (diff.added, diff.removed, diff.turnover)
            }
            None => (
                members.iter().map(|m| m.symbol.clone()).collect(),
                Vec::new(),
                0.0,
            ),
        };

        let snapshot = self.store.insert_snapshot(NewSnapshot {
            universe_id: universe_id.to_string(),
            snapshot_date: as_of,
            created_at,
            members,
            criteria,
            turnover,
            added,
            removed,
            summary: Some(summary),
        })?;

        info!(
            universe_id,
            date = %as_of,
            seq = snapshot.seq,
            members = snapshot.members.len(),
            population = population.len(),
            turnover = snapshot.turnover,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Composition in force on `date`.
    pub fn composition_at(
        &self,
        universe_id: &str,
        date: NaiveDate,
    ) -> Result<UniverseSnapshot, VantageError> {
        self.universes.get_universe(universe_id)?;
        let mut snapshot = self
            .store
            .latest_on_or_before(universe_id, date)?
            .ok_or_else(|| VantageError::NoSnapshotAvailable {
                universe_id: universe_id.to_string(),
                date,
            })?;
        let previous = self
            .store
            .latest_before(universe_id, snapshot.snapshot_date)?;
        rediff(&mut snapshot, previous.as_ref());
        Ok(snapshot)
    }

    /// Snapshots affecting `[start, end]`: the one in force at `start` plus
    /// every later one dated up to `end`, in date order.
    pub fn timeline(
        &self,
        universe_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UniverseSnapshot>, VantageError> {
        if start > end {
            return Err(VantageError::invalid(format!(
                "start {start} is after end {end}"
            )));
        }
        self.universes.get_universe(universe_id)?;
        load_timeline(self.store.as_ref(), universe_id, start, end)
    }

    /// Generate snapshots at each period start of `frequency` in `[start, end]`
    /// using the universe's current criteria.
    pub fn backfill(
        &self,
        universe_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        frequency: Frequency,
        created_at: DateTime<Utc>,
    ) -> Result<BackfillReport, VantageError> {
        if start > end {
            return Err(VantageError::invalid(format!(
                "start {start} is after end {end}"
            )));
        }
        let universe = self.universes.get_universe(universe_id)?;
        warn!(
            universe_id,
            %start,
            %end,
            %frequency,
            "backfill applies the current criteria to past dates; historical criteria are not reconstructed"
        );

        let mut report = BackfillReport::default();
        for date in frequency.schedule(start, end) {
            if self.store.snapshot_exists(universe_id, date)? {
                report.skipped.push(date);
                continue;
            }
            match self.create_snapshot(
                universe_id,
                date,
                Some(universe.criteria.clone()),
                created_at,
            ) {
                Ok(snapshot) => report.created.push(snapshot.snapshot_date),
                Err(VantageError::SnapshotExists { .. }) => report.skipped.push(date),
                Err(e @ VantageError::ScreeningDataUnavailable { .. }) => {
                    warn!(universe_id, %date, error = %e, "backfill date failed");
                    report.failed.push(BackfillFailure {
                        date,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            universe_id,
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "backfill finished"
        );
        Ok(report)
    }

    pub fn latest_revision(
        &self,
        universe_id: &str,
        up_to: NaiveDate,
    ) -> Result<Option<SnapshotRevision>, VantageError> {
        self.store.latest_revision(universe_id, up_to)
    }
}

/// The snapshot in force at `start` (if dated earlier) followed by every
/// snapshot dated within `[start, end]`. Diffs are derived from the current
/// date order rather than read back from the store.
pub fn load_timeline(
    store: &dyn SnapshotStore,
    universe_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<UniverseSnapshot>, VantageError> {
    let mut timeline = Vec::new();
    if let Some(in_force) = store.latest_on_or_before(universe_id, start)? {
        if in_force.snapshot_date < start {
            timeline.push(in_force);
        }
    }
    timeline.extend(store.snapshots_in_range(universe_id, start, end)?);
    if let Some(first) = timeline.first() {
        let predecessor = store.latest_before(universe_id, first.snapshot_date)?;
        rediff_timeline(&mut timeline, predecessor.as_ref());
    }
    Ok(timeline)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn summarize(members: &[&FundamentalSnapshot]) -> SnapshotSummary {
    SnapshotSummary {
        member_count: members.len(),
        mean_market_cap: mean(members.iter().filter_map(|f| f.market_cap)),
        mean_quality_score: mean(members.iter().filter_map(|f| f.quality_score)),
    }
}
