//! Universe and snapshot persistence ports.

use crate::domain::criteria::ScreeningCriteria;
use crate::domain::error::VantageError;
use crate::domain::snapshot::{NewSnapshot, SnapshotRevision, UniverseSnapshot};
use crate::domain::universe::Universe;
use chrono::NaiveDate;

pub trait UniverseRepository: Send + Sync {
    fn insert_universe(&self, universe: &Universe) -> Result<(), VantageError>;

    fn get_universe(&self, id: &str) -> Result<Universe, VantageError>;

    fn list_universes(&self) -> Result<Vec<Universe>, VantageError>;

    /// Replace the current criteria. Existing snapshots keep their own copy.
    fn update_criteria(&self, id: &str, criteria: &ScreeningCriteria) -> Result<(), VantageError>;

    /// Remove a universe together with all of its snapshots.
    fn delete_universe(&self, id: &str) -> Result<(), VantageError>;
}

/// Append-only snapshot storage. There is no update path; a second insert
/// for the same (universe, date) fails with `SnapshotExists`.
pub trait SnapshotStore: Send + Sync {
    fn insert_snapshot(&self, snapshot: NewSnapshot) -> Result<UniverseSnapshot, VantageError>;

    fn snapshot_exists(&self, universe_id: &str, date: NaiveDate) -> Result<bool, VantageError>;

    /// Snapshots dated within `[start, end]`, ordered by date.
    fn snapshots_in_range(
        &self,
        universe_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UniverseSnapshot>, VantageError>;

    /// Latest snapshot dated on or before `date`.
    fn latest_on_or_before(
        &self,
        universe_id: &str,
        date: NaiveDate,
    ) -> Result<Option<UniverseSnapshot>, VantageError>;

    /// Latest snapshot dated strictly before `date`.
    fn latest_before(
        &self,
        universe_id: &str,
        date: NaiveDate,
    ) -> Result<Option<UniverseSnapshot>, VantageError>;

    /// Newest revision among snapshots dated on or before `up_to`.
    fn latest_revision(
        &self,
        universe_id: &str,
        up_to: NaiveDate,
    ) -> Result<Option<SnapshotRevision>, VantageError>;
}
