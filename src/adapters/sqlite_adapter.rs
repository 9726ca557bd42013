//! SQLite persistence: universes, append-only snapshots, and the local
//! market data tables (bars, fundamentals, listings) behind
//! [`MarketDataPort`].

use crate::domain::config_validation::DatabaseSettings;
use crate::domain::criteria::ScreeningCriteria;
use crate::domain::error::{FetchError, VantageError};
use crate::domain::fundamentals::FundamentalSnapshot;
use crate::domain::ohlcv::{Interval, OhlcvBar, resample_weekly};
use crate::domain::snapshot::{NewSnapshot, SnapshotRevision, UniverseSnapshot};
use crate::domain::universe::Universe;
use crate::ports::market_data_port::{MarketDataPort, SymbolResults};
use crate::ports::snapshot_port::{SnapshotStore, UniverseRepository};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS universes (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    criteria TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshots (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    universe_id TEXT NOT NULL REFERENCES universes(id) ON DELETE CASCADE,
    snapshot_date TEXT NOT NULL,
    created_at TEXT NOT NULL,
    members TEXT NOT NULL,
    criteria TEXT NOT NULL,
    turnover REAL NOT NULL,
    added TEXT NOT NULL,
    removed TEXT NOT NULL,
    summary TEXT,
    UNIQUE (universe_id, snapshot_date)
);
CREATE INDEX IF NOT EXISTS idx_snapshots_universe_date ON snapshots(universe_id, snapshot_date);

CREATE TRIGGER IF NOT EXISTS snapshots_append_only
BEFORE UPDATE ON snapshots
BEGIN
    SELECT RAISE(ABORT, 'snapshots are append-only');
END;

CREATE TABLE IF NOT EXISTS ohlcv (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_ohlcv_date ON ohlcv(date);

CREATE TABLE IF NOT EXISTS fundamentals (
    symbol TEXT NOT NULL,
    as_of TEXT NOT NULL,
    sector TEXT NOT NULL,
    market_cap REAL,
    pe_ratio REAL,
    dividend_yield REAL,
    revenue_growth REAL,
    avg_dollar_volume REAL,
    quality_score REAL,
    PRIMARY KEY (symbol, as_of)
);

CREATE TABLE IF NOT EXISTS listings (
    symbol TEXT PRIMARY KEY,
    listed_on TEXT NOT NULL,
    delisted_on TEXT
);
";

const SNAPSHOT_COLUMNS: &str = "seq, universe_id, snapshot_date, created_at, members, criteria, \
                                turnover, added, removed, summary";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(column: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<UniverseSnapshot> {
    let summary: Option<String> = row.get(9)?;
    let summary = summary
        .map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(9, e)))
        .transpose()?;
    Ok(UniverseSnapshot {
        seq: row.get(0)?,
        universe_id: row.get(1)?,
        snapshot_date: date_column(row, 2)?,
        created_at: timestamp_column(row, 3)?,
        members: json_column(row, 4)?,
        criteria: json_column(row, 5)?,
        turnover: row.get(6)?,
        added: json_column(row, 7)?,
        removed: json_column(row, 8)?,
        summary,
    })
}

fn universe_from_row(row: &Row<'_>) -> rusqlite::Result<Universe> {
    Ok(Universe {
        id: row.get(0)?,
        owner: row.get(1)?,
        criteria: json_column(row, 2)?,
        created_at: timestamp_column(row, 3)?,
    })
}

fn is_constraint(err: &rusqlite::Error, extended: i32) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.extended_code == extended)
}

impl SqliteAdapter {
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, VantageError> {
        let manager = SqliteConnectionManager::file(&settings.path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(settings.pool_size.max(1))
            .build(manager)?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every pooled connection to
    /// `:memory:` would otherwise be a separate database.
    pub fn in_memory() -> Result<Self, VantageError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, VantageError> {
        Ok(self.pool.get()?)
    }

    pub fn initialize_schema(&self) -> Result<(), VantageError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn insert_bars(&self, bars: &[OhlcvBar]) -> Result<usize, VantageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO ohlcv (symbol, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for bar in bars {
                stmt.execute(params![
                    bar.symbol,
                    format_date(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    pub fn insert_fundamentals(&self, rows: &[FundamentalSnapshot]) -> Result<usize, VantageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO fundamentals (symbol, as_of, sector, market_cap, pe_ratio,
                     dividend_yield, revenue_growth, avg_dollar_volume, quality_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for f in rows {
                stmt.execute(params![
                    f.symbol,
                    format_date(f.as_of),
                    f.sector,
                    f.market_cap,
                    f.pe_ratio,
                    f.dividend_yield,
                    f.revenue_growth,
                    f.avg_dollar_volume,
                    f.quality_score
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Record a listing window. `delisted_on` is exclusive.
    pub fn upsert_listing(
        &self,
        symbol: &str,
        listed_on: NaiveDate,
        delisted_on: Option<NaiveDate>,
    ) -> Result<(), VantageError> {
        self.conn()?.execute(
            "INSERT INTO listings (symbol, listed_on, delisted_on) VALUES (?1, ?2, ?3)
             ON CONFLICT(symbol) DO UPDATE SET listed_on = excluded.listed_on,
                                               delisted_on = excluded.delisted_on",
            params![symbol, format_date(listed_on), delisted_on.map(format_date)],
        )?;
        Ok(())
    }

    fn query_snapshots(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<UniverseSnapshot>, VantageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, snapshot_from_row)?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    fn query_one_snapshot(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<UniverseSnapshot>, VantageError> {
        let conn = self.conn()?;
        Ok(conn.query_row(sql, params, snapshot_from_row).optional()?)
    }
}

impl UniverseRepository for SqliteAdapter {
    fn insert_universe(&self, universe: &Universe) -> Result<(), VantageError> {
        let criteria = serde_json::to_string(&universe.criteria)?;
        let result = self.conn()?.execute(
            "INSERT INTO universes (id, owner, criteria, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                universe.id,
                universe.owner,
                criteria,
                format_timestamp(universe.created_at)
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => Err(
                VantageError::invalid(format!("universe {} already exists", universe.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn get_universe(&self, id: &str) -> Result<Universe, VantageError> {
        self.conn()?
            .query_row(
                "SELECT id, owner, criteria, created_at FROM universes WHERE id = ?1",
                params![id],
                universe_from_row,
            )
            .optional()?
            .ok_or_else(|| VantageError::UniverseNotFound(id.to_string()))
    }

    fn list_universes(&self) -> Result<Vec<Universe>, VantageError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, owner, criteria, created_at FROM universes ORDER BY id")?;
        let rows = stmt.query_map([], universe_from_row)?;
        let mut universes = Vec::new();
        for row in rows {
            universes.push(row?);
        }
        Ok(universes)
    }

    fn update_criteria(&self, id: &str, criteria: &ScreeningCriteria) -> Result<(), VantageError> {
        let updated = self.conn()?.execute(
            "UPDATE universes SET criteria = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(criteria)?],
        )?;
        if updated == 0 {
            return Err(VantageError::UniverseNotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete_universe(&self, id: &str) -> Result<(), VantageError> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM universes WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(VantageError::UniverseNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl SnapshotStore for SqliteAdapter {
    fn insert_snapshot(&self, snapshot: NewSnapshot) -> Result<UniverseSnapshot, VantageError> {
        let conn = self.conn()?;
        let summary = snapshot
            .summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = conn.execute(
            "INSERT INTO snapshots (universe_id, snapshot_date, created_at, members, criteria,
                 turnover, added, removed, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.universe_id,
                format_date(snapshot.snapshot_date),
                format_timestamp(snapshot.created_at),
                serde_json::to_string(&snapshot.members)?,
                serde_json::to_string(&snapshot.criteria)?,
                snapshot.turnover,
                serde_json::to_string(&snapshot.added)?,
                serde_json::to_string(&snapshot.removed)?,
                summary
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                return Err(VantageError::SnapshotExists {
                    universe_id: snapshot.universe_id,
                    date: snapshot.snapshot_date,
                });
            }
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                return Err(VantageError::UniverseNotFound(snapshot.universe_id));
            }
            Err(e) => return Err(e.into()),
        }
        let seq = conn.last_insert_rowid();
        debug!(seq, universe_id = %snapshot.universe_id, date = %snapshot.snapshot_date, "snapshot stored");
        Ok(UniverseSnapshot::from_new(seq, snapshot))
    }

    fn snapshot_exists(&self, universe_id: &str, date: NaiveDate) -> Result<bool, VantageError> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT seq FROM snapshots WHERE universe_id = ?1 AND snapshot_date = ?2",
                params![universe_id, format_date(date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn snapshots_in_range(
        &self,
        universe_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UniverseSnapshot>, VantageError> {
        self.query_snapshots(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                 WHERE universe_id = ?1 AND snapshot_date >= ?2 AND snapshot_date <= ?3
                 ORDER BY snapshot_date ASC"
            ),
            params![universe_id, format_date(start), format_date(end)],
        )
    }

    fn latest_on_or_before(
        &self,
        universe_id: &str,
        date: NaiveDate,
    ) -> Result<Option<UniverseSnapshot>, VantageError> {
        self.query_one_snapshot(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                 WHERE universe_id = ?1 AND snapshot_date <= ?2
                 ORDER BY snapshot_date DESC LIMIT 1"
            ),
            params![universe_id, format_date(date)],
        )
    }

    fn latest_before(
        &self,
        universe_id: &str,
        date: NaiveDate,
    ) -> Result<Option<UniverseSnapshot>, VantageError> {
        self.query_one_snapshot(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                 WHERE universe_id = ?1 AND snapshot_date < ?2
                 ORDER BY snapshot_date DESC LIMIT 1"
            ),
            params![universe_id, format_date(date)],
        )
    }

    fn latest_revision(
        &self,
        universe_id: &str,
        up_to: NaiveDate,
    ) -> Result<Option<SnapshotRevision>, VantageError> {
        let conn = self.conn()?;
        let revision = conn
            .query_row(
                "SELECT seq, created_at FROM snapshots
                 WHERE universe_id = ?1 AND snapshot_date <= ?2
                 ORDER BY seq DESC LIMIT 1",
                params![universe_id, format_date(up_to)],
                |row| {
                    Ok(SnapshotRevision {
                        seq: row.get(0)?,
                        created_at: timestamp_column(row, 1)?,
                    })
                },
            )
            .optional()?;
        Ok(revision)
    }
}

impl MarketDataPort for SqliteAdapter {
    fn fetch_historical(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<SymbolResults<Vec<OhlcvBar>>, VantageError> {
        let conn = self.conn()?;
        let mut bars_stmt = conn.prepare(
            "SELECT symbol, date, open, high, low, close, volume FROM ohlcv
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC",
        )?;
        let mut known_stmt = conn.prepare("SELECT 1 FROM ohlcv WHERE symbol = ?1 LIMIT 1")?;
        let (start_str, end_str) = (format_date(start), format_date(end));

        let mut results = SymbolResults::new();
        for symbol in symbols {
            let rows = bars_stmt.query_map(params![symbol, start_str, end_str], |row| {
                Ok(OhlcvBar {
                    symbol: row.get(0)?,
                    date: date_column(row, 1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })?;
            let mut bars = Vec::new();
            for row in rows {
                bars.push(row?);
            }

            let outcome = if bars.is_empty() && !known_stmt.exists(params![symbol])? {
                Err(FetchError::NotFound)
            } else {
                match interval {
                    Interval::Daily => Ok(bars),
                    Interval::Weekly => Ok(resample_weekly(&bars)),
                }
            };
            results.insert(symbol.clone(), outcome);
        }
        Ok(results)
    }

    fn fetch_fundamentals(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<SymbolResults<FundamentalSnapshot>, VantageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol, as_of, sector, market_cap, pe_ratio, dividend_yield,
                    revenue_growth, avg_dollar_volume, quality_score
             FROM fundamentals WHERE symbol = ?1 AND as_of <= ?2
             ORDER BY as_of DESC LIMIT 1",
        )?;
        let as_of_str = format_date(as_of);

        let mut results = SymbolResults::new();
        for symbol in symbols {
            let row = stmt
                .query_row(params![symbol, as_of_str], |row| {
                    Ok(FundamentalSnapshot {
                        symbol: row.get(0)?,
                        as_of: date_column(row, 1)?,
                        sector: row.get(2)?,
                        market_cap: row.get(3)?,
                        pe_ratio: row.get(4)?,
                        dividend_yield: row.get(5)?,
                        revenue_growth: row.get(6)?,
                        avg_dollar_volume: row.get(7)?,
                        quality_score: row.get(8)?,
                    })
                })
                .optional()?;
            results.insert(symbol.clone(), row.ok_or(FetchError::NotFound));
        }
        Ok(results)
    }

    fn list_population(&self, as_of: NaiveDate) -> Result<Vec<String>, VantageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol FROM listings
             WHERE listed_on <= ?1 AND (delisted_on IS NULL OR delisted_on > ?1)
             ORDER BY symbol",
        )?;
        let rows = stmt.query_map(params![format_date(as_of)], |row| row.get(0))?;
        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::build_members;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 123_456_789).unwrap()
    }

    fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
    }

    fn with_universe(id: &str) -> SqliteAdapter {
        let adapter = adapter();
        let universe = Universe::new(id, "alice", ScreeningCriteria::default(), ts(0)).unwrap();
        adapter.insert_universe(&universe).unwrap();
        adapter
    }

    fn new_snapshot(universe_id: &str, date: &str, symbols: &[&str], created: i64) -> NewSnapshot {
        let owned: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        NewSnapshot {
            universe_id: universe_id.into(),
            snapshot_date: d(date),
            created_at: ts(created),
            members: build_members(&owned, None),
            criteria: ScreeningCriteria::default(),
            turnover: 0.0,
            added: owned.clone(),
            removed: vec![],
            summary: None,
        }
    }

    fn bar(symbol: &str, date: &str, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: symbol.into(),
            date: d(date),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn in_memory_initialization_is_idempotent() {
        let adapter = adapter();
        adapter.initialize_schema().unwrap();
    }

    #[test]
    fn universe_round_trip() {
        let adapter = with_universe("tech");
        let universe = adapter.get_universe("tech").unwrap();
        assert_eq!(universe.owner, "alice");
        assert_eq!(universe.created_at, ts(0));
        assert!(matches!(
            adapter.get_universe("nope"),
            Err(VantageError::UniverseNotFound(_))
        ));
        let dup = Universe::new("tech", "bob", ScreeningCriteria::default(), ts(1)).unwrap();
        assert!(matches!(
            adapter.insert_universe(&dup),
            Err(VantageError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn duplicate_snapshot_is_rejected() {
        let adapter = with_universe("tech");
        adapter
            .insert_snapshot(new_snapshot("tech", "2023-01-01", &["A"], 1))
            .unwrap();
        let second = adapter.insert_snapshot(new_snapshot("tech", "2023-01-01", &["B"], 2));
        assert!(matches!(second, Err(VantageError::SnapshotExists { .. })));
        let stored = adapter.latest_on_or_before("tech", d("2023-01-01")).unwrap().unwrap();
        assert_eq!(stored.members[0].symbol, "A");
    }

    #[test]
    fn snapshot_for_unknown_universe_is_rejected() {
        let adapter = adapter();
        let result = adapter.insert_snapshot(new_snapshot("ghost", "2023-01-01", &["A"], 1));
        assert!(matches!(result, Err(VantageError::UniverseNotFound(_))));
    }

    #[test]
    fn snapshots_cannot_be_updated() {
        let adapter = with_universe("tech");
        adapter
            .insert_snapshot(new_snapshot("tech", "2023-01-01", &["A"], 1))
            .unwrap();
        let conn = adapter.conn().unwrap();
        let result = conn.execute("UPDATE snapshots SET turnover = 1.0", []);
        assert!(result.is_err());
    }

    #[test]
    fn lookups_follow_dates() {
        let adapter = with_universe("tech");
        let jan = adapter
            .insert_snapshot(new_snapshot("tech", "2023-01-01", &["A", "B"], 1))
            .unwrap();
        adapter
            .insert_snapshot(new_snapshot("tech", "2023-02-01", &["A", "C"], 2))
            .unwrap();

        let mid = adapter.latest_on_or_before("tech", d("2023-01-20")).unwrap().unwrap();
        assert_eq!(mid, jan);
        let before = adapter.latest_before("tech", d("2023-02-01")).unwrap().unwrap();
        assert_eq!(before.snapshot_date, d("2023-01-01"));
        assert!(adapter.latest_on_or_before("tech", d("2022-12-31")).unwrap().is_none());

        let range = adapter
            .snapshots_in_range("tech", d("2023-01-01"), d("2023-12-31"))
            .unwrap();
        assert_eq!(range.len(), 2);
        assert!(adapter.snapshot_exists("tech", d("2023-02-01")).unwrap());
        assert!(!adapter.snapshot_exists("tech", d("2023-03-01")).unwrap());
    }

    #[test]
    fn revision_tracks_newest_insert() {
        let adapter = with_universe("tech");
        assert!(adapter.latest_revision("tech", d("2023-12-31")).unwrap().is_none());
        adapter
            .insert_snapshot(new_snapshot("tech", "2023-03-01", &["A"], 1))
            .unwrap();
        // backfilled earlier date inserted later still bumps the revision
        let back = adapter
            .insert_snapshot(new_snapshot("tech", "2023-01-01", &["A"], 2))
            .unwrap();
        let revision = adapter.latest_revision("tech", d("2023-12-31")).unwrap().unwrap();
        assert_eq!(revision.seq, back.seq);
        assert_eq!(revision.created_at, ts(2));
    }

    #[test]
    fn criteria_update_keeps_snapshot_copies() {
        let adapter = with_universe("tech");
        let bank = Universe::new("bank", "bob", ScreeningCriteria::default(), ts(1)).unwrap();
        adapter.insert_universe(&bank).unwrap();
        let before = adapter
            .insert_snapshot(new_snapshot("tech", "2023-01-01", &["A", "B"], 1))
            .unwrap();

        let narrowed = ScreeningCriteria::default().with_max_members(1);
        adapter.update_criteria("tech", &narrowed).unwrap();

        assert_eq!(adapter.get_universe("tech").unwrap().criteria, narrowed);
        let stored = adapter.latest_on_or_before("tech", d("2023-01-01")).unwrap().unwrap();
        assert_eq!(stored.criteria, ScreeningCriteria::default());
        assert_eq!(stored.members, before.members);
        assert_eq!(stored.seq, before.seq);

        let ids: Vec<String> = adapter.list_universes().unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["bank", "tech"]);
        assert!(matches!(
            adapter.update_criteria("ghost", &narrowed),
            Err(VantageError::UniverseNotFound(_))
        ));
    }

    #[test]
    fn delete_cascades_to_snapshots() {
        let adapter = with_universe("tech");
        adapter
            .insert_snapshot(new_snapshot("tech", "2023-01-01", &["A"], 1))
            .unwrap();
        adapter.delete_universe("tech").unwrap();
        assert!(adapter
            .snapshots_in_range("tech", d("2000-01-01"), d("2100-01-01"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn historical_fetch_reports_unknown_symbols() {
        let adapter = adapter();
        adapter
            .insert_bars(&[bar("A", "2024-01-01", 10.0), bar("A", "2024-01-02", 11.0)])
            .unwrap();
        let symbols = vec!["A".to_string(), "ZZZ".to_string()];
        let fetched = adapter
            .fetch_historical(&symbols, d("2024-01-01"), d("2024-01-31"), Interval::Daily)
            .unwrap();
        assert_eq!(fetched["A"].as_ref().unwrap().len(), 2);
        assert_eq!(fetched["ZZZ"], Err(FetchError::NotFound));

        let empty = adapter
            .fetch_historical(&symbols[..1], d("2025-01-01"), d("2025-01-31"), Interval::Daily)
            .unwrap();
        assert!(empty["A"].as_ref().unwrap().is_empty());
    }

    #[test]
    fn weekly_interval_resamples() {
        let adapter = adapter();
        adapter
            .insert_bars(&[
                bar("A", "2024-01-01", 10.0),
                bar("A", "2024-01-05", 12.0),
                bar("A", "2024-01-08", 13.0),
            ])
            .unwrap();
        let fetched = adapter
            .fetch_historical(&["A".to_string()], d("2024-01-01"), d("2024-01-31"), Interval::Weekly)
            .unwrap();
        let weeks = fetched["A"].as_ref().unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].date, d("2024-01-05"));
        assert_eq!(weeks[0].close, 12.0);
    }

    #[test]
    fn fundamentals_are_point_in_time() {
        let adapter = adapter();
        let mut old = FundamentalSnapshot::new("A", d("2023-01-01"), "Tech");
        old.market_cap = Some(1.0e9);
        let mut new = FundamentalSnapshot::new("A", d("2023-06-01"), "Tech");
        new.market_cap = Some(2.0e9);
        adapter.insert_fundamentals(&[old, new]).unwrap();

        let symbols = vec!["A".to_string(), "B".to_string()];
        let march = adapter.fetch_fundamentals(&symbols, d("2023-03-01")).unwrap();
        assert_eq!(march["A"].as_ref().unwrap().market_cap, Some(1.0e9));
        assert_eq!(march["B"], Err(FetchError::NotFound));
        let july = adapter.fetch_fundamentals(&symbols, d("2023-07-01")).unwrap();
        assert_eq!(july["A"].as_ref().unwrap().market_cap, Some(2.0e9));
    }

    #[test]
    fn population_respects_listing_window() {
        let adapter = adapter();
        adapter.upsert_listing("A", d("2020-01-01"), None).unwrap();
        adapter
            .upsert_listing("B", d("2020-01-01"), Some(d("2023-02-01")))
            .unwrap();
        adapter.upsert_listing("C", d("2023-03-01"), None).unwrap();

        assert_eq!(adapter.list_population(d("2023-01-15")).unwrap(), vec!["A", "B"]);
        assert_eq!(adapter.list_population(d("2023-02-01")).unwrap(), vec!["A"]);
        assert_eq!(adapter.list_population(d("2023-03-01")).unwrap(), vec!["A", "C"]);
    }
}
