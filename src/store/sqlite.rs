use super::{FruitState, ReadingStore, StoreError, StoreStats, StoredReading};
use crate::reading::{ColorChannels, DecodedReading, Reading};
use crate::rules::{Classification, Label};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

/// Reading store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE sensor_readings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     reading_id TEXT NOT NULL UNIQUE,   -- UUIDv7
///     fruit_id TEXT NOT NULL,
///     fruit_type TEXT NOT NULL,
///     r INTEGER NOT NULL,
///     g INTEGER NOT NULL,
///     b INTEGER NOT NULL,
///     temperature REAL,
///     humidity REAL,
///     label TEXT NOT NULL,               -- Fresh | Warning | Rotten
///     confidence REAL NOT NULL,
///     observed_at INTEGER NOT NULL       -- Unix epoch milliseconds
/// );
///
/// CREATE TABLE fruits (
///     fruit_id TEXT PRIMARY KEY,
///     fruit_type TEXT NOT NULL,
///     current_label TEXT NOT NULL,
///     last_seen INTEGER NOT NULL
/// );
/// ```
///
/// The connection is behind a Mutex; every write runs inside one transaction
/// so a reading and its fruit status land together or not at all.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates or opens a store at `db_path` (`:memory:` for tests).
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reading_id TEXT NOT NULL UNIQUE,
                fruit_id TEXT NOT NULL,
                fruit_type TEXT NOT NULL,
                r INTEGER NOT NULL,
                g INTEGER NOT NULL,
                b INTEGER NOT NULL,
                temperature REAL,
                humidity REAL,
                label TEXT NOT NULL,
                confidence REAL NOT NULL,
                observed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_readings_fruit ON sensor_readings(fruit_id, id);
            CREATE INDEX IF NOT EXISTS idx_readings_observed ON sensor_readings(observed_at);

            CREATE TABLE IF NOT EXISTS fruits (
                fruit_id TEXT PRIMARY KEY,
                fruit_type TEXT NOT NULL,
                current_label TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            );
            "#,
        )?;

        info!("Reading store ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }
}

const READING_COLUMNS: &str = "id, reading_id, fruit_id, fruit_type, r, g, b, \
                               temperature, humidity, label, confidence, observed_at";

impl ReadingStore for SqliteStore {
    fn append_and_update(
        &self,
        reading: &Reading,
        classification: &Classification,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let channels = reading.channels();
        let observed_at = reading.observed_at().timestamp_millis();

        tx.execute(
            r#"
            INSERT INTO sensor_readings (
                reading_id, fruit_id, fruit_type, r, g, b,
                temperature, humidity, label, confidence, observed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                reading.reading_id().to_string(),
                reading.fruit_id(),
                reading.fruit_type(),
                channels.r,
                channels.g,
                channels.b,
                reading.temperature(),
                reading.humidity(),
                classification.label.as_str(),
                classification.confidence,
                observed_at,
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO fruits (fruit_id, fruit_type, current_label, last_seen)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(fruit_id) DO UPDATE SET
                fruit_type = excluded.fruit_type,
                current_label = excluded.current_label,
                last_seen = excluded.last_seen
            "#,
            params![
                reading.fruit_id(),
                reading.fruit_type(),
                classification.label.as_str(),
                observed_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn latest(&self, fruit_id: Option<&str>) -> Result<Vec<StoredReading>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sensor_readings WHERE id IN ( \
                 SELECT MAX(id) FROM sensor_readings \
                 WHERE (?1 IS NULL OR fruit_id = ?1) GROUP BY fruit_id \
             ) ORDER BY fruit_id",
            READING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![fruit_id], |row| Ok(read_row(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().collect()
    }

    fn history(
        &self,
        fruit_id: Option<&str>,
        since: Duration,
        limit: usize,
    ) -> Result<Vec<StoredReading>, StoreError> {
        // Windows reaching past the earliest representable instant cover everything
        let threshold = Utc::now()
            .checked_sub_signed(since)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .timestamp_millis();
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sensor_readings \
             WHERE observed_at >= ?1 AND (?2 IS NULL OR fruit_id = ?2) \
             ORDER BY observed_at DESC, id DESC LIMIT ?3",
            READING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![threshold, fruit_id, limit as i64], |row| {
                Ok(read_row(row))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().collect()
    }

    fn fruits(&self) -> Result<Vec<FruitState>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fruit_id, fruit_type, current_label, last_seen FROM fruits ORDER BY fruit_id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(read_fruit(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().collect()
    }

    fn fruit(&self, fruit_id: &str) -> Result<Option<FruitState>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT fruit_id, fruit_type, current_label, last_seen FROM fruits WHERE fruit_id = ?1",
                params![fruit_id],
                |row| Ok(read_fruit(row)),
            )
            .optional()?;

        row.transpose()
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;

        let total_readings: i64 =
            conn.query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?;

        let mut stats = StoreStats {
            total_readings: total_readings as u64,
            ..Default::default()
        };

        let mut stmt =
            conn.prepare("SELECT current_label, COUNT(*) FROM fruits GROUP BY current_label")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        for (label, count) in counts {
            let count = count as u64;
            stats.active_fruits += count;
            match parse_label(&label)? {
                Label::Fresh => stats.fresh_count += count,
                Label::Warning => stats.warning_count += count,
                Label::Rotten => stats.rotten_count += count,
            }
        }

        Ok(stats)
    }
}

fn read_row(row: &Row<'_>) -> Result<StoredReading, StoreError> {
    let reading_id: String = row.get(1)?;
    let reading_id = Uuid::parse_str(&reading_id)
        .map_err(|e| StoreError::Corrupt(format!("reading_id '{}': {}", reading_id, e)))?;

    let decoded = DecodedReading {
        fruit_id: row.get(2)?,
        fruit_type: row.get(3)?,
        channels: ColorChannels {
            r: row.get(4)?,
            g: row.get(5)?,
            b: row.get(6)?,
        },
        temperature: row.get(7)?,
        humidity: row.get(8)?,
    };

    let label: String = row.get(9)?;
    let classification = Classification {
        label: parse_label(&label)?,
        confidence: row.get(10)?,
    };

    Ok(StoredReading {
        id: row.get(0)?,
        reading: Reading::from_parts(reading_id, decoded, millis_to_utc(row.get(11)?)?),
        classification,
    })
}

fn read_fruit(row: &Row<'_>) -> Result<FruitState, StoreError> {
    let label: String = row.get(2)?;
    Ok(FruitState {
        fruit_id: row.get(0)?,
        fruit_type: row.get(1)?,
        last_label: parse_label(&label)?,
        last_seen_at: millis_to_utc(row.get(3)?)?,
    })
}

fn parse_label(label: &str) -> Result<Label, StoreError> {
    label.parse().map_err(StoreError::Corrupt)
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::decode;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open(":memory:").expect("Failed to create test store")
    }

    fn reading(fruit_id: &str, fruit_type: &str, r: u8, at: DateTime<Utc>) -> Reading {
        let payload = format!(
            r#"{{"fruitId":"{}","fruitType":"{}","colorSensor":{{"r":{},"g":50,"b":40}},"temperature":21.0}}"#,
            fruit_id, fruit_type, r
        );
        let decoded = decode("sigma.sensors.test", payload.as_bytes()).unwrap();
        Reading::accept(decoded, at)
    }

    fn classified(label: Label) -> Classification {
        Classification {
            label,
            confidence: label.default_confidence(),
        }
    }

    #[test]
    fn test_append_creates_fruit_state() {
        let store = create_test_store();
        let now = Utc::now();
        let r = reading("fruit_1", "apple", 180, now);

        store.append_and_update(&r, &classified(Label::Fresh)).unwrap();

        let fruit = store.fruit("fruit_1").unwrap().expect("fruit not found");
        assert_eq!(fruit.fruit_type, "apple");
        assert_eq!(fruit.last_label, Label::Fresh);
        assert_eq!(fruit.last_seen_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_append_updates_fruit_state_in_place() {
        let store = create_test_store();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);

        store
            .append_and_update(&reading("fruit_1", "apple", 180, t0), &classified(Label::Fresh))
            .unwrap();
        store
            .append_and_update(&reading("fruit_1", "apple", 10, t1), &classified(Label::Rotten))
            .unwrap();

        let fruits = store.fruits().unwrap();
        assert_eq!(fruits.len(), 1);
        assert_eq!(fruits[0].last_label, Label::Rotten);
        assert_eq!(fruits[0].last_seen_at.timestamp_millis(), t1.timestamp_millis());
        assert_eq!(store.stats().unwrap().total_readings, 2);
    }

    #[test]
    fn test_stored_reading_round_trips() {
        let store = create_test_store();
        let r = reading("fruit_1", "apple", 180, Utc::now());
        let c = classified(Label::Fresh);

        store.append_and_update(&r, &c).unwrap();

        let latest = store.latest(Some("fruit_1")).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].classification, c);
        assert_eq!(latest[0].reading.reading_id(), r.reading_id());
        assert_eq!(latest[0].reading.channels(), r.channels());
        assert_eq!(latest[0].reading.temperature(), Some(21.0));
        assert_eq!(latest[0].reading.humidity(), None);
    }

    #[test]
    fn test_latest_returns_one_row_per_fruit() {
        let store = create_test_store();
        let now = Utc::now();

        for (i, id) in ["a", "b", "a", "c", "a"].iter().enumerate() {
            let r = reading(id, "apple", 100 + i as u8, now + Duration::milliseconds(i as i64));
            store.append_and_update(&r, &classified(Label::Warning)).unwrap();
        }

        let latest = store.latest(None).unwrap();
        assert_eq!(latest.len(), 3);
        let a = latest.iter().find(|s| s.reading.fruit_id() == "a").unwrap();
        assert_eq!(a.reading.channels().r, 104);

        assert!(store.latest(Some("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_history_newest_first_with_limit_and_window() {
        let store = create_test_store();
        let now = Utc::now();

        // Outside a 1 hour window
        store
            .append_and_update(
                &reading("fruit_1", "apple", 1, now - Duration::hours(2)),
                &classified(Label::Rotten),
            )
            .unwrap();
        for i in 0..5u8 {
            let r = reading("fruit_1", "apple", 10 + i, now - Duration::minutes(10 - i as i64));
            store.append_and_update(&r, &classified(Label::Rotten)).unwrap();
        }
        store
            .append_and_update(&reading("fruit_2", "apple", 99, now), &classified(Label::Rotten))
            .unwrap();

        let all = store.history(None, Duration::hours(1), 100).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].reading.fruit_id(), "fruit_2");

        let limited = store.history(Some("fruit_1"), Duration::hours(1), 3).unwrap();
        let reds: Vec<u8> = limited.iter().map(|s| s.reading.channels().r).collect();
        assert_eq!(reds, vec![14, 13, 12]);

        let wide = store.history(Some("fruit_1"), Duration::hours(24), 100).unwrap();
        assert_eq!(wide.len(), 6);
    }

    #[test]
    fn test_history_window_beyond_calendar_range_returns_everything() {
        let store = create_test_store();
        let now = Utc::now();

        for days in [0, 400, 4000] {
            store
                .append_and_update(
                    &reading("fruit_1", "apple", 1, now - Duration::days(days)),
                    &classified(Label::Fresh),
                )
                .unwrap();
        }

        let all = store
            .history(Some("fruit_1"), Duration::hours(4_000_000_000), 100)
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_stats_counts_by_label() {
        let store = create_test_store();
        let now = Utc::now();

        let writes = [
            ("a", Label::Fresh),
            ("b", Label::Fresh),
            ("c", Label::Warning),
            ("c", Label::Rotten),
        ];
        for (fruit_id, label) in writes {
            store
                .append_and_update(&reading(fruit_id, "apple", 1, now), &classified(label))
                .unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total_readings: 4,
                active_fruits: 3,
                fresh_count: 2,
                warning_count: 0,
                rotten_count: 1,
            }
        );
    }

    #[test]
    fn test_failed_append_leaves_no_trace() {
        let store = create_test_store();
        let r = reading("fruit_1", "apple", 180, Utc::now());

        store.append_and_update(&r, &classified(Label::Fresh)).unwrap();
        // Same reading_id violates the UNIQUE constraint on the first insert
        let err = store.append_and_update(&r, &classified(Label::Rotten));
        assert!(matches!(err, Err(StoreError::Sqlite(_))));

        assert_eq!(store.stats().unwrap().total_readings, 1);
        assert_eq!(store.fruit("fruit_1").unwrap().unwrap().last_label, Label::Fresh);
    }

    #[test]
    fn test_reopen_file_store_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigma.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let r = reading("fruit_1", "banana", 220, Utc::now());
            store.append_and_update(&r, &classified(Label::Fresh)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.fruits().unwrap().len(), 1);
        assert_eq!(store.latest(None).unwrap()[0].reading.fruit_type(), "banana");
    }
}
