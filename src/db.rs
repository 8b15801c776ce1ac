use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::ScrapeError;
use crate::model::{
    CharacterActivity, CharacterClass, GeneralStats, LadderEntry, LevelSnapshot, WorldStats,
};

/// Where extracted ladder records end up.
pub trait RecordStore: Send + Sync {
    /// Insert, or overwrite every mutable field of the (world, character_id) row.
    fn upsert_ladder_entry(&self, entry: &LadderEntry) -> Result<(), ScrapeError>;

    /// Always appends.
    fn insert_level_snapshot(&self, snapshot: &LevelSnapshot) -> Result<(), ScrapeError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Stats ──

    pub fn insert_general_stats(&self, at: DateTime<Utc>, s: &GeneralStats) -> Result<()> {
        self.conn().execute(
            "INSERT INTO general_stats (captured_at, online, max_online, players, characters, players_24h)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                at.to_rfc3339(), s.online, s.max_online, s.players, s.characters, s.players_24h,
            ],
        )?;
        Ok(())
    }

    pub fn insert_world_stats(&self, at: DateTime<Utc>, rows: &[WorldStats]) -> Result<usize> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO world_stats
                 (captured_at, world, total_characters, load_1min, load_5min, online, max_online, private)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for w in rows {
                count += stmt.execute(rusqlite::params![
                    at.to_rfc3339(), w.world, w.total_characters, w.load_1min, w.load_5min,
                    w.online, w.max_online, w.private,
                ])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn insert_character_activity(
        &self,
        at: DateTime<Utc>,
        rows: &[CharacterActivity],
    ) -> Result<usize> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO character_activity (captured_at, world, nick) VALUES (?1, ?2, ?3)",
            )?;
            for a in rows {
                count += stmt.execute(rusqlite::params![at.to_rfc3339(), a.world, a.nick])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    // ── Lookups ──

    pub fn find_ladder_entry(&self, world: &str, character_id: i64) -> Result<Option<LadderEntry>> {
        let entry = self
            .conn()
            .query_row(
                "SELECT captured_at, world, profile_id, character_id, nick, level, class, honor, last_online
                 FROM ladder_entries WHERE world = ?1 AND character_id = ?2",
                rusqlite::params![world, character_id],
                |row| {
                    Ok(LadderEntry {
                        captured_at: time_column(row, 0)?,
                        world: row.get(1)?,
                        profile_id: row.get(2)?,
                        character_id: row.get(3)?,
                        nick: row.get(4)?,
                        level: row.get(5)?,
                        class: CharacterClass::from_code(&row.get::<_, String>(6)?),
                        honor: row.get(7)?,
                        last_online: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Level snapshots of one character, oldest first.
    pub fn level_history(&self, world: &str, character_id: i64) -> Result<Vec<LevelSnapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT captured_at, world, character_id, level FROM level_snapshots
             WHERE world = ?1 AND character_id = ?2
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![world, character_id], |row| {
                Ok(LevelSnapshot {
                    captured_at: time_column(row, 0)?,
                    world: row.get(1)?,
                    character_id: row.get(2)?,
                    level: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn summary(&self) -> Result<Summary> {
        let conn = self.conn();
        let count = |table: &str| -> Result<usize> {
            let n: usize =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(n)
        };
        Ok(Summary {
            ladder_entries: count("ladder_entries")?,
            level_snapshots: count("level_snapshots")?,
            general_stats: count("general_stats")?,
            world_stats: count("world_stats")?,
            character_activity: count("character_activity")?,
        })
    }
}

impl RecordStore for SqliteStore {
    fn upsert_ladder_entry(&self, e: &LadderEntry) -> Result<(), ScrapeError> {
        self.conn().execute(
            "INSERT INTO ladder_entries
             (world, character_id, profile_id, captured_at, nick, level, class, honor, last_online)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (world, character_id) DO UPDATE SET
                profile_id  = excluded.profile_id,
                captured_at = excluded.captured_at,
                nick        = excluded.nick,
                level       = excluded.level,
                class       = excluded.class,
                honor       = excluded.honor,
                last_online = excluded.last_online",
            rusqlite::params![
                e.world,
                e.character_id,
                e.profile_id,
                e.captured_at.to_rfc3339(),
                e.nick,
                e.level,
                e.class.map(CharacterClass::code).unwrap_or(""),
                e.honor,
                e.last_online,
            ],
        )?;
        Ok(())
    }

    fn insert_level_snapshot(&self, s: &LevelSnapshot) -> Result<(), ScrapeError> {
        self.conn().execute(
            "INSERT INTO level_snapshots (captured_at, world, character_id, level)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![s.captured_at.to_rfc3339(), s.world, s.character_id, s.level],
        )?;
        Ok(())
    }
}

pub struct Summary {
    pub ladder_entries: usize,
    pub level_snapshots: usize,
    pub general_stats: usize,
    pub world_stats: usize,
    pub character_activity: usize,
}

fn time_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ladder_entries (
            world        TEXT NOT NULL,
            character_id INTEGER NOT NULL,
            profile_id   INTEGER NOT NULL,
            captured_at  TEXT NOT NULL,
            nick         TEXT NOT NULL,
            level        INTEGER NOT NULL,
            class        TEXT NOT NULL DEFAULT '',
            honor        INTEGER NOT NULL,
            last_online  TEXT NOT NULL,
            PRIMARY KEY (world, character_id)
        );

        CREATE TABLE IF NOT EXISTS level_snapshots (
            id           INTEGER PRIMARY KEY,
            captured_at  TEXT NOT NULL,
            world        TEXT NOT NULL,
            character_id INTEGER NOT NULL,
            level        INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_level_character ON level_snapshots(world, character_id);

        CREATE TABLE IF NOT EXISTS general_stats (
            id          INTEGER PRIMARY KEY,
            captured_at TEXT NOT NULL,
            online      INTEGER NOT NULL,
            max_online  INTEGER NOT NULL,
            players     INTEGER NOT NULL,
            characters  INTEGER NOT NULL,
            players_24h INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS world_stats (
            id               INTEGER PRIMARY KEY,
            captured_at      TEXT NOT NULL,
            world            TEXT NOT NULL,
            total_characters INTEGER NOT NULL,
            load_1min        INTEGER NOT NULL,
            load_5min        INTEGER NOT NULL,
            online           INTEGER NOT NULL,
            max_online       INTEGER NOT NULL,
            private          BOOLEAN NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS character_activity (
            id          INTEGER PRIMARY KEY,
            captured_at TEXT NOT NULL,
            world       TEXT NOT NULL,
            nick        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_world ON character_activity(world);
        ",
    )?;
    Ok(())
}
