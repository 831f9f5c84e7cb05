use crate::{note_append, DeviceDirectory, EventStore};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use fornax_core::device::DeviceConfig;
use fornax_core::sample::Sample;
use fornax_core::status::{DeviceStatus, StatusUpdate};
use fornax_core::warning::WarningSettings;

fn parse_status_label(label: &str) -> DeviceStatus {
    match label {
        "Idle" => DeviceStatus::Idle,
        "Active" => DeviceStatus::Active,
        "Disconnected" => DeviceStatus::Disconnected,
        other => {
            eprintln!("Unknown status in DB: {}", other);
            DeviceStatus::Disconnected
        }
    }
}

fn status_label(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Idle => "Idle",
        DeviceStatus::Active => "Active",
        DeviceStatus::Disconnected => "Disconnected",
    }
}

/// SQLite-backed event store and device directory. Samples are stored as
/// JSON payloads keyed by device and stamp; the run partition is a second
/// table so per-run queries never scan the unscoped log.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {:?}", db_path))?;
        Self::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database; used by tests and demos.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_db(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", -4000)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY,
                device TEXT NOT NULL,
                stamp TEXT NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_samples_device_stamp ON samples(device, stamp);
            CREATE TABLE IF NOT EXISTS run_samples (
                id INTEGER PRIMARY KEY,
                device TEXT NOT NULL,
                run_id INTEGER NOT NULL,
                stamp TEXT NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_samples_device_run ON run_samples(device, run_id);
            CREATE TABLE IF NOT EXISTS devices (
                name TEXT PRIMARY KEY,
                config TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS warning_settings (
                device TEXT PRIMARY KEY,
                settings TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS statuses (
                device TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                stamp TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }
}

impl EventStore for SqliteStore {
    fn append(&self, device: &str, sample: &Sample) -> Result<()> {
        let record = serde_json::to_string(sample)?;
        self.lock()
            .execute(
                "INSERT INTO samples (device, stamp, record) VALUES (?1, ?2, ?3)",
                params![device, sample.timestamp, record],
            )
            .with_context(|| format!("Failed to append sample for '{}'", device))?;
        note_append(Utc::now());
        Ok(())
    }

    fn append_to_run(&self, device: &str, run_id: u64, sample: &Sample) -> Result<()> {
        let record = serde_json::to_string(sample)?;
        self.lock()
            .execute(
                "INSERT INTO run_samples (device, run_id, stamp, record) VALUES (?1, ?2, ?3, ?4)",
                params![device, run_id as i64, sample.timestamp, record],
            )
            .with_context(|| format!("Failed to append run sample for '{}' run {}", device, run_id))?;
        Ok(())
    }

    fn max_run_id(&self, device: &str) -> Result<u64> {
        let max: i64 = self.lock().query_row(
            "SELECT COALESCE(MAX(run_id), 0) FROM run_samples WHERE device = ?1",
            params![device],
            |row| row.get(0),
        )?;
        Ok(max.max(0) as u64)
    }

    fn find_by_run(&self, device: &str, run_id: u64) -> Result<Vec<Sample>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT record FROM run_samples WHERE device = ?1 AND run_id = ?2 ORDER BY stamp, id",
        )?;
        let rows = stmt.query_map(params![device, run_id as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut samples = Vec::new();
        for row in rows {
            samples.push(serde_json::from_str(&row?)?);
        }
        Ok(samples)
    }

    fn find_range(
        &self,
        device: &str,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<Sample>> {
        // Stamps are fixed-width, so string comparison is chronological.
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT record FROM samples
             WHERE device = ?1
               AND (?2 IS NULL OR stamp >= ?2)
               AND (?3 IS NULL OR stamp <= ?3)
             ORDER BY stamp, id",
        )?;
        let rows = stmt.query_map(params![device, since, until], |row| {
            row.get::<_, String>(0)
        })?;
        let mut samples = Vec::new();
        for row in rows {
            samples.push(serde_json::from_str(&row?)?);
        }
        Ok(samples)
    }

    fn load_warning_settings(&self, device: &str) -> Result<WarningSettings> {
        let row: Option<String> = self
            .lock()
            .query_row(
                "SELECT settings FROM warning_settings WHERE device = ?1",
                params![device],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(WarningSettings::default()),
        }
    }

    fn save_warning_settings(&self, device: &str, settings: &WarningSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.lock().execute(
            "INSERT INTO warning_settings (device, settings) VALUES (?1, ?2)
             ON CONFLICT(device) DO UPDATE SET settings = excluded.settings",
            params![device, json],
        )?;
        Ok(())
    }

    fn save_status(&self, update: &StatusUpdate) -> Result<()> {
        self.lock().execute(
            "INSERT INTO statuses (device, status, stamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(device) DO UPDATE SET status = excluded.status, stamp = excluded.stamp",
            params![
                update.device_id,
                status_label(update.status),
                update.timestamp
            ],
        )?;
        Ok(())
    }

    fn load_statuses(&self) -> Result<Vec<StatusUpdate>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT device, status, stamp FROM statuses ORDER BY device")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut statuses = Vec::new();
        for row in rows {
            let (device, status, stamp) = row?;
            statuses.push(StatusUpdate {
                device_id: device,
                status: parse_status_label(&status),
                timestamp: stamp,
            });
        }
        Ok(statuses)
    }
}

impl DeviceDirectory for SqliteStore {
    fn get(&self, name: &str) -> Result<Option<DeviceConfig>> {
        let row: Option<String> = self
            .lock()
            .query_row(
                "SELECT config FROM devices WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<DeviceConfig>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT config FROM devices ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut devices = Vec::new();
        for row in rows {
            devices.push(serde_json::from_str(&row?)?);
        }
        Ok(devices)
    }

    fn upsert(&self, config: &DeviceConfig) -> Result<bool> {
        let json = serde_json::to_string(config)?;
        let conn = self.lock();
        let existed: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM devices WHERE name = ?1",
                params![config.name],
                |row| row.get(0),
            )
            .optional()?;
        conn.execute(
            "INSERT INTO devices (name, config) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET config = excluded.config",
            params![config.name, json],
        )?;
        Ok(existed.is_none())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let removed = self
            .lock()
            .execute("DELETE FROM devices WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }
}
