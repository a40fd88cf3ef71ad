//! Device registry persistence.
//!
//! A [`DeviceStore`] owns one sqlite connection behind a mutex, so every
//! operation serializes on it: concurrent reads are safe and conflicting
//! writes to the same device apply in lock order, last writer wins. State
//! updates and their history appends are not transactional: a crash
//! between the two loses the history row, which callers accept.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored state is not valid json: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One registered device. `state` is a loosely-typed JSON object owned by
/// the device's gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub uid: String,
    pub name: String,
    pub model: String,
    pub switchable: bool,
    pub keep_history_state: bool,
    pub state: JsonMap<String, JsonValue>,
}

/// Attributes for a device insert; state always starts empty.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub uid: String,
    pub name: String,
    pub model: String,
    pub switchable: bool,
    pub keep_history_state: bool,
}

/// One archived state, captured after a state update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub device_uid: String,
    pub time: f64,
    pub state: JsonMap<String, JsonValue>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS device (
    uid                TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    model              TEXT NOT NULL,
    switchable         INTEGER NOT NULL,
    keep_history_state INTEGER NOT NULL,
    state              TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS history_state (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    device_uid TEXT NOT NULL,
    time       REAL NOT NULL,
    state      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_state_device ON history_state (device_uid, id);
";

pub struct DeviceStore {
    conn: Mutex<Connection>,
}

impl DeviceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        debug!("device store initialized");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn find_device(&self, uid: &str) -> Result<Option<Device>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT uid, name, model, switchable, keep_history_state, state
             FROM device WHERE uid = ?1",
        )?;
        let row = stmt.query_row(params![uid], DeviceRow::from_row).optional()?;
        row.map(DeviceRow::into_device).transpose()
    }

    pub fn find_all_devices(&self) -> Result<Vec<Device>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT uid, name, model, switchable, keep_history_state, state
             FROM device ORDER BY uid",
        )?;
        let rows = stmt.query_map([], DeviceRow::from_row)?;
        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?.into_device()?);
        }
        Ok(devices)
    }

    /// Insert a device with an empty state. If the uid is already
    /// registered, returns the stored device when `exist_ok` and `None`
    /// (conflict) otherwise.
    pub fn insert_device(
        &self,
        device: &NewDevice,
        exist_ok: bool,
    ) -> Result<Option<Device>, StoreError> {
        if let Some(existing) = self.find_device(&device.uid)? {
            debug!("device \"{}\" exists", device.uid);
            return Ok(if exist_ok { Some(existing) } else { None });
        }

        {
            let conn = self.conn.lock().expect("store mutex poisoned");
            conn.execute(
                "INSERT INTO device (uid, name, model, switchable, keep_history_state, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    device.uid,
                    device.name,
                    device.model,
                    device.switchable,
                    device.keep_history_state,
                    "{}",
                ],
            )?;
        }
        self.find_device(&device.uid)
    }

    /// Update a device's state and return the fresh record, or `None`
    /// when the device is unknown.
    ///
    /// With `replace` the supplied mapping becomes the whole state; without
    /// it the supplied keys overwrite field-wise and other fields stay
    /// untouched. Devices flagged `keep_history_state` get the post-update
    /// state appended to their history.
    pub fn update_device_state(
        &self,
        uid: &str,
        state: &JsonMap<String, JsonValue>,
        replace: bool,
    ) -> Result<Option<Device>, StoreError> {
        let Some(device) = self.find_device(uid)? else {
            return Ok(None);
        };

        let next_state = if replace {
            state.clone()
        } else {
            let mut merged = device.state.clone();
            for (key, value) in state {
                merged.insert(key.clone(), value.clone());
            }
            merged
        };

        {
            let conn = self.conn.lock().expect("store mutex poisoned");
            conn.execute(
                "UPDATE device SET state = ?2 WHERE uid = ?1",
                params![uid, serde_json::to_string(&next_state)?],
            )?;
        }

        if device.keep_history_state {
            self.append_history(uid, &next_state, now_epoch_secs())?;
        }
        self.find_device(uid)
    }

    pub fn append_history(
        &self,
        device_uid: &str,
        state: &JsonMap<String, JsonValue>,
        time: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO history_state (device_uid, time, state) VALUES (?1, ?2, ?3)",
            params![device_uid, time, serde_json::to_string(state)?],
        )?;
        Ok(())
    }

    /// The most recent `count` snapshots for a device, oldest first.
    ///
    /// Ordering follows the append sequence, not the recorded wall-clock
    /// time, so rapid successive updates keep a deterministic order.
    pub fn history_state_list(
        &self,
        device_uid: &str,
        count: usize,
    ) -> Result<Vec<StateSnapshot>, StoreError> {
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT device_uid, time, state FROM history_state
             WHERE device_uid = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![device_uid, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (device_uid, time, state) = row?;
            snapshots.push(StateSnapshot {
                device_uid,
                time,
                state: serde_json::from_str(&state)?,
            });
        }
        snapshots.reverse();
        Ok(snapshots)
    }
}

struct DeviceRow {
    uid: String,
    name: String,
    model: String,
    switchable: bool,
    keep_history_state: bool,
    state: String,
}

impl DeviceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            uid: row.get(0)?,
            name: row.get(1)?,
            model: row.get(2)?,
            switchable: row.get(3)?,
            keep_history_state: row.get(4)?,
            state: row.get(5)?,
        })
    }

    fn into_device(self) -> Result<Device, StoreError> {
        let state = serde_json::from_str(&self.state)?;
        Ok(Device {
            uid: self.uid,
            name: self.name,
            model: self.model,
            switchable: self.switchable,
            keep_history_state: self.keep_history_state,
            state,
        })
    }
}

fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
