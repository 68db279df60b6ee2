//! Sleeve state persistence.
//!
//! Option sleeve records are the only durable state. Each record is a JSON
//! blob keyed by `(environment, account_key, sleeve)`:
//! - `JsonFileSleeveStore`: one file per sleeve under a directory
//! - `SqliteSleeveStore`: one row per sleeve, written in a transaction
//! - `MemorySleeveStore`: in-process, for simulation and tests

use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, StateStoreConfig};
use crate::strategy::options::{OptionSleeveState, SleeveKind};

/// Errors from sleeve state persistence.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error reading/writing a state file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored blob exists but does not parse.
    #[error("corrupt sleeve record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Identifies one account's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub environment: String,
    pub account_key: String,
}

impl StoreKey {
    pub fn new(environment: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            account_key: account_key.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.environment, &config.account_key)
    }

    fn describe(&self, sleeve: SleeveKind) -> String {
        format!("{}/{}/{}", self.environment, self.account_key, sleeve)
    }
}

/// Key-value store for per-sleeve records.
pub trait SleeveStateStore: Send + Sync {
    /// Stored record, `None` when nothing was ever written.
    fn get(&self, key: &StoreKey, sleeve: SleeveKind) -> Result<Option<OptionSleeveState>, StoreError>;

    fn put(&self, key: &StoreKey, sleeve: SleeveKind, state: &OptionSleeveState) -> Result<(), StoreError>;
}

/// Load a record, falling back to INACTIVE when it is missing or corrupt.
///
/// IO and database errors still propagate.
pub fn load_or_default(
    store: &dyn SleeveStateStore,
    key: &StoreKey,
    sleeve: SleeveKind,
) -> Result<OptionSleeveState, StoreError> {
    match store.get(key, sleeve) {
        Ok(Some(state)) => Ok(state),
        Ok(None) => {
            debug!(key = %key.describe(sleeve), "No sleeve record, starting INACTIVE");
            Ok(OptionSleeveState::default())
        }
        Err(StoreError::Corrupt { key, reason }) => {
            warn!(%key, %reason, "Corrupt sleeve record, starting INACTIVE");
            Ok(OptionSleeveState::default())
        }
        Err(e) => Err(e),
    }
}

/// Open the backend named in configuration.
pub fn open_store(config: &Config) -> anyhow::Result<Box<dyn SleeveStateStore>> {
    let store: Box<dyn SleeveStateStore> = match &config.state_store {
        StateStoreConfig::Json { dir } => Box::new(JsonFileSleeveStore::new(dir)),
        StateStoreConfig::Sqlite { path } => {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            Box::new(SqliteSleeveStore::new(path)?)
        }
    };
    Ok(store)
}

fn parse_blob(key: &StoreKey, sleeve: SleeveKind, raw: &str) -> Result<OptionSleeveState, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.describe(sleeve),
        reason: e.to_string(),
    })
}

// =============================================================================
// JSON files
// =============================================================================

/// One pretty-printed JSON file per sleeve at `dir/env/account/sleeve.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSleeveStore {
    dir: PathBuf,
}

impl JsonFileSleeveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &StoreKey, sleeve: SleeveKind) -> PathBuf {
        self.dir
            .join(&key.environment)
            .join(&key.account_key)
            .join(format!("{}.json", sleeve))
    }
}

impl SleeveStateStore for JsonFileSleeveStore {
    fn get(&self, key: &StoreKey, sleeve: SleeveKind) -> Result<Option<OptionSleeveState>, StoreError> {
        let path = self.path_for(key, sleeve);
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&path)?);
        let state = serde_json::from_reader(reader).map_err(|e| StoreError::Corrupt {
            key: key.describe(sleeve),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded sleeve record");
        Ok(Some(state))
    }

    fn put(&self, key: &StoreKey, sleeve: SleeveKind, state: &OptionSleeveState) -> Result<(), StoreError> {
        let path = self.path_for(key, sleeve);
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write beside the target, then rename over it
        let tmp = path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(writer, state)?;
        }
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), status = ?state.status, "Saved sleeve record");
        Ok(())
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed store; each put is an upsert inside a transaction.
pub struct SqliteSleeveStore {
    conn: Mutex<Connection>,
}

impl SqliteSleeveStore {
    /// Open (or create) the database and its schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Sleeve state store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sleeve_state (
                environment TEXT NOT NULL,
                account_key TEXT NOT NULL,
                sleeve TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (environment, account_key, sleeve)
            );
            "#,
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn put_raw(&self, key: &StoreKey, sleeve: SleeveKind, raw: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sleeve_state VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.environment,
                key.account_key,
                sleeve.to_string(),
                raw,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

impl SleeveStateStore for SqliteSleeveStore {
    fn get(&self, key: &StoreKey, sleeve: SleeveKind) -> Result<Option<OptionSleeveState>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                r#"
                SELECT state_json FROM sleeve_state
                WHERE environment = ?1 AND account_key = ?2 AND sleeve = ?3
                "#,
                params![key.environment, key.account_key, sleeve.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| parse_blob(key, sleeve, &raw)).transpose()
    }

    fn put(&self, key: &StoreKey, sleeve: SleeveKind, state: &OptionSleeveState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO sleeve_state (environment, account_key, sleeve, state_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(environment, account_key, sleeve) DO UPDATE SET
                state_json = ?4,
                updated_at = ?5
            "#,
            params![
                key.environment,
                key.account_key,
                sleeve.to_string(),
                json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        debug!(key = %key.describe(sleeve), status = ?state.status, "Saved sleeve record");
        Ok(())
    }
}

// =============================================================================
// Memory
// =============================================================================

#[derive(Debug, Default)]
pub struct MemorySleeveStore {
    records: Mutex<HashMap<(StoreKey, SleeveKind), OptionSleeveState>>,
}

impl MemorySleeveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SleeveStateStore for MemorySleeveStore {
    fn get(&self, key: &StoreKey, sleeve: SleeveKind) -> Result<Option<OptionSleeveState>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.get(&(key.clone(), sleeve)).cloned())
    }

    fn put(&self, key: &StoreKey, sleeve: SleeveKind, state: &OptionSleeveState) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.insert((key.clone(), sleeve), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::options::SleeveStatus;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;

    fn key() -> StoreKey {
        StoreKey::new("paper", "acct-1")
    }

    fn deployed() -> OptionSleeveState {
        OptionSleeveState {
            status: SleeveStatus::Deployed,
            opened_run_id: Some("run-7".to_string()),
            opened_as_of: Some(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()),
            underlying: Some("QQQ".to_string()),
            strike: Some(dec!(450)),
            expiry: NaiveDate::from_ymd_opt(2026, 6, 19),
            contracts: 3,
            premium_usd: dec!(9168),
            contract_symbol: Some("QQQ260619P00450000".to_string()),
            unwind_requested_as_of: None,
        }
    }

    fn exercise(store: &dyn SleeveStateStore) {
        assert!(store.get(&key(), SleeveKind::Insurance).unwrap().is_none());

        store.put(&key(), SleeveKind::Insurance, &deployed()).unwrap();
        assert_eq!(store.get(&key(), SleeveKind::Insurance).unwrap(), Some(deployed()));

        // Sleeves and accounts are independent
        assert!(store.get(&key(), SleeveKind::Growth).unwrap().is_none());
        assert!(store
            .get(&StoreKey::new("live", "acct-1"), SleeveKind::Insurance)
            .unwrap()
            .is_none());

        // Overwrite
        store
            .put(&key(), SleeveKind::Insurance, &OptionSleeveState::default())
            .unwrap();
        assert_eq!(
            store.get(&key(), SleeveKind::Insurance).unwrap(),
            Some(OptionSleeveState::default())
        );
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemorySleeveStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteSleeveStore::in_memory().unwrap());
    }

    #[test]
    fn test_json_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSleeveStore::new(dir.path());
        exercise(&store);
        assert!(store.path_for(&key(), SleeveKind::Insurance).exists());
    }

    #[test]
    fn test_corrupt_json_file_loads_inactive() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSleeveStore::new(dir.path());
        let path = store.path_for(&key(), SleeveKind::Growth);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(&path).unwrap();
        file.write_all(b"{ not valid json").unwrap();

        assert!(matches!(
            store.get(&key(), SleeveKind::Growth),
            Err(StoreError::Corrupt { .. })
        ));
        let state = load_or_default(&store, &key(), SleeveKind::Growth).unwrap();
        assert_eq!(state.status, SleeveStatus::Inactive);
    }

    #[test]
    fn test_corrupt_sqlite_row_loads_inactive() {
        let store = SqliteSleeveStore::in_memory().unwrap();
        store
            .put_raw(&key(), SleeveKind::Insurance, r#"{"status":"SIDEWAYS"}"#)
            .unwrap();

        assert!(matches!(
            store.get(&key(), SleeveKind::Insurance),
            Err(StoreError::Corrupt { .. })
        ));
        let state = load_or_default(&store, &key(), SleeveKind::Insurance).unwrap();
        assert_eq!(state, OptionSleeveState::default());
    }

    #[test]
    fn test_load_or_default_returns_stored() {
        let store = MemorySleeveStore::new();
        store.put(&key(), SleeveKind::Insurance, &deployed()).unwrap();
        let state = load_or_default(&store, &key(), SleeveKind::Insurance).unwrap();
        assert_eq!(state.contracts, 3);
    }

    #[test]
    fn test_open_store_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.state_store = StateStoreConfig::Sqlite {
            path: dir.path().join("nested/state.db").to_string_lossy().into_owned(),
        };
        let store = open_store(&config).unwrap();
        store.put(&key(), SleeveKind::Growth, &deployed()).unwrap();
        assert!(dir.path().join("nested/state.db").exists());
    }
}
