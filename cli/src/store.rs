//! Detection sinks selectable from the command line.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tokio::sync::mpsc;
use tracing::{error, info};
use uwalker_common::detection::Detection;
use uwalker_common::store::{LogStore, Store, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS banners (
        id    INTEGER PRIMARY KEY AUTOINCREMENT,
        ip    VARCHAR(32) NOT NULL,
        port  INTEGER NOT NULL,
        proto VARCHAR(10) NOT NULL,
        added TIMESTAMP NOT NULL
    );
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Log,
    Sqlite(PathBuf),
}

impl FromStr for StoreTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("log") {
            return Ok(StoreTarget::Log);
        }
        match s.strip_prefix("sqlite:") {
            Some(path) if !path.is_empty() => Ok(StoreTarget::Sqlite(PathBuf::from(path))),
            _ => Err(format!("unknown store '{s}' (expected 'log' or 'sqlite:<path>')")),
        }
    }
}

impl StoreTarget {
    pub fn open(&self) -> Result<Arc<dyn Store>, StoreError> {
        match self {
            StoreTarget::Log => Ok(Arc::new(LogStore)),
            StoreTarget::Sqlite(path) => {
                info!(path = %path.display(), "writing detections to sqlite");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
        }
    }
}

/// Appends one row per detection to a `banners` table.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::initialize(Connection::open(path).map_err(backend)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory().map_err(backend)?)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    fn rows(&self) -> Vec<(String, u16, String)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT ip, port, proto FROM banners ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn persist(&self, addr: Ipv4Addr, port: u16, protocol: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let protocol = protocol.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Closed)?;
            conn.execute(
                "INSERT INTO banners (ip, port, proto, added) VALUES (?1, ?2, ?3, ?4)",
                params![addr.to_string(), port, protocol, unix_now()],
            )
            .map_err(backend)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Drains the detection stream into `store`. A failed write is logged and
/// skipped. Returns how many detections were persisted.
pub async fn persist_all<F>(store: Arc<dyn Store>, mut detections: mpsc::Receiver<Detection>, on_saved: F) -> u64
where
    F: Fn(u64),
{
    let mut saved: u64 = 0;
    while let Some(detection) = detections.recv().await {
        match store
            .persist(detection.addr, detection.port, &detection.protocol)
            .await
        {
            Ok(()) => {
                saved += 1;
                on_saved(saved);
            }
            Err(e) => error!(%detection, error = %e, "could not persist detection"),
        }
    }
    saved
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
