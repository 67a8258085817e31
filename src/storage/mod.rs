pub mod repository;
pub mod sqlite;
pub mod store;

use std::path::Path;

use rusqlite_migration::{Migrations, M};
use tokio_rusqlite::Connection;

use crate::error::{Error, Result};

pub use store::{ItemStandardsLookup, RollupStore, SessionStore, Stores, TickerStore};

const SHARED_PRAGMAS: &str = "PRAGMA journal_mode=WAL;\
                              PRAGMA foreign_keys=ON;\
                              PRAGMA busy_timeout=5000;";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))])
}

/// Local SQLite warehouse holding the rollup, session, ticker and standards
/// tables.
///
/// File-backed databases get a migrating writer plus a `query_only` reader,
/// so metrics reads never contend with the external rollup job for the
/// write lock. The engine itself writes only `app_config`.
#[derive(Clone)]
pub struct Database {
    writer: Connection,
    reader: Connection,
}

impl Database {
    /// `~/.oeedw/oeedw.db`, creating the directory if needed.
    pub async fn open() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        let dir = home.join(".oeedw");
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        Self::open_at(dir.join("oeedw.db")).await
    }

    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let writer = Connection::open(path).await?;
        migrate(&writer).await?;

        let reader = Connection::open(path).await?;
        reader
            .call(|conn| {
                conn.execute_batch(SHARED_PRAGMAS)?;
                conn.pragma_update(None, "query_only", true)?;
                Ok::<(), rusqlite::Error>(())
            })
            .await?;

        log::debug!("Opened warehouse at {}", path.display());
        Ok(Self { writer, reader })
    }

    /// In-memory database for tests. Both handles are the same connection,
    /// since each in-memory connection is its own database.
    pub async fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        migrate(&conn).await?;
        Ok(Self {
            reader: conn.clone(),
            writer: conn,
        })
    }

    pub fn writer(&self) -> &Connection {
        &self.writer
    }

    pub fn reader(&self) -> &Connection {
        &self.reader
    }
}

async fn migrate(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        conn.execute_batch(SHARED_PRAGMAS).map_err(|e| e.to_string())?;
        migrations().to_latest(conn).map_err(|e| e.to_string())?;
        Ok::<(), String>(())
    })
    .await
    .map_err(|e| Error::Migration(e.to_string()))
}
