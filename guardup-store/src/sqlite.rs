//! SQLite-backed peer store

use std::path::Path;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

use crate::error::{Error, Result};
use crate::{NewPeer, PeerRecord, PeerStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS peers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    address TEXT NOT NULL,
    public_key TEXT NOT NULL,
    private_key TEXT NOT NULL,
    allowed_ips TEXT NOT NULL
)";

const SELECT_COLUMNS: &str = "SELECT id, name, address, public_key, private_key, allowed_ips FROM peers";

/// Peer store persisted in a single SQLite table
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// The file holds private keys, so on Unix it is restricted to the owner.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        log::debug!("Opened peer store at {:?}", path);
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<PeerRecord> {
        Ok(PeerRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            public_key: row.get(3)?,
            private_key: row.get(4)?,
            allowed_ips: row.get(5)?,
        })
    }
}

impl PeerStore for SqliteStore {
    fn insert(&mut self, peer: &NewPeer) -> Result<i64> {
        peer.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = tx
            .prepare("SELECT 1 FROM peers WHERE name = ?1")?
            .exists(params![peer.name])?;
        if exists {
            return Err(Error::DuplicateName(peer.name.clone()));
        }

        let inserted = tx.execute(
            "INSERT INTO peers (name, address, public_key, private_key, allowed_ips)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                peer.name,
                peer.address,
                peer.public_key,
                peer.private_key,
                peer.allowed_ips
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(Error::DuplicateName(peer.name.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;

        log::info!("Stored peer '{}' with id {}", peer.name, id);
        Ok(id)
    }

    fn find_by_name(&self, name: &str) -> Result<PeerRecord> {
        self.conn
            .query_row(
                &format!("{} WHERE name = ?1", SELECT_COLUMNS),
                params![name],
                Self::row_to_record,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn delete_by_name(&mut self, name: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM peers WHERE name = ?1", params![name])?;

        if deleted == 0 {
            return Err(Error::NotFound(name.to_string()));
        }

        log::info!("Deleted peer '{}' from the store", name);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<PeerRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))?;

        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut peers = Vec::new();
        for peer in rows {
            peers.push(peer?);
        }
        Ok(peers)
    }
}
