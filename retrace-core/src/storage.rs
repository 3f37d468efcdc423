use crate::error::{Error, Result};
use crate::models::{Delta, DeltaKind, Operation};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SCHEMA_VERSION: i32 = 1;

/// SQLite persistence for the operation history of one project.
pub struct Storage {
    conn: Connection,
}

/// A delta row before its text columns have been parsed.
struct DeltaRow {
    operation_id: String,
    kind: String,
    target_path: Vec<u8>,
    old_content: Option<Vec<u8>>,
    new_content: Option<Vec<u8>>,
    symlink_target: Option<Vec<u8>>,
    relative_to: Option<Vec<u8>>,
    file_existed: bool,
    processed: bool,
    timestamp: String,
    checksum: Option<String>,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut storage = Self { conn };
        storage.initialize()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.initialize()?;
        Ok(storage)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS history_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS operations (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL UNIQUE,
                description TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                completed INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deltas (
                operation_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                target_path BLOB NOT NULL,
                old_content BLOB,
                new_content BLOB,
                symlink_target BLOB,
                relative_to BLOB,
                file_existed INTEGER NOT NULL,
                processed INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                checksum TEXT,
                PRIMARY KEY (operation_id, seq),
                FOREIGN KEY (operation_id) REFERENCES operations(id)
            );

            CREATE INDEX IF NOT EXISTS idx_operations_seq ON operations(seq);
            "#,
        )?;

        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(Error::CorruptHistory(format!(
                    "history schema version {} is newer than supported version {}",
                    v, SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Load every operation in history order, plus the position pointer.
    pub fn load(&self) -> Result<(Vec<Operation>, usize)> {
        let position: Option<i64> = self
            .conn
            .query_row("SELECT position FROM history_state WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, description, timestamp, completed FROM operations ORDER BY seq",
        )?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut operations = Vec::with_capacity(headers.len());
        for (id, description, timestamp, completed) in headers {
            let deltas = self.load_deltas(&id)?;
            operations.push(Operation {
                id: parse_uuid(&id)?,
                description,
                timestamp: parse_timestamp(&timestamp)?,
                completed: completed != 0,
                deltas,
            });
        }

        let position = usize::try_from(position.unwrap_or(operations.len() as i64))
            .map_err(|_| Error::CorruptHistory("negative history position".to_string()))?;
        if position > operations.len() {
            return Err(Error::CorruptHistory(format!(
                "position {} beyond {} recorded operation(s)",
                position,
                operations.len()
            )));
        }

        Ok((operations, position))
    }

    /// Replace the persisted history with `operations` and `position` in a
    /// single transaction.
    pub fn save(&mut self, operations: &[Operation], position: usize) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM deltas", [])?;
        tx.execute("DELETE FROM operations", [])?;

        for (seq, operation) in operations.iter().enumerate() {
            Self::insert_operation(&tx, seq, operation)?;
        }

        tx.execute(
            "INSERT INTO history_state (id, position) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET position = excluded.position",
            params![position as i64],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn insert_operation(tx: &Transaction, seq: usize, operation: &Operation) -> Result<()> {
        tx.execute(
            "INSERT INTO operations (id, seq, description, timestamp, completed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                operation.id.to_string(),
                seq as i64,
                operation.description,
                operation.timestamp.to_rfc3339(),
                operation.completed as i32,
            ],
        )?;

        for (delta_seq, delta) in operation.deltas.iter().enumerate() {
            let symlink_target = delta.symlink_target.as_deref().map(path_to_blob).transpose()?;
            let relative_to = delta.relative_to.as_deref().map(path_to_blob).transpose()?;

            tx.execute(
                "INSERT INTO deltas (operation_id, seq, kind, target_path, old_content, new_content,
                                     symlink_target, relative_to, file_existed, processed,
                                     timestamp, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    operation.id.to_string(),
                    delta_seq as i64,
                    delta.kind.as_str(),
                    path_to_blob(&delta.target_path)?,
                    delta.old_content.as_ref(),
                    delta.new_content.as_ref(),
                    symlink_target,
                    relative_to,
                    delta.file_existed as i32,
                    delta.processed as i32,
                    delta.timestamp.to_rfc3339(),
                    delta.checksum.as_ref(),
                ],
            )?;
        }

        Ok(())
    }

    fn load_deltas(&self, operation_id: &str) -> Result<Vec<Delta>> {
        let mut stmt = self.conn.prepare(
            "SELECT operation_id, kind, target_path, old_content, new_content, symlink_target,
                    relative_to, file_existed, processed, timestamp, checksum
             FROM deltas WHERE operation_id = ?1 ORDER BY seq",
        )?;

        let rows = stmt
            .query_map(params![operation_id], Self::delta_row)?
            .collect::<rusqlite::Result<Vec<DeltaRow>>>()?;

        rows.into_iter().map(Self::delta_from_row).collect()
    }

    // Helper methods
    fn delta_row(row: &Row) -> rusqlite::Result<DeltaRow> {
        Ok(DeltaRow {
            operation_id: row.get(0)?,
            kind: row.get(1)?,
            target_path: row.get(2)?,
            old_content: row.get(3)?,
            new_content: row.get(4)?,
            symlink_target: row.get(5)?,
            relative_to: row.get(6)?,
            file_existed: row.get::<_, i32>(7)? != 0,
            processed: row.get::<_, i32>(8)? != 0,
            timestamp: row.get(9)?,
            checksum: row.get(10)?,
        })
    }

    fn delta_from_row(row: DeltaRow) -> Result<Delta> {
        let kind = DeltaKind::parse(&row.kind).ok_or_else(|| {
            Error::CorruptHistory(format!(
                "unknown delta kind '{}' in operation {}",
                row.kind, row.operation_id
            ))
        })?;

        Ok(Delta {
            kind,
            target_path: path_from_blob(row.target_path)?,
            old_content: row.old_content,
            new_content: row.new_content,
            symlink_target: row.symlink_target.map(path_from_blob).transpose()?,
            relative_to: row.relative_to.map(path_from_blob).transpose()?,
            file_existed: row.file_existed,
            processed: row.processed,
            timestamp: parse_timestamp(&row.timestamp)?,
            checksum: row.checksum,
        })
    }
}

/// Paths are stored as their raw bytes so non-UTF-8 names survive a round
/// trip.
#[cfg(unix)]
fn path_to_blob(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(path.as_os_str().as_bytes().to_vec())
}

#[cfg(unix)]
fn path_from_blob(bytes: Vec<u8>) -> Result<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_to_blob(path: &Path) -> Result<Vec<u8>> {
    path.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| Error::InvalidOperation(format!("path {} is not valid UTF-8", path.display())))
}

#[cfg(not(unix))]
fn path_from_blob(bytes: Vec<u8>) -> Result<PathBuf> {
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| Error::CorruptHistory("stored path is not valid UTF-8".to_string()))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::CorruptHistory(format!("invalid operation id '{}': {}", s, e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptHistory(format!("invalid timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_operation(description: &str) -> Operation {
        let deltas = vec![
            Delta::new(DeltaKind::DirCreate, "gen").processed(),
            Delta::new(DeltaKind::FileCreate, "gen/a.txt")
                .with_new_content(b"hello".to_vec())
                .processed(),
            Delta::new(DeltaKind::SymlinkFileCreate, "link")
                .with_symlink("gen/a.txt", Some(PathBuf::from("."))),
        ];
        Operation::new(description, deltas).unwrap()
    }

    #[test]
    fn test_storage_initialization() {
        let storage = Storage::in_memory().unwrap();
        assert!(storage.conn.is_autocommit());

        let (operations, position) = storage.load().unwrap();
        assert!(operations.is_empty());
        assert_eq!(position, 0);
    }

    #[test]
    fn test_save_and_load_preserves_order_and_fields() {
        let mut storage = Storage::in_memory().unwrap();
        let first = sample_operation("first");
        let second = sample_operation("second");

        storage.save(&[first.clone(), second.clone()], 1).unwrap();
        let (operations, position) = storage.load().unwrap();

        assert_eq!(position, 1);
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0].id, first.id);
        assert_eq!(operations[1].description, "second");
        assert_eq!(operations[0].deltas, first.deltas);
    }

    #[test]
    fn test_save_replaces_previous_history() {
        let mut storage = Storage::in_memory().unwrap();
        storage
            .save(&[sample_operation("a"), sample_operation("b")], 2)
            .unwrap();
        storage.save(&[sample_operation("c")], 1).unwrap();

        let (operations, position) = storage.load().unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].description, "c");
        assert_eq!(position, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_round_trip() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw = Path::new(OsStr::from_bytes(b"gen/\xff\xfe.txt"));
        let deltas = vec![
            Delta::new(DeltaKind::FileCreate, raw).with_new_content(b"x".to_vec()),
            Delta::new(DeltaKind::SymlinkFileDelete, "link").with_symlink(raw, Some(PathBuf::from("gen"))),
        ];
        let operation = Operation::new("raw names", deltas).unwrap();

        let mut storage = Storage::in_memory().unwrap();
        storage.save(std::slice::from_ref(&operation), 1).unwrap();
        let (operations, _) = storage.load().unwrap();

        assert_eq!(operations[0].deltas[0].target_path, raw);
        assert_eq!(operations[0].deltas[1].symlink_target.as_deref(), Some(raw));
    }

    #[test]
    fn test_unknown_delta_kind_is_corrupt() {
        let mut storage = Storage::in_memory().unwrap();
        storage.save(&[sample_operation("a")], 1).unwrap();
        storage
            .conn
            .execute("UPDATE deltas SET kind = 'rename'", [])
            .unwrap();

        assert!(matches!(storage.load(), Err(Error::CorruptHistory(_))));
    }

    #[test]
    fn test_position_beyond_history_is_corrupt() {
        let mut storage = Storage::in_memory().unwrap();
        storage.save(&[sample_operation("a")], 1).unwrap();
        storage
            .conn
            .execute("UPDATE history_state SET position = 5", [])
            .unwrap();

        assert!(matches!(storage.load(), Err(Error::CorruptHistory(_))));
    }
}
