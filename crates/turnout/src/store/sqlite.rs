use super::{Storage, StoreError};
use async_trait::async_trait;
use std::path::Path;
use tokio_rusqlite::Connection;
use turnout_core::{AttendanceEvent, UserRecord};

/// Embedded SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and create the schema.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS users (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL UNIQUE,
                     photo BLOB NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL,
                     date TEXT NOT NULL,
                     time TEXT NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn add_user(&self, identity: &str, photo: &[u8]) -> Result<(), StoreError> {
        let name = identity.to_string();
        let photo = photo.to_vec();
        let inserted = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "INSERT OR IGNORE INTO users (name, photo) VALUES (?1, ?2)",
                    rusqlite::params![name, photo],
                )?;
                Ok(affected > 0)
            })
            .await?;

        if !inserted {
            return Err(StoreError::DuplicateUser(identity.to_string()));
        }
        Ok(())
    }

    async fn remove_user(&self, identity: &str) -> Result<bool, StoreError> {
        let name = identity.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM users WHERE name = ?1", [&name])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name, photo FROM users ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(UserRecord {
                        identity: row.get(0)?,
                        photo: row.get(1)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn append_attendance(
        &self,
        identity: &str,
        date: &str,
        time: &str,
    ) -> Result<i64, StoreError> {
        let (name, date, time) = (identity.to_string(), date.to_string(), time.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (name, date, time) VALUES (?1, ?2, ?3)",
                    [&name, &date, &time],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(StoreError::from)
    }

    async fn list_attendance(&self) -> Result<Vec<AttendanceEvent>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, date, time FROM attendance ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(AttendanceEvent {
                        id: row.get(0)?,
                        identity: row.get(1)?,
                        date: row.get(2)?,
                        time: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn clear_attendance(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let affected = conn.execute("DELETE FROM attendance", [])?;
                Ok(affected as u64)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn renumber_attendance(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let rows = {
                    let mut stmt =
                        tx.prepare("SELECT name, date, time FROM attendance ORDER BY id")?;
                    let rows = stmt.query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                tx.execute("DELETE FROM attendance", [])?;
                {
                    let mut insert = tx.prepare(
                        "INSERT INTO attendance (id, name, date, time) VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (i, (name, date, time)) in rows.iter().enumerate() {
                        insert.execute(rusqlite::params![i as i64 + 1, name, date, time])?;
                    }
                }
                // AUTOINCREMENT never goes below the recorded high-water mark
                tx.execute(
                    "UPDATE sqlite_sequence SET seq = ?1 WHERE name = 'attendance'",
                    [rows.len() as i64],
                )?;
                tx.commit()?;
                Ok(rows.len() as u64)
            })
            .await
            .map_err(StoreError::from)
    }
}
