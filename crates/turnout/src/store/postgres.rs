use super::{Storage, StoreError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use turnout_core::{AttendanceEvent, UserRecord};

const MAX_CONNECTIONS: u32 = 4;

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and create the schema if it is missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                 id SERIAL PRIMARY KEY,
                 name TEXT NOT NULL UNIQUE,
                 photo BYTEA NOT NULL
             )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS attendance (
                 id BIGSERIAL PRIMARY KEY,
                 name TEXT NOT NULL,
                 date TEXT NOT NULL,
                 time TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for PostgresStore {
    async fn add_user(&self, identity: &str, photo: &[u8]) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (name, photo) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
        )
        .bind(identity)
        .bind(photo)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateUser(identity.to_string()));
        }
        Ok(())
    }

    async fn remove_user(&self, identity: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE name = $1")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query("SELECT name, photo FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(UserRecord {
                    identity: row.try_get("name")?,
                    photo: row.try_get("photo")?,
                })
            })
            .collect()
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    async fn append_attendance(
        &self,
        identity: &str,
        date: &str,
        time: &str,
    ) -> Result<i64, StoreError> {
        let id: i64 =
            sqlx::query("INSERT INTO attendance (name, date, time) VALUES ($1, $2, $3) RETURNING id")
                .bind(identity)
                .bind(date)
                .bind(time)
                .fetch_one(&self.pool)
                .await?
                .try_get("id")?;
        Ok(id)
    }

    async fn list_attendance(&self) -> Result<Vec<AttendanceEvent>, StoreError> {
        let rows = sqlx::query("SELECT id, name, date, time FROM attendance ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(AttendanceEvent {
                    id: row.try_get("id")?,
                    identity: row.try_get("name")?,
                    date: row.try_get("date")?,
                    time: row.try_get("time")?,
                })
            })
            .collect()
    }

    async fn clear_attendance(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM attendance")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn renumber_attendance(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Shift out of the way first so the rewrite never collides with a live id
        sqlx::query("UPDATE attendance SET id = -id")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            "UPDATE attendance AS a SET id = r.n
             FROM (SELECT id, ROW_NUMBER() OVER (ORDER BY id DESC) AS n FROM attendance) AS r
             WHERE a.id = r.id",
        )
        .execute(&mut *tx)
        .await?;
        let count = result.rows_affected();

        // is_called = false makes nextval return exactly count + 1
        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('attendance', 'id'), $1, false)",
        )
        .bind(count as i64 + 1)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(count)
    }
}
