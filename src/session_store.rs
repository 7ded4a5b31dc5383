//! C2 — transactional store of sessions and per-message history, with an
//! `ingested_at` watermark per session.

use crate::error::SessionError;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub name: Option<String>,
    pub created_at: String,
    pub last_activity: String,
    pub message_count: i64,
    pub ingested_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionWithMessages {
    #[serde(flatten)]
    pub session: Session,
    pub messages: Vec<Message>,
}

pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                name TEXT,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                ingested_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_last_activity ON sessions(last_activity DESC)")
            .execute(&pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(session_id, timestamp)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn upsert_session(
        &self,
        session_id: &str,
        name: Option<&str>,
    ) -> Result<(), SessionError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;

        if exists.is_some() {
            sqlx::query("UPDATE sessions SET last_activity = ? WHERE session_id = ?")
                .bind(&now)
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            if let Some(name) = name {
                sqlx::query("UPDATE sessions SET name = ? WHERE session_id = ?")
                    .bind(name)
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;
            }
        } else {
            sqlx::query(
                "INSERT INTO sessions (session_id, name, created_at, last_activity, message_count) VALUES (?, ?, ?, ?, 0)",
            )
            .bind(session_id)
            .bind(name)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert the message and, in the same transaction, bump `message_count`
    /// and advance `last_activity`.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        timestamp: Option<&str>,
    ) -> Result<i64, SessionError> {
        let timestamp = timestamp
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;
        let message_id = result.last_insert_rowid();

        sqlx::query(
            "UPDATE sessions SET message_count = message_count + 1, last_activity = ? WHERE session_id = ?",
        )
        .bind(&timestamp)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message_id)
    }

    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, SessionError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, timestamp FROM messages WHERE session_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Message {
                id: row.get("id"),
                session_id: row.get("session_id"),
                role: row.get("role"),
                content: row.get("content"),
                timestamp: row.get("timestamp"),
            })
            .collect())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let row = sqlx::query(
            "SELECT session_id, name, created_at, last_activity, message_count, ingested_at FROM sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        Ok(Session {
            session_id: row.get("session_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
            last_activity: row.get("last_activity"),
            message_count: row.get("message_count"),
            ingested_at: row.get("ingested_at"),
        })
    }

    pub async fn get_session_with_messages(
        &self,
        session_id: &str,
    ) -> Result<SessionWithMessages, SessionError> {
        let session = self.get_session(session_id).await?;
        let messages = self.get_messages(session_id).await?;
        Ok(SessionWithMessages { session, messages })
    }

    pub async fn get_first_user_message(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, SessionError> {
        let row = sqlx::query(
            "SELECT content FROM messages WHERE session_id = ? AND role = 'user' ORDER BY timestamp ASC, id ASC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("content")))
    }

    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<Session>, SessionError> {
        let rows = sqlx::query(
            "SELECT session_id, name, created_at, last_activity, message_count, ingested_at FROM sessions ORDER BY last_activity DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Session {
                session_id: row.get("session_id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                last_activity: row.get("last_activity"),
                message_count: row.get("message_count"),
                ingested_at: row.get("ingested_at"),
            })
            .collect())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_ingested_at(
        &self,
        session_id: &str,
        timestamp: Option<&str>,
    ) -> Result<(), SessionError> {
        let timestamp = timestamp
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        sqlx::query("UPDATE sessions SET ingested_at = ? WHERE session_id = ?")
            .bind(timestamp)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_ingested_at(&self, session_id: &str) -> Result<(), SessionError> {
        sqlx::query("UPDATE sessions SET ingested_at = NULL WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `message_count > 0 AND (ingested_at IS NULL OR last_activity > ingested_at)`
    pub async fn has_new_messages_since_ingest(
        &self,
        session_id: &str,
    ) -> Result<bool, SessionError> {
        let session = self.get_session(session_id).await?;
        if session.message_count == 0 {
            return Ok(false);
        }
        match session.ingested_at {
            None => Ok(true),
            Some(ingested_at) => Ok(session.last_activity > ingested_at),
        }
    }

    pub async fn get_sessions_needing_ingest(
        &self,
        limit: i64,
    ) -> Result<Vec<Session>, SessionError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, name, created_at, last_activity, message_count, ingested_at
            FROM sessions
            WHERE message_count > 0 AND (ingested_at IS NULL OR last_activity > ingested_at)
            ORDER BY last_activity DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Session {
                session_id: row.get("session_id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                last_activity: row.get("last_activity"),
                message_count: row.get("message_count"),
                ingested_at: row.get("ingested_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SessionStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SessionStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn message_count_matches_appended_messages() {
        let store = test_store().await;
        store.upsert_session("s1", None).await.unwrap();
        store.add_message("s1", "user", "hi", None).await.unwrap();
        store
            .add_message("s1", "assistant", "hello", None)
            .await
            .unwrap();

        let session = store.get_session("s1").await.unwrap();
        let messages = store.get_messages("s1").await.unwrap();
        assert_eq!(session.message_count as usize, messages.len());
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn watermark_flips_on_ingest_and_new_message() {
        let store = test_store().await;
        store.upsert_session("s1", None).await.unwrap();
        store.add_message("s1", "user", "hi", None).await.unwrap();

        assert!(store.has_new_messages_since_ingest("s1").await.unwrap());
        store.set_ingested_at("s1", None).await.unwrap();
        assert!(!store.has_new_messages_since_ingest("s1").await.unwrap());

        store
            .add_message("s1", "user", "again", None)
            .await
            .unwrap();
        assert!(store.has_new_messages_since_ingest("s1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_session_cascades_messages() {
        let store = test_store().await;
        store.upsert_session("s1", None).await.unwrap();
        store.add_message("s1", "user", "hi", None).await.unwrap();

        assert!(store.delete_session("s1").await.unwrap());
        assert!(store.get_messages("s1").await.unwrap().is_empty());
        assert!(store.get_session("s1").await.is_err());
    }

    #[tokio::test]
    async fn sessions_needing_ingest_lists_stale_sessions_only() {
        let store = test_store().await;
        store.upsert_session("s1", None).await.unwrap();
        store.upsert_session("s2", None).await.unwrap();
        store.add_message("s1", "user", "hi", None).await.unwrap();
        store.add_message("s2", "user", "hi", None).await.unwrap();
        store.set_ingested_at("s2", None).await.unwrap();

        let stale = store.get_sessions_needing_ingest(10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, "s1");
    }
}
