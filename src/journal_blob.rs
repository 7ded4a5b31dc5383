//! C3 — one exported JSON file per session, used both as ingestion input
//! for C6 and as a canonical plain-text rendering for direct context
//! injection.

use crate::error::JournalBlobError;
use crate::session_store::{Message, Session};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

impl From<&Message> for ExportedMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
            timestamp: m.timestamp.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalExport {
    pub session_id: String,
    pub name: Option<String>,
    pub created_at: String,
    pub exported_at: String,
    pub message_count: usize,
    pub messages: Vec<ExportedMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalBlobInfo {
    pub session_id: String,
    pub name: Option<String>,
    pub message_count: usize,
    pub exported_at: String,
    pub storage_path: String,
}

pub struct JournalBlobStore {
    storage_path: PathBuf,
}

impl JournalBlobStore {
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, JournalBlobError> {
        let storage_path = storage_path.into();
        tokio::fs::create_dir_all(&storage_path).await?;
        Ok(Self { storage_path })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.storage_path.join(format!("{session_id}.json"))
    }

    /// Overwrites the target file atomically (temp + rename). The only
    /// mutator; last writer wins.
    pub async fn export_session(
        &self,
        session: &Session,
        messages: &[Message],
    ) -> Result<String, JournalBlobError> {
        let export = JournalExport {
            session_id: session.session_id.clone(),
            name: session.name.clone(),
            created_at: session.created_at.clone(),
            exported_at: Utc::now().to_rfc3339(),
            message_count: messages.len(),
            messages: messages.iter().map(ExportedMessage::from).collect(),
        };

        let path = self.session_path(&session.session_id);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&export)?;
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(path.to_string_lossy().to_string())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<JournalExport, JournalBlobError> {
        let path = self.session_path(session_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| JournalBlobError::NotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        tokio::fs::try_exists(self.session_path(session_id))
            .await
            .unwrap_or(false)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool, JournalBlobError> {
        let path = self.session_path(session_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(true)
    }

    /// Newest-first by `exported_at`; files starting with `_` (reserved for
    /// manifests) are skipped.
    pub async fn list_sessions(&self) -> Result<Vec<JournalBlobInfo>, JournalBlobError> {
        let mut entries = tokio::fs::read_dir(&self.storage_path).await?;
        let mut sessions = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('_') || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(export) = serde_json::from_str::<JournalExport>(&content) else {
                continue;
            };

            sessions.push(JournalBlobInfo {
                session_id: export.session_id,
                name: export.name,
                message_count: export.message_count,
                exported_at: export.exported_at,
                storage_path: path.to_string_lossy().to_string(),
            });
        }

        sessions.sort_by(|a, b| b.exported_at.cmp(&a.exported_at));
        Ok(sessions)
    }

    /// Canonical text used both for embedding and for direct context
    /// injection:
    /// ```text
    /// Session: <name?>
    ///
    /// [USER] <content>
    ///
    /// [ASSISTANT] <content>
    /// ```
    pub async fn get_session_text(&self, session_id: &str) -> Result<String, JournalBlobError> {
        let export = self.get_session(session_id).await?;
        Ok(format_conversation(export.name.as_deref(), &export.messages))
    }
}

pub fn format_conversation(name: Option<&str>, messages: &[ExportedMessage]) -> String {
    let mut parts = Vec::new();
    if let Some(name) = name {
        parts.push(format!("Session: {name}"));
        parts.push(String::new());
    }
    for msg in messages {
        parts.push(format!("[{}] {}", msg.role.to_uppercase(), msg.content));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session {
            session_id: "s1".to_string(),
            name: Some("Pears chat".to_string()),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            last_activity: "2026-01-01T00:01:00Z".to_string(),
            message_count: 2,
            ingested_at: None,
        }
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message {
                id: 1,
                session_id: "s1".to_string(),
                role: "user".to_string(),
                content: "I like pears".to_string(),
                timestamp: "2026-01-01T00:00:30Z".to_string(),
            },
            Message {
                id: 2,
                session_id: "s1".to_string(),
                role: "assistant".to_string(),
                content: "Pears are sweet".to_string(),
                timestamp: "2026-01-01T00:01:00Z".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn export_then_get_text_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalBlobStore::new(dir.path()).await.unwrap();

        store
            .export_session(&sample_session(), &sample_messages())
            .await
            .unwrap();

        let text = store.get_session_text("s1").await.unwrap();
        assert!(text.starts_with("Session: Pears chat"));
        assert!(text.contains("[USER] I like pears"));
        assert!(text.contains("[ASSISTANT] Pears are sweet"));
        assert!(text.find("[USER]").unwrap() < text.find("[ASSISTANT]").unwrap());
    }

    #[tokio::test]
    async fn export_is_overwritable() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalBlobStore::new(dir.path()).await.unwrap();
        store
            .export_session(&sample_session(), &sample_messages())
            .await
            .unwrap();

        let fewer = vec![sample_messages()[0].clone()];
        store
            .export_session(&sample_session(), &fewer)
            .await
            .unwrap();

        let export = store.get_session("s1").await.unwrap();
        assert_eq!(export.message_count, 1);
    }

    #[tokio::test]
    async fn list_sessions_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalBlobStore::new(dir.path()).await.unwrap();

        let mut older = sample_session();
        older.session_id = "s_old".to_string();
        store.export_session(&older, &sample_messages()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut newer = sample_session();
        newer.session_id = "s_new".to_string();
        store.export_session(&newer, &sample_messages()).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions[0].session_id, "s_new");
    }

    #[tokio::test]
    async fn exists_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalBlobStore::new(dir.path()).await.unwrap();
        assert!(!store.exists("s1").await);
        store
            .export_session(&sample_session(), &sample_messages())
            .await
            .unwrap();
        assert!(store.exists("s1").await);
        assert!(store.delete_session("s1").await.unwrap());
        assert!(!store.exists("s1").await);
    }
}
