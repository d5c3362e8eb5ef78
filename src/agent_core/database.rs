//! SQLite session store for conversation history.
//!
//! Uses `rusqlite` in synchronous mode behind a mutex; writes are small and
//! the orchestrator treats them as best-effort. WAL mode is enabled so a UI
//! can read while a conversation is running.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::errors::AgentError;
use super::types::{Message, MessageContent, MessageId, NoticeKind, Role};

// ─── Store Trait ────────────────────────────────────────────────────────────

/// Persistence side channel for a conversation.
pub trait SessionStore: Send + Sync {
    /// Append a message to the end of a session, creating the session if needed.
    fn append_message(&self, session_id: &str, message: &Message) -> Result<(), AgentError>;

    /// Rewrite a stored message's content and metadata in place.
    fn update_message(&self, session_id: &str, message: &Message) -> Result<(), AgentError>;

    /// All readable messages of a session, oldest first.
    fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, AgentError>;
}

/// A stored session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: String,
    pub last_activity: String,
    pub title: Option<String>,
}

// ─── SqliteSessionStore ─────────────────────────────────────────────────────

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the store at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|_| AgentError::DatabaseError {
            reason: "session store lock poisoned".to_string(),
        })
    }

    fn create_tables(&self) -> Result<(), AgentError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_activity TEXT NOT NULL DEFAULT (datetime('now')),
                title TEXT
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                notice TEXT,
                tool_status TEXT NOT NULL DEFAULT '{}',
                UNIQUE (session_id, id),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, seq);
            ",
        )?;
        Ok(())
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    /// Create a new session with the given ID.
    pub fn create_session(&self, session_id: &str, title: Option<&str>) -> Result<(), AgentError> {
        self.conn()?.execute(
            "INSERT INTO sessions (id, title) VALUES (?1, ?2)",
            params![session_id, title],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, AgentError> {
        let result = self
            .conn()?
            .query_row(
                "SELECT id, created_at, last_activity, title FROM sessions WHERE id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(result)
    }

    /// List all sessions, most recent activity first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, last_activity, title
             FROM sessions
             ORDER BY last_activity DESC, id ASC",
        )?;

        let rows = stmt.query_map([], row_to_session)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Delete a session and all its messages.
    pub fn delete_session(&self, session_id: &str) -> Result<(), AgentError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }

    /// Count messages in a session.
    pub fn message_count(&self, session_id: &str) -> Result<usize, AgentError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl SessionStore for SqliteSessionStore {
    fn append_message(&self, session_id: &str, message: &Message) -> Result<(), AgentError> {
        let content_json = serde_json::to_string(&message.content)?;
        let tool_status_json = serde_json::to_string(&message.tool_status)?;
        let notice = message.notice.map(notice_to_str);

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id) VALUES (?1)",
            params![session_id],
        )?;
        conn.execute(
            "INSERT INTO messages
             (id, session_id, timestamp, role, content, notice, tool_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.as_str(),
                session_id,
                message.timestamp.to_rfc3339(),
                message.role.as_str(),
                content_json,
                notice,
                tool_status_json,
            ],
        )?;
        conn.execute(
            "UPDATE sessions SET last_activity = datetime('now') WHERE id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    fn update_message(&self, session_id: &str, message: &Message) -> Result<(), AgentError> {
        let content_json = serde_json::to_string(&message.content)?;
        let tool_status_json = serde_json::to_string(&message.tool_status)?;
        let notice = message.notice.map(notice_to_str);

        let updated = self.conn()?.execute(
            "UPDATE messages SET content = ?3, notice = ?4, tool_status = ?5
             WHERE session_id = ?1 AND id = ?2",
            params![
                session_id,
                message.id.as_str(),
                content_json,
                notice,
                tool_status_json,
            ],
        )?;
        if updated == 0 {
            return Err(AgentError::DatabaseError {
                reason: format!("message {} not found in session '{session_id}'", message.id),
            });
        }
        Ok(())
    }

    /// Rows that fail to decode are skipped and logged; structural repair of
    /// what remains is the caller's job.
    fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        if self.get_session(session_id)?.is_none() {
            return Err(AgentError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, role, content, notice, tool_status
             FROM messages
             WHERE session_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok(StoredRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                notice: row.get(4)?,
                tool_status: row.get(5)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let row = row?;
            let message_id = row.id.clone();
            match row.into_message() {
                Ok(message) => messages.push(message),
                Err(reason) => {
                    let err = AgentError::CorruptMessage {
                        session_id: session_id.to_string(),
                        message_id,
                        reason,
                    };
                    tracing::warn!(error = %err, "skipping unreadable stored message");
                }
            }
        }
        Ok(messages)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

struct StoredRow {
    id: String,
    timestamp: String,
    role: String,
    content: String,
    notice: Option<String>,
    tool_status: String,
}

impl StoredRow {
    fn into_message(self) -> Result<Message, String> {
        let role = Role::parse(&self.role).ok_or_else(|| format!("unknown role '{}'", self.role))?;
        let content: MessageContent =
            serde_json::from_str(&self.content).map_err(|e| format!("content: {e}"))?;
        let tool_status =
            serde_json::from_str(&self.tool_status).map_err(|e| format!("tool_status: {e}"))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("timestamp: {e}"))?;
        let notice = match self.notice.as_deref() {
            None => None,
            Some(s) => Some(notice_from_str(s).ok_or_else(|| format!("unknown notice '{s}'"))?),
        };

        Ok(Message {
            id: MessageId::from(self.id),
            role,
            content,
            timestamp,
            notice,
            tool_status,
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionInfo> {
    Ok(SessionInfo {
        id: row.get(0)?,
        created_at: row.get(1)?,
        last_activity: row.get(2)?,
        title: row.get(3)?,
    })
}

fn notice_to_str(kind: NoticeKind) -> &'static str {
    match kind {
        NoticeKind::Error => "error",
        NoticeKind::LoopDetected => "loop_detected",
        NoticeKind::Denied => "denied",
    }
}

fn notice_from_str(s: &str) -> Option<NoticeKind> {
    match s {
        "error" => Some(NoticeKind::Error),
        "loop_detected" => Some(NoticeKind::LoopDetected),
        "denied" => Some(NoticeKind::Denied),
        _ => None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::{ContentBlock, InvocationStatus, ToolCall};

    fn test_store() -> SqliteSessionStore {
        SqliteSessionStore::open(":memory:").unwrap()
    }

    fn tool_call_message(id: &str) -> Message {
        Message::assistant_blocks(vec![
            ContentBlock::text("Reading."),
            ContentBlock::ToolCall(ToolCall {
                id: id.to_string(),
                name: "read_file".to_string(),
                params: serde_json::json!({"path": "a.txt"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            }),
        ])
    }

    #[test]
    fn test_create_and_get_session() {
        let store = test_store();
        store.create_session("s1", Some("Fix the build")).unwrap();

        let session = store.get_session("s1").unwrap().unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.title.as_deref(), Some("Fix the build"));
        assert!(store.get_session("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_append_and_load_preserves_order_and_content() {
        let store = test_store();
        let messages = vec![
            Message::user_text("read a.txt"),
            tool_call_message("c1"),
            Message::tool_result("c1", "hello"),
            Message::notice(NoticeKind::Error, "Error: boom"),
        ];
        for m in &messages {
            store.append_message("s1", m).unwrap();
        }

        let loaded = store.load_messages("s1").unwrap();
        assert_eq!(loaded.len(), 4);
        for (a, b) in loaded.iter().zip(&messages) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
            assert_eq!(a.notice, b.notice);
        }
        assert_eq!(store.message_count("s1").unwrap(), 4);
    }

    #[test]
    fn test_append_creates_session_implicitly() {
        let store = test_store();
        store.append_message("auto", &Message::user_text("hi")).unwrap();
        assert!(store.get_session("auto").unwrap().is_some());
    }

    #[test]
    fn test_update_message_rewrites_tool_status() {
        let store = test_store();
        let mut msg = tool_call_message("c1");
        msg.tool_status.insert("c1".to_string(), InvocationStatus::Pending);
        store.append_message("s1", &msg).unwrap();

        msg.tool_status.insert("c1".to_string(), InvocationStatus::Completed);
        store.update_message("s1", &msg).unwrap();

        let loaded = store.load_messages("s1").unwrap();
        assert_eq!(loaded[0].tool_status["c1"], InvocationStatus::Completed);
    }

    #[test]
    fn test_update_missing_message_fails() {
        let store = test_store();
        store.create_session("s1", None).unwrap();
        let err = store
            .update_message("s1", &Message::user_text("ghost"))
            .unwrap_err();
        assert!(matches!(err, AgentError::DatabaseError { .. }));
    }

    #[test]
    fn test_load_unknown_session() {
        let store = test_store();
        let err = store.load_messages("missing").unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound { .. }));
    }

    #[test]
    fn test_corrupt_row_skipped() {
        let store = test_store();
        store.append_message("s1", &Message::user_text("ok")).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO messages (id, session_id, timestamp, role, content)
                 VALUES ('bad', 's1', '2024-01-01T00:00:00Z', 'user', '{not json')",
                [],
            )
            .unwrap();

        let loaded = store.load_messages("s1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(extract(&loaded[0]), "ok");
    }

    #[test]
    fn test_list_and_delete_sessions() {
        let store = test_store();
        store.create_session("a", None).unwrap();
        store.create_session("b", None).unwrap();
        store.append_message("a", &Message::user_text("hi")).unwrap();
        assert_eq!(store.list_sessions().unwrap().len(), 2);

        store.delete_session("a").unwrap();
        let remaining: Vec<String> = store
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(remaining, vec!["b"]);
        assert_eq!(store.message_count("a").unwrap(), 0);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteSessionStore::open(path).unwrap();
            store.append_message("s1", &Message::user_text("persisted")).unwrap();
        }
        let reopened = SqliteSessionStore::open(path).unwrap();
        assert_eq!(reopened.message_count("s1").unwrap(), 1);
    }

    fn extract(message: &Message) -> String {
        crate::agent_core::types::extract_text(&message.content)
    }
}
