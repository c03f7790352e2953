//! The Log Store
//!
//! Append-only persistence of conversation records, keyed by conversation
//! name. Records carry parent links; a conversation's history is the chain
//! from its leaf back to a root. Uses rusqlite for synchronous,
//! single-process access.

use std::fs;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::conversation::pending_tool_calls;
use crate::error::{CoreError, Result};
use crate::types::{ConversationEntry, Record, RecordDraft, RecordRole};

use super::schema::{CREATE_TABLES, SCHEMA_VERSION};

/// Handle to the conversation log database.
pub struct LogStore {
    conn: Connection,
}

impl LogStore {
    /// Open (or create) the log at `db_path` and initialize the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Api {
                        stage: "persistence",
                        message: format!("failed to create log directory {}: {e}", parent.display()),
                    }
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // every append commits before returning
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory log (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(CREATE_TABLES)?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    // ─── Append ─────────────────────────────────────────────────

    /// Append a record to `conversation`, validating the parent link and the
    /// role-sequencing invariant against the current chain. The record is
    /// durably committed before this returns; on any error nothing is written.
    ///
    /// A draft whose `parent_id` does not match the conversation's current
    /// tip is rejected with `InvalidParent` (stale-parent detection: two
    /// writers racing for the same tip cannot both win).
    pub fn append(&self, conversation: &str, draft: &RecordDraft) -> Result<Record> {
        let tx = self.conn.unchecked_transaction()?;

        let existing = Self::conversation_row(&tx, conversation)?;

        match (&existing, &draft.parent_id) {
            (Some(entry), Some(parent)) if *parent == entry.leaf_id => {}
            (Some(entry), Some(parent)) => {
                return Err(CoreError::InvalidParent(format!(
                    "parent {parent} is not the tip of conversation '{conversation}' (tip is {})",
                    entry.leaf_id
                )));
            }
            (Some(_), None) => {
                return Err(CoreError::InvalidParent(format!(
                    "conversation '{conversation}' already has a root"
                )));
            }
            (None, Some(parent)) => {
                return Err(CoreError::InvalidParent(format!(
                    "conversation '{conversation}' does not exist; cannot append under parent {parent}"
                )));
            }
            (None, None) => {}
        }

        let chain = match &draft.parent_id {
            Some(parent) => Self::walk_chain(&tx, parent)?,
            None => Vec::new(),
        };
        Self::validate_sequence(&chain, draft)?;

        let record = Record {
            id: format!("rec_{}", Uuid::new_v4()),
            parent_id: draft.parent_id.clone(),
            role: draft.role,
            content: draft.content.clone(),
            tool_name: draft.tool_name.clone(),
            tool_call_id: draft.tool_call_id.clone(),
            created_at: Utc::now().to_rfc3339(),
            metadata: draft.metadata.clone(),
        };

        tx.execute(
            "INSERT INTO records (id, parent_id, role, content, tool_name, tool_call_id, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.parent_id,
                record.role.as_str(),
                record.content,
                record.tool_name,
                record.tool_call_id,
                record.created_at,
                serde_json::to_string(&record.metadata)?,
            ],
        )?;

        if existing.is_some() {
            tx.execute(
                "UPDATE conversations SET leaf_id = ?1, updated_at = ?2 WHERE name = ?3",
                params![record.id, record.created_at, conversation],
            )?;
        } else {
            tx.execute(
                "INSERT INTO conversations (name, leaf_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![conversation, record.id, record.created_at],
            )?;
        }

        tx.commit()?;
        debug!(conversation, id = %record.id, role = record.role.as_str(), "appended record");
        Ok(record)
    }

    /// Check the role-sequencing invariant for `draft` against the chain it
    /// would extend (`chain` is oldest-first, ending at the draft's parent).
    fn validate_sequence(chain: &[Record], draft: &RecordDraft) -> Result<()> {
        let parent_role = chain.last().map(|r| r.role);

        let ok = match draft.role {
            // user records begin a new turn
            RecordRole::User => matches!(
                parent_role,
                None | Some(RecordRole::System) | Some(RecordRole::Assistant)
            ),
            RecordRole::System => matches!(parent_role, None | Some(RecordRole::System)),
            RecordRole::ToolCall => matches!(
                parent_role,
                Some(RecordRole::User) | Some(RecordRole::ToolCall) | Some(RecordRole::ToolResult)
            ),
            RecordRole::ToolResult => matches!(
                parent_role,
                Some(RecordRole::ToolCall) | Some(RecordRole::ToolResult)
            ),
            RecordRole::Assistant => matches!(
                parent_role,
                Some(RecordRole::User) | Some(RecordRole::ToolResult)
            ),
        };
        if !ok {
            return Err(CoreError::SequenceViolation(format!(
                "{} record cannot follow {}",
                draft.role.as_str(),
                parent_role.map(|r| r.as_str()).unwrap_or("root")
            )));
        }

        match draft.role {
            RecordRole::ToolResult => {
                // the result must resolve a call that is still pending
                let call_id = draft.tool_call_id.as_deref().ok_or_else(|| {
                    CoreError::SequenceViolation(
                        "tool_result record requires a tool_call_id".to_string(),
                    )
                })?;
                let pending = pending_tool_calls(chain);
                if !pending.iter().any(|p| p.call_id == call_id) {
                    let resolved_before = chain.iter().any(|r| {
                        r.role == RecordRole::ToolResult
                            && r.tool_call_id.as_deref() == Some(call_id)
                    });
                    let msg = if resolved_before {
                        format!("tool call {call_id} already has a result")
                    } else {
                        format!("tool call {call_id} is not an ancestor of this record")
                    };
                    return Err(CoreError::SequenceViolation(msg));
                }
            }
            RecordRole::Assistant => {
                // a final answer may not leave calls unresolved
                let pending = pending_tool_calls(chain);
                if !pending.is_empty() {
                    return Err(CoreError::SequenceViolation(format!(
                        "assistant record with {} unresolved tool call(s)",
                        pending.len()
                    )));
                }
            }
            RecordRole::ToolCall => {
                if draft.tool_call_id.is_none() || draft.tool_name.is_none() {
                    return Err(CoreError::SequenceViolation(
                        "tool_call record requires tool_name and tool_call_id".to_string(),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }

    // ─── Retrieval ──────────────────────────────────────────────

    /// The full chain from the root down to `leaf_id`, oldest-first. Each
    /// call re-reads from the database, so it reflects appends made between
    /// calls; a single call sees a consistent snapshot.
    pub fn chain(&self, leaf_id: &str) -> Result<Vec<Record>> {
        if Self::get_record(&self.conn, leaf_id)?.is_none() {
            return Err(CoreError::NotFound(format!("record {leaf_id}")));
        }
        Self::walk_chain(&self.conn, leaf_id)
    }

    fn walk_chain(conn: &Connection, leaf_id: &str) -> Result<Vec<Record>> {
        let mut out: Vec<Record> = Vec::new();
        let mut cursor = Some(leaf_id.to_string());
        while let Some(id) = cursor {
            let record = Self::get_record(conn, &id)?
                .ok_or_else(|| CoreError::InvalidParent(format!("dangling parent link {id}")))?;
            cursor = record.parent_id.clone();
            out.push(record);
        }
        out.reverse();
        Ok(out)
    }

    /// The current tip of a conversation.
    pub fn latest_leaf(&self, conversation: &str) -> Result<String> {
        Self::conversation_row(&self.conn, conversation)?
            .map(|c| c.leaf_id)
            .ok_or_else(|| CoreError::NotFound(format!("conversation '{conversation}'")))
    }

    pub fn conversation(&self, name: &str) -> Result<Option<ConversationEntry>> {
        Self::conversation_row(&self.conn, name)
    }

    /// All conversations, most recently updated first.
    pub fn conversations(&self) -> Result<Vec<ConversationEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, leaf_id, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ConversationEntry {
                    name: row.get(0)?,
                    leaf_id: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Create a new conversation whose tip is an existing record, sharing all
    /// history up to that point with the source chain.
    pub fn fork(&self, at_record_id: &str, new_name: &str) -> Result<ConversationEntry> {
        if Self::get_record(&self.conn, at_record_id)?.is_none() {
            return Err(CoreError::NotFound(format!("record {at_record_id}")));
        }
        if Self::conversation_row(&self.conn, new_name)?.is_some() {
            return Err(CoreError::InvalidParent(format!(
                "conversation '{new_name}' already exists"
            )));
        }
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO conversations (name, leaf_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![new_name, at_record_id, now],
        )?;
        Ok(ConversationEntry {
            name: new_name.to_string(),
            leaf_id: at_record_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    // ─── Row helpers (private) ──────────────────────────────────

    fn conversation_row(conn: &Connection, name: &str) -> Result<Option<ConversationEntry>> {
        let row = conn
            .query_row(
                "SELECT name, leaf_id, created_at, updated_at FROM conversations WHERE name = ?1",
                params![name],
                |row| {
                    Ok(ConversationEntry {
                        name: row.get(0)?,
                        leaf_id: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn get_record(conn: &Connection, id: &str) -> Result<Option<Record>> {
        let row = conn
            .query_row(
                "SELECT id, parent_id, role, content, tool_name, tool_call_id, created_at, metadata
                 FROM records WHERE id = ?1",
                params![id],
                |row| {
                    let role_str: String = row.get(2)?;
                    let metadata_json: String = row.get(7)?;
                    Ok(Record {
                        id: row.get(0)?,
                        parent_id: row.get(1)?,
                        role: RecordRole::parse(&role_str).unwrap_or(RecordRole::System),
                        content: row.get(3)?,
                        tool_name: row.get(4)?,
                        tool_call_id: row.get(5)?,
                        created_at: row.get(6)?,
                        metadata: serde_json::from_str(&metadata_json)
                            .unwrap_or_else(|_| serde_json::json!({})),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordDraft;
    use serde_json::json;

    fn store() -> LogStore {
        LogStore::open_in_memory().unwrap()
    }

    fn user(parent: Option<String>, text: &str) -> RecordDraft {
        RecordDraft::new(parent, RecordRole::User, text)
    }

    fn tool_call(parent: String, name: &str, call_id: &str) -> RecordDraft {
        let mut d = RecordDraft::new(Some(parent), RecordRole::ToolCall, "{}");
        d.tool_name = Some(name.to_string());
        d.tool_call_id = Some(call_id.to_string());
        d
    }

    fn tool_result(parent: String, name: &str, call_id: &str, content: &str) -> RecordDraft {
        let mut d = RecordDraft::new(Some(parent), RecordRole::ToolResult, content);
        d.tool_name = Some(name.to_string());
        d.tool_call_id = Some(call_id.to_string());
        d
    }

    #[test]
    fn test_chain_integrity() {
        let s = store();
        let root = s.append("demo", &user(None, "hello")).unwrap();
        let reply = s
            .append(
                "demo",
                &RecordDraft::new(Some(root.id.clone()), RecordRole::Assistant, "hi"),
            )
            .unwrap();
        let next = s.append("demo", &user(Some(reply.id.clone()), "bye")).unwrap();

        let chain = s.chain(&next.id).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].parent_id, None);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].parent_id.as_deref(), Some(pair[0].id.as_str()));
        }
        assert_eq!(s.latest_leaf("demo").unwrap(), next.id);
    }

    #[test]
    fn test_append_unknown_parent_rejected() {
        let s = store();
        let err = s
            .append("demo", &user(Some("rec_missing".into()), "hello"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidParent(_)));
    }

    #[test]
    fn test_stale_parent_rejected() {
        let s = store();
        let root = s.append("demo", &user(None, "hello")).unwrap();
        s.append(
            "demo",
            &RecordDraft::new(Some(root.id.clone()), RecordRole::Assistant, "hi"),
        )
        .unwrap();
        // a second writer still holding the old tip loses
        let err = s.append("demo", &user(Some(root.id), "race")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParent(_)));
    }

    #[test]
    fn test_user_after_user_rejected() {
        let s = store();
        let root = s.append("demo", &user(None, "one")).unwrap();
        let err = s.append("demo", &user(Some(root.id), "two")).unwrap_err();
        assert!(matches!(err, CoreError::SequenceViolation(_)));
    }

    #[test]
    fn test_assistant_with_pending_call_rejected() {
        let s = store();
        let root = s.append("demo", &user(None, "search something")).unwrap();
        let tc = s
            .append("demo", &tool_call(root.id, "web_search", "call_1"))
            .unwrap();
        let err = s
            .append(
                "demo",
                &RecordDraft::new(Some(tc.id), RecordRole::Assistant, "done"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::SequenceViolation(_)));
    }

    #[test]
    fn test_tool_pairing_and_duplicate_result() {
        let s = store();
        let root = s.append("demo", &user(None, "search")).unwrap();
        let tc = s
            .append("demo", &tool_call(root.id, "web_search", "call_1"))
            .unwrap();
        let tr = s
            .append(
                "demo",
                &tool_result(tc.id.clone(), "web_search", "call_1", "results"),
            )
            .unwrap();
        // already resolved
        let err = s
            .append(
                "demo",
                &tool_result(tr.id.clone(), "web_search", "call_1", "again"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::SequenceViolation(_)));
        // result for a call that is not an ancestor
        let err = s
            .append(
                "demo",
                &tool_result(tr.id, "web_search", "call_unknown", "ghost"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::SequenceViolation(_)));
    }

    #[test]
    fn test_latest_leaf_unknown_conversation() {
        let s = store();
        assert!(matches!(
            s.latest_leaf("nope").unwrap_err(),
            CoreError::NotFound(_)
        ));
        assert!(matches!(
            s.chain("rec_nope").unwrap_err(),
            CoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_fork_shares_history_and_diverges() {
        let s = store();
        let root = s.append("main", &user(None, "question")).unwrap();
        let reply = s
            .append(
                "main",
                &RecordDraft::new(Some(root.id.clone()), RecordRole::Assistant, "answer a"),
            )
            .unwrap();

        s.fork(&root.id, "branch").unwrap();
        let alt = s
            .append(
                "branch",
                &RecordDraft::new(Some(root.id.clone()), RecordRole::Assistant, "answer b"),
            )
            .unwrap();

        // both chains share the root, diverge after it
        let main_chain = s.chain(&s.latest_leaf("main").unwrap()).unwrap();
        let branch_chain = s.chain(&s.latest_leaf("branch").unwrap()).unwrap();
        assert_eq!(main_chain[0].id, branch_chain[0].id);
        assert_eq!(main_chain[1].id, reply.id);
        assert_eq!(branch_chain[1].id, alt.id);

        // fork name collisions and unknown records are rejected
        assert!(s.fork(&root.id, "branch").is_err());
        assert!(matches!(
            s.fork("rec_missing", "other").unwrap_err(),
            CoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_metadata_round_trip() {
        let s = store();
        let mut draft = user(None, "hello");
        draft.metadata = json!({"model": "gpt-4o", "prompt_tokens": 12});
        let rec = s.append("demo", &draft).unwrap();
        let chain = s.chain(&rec.id).unwrap();
        assert_eq!(chain[0].metadata["model"], "gpt-4o");
    }

    #[test]
    fn test_root_must_be_rootless() {
        let s = store();
        s.append("demo", &user(None, "hello")).unwrap();
        // second rootless append to the same conversation is rejected
        let err = s.append("demo", &user(None, "again")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParent(_)));
    }
}
