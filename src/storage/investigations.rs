//! Investigation Store
//!
//! Persists investigations to SQLite, one JSON document per investigation id
//! with the listing columns denormalized next to it.
//!
//! Every mutation is a read-modify-write inside an `IMMEDIATE` transaction, so
//! writers to the same id are serialized and a `get` issued after a mutation
//! returns always observes it.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::models::{
    ConversationEntry, ConversationRole, Investigation, InvestigationStatus,
    InvestigationSummary, InvestigationUpdate, SessionState, Suggestion, TimestampedData,
};
use crate::storage::database::DbPool;
use crate::utils::error::{AppError, AppResult};

/// Investigation persistence on top of the shared connection pool
#[derive(Clone)]
pub struct InvestigationStore {
    pool: DbPool,
}

impl InvestigationStore {
    /// Create a store and make sure its table exists
    pub fn new(pool: DbPool) -> AppResult<Self> {
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> AppResult<()> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS investigations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                namespace TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'in_progress',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_investigations_updated_at
             ON investigations(updated_at)",
            [],
        )?;

        Ok(())
    }

    /// Create a new investigation and return its id
    pub fn create(
        &self,
        title: &str,
        namespace: &str,
        context: Option<String>,
    ) -> AppResult<String> {
        if title.trim().is_empty() {
            return Err(AppError::validation("Investigation title must not be empty"));
        }
        if namespace.trim().is_empty() {
            return Err(AppError::validation("Namespace must not be empty"));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let investigation = Investigation::new(&id, title, namespace, context);
        let body = serde_json::to_string(&investigation)?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO investigations (id, title, namespace, status, created_at, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                investigation.id,
                investigation.title,
                investigation.namespace,
                investigation.status.as_str(),
                timestamp(&investigation.created_at),
                timestamp(&investigation.updated_at),
                body,
            ],
        )?;

        debug!(investigation_id = %id, namespace, "Investigation created");
        Ok(id)
    }

    /// Get an investigation by id
    pub fn get(&self, id: &str) -> AppResult<Option<Investigation>> {
        let conn = self.pool.get()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM investigations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Get an investigation, treating a missing id as an error
    pub fn require(&self, id: &str) -> AppResult<Investigation> {
        self.get(id)?
            .ok_or_else(|| AppError::not_found(format!("Investigation {}", id)))
    }

    /// Merge a partial update
    pub fn update(&self, id: &str, update: InvestigationUpdate) -> AppResult<Investigation> {
        self.mutate(id, |inv| update.apply(inv))
    }

    pub fn add_conversation_entry(
        &self,
        id: &str,
        role: ConversationRole,
        content: &str,
    ) -> AppResult<ConversationEntry> {
        let entry = ConversationEntry::now(role, content);
        let appended = entry.clone();
        self.mutate(id, move |inv| inv.conversation.push(appended))?;
        Ok(entry)
    }

    /// Append evidence under a type key (`logs`, `events`, ...)
    pub fn add_evidence(
        &self,
        id: &str,
        evidence_type: &str,
        data: serde_json::Value,
    ) -> AppResult<()> {
        self.mutate(id, |inv| {
            inv.evidence
                .entry(evidence_type.to_string())
                .or_default()
                .push(TimestampedData::now(data));
        })?;
        Ok(())
    }

    /// Record the latest output of one analyzer, replacing the previous one
    pub fn add_agent_findings(
        &self,
        id: &str,
        agent: &str,
        data: serde_json::Value,
    ) -> AppResult<()> {
        self.mutate(id, |inv| {
            inv.agent_findings
                .insert(agent.to_string(), TimestampedData::now(data));
        })?;
        Ok(())
    }

    pub fn update_next_actions(&self, id: &str, actions: Vec<Suggestion>) -> AppResult<()> {
        self.mutate(id, |inv| inv.next_actions = actions)?;
        Ok(())
    }

    pub fn update_summary(&self, id: &str, summary: &str) -> AppResult<()> {
        self.mutate(id, |inv| inv.summary = summary.to_string())?;
        Ok(())
    }

    /// Append finding summaries not already recorded, keeping first-seen order
    pub fn add_accumulated_findings(&self, id: &str, findings: Vec<String>) -> AppResult<()> {
        self.mutate(id, |inv| {
            for finding in findings {
                if !inv.accumulated_findings.contains(&finding) {
                    inv.accumulated_findings.push(finding);
                }
            }
        })?;
        Ok(())
    }

    /// Replace the interactive session state
    pub fn save_session(&self, id: &str, session: &SessionState) -> AppResult<()> {
        let session = session.clone();
        self.mutate(id, move |inv| inv.session = session)?;
        Ok(())
    }

    pub fn mark_completed(&self, id: &str) -> AppResult<()> {
        self.mutate(id, |inv| inv.status = InvestigationStatus::Completed)?;
        Ok(())
    }

    /// All investigations, most recently updated first
    pub fn list(&self) -> AppResult<Vec<InvestigationSummary>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT body FROM investigations ORDER BY updated_at DESC, id ASC")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| {
                let inv: Investigation = serde_json::from_str(body)?;
                Ok(inv.summary_row())
            })
            .collect()
    }

    /// Apply a fallible state transition inside one write transaction.
    /// Nothing is written when `f` fails.
    pub fn update_session<T, F>(&self, id: &str, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut SessionState) -> AppResult<T>,
    {
        self.transact(id, |inv| f(&mut inv.session))
            .map(|(_, out)| out)
    }

    fn mutate<F>(&self, id: &str, f: F) -> AppResult<Investigation>
    where
        F: FnOnce(&mut Investigation),
    {
        self.transact(id, |inv| {
            f(inv);
            Ok(())
        })
        .map(|(inv, _)| inv)
    }

    /// Apply `f` to the stored investigation inside a write transaction. The
    /// transaction rolls back when `f` returns an error.
    pub fn transact<T, F>(&self, id: &str, f: F) -> AppResult<(Investigation, T)>
    where
        F: FnOnce(&mut Investigation) -> AppResult<T>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM investigations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let body = body.ok_or_else(|| AppError::not_found(format!("Investigation {}", id)))?;

        let mut investigation: Investigation = serde_json::from_str(&body)?;
        let out = f(&mut investigation)?;
        investigation.updated_at = Utc::now();

        tx.execute(
            "UPDATE investigations
             SET title = ?2, namespace = ?3, status = ?4, updated_at = ?5, body = ?6
             WHERE id = ?1",
            params![
                id,
                investigation.title,
                investigation.namespace,
                investigation.status.as_str(),
                timestamp(&investigation.updated_at),
                serde_json::to_string(&investigation)?,
            ],
        )?;
        tx.commit()?;

        Ok((investigation, out))
    }
}

/// Fixed-width RFC 3339 so lexical order equals time order
fn timestamp(at: &chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
