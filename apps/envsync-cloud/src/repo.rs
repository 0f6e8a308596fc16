//! Revisioned per-`(owner, project)` vault snapshots.
//!
//! The payload stays an open JSON document (`projects` + `teams`) so the
//! service never needs to understand client schemas; only the top-level
//! revision and crypto metadata are interpreted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreDoc {
    pub version: i64,
    pub revision: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub salt_b64: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_check_b64: String,
    #[serde(default)]
    pub teams: Map<String, Value>,
    #[serde(default)]
    pub projects: Map<String, Value>,
}

impl StoreDoc {
    pub fn empty() -> Self {
        Self {
            version: 1,
            revision: 0,
            salt_b64: String::new(),
            key_check_b64: String::new(),
            teams: Map::new(),
            projects: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("revision conflict: expected {expected}, got {got}")]
    Conflict { expected: i64, got: i64 },
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        RepoError::Database(err.to_string())
    }
}

#[async_trait]
pub trait StoreRepo: Send + Sync {
    async fn get(&self, owner_key: &str, project: &str) -> Result<StoreDoc, RepoError>;
    async fn put(
        &self,
        owner_key: &str,
        actor: &str,
        project: &str,
        next: &StoreDoc,
        expected_revision: i64,
    ) -> Result<StoreDoc, RepoError>;
}

// ───────────────────────────── in-memory ─────────────────────────────

/// Keyed by `owner:project`; development and test backend.
pub struct MemoryRepo {
    data: Mutex<HashMap<String, StoreDoc>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    fn key(owner_key: &str, project: &str) -> String {
        format!("{owner_key}:{project}")
    }
}

impl Default for MemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreRepo for MemoryRepo {
    async fn get(&self, owner_key: &str, project: &str) -> Result<StoreDoc, RepoError> {
        let data = self
            .data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(data
            .get(&Self::key(owner_key, project))
            .cloned()
            .unwrap_or_else(StoreDoc::empty))
    }

    async fn put(
        &self,
        owner_key: &str,
        _actor: &str,
        project: &str,
        next: &StoreDoc,
        expected_revision: i64,
    ) -> Result<StoreDoc, RepoError> {
        let mut data = self
            .data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = Self::key(owner_key, project);
        let current = data.get(&key).map(|doc| doc.revision).unwrap_or(0);
        if current != expected_revision {
            return Err(RepoError::Conflict {
                expected: expected_revision,
                got: current,
            });
        }
        let mut saved = next.clone();
        saved.revision = current + 1;
        data.insert(key, saved.clone());
        Ok(saved)
    }
}

// ───────────────────────────── postgres ─────────────────────────────

pub struct PgRepo {
    pool: PgPool,
}

impl PgRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn legacy_owner_key(owner_key: &str) -> Option<String> {
    owner_key
        .strip_prefix("org:")
        .or_else(|| owner_key.strip_prefix("team:"))
        .map(|bare| bare.trim().to_string())
        .filter(|bare| !bare.is_empty())
}

fn doc_from_row(row: &sqlx::postgres::PgRow) -> Result<StoreDoc, RepoError> {
    let revision: i64 = row.try_get("revision")?;
    let payload: Value = row.try_get("payload_json")?;
    let salt: Option<String> = row.try_get("salt_b64")?;
    let key_check: Option<String> = row.try_get("key_check_b64")?;

    let projects = payload
        .get("projects")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let teams = payload
        .get("teams")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Ok(StoreDoc {
        version: 1,
        revision,
        salt_b64: salt.unwrap_or_default(),
        key_check_b64: key_check.unwrap_or_default(),
        teams,
        projects,
    })
}

const SELECT_SNAPSHOT: &str = "SELECT revision, payload_json, salt_b64, key_check_b64 \
     FROM vault_snapshots WHERE owner_key = $1 AND project_name = $2";

#[async_trait]
impl StoreRepo for PgRepo {
    async fn get(&self, owner_key: &str, project: &str) -> Result<StoreDoc, RepoError> {
        let mut row = sqlx::query(SELECT_SNAPSHOT)
            .bind(owner_key)
            .bind(project)
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            // Pre-scoping rows were stored under the bare uuid.
            if let Some(legacy) = legacy_owner_key(owner_key) {
                row = sqlx::query(SELECT_SNAPSHOT)
                    .bind(legacy)
                    .bind(project)
                    .fetch_optional(&self.pool)
                    .await?;
            }
        }
        match row {
            Some(row) => doc_from_row(&row),
            None => Ok(StoreDoc::empty()),
        }
    }

    async fn put(
        &self,
        owner_key: &str,
        actor: &str,
        project: &str,
        next: &StoreDoc,
        expected_revision: i64,
    ) -> Result<StoreDoc, RepoError> {
        let mut tx = self.pool.begin().await?;

        let current: i64 = match sqlx::query(
            "SELECT revision FROM vault_snapshots \
             WHERE owner_key = $1 AND project_name = $2 FOR UPDATE",
        )
        .bind(owner_key)
        .bind(project)
        .fetch_optional(&mut *tx)
        .await?
        {
            Some(row) => row.try_get("revision")?,
            None => 0,
        };
        if current != expected_revision {
            return Err(RepoError::Conflict {
                expected: expected_revision,
                got: current,
            });
        }
        let next_revision = current + 1;

        let payload = serde_json::json!({
            "projects": Value::Object(next.projects.clone()),
            "teams": Value::Object(next.teams.clone()),
        });
        sqlx::query(
            "INSERT INTO vault_snapshots \
               (owner_key, project_name, revision, payload_json, salt_b64, key_check_b64, updated_by, updated_at) \
             VALUES ($1, $2, $3, $4, NULLIF($5, ''), NULLIF($6, ''), $7, NOW()) \
             ON CONFLICT (owner_key, project_name) DO UPDATE SET \
               revision = EXCLUDED.revision, \
               payload_json = EXCLUDED.payload_json, \
               salt_b64 = EXCLUDED.salt_b64, \
               key_check_b64 = EXCLUDED.key_check_b64, \
               updated_by = EXCLUDED.updated_by, \
               updated_at = NOW()",
        )
        .bind(owner_key)
        .bind(project)
        .bind(next_revision)
        .bind(&payload)
        .bind(&next.salt_b64)
        .bind(&next.key_check_b64)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO audit_events (actor, action, vault_owner_key, project_name, metadata_json) \
             VALUES ($1, 'store_put', $2, $3, $4)",
        )
        .bind(actor)
        .bind(owner_key)
        .bind(project)
        .bind(serde_json::json!({"source": "envsync-cloud"}))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut saved = next.clone();
        saved.revision = next_revision;
        Ok(saved)
    }
}
