//! SQLite-backed durable store: NPC memories, the relation log, and world
//! snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use tidemill_domain::NpcId;

use crate::infrastructure::ports::{MemoryRecord, StoreError, StorePort};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(StoreError::database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                importance INTEGER NOT NULL,
                tags TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StoreError::database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                object TEXT NOT NULL,
                delta INTEGER NOT NULL,
                note TEXT NOT NULL,
                at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StoreError::database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                blob TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StoreError::database)?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl StorePort for SqliteStore {
    async fn append_memory(&self, record: MemoryRecord) -> Result<(), StoreError> {
        let tags = serde_json::to_string(&record.tags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO memories (owner, kind, content, importance, tags, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.owner.to_string())
        .bind(record.kind)
        .bind(record.content)
        .bind(record.importance)
        .bind(tags)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn recent_memories(
        &self,
        owner: NpcId,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT owner, kind, content, importance, tags, created_at
            FROM memories WHERE owner = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(owner.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database)?;

        rows.into_iter().map(row_to_memory).collect()
    }

    async fn pair_memories(
        &self,
        owner: NpcId,
        counterpart: Uuid,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT owner, kind, content, importance, tags, created_at
            FROM memories WHERE owner = ? AND tags LIKE '%' || ? || '%'
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(owner.to_string())
        .bind(counterpart.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database)?;

        rows.into_iter().map(row_to_memory).collect()
    }

    async fn record_relation_delta(
        &self,
        subject: Uuid,
        object: String,
        delta: i32,
        note: String,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO relation_log (subject, object, delta, note, at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(subject.to_string())
        .bind(object)
        .bind(delta)
        .bind(note)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn save_snapshot(&self, blob: String) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (id, blob, saved_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                blob = excluded.blob,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT blob FROM snapshots WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database)?;
        Ok(row.map(|r| r.get("blob")))
    }
}

/// Store that remembers nothing. Lets orchestration tests run without a
/// database on disk.
#[cfg(test)]
pub struct NullStore;

#[cfg(test)]
#[async_trait]
impl StorePort for NullStore {
    async fn append_memory(&self, _record: MemoryRecord) -> Result<(), StoreError> {
        Ok(())
    }

    async fn recent_memories(
        &self,
        _owner: NpcId,
        _limit: u32,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn pair_memories(
        &self,
        _owner: NpcId,
        _counterpart: Uuid,
        _limit: u32,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn record_relation_delta(
        &self,
        _subject: Uuid,
        _object: String,
        _delta: i32,
        _note: String,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_snapshot(&self, _blob: String) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

fn row_to_memory(row: sqlx::sqlite::SqliteRow) -> Result<MemoryRecord, StoreError> {
    let owner: String = row.get("owner");
    let owner = owner
        .parse::<Uuid>()
        .map(NpcId::from_uuid)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let tags: String = row.get("tags");
    let tags: Vec<String> =
        serde_json::from_str(&tags).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(MemoryRecord {
        owner,
        kind: row.get("kind"),
        content: row.get("content"),
        importance: row.get("importance"),
        tags,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = SqliteStore::new(path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    fn memory(owner: NpcId, content: &str, tags: Vec<String>) -> MemoryRecord {
        MemoryRecord {
            owner,
            kind: "interaction".to_string(),
            content: content.to_string(),
            importance: 2,
            tags,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memories_come_back_freshest_first() {
        let (_dir, store) = temp_store().await;
        let owner = NpcId::new();
        for i in 0..5 {
            store
                .append_memory(memory(owner, &format!("memory {i}"), vec![]))
                .await
                .unwrap();
        }
        let recent = store.recent_memories(owner, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "memory 4");
        assert_eq!(recent[2].content, "memory 2");
    }

    #[tokio::test]
    async fn pair_memories_filter_on_the_counterpart_tag() {
        let (_dir, store) = temp_store().await;
        let owner = NpcId::new();
        let friend = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        store
            .append_memory(memory(owner, "shared a drink", vec![friend.to_string()]))
            .await
            .unwrap();
        store
            .append_memory(memory(owner, "unrelated", vec![stranger.to_string()]))
            .await
            .unwrap();

        let shared = store.pair_memories(owner, friend, 10).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].content, "shared a drink");
    }

    #[tokio::test]
    async fn memories_are_scoped_to_their_owner() {
        let (_dir, store) = temp_store().await;
        let a = NpcId::new();
        let b = NpcId::new();
        store.append_memory(memory(a, "a's day", vec![])).await.unwrap();
        store.append_memory(memory(b, "b's day", vec![])).await.unwrap();

        let of_a = store.recent_memories(a, 10).await.unwrap();
        assert_eq!(of_a.len(), 1);
        assert_eq!(of_a[0].content, "a's day");
    }

    #[tokio::test]
    async fn snapshot_upserts_a_single_row() {
        let (_dir, store) = temp_store().await;
        assert!(store.load_snapshot().await.unwrap().is_none());
        store.save_snapshot("{\"v\":1}".to_string()).await.unwrap();
        store.save_snapshot("{\"v\":2}".to_string()).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap().unwrap(), "{\"v\":2}");
    }

    #[tokio::test]
    async fn relation_log_accepts_entries() {
        let (_dir, store) = temp_store().await;
        store
            .record_relation_delta(
                Uuid::new_v4(),
                "Blacksmith".to_string(),
                2,
                "mission done".to_string(),
                Utc::now(),
            )
            .await
            .unwrap();
    }
}
