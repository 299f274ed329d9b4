//! 방 아카이브 저장소
//!
//! 마지막 참가자가 나간 방의 섹션/결과 기록을 SQLite에 보관한다.
//! 레코드는 방 이름당 하나이며, 재입장 시 한 번만 소비되고,
//! 만료 시각이 지나면 주기적인 sweep으로 삭제된다.

use crate::error::{ArchiveError, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// 10년을 넘는 TTL은 잘라낸다
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS archived_rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        roomName TEXT UNIQUE NOT NULL,
        rouletteParameters TEXT,
        archivedAt INTEGER,
        expireAt INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_archived_rooms_expire ON archived_rooms (expireAt);
"#;

/// 아카이브 페이로드
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    #[serde(rename = "parameters", default)]
    pub sections: Vec<String>,
    #[serde(rename = "rollResults", default)]
    pub results: Vec<String>,
}

/// SQLite 기반 아카이브 저장소
#[derive(Clone)]
pub struct ArchiveStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl ArchiveStore {
    /// 파일 데이터베이스 열기 (없으면 생성)
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, ttl_secs: u64) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, ttl_secs)
    }

    /// 메모리 데이터베이스 (테스트용)
    pub fn open_in_memory(ttl_secs: u64) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, ttl_secs)
    }

    fn with_connection(conn: Connection, ttl_secs: u64) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let secs = ttl_secs.min(MAX_TTL_SECS) as i64;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl: Duration::seconds(secs),
        })
    }

    /// 레코드 삽입 또는 교체. 만료 시각을 반환한다.
    pub async fn put(&self, room: &str, snapshot: &RoomSnapshot) -> Result<DateTime<Utc>> {
        self.put_at(room, snapshot, Utc::now()).await
    }

    pub async fn put_at(
        &self,
        room: &str,
        snapshot: &RoomSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let payload = serde_json::to_string(snapshot)?;
        let expire_at = now + self.ttl;
        let room = room.to_string();

        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO archived_rooms (roomName, rouletteParameters, archivedAt, expireAt)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    room,
                    payload,
                    now.timestamp_millis(),
                    expire_at.timestamp_millis()
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(expire_at)
    }

    /// 살아있는 레코드가 있으면 읽고 삭제한다
    pub async fn take_if_present(&self, room: &str) -> Result<Option<RoomSnapshot>> {
        self.take_if_present_at(room, Utc::now()).await
    }

    pub async fn take_if_present_at(
        &self,
        room: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RoomSnapshot>> {
        let room = room.to_string();
        let now_ms = now.timestamp_millis();

        let payload = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let payload: Option<Option<String>> = tx
                    .query_row(
                        "SELECT rouletteParameters FROM archived_rooms
                         WHERE roomName = ?1 AND expireAt > ?2",
                        params![room, now_ms],
                        |row| row.get(0),
                    )
                    .optional()?;

                if payload.is_some() {
                    tx.execute(
                        "DELETE FROM archived_rooms WHERE roomName = ?1",
                        params![room],
                    )?;
                }
                tx.commit()?;
                Ok(payload.flatten())
            })
            .await?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// 무조건 삭제. 레코드가 있었으면 true.
    pub async fn delete(&self, room: &str) -> Result<bool> {
        let room = room.to_string();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM archived_rooms WHERE roomName = ?1",
                params![room],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// expireAt <= now 인 레코드 일괄 삭제
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM archived_rooms WHERE expireAt <= ?1",
                params![now_ms],
            )?;
            Ok(removed)
        })
        .await
    }

    /// 만료 여부와 관계없이 레코드 존재 확인
    pub async fn contains(&self, room: &str) -> Result<bool> {
        let room = room.to_string();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM archived_rooms WHERE roomName = ?1",
                    params![room],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| ArchiveError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }

    /// 테스트에서 저장소를 직접 망가뜨릴 때 사용
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) {
        self.conn.lock().unwrap().execute_batch(sql).unwrap();
    }
}
