//! Local SQLite mirror of the backend's `profiles`, `posts` and `post_likes`
//! tables, queried with the same join the hosted API performs.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::rows::{decode_rows, ActorColumns, LikeRow, PostColumns};
use super::{EventSource, LikeQuery};
use crate::notifications::{LikeEvent, NotificationError};
use crate::sqlite_column;
use crate::sqlite_persistence::{open_versioned, Column, ForeignKey, SqlType, Table, VersionedSchema};
use crate::timestamps::format_timestamp;

/// V 0
const PROFILES_TABLE_V_0: Table = Table {
    name: "profiles",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("username", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("display_name", &SqlType::Text),
        sqlite_column!("avatar_url", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};
const POSTS_TABLE_V_0: Table = Table {
    name: "posts",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "profiles",
                foreign_column: "id",
            })
        ),
        sqlite_column!("content", &SqlType::Text, non_null = true),
        sqlite_column!("image_url", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_posts_user_id", "user_id")],
    unique_constraints: &[],
};
const POST_LIKES_TABLE_V_0: Table = Table {
    name: "post_likes",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "post_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "posts",
                foreign_column: "id",
            })
        ),
        sqlite_column!(
            "user_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "profiles",
                foreign_column: "id",
            })
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_post_likes_created_at", "created_at")],
    unique_constraints: &[&["post_id", "user_id"]],
};

const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[PROFILES_TABLE_V_0, POSTS_TABLE_V_0, POST_LIKES_TABLE_V_0],
    migration: None,
}];

const FETCH_LIKES_SQL: &str = "SELECT l.id, l.post_id, l.user_id, l.created_at, p.content, \
        a.username, a.display_name, a.avatar_url \
    FROM post_likes l \
    INNER JOIN posts p ON p.id = l.post_id \
    LEFT JOIN profiles a ON a.id = l.user_id \
    WHERE p.user_id = ?1 AND l.created_at > ?2 \
    ORDER BY l.created_at DESC \
    LIMIT ?3";

/// A user profile as stored in `profiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }
}

#[derive(Clone)]
pub struct SqliteEventSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventSource {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_versioned(db_path, VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        VERSIONED_SCHEMAS[VERSIONED_SCHEMAS.len() - 1].create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Event source connection lock poisoned"))
    }

    pub fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO profiles (id, username, display_name, avatar_url) VALUES (?1, ?2, ?3, ?4)",
            params![
                profile.id,
                profile.username,
                profile.display_name,
                profile.avatar_url
            ],
        )
        .with_context(|| format!("Failed to insert profile {}", profile.username))?;
        Ok(())
    }

    pub fn insert_post(
        &self,
        post_id: &str,
        owner_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO posts (id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![post_id, owner_id, content, format_timestamp(created_at)],
        )
        .with_context(|| format!("Failed to insert post {}", post_id))?;
        Ok(())
    }

    /// Records that `user_id` liked `post_id`. A user can like a post once.
    pub fn insert_like(
        &self,
        like_id: &str,
        post_id: &str,
        user_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO post_likes (id, post_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![like_id, post_id, user_id, format_timestamp(created_at)],
        )
        .with_context(|| format!("Failed to record like of {} by {}", post_id, user_id))?;
        Ok(())
    }

    /// Removes a like, returning whether there was one.
    pub fn remove_like(&self, post_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
        )?;
        Ok(removed > 0)
    }

    fn query_rows(&self, query: &LikeQuery) -> Result<Vec<LikeRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(FETCH_LIKES_SQL)?;
        let rows = stmt
            .query_map(
                params![
                    query.viewer_id,
                    format_timestamp(query.since_exclusive),
                    query.limit as i64
                ],
                |row| {
                    Ok(LikeRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        user_id: row.get(2)?,
                        created_at: row.get(3)?,
                        post: Some(PostColumns {
                            content: row.get(4)?,
                        }),
                        actor: Some(ActorColumns {
                            username: row.get(5)?,
                            display_name: row.get(6)?,
                            avatar_url: row.get(7)?,
                        }),
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl EventSource for SqliteEventSource {
    async fn fetch_likes_since(
        &self,
        query: &LikeQuery,
    ) -> Result<Vec<LikeEvent>, NotificationError> {
        let source = self.clone();
        let owned_query = query.clone();
        let rows = tokio::task::spawn_blocking(move || source.query_rows(&owned_query))
            .await
            .map_err(NotificationError::source_unavailable)?
            .map_err(|err| NotificationError::source_unavailable(format!("{:#}", err)))?;

        debug!(
            "Fetched {} like rows for viewer {} since {}",
            rows.len(),
            query.viewer_id,
            query.since_exclusive
        );
        Ok(decode_rows(rows))
    }
}
