use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::geo::BoundingBox;
use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters for a privacy-scoped, optionally geo-filtered feed read.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: f64,
    pub include_private: bool,
    pub include_friends: bool,
    pub ascending: bool,
}

/// Feed listing cap, bounding payload size. Detail lookups are uncapped.
const FEED_LIMIT: i64 = 100;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                profile_picture_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS finds (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                location_name TEXT,
                category TEXT,
                is_public INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS find_media (
                id TEXT PRIMARY KEY,
                find_id TEXT NOT NULL,
                type TEXT NOT NULL,
                url TEXT NOT NULL,
                thumbnail_url TEXT,
                order_index INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (find_id) REFERENCES finds(id)
            );

            CREATE TABLE IF NOT EXISTS find_likes (
                id TEXT PRIMARY KEY,
                find_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (find_id) REFERENCES finds(id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                UNIQUE(find_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS find_comments (
                id TEXT PRIMARY KEY,
                find_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (find_id) REFERENCES finds(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS friendships (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                friend_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (friend_id) REFERENCES users(id),
                UNIQUE(user_id, friend_id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS notification_preferences (
                user_id TEXT PRIMARY KEY,
                push_enabled INTEGER NOT NULL DEFAULT 1,
                friend_requests INTEGER NOT NULL DEFAULT 1,
                friend_accepted INTEGER NOT NULL DEFAULT 1,
                find_liked INTEGER NOT NULL DEFAULT 1,
                find_commented INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS push_subscriptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                endpoint TEXT UNIQUE NOT NULL,
                p256dh_key TEXT NOT NULL,
                auth_key TEXT NOT NULL,
                user_agent TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_finds_user_id ON finds(user_id);
            CREATE INDEX IF NOT EXISTS idx_finds_created_at ON finds(created_at);
            CREATE INDEX IF NOT EXISTS idx_find_media_find_id ON find_media(find_id);
            CREATE INDEX IF NOT EXISTS idx_find_likes_find_id ON find_likes(find_id);
            CREATE INDEX IF NOT EXISTS idx_find_comments_find_id ON find_comments(find_id);
            CREATE INDEX IF NOT EXISTS idx_friendships_user_id ON friendships(user_id);
            CREATE INDEX IF NOT EXISTS idx_friendships_friend_id ON friendships(friend_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_user_id ON notifications(user_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        conn.execute(
            r#"INSERT INTO users (id, username, email, password_hash, profile_picture_url, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                &user.profile_picture_url,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict("Username or email already taken".to_string())
            }
            _ => StoreError::Database(e),
        })?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], |row| {
            row_to_user(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            |row| row_to_user(row),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("User {}", username))
            }
            _ => StoreError::Database(e),
        })
    }

    pub fn update_profile_picture(&self, user_id: &str, path: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE users SET profile_picture_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![path, Utc::now().to_rfc3339(), user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }

    /// Substring username search, excluding the searching user. Results are
    /// annotated with any existing friendship status in either direction.
    pub fn search_users(
        &self,
        query: &str,
        exclude_user_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<UserSearchResult>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", query.trim());
        let mut stmt = conn.prepare(
            r#"SELECT id, username, profile_picture_url FROM users
               WHERE username LIKE ?1 AND id != ?2 ORDER BY username ASC LIMIT ?3"#,
        )?;
        let mut results = stmt
            .query_map(params![pattern, exclude_user_id, limit.min(50)], |row| {
                Ok(UserSearchResult {
                    id: row.get("id")?,
                    username: row.get("username")?,
                    profile_picture_url: row.get("profile_picture_url")?,
                    friendship_status: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r#"SELECT user_id, friend_id, status FROM friendships
               WHERE user_id = ?1 OR friend_id = ?1"#,
        )?;
        let mut status_by_user: HashMap<String, FriendshipStatus> = HashMap::new();
        let rows = stmt.query_map(params![exclude_user_id], |row| {
            Ok((
                row.get::<_, String>("user_id")?,
                row.get::<_, String>("friend_id")?,
                row.get::<_, String>("status")?,
            ))
        })?;
        for row in rows {
            let (user_id, friend_id, status) = row?;
            let other = if user_id == exclude_user_id {
                friend_id
            } else {
                user_id
            };
            if let Some(status) = FriendshipStatus::parse(&status) {
                status_by_user.insert(other, status);
            }
        }

        for result in &mut results {
            result.friendship_status = status_by_user.get(&result.id).copied();
        }
        Ok(results)
    }

    // ==================== Find Operations ====================

    pub fn create_find(&self, find: &mut Find) -> StoreResult<()> {
        self.create_find_with_media(find, &mut [])
    }

    /// Insert a find and its media rows in one transaction, so a failed
    /// media insert never leaves a partial find behind.
    pub fn create_find_with_media(
        &self,
        find: &mut Find,
        media: &mut [FindMedia],
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        find.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        find.created_at = now;
        find.updated_at = now;

        tx.execute(
            r#"INSERT INTO finds (id, user_id, title, description, latitude, longitude,
                location_name, category, is_public, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                &find.id,
                &find.user_id,
                &find.title,
                &find.description,
                find.latitude,
                find.longitude,
                &find.location_name,
                &find.category,
                find.is_public,
                find.created_at.to_rfc3339(),
                find.updated_at.to_rfc3339(),
            ],
        )?;

        for item in media.iter_mut() {
            item.id = Uuid::new_v4().to_string();
            item.find_id = find.id.clone();
            item.created_at = now;
            tx.execute(
                r#"INSERT INTO find_media (id, find_id, type, url, thumbnail_url, order_index, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    &item.id,
                    &item.find_id,
                    &item.media_type,
                    &item.url,
                    &item.thumbnail_url,
                    item.order_index,
                    item.created_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_find(&self, id: &str) -> StoreResult<Find> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM finds WHERE id = ?1", params![id], |row| {
            row_to_find(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Find {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn update_find(&self, find: &mut Find) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        find.updated_at = Utc::now();

        let rows = conn.execute(
            r#"UPDATE finds SET title = ?1, description = ?2, location_name = ?3,
               category = ?4, is_public = ?5, updated_at = ?6 WHERE id = ?7"#,
            params![
                &find.title,
                &find.description,
                &find.location_name,
                &find.category,
                find.is_public,
                find.updated_at.to_rfc3339(),
                &find.id,
            ],
        )?;

        if rows == 0 {
            return Err(StoreError::NotFound(format!("Find {}", find.id)));
        }
        Ok(())
    }

    /// Delete a find and everything that hangs off it: media, likes and
    /// comment rows go in one transaction. Returns the storage paths of the
    /// deleted media so the caller can remove the underlying objects
    /// best-effort.
    pub fn delete_find_cascade(&self, id: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut paths = Vec::new();
        {
            let mut stmt =
                tx.prepare("SELECT url, thumbnail_url FROM find_media WHERE find_id = ?1")?;
            let rows = stmt.query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>("url")?,
                    row.get::<_, Option<String>>("thumbnail_url")?,
                ))
            })?;
            for row in rows {
                let (url, thumbnail) = row?;
                paths.push(url);
                if let Some(t) = thumbnail {
                    paths.push(t);
                }
            }
        }

        tx.execute("DELETE FROM find_media WHERE find_id = ?1", params![id])?;
        tx.execute("DELETE FROM find_likes WHERE find_id = ?1", params![id])?;
        tx.execute("DELETE FROM find_comments WHERE find_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM finds WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Find {}", id)));
        }
        tx.commit()?;

        // Only storage-relative paths need object deletion
        paths.retain(|p| !p.starts_with("http") && !p.starts_with('/'));
        Ok(paths)
    }

    // ==================== Media Operations ====================

    pub fn create_media(&self, media: &mut FindMedia) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        media.id = Uuid::new_v4().to_string();
        media.created_at = Utc::now();

        conn.execute(
            r#"INSERT INTO find_media (id, find_id, type, url, thumbnail_url, order_index, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &media.id,
                &media.find_id,
                &media.media_type,
                &media.url,
                &media.thumbnail_url,
                media.order_index,
                media.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_media_for_find(&self, find_id: &str) -> StoreResult<Vec<MediaView>> {
        let media = self.media_for_finds(&[find_id.to_string()])?;
        Ok(media.into_iter().next().map(|(_, m)| m).unwrap_or_default())
    }

    /// One batched lookup for the whole result set, grouped by find id.
    /// Ordered by order_index ascending; insertion order breaks ties.
    fn media_for_finds(&self, find_ids: &[String]) -> StoreResult<HashMap<String, Vec<MediaView>>> {
        let mut grouped: HashMap<String, Vec<MediaView>> = HashMap::new();
        if find_ids.is_empty() {
            return Ok(grouped);
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; find_ids.len()].join(", ");
        let sql = format!(
            r#"SELECT id, find_id, type, url, thumbnail_url, order_index FROM find_media
               WHERE find_id IN ({}) ORDER BY order_index ASC, rowid ASC"#,
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(find_ids.iter()), |row| {
            Ok(MediaView {
                id: row.get("id")?,
                find_id: row.get("find_id")?,
                media_type: row.get("type")?,
                url: row.get("url")?,
                thumbnail_url: row.get("thumbnail_url")?,
                order_index: row.get("order_index")?,
            })
        })?;
        for row in rows {
            let media = row?;
            grouped.entry(media.find_id.clone()).or_default().push(media);
        }
        Ok(grouped)
    }

    // ==================== Feed Query Engine ====================

    /// Privacy-scoped, geo-filtered, count-aggregated feed listing.
    ///
    /// A find is visible iff it is public, or `include_private` and the
    /// viewer owns it, or `include_friends` and the owner is an accepted
    /// friend of the viewer. Anonymous viewers only see public finds. Like
    /// counts and the viewer's like flag are derived at read time; nothing
    /// is denormalized.
    pub fn list_feed(&self, viewer: Option<&str>, query: &FeedQuery) -> StoreResult<Vec<FindView>> {
        let friend_ids = match viewer {
            Some(user_id) if query.include_friends || query.include_private => {
                self.friend_ids_of(user_id)?
            }
            _ => Vec::new(),
        };
        let friend_set: HashSet<&str> = friend_ids.iter().map(|s| s.as_str()).collect();

        let mut sql_params: Vec<Value> = Vec::new();
        let mut visibility = vec!["f.is_public = 1".to_string()];
        if let Some(user_id) = viewer {
            if query.include_private {
                visibility.push(format!("f.user_id = ?{}", sql_params.len() + 1));
                sql_params.push(Value::from(user_id.to_string()));
            }
            if query.include_friends && !friend_ids.is_empty() {
                let placeholders: Vec<String> = friend_ids
                    .iter()
                    .map(|id| {
                        sql_params.push(Value::from(id.clone()));
                        format!("?{}", sql_params.len())
                    })
                    .collect();
                visibility.push(format!("f.user_id IN ({})", placeholders.join(", ")));
            }
        }
        let mut conditions = vec![format!("({})", visibility.join(" OR "))];

        if let (Some(lat), Some(lng)) = (query.lat, query.lng) {
            let bbox = BoundingBox::around(lat, lng, query.radius_km);
            conditions.push(format!(
                "f.latitude BETWEEN ?{} AND ?{}",
                sql_params.len() + 1,
                sql_params.len() + 2
            ));
            sql_params.push(Value::from(bbox.min_lat));
            sql_params.push(Value::from(bbox.max_lat));
            conditions.push(format!(
                "f.longitude BETWEEN ?{} AND ?{}",
                sql_params.len() + 1,
                sql_params.len() + 2
            ));
            sql_params.push(Value::from(bbox.min_lng));
            sql_params.push(Value::from(bbox.max_lng));
        }

        let liked_expr = match viewer {
            Some(user_id) => {
                sql_params.push(Value::from(user_id.to_string()));
                format!(
                    "CASE WHEN EXISTS(SELECT 1 FROM find_likes WHERE find_id = f.id AND user_id = ?{}) THEN 1 ELSE 0 END",
                    sql_params.len()
                )
            }
            None => "0".to_string(),
        };

        let order = if query.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            r#"SELECT f.id, f.title, f.description, f.latitude, f.longitude,
                      f.location_name, f.category, f.is_public, f.created_at,
                      f.user_id, u.username, u.profile_picture_url,
                      COALESCE(COUNT(DISTINCT fl.id), 0) AS like_count,
                      {} AS is_liked_by_user
               FROM finds f
               INNER JOIN users u ON f.user_id = u.id
               LEFT JOIN find_likes fl ON fl.find_id = f.id
               WHERE {}
               GROUP BY f.id, u.username, u.profile_picture_url
               ORDER BY f.created_at {}
               LIMIT {}"#,
            liked_expr,
            conditions.join(" AND "),
            order,
            FEED_LIMIT
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut finds = stmt
            .query_map(params_from_iter(sql_params.iter()), |row| {
                row_to_find_view(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        for view in &mut finds {
            view.is_from_friend = friend_set.contains(view.user.id.as_str());
        }

        let find_ids: Vec<String> = finds.iter().map(|f| f.id.clone()).collect();
        let mut media = self.media_for_finds(&find_ids)?;
        for view in &mut finds {
            view.media = media.remove(&view.id).unwrap_or_default();
        }

        Ok(finds)
    }

    /// Detail lookup with comment count. Visibility (403 for private finds
    /// viewed by strangers) is enforced by the caller, which has the HTTP
    /// vocabulary for it.
    pub fn get_find_view(&self, id: &str, viewer: Option<&str>) -> StoreResult<FindView> {
        let conn = self.conn.lock().unwrap();

        let mut sql_params: Vec<Value> = vec![Value::from(id.to_string())];
        let liked_expr = match viewer {
            Some(user_id) => {
                sql_params.push(Value::from(user_id.to_string()));
                "CASE WHEN EXISTS(SELECT 1 FROM find_likes WHERE find_id = f.id AND user_id = ?2) THEN 1 ELSE 0 END"
            }
            None => "0",
        };
        let sql = format!(
            r#"SELECT f.id, f.title, f.description, f.latitude, f.longitude,
                      f.location_name, f.category, f.is_public, f.created_at,
                      f.user_id, u.username, u.profile_picture_url,
                      COALESCE(COUNT(DISTINCT fl.id), 0) AS like_count,
                      {} AS is_liked_by_user,
                      (SELECT COUNT(*) FROM find_comments WHERE find_id = f.id) AS comment_count
               FROM finds f
               INNER JOIN users u ON f.user_id = u.id
               LEFT JOIN find_likes fl ON fl.find_id = f.id
               WHERE f.id = ?1
               GROUP BY f.id, u.username, u.profile_picture_url"#,
            liked_expr
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut view = stmt
            .query_row(params_from_iter(sql_params.iter()), |row| {
                let mut view = row_to_find_view(row)?;
                view.comment_count = Some(row.get("comment_count")?);
                Ok(view)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("Find {}", id))
                }
                _ => StoreError::Database(e),
            })?;
        drop(stmt);
        drop(conn);

        if let Some(user_id) = viewer {
            view.is_from_friend = self
                .friend_ids_of(user_id)?
                .iter()
                .any(|f| f == &view.user.id);
        }
        view.media = self.get_media_for_find(id)?;
        Ok(view)
    }

    // ==================== Like Operations ====================

    /// At most one like per (find, user); a second like is a conflict, not
    /// an idempotent merge.
    pub fn create_like(&self, find_id: &str, user_id: &str) -> StoreResult<FindLike> {
        let conn = self.conn.lock().unwrap();
        let like = FindLike {
            id: Uuid::new_v4().to_string(),
            find_id: find_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            r#"INSERT INTO find_likes (id, find_id, user_id, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                &like.id,
                &like.find_id,
                &like.user_id,
                like.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict("Find already liked".to_string())
            }
            _ => StoreError::Database(e),
        })?;
        Ok(like)
    }

    /// Idempotent: removing an absent like is not an error.
    pub fn delete_like(&self, find_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM find_likes WHERE find_id = ?1 AND user_id = ?2",
            params![find_id, user_id],
        )?;
        Ok(())
    }

    pub fn count_likes(&self, find_id: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM find_likes WHERE find_id = ?1",
            params![find_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Comment Operations ====================

    pub fn create_comment(&self, comment: &mut FindComment) -> StoreResult<()> {
        let content = comment.content.trim().to_string();
        if content.is_empty() {
            return Err(StoreError::Validation(
                "Comment content is required".to_string(),
            ));
        }
        if content.chars().count() > 500 {
            return Err(StoreError::Validation(
                "Comment too long (max 500 characters)".to_string(),
            ));
        }
        comment.content = content;

        let conn = self.conn.lock().unwrap();
        comment.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        comment.created_at = now;
        comment.updated_at = now;

        conn.execute(
            r#"INSERT INTO find_comments (id, find_id, user_id, content, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &comment.id,
                &comment.find_id,
                &comment.user_id,
                &comment.content,
                comment.created_at.to_rfc3339(),
                comment.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_comment(&self, id: &str) -> StoreResult<FindComment> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM find_comments WHERE id = ?1",
            params![id],
            |row| {
                Ok(FindComment {
                    id: row.get("id")?,
                    find_id: row.get("find_id")?,
                    user_id: row.get("user_id")?,
                    content: row.get("content")?,
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                    updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Comment {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn list_comments(&self, find_id: &str) -> StoreResult<Vec<CommentView>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT c.id, c.find_id, c.content, c.created_at,
                      u.id AS author_id, u.username, u.profile_picture_url
               FROM find_comments c
               INNER JOIN users u ON c.user_id = u.id
               WHERE c.find_id = ?1
               ORDER BY c.created_at DESC"#,
        )?;
        let comments = stmt
            .query_map(params![find_id], |row| {
                Ok(CommentView {
                    id: row.get("id")?,
                    find_id: row.get("find_id")?,
                    content: row.get("content")?,
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                    user: UserSummary {
                        id: row.get("author_id")?,
                        username: row.get("username")?,
                        profile_picture_url: row.get("profile_picture_url")?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    pub fn delete_comment(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM find_comments WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Comment {}", id)));
        }
        Ok(())
    }

    // ==================== Friendship Operations ====================

    /// Look up the friendship row for an unordered user pair, if any.
    pub fn get_friendship_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> StoreResult<Option<Friendship>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            r#"SELECT * FROM friendships
               WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)"#,
            params![user_a, user_b],
            row_to_friendship,
        );
        match result {
            Ok(f) => Ok(Some(f)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Insert a pending request. The caller must have checked both
    /// directions first; the unordered-pair invariant is also enforced here.
    pub fn create_friendship(&self, friendship: &mut Friendship) -> StoreResult<()> {
        if self
            .get_friendship_between(&friendship.user_id, &friendship.friend_id)?
            .is_some()
        {
            return Err(StoreError::Conflict(
                "Friendship already exists".to_string(),
            ));
        }

        let conn = self.conn.lock().unwrap();
        friendship.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        friendship.created_at = now;
        friendship.updated_at = now;

        conn.execute(
            r#"INSERT INTO friendships (id, user_id, friend_id, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &friendship.id,
                &friendship.user_id,
                &friendship.friend_id,
                friendship.status.as_str(),
                friendship.created_at.to_rfc3339(),
                friendship.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_friendship(&self, id: &str) -> StoreResult<Friendship> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM friendships WHERE id = ?1",
            params![id],
            row_to_friendship,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("Friendship {}", id))
            }
            _ => StoreError::Database(e),
        })
    }

    pub fn update_friendship_status(
        &self,
        id: &str,
        status: FriendshipStatus,
    ) -> StoreResult<Friendship> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE friendships SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Friendship {}", id)));
        }
        drop(conn);
        self.get_friendship(id)
    }

    pub fn delete_friendship(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM friendships WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Friendship {}", id)));
        }
        Ok(())
    }

    /// Accepted friendships of a user, treated as undirected.
    pub fn friend_ids_of(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT user_id, friend_id FROM friendships
               WHERE status = 'accepted' AND (user_id = ?1 OR friend_id = ?1)"#,
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| {
                let a: String = row.get("user_id")?;
                let b: String = row.get("friend_id")?;
                Ok(if a == user_id { b } else { a })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Friendship rows relevant to a user: accepted friends, sent requests
    /// or received requests, annotated with the other party's identity.
    pub fn list_friendships(
        &self,
        user_id: &str,
        list_type: &str,
        status: FriendshipStatus,
    ) -> StoreResult<Vec<FriendshipView>> {
        let conn = self.conn.lock().unwrap();
        let sql = match list_type {
            "sent" => {
                r#"SELECT fr.id, fr.user_id, fr.friend_id, fr.status, fr.created_at,
                          u.username, u.profile_picture_url
                   FROM friendships fr INNER JOIN users u ON fr.friend_id = u.id
                   WHERE fr.user_id = ?1 AND fr.status = ?2
                   ORDER BY fr.created_at DESC"#
            }
            "received" => {
                r#"SELECT fr.id, fr.user_id, fr.friend_id, fr.status, fr.created_at,
                          u.username, u.profile_picture_url
                   FROM friendships fr INNER JOIN users u ON fr.user_id = u.id
                   WHERE fr.friend_id = ?1 AND fr.status = ?2
                   ORDER BY fr.created_at DESC"#
            }
            // "friends": rows in either direction, joined to the other party
            _ => {
                r#"SELECT fr.id, fr.user_id, fr.friend_id, fr.status, fr.created_at,
                          u.username, u.profile_picture_url
                   FROM friendships fr INNER JOIN users u
                     ON (fr.friend_id = u.id AND fr.user_id = ?1)
                     OR (fr.user_id = u.id AND fr.friend_id = ?1)
                   WHERE fr.status = ?2 AND (fr.user_id = ?1 OR fr.friend_id = ?1)
                   ORDER BY fr.created_at DESC"#
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let views = stmt
            .query_map(params![user_id, status.as_str()], |row| {
                Ok(FriendshipView {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    friend_id: row.get("friend_id")?,
                    status: FriendshipStatus::parse(&row.get::<_, String>("status")?)
                        .unwrap_or(FriendshipStatus::Pending),
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                    friend_username: row.get("username")?,
                    friend_profile_picture_url: row.get("profile_picture_url")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    // ==================== Notification Operations ====================

    pub fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let data_json = match &notification.data {
            Some(data) => Some(serde_json::to_string(data)?),
            None => None,
        };
        conn.execute(
            r#"INSERT INTO notifications (id, user_id, type, title, message, data, is_read, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                &notification.id,
                &notification.user_id,
                notification.notification_type.as_str(),
                &notification.title,
                &notification.message,
                data_json,
                notification.is_read,
                notification.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_notifications(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();
        let sql = if unread_only {
            r#"SELECT * FROM notifications WHERE user_id = ?1 AND is_read = 0
               ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"#
        } else {
            r#"SELECT * FROM notifications WHERE user_id = ?1
               ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"#
        };
        let mut stmt = conn.prepare(sql)?;
        let notifications = stmt
            .query_map(params![user_id, limit, offset], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn unread_notification_count(&self, user_id: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark specific notifications read, scoped to the owner.
    pub fn mark_notifications_read(&self, user_id: &str, ids: &[String]) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        for id in ids {
            conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
        }
        Ok(())
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    pub fn delete_notification(&self, id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Notification {}", id)));
        }
        Ok(())
    }

    // ==================== Notification Preferences ====================

    /// None means the user never saved preferences; callers treat that as
    /// all-true defaults.
    pub fn get_notification_preferences(
        &self,
        user_id: &str,
    ) -> StoreResult<Option<NotificationPreferences>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT * FROM notification_preferences WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(NotificationPreferences {
                    user_id: row.get("user_id")?,
                    push_enabled: row.get("push_enabled")?,
                    friend_requests: row.get("friend_requests")?,
                    friend_accepted: row.get("friend_accepted")?,
                    find_liked: row.get("find_liked")?,
                    find_commented: row.get("find_commented")?,
                    updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
                })
            },
        );
        match result {
            Ok(prefs) => Ok(Some(prefs)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn upsert_notification_preferences(
        &self,
        prefs: &NotificationPreferences,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO notification_preferences
                 (user_id, push_enabled, friend_requests, friend_accepted, find_liked, find_commented, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(user_id) DO UPDATE SET
                 push_enabled = ?2, friend_requests = ?3, friend_accepted = ?4,
                 find_liked = ?5, find_commented = ?6, updated_at = ?7"#,
            params![
                &prefs.user_id,
                prefs.push_enabled,
                prefs.friend_requests,
                prefs.friend_accepted,
                prefs.find_liked,
                prefs.find_commented,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ==================== Push Subscriptions ====================

    /// Upsert by endpoint: re-subscribing from the same browser refreshes
    /// the keys and reactivates the subscription.
    pub fn upsert_push_subscription(&self, sub: &mut PushSubscription) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        sub.updated_at = now;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM push_subscriptions WHERE endpoint = ?1",
                params![&sub.endpoint],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                _ => Err(e),
            })?;

        if let Some(id) = existing {
            sub.id = id;
            conn.execute(
                r#"UPDATE push_subscriptions SET p256dh_key = ?1, auth_key = ?2,
                   user_agent = ?3, is_active = 1, updated_at = ?4 WHERE endpoint = ?5"#,
                params![
                    &sub.p256dh_key,
                    &sub.auth_key,
                    &sub.user_agent,
                    sub.updated_at.to_rfc3339(),
                    &sub.endpoint,
                ],
            )?;
        } else {
            sub.id = Uuid::new_v4().to_string();
            sub.created_at = now;
            conn.execute(
                r#"INSERT INTO push_subscriptions
                     (id, user_id, endpoint, p256dh_key, auth_key, user_agent, is_active, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)"#,
                params![
                    &sub.id,
                    &sub.user_id,
                    &sub.endpoint,
                    &sub.p256dh_key,
                    &sub.auth_key,
                    &sub.user_agent,
                    sub.created_at.to_rfc3339(),
                    sub.updated_at.to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }

    pub fn active_push_subscriptions(&self, user_id: &str) -> StoreResult<Vec<PushSubscription>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM push_subscriptions WHERE user_id = ?1 AND is_active = 1",
        )?;
        let subs = stmt
            .query_map(params![user_id], row_to_push_subscription)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    pub fn deactivate_push_subscription(&self, endpoint: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE push_subscriptions SET is_active = 0, updated_at = ?1 WHERE endpoint = ?2",
            params![Utc::now().to_rfc3339(), endpoint],
        )?;
        Ok(())
    }

    pub fn remove_push_subscription(&self, user_id: &str, endpoint: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM push_subscriptions WHERE user_id = ?1 AND endpoint = ?2",
            params![user_id, endpoint],
        )?;
        Ok(())
    }
}

// ==================== Row mappers ====================

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        profile_picture_url: row.get("profile_picture_url")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_find(row: &rusqlite::Row) -> rusqlite::Result<Find> {
    Ok(Find {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        location_name: row.get("location_name")?,
        category: row.get("category")?,
        is_public: row.get("is_public")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_find_view(row: &rusqlite::Row) -> rusqlite::Result<FindView> {
    Ok(FindView {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        location_name: row.get("location_name")?,
        category: row.get("category")?,
        is_public: row.get("is_public")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        user: UserSummary {
            id: row.get("user_id")?,
            username: row.get("username")?,
            profile_picture_url: row.get("profile_picture_url")?,
        },
        like_count: row.get("like_count")?,
        is_liked_by_user: row.get::<_, i64>("is_liked_by_user")? != 0,
        is_from_friend: false,
        media: Vec::new(),
        comment_count: None,
    })
}

fn row_to_friendship(row: &rusqlite::Row) -> rusqlite::Result<Friendship> {
    Ok(Friendship {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        friend_id: row.get("friend_id")?,
        status: FriendshipStatus::parse(&row.get::<_, String>("status")?)
            .unwrap_or(FriendshipStatus::Pending),
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    let data_str: Option<String> = row.get("data")?;
    let data = data_str.and_then(|s| serde_json::from_str(&s).ok());
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        notification_type: NotificationType::parse(&row.get::<_, String>("type")?)
            .unwrap_or(NotificationType::FindLiked),
        title: row.get("title")?,
        message: row.get("message")?,
        data,
        is_read: row.get("is_read")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_push_subscription(row: &rusqlite::Row) -> rusqlite::Result<PushSubscription> {
    Ok(PushSubscription {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        endpoint: row.get("endpoint")?,
        p256dh_key: row.get("p256dh_key")?,
        auth_key: row.get("auth_key")?,
        user_agent: row.get("user_agent")?,
        is_active: row.get("is_active")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
