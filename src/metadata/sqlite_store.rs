//! SQLite implementation of MetadataStorage trait

use crate::config::MetadataConfig;
use crate::error::{Result, VaultError};
use crate::metadata::{
    format_timestamp, now, Album, AlbumPatch, AlbumScope, AlbumSummary, MetadataStorage, PendingBlobDeletion,
    Photo, PhotoFilter, PhotoPatch, DEFAULT_ALBUM_NAME,
};
use crate::storage::BlobFailure;
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const ALBUM_COLUMNS: &str =
    "a.id, a.name, a.description, a.cover_photo_id, a.is_private, a.photo_count, a.created_at, a.updated_at";

const PHOTO_COLUMNS: &str = "p.id, p.album_id, p.blob_id, p.url, p.thumbnail_url, p.title, p.description, \
     p.width, p.height, p.size_bytes, p.format, p.tags, p.is_favorite, p.taken_at, p.uploaded_at, p.created_at";

fn schema() -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS albums (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            cover_photo_id TEXT REFERENCES photos(id) ON DELETE SET NULL,
            is_private INTEGER NOT NULL DEFAULT 0,
            photo_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_default_name
            ON albums(name) WHERE name = '{default_album}';

        CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            album_id TEXT REFERENCES albums(id),
            blob_id TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            thumbnail_url TEXT,
            title TEXT,
            description TEXT,
            width INTEGER NOT NULL DEFAULT 0,
            height INTEGER NOT NULL DEFAULT 0,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            format TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            is_favorite INTEGER NOT NULL DEFAULT 0,
            taken_at TEXT,
            uploaded_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_photos_album ON photos(album_id);
        CREATE INDEX IF NOT EXISTS idx_photos_uploaded ON photos(uploaded_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_photos_favorite ON photos(is_favorite);

        CREATE TABLE IF NOT EXISTS photo_tags (
            photo_id TEXT NOT NULL REFERENCES photos(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (photo_id, tag)
        );
        CREATE INDEX IF NOT EXISTS idx_photo_tags_tag ON photo_tags(tag COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS pending_blob_deletions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            blob_id TEXT NOT NULL,
            last_error TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            enqueued_at TEXT NOT NULL
        );
        "#,
        default_album = DEFAULT_ALBUM_NAME
    )
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_u32(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(idx)?;
    u32::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn row_to_album(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        cover_photo_id: row.get(3)?,
        is_private: row.get(4)?,
        photo_count: get_u64(row, 5)?,
        created_at: parse_timestamp(6, row.get(6)?)?,
        updated_at: parse_timestamp(7, row.get(7)?)?,
    })
}

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<Photo> {
    let tags_json: String = row.get(11)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;
    let taken_at = match row.get::<_, Option<String>>(13)? {
        Some(raw) => Some(parse_timestamp(13, raw)?),
        None => None,
    };

    Ok(Photo {
        id: row.get(0)?,
        album_id: row.get(1)?,
        blob_id: row.get(2)?,
        url: row.get(3)?,
        thumbnail_url: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        width: get_u32(row, 7)?,
        height: get_u32(row, 8)?,
        size_bytes: get_u64(row, 9)?,
        format: row.get(10)?,
        tags,
        is_favorite: row.get(12)?,
        taken_at,
        uploaded_at: parse_timestamp(14, row.get(14)?)?,
        created_at: parse_timestamp(15, row.get(15)?)?,
    })
}

/// Unicode lowercase, so search folds the same way as `str::to_lowercase`
/// (SQLite's own `LOWER` only folds ASCII)
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "vault_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<String>(0)?.to_lowercase()),
    )
}

/// A second photo row for the same blob
fn is_duplicate_blob(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == ErrorCode::ConstraintViolation && message.contains("photos.blob_id")
        }
        _ => false,
    }
}

fn escape_like(needle: &str) -> String {
    needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn fetch_album(conn: &Connection, album_id: &str) -> rusqlite::Result<Option<Album>> {
    conn.query_row(
        &format!("SELECT {} FROM albums a WHERE a.id = ?1", ALBUM_COLUMNS),
        params![album_id],
        row_to_album,
    )
    .optional()
}

fn fetch_album_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<Album>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM albums a WHERE a.name = ?1 ORDER BY a.created_at, a.id LIMIT 1",
            ALBUM_COLUMNS
        ),
        params![name],
        row_to_album,
    )
    .optional()
}

fn fetch_photo(conn: &Connection, photo_id: &str) -> rusqlite::Result<Option<Photo>> {
    conn.query_row(
        &format!("SELECT {} FROM photos p WHERE p.id = ?1", PHOTO_COLUMNS),
        params![photo_id],
        row_to_photo,
    )
    .optional()
}

fn insert_album_row(conn: &Connection, album: &Album) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO albums (id, name, description, cover_photo_id, is_private, photo_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            album.id,
            album.name,
            album.description,
            album.cover_photo_id,
            album.is_private,
            album.photo_count as i64,
            format_timestamp(&album.created_at),
            format_timestamp(&album.updated_at),
        ],
    )?;
    Ok(())
}

fn adjust_photo_count(conn: &Connection, album_id: &str, delta: i64, updated_at: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE albums SET photo_count = photo_count + ?1, updated_at = ?2 WHERE id = ?3",
        params![delta, updated_at, album_id],
    )?;
    Ok(())
}

fn write_tags(conn: &Connection, photo_id: &str, tags: &[String]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM photo_tags WHERE photo_id = ?1", params![photo_id])?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO photo_tags (photo_id, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![photo_id, tag])?;
    }
    Ok(())
}

/// SQLite implementation of MetadataStorage
pub struct SQLiteMetadataStore {
    conn: Mutex<Connection>,
}

impl SQLiteMetadataStore {
    /// Open (or create) the database file named in the configuration
    pub fn open(config: &MetadataConfig) -> Result<Self> {
        let path = Path::new(&config.db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VaultError::Repository(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        if config.wal_mode {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            info!("SQLite journal mode: {}", mode);
        }
        info!("Opened metadata database at {}", path.display());
        Self::initialize(conn)
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        register_functions(&conn)?;
        conn.execute_batch(&schema())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VaultError::Repository("metadata connection lock poisoned".to_string()))
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let conn = self.conn()?;
        let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(value.max(0) as u64)
    }
}

impl MetadataStorage for SQLiteMetadataStore {
    fn ensure_album_named(&self, candidate: &Album) -> Result<Album> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(existing) = fetch_album_by_name(&tx, &candidate.name)? {
            return Ok(existing);
        }
        insert_album_row(&tx, candidate)?;
        tx.commit()?;
        info!("Created album '{}' ({})", candidate.name, candidate.id);
        Ok(candidate.clone())
    }

    fn insert_album(&self, album: &Album) -> Result<()> {
        let conn = self.conn()?;
        insert_album_row(&conn, album)?;
        Ok(())
    }

    fn get_album(&self, album_id: &str) -> Result<Option<Album>> {
        let conn = self.conn()?;
        Ok(fetch_album(&conn, album_id)?)
    }

    fn find_album_by_name(&self, name: &str) -> Result<Option<Album>> {
        let conn = self.conn()?;
        Ok(fetch_album_by_name(&conn, name)?)
    }

    fn list_albums(&self) -> Result<Vec<AlbumSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, c.thumbnail_url, c.url
             FROM albums a
             LEFT JOIN photos c ON c.id = a.cover_photo_id
             ORDER BY a.created_at ASC, a.id ASC",
            ALBUM_COLUMNS
        ))?;
        let rows = stmt.query_map([], |row| {
            let album = row_to_album(row)?;
            let thumbnail: Option<String> = row.get(8)?;
            let url: Option<String> = row.get(9)?;
            Ok(AlbumSummary {
                album,
                cover_thumbnail_url: thumbnail.or(url),
            })
        })?;

        let mut albums = Vec::new();
        for row in rows {
            albums.push(row?);
        }
        Ok(albums)
    }

    fn update_album(&self, album_id: &str, patch: &AlbumPatch, updated_at: DateTime<Utc>) -> Result<Option<Album>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut album = match fetch_album(&tx, album_id)? {
            Some(album) => album,
            None => return Ok(None),
        };
        if let Some(name) = &patch.name {
            album.name = name.clone();
        }
        if let Some(description) = &patch.description {
            album.description = Some(description.clone());
        }
        if let Some(is_private) = patch.is_private {
            album.is_private = is_private;
        }
        album.updated_at = updated_at;

        tx.execute(
            "UPDATE albums SET name = ?1, description = ?2, is_private = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                album.name,
                album.description,
                album.is_private,
                format_timestamp(&updated_at),
                album_id
            ],
        )?;
        tx.commit()?;
        Ok(Some(album))
    }

    fn set_album_cover(&self, album_id: &str, photo_id: Option<&str>, updated_at: DateTime<Utc>) -> Result<Option<Album>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut album = match fetch_album(&tx, album_id)? {
            Some(album) => album,
            None => return Ok(None),
        };

        if let Some(photo_id) = photo_id {
            let membership: Option<Option<String>> = tx
                .query_row("SELECT album_id FROM photos WHERE id = ?1", params![photo_id], |row| row.get(0))
                .optional()?;
            let belongs = match membership {
                Some(Some(owner)) => owner == album.id,
                Some(None) => album.is_default(),
                None => false,
            };
            if !belongs {
                return Err(VaultError::Validation(format!(
                    "photo {} does not belong to album {}",
                    photo_id, album_id
                )));
            }
        }

        tx.execute(
            "UPDATE albums SET cover_photo_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![photo_id, format_timestamp(&updated_at), album_id],
        )?;
        tx.commit()?;

        album.cover_photo_id = photo_id.map(str::to_string);
        album.updated_at = updated_at;
        Ok(Some(album))
    }

    fn delete_album_reassigning(&self, album_id: &str, fallback_album_id: &str, updated_at: DateTime<Utc>) -> Result<Option<u64>> {
        if album_id == fallback_album_id {
            return Err(VaultError::Validation(
                "cannot reassign an album's photos to itself".to_string(),
            ));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if fetch_album(&tx, album_id)?.is_none() {
            return Ok(None);
        }
        if fetch_album(&tx, fallback_album_id)?.is_none() {
            return Err(VaultError::NotFound(format!("album {}", fallback_album_id)));
        }

        let ts = format_timestamp(&updated_at);
        let moved = tx.execute(
            "UPDATE photos SET album_id = ?1 WHERE album_id = ?2",
            params![fallback_album_id, album_id],
        )? as i64;
        adjust_photo_count(&tx, fallback_album_id, moved, &ts)?;
        tx.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
        tx.commit()?;

        info!(
            "Deleted album {} and moved {} photo(s) to {}",
            album_id, moved, fallback_album_id
        );
        Ok(Some(moved as u64))
    }

    fn insert_photos(&self, photos: &[Photo]) -> Result<()> {
        if photos.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut per_album: HashMap<&str, i64> = HashMap::new();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO photos (id, album_id, blob_id, url, thumbnail_url, title, description, width, height,
                                     size_bytes, format, tags, is_favorite, taken_at, uploaded_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for photo in photos {
                let inserted = stmt.execute(params![
                    photo.id,
                    photo.album_id,
                    photo.blob_id,
                    photo.url,
                    photo.thumbnail_url,
                    photo.title,
                    photo.description,
                    photo.width as i64,
                    photo.height as i64,
                    photo.size_bytes as i64,
                    photo.format,
                    serde_json::to_string(&photo.tags)?,
                    photo.is_favorite,
                    photo.taken_at.as_ref().map(format_timestamp),
                    format_timestamp(&photo.uploaded_at),
                    format_timestamp(&photo.created_at),
                ]);
                match inserted {
                    Err(e) if is_duplicate_blob(&e) => {
                        return Err(VaultError::Conflict(format!(
                            "blob {} already has a photo",
                            photo.blob_id
                        )));
                    }
                    other => other?,
                };
                write_tags(&tx, &photo.id, &photo.tags)?;
                if let Some(album_id) = photo.album_id.as_deref() {
                    *per_album.entry(album_id).or_insert(0) += 1;
                }
            }
        }
        let ts = format_timestamp(&now());
        for (album_id, delta) in per_album {
            adjust_photo_count(&tx, album_id, delta, &ts)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_photo(&self, photo_id: &str) -> Result<Option<Photo>> {
        let conn = self.conn()?;
        Ok(fetch_photo(&conn, photo_id)?)
    }

    fn get_photos_by_ids(&self, photo_ids: &[String]) -> Result<Vec<Photo>> {
        if photo_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; photo_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM photos p WHERE p.id IN ({})",
            PHOTO_COLUMNS, placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(photo_ids.iter()), row_to_photo)?;

        let mut photos = Vec::new();
        for row in rows {
            photos.push(row?);
        }
        Ok(photos)
    }

    fn get_photos_by_blob_ids(&self, blob_ids: &[String]) -> Result<Vec<Photo>> {
        if blob_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; blob_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM photos p WHERE p.blob_id IN ({})",
            PHOTO_COLUMNS, placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(blob_ids.iter()), row_to_photo)?;

        let mut photos = Vec::new();
        for row in rows {
            photos.push(row?);
        }
        Ok(photos)
    }

    fn toggle_favorite(&self, photo_id: &str) -> Result<Option<bool>> {
        let conn = self.conn()?;
        let flag = conn
            .query_row(
                "UPDATE photos SET is_favorite = NOT is_favorite WHERE id = ?1 RETURNING is_favorite",
                params![photo_id],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(flag)
    }

    fn reassign_photo(&self, photo_id: &str, album_id: &str, updated_at: DateTime<Utc>) -> Result<Option<Photo>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut photo = match fetch_photo(&tx, photo_id)? {
            Some(photo) => photo,
            None => return Ok(None),
        };
        if fetch_album(&tx, album_id)?.is_none() {
            return Err(VaultError::NotFound(format!("album {}", album_id)));
        }
        if photo.album_id.as_deref() == Some(album_id) {
            return Ok(Some(photo));
        }

        let ts = format_timestamp(&updated_at);
        tx.execute(
            "UPDATE photos SET album_id = ?1 WHERE id = ?2",
            params![album_id, photo_id],
        )?;
        if let Some(previous) = photo.album_id.as_deref() {
            adjust_photo_count(&tx, previous, -1, &ts)?;
        }
        adjust_photo_count(&tx, album_id, 1, &ts)?;
        // a cover must be a member of its album
        tx.execute(
            "UPDATE albums SET cover_photo_id = NULL, updated_at = ?1 WHERE cover_photo_id = ?2 AND id != ?3",
            params![ts, photo_id, album_id],
        )?;
        tx.commit()?;

        photo.album_id = Some(album_id.to_string());
        Ok(Some(photo))
    }

    fn update_photo(&self, photo_id: &str, patch: &PhotoPatch) -> Result<Option<Photo>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut photo = match fetch_photo(&tx, photo_id)? {
            Some(photo) => photo,
            None => return Ok(None),
        };
        if let Some(title) = &patch.title {
            photo.title = Some(title.clone());
        }
        if let Some(description) = &patch.description {
            photo.description = Some(description.clone());
        }
        if let Some(taken_at) = patch.taken_at {
            photo.taken_at = Some(taken_at);
        }
        if let Some(tags) = &patch.tags {
            photo.tags = tags.clone();
            write_tags(&tx, photo_id, tags)?;
        }

        tx.execute(
            "UPDATE photos SET title = ?1, description = ?2, tags = ?3, taken_at = ?4 WHERE id = ?5",
            params![
                photo.title,
                photo.description,
                serde_json::to_string(&photo.tags)?,
                photo.taken_at.as_ref().map(format_timestamp),
                photo_id
            ],
        )?;
        tx.commit()?;
        Ok(Some(photo))
    }

    fn delete_photos(&self, photo_ids: &[String], updated_at: DateTime<Utc>) -> Result<Vec<Photo>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ts = format_timestamp(&updated_at);
        let mut deleted = Vec::new();

        for photo_id in photo_ids {
            let photo = match fetch_photo(&tx, photo_id)? {
                Some(photo) => photo,
                None => continue,
            };
            tx.execute(
                "UPDATE albums SET cover_photo_id = NULL, updated_at = ?1 WHERE cover_photo_id = ?2",
                params![ts, photo_id],
            )?;
            tx.execute("DELETE FROM photo_tags WHERE photo_id = ?1", params![photo_id])?;
            tx.execute("DELETE FROM photos WHERE id = ?1", params![photo_id])?;
            if let Some(album_id) = photo.album_id.as_deref() {
                adjust_photo_count(&tx, album_id, -1, &ts)?;
            }
            deleted.push(photo);
        }

        tx.commit()?;
        Ok(deleted)
    }

    fn query_photos(&self, filter: &PhotoFilter, offset: u64, limit: u64) -> Result<Vec<Photo>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let AlbumScope::Album { album_id, include_unassigned } = &filter.scope {
            values.push(Value::Text(album_id.clone()));
            let n = values.len();
            if *include_unassigned {
                clauses.push(format!("(p.album_id = ?{} OR p.album_id IS NULL)", n));
            } else {
                clauses.push(format!("p.album_id = ?{}", n));
            }
        }
        if filter.favorites_only {
            clauses.push("p.is_favorite = 1".to_string());
        }
        if let Some(needle) = &filter.search {
            values.push(Value::Text(format!("%{}%", escape_like(needle))));
            let n = values.len();
            clauses.push(format!(
                "(vault_lower(COALESCE(p.title, '')) LIKE ?{n} ESCAPE '\\' \
                  OR vault_lower(COALESCE(p.description, '')) LIKE ?{n} ESCAPE '\\' \
                  OR EXISTS (SELECT 1 FROM photo_tags t WHERE t.photo_id = p.id AND vault_lower(t.tag) LIKE ?{n} ESCAPE '\\'))",
                n = n
            ));
        }

        values.push(Value::Integer(limit as i64));
        let limit_idx = values.len();
        values.push(Value::Integer(offset as i64));
        let offset_idx = values.len();

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM photos p {} ORDER BY p.uploaded_at DESC, p.id DESC LIMIT ?{} OFFSET ?{}",
            PHOTO_COLUMNS, where_sql, limit_idx, offset_idx
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_photo)?;

        let mut photos = Vec::new();
        for row in rows {
            photos.push(row?);
        }
        Ok(photos)
    }

    fn count_photos(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM photos")
    }

    fn count_albums(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM albums")
    }

    fn count_favorites(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM photos WHERE is_favorite = 1")
    }

    fn total_photo_bytes(&self) -> Result<u64> {
        self.count("SELECT COALESCE(SUM(size_bytes), 0) FROM photos")
    }

    fn queue_blob_deletions(&self, failures: &[BlobFailure], enqueued_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pending_blob_deletions (blob_id, last_error, attempts, enqueued_at)
                 VALUES (?1, ?2, 0, ?3)",
            )?;
            let ts = format_timestamp(&enqueued_at);
            for failure in failures {
                stmt.execute(params![failure.blob_id, failure.reason, ts])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn pending_blob_deletions(&self, limit: usize, max_attempts: u32) -> Result<Vec<PendingBlobDeletion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, blob_id, last_error, attempts, enqueued_at
             FROM pending_blob_deletions
             WHERE attempts < ?1
             ORDER BY id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![max_attempts as i64, limit as i64], |row| {
            Ok(PendingBlobDeletion {
                id: row.get(0)?,
                blob_id: row.get(1)?,
                last_error: row.get(2)?,
                attempts: row.get::<_, i64>(3)? as u32,
                enqueued_at: parse_timestamp(4, row.get(4)?)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn complete_blob_deletions(&self, entry_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in entry_ids {
            tx.execute("DELETE FROM pending_blob_deletions WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn record_blob_deletion_failures(&self, failures: &[(i64, String)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (id, reason) in failures {
            tx.execute(
                "UPDATE pending_blob_deletions SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
                params![reason, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_database_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let config = MetadataConfig {
            db_path: dir.path().join("nested").join("vault.db").to_string_lossy().to_string(),
            ..MetadataConfig::default()
        };

        let store = SQLiteMetadataStore::open(&config).unwrap();
        assert_eq!(store.count_albums().unwrap(), 0);
        store.insert_album(&Album::new("Trip", None, false)).unwrap();
        drop(store);

        // Re-opening keeps the data and tolerates the existing schema
        let store = SQLiteMetadataStore::open(&config).unwrap();
        assert_eq!(store.count_albums().unwrap(), 1);
    }

    #[test]
    fn test_default_album_name_is_unique() {
        let store = SQLiteMetadataStore::open_in_memory().unwrap();
        store.insert_album(&Album::new(DEFAULT_ALBUM_NAME, None, false)).unwrap();
        assert!(store.insert_album(&Album::new(DEFAULT_ALBUM_NAME, None, false)).is_err());
        // Ordinary names may repeat
        store.insert_album(&Album::new("Trip", None, false)).unwrap();
        store.insert_album(&Album::new("Trip", None, false)).unwrap();
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn test_photo_for_unknown_album_violates_foreign_key() {
        let store = SQLiteMetadataStore::open_in_memory().unwrap();
        let blob = crate::storage::StoredBlob {
            blob_id: "b1".to_string(),
            url: "u".to_string(),
            thumbnail_url: None,
            width: 1,
            height: 1,
            size_bytes: 1,
            format: "png".to_string(),
        };
        let photo = Photo::from_blob(&blob, "no-such-album", None, now());
        let err = store.insert_photos(&[photo]).unwrap_err();
        assert_eq!(err.kind(), "repository");
        assert_eq!(store.count_photos().unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_dimensions_are_rejected_on_read() {
        let store = SQLiteMetadataStore::open_in_memory().unwrap();
        let album = Album::new("Trip", None, false);
        store.insert_album(&album).unwrap();
        let blob = crate::storage::StoredBlob {
            blob_id: "b1".to_string(),
            url: "u".to_string(),
            thumbnail_url: None,
            width: 1,
            height: 1,
            size_bytes: 1,
            format: "png".to_string(),
        };
        let photo = Photo::from_blob(&blob, &album.id, None, now());
        store.insert_photos(&[photo.clone()]).unwrap();

        store
            .conn()
            .unwrap()
            .execute("UPDATE photos SET width = ?1 WHERE id = ?2", params![i64::from(u32::MAX) + 1, photo.id])
            .unwrap();
        let err = store.get_photo(&photo.id).unwrap_err();
        assert_eq!(err.kind(), "repository");

        store
            .conn()
            .unwrap()
            .execute("UPDATE photos SET width = -1 WHERE id = ?1", params![photo.id])
            .unwrap();
        assert!(store.get_photo(&photo.id).is_err());
    }

    #[test]
    fn test_vault_lower_folds_unicode() {
        let store = SQLiteMetadataStore::open_in_memory().unwrap();
        let folded: String = store
            .conn()
            .unwrap()
            .query_row("SELECT vault_lower('ÉTÉ À PARIS')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(folded, "été à paris");
    }
}
