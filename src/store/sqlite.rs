use super::{LibraryStore, StoreResult};
use crate::entry::{EntryFilter, LibraryEntry, NewLibraryEntry, Song};
use crate::error::StoreError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

const ENTRY_COLUMNS: &str = "id, user_id, song_id, added_at, is_active, created_at, updated_at";

type EntryRow = (String, String, String, i64, bool, i64, i64);
type SongRow = (String, String, String, Option<String>, Option<i64>);

/// Library entries persisted in SQLite. The `UNIQUE(user_id, song_id)`
/// constraint is what keeps racing first inserts down to a single row.
#[derive(Debug, Clone)]
pub struct SqliteLibraryStore {
    pool: SqlitePool,
}

impl SqliteLibraryStore {
    /// Open (or create) the library database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        tracing::debug!("Connecting to library database: {}", connection_string);

        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to library database at: {}",
                    db_path.display()
                )
            })?;

        let store = Self { pool };
        store.initialize().await?;

        tracing::info!("Library database initialized: {}", db_path.display());
        Ok(store)
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS songs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT,
                duration_secs INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create songs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS library_entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                song_id TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, song_id),
                FOREIGN KEY (song_id) REFERENCES songs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create library_entries table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_library_entries_user_active
            ON library_entries(user_id, is_active, added_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index")?;

        Ok(())
    }

    /// Insert or replace a song in the catalog
    pub async fn upsert_song(&self, song: &Song) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO songs (id, title, artist, album, duration_secs)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                duration_secs = excluded.duration_secs
            "#,
        )
        .bind(&song.id)
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.album)
        .bind(song.duration_secs.map(|d| d as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close the connection pool. Pending queries finish first.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Library database closed");
    }
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(value: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", value)))
}

fn entry_from_row(row: EntryRow) -> StoreResult<LibraryEntry> {
    let (id, user_id, song_id, added_at, is_active, created_at, updated_at) = row;
    Ok(LibraryEntry {
        id,
        user_id,
        song_id,
        added_at: from_micros(added_at)?,
        is_active,
        created_at: from_micros(created_at)?,
        updated_at: from_micros(updated_at)?,
    })
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EntryFilter) {
    qb.push(" WHERE user_id = ");
    qb.push_bind(filter.user_id.clone());
    if let Some(song_id) = &filter.song_id {
        qb.push(" AND song_id = ");
        qb.push_bind(song_id.clone());
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND is_active = ");
        qb.push_bind(is_active);
    }
}

/// Map constraint failures onto typed store errors
fn classify_insert_error(err: sqlx::Error, new: &NewLibraryEntry) -> StoreError {
    let violation = err
        .as_database_error()
        .map(|db| (db.is_unique_violation(), db.is_foreign_key_violation()));

    match violation {
        Some((true, _)) => StoreError::DuplicateKey {
            user_id: new.user_id.clone(),
            song_id: new.song_id.clone(),
        },
        Some((_, true)) => StoreError::MissingReference(format!("song {}", new.song_id)),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl LibraryStore for SqliteLibraryStore {
    async fn find_one(&self, user_id: &str, song_id: &str) -> StoreResult<Option<LibraryEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM library_entries WHERE user_id = ? AND song_id = ?",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn insert(&self, new: NewLibraryEntry) -> StoreResult<LibraryEntry> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = micros(Utc::now().trunc_subsecs(6));

        let result = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            INSERT INTO library_entries ({})
            VALUES (?, ?, ?, ?, 1, ?, ?)
            RETURNING {}
            "#,
            ENTRY_COLUMNS, ENTRY_COLUMNS
        ))
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.song_id)
        .bind(micros(new.added_at))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => entry_from_row(row),
            Err(e) => Err(classify_insert_error(e, &new)),
        }
    }

    async fn save(&self, entry: &LibraryEntry, was_active: bool) -> StoreResult<LibraryEntry> {
        let now = micros(Utc::now().trunc_subsecs(6));

        let row = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            UPDATE library_entries
            SET is_active = ?, added_at = ?, updated_at = ?
            WHERE id = ? AND is_active = ?
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(entry.is_active)
        .bind(micros(entry.added_at))
        .bind(now)
        .bind(&entry.id)
        .bind(was_active)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return entry_from_row(row);
        }

        // Nothing matched: tell a vanished row apart from a lost race
        let exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM library_entries WHERE id = ?")
                .bind(&entry.id)
                .fetch_one(&self.pool)
                .await?;

        if exists == 0 {
            Err(StoreError::EntryNotFound(entry.id.clone()))
        } else {
            Err(StoreError::StaleEntry(entry.id.clone()))
        }
    }

    async fn find(
        &self,
        filter: &EntryFilter,
        limit: usize,
        skip: usize,
    ) -> StoreResult<Vec<LibraryEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM library_entries",
            ENTRY_COLUMNS
        ));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY added_at DESC, id");
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(skip).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<EntryRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM library_entries");
        push_filter(&mut qb, filter);

        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn find_songs(&self, song_ids: &[String]) -> StoreResult<HashMap<String, Song>> {
        if song_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, title, artist, album, duration_secs FROM songs WHERE id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in song_ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let rows = qb.build_query_as::<SongRow>().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, artist, album, duration_secs)| {
                let song = Song {
                    id: id.clone(),
                    title,
                    artist,
                    album,
                    duration_secs: duration_secs.map(|d| d as u64),
                };
                (id, song)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn song(id: &str) -> Song {
        Song {
            id: id.to_string(),
            title: format!("Title {}", id),
            artist: "Artist".to_string(),
            album: Some("Album".to_string()),
            duration_secs: Some(180),
        }
    }

    fn new_entry(user: &str, song: &str, added_at: DateTime<Utc>) -> NewLibraryEntry {
        NewLibraryEntry {
            user_id: user.to_string(),
            song_id: song.to_string(),
            added_at,
        }
    }

    async fn open_store(dir: &tempfile::TempDir) -> SqliteLibraryStore {
        let store = SqliteLibraryStore::new(dir.path().join("library.db"))
            .await
            .unwrap();
        for id in ["s1", "s2", "s3"] {
            store.upsert_song(&song(id)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_and_find_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let added_at = Utc::now().trunc_subsecs(6);

        let created = store.insert(new_entry("u1", "s1", added_at)).await.unwrap();
        assert!(created.is_active);
        assert_eq!(created.added_at, added_at);

        let found = store.find_one("u1", "s1").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(store.find_one("u1", "s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let now = Utc::now().trunc_subsecs(6);

        store.insert(new_entry("u1", "s1", now)).await.unwrap();
        let err = store.insert(new_entry("u1", "s1", now)).await.unwrap_err();
        match err {
            StoreError::DuplicateKey { user_id, song_id } => {
                assert_eq!(user_id, "u1");
                assert_eq!(song_id, "s1");
            }
            other => panic!("expected DuplicateKey, got {:?}", other),
        }

        let total = store
            .count(&EntryFilter::for_user("u1").with_song("s1"))
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_unknown_song_is_missing_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .insert(new_entry("u1", "ghost", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));
    }

    #[tokio::test]
    async fn test_save_updates_state_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let now = Utc::now().trunc_subsecs(6);

        let mut entry = store.insert(new_entry("u1", "s1", now)).await.unwrap();
        entry.is_active = false;
        let saved = store.save(&entry, true).await.unwrap();
        assert!(!saved.is_active);
        assert_eq!(saved.added_at, now);
        assert_eq!(saved.id, entry.id);
        assert!(saved.updated_at >= entry.created_at);

        let reloaded = store.find_one("u1", "s1").await.unwrap().unwrap();
        assert!(!reloaded.is_active);

        // A writer that read the entry while it was still active loses
        assert!(matches!(
            store.save(&entry, true).await.unwrap_err(),
            StoreError::StaleEntry(_)
        ));

        entry.id = "missing".to_string();
        assert!(matches!(
            store.save(&entry, false).await.unwrap_err(),
            StoreError::EntryNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_find_filters_sorts_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let base = Utc::now().trunc_subsecs(6);

        store.insert(new_entry("u1", "s1", base)).await.unwrap();
        store
            .insert(new_entry("u1", "s2", base + Duration::seconds(1)))
            .await
            .unwrap();
        let mut third = store
            .insert(new_entry("u1", "s3", base + Duration::seconds(2)))
            .await
            .unwrap();
        store.insert(new_entry("u2", "s1", base)).await.unwrap();

        third.is_active = false;
        store.save(&third, true).await.unwrap();

        let active = EntryFilter::for_user("u1").active();
        let all = store.find(&active, usize::MAX, 0).await.unwrap();
        let songs: Vec<&str> = all.iter().map(|e| e.song_id.as_str()).collect();
        assert_eq!(songs, vec!["s2", "s1"]);

        let second_page = store.find(&active, 1, 1).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].song_id, "s1");

        assert_eq!(store.count(&active).await.unwrap(), 2);
        assert_eq!(store.count(&EntryFilter::for_user("u1")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_find_songs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let songs = store
            .find_songs(&["s1".to_string(), "s3".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(songs["s1"], song("s1"));
        assert!(store.find_songs(&[]).await.unwrap().is_empty());
    }
}
