use super::{LibraryStore, StoreResult};
use crate::entry::{EntryFilter, LibraryEntry, NewLibraryEntry, Song};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    entries: Vec<LibraryEntry>,
    songs: HashMap<String, Song>,
}

/// Process-local store with the same uniqueness guarantees as the SQLite one.
/// Every operation runs under one lock acquisition.
#[derive(Clone, Default)]
pub struct InMemoryLibraryStore {
    inner: Arc<RwLock<Inner>>,
    check_songs: bool,
}

impl InMemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts for songs that were not registered with `add_song`.
    pub fn with_song_checks(mut self) -> Self {
        self.check_songs = true;
        self
    }

    pub async fn add_song(&self, song: Song) {
        self.inner.write().await.songs.insert(song.id.clone(), song);
    }

    /// Number of rows stored for the pair, active or not.
    pub async fn entries_for(&self, user_id: &str, song_id: &str) -> usize {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && e.song_id == song_id)
            .count()
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    async fn find_one(&self, user_id: &str, song_id: &str) -> StoreResult<Option<LibraryEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.user_id == user_id && e.song_id == song_id)
            .cloned())
    }

    async fn insert(&self, new: NewLibraryEntry) -> StoreResult<LibraryEntry> {
        let mut inner = self.inner.write().await;

        if inner
            .entries
            .iter()
            .any(|e| e.user_id == new.user_id && e.song_id == new.song_id)
        {
            return Err(StoreError::DuplicateKey {
                user_id: new.user_id,
                song_id: new.song_id,
            });
        }

        if self.check_songs && !inner.songs.contains_key(&new.song_id) {
            return Err(StoreError::MissingReference(format!("song {}", new.song_id)));
        }

        let now = Utc::now().trunc_subsecs(6);
        let entry = LibraryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            song_id: new.song_id,
            added_at: new.added_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    async fn save(&self, entry: &LibraryEntry, was_active: bool) -> StoreResult<LibraryEntry> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .entries
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| StoreError::EntryNotFound(entry.id.clone()))?;

        if stored.is_active != was_active {
            return Err(StoreError::StaleEntry(entry.id.clone()));
        }

        stored.is_active = entry.is_active;
        stored.added_at = entry.added_at;
        stored.updated_at = Utc::now().trunc_subsecs(6);
        Ok(stored.clone())
    }

    async fn find(
        &self,
        filter: &EntryFilter,
        limit: usize,
        skip: usize,
    ) -> StoreResult<Vec<LibraryEntry>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<LibraryEntry> = inner
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.added_at.cmp(&a.added_at).then_with(|| a.id.cmp(&b.id)));

        Ok(matching.into_iter().skip(skip).take(limit).collect())
    }

    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.entries.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn find_songs(&self, song_ids: &[String]) -> StoreResult<HashMap<String, Song>> {
        let inner = self.inner.read().await;
        Ok(song_ids
            .iter()
            .filter_map(|id| inner.songs.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(user: &str, song: &str) -> NewLibraryEntry {
        NewLibraryEntry {
            user_id: user.to_string(),
            song_id: song.to_string(),
            added_at: Utc::now().trunc_subsecs(6),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_pair() {
        let store = InMemoryLibraryStore::new();
        store.insert(new_entry("u1", "s1")).await.unwrap();

        let err = store.insert(new_entry("u1", "s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(store.entries_for("u1", "s1").await, 1);

        // Same song for another user is a different pair
        store.insert(new_entry("u2", "s1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_song_checks() {
        let store = InMemoryLibraryStore::new().with_song_checks();
        let err = store.insert(new_entry("u1", "missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));

        store
            .add_song(Song {
                id: "s1".to_string(),
                title: "Title".to_string(),
                artist: "Artist".to_string(),
                album: None,
                duration_secs: None,
            })
            .await;
        store.insert(new_entry("u1", "s1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_unknown_entry() {
        let store = InMemoryLibraryStore::new();
        let mut entry = store.insert(new_entry("u1", "s1")).await.unwrap();
        entry.id = "nope".to_string();
        let err = store.save(&entry, true).await.unwrap_err();
        assert!(matches!(err, StoreError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn test_save_rejects_stale_state() {
        let store = InMemoryLibraryStore::new();
        let mut entry = store.insert(new_entry("u1", "s1")).await.unwrap();
        entry.is_active = false;
        store.save(&entry, true).await.unwrap();

        // Second writer still believes the entry is active
        let err = store.save(&entry, true).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleEntry(_)));
    }

    #[tokio::test]
    async fn test_find_breaks_ties_by_id() {
        let store = InMemoryLibraryStore::new();
        let added_at = Utc::now().trunc_subsecs(6);
        for song in ["s1", "s2", "s3"] {
            store
                .insert(NewLibraryEntry {
                    user_id: "u1".to_string(),
                    song_id: song.to_string(),
                    added_at,
                })
                .await
                .unwrap();
        }

        let found = store
            .find(&EntryFilter::for_user("u1"), usize::MAX, 0)
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
