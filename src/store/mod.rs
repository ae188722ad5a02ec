//! Storage backends for library entries
//!
//! `LibraryStore` is the seam between the membership logic and whatever
//! persists entries. Implementations must enforce uniqueness of the
//! (user, song) pair and report a violation as `StoreError::DuplicateKey`.

pub mod memory;
pub mod sqlite;

use crate::entry::{EntryFilter, LibraryEntry, NewLibraryEntry, Song};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;

pub use memory::InMemoryLibraryStore;
pub use sqlite::SqliteLibraryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Returns the entry for the pair, active or not.
    async fn find_one(&self, user_id: &str, song_id: &str) -> StoreResult<Option<LibraryEntry>>;

    /// Creates a new entry in the active state.
    /// Fails with `DuplicateKey` if the pair already has an entry.
    async fn insert(&self, entry: NewLibraryEntry) -> StoreResult<LibraryEntry>;

    /// Persists `is_active` and `added_at` of an existing entry in a single write,
    /// provided the stored `is_active` still equals `was_active`.
    /// Fails with `StaleEntry` if another writer flipped it first.
    /// Returns the entry as stored, with `updated_at` refreshed.
    async fn save(&self, entry: &LibraryEntry, was_active: bool) -> StoreResult<LibraryEntry>;

    /// Matching entries, most recently added first (ties broken by id).
    async fn find(
        &self,
        filter: &EntryFilter,
        limit: usize,
        skip: usize,
    ) -> StoreResult<Vec<LibraryEntry>>;

    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64>;

    /// Looks up songs by id. Unknown ids are left out of the map.
    async fn find_songs(&self, song_ids: &[String]) -> StoreResult<HashMap<String, Song>>;
}
