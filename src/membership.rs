//! Per-user song library membership
//!
//! Each (user, song) pair moves between three states: no entry yet, active
//! and inactive. The first add creates the entry, every later change flips
//! `is_active` on that same row. Uniqueness of the pair is left entirely to
//! the store, and every flip is saved only if the entry is still in the state
//! it was read in. A create or a flip that loses a race comes back as
//! `LibraryError::Conflict`.

use crate::entry::{
    AddOutcome, EntryFilter, LibraryEntry, LibraryItem, NewLibraryEntry, Page, RemoveOutcome,
    ToggleOutcome,
};
use crate::error::{ALREADY_IN_LIBRARY, Result};
use crate::store::LibraryStore;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;

const ADDED: &str = "Song added to library";
const REMOVED: &str = "Song removed from library";
const NOT_IN_LIBRARY: &str = "Song not in library";

#[derive(Clone)]
pub struct LibraryMembership {
    store: Arc<dyn LibraryStore>,
}

impl LibraryMembership {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    /// Flip the pair between in and out of the library, creating the entry
    /// on first use.
    pub async fn toggle(&self, user_id: &str, song_id: &str) -> Result<ToggleOutcome> {
        tracing::debug!("Toggling song {} for user {}", song_id, user_id);

        let added = match self.store.find_one(user_id, song_id).await? {
            None => {
                self.create(user_id, song_id).await?;
                true
            }
            Some(entry) if entry.is_active => {
                self.deactivate(entry).await?;
                false
            }
            Some(entry) => {
                self.activate(entry).await?;
                true
            }
        };

        Ok(ToggleOutcome {
            added,
            message: if added { ADDED } else { REMOVED }.to_string(),
        })
    }

    /// Put the song in the library. Adding a song that is already there is a no-op.
    pub async fn add(&self, user_id: &str, song_id: &str) -> Result<AddOutcome> {
        tracing::debug!("Adding song {} for user {}", song_id, user_id);

        let added = match self.store.find_one(user_id, song_id).await? {
            None => {
                self.create(user_id, song_id).await?;
                true
            }
            Some(entry) if entry.is_active => false,
            Some(entry) => {
                self.activate(entry).await?;
                true
            }
        };

        Ok(AddOutcome {
            added,
            message: if added { ADDED } else { ALREADY_IN_LIBRARY }.to_string(),
        })
    }

    /// Take the song out of the library. Never fails on a song that isn't in it.
    pub async fn remove(&self, user_id: &str, song_id: &str) -> Result<RemoveOutcome> {
        tracing::debug!("Removing song {} for user {}", song_id, user_id);

        match self.store.find_one(user_id, song_id).await? {
            Some(entry) if entry.is_active => {
                self.deactivate(entry).await?;
                Ok(RemoveOutcome {
                    removed: true,
                    message: REMOVED.to_string(),
                })
            }
            _ => Ok(RemoveOutcome {
                removed: false,
                message: NOT_IN_LIBRARY.to_string(),
            }),
        }
    }

    pub async fn is_member(&self, user_id: &str, song_id: &str) -> Result<bool> {
        let entry = self.store.find_one(user_id, song_id).await?;
        Ok(entry.is_some_and(|e| e.is_active))
    }

    /// Active entries with their songs, most recently added first
    pub async fn list_library(&self, user_id: &str, page: Page) -> Result<Vec<LibraryItem>> {
        let entries = self
            .store
            .find(
                &EntryFilter::for_user(user_id).active(),
                page.limit,
                page.offset,
            )
            .await?;

        let song_ids: Vec<String> = entries.iter().map(|e| e.song_id.clone()).collect();
        let mut songs = self.store.find_songs(&song_ids).await?;

        tracing::debug!(
            "Listing {} entries for user {} (limit {}, offset {})",
            entries.len(),
            user_id,
            page.limit,
            page.offset
        );

        Ok(entries
            .into_iter()
            .map(|entry| {
                // A song may appear once per user, so each lookup is taken at most once
                let song = songs.remove(&entry.song_id);
                LibraryItem { entry, song }
            })
            .collect())
    }

    pub async fn count(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .store
            .count(&EntryFilter::for_user(user_id).active())
            .await?)
    }

    async fn create(&self, user_id: &str, song_id: &str) -> Result<LibraryEntry> {
        let result = self
            .store
            .insert(NewLibraryEntry {
                user_id: user_id.to_string(),
                song_id: song_id.to_string(),
                added_at: now(),
            })
            .await;

        match result {
            Ok(entry) => {
                tracing::info!("Created library entry {} for user {}", entry.id, user_id);
                Ok(entry)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to create entry for user {} and song {}: {}",
                    user_id,
                    song_id,
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn activate(&self, mut entry: LibraryEntry) -> Result<LibraryEntry> {
        entry.is_active = true;
        entry.added_at = next_added_at(entry.added_at);
        let saved = self.store.save(&entry, false).await?;
        tracing::info!("Re-added song {} for user {}", saved.song_id, saved.user_id);
        Ok(saved)
    }

    async fn deactivate(&self, mut entry: LibraryEntry) -> Result<LibraryEntry> {
        entry.is_active = false;
        let saved = self.store.save(&entry, true).await?;
        tracing::info!("Removed song {} for user {}", saved.song_id, saved.user_id);
        Ok(saved)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// `added_at` for a reactivation: the current time, or one microsecond past
/// the previous value if the clock hasn't moved beyond it.
fn next_added_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
