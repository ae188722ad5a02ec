use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// A user's relationship to one song. Removal only clears `is_active`,
/// so the row doubles as the membership history for the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub user_id: String,
    pub song_id: String,
    pub added_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the caller when an entry is first created.
/// The store assigns the id and the audit timestamps.
#[derive(Debug, Clone)]
pub struct NewLibraryEntry {
    pub user_id: String,
    pub song_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

/// An active entry together with the song it points at.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryItem {
    #[serde(flatten)]
    pub entry: LibraryEntry,
    pub song: Option<Song>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub user_id: String,
    pub song_id: Option<String>,
    pub is_active: Option<bool>,
}

impl EntryFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn active(mut self) -> Self {
        self.is_active = Some(true);
        self
    }

    pub fn with_song(mut self, song_id: impl Into<String>) -> Self {
        self.song_id = Some(song_id.into());
        self
    }

    pub fn matches(&self, entry: &LibraryEntry) -> bool {
        entry.user_id == self.user_id
            && self.song_id.as_ref().is_none_or(|s| *s == entry.song_id)
            && self.is_active.is_none_or(|a| a == entry.is_active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Every entry, no pagination.
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToggleOutcome {
    pub added: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddOutcome {
    pub added: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoveOutcome {
    pub removed: bool,
    pub message: String,
}
