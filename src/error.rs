use thiserror::Error;

pub const ALREADY_IN_LIBRARY: &str = "Song already in library";

/// Failures reported by a `LibraryStore`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The (user, song) pair already has an entry.
    #[error("Duplicate library entry for user {user_id} and song {song_id}")]
    DuplicateKey { user_id: String, song_id: String },

    /// The entry references a user or song the store does not know.
    #[error("Missing reference: {0}")]
    MissingReference(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// The entry changed state between being read and being saved.
    #[error("Entry {0} was modified concurrently")]
    StaleEntry(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors returned by `LibraryMembership` operations.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Song already in library")]
    Conflict,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for LibraryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { .. } | StoreError::StaleEntry(_) => LibraryError::Conflict,
            StoreError::MissingReference(what) => LibraryError::NotFound(what),
            other => LibraryError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_becomes_conflict() {
        let err = LibraryError::from(StoreError::DuplicateKey {
            user_id: "u1".to_string(),
            song_id: "s1".to_string(),
        });
        assert!(matches!(err, LibraryError::Conflict));
        assert_eq!(err.to_string(), "Song already in library");
    }

    #[test]
    fn test_stale_entry_becomes_conflict() {
        let err = LibraryError::from(StoreError::StaleEntry("e1".to_string()));
        assert!(matches!(err, LibraryError::Conflict));
    }

    #[test]
    fn test_missing_reference_becomes_not_found() {
        let err = LibraryError::from(StoreError::MissingReference("song s1".to_string()));
        assert!(matches!(err, LibraryError::NotFound(ref what) if what == "song s1"));
    }

    #[test]
    fn test_other_store_errors_pass_through() {
        let err = LibraryError::from(StoreError::Corrupt("bad timestamp".to_string()));
        assert!(matches!(err, LibraryError::Storage(StoreError::Corrupt(_))));
        assert_eq!(err.to_string(), "Corrupt record: bad timestamp");
    }
}
