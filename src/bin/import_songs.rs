use anyhow::{Context, Result};
use clap::Parser;
use song_library::entry::Song;
use song_library::store::SqliteLibraryStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "import-songs")]
#[command(about = "Load the song catalog into the library database", long_about = None)]
struct Cli {
    /// Path to the library database file
    #[arg(short, long, env = "LIBRARY_DATABASE_PATH", default_value = "data/library.db")]
    database: PathBuf,

    /// JSON file holding an array of songs
    songs: PathBuf,

    /// Validate the file without writing to the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    let raw = tokio::fs::read_to_string(&cli.songs)
        .await
        .with_context(|| format!("Failed to read {}", cli.songs.display()))?;
    let songs: Vec<Song> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse songs from {}", cli.songs.display()))?;

    tracing::info!("Read {} songs from {}", songs.len(), cli.songs.display());

    if let Some(song) = songs.iter().find(|s| s.id.trim().is_empty()) {
        anyhow::bail!("Song '{}' has an empty id", song.title);
    }

    if cli.dry_run {
        tracing::info!("=== DRY RUN - No changes were made ===");
        return Ok(());
    }

    let store = SqliteLibraryStore::new(&cli.database)
        .await
        .context("Failed to open library database")?;

    for song in &songs {
        store
            .upsert_song(song)
            .await
            .with_context(|| format!("Failed to import song: {}", song.id))?;
        tracing::debug!("Imported song {} ({})", song.id, song.title);
    }

    store.close().await;
    tracing::info!("Imported {} songs into {}", songs.len(), cli.database.display());

    Ok(())
}
