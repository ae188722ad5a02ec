use anyhow::{Context, Result};
use clap::Parser;
use song_library::membership::LibraryMembership;
use song_library::server;
use song_library::store::SqliteLibraryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "song-library")]
#[command(about = "Song Library Server", long_about = None)]
struct Cli {
    /// Path to the library database file
    #[arg(short, long, env = "LIBRARY_DATABASE_PATH", default_value = "data/library.db")]
    database: PathBuf,

    /// Address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("song_library=debug,tower_http=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Song Library");
    tracing::info!("Database path: {}", cli.database.display());

    let store = SqliteLibraryStore::new(&cli.database)
        .await
        .context("Failed to open library database")?;

    let membership = LibraryMembership::new(Arc::new(store.clone()));
    let app = server::create_router(membership);
    let addr = format!("{}:{}", cli.host, cli.port);

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints (user taken from the {} header):", server::USER_ID_HEADER);
    tracing::info!("  GET    /library          - List library (?limit=&offset=)");
    tracing::info!("  GET    /library/count    - Count songs in library");
    tracing::info!("  GET    /library/:id      - Is song in library");
    tracing::info!("  POST   /library/:id      - Toggle song");
    tracing::info!("  PUT    /library/:id      - Add song");
    tracing::info!("  DELETE /library/:id      - Remove song");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return std::future::pending().await;
    }
    tracing::info!("Shutdown signal received");
}
