// region:    --- Imports
use auction_market::clock::SystemClock;
use auction_market::handlers::{self, AppState};
use auction_market::notification::LoggingDispatcher;
use auction_market::scheduler::AuctionScheduler;
use auction_market::store::{MarketplaceStore, PostgresStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

// endregion: --- Imports

// region:    --- Main

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let pg = Arc::new(PostgresStore::from_env().await?);

    // Recreates the schema; restarts without it keep existing auctions so the
    // scheduler can re-arm their timers.
    if std::env::var("INIT_DB").is_ok() {
        pg.initialize_database().await?;
        info!("{:<12} --> database schema recreated", "Main");
    }

    let store: Arc<dyn MarketplaceStore> = pg;
    let scheduler = AuctionScheduler::new(
        Arc::clone(&store),
        Arc::new(LoggingDispatcher),
        Arc::new(SystemClock),
    );

    let rearmed = scheduler.rearm().await?;
    info!("{:<12} --> scheduler running, {} auction(s) armed", "Main", rearmed);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let routes_all = handlers::app(AppState { store, scheduler }).layer(cors);

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    axum::serve(listener, routes_all.into_make_service()).await?;
    Ok(())
}

// endregion: --- Main
