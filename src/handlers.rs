// region:    --- Imports
use crate::bidding::commands::{
    handle_cancel_auction as command_cancel_auction,
    handle_create_auction as command_create_auction, handle_place_bid as command_place_bid,
    handle_purchase_tickets as command_purchase_tickets, CancelAuctionCommand,
    CreateAuctionCommand, PlaceBidCommand, PurchaseTicketsCommand,
};
use crate::bidding::rules;
use crate::error::MarketError;
use crate::marketplace::{Auction, AuctionBid, LotteryTicketBatch, User};
use crate::scheduler::AuctionScheduler;
use crate::store::MarketplaceStore;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- App State

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MarketplaceStore>,
    pub scheduler: AuctionScheduler,
}

/// Router over the marketplace commands and queries. Reused by the service
/// binary and the integration tests.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/bid", post(handle_bid))
        .route("/auctions", post(handle_create_auction))
        .route("/auctions/:id", get(handle_get_auction))
        .route("/auctions/:id/bids", get(handle_get_bids))
        .route("/auctions/:id/highest-bid", get(handle_get_highest_bid))
        .route("/auctions/:id/cancel", post(handle_cancel_auction))
        .route("/lottery/tickets", post(handle_purchase_tickets))
        .route("/users/:id", get(handle_get_user))
        .with_state(state)
}

// endregion: --- App State

// region:    --- Command Handlers

async fn handle_bid(
    State(state): State<AppState>,
    Json(cmd): Json<PlaceBidCommand>,
) -> Result<Json<AuctionBid>, MarketError> {
    info!("{:<12} --> bid request: {:?}", "Handler", cmd);
    let bid = command_place_bid(&*state.store, &**state.scheduler.clock(), cmd).await?;
    Ok(Json(bid))
}

async fn handle_create_auction(
    State(state): State<AppState>,
    Json(cmd): Json<CreateAuctionCommand>,
) -> Result<Json<Auction>, MarketError> {
    info!("{:<12} --> create auction request: {:?}", "Handler", cmd);
    let auction = command_create_auction(&*state.store, &state.scheduler, cmd).await?;
    Ok(Json(auction))
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    caller_id: i64,
}

async fn handle_cancel_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Auction>, MarketError> {
    info!(
        "{:<12} --> cancel request for auction {} by user {}",
        "Handler", auction_id, body.caller_id
    );
    let report = command_cancel_auction(
        &*state.store,
        &state.scheduler,
        CancelAuctionCommand {
            auction_id,
            caller_id: body.caller_id,
        },
    )
    .await?;
    Ok(Json(report.auction))
}

async fn handle_purchase_tickets(
    State(state): State<AppState>,
    Json(cmd): Json<PurchaseTicketsCommand>,
) -> Result<Json<LotteryTicketBatch>, MarketError> {
    info!("{:<12} --> ticket purchase request: {:?}", "Handler", cmd);
    let batch = command_purchase_tickets(&*state.store, &**state.scheduler.clock(), cmd).await?;
    Ok(Json(batch))
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

async fn handle_get_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Result<Json<Auction>, MarketError> {
    info!("{:<12} --> get auction id: {}", "HandlerQuery", auction_id);
    Ok(Json(state.store.auction(auction_id).await?))
}

async fn handle_get_bids(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Result<Json<Vec<AuctionBid>>, MarketError> {
    info!("{:<12} --> get bids id: {}", "HandlerQuery", auction_id);
    Ok(Json(state.store.bids(auction_id).await?))
}

async fn handle_get_highest_bid(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> Result<Json<Option<i64>>, MarketError> {
    info!(
        "{:<12} --> get highest bid id: {}",
        "HandlerQuery", auction_id
    );
    let bids = state.store.bids(auction_id).await?;
    Ok(Json(rules::highest_bid(&bids)))
}

async fn handle_get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, MarketError> {
    info!("{:<12} --> get user id: {}", "HandlerQuery", user_id);
    Ok(Json(state.store.user(user_id).await?))
}

// endregion: --- Query Handlers
