/// Marketplace commands:
/// 1. place a bid (escrow debit + bid persistence, one unit of work)
/// 2. create an auction (validations + timer registration)
/// 3. cancel an auction (owner only, refunds escrowed bids)
/// 4. purchase lottery tickets (the analogous escrow flow)
// region:    --- Imports
use crate::clock::Clock;
use crate::error::MarketError;
use crate::marketplace::{
    Auction, AuctionBid, AuctionDraft, AuctionStatus, LotteryTicketBatch, DEFAULT_MIN_INCREMENT,
};
use crate::scheduler::AuctionScheduler;
use crate::settlement::CancellationReport;
use crate::store::MarketplaceStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

// endregion: --- Imports

// region:    --- Commands

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaceBidCommand {
    pub auction_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateAuctionCommand {
    pub owner_id: i64,
    pub item_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub min_bid: Option<i64>,
    pub min_increment: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelAuctionCommand {
    pub auction_id: i64,
    pub caller_id: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PurchaseTicketsCommand {
    pub lottery_id: i64,
    pub buyer_id: i64,
    pub ticket_count: i64,
}

// endregion: --- Commands

// region:    --- Handlers

/// 1. Place a bid. The store runs the whole validate-debit-insert sequence
/// under the per-auction lock; a rejection aborts with no partial debit.
pub async fn handle_place_bid(
    store: &dyn MarketplaceStore,
    clock: &dyn Clock,
    cmd: PlaceBidCommand,
) -> Result<AuctionBid, MarketError> {
    info!("{:<12} --> place bid: {:?}", "Command", cmd);
    store
        .place_bid(cmd.auction_id, cmd.bidder_id, cmd.amount, clock.now())
        .await
}

/// 2. Create an auction and arm its lifecycle timers. A start date at or
/// before now is applied synchronously by the scheduler registration.
pub async fn handle_create_auction(
    store: &dyn MarketplaceStore,
    scheduler: &AuctionScheduler,
    cmd: CreateAuctionCommand,
) -> Result<Auction, MarketError> {
    info!("{:<12} --> create auction: {:?}", "Command", cmd);
    let now = scheduler.clock().now();

    let item = store.item(cmd.item_id).await?;
    if item.owner_id != cmd.owner_id {
        return Err(MarketError::Forbidden("only the item owner can auction it"));
    }
    if cmd.end_date <= cmd.start_date {
        return Err(MarketError::Validation(
            "end date must be after start date".to_string(),
        ));
    }
    if cmd.start_date < now {
        return Err(MarketError::Validation(
            "start date is in the past".to_string(),
        ));
    }
    let min_bid = cmd.min_bid.unwrap_or(0);
    let min_increment = cmd.min_increment.unwrap_or(DEFAULT_MIN_INCREMENT);
    // A negative floor or a non-positive step would let bids shrink the
    // escrow instead of growing it.
    if min_bid < 0 {
        return Err(MarketError::Validation(
            "min bid must not be negative".to_string(),
        ));
    }
    if min_increment < 1 {
        return Err(MarketError::Validation(
            "min increment must be at least 1".to_string(),
        ));
    }
    if store
        .find_open_auction_for_item(cmd.item_id)
        .await?
        .is_some()
    {
        return Err(MarketError::Conflict("item already has an active auction"));
    }

    let auction = store
        .insert_auction(AuctionDraft {
            item_id: cmd.item_id,
            owner_id: cmd.owner_id,
            start_date: cmd.start_date,
            end_date: cmd.end_date,
            min_bid,
            min_increment,
            status: AuctionStatus::Created,
        })
        .await?;

    scheduler.register(&auction).await?;

    // Registration may have flipped CREATED -> STARTED already.
    store.auction(auction.id).await
}

/// 3. Cancel an auction. Only the owner, and only before a terminal state;
/// every escrowed bid is refunded in the same transaction as the flip.
pub async fn handle_cancel_auction(
    store: &dyn MarketplaceStore,
    scheduler: &AuctionScheduler,
    cmd: CancelAuctionCommand,
) -> Result<CancellationReport, MarketError> {
    info!("{:<12} --> cancel auction: {:?}", "Command", cmd);

    let auction = store.auction(cmd.auction_id).await?;
    if auction.owner_id != cmd.caller_id {
        return Err(MarketError::Forbidden("only the auction owner can cancel"));
    }

    let report = store.cancel(cmd.auction_id).await?;
    scheduler.deregister(cmd.auction_id);
    Ok(report)
}

/// 4. Purchase lottery tickets: `ticket_count * ticket_price` is escrowed
/// exactly like a bid sum.
pub async fn handle_purchase_tickets(
    store: &dyn MarketplaceStore,
    clock: &dyn Clock,
    cmd: PurchaseTicketsCommand,
) -> Result<LotteryTicketBatch, MarketError> {
    info!("{:<12} --> purchase tickets: {:?}", "Command", cmd);
    store
        .purchase_lottery_tickets(cmd.lottery_id, cmd.buyer_id, cmd.ticket_count, clock.now())
        .await
}

// endregion: --- Handlers

// region:    --- Tests


// endregion: --- Tests
