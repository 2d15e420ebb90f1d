/// Storage seam for the marketplace core. The composite operations
/// (`place_bid`, `settle`, `cancel`, `purchase_lottery_tickets`) are atomic
/// units of work: each implementation serializes them per auction (row-level
/// `FOR UPDATE` locks in Postgres, a per-auction mutex in memory) so that a
/// placement racing a settlement, or two placements racing the same increment
/// boundary, resolve deterministically.
// region:    --- Imports
use crate::error::MarketError;
use crate::marketplace::{
    Auction, AuctionBid, AuctionDraft, Delivery, Item, Lottery, LotteryDraft, LotteryTicketBatch,
    User,
};
use crate::settlement::{CancellationReport, SettlementReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// endregion: --- Imports

// region:    --- Modules
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

// endregion: --- Modules

// region:    --- Store Trait

#[async_trait]
pub trait MarketplaceStore: Send + Sync + 'static {
    // -- entities
    async fn insert_user(&self, email: &str, balance: i64) -> Result<User, MarketError>;
    async fn user(&self, id: i64) -> Result<User, MarketError>;
    async fn insert_item(&self, title: &str, owner_id: i64) -> Result<Item, MarketError>;
    async fn item(&self, id: i64) -> Result<Item, MarketError>;
    async fn insert_auction(&self, draft: AuctionDraft) -> Result<Auction, MarketError>;
    async fn auction(&self, id: i64) -> Result<Auction, MarketError>;
    async fn bids(&self, auction_id: i64) -> Result<Vec<AuctionBid>, MarketError>;
    async fn deliveries_for_item(&self, item_id: i64) -> Result<Vec<Delivery>, MarketError>;
    async fn insert_lottery(&self, draft: LotteryDraft) -> Result<Lottery, MarketError>;
    async fn lottery(&self, id: i64) -> Result<Lottery, MarketError>;

    // -- filtered reads
    /// Active (non-terminal) auction for an item, if one exists. At most one
    /// may exist at a time.
    async fn find_open_auction_for_item(&self, item_id: i64)
        -> Result<Option<Auction>, MarketError>;
    /// Auctions the scheduler must re-arm after a restart.
    async fn pending_auctions(&self) -> Result<Vec<Auction>, MarketError>;

    // -- lifecycle transitions
    /// Conditional `Created -> Started` flip. Returns false when the auction
    /// was not in `Created` (duplicate timer fire, cancelled meanwhile).
    async fn mark_started(&self, auction_id: i64) -> Result<bool, MarketError>;

    /// Atomic unit of work: load the auction and its bids under the
    /// per-auction lock, validate, debit the bidder (escrow), persist the bid.
    /// Any rejection aborts with no partial debit.
    async fn place_bid(
        &self,
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<AuctionBid, MarketError>;

    /// Same escrow pattern for lotteries: debit `ticket_count * ticket_price`
    /// and persist the batch.
    async fn purchase_lottery_tickets(
        &self,
        lottery_id: i64,
        buyer_id: i64,
        ticket_count: i64,
        now: DateTime<Utc>,
    ) -> Result<LotteryTicketBatch, MarketError>;

    /// End-of-auction settlement. Claims the terminal status atomically;
    /// returns `Ok(None)` when the claim is lost (already settled or
    /// cancelled), so duplicate timer firings and restart replays are no-ops.
    /// On a win the seller credit, the per-bid refunds and the delivery row
    /// land in the same transaction as the status flip.
    async fn settle(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementReport>, MarketError>;

    /// Owner-initiated cancellation. Claims `Created|Started -> Cancelled`
    /// and refunds every escrowed bid atomically; `Conflict` when the auction
    /// is already terminal.
    async fn cancel(&self, auction_id: i64) -> Result<CancellationReport, MarketError>;
}

// endregion: --- Store Trait
