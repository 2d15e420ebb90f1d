use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest bid step applied when an auction does not set its own increment.
/// Money is carried as i64 in minor currency units, so this is "0.01".
pub const DEFAULT_MIN_INCREMENT: i64 = 1;

// region:    --- Users & Items

/// Marketplace account. The balance is mutated only through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
}

// endregion: --- Users & Items

// region:    --- Auctions

/// Auction lifecycle states. `Sold`, `Unsold` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    Created,
    Started,
    Sold,
    Unsold,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Created => "CREATED",
            AuctionStatus::Started => "STARTED",
            AuctionStatus::Sold => "SOLD",
            AuctionStatus::Unsold => "UNSOLD",
            AuctionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(AuctionStatus::Created),
            "STARTED" => Some(AuctionStatus::Started),
            "SOLD" => Some(AuctionStatus::Sold),
            "UNSOLD" => Some(AuctionStatus::Unsold),
            "CANCELLED" => Some(AuctionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuctionStatus::Sold | AuctionStatus::Unsold | AuctionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: i64,
    pub item_id: i64,
    pub owner_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub min_bid: i64,
    pub min_increment: i64,
    pub status: AuctionStatus,
}

/// Insert payload for a new auction. Defaults for the optional fields are
/// resolved before the draft is built.
#[derive(Debug, Clone)]
pub struct AuctionDraft {
    pub item_id: i64,
    pub owner_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub min_bid: i64,
    pub min_increment: i64,
    pub status: AuctionStatus,
}

/// An accepted bid. Immutable once created; the sum has already been debited
/// from the bidder's balance (escrow) and moves again only at settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionBid {
    pub id: i64,
    pub auction_id: i64,
    pub user_id: i64,
    pub sum: i64,
    pub bid_date: DateTime<Utc>,
}

// endregion: --- Auctions

// region:    --- Deliveries

/// Created by settlement when an auction sells; links winner, seller and item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i64,
    pub item_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub created_at: DateTime<Utc>,
}

// endregion: --- Deliveries

// region:    --- Lotteries

/// Ticketed lottery. Ticket purchases follow the same escrow pattern as bids:
/// `ticket_count * ticket_price` is debited at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lottery {
    pub id: i64,
    pub owner_id: i64,
    pub ticket_price: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: AuctionStatus,
}

#[derive(Debug, Clone)]
pub struct LotteryDraft {
    pub owner_id: i64,
    pub ticket_price: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: AuctionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryTicketBatch {
    pub id: i64,
    pub lottery_id: i64,
    pub user_id: i64,
    pub ticket_count: i64,
    pub sum: i64,
    pub bid_date: DateTime<Utc>,
}

// endregion: --- Lotteries
