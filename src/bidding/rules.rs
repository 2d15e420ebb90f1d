/// Bid admissibility rules. Pure functions over an auction snapshot; the
/// stores run them inside their per-auction unit of work so the snapshot
/// cannot move under the check.
// region:    --- Imports
use crate::marketplace::{Auction, AuctionBid, AuctionStatus, Lottery, User};
use chrono::{DateTime, Utc};
use thiserror::Error;

// endregion: --- Imports

// region:    --- Rejections

/// Why a bid (or ticket purchase) was refused. Each variant maps to a stable
/// error code surfaced to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BidRejection {
    #[error("auction has not started yet")]
    NotStarted,
    #[error("auction has already ended")]
    Ended,
    #[error("amount must be a positive sum")]
    InvalidAmount,
    #[error("owners cannot bid on their own auction")]
    SelfBid,
    #[error("first bid must be at least {min}")]
    BelowMinimum { min: i64 },
    #[error("bid must be at least {required} to beat the current highest bid")]
    BelowIncrement { required: i64 },
    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientFunds { balance: i64, required: i64 },
}

impl BidRejection {
    pub fn code(&self) -> &'static str {
        match self {
            BidRejection::NotStarted => "NOT_STARTED",
            BidRejection::Ended => "ALREADY_ENDED",
            BidRejection::InvalidAmount => "INVALID_AMOUNT",
            BidRejection::SelfBid => "SELF_BID",
            BidRejection::BelowMinimum { .. } => "BELOW_MINIMUM",
            BidRejection::BelowIncrement { .. } => "BELOW_INCREMENT",
            BidRejection::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
        }
    }
}

// endregion: --- Rejections

// region:    --- Validation

/// Highest accepted bid sum, if any.
pub fn highest_bid(bids: &[AuctionBid]) -> Option<i64> {
    bids.iter().map(|b| b.sum).max()
}

/// Checks a candidate bid against the current auction snapshot.
/// Rules run in order; the first failure wins.
pub fn validate_bid(
    auction: &Auction,
    bids: &[AuctionBid],
    bidder: &User,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<(), BidRejection> {
    check_window(auction.status, auction.start_date, auction.end_date, now)?;

    // A non-positive sum would turn the escrow debit into a credit.
    if amount <= 0 {
        return Err(BidRejection::InvalidAmount);
    }

    if bidder.id == auction.owner_id {
        return Err(BidRejection::SelfBid);
    }

    match highest_bid(bids) {
        None => {
            if amount < auction.min_bid {
                return Err(BidRejection::BelowMinimum {
                    min: auction.min_bid,
                });
            }
        }
        Some(highest) => {
            let required = highest + auction.min_increment;
            if amount < required {
                return Err(BidRejection::BelowIncrement { required });
            }
        }
    }

    if bidder.balance < amount {
        return Err(BidRejection::InsufficientFunds {
            balance: bidder.balance,
            required: amount,
        });
    }

    Ok(())
}

/// Ticket purchases share the window and affordability rules; there is no
/// increment ladder, the cost is simply `ticket_count * ticket_price`.
pub fn validate_ticket_purchase(
    lottery: &Lottery,
    buyer: &User,
    ticket_count: i64,
    now: DateTime<Utc>,
) -> Result<i64, BidRejection> {
    check_window(lottery.status, lottery.start_date, lottery.end_date, now)?;

    // Overflow on the multiply would wrap negative and debit a credit.
    let cost = ticket_count
        .checked_mul(lottery.ticket_price)
        .filter(|cost| *cost > 0)
        .ok_or(BidRejection::InvalidAmount)?;
    if buyer.balance < cost {
        return Err(BidRejection::InsufficientFunds {
            balance: buyer.balance,
            required: cost,
        });
    }
    Ok(cost)
}

fn check_window(
    status: AuctionStatus,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), BidRejection> {
    match status {
        AuctionStatus::Created => Err(BidRejection::NotStarted),
        AuctionStatus::Started if now < start => Err(BidRejection::NotStarted),
        // A bid that loses the race against the end timer is rejected here,
        // never silently dropped.
        AuctionStatus::Started if now > end => Err(BidRejection::Ended),
        AuctionStatus::Started => Ok(()),
        AuctionStatus::Sold | AuctionStatus::Unsold | AuctionStatus::Cancelled => {
            Err(BidRejection::Ended)
        }
    }
}

// endregion: --- Validation

// region:    --- Tests


// endregion: --- Tests
