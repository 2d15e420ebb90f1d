/// Settlement plan computation. Pure: the stores apply the resulting ledger
/// movements atomically after winning the status claim.
// region:    --- Imports
use crate::marketplace::{Auction, AuctionBid, Delivery};
use serde::Serialize;

// endregion: --- Imports

// region:    --- Plan

/// A single escrow return: one entry per losing bid, not per bidder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refund {
    pub user_id: i64,
    pub sum: i64,
}

#[derive(Debug, Clone)]
pub struct SettlementPlan {
    /// Highest bid, absent when the auction received none.
    pub winner: Option<AuctionBid>,
    /// Every escrowed bid except the winning one, including the winner's own
    /// earlier raises (outbid sums are never returned before settlement).
    pub refunds: Vec<Refund>,
}

/// Computes the settlement plan from the authoritative bid list.
pub fn plan(bids: &[AuctionBid]) -> SettlementPlan {
    let winner = bids.iter().max_by_key(|b| b.sum).cloned();

    let refunds = match &winner {
        None => Vec::new(),
        Some(w) => bids
            .iter()
            .filter(|b| b.id != w.id)
            .map(|b| Refund {
                user_id: b.user_id,
                sum: b.sum,
            })
            .collect(),
    };

    SettlementPlan { winner, refunds }
}

/// All credits of a won settlement (seller proceeds plus refunds) in
/// ascending user id, so concurrent settlements sharing bidders take their
/// user-row locks in the same order.
pub fn credit_order(owner_id: i64, winner_sum: i64, refunds: &[Refund]) -> Vec<Refund> {
    let mut credits = Vec::with_capacity(refunds.len() + 1);
    credits.push(Refund {
        user_id: owner_id,
        sum: winner_sum,
    });
    credits.extend(refunds.iter().cloned());
    credits.sort_by_key(|c| c.user_id);
    credits
}

// endregion: --- Plan

// region:    --- Reports

/// Outcome of a committed settlement, used to drive notifications after the
/// transaction is durable.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub auction: Auction,
    pub winner: Option<AuctionBid>,
    pub refunds: Vec<Refund>,
    pub delivery: Option<Delivery>,
}

/// Outcome of a committed cancellation.
#[derive(Debug, Clone)]
pub struct CancellationReport {
    pub auction: Auction,
    pub refunds: Vec<Refund>,
}

// endregion: --- Reports

// region:    --- Tests


// endregion: --- Tests
