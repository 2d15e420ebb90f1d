/// Outbound notification seam. Fire-and-forget from the scheduler's point of
/// view: implementations handle and log their own failures, settlement never
/// waits on or rolls back for a dispatch problem.
// region:    --- Imports
use crate::marketplace::Auction;
use async_trait::async_trait;
use chrono::Duration;
use tracing::info;

// endregion: --- Imports

// region:    --- Dispatcher Trait

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn auction_reminder(&self, email: &str, auction: &Auction, time_remaining: Duration);
    async fn auction_won(&self, email: &str, auction: &Auction, winning_sum: i64);
    async fn auction_lost(&self, email: &str, auction: &Auction, your_sum: i64);
    async fn auction_sold(&self, email: &str, auction: &Auction, sold_price: i64);
    async fn auction_no_bids(&self, email: &str, auction: &Auction);
}

// endregion: --- Dispatcher Trait

// region:    --- Logging Dispatcher

/// Default dispatcher: writes each message to the log. Stands in for the
/// external email service.
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn auction_reminder(&self, email: &str, auction: &Auction, time_remaining: Duration) {
        info!(
            "{:<12} --> reminder to {}: auction {} ends in {}s",
            "Notify",
            email,
            auction.id,
            time_remaining.num_seconds()
        );
    }

    async fn auction_won(&self, email: &str, auction: &Auction, winning_sum: i64) {
        info!(
            "{:<12} --> won to {}: auction {} at {}",
            "Notify", email, auction.id, winning_sum
        );
    }

    async fn auction_lost(&self, email: &str, auction: &Auction, your_sum: i64) {
        info!(
            "{:<12} --> lost to {}: auction {}, your bid {}",
            "Notify", email, auction.id, your_sum
        );
    }

    async fn auction_sold(&self, email: &str, auction: &Auction, sold_price: i64) {
        info!(
            "{:<12} --> sold to {}: auction {} at {}",
            "Notify", email, auction.id, sold_price
        );
    }

    async fn auction_no_bids(&self, email: &str, auction: &Auction) {
        info!(
            "{:<12} --> no bids to {}: auction {}",
            "Notify", email, auction.id
        );
    }
}

// endregion: --- Logging Dispatcher
