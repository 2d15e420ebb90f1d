/// In-memory store. Backs the tests and the standalone demo mode; mirrors
/// the Postgres implementation's serialization guarantees with a per-auction
/// mutex held for the whole read-validate-write sequence, and a single writer
/// lock over the balance map so debits/credits are locked read-modify-writes.
// region:    --- Imports
use crate::bidding::rules;
use crate::error::MarketError;
use crate::ledger;
use crate::marketplace::{
    Auction, AuctionBid, AuctionDraft, AuctionStatus, Delivery, Item, Lottery, LotteryDraft,
    LotteryTicketBatch, User,
};
use crate::settlement::{self, CancellationReport, Refund, SettlementReport};
use crate::store::MarketplaceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

// endregion: --- Imports

// region:    --- Memory Store

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<i64, User>>,
    items: RwLock<HashMap<i64, Item>>,
    auctions: RwLock<HashMap<i64, Auction>>,
    bids: RwLock<HashMap<i64, Vec<AuctionBid>>>,
    deliveries: RwLock<Vec<Delivery>>,
    lotteries: RwLock<HashMap<i64, Lottery>>,
    ticket_batches: RwLock<HashMap<i64, Vec<LotteryTicketBatch>>>,
    auction_locks: DashMap<i64, Arc<Mutex<()>>>,
    lottery_locks: DashMap<i64, Arc<Mutex<()>>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn auction_lock(&self, id: i64) -> Arc<Mutex<()>> {
        self.auction_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lottery_lock(&self, id: i64) -> Arc<Mutex<()>> {
        self.lottery_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Locked read-modify-write on one balance.
    async fn debit_user(&self, user_id: i64, amount: i64) -> Result<i64, MarketError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(MarketError::NotFound("user"))?;
        user.balance = ledger::apply_debit(user.balance, amount)?;
        Ok(user.balance)
    }

    async fn credit_user(&self, user_id: i64, amount: i64) -> Result<i64, MarketError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(MarketError::NotFound("user"))?;
        user.balance = ledger::apply_credit(user.balance, amount);
        Ok(user.balance)
    }
}

// endregion: --- Memory Store

// region:    --- MarketplaceStore Impl

#[async_trait]
impl MarketplaceStore for MemoryStore {
    async fn insert_user(&self, email: &str, balance: i64) -> Result<User, MarketError> {
        let user = User {
            id: self.next_id(),
            email: email.to_string(),
            balance,
        };
        self.users.write().await.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&self, id: i64) -> Result<User, MarketError> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MarketError::NotFound("user"))
    }

    async fn insert_item(&self, title: &str, owner_id: i64) -> Result<Item, MarketError> {
        let item = Item {
            id: self.next_id(),
            title: title.to_string(),
            owner_id,
        };
        self.items.write().await.insert(item.id, item.clone());
        Ok(item)
    }

    async fn item(&self, id: i64) -> Result<Item, MarketError> {
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MarketError::NotFound("item"))
    }

    async fn insert_auction(&self, draft: AuctionDraft) -> Result<Auction, MarketError> {
        let auction = Auction {
            id: self.next_id(),
            item_id: draft.item_id,
            owner_id: draft.owner_id,
            start_date: draft.start_date,
            end_date: draft.end_date,
            min_bid: draft.min_bid,
            min_increment: draft.min_increment,
            status: draft.status,
        };
        self.auctions
            .write()
            .await
            .insert(auction.id, auction.clone());
        Ok(auction)
    }

    async fn auction(&self, id: i64) -> Result<Auction, MarketError> {
        self.auctions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MarketError::NotFound("auction"))
    }

    async fn bids(&self, auction_id: i64) -> Result<Vec<AuctionBid>, MarketError> {
        Ok(self
            .bids
            .read()
            .await
            .get(&auction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn deliveries_for_item(&self, item_id: i64) -> Result<Vec<Delivery>, MarketError> {
        Ok(self
            .deliveries
            .read()
            .await
            .iter()
            .filter(|d| d.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn insert_lottery(&self, draft: LotteryDraft) -> Result<Lottery, MarketError> {
        let lottery = Lottery {
            id: self.next_id(),
            owner_id: draft.owner_id,
            ticket_price: draft.ticket_price,
            start_date: draft.start_date,
            end_date: draft.end_date,
            status: draft.status,
        };
        self.lotteries
            .write()
            .await
            .insert(lottery.id, lottery.clone());
        Ok(lottery)
    }

    async fn lottery(&self, id: i64) -> Result<Lottery, MarketError> {
        self.lotteries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MarketError::NotFound("lottery"))
    }

    async fn find_open_auction_for_item(
        &self,
        item_id: i64,
    ) -> Result<Option<Auction>, MarketError> {
        Ok(self
            .auctions
            .read()
            .await
            .values()
            .find(|a| a.item_id == item_id && !a.status.is_terminal())
            .cloned())
    }

    async fn pending_auctions(&self) -> Result<Vec<Auction>, MarketError> {
        Ok(self
            .auctions
            .read()
            .await
            .values()
            .filter(|a| !a.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn mark_started(&self, auction_id: i64) -> Result<bool, MarketError> {
        let lock = self.auction_lock(auction_id);
        let _guard = lock.lock().await;

        let mut auctions = self.auctions.write().await;
        let auction = auctions
            .get_mut(&auction_id)
            .ok_or(MarketError::NotFound("auction"))?;
        if auction.status != AuctionStatus::Created {
            return Ok(false);
        }
        auction.status = AuctionStatus::Started;
        Ok(true)
    }

    async fn place_bid(
        &self,
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<AuctionBid, MarketError> {
        // Per-auction serialization for the whole read-validate-write.
        let lock = self.auction_lock(auction_id);
        let _guard = lock.lock().await;

        let auction = self.auction(auction_id).await?;
        let existing = self.bids(auction_id).await?;
        let bidder = self.user(bidder_id).await?;

        rules::validate_bid(&auction, &existing, &bidder, amount, now)?;

        // Escrow: the full sum leaves the bidder's balance now and comes back
        // only at settlement or cancellation.
        self.debit_user(bidder_id, amount).await?;

        let bid = AuctionBid {
            id: self.next_id(),
            auction_id,
            user_id: bidder_id,
            sum: amount,
            bid_date: now,
        };
        self.bids
            .write()
            .await
            .entry(auction_id)
            .or_default()
            .push(bid.clone());
        Ok(bid)
    }

    async fn purchase_lottery_tickets(
        &self,
        lottery_id: i64,
        buyer_id: i64,
        ticket_count: i64,
        now: DateTime<Utc>,
    ) -> Result<LotteryTicketBatch, MarketError> {
        if ticket_count < 1 {
            return Err(MarketError::Validation(
                "ticket count must be at least 1".to_string(),
            ));
        }

        let lock = self.lottery_lock(lottery_id);
        let _guard = lock.lock().await;

        let lottery = self.lottery(lottery_id).await?;
        let buyer = self.user(buyer_id).await?;
        let cost = rules::validate_ticket_purchase(&lottery, &buyer, ticket_count, now)?;

        self.debit_user(buyer_id, cost).await?;

        let batch = LotteryTicketBatch {
            id: self.next_id(),
            lottery_id,
            user_id: buyer_id,
            ticket_count,
            sum: cost,
            bid_date: now,
        };
        self.ticket_batches
            .write()
            .await
            .entry(lottery_id)
            .or_default()
            .push(batch.clone());
        Ok(batch)
    }

    async fn settle(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementReport>, MarketError> {
        let lock = self.auction_lock(auction_id);
        let _guard = lock.lock().await;

        // Atomic claim: only one of EndJob / CancelJob / a replay gets past
        // this check while the mutex is held.
        let auction = self.auction(auction_id).await?;
        if auction.status.is_terminal() {
            return Ok(None);
        }

        let bids = self.bids(auction_id).await?;
        let plan = settlement::plan(&bids);

        let (status, delivery) = match &plan.winner {
            None => (AuctionStatus::Unsold, None),
            Some(winner) => {
                for credit in settlement::credit_order(auction.owner_id, winner.sum, &plan.refunds)
                {
                    self.credit_user(credit.user_id, credit.sum).await?;
                }
                let delivery = Delivery {
                    id: self.next_id(),
                    item_id: auction.item_id,
                    sender_id: auction.owner_id,
                    receiver_id: winner.user_id,
                    created_at: now,
                };
                self.deliveries.write().await.push(delivery.clone());
                (AuctionStatus::Sold, Some(delivery))
            }
        };

        let mut auctions = self.auctions.write().await;
        let stored = auctions
            .get_mut(&auction_id)
            .ok_or(MarketError::NotFound("auction"))?;
        stored.status = status;
        let auction = stored.clone();
        drop(auctions);

        info!(
            "{:<12} --> auction {} settled as {}",
            "Store",
            auction_id,
            status.as_str()
        );

        Ok(Some(SettlementReport {
            auction,
            winner: plan.winner,
            refunds: plan.refunds,
            delivery,
        }))
    }

    async fn cancel(&self, auction_id: i64) -> Result<CancellationReport, MarketError> {
        let lock = self.auction_lock(auction_id);
        let _guard = lock.lock().await;

        let auction = self.auction(auction_id).await?;
        if auction.status.is_terminal() {
            return Err(MarketError::Conflict("auction is already closed"));
        }

        // Every escrowed bid goes back to its bidder.
        let bids = self.bids(auction_id).await?;
        let mut refunds = Vec::with_capacity(bids.len());
        for bid in &bids {
            self.credit_user(bid.user_id, bid.sum).await?;
            refunds.push(Refund {
                user_id: bid.user_id,
                sum: bid.sum,
            });
        }

        let mut auctions = self.auctions.write().await;
        let stored = auctions
            .get_mut(&auction_id)
            .ok_or(MarketError::NotFound("auction"))?;
        stored.status = AuctionStatus::Cancelled;
        let auction = stored.clone();
        drop(auctions);

        info!("{:<12} --> auction {} cancelled", "Store", auction_id);

        Ok(CancellationReport { auction, refunds })
    }
}

// endregion: --- MarketplaceStore Impl
