/// Auction lifecycle scheduler. One set of timer tasks per auction
/// (start / reminder / end), armed at creation and re-armed at boot from the
/// persisted status. The end job drives settlement through the store's atomic
/// status claim, so a duplicate fire, a restart replay, or a race with a
/// manual cancel produces exactly one terminal state and one set of ledger
/// movements. Notifications go out only after the settlement transaction has
/// committed.
// region:    --- Imports
use crate::clock::Clock;
use crate::error::MarketError;
use crate::marketplace::{Auction, AuctionStatus};
use crate::notification::NotificationDispatcher;
use crate::settlement::SettlementReport;
use crate::store::MarketplaceStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// endregion: --- Imports

// region:    --- Auction Scheduler

/// Attempts for a failed settlement; the status claim makes retrying safe.
const SETTLE_ATTEMPTS: u32 = 3;
const SETTLE_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct AuctionScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MarketplaceStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    reminder_lead: ChronoDuration,
    timers: DashMap<i64, Vec<JoinHandle<()>>>,
}

#[derive(Clone, Copy)]
enum Job {
    Start,
    Reminder,
    End,
}

impl AuctionScheduler {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_reminder_lead(store, dispatcher, clock, ChronoDuration::hours(1))
    }

    pub fn with_reminder_lead(
        store: Arc<dyn MarketplaceStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        reminder_lead: ChronoDuration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                clock,
                reminder_lead,
                timers: DashMap::new(),
            }),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Re-arms timers for every non-terminal auction. Called once at boot;
    /// settlement idempotency makes replaying overdue end jobs safe.
    pub async fn rearm(&self) -> Result<usize, MarketError> {
        let pending = self.inner.store.pending_auctions().await?;
        let count = pending.len();
        for auction in &pending {
            self.register(auction).await?;
        }
        info!("{:<12} --> re-armed {} auction(s)", "Scheduler", count);
        Ok(count)
    }

    /// Registers the start/reminder/end jobs for one auction. A start date
    /// already in the past is applied synchronously instead of via timer.
    pub async fn register(&self, auction: &Auction) -> Result<(), MarketError> {
        if auction.status.is_terminal() {
            return Ok(());
        }

        let now = self.inner.clock.now();
        let mut handles = Vec::new();

        if auction.status == AuctionStatus::Created {
            if auction.start_date <= now {
                self.inner.store.mark_started(auction.id).await?;
            } else {
                handles.push(self.spawn_at(auction.start_date, auction.id, Job::Start));
            }
        }

        let reminder_at = auction.end_date - self.inner.reminder_lead;
        if reminder_at > now {
            handles.push(self.spawn_at(reminder_at, auction.id, Job::Reminder));
        }

        handles.push(self.spawn_at(auction.end_date, auction.id, Job::End));

        // A re-register (e.g. rearm over a live auction) must not leave the
        // displaced timers armed.
        if let Some(displaced) = self.inner.timers.insert(auction.id, handles) {
            for handle in displaced {
                handle.abort();
            }
        }
        debug!(
            "{:<12} --> timers armed for auction {}",
            "Scheduler", auction.id
        );
        Ok(())
    }

    /// Drops the pending timers for an auction (cancel path). A job already
    /// inside its committed transaction is not interrupted; only future
    /// firings are prevented.
    pub fn deregister(&self, auction_id: i64) {
        if let Some((_, handles)) = self.inner.timers.remove(&auction_id) {
            for handle in handles {
                handle.abort();
            }
            debug!(
                "{:<12} --> timers dropped for auction {}",
                "Scheduler", auction_id
            );
        }
    }

    fn spawn_at(&self, at: DateTime<Utc>, auction_id: i64, job: Job) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let delay = (at - inner.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            match job {
                Job::Start => inner.run_start_job(auction_id).await,
                Job::Reminder => inner.run_reminder_job(auction_id).await,
                Job::End => inner.run_end_job(auction_id).await,
            }
        })
    }
}

// endregion: --- Auction Scheduler

// region:    --- Jobs

impl Inner {
    async fn run_start_job(&self, auction_id: i64) {
        match self.store.mark_started(auction_id).await {
            Ok(true) => info!("{:<12} --> auction {} started", "Scheduler", auction_id),
            Ok(false) => debug!(
                "{:<12} --> start skipped for auction {} (not in CREATED)",
                "Scheduler", auction_id
            ),
            Err(e) => error!(
                "{:<12} --> start job failed for auction {}: {:?}",
                "Scheduler", auction_id, e
            ),
        }
    }

    /// Informational only: one reminder per distinct bidder. Failures are
    /// logged, never retried, and never block the other jobs.
    async fn run_reminder_job(&self, auction_id: i64) {
        let auction = match self.store.auction(auction_id).await {
            Ok(a) => a,
            Err(e) => {
                error!(
                    "{:<12} --> reminder load failed for auction {}: {:?}",
                    "Scheduler", auction_id, e
                );
                return;
            }
        };
        if auction.status != AuctionStatus::Started {
            return;
        }

        let bids = match self.store.bids(auction_id).await {
            Ok(b) => b,
            Err(e) => {
                error!(
                    "{:<12} --> reminder bids load failed for auction {}: {:?}",
                    "Scheduler", auction_id, e
                );
                return;
            }
        };

        let remaining = auction.end_date - self.clock.now();
        let mut bidder_ids: Vec<i64> = bids.iter().map(|b| b.user_id).collect();
        bidder_ids.sort_unstable();
        bidder_ids.dedup();

        for bidder_id in bidder_ids {
            if let Ok(user) = self.store.user(bidder_id).await {
                self.dispatcher
                    .auction_reminder(&user.email, &auction, remaining)
                    .await;
            }
        }
    }

    /// EndJob: settlement with a bounded retry. The store's status claim
    /// guarantees at most one ledger movement set no matter how often this
    /// fires.
    async fn run_end_job(&self, auction_id: i64) {
        for attempt in 1..=SETTLE_ATTEMPTS {
            match self.store.settle(auction_id, self.clock.now()).await {
                Ok(Some(report)) => {
                    self.dispatch_settlement(&report).await;
                    break;
                }
                Ok(None) => {
                    debug!(
                        "{:<12} --> auction {} already terminal, end job skipped",
                        "Scheduler", auction_id
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        "{:<12} --> settlement attempt {}/{} failed for auction {}: {:?}",
                        "Scheduler", attempt, SETTLE_ATTEMPTS, auction_id, e
                    );
                    if attempt < SETTLE_ATTEMPTS {
                        tokio::time::sleep(SETTLE_RETRY_BACKOFF).await;
                    } else {
                        error!(
                            "{:<12} --> giving up settlement for auction {}",
                            "Scheduler", auction_id
                        );
                    }
                }
            }
        }
        self.timers.remove(&auction_id);
    }

    /// Notifications run strictly after the settlement commit; a dispatcher
    /// outage cannot leave an auction stuck.
    async fn dispatch_settlement(&self, report: &SettlementReport) {
        let auction = &report.auction;

        match &report.winner {
            None => {
                if let Ok(owner) = self.store.user(auction.owner_id).await {
                    self.dispatcher.auction_no_bids(&owner.email, auction).await;
                }
            }
            Some(winner) => {
                if let Ok(user) = self.store.user(winner.user_id).await {
                    self.dispatcher
                        .auction_won(&user.email, auction, winner.sum)
                        .await;
                }

                // One lost-notification per losing bidder, carrying their
                // highest bid; the per-bid refunds already happened inside
                // the settlement transaction.
                let mut losers: BTreeMap<i64, i64> = BTreeMap::new();
                for refund in &report.refunds {
                    if refund.user_id == winner.user_id {
                        continue;
                    }
                    let best = losers.entry(refund.user_id).or_insert(refund.sum);
                    *best = (*best).max(refund.sum);
                }
                for (user_id, sum) in losers {
                    if let Ok(user) = self.store.user(user_id).await {
                        self.dispatcher
                            .auction_lost(&user.email, auction, sum)
                            .await;
                    }
                }

                if let Ok(owner) = self.store.user(auction.owner_id).await {
                    self.dispatcher
                        .auction_sold(&owner.email, auction, winner.sum)
                        .await;
                }
            }
        }
    }
}

// endregion: --- Jobs
