/// Postgres-backed store. Per-auction serialization uses row-level locks:
/// every composite operation opens a transaction and takes `SELECT ... FOR
/// UPDATE` on the auction row before reading the bid set, so concurrent
/// placements and settlement on the same auction queue up behind each other.
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
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- Row Mapping

fn status_from_row(row: &PgRow) -> Result<AuctionStatus, sqlx::Error> {
    let raw: String = row.try_get("status")?;
    AuctionStatus::parse(&raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown status: {raw}").into()))
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        balance: row.try_get("balance")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        owner_id: row.try_get("owner_id")?,
    })
}

fn auction_from_row(row: &PgRow) -> Result<Auction, sqlx::Error> {
    Ok(Auction {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        owner_id: row.try_get("owner_id")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        min_bid: row.try_get("min_bid")?,
        min_increment: row.try_get("min_increment")?,
        status: status_from_row(row)?,
    })
}

fn bid_from_row(row: &PgRow) -> Result<AuctionBid, sqlx::Error> {
    Ok(AuctionBid {
        id: row.try_get("id")?,
        auction_id: row.try_get("auction_id")?,
        user_id: row.try_get("user_id")?,
        sum: row.try_get("sum")?,
        bid_date: row.try_get("bid_date")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, sqlx::Error> {
    Ok(Delivery {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn lottery_from_row(row: &PgRow) -> Result<Lottery, sqlx::Error> {
    Ok(Lottery {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        ticket_price: row.try_get("ticket_price")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        status: status_from_row(row)?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<LotteryTicketBatch, sqlx::Error> {
    Ok(LotteryTicketBatch {
        id: row.try_get("id")?,
        lottery_id: row.try_get("lottery_id")?,
        user_id: row.try_get("user_id")?,
        ticket_count: row.try_get("ticket_count")?,
        sum: row.try_get("sum")?,
        bid_date: row.try_get("bid_date")?,
    })
}

// endregion: --- Row Mapping

// region:    --- Postgres Store

pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn from_env() -> Result<Self, sqlx::Error> {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        Self::connect(&database_url).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Recreates the schema from the bundled SQL files.
    pub async fn initialize_database(&self) -> Result<(), sqlx::Error> {
        let recreate_sql = include_str!("../sql/00-recreate-db.sql");
        self.execute_multi_query(recreate_sql).await?;

        let schema_sql = include_str!("../sql/01-create-schema.sql");
        self.execute_multi_query(schema_sql).await?;

        Ok(())
    }

    async fn execute_multi_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        for query in sql.split(';') {
            let query = query.trim();
            if !query.is_empty() {
                sqlx::query(query).execute(&*self.pool).await?;
            }
        }
        Ok(())
    }

    /// Runs `f` inside a transaction, committing on Ok and rolling back on
    /// Err, so a failure mid-settlement leaves no partial state.
    async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::Transaction<'_, sqlx::Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'c>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        let result = f(&mut tx).await;
        match result {
            Ok(r) => {
                tx.commit().await?;
                Ok(r)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}

// endregion: --- Postgres Store

// region:    --- MarketplaceStore Impl

#[async_trait]
impl MarketplaceStore for PostgresStore {
    async fn insert_user(&self, email: &str, balance: i64) -> Result<User, MarketError> {
        let row = sqlx::query(
            "INSERT INTO users (email, balance) VALUES ($1, $2) RETURNING id, email, balance",
        )
        .bind(email)
        .bind(balance)
        .fetch_one(&*self.pool)
        .await?;
        Ok(user_from_row(&row)?)
    }

    async fn user(&self, id: i64) -> Result<User, MarketError> {
        let row = sqlx::query("SELECT id, email, balance FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(MarketError::NotFound("user"))?;
        Ok(user_from_row(&row)?)
    }

    async fn insert_item(&self, title: &str, owner_id: i64) -> Result<Item, MarketError> {
        let row = sqlx::query(
            "INSERT INTO items (title, owner_id) VALUES ($1, $2) RETURNING id, title, owner_id",
        )
        .bind(title)
        .bind(owner_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(item_from_row(&row)?)
    }

    async fn item(&self, id: i64) -> Result<Item, MarketError> {
        let row = sqlx::query("SELECT id, title, owner_id FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(MarketError::NotFound("item"))?;
        Ok(item_from_row(&row)?)
    }

    async fn insert_auction(&self, draft: AuctionDraft) -> Result<Auction, MarketError> {
        let row = sqlx::query(
            "INSERT INTO auctions (item_id, owner_id, start_date, end_date, min_bid, min_increment, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(draft.item_id)
        .bind(draft.owner_id)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(draft.min_bid)
        .bind(draft.min_increment)
        .bind(draft.status.as_str())
        .fetch_one(&*self.pool)
        .await?;
        Ok(auction_from_row(&row)?)
    }

    async fn auction(&self, id: i64) -> Result<Auction, MarketError> {
        let row = sqlx::query("SELECT * FROM auctions WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(MarketError::NotFound("auction"))?;
        Ok(auction_from_row(&row)?)
    }

    async fn bids(&self, auction_id: i64) -> Result<Vec<AuctionBid>, MarketError> {
        let rows =
            sqlx::query("SELECT * FROM auction_bids WHERE auction_id = $1 ORDER BY id")
                .bind(auction_id)
                .fetch_all(&*self.pool)
                .await?;
        rows.iter()
            .map(|r| bid_from_row(r).map_err(MarketError::from))
            .collect()
    }

    async fn deliveries_for_item(&self, item_id: i64) -> Result<Vec<Delivery>, MarketError> {
        let rows = sqlx::query("SELECT * FROM deliveries WHERE item_id = $1 ORDER BY id")
            .bind(item_id)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter()
            .map(|r| delivery_from_row(r).map_err(MarketError::from))
            .collect()
    }

    async fn insert_lottery(&self, draft: LotteryDraft) -> Result<Lottery, MarketError> {
        let row = sqlx::query(
            "INSERT INTO lotteries (owner_id, ticket_price, start_date, end_date, status)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(draft.owner_id)
        .bind(draft.ticket_price)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(draft.status.as_str())
        .fetch_one(&*self.pool)
        .await?;
        Ok(lottery_from_row(&row)?)
    }

    async fn lottery(&self, id: i64) -> Result<Lottery, MarketError> {
        let row = sqlx::query("SELECT * FROM lotteries WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(MarketError::NotFound("lottery"))?;
        Ok(lottery_from_row(&row)?)
    }

    async fn find_open_auction_for_item(
        &self,
        item_id: i64,
    ) -> Result<Option<Auction>, MarketError> {
        let row = sqlx::query(
            "SELECT * FROM auctions
             WHERE item_id = $1 AND status IN ('CREATED', 'STARTED')
             LIMIT 1",
        )
        .bind(item_id)
        .fetch_optional(&*self.pool)
        .await?;
        row.map(|r| auction_from_row(&r).map_err(MarketError::from))
            .transpose()
    }

    async fn pending_auctions(&self) -> Result<Vec<Auction>, MarketError> {
        let rows =
            sqlx::query("SELECT * FROM auctions WHERE status IN ('CREATED', 'STARTED') ORDER BY id")
                .fetch_all(&*self.pool)
                .await?;
        rows.iter()
            .map(|r| auction_from_row(r).map_err(MarketError::from))
            .collect()
    }

    async fn mark_started(&self, auction_id: i64) -> Result<bool, MarketError> {
        // Conditional flip; a duplicate timer fire or a cancel that won the
        // race simply affects zero rows.
        let result =
            sqlx::query("UPDATE auctions SET status = 'STARTED' WHERE id = $1 AND status = 'CREATED'")
                .bind(auction_id)
                .execute(&*self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn place_bid(
        &self,
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<AuctionBid, MarketError> {
        self.transaction(move |tx| {
            Box::pin(async move {
                // Lock the auction row for the whole validate-debit-insert
                // sequence.
                let row = sqlx::query("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
                    .bind(auction_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(MarketError::NotFound("auction"))?;
                let auction = auction_from_row(&row)?;

                let bid_rows =
                    sqlx::query("SELECT * FROM auction_bids WHERE auction_id = $1 ORDER BY id")
                        .bind(auction_id)
                        .fetch_all(&mut **tx)
                        .await?;
                let existing = bid_rows
                    .iter()
                    .map(bid_from_row)
                    .collect::<Result<Vec<_>, _>>()?;

                let user_row = sqlx::query("SELECT * FROM users WHERE id = $1 FOR UPDATE")
                    .bind(bidder_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(MarketError::NotFound("user"))?;
                let bidder = user_from_row(&user_row)?;

                rules::validate_bid(&auction, &existing, &bidder, amount, now)?;

                ledger::debit(tx, bidder_id, amount).await?;

                let row = sqlx::query(
                    "INSERT INTO auction_bids (auction_id, user_id, sum, bid_date)
                     VALUES ($1, $2, $3, $4)
                     RETURNING *",
                )
                .bind(auction_id)
                .bind(bidder_id)
                .bind(amount)
                .bind(now)
                .fetch_one(&mut **tx)
                .await?;
                Ok(bid_from_row(&row)?)
            })
        })
        .await
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

        self.transaction(move |tx| {
            Box::pin(async move {
                let row = sqlx::query("SELECT * FROM lotteries WHERE id = $1 FOR UPDATE")
                    .bind(lottery_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(MarketError::NotFound("lottery"))?;
                let lottery = lottery_from_row(&row)?;

                let user_row = sqlx::query("SELECT * FROM users WHERE id = $1 FOR UPDATE")
                    .bind(buyer_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(MarketError::NotFound("user"))?;
                let buyer = user_from_row(&user_row)?;

                let cost = rules::validate_ticket_purchase(&lottery, &buyer, ticket_count, now)?;

                ledger::debit(tx, buyer_id, cost).await?;

                let row = sqlx::query(
                    "INSERT INTO lottery_ticket_batches (lottery_id, user_id, ticket_count, sum, bid_date)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING *",
                )
                .bind(lottery_id)
                .bind(buyer_id)
                .bind(ticket_count)
                .bind(cost)
                .bind(now)
                .fetch_one(&mut **tx)
                .await?;
                Ok(batch_from_row(&row)?)
            })
        })
        .await
    }

    async fn settle(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementReport>, MarketError> {
        let report = self
            .transaction(move |tx| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or(MarketError::NotFound("auction"))?;
                    let mut auction = auction_from_row(&row)?;

                    // Claim lost: already settled or cancelled. Replays and
                    // duplicate timer fires end up here.
                    if auction.status.is_terminal() {
                        return Ok::<_, MarketError>(None);
                    }

                    let bid_rows =
                        sqlx::query("SELECT * FROM auction_bids WHERE auction_id = $1 ORDER BY id")
                            .bind(auction_id)
                            .fetch_all(&mut **tx)
                            .await?;
                    let bids = bid_rows
                        .iter()
                        .map(bid_from_row)
                        .collect::<Result<Vec<_>, _>>()?;

                    let plan = settlement::plan(&bids);

                    let delivery = match &plan.winner {
                        None => {
                            auction.status = AuctionStatus::Unsold;
                            None
                        }
                        Some(winner) => {
                            // Ascending user id keeps the row-lock order
                            // consistent across settlements sharing bidders.
                            for credit in
                                settlement::credit_order(auction.owner_id, winner.sum, &plan.refunds)
                            {
                                ledger::credit(tx, credit.user_id, credit.sum).await?;
                            }
                            let row = sqlx::query(
                                "INSERT INTO deliveries (item_id, sender_id, receiver_id, created_at)
                                 VALUES ($1, $2, $3, $4)
                                 RETURNING *",
                            )
                            .bind(auction.item_id)
                            .bind(auction.owner_id)
                            .bind(winner.user_id)
                            .bind(now)
                            .fetch_one(&mut **tx)
                            .await?;
                            auction.status = AuctionStatus::Sold;
                            Some(delivery_from_row(&row)?)
                        }
                    };

                    sqlx::query("UPDATE auctions SET status = $1 WHERE id = $2")
                        .bind(auction.status.as_str())
                        .bind(auction_id)
                        .execute(&mut **tx)
                        .await?;

                    Ok(Some(SettlementReport {
                        auction,
                        winner: plan.winner,
                        refunds: plan.refunds,
                        delivery,
                    }))
                })
            })
            .await?;

        if let Some(report) = &report {
            info!(
                "{:<12} --> auction {} settled as {}",
                "Store",
                auction_id,
                report.auction.status.as_str()
            );
        }
        Ok(report)
    }

    async fn cancel(&self, auction_id: i64) -> Result<CancellationReport, MarketError> {
        let report = self
            .transaction(move |tx| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or(MarketError::NotFound("auction"))?;
                    let mut auction = auction_from_row(&row)?;

                    if auction.status.is_terminal() {
                        return Err(MarketError::Conflict("auction is already closed"));
                    }

                    let bid_rows =
                        sqlx::query("SELECT * FROM auction_bids WHERE auction_id = $1 ORDER BY id")
                            .bind(auction_id)
                            .fetch_all(&mut **tx)
                            .await?;
                    let bids = bid_rows
                        .iter()
                        .map(bid_from_row)
                        .collect::<Result<Vec<_>, _>>()?;

                    let refunds: Vec<Refund> = bids
                        .iter()
                        .map(|bid| Refund {
                            user_id: bid.user_id,
                            sum: bid.sum,
                        })
                        .collect();
                    // Same row-lock order as settlement.
                    let mut credits = refunds.clone();
                    credits.sort_by_key(|r| r.user_id);
                    for credit in &credits {
                        ledger::credit(tx, credit.user_id, credit.sum).await?;
                    }

                    sqlx::query("UPDATE auctions SET status = 'CANCELLED' WHERE id = $1")
                        .bind(auction_id)
                        .execute(&mut **tx)
                        .await?;
                    auction.status = AuctionStatus::Cancelled;

                    Ok(CancellationReport { auction, refunds })
                })
            })
            .await?;

        info!("{:<12} --> auction {} cancelled", "Store", auction_id);
        Ok(report)
    }
}

// endregion: --- MarketplaceStore Impl
