use async_trait::async_trait;
use auction_market::clock::SystemClock;
use auction_market::handlers::{app, AppState};
use auction_market::marketplace::{
    Auction, AuctionDraft, AuctionStatus, Item, Lottery, LotteryDraft, User,
};
use auction_market::notification::NotificationDispatcher;
use auction_market::scheduler::AuctionScheduler;
use auction_market::store::{MarketplaceStore, MemoryStore};
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

/// Tracing setup; repeated calls across tests are fine.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Dispatcher that records every message so tests can assert on the
/// notification set.
#[derive(Default)]
struct RecordingDispatcher {
    events: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn count_with_prefix(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn contains(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn auction_reminder(&self, email: &str, _auction: &Auction, _remaining: Duration) {
        self.push(format!("reminder:{email}"));
    }
    async fn auction_won(&self, email: &str, _auction: &Auction, sum: i64) {
        self.push(format!("won:{email}:{sum}"));
    }
    async fn auction_lost(&self, email: &str, _auction: &Auction, sum: i64) {
        self.push(format!("lost:{email}:{sum}"));
    }
    async fn auction_sold(&self, email: &str, _auction: &Auction, sum: i64) {
        self.push(format!("sold:{email}:{sum}"));
    }
    async fn auction_no_bids(&self, email: &str, _auction: &Auction) {
        self.push(format!("no_bids:{email}"));
    }
}

/// One marketplace instance per test: in-memory store, scheduler with a short
/// reminder lead, and the HTTP surface on an ephemeral port.
struct Market {
    store: Arc<MemoryStore>,
    scheduler: AuctionScheduler,
    dispatcher: Arc<RecordingDispatcher>,
    client: Client,
    base: String,
}

async fn setup(reminder_lead: Duration) -> Market {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn MarketplaceStore> = store.clone();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = AuctionScheduler::with_reminder_lead(
        Arc::clone(&dyn_store),
        dispatcher.clone(),
        Arc::new(SystemClock),
        reminder_lead,
    );

    let router = app(AppState {
        store: dyn_store,
        scheduler: scheduler.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });

    Market {
        store,
        scheduler,
        dispatcher,
        client: Client::new(),
        base: format!("http://{addr}"),
    }
}

async fn seed_user(market: &Market, email: &str, balance: i64) -> User {
    market.store.insert_user(email, balance).await.unwrap()
}

async fn seed_item(market: &Market, owner: &User) -> Item {
    market
        .store
        .insert_item("test item", owner.id)
        .await
        .unwrap()
}

/// Inserts an auction that is already running, the common fixture for bid
/// tests.
async fn seed_started_auction(
    market: &Market,
    owner: &User,
    item: &Item,
    min_bid: i64,
    min_increment: i64,
    ends_in: Duration,
) -> Auction {
    market
        .store
        .insert_auction(AuctionDraft {
            item_id: item.id,
            owner_id: owner.id,
            start_date: Utc::now() - Duration::hours(1),
            end_date: Utc::now() + ends_in,
            min_bid,
            min_increment,
            status: AuctionStatus::Started,
        })
        .await
        .unwrap()
}

async fn seed_started_lottery(market: &Market, owner: &User, ticket_price: i64) -> Lottery {
    market
        .store
        .insert_lottery(LotteryDraft {
            owner_id: owner.id,
            ticket_price,
            start_date: Utc::now() - Duration::hours(1),
            end_date: Utc::now() + Duration::hours(1),
            status: AuctionStatus::Started,
        })
        .await
        .unwrap()
}

async fn post_bid(market: &Market, auction_id: i64, bidder_id: i64, amount: i64) -> (StatusCode, Value) {
    let response = market
        .client
        .post(format!("{}/bid", market.base))
        .json(&json!({
            "auction_id": auction_id,
            "bidder_id": bidder_id,
            "amount": amount
        }))
        .send()
        .await
        .expect("Failed to send request");
    let status = response.status();
    let body: Value = response.json().await.unwrap();
    (status, body)
}

async fn balance_of(market: &Market, user_id: i64) -> i64 {
    market.store.user(user_id).await.unwrap().balance
}

#[tokio::test]
async fn test_bid_is_escrowed_immediately() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let bidder = seed_user(&market, "alice@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;
    let auction =
        seed_started_auction(&market, &seller, &item, 100, 10, Duration::hours(2)).await;

    let (status, body) = post_bid(&market, auction.id, bidder.id, 150).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sum"], 150);

    // The sum left the balance at bid time, not at settlement.
    assert_eq!(balance_of(&market, bidder.id).await, 850);

    let highest: Option<i64> = market
        .client
        .get(format!("{}/auctions/{}/highest-bid", market.base, auction.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(highest, Some(150));
}

#[tokio::test]
async fn test_increment_ladder_over_http() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let alice = seed_user(&market, "alice@test.local", 1_000).await;
    let bob = seed_user(&market, "bob@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;
    let auction =
        seed_started_auction(&market, &seller, &item, 100, 10, Duration::hours(2)).await;

    let (status, _) = post_bid(&market, auction.id, alice.id, 100).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_bid(&market, auction.id, bob.id, 105).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BELOW_INCREMENT");

    let (status, _) = post_bid(&market, auction.id, bob.id, 110).await;
    assert_eq!(status, StatusCode::OK);

    let bids = market.store.bids(auction.id).await.unwrap();
    assert_eq!(bids.len(), 2);
    // the rejected bid debited nothing
    assert_eq!(balance_of(&market, bob.id).await, 890);
}

#[tokio::test]
async fn test_insufficient_funds_leaves_balance_untouched() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let broke = seed_user(&market, "broke@test.local", 50).await;
    let item = seed_item(&market, &seller).await;
    let auction = seed_started_auction(&market, &seller, &item, 0, 1, Duration::hours(2)).await;

    let (status, body) = post_bid(&market, auction.id, broke.id, 60).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");
    assert_eq!(balance_of(&market, broke.id).await, 50);
}

#[tokio::test]
async fn test_owner_cannot_bid_on_own_auction() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 1_000_000).await;
    let item = seed_item(&market, &seller).await;
    let auction = seed_started_auction(&market, &seller, &item, 0, 1, Duration::hours(2)).await;

    let (status, body) = post_bid(&market, auction.id, seller.id, 500).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "SELF_BID");
}

#[tokio::test]
async fn test_create_auction_validations() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let other = seed_user(&market, "other@test.local", 0).await;
    let item = seed_item(&market, &seller).await;

    let create = |owner_id: i64, start: Duration, end: Duration| {
        let market = &market;
        let item_id = item.id;
        async move {
            let response = market
                .client
                .post(format!("{}/auctions", market.base))
                .json(&json!({
                    "owner_id": owner_id,
                    "item_id": item_id,
                    "start_date": Utc::now() + start,
                    "end_date": Utc::now() + end,
                    "min_bid": 100,
                    "min_increment": 10
                }))
                .send()
                .await
                .unwrap();
            let status = response.status();
            let body: Value = response.json().await.unwrap();
            (status, body)
        }
    };

    // non-owner of the item
    let (status, body) = create(other.id, Duration::hours(1), Duration::hours(2)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    // end before start
    let (status, _) = create(seller.id, Duration::hours(2), Duration::hours(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // start in the past
    let (status, _) = create(seller.id, Duration::hours(-1), Duration::hours(2)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // valid
    let (status, body) = create(seller.id, Duration::hours(1), Duration::hours(2)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CREATED");

    // second active auction for the same item
    let (status, body) = create(seller.id, Duration::hours(1), Duration::hours(2)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_negative_bid_amount_is_rejected() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let bidder = seed_user(&market, "alice@test.local", 0).await;
    let item = seed_item(&market, &seller).await;
    let auction = seed_started_auction(&market, &seller, &item, 0, 1, Duration::hours(2)).await;

    // a negative sum must not turn the escrow debit into a credit
    let (status, body) = post_bid(&market, auction.id, bidder.id, -100).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_AMOUNT");
    assert_eq!(balance_of(&market, bidder.id).await, 0);

    let (status, _) = post_bid(&market, auction.id, bidder.id, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(market.store.bids(auction.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_auction_rejects_bad_bid_bounds() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let item = seed_item(&market, &seller).await;

    let create = |min_bid: Value, min_increment: Value| {
        let market = &market;
        let item_id = item.id;
        let owner_id = seller.id;
        async move {
            let response = market
                .client
                .post(format!("{}/auctions", market.base))
                .json(&json!({
                    "owner_id": owner_id,
                    "item_id": item_id,
                    "start_date": Utc::now() + Duration::hours(1),
                    "end_date": Utc::now() + Duration::hours(2),
                    "min_bid": min_bid,
                    "min_increment": min_increment
                }))
                .send()
                .await
                .unwrap();
            let status = response.status();
            let body: Value = response.json().await.unwrap();
            (status, body)
        }
    };

    let (status, body) = create(json!(-100), json!(10)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, _) = create(json!(100), json!(0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create(json!(100), json!(-5)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // omitted increment falls back to the smallest positive step
    let (status, body) = create(json!(100), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["min_increment"], 1);
}

#[tokio::test]
async fn test_bid_on_created_auction_is_rejected() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let bidder = seed_user(&market, "alice@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;

    let auction = market
        .store
        .insert_auction(AuctionDraft {
            item_id: item.id,
            owner_id: seller.id,
            start_date: Utc::now() + Duration::hours(1),
            end_date: Utc::now() + Duration::hours(2),
            min_bid: 0,
            min_increment: 1,
            status: AuctionStatus::Created,
        })
        .await
        .unwrap();

    let (status, body) = post_bid(&market, auction.id, bidder.id, 100).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NOT_STARTED");
}

#[tokio::test]
async fn test_auction_sells_to_highest_bidder() {
    let market = setup(Duration::milliseconds(400)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let alice = seed_user(&market, "alice@test.local", 1_000).await;
    let bob = seed_user(&market, "bob@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;
    let auction =
        seed_started_auction(&market, &seller, &item, 100, 10, Duration::milliseconds(1_000))
            .await;

    market
        .store
        .place_bid(auction.id, alice.id, 150, Utc::now())
        .await
        .unwrap();
    market
        .store
        .place_bid(auction.id, bob.id, 200, Utc::now())
        .await
        .unwrap();

    market.scheduler.register(&auction).await.unwrap();

    // wait out the reminder and the end job
    tokio::time::sleep(StdDuration::from_millis(2_000)).await;

    let settled = market.store.auction(auction.id).await.unwrap();
    assert_eq!(settled.status, AuctionStatus::Sold);

    // seller is credited the winning sum, the losing bid is refunded
    assert_eq!(balance_of(&market, seller.id).await, 200);
    assert_eq!(balance_of(&market, alice.id).await, 1_000);
    assert_eq!(balance_of(&market, bob.id).await, 800);

    let deliveries = market.store.deliveries_for_item(item.id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].receiver_id, bob.id);
    assert_eq!(deliveries[0].sender_id, seller.id);

    assert!(market.dispatcher.contains("won:bob@test.local:200"));
    assert!(market.dispatcher.contains("lost:alice@test.local:150"));
    assert!(market.dispatcher.contains("sold:seller@test.local:200"));
    // one reminder per distinct bidder
    assert_eq!(market.dispatcher.count_with_prefix("reminder:"), 2);
}

#[tokio::test]
async fn test_auction_without_bids_ends_unsold() {
    let market = setup(Duration::milliseconds(100)).await;
    let seller = seed_user(&market, "seller@test.local", 500).await;
    let item = seed_item(&market, &seller).await;
    let auction =
        seed_started_auction(&market, &seller, &item, 100, 10, Duration::milliseconds(400))
            .await;

    market.scheduler.register(&auction).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(1_000)).await;

    let settled = market.store.auction(auction.id).await.unwrap();
    assert_eq!(settled.status, AuctionStatus::Unsold);

    // no ledger movement, no delivery, exactly one owner notification
    assert_eq!(balance_of(&market, seller.id).await, 500);
    assert!(market
        .store
        .deliveries_for_item(item.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(market.dispatcher.count_with_prefix("no_bids:"), 1);
}

#[tokio::test]
async fn test_settlement_is_at_most_once() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let alice = seed_user(&market, "alice@test.local", 1_000).await;
    let bob = seed_user(&market, "bob@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;
    let auction = seed_started_auction(&market, &seller, &item, 0, 1, Duration::hours(1)).await;

    market
        .store
        .place_bid(auction.id, alice.id, 150, Utc::now())
        .await
        .unwrap();
    market
        .store
        .place_bid(auction.id, bob.id, 200, Utc::now())
        .await
        .unwrap();

    // escrow conservation before settlement
    assert_eq!(
        balance_of(&market, alice.id).await + balance_of(&market, bob.id).await,
        2_000 - 150 - 200
    );

    let first = market.store.settle(auction.id, Utc::now()).await.unwrap();
    assert!(first.is_some());

    // duplicate timer fire / restart replay
    let second = market.store.settle(auction.id, Utc::now()).await.unwrap();
    assert!(second.is_none());

    // exactly one movement set: net zero across participants
    assert_eq!(balance_of(&market, seller.id).await, 200);
    assert_eq!(balance_of(&market, alice.id).await, 1_000);
    assert_eq!(balance_of(&market, bob.id).await, 800);
}

#[tokio::test]
async fn test_cancel_refunds_every_escrowed_bid() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let alice = seed_user(&market, "alice@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;
    let auction = seed_started_auction(&market, &seller, &item, 0, 1, Duration::hours(1)).await;

    // two raises from the same bidder, both escrowed
    market
        .store
        .place_bid(auction.id, alice.id, 100, Utc::now())
        .await
        .unwrap();
    market
        .store
        .place_bid(auction.id, alice.id, 150, Utc::now())
        .await
        .unwrap();
    assert_eq!(balance_of(&market, alice.id).await, 750);

    // non-owner cancel is forbidden
    let response = market
        .client
        .post(format!("{}/auctions/{}/cancel", market.base, auction.id))
        .json(&json!({ "caller_id": alice.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // owner cancel refunds both bids
    let response = market
        .client
        .post(format!("{}/auctions/{}/cancel", market.base, auction.id))
        .json(&json!({ "caller_id": seller.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(balance_of(&market, alice.id).await, 1_000);

    // cancelling again is a conflict, not a silent success
    let response = market
        .client
        .post(format!("{}/auctions/{}/cancel", market.base, auction.id))
        .json(&json!({ "caller_id": seller.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // and a later end-job replay finds nothing to settle
    let replay = market.store.settle(auction.id, Utc::now()).await.unwrap();
    assert!(replay.is_none());
}

#[tokio::test]
async fn test_concurrent_bids_conserve_escrow() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let item = seed_item(&market, &seller).await;
    let auction = seed_started_auction(&market, &seller, &item, 1, 1, Duration::hours(1)).await;

    let mut bidders = Vec::new();
    for i in 0..3 {
        bidders.push(seed_user(&market, &format!("bidder{i}@test.local"), 10_000).await);
    }

    // 30 concurrent bids racing the same increment ladder
    let mut handles = Vec::new();
    for i in 1..=30i64 {
        let store = market.store.clone();
        let bidder_id = bidders[(i % 3) as usize].id;
        let auction_id = auction.id;
        handles.push(tokio::spawn(async move {
            store.place_bid(auction_id, bidder_id, i * 7, Utc::now()).await
        }));
    }

    let mut accepted: usize = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert!(accepted >= 1);

    // accepted bids form a strictly increasing ladder
    let bids = market.store.bids(auction.id).await.unwrap();
    assert_eq!(bids.len(), accepted);
    for pair in bids.windows(2) {
        assert!(pair[1].sum >= pair[0].sum + auction.min_increment);
    }

    // escrow conservation: everything debited is held in bids
    let total_escrowed: i64 = bids.iter().map(|b| b.sum).sum();
    let mut total_balances = 0;
    for bidder in &bidders {
        total_balances += balance_of(&market, bidder.id).await;
    }
    assert_eq!(total_balances, 30_000 - total_escrowed);
}

#[tokio::test]
async fn test_rearm_settles_overdue_auction() {
    let market = setup(Duration::hours(1)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let alice = seed_user(&market, "alice@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;

    // ran past its end date while the process was down
    let auction = market
        .store
        .insert_auction(AuctionDraft {
            item_id: item.id,
            owner_id: seller.id,
            start_date: Utc::now() - Duration::hours(2),
            end_date: Utc::now() - Duration::seconds(1),
            min_bid: 0,
            min_increment: 1,
            status: AuctionStatus::Started,
        })
        .await
        .unwrap();
    // bid placed while the auction was still live
    market
        .store
        .place_bid(auction.id, alice.id, 300, Utc::now() - Duration::hours(1))
        .await
        .unwrap();

    let rearmed = market.scheduler.rearm().await.unwrap();
    assert_eq!(rearmed, 1);
    tokio::time::sleep(StdDuration::from_millis(500)).await;

    let settled = market.store.auction(auction.id).await.unwrap();
    assert_eq!(settled.status, AuctionStatus::Sold);
    assert_eq!(balance_of(&market, seller.id).await, 300);
}

#[tokio::test]
async fn test_reregister_does_not_duplicate_timers() {
    let market = setup(Duration::milliseconds(400)).await;
    let seller = seed_user(&market, "seller@test.local", 0).await;
    let alice = seed_user(&market, "alice@test.local", 1_000).await;
    let item = seed_item(&market, &seller).await;
    let auction =
        seed_started_auction(&market, &seller, &item, 0, 1, Duration::milliseconds(1_000)).await;

    market
        .store
        .place_bid(auction.id, alice.id, 100, Utc::now())
        .await
        .unwrap();

    // a rearm over an already-registered auction replaces its timers
    market.scheduler.register(&auction).await.unwrap();
    market.scheduler.register(&auction).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(2_000)).await;

    let settled = market.store.auction(auction.id).await.unwrap();
    assert_eq!(settled.status, AuctionStatus::Sold);
    // the displaced timer set fired nothing
    assert_eq!(market.dispatcher.count_with_prefix("reminder:"), 1);
    assert_eq!(market.dispatcher.count_with_prefix("won:"), 1);
}

#[tokio::test]
async fn test_huge_ticket_count_cannot_wrap_the_cost() {
    let market = setup(Duration::hours(1)).await;
    let owner = seed_user(&market, "owner@test.local", 0).await;
    let buyer = seed_user(&market, "buyer@test.local", 100).await;
    let lottery = seed_started_lottery(&market, &owner, 2).await;

    let response = market
        .client
        .post(format!("{}/lottery/tickets", market.base))
        .json(&json!({
            "lottery_id": lottery.id,
            "buyer_id": buyer.id,
            "ticket_count": i64::MAX
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_AMOUNT");
    assert_eq!(balance_of(&market, buyer.id).await, 100);
}

#[tokio::test]
async fn test_lottery_tickets_are_escrowed() {
    let market = setup(Duration::hours(1)).await;
    let owner = seed_user(&market, "owner@test.local", 0).await;
    let buyer = seed_user(&market, "buyer@test.local", 100).await;
    let lottery = seed_started_lottery(&market, &owner, 30).await;

    let purchase = |count: i64| {
        let market = &market;
        let lottery_id = lottery.id;
        let buyer_id = buyer.id;
        async move {
            let response = market
                .client
                .post(format!("{}/lottery/tickets", market.base))
                .json(&json!({
                    "lottery_id": lottery_id,
                    "buyer_id": buyer_id,
                    "ticket_count": count
                }))
                .send()
                .await
                .unwrap();
            let status = response.status();
            let body: Value = response.json().await.unwrap();
            (status, body)
        }
    };

    let (status, body) = purchase(3).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sum"], 90);
    assert_eq!(balance_of(&market, buyer.id).await, 10);

    // remaining balance covers no further ticket
    let (status, body) = purchase(1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");
    assert_eq!(balance_of(&market, buyer.id).await, 10);

    let (status, _) = purchase(0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
