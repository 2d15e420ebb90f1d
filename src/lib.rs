pub mod bidding;
pub mod clock;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod marketplace;
pub mod notification;
pub mod scheduler;
pub mod settlement;
pub mod store;
