pub mod model;

pub use model::{
    Auction, AuctionBid, AuctionDraft, AuctionStatus, Delivery, Item, Lottery, LotteryDraft,
    LotteryTicketBatch, User, DEFAULT_MIN_INCREMENT,
};
