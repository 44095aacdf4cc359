pub mod auction;
pub mod bidding;
pub mod config;
pub mod database;
pub mod error;
pub mod event_store;
pub mod fanout;
pub mod handlers;
pub mod ledger;
pub mod message_broker;
pub mod query;
pub mod scheduler;
pub mod state;
