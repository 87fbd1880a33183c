pub mod connection;
pub mod hub;
pub mod presence;
pub mod reactions;
pub mod receipts;
pub mod store;
