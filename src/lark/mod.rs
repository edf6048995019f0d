pub mod auth;
pub mod client;
pub mod links;
pub mod rate_limit;
pub mod types;

pub use client::LarkClient;
pub use links::TableLocation;
