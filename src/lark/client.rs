mod core;
pub mod executor;
mod records;

pub use self::core::LarkClient;
