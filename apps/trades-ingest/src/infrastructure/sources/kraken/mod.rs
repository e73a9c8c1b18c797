//! Kraken Trade Sources
//!
//! Live trades from the v2 websocket and trade history from the public REST
//! API.

mod historical;
mod live;
pub mod messages;

pub use historical::{HistoricalConfig, KrakenHistoricalSource};
pub use live::{KrakenLiveFeed, LiveFeedConfig};
