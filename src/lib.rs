pub mod agents;
pub mod config;
pub mod decimal;
pub mod error;
pub mod feeds;
pub mod metrics;
pub mod quoters;
pub mod rpc;
pub mod tvl;
pub mod types;

pub use agents::{Agent, StatusPublisher};
pub use decimal::Decimal;
pub use error::{Error, Result};
pub use types::{Metric, QuoteRequest};
