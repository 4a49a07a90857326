//! Exchange Adapters
//!
//! [`ExchangeClient`](crate::application::ports::ExchangeClient)
//! implementations. Live exchange transports plug in here.

pub mod paper;

pub use paper::PaperExchange;
