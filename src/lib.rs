pub mod binance;
pub mod buffer;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod source;

pub use buffer::CandleBuffer;
pub use config::{ProviderConfig, ReadinessPolicy};
pub use error::{FetchError, ProviderError};
pub use model::candle::Candle;
pub use model::interval::Interval;
pub use provider::backfill::{BackfillReport, BackfillStop};
pub use provider::{CandleWindowProvider, ProviderEvent, WindowView};
pub use source::{CandleSource, Clock, SystemClock};
