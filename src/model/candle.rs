use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One fixed-interval OHLCV record.
///
/// `open_time` (milliseconds since epoch) is the only ordering and identity
/// key. Prices and volume are carried exactly as the source reported them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Open time of the candle that follows this one.
    pub fn next_open_time(&self, interval_ms: i64) -> i64 {
        self.open_time.saturating_add(interval_ms)
    }
}
