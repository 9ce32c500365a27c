use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::model::candle::Candle;

/// One row of `GET /api/v3/klines`.
///
/// Binance encodes klines as positional arrays:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
/// trades, taker_buy_base, taker_buy_quote, ignore]`, prices as strings.
#[derive(Debug, Deserialize)]
pub struct BinanceKline(
    pub i64,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub i64,
    pub Decimal,
    pub u64,
    pub Decimal,
    pub Decimal,
    pub IgnoredAny,
);

impl From<BinanceKline> for Candle {
    fn from(k: BinanceKline) -> Self {
        Candle {
            open_time: k.0,
            open: k.1,
            high: k.2,
            low: k.3,
            close: k.4,
            volume: k.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    pub server_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct BinanceApiErrorResponse {
    pub code: i64,
    pub msg: String,
}
