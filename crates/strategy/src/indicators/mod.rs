pub mod atr;
pub mod macd;
pub mod rsi;

pub use atr::{AtrIndicator, Candle};
pub use macd::{MacdCross, MacdIndicator, MacdReading};
pub use rsi::RsiIndicator;

/// Exponential moving average of `data`, seeded with the SMA of the first `period` values.
pub fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() || period == 0 {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let start = data.len().saturating_sub(period * 3);
    let slice = &data[start..];

    let seed_len = period.min(slice.len());
    let seed = slice[..seed_len].iter().sum::<f64>() / seed_len as f64;
    slice[seed_len..]
        .iter()
        .fold(seed, |acc, &price| price * k + acc * (1.0 - k))
}
