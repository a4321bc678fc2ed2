/// OHLC subset needed for true-range calculations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Average True Range with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    pub period: usize,
}

impl AtrIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self { period }
    }

    /// Returns `None` until `period + 1` candles are available (oldest first).
    pub fn compute(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.period + 1 {
            return None;
        }

        let ranges: Vec<f64> = candles
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let c = w[1];
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            })
            .collect();

        let n = self.period as f64;
        let (seed, rest) = ranges.split_at(self.period);
        let initial = seed.iter().sum::<f64>() / n;
        Some(rest.iter().fold(initial, |atr, tr| (atr * (n - 1.0) + tr) / n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(range: f64, n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle { high: 100.0 + range / 2.0, low: 100.0 - range / 2.0, close: 100.0 })
            .collect()
    }

    #[test]
    fn atr_needs_period_plus_one_candles() {
        let atr = AtrIndicator::new(14);
        assert!(atr.compute(&flat(2.0, 14)).is_none());
        assert!(atr.compute(&flat(2.0, 15)).is_some());
    }

    #[test]
    fn atr_of_constant_range_equals_range() {
        let atr = AtrIndicator::new(5);
        let value = atr.compute(&flat(2.0, 30)).unwrap();
        assert!((value - 2.0).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn atr_counts_gaps_through_previous_close() {
        let atr = AtrIndicator::new(1);
        let candles = [
            Candle { high: 101.0, low: 99.0, close: 100.0 },
            Candle { high: 111.0, low: 109.0, close: 110.0 },
        ];
        assert!((atr.compute(&candles).unwrap() - 11.0).abs() < 1e-9);
    }
}
