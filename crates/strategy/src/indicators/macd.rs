use super::ema;

/// MACD (Moving Average Convergence/Divergence).
///
/// MACD line = EMA(fast) − EMA(slow), signal line = EMA(MACD line, signal).
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdCross {
    /// MACD line crossed above the signal line on the latest bar.
    Bullish,
    /// MACD line crossed below the signal line on the latest bar.
    Bearish,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    pub signal_line: f64,
    /// `macd - signal_line`. Positive means upward momentum.
    pub histogram: f64,
    pub cross: MacdCross,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        assert!(signal >= 1, "MACD signal period must be >= 1");
        Self { fast, slow, signal }
    }

    /// Needs at least `slow + signal` closes (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<MacdReading> {
        if closes.len() < self.slow + self.signal {
            return None;
        }

        let window_len = self.slow + self.signal;
        let window = &closes[closes.len() - window_len..];

        let macd_line: Vec<f64> = (self.slow - 1..window.len())
            .map(|i| {
                let slice = &window[..=i];
                ema(slice, self.fast) - ema(slice, self.slow)
            })
            .collect();

        let signal_line: Vec<f64> = (self.signal - 1..macd_line.len())
            .map(|i| ema(&macd_line[..=i], self.signal))
            .collect();

        let [.., prev_macd, curr_macd] = macd_line[..] else {
            return None;
        };
        let [.., prev_sig, curr_sig] = signal_line[..] else {
            return None;
        };

        let cross = if prev_macd <= prev_sig && curr_macd > curr_sig {
            MacdCross::Bullish
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            MacdCross::Bearish
        } else {
            MacdCross::None
        };

        Some(MacdReading {
            macd: curr_macd,
            signal_line: curr_sig,
            histogram: curr_macd - curr_sig,
            cross,
        })
    }
}
