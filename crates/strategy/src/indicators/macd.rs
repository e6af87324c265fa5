use super::moving_average::ema;

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// Computes: MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period).
/// Returns crossover events when MACD line crosses the signal line.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// The result of a MACD computation.
#[derive(Debug, Clone, PartialEq)]
pub enum MacdSignal {
    Bullish, // MACD crossed above signal line
    Bearish, // MACD crossed below signal line
    Neutral, // No crossover on the latest bar
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(
            fast < slow,
            "MACD fast period must be less than slow period"
        );
        Self { fast, slow, signal }
    }

    /// MACD and signal line values for the last two bars, oldest first.
    /// Returns `None` if there isn't enough data.
    /// Needs at least `slow + signal` prices.
    pub fn lines(&self, closes: &[f64]) -> Option<[(f64, f64); 2]> {
        let min_len = self.slow + self.signal;
        if closes.len() < min_len {
            return None;
        }

        // Compute MACD line for the last `signal + 1` bars (need prev + current)
        let macd_series_len = self.signal + 1;
        let start = closes.len().saturating_sub(self.slow + macd_series_len - 1);
        let window = &closes[start..];

        let macd_line: Vec<f64> = (self.slow - 1..window.len())
            .map(|i| {
                let slice = &window[..=i];
                ema(slice, self.fast) - ema(slice, self.slow)
            })
            .collect();

        if macd_line.len() < self.signal + 1 {
            return None;
        }

        let signal_line: Vec<f64> = (self.signal - 1..macd_line.len())
            .map(|i| ema(&macd_line[..=i], self.signal))
            .collect();

        let (n, m) = (signal_line.len(), macd_line.len());
        if n < 2 {
            return None;
        }
        Some([
            (macd_line[m - 2], signal_line[n - 2]),
            (macd_line[m - 1], signal_line[n - 1]),
        ])
    }

    /// Crossover state on the latest bar.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdSignal> {
        let [(prev_macd, prev_sig), (curr_macd, curr_sig)] = self.lines(closes)?;

        if prev_macd <= prev_sig && curr_macd > curr_sig {
            Some(MacdSignal::Bullish)
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            Some(MacdSignal::Bearish)
        } else {
            Some(MacdSignal::Neutral)
        }
    }

    /// Latest MACD minus signal line.
    pub fn histogram(&self, closes: &[f64]) -> Option<f64> {
        self.lines(closes).map(|[_, (m, s)]| m - s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn macd_returns_none_with_insufficient_data() {
        let macd = MacdIndicator::new(12, 26, 9);
        let prices = vec![100.0; 30]; // need >= 35
        assert!(macd.compute(&prices).is_none());
        assert!(macd.histogram(&prices).is_none());
    }

    #[test]
    fn macd_returns_some_with_sufficient_data() {
        let macd = MacdIndicator::new(12, 26, 9);
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        assert!(macd.compute(&prices).is_some());
    }

    #[test]
    fn macd_line_positive_in_uptrend() {
        let macd = MacdIndicator::new(12, 26, 9);
        let [_, (m, _)] = macd.lines(&trending_up(80)).unwrap();
        assert!(m > 0.0);
    }

    #[test]
    fn macd_flat_series_is_neutral() {
        let macd = MacdIndicator::new(3, 6, 3);
        let prices = vec![100.0; 40];
        assert_eq!(macd.compute(&prices), Some(MacdSignal::Neutral));
        assert_eq!(macd.histogram(&prices), Some(0.0));
    }

    #[test]
    fn macd_detects_bullish_crossover_after_reversal() {
        let macd = MacdIndicator::new(3, 6, 3);
        let mut prices: Vec<f64> = (0..30).map(|i| 130.0 - i as f64).collect();
        // Scan forward through a sharp reversal; some bar must cross up.
        let mut crossed = false;
        for i in 0..10 {
            prices.push(101.0 + i as f64 * 3.0);
            if macd.compute(&prices) == Some(MacdSignal::Bullish) {
                crossed = true;
                break;
            }
        }
        assert!(crossed);
    }
}
