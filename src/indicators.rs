//! Rolling indicator state used by the entry gate.
//!
//! All indicators are incremental: one `update` per bar, O(1) or O(window).

use std::collections::VecDeque;

/// Simple moving average over a fixed window.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self { period, values: VecDeque::with_capacity(period), sum: 0.0 }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.period {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.get()
    }

    pub fn get(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.period
    }
}

/// Exponential moving average.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self { alpha: 2.0 / (period as f64 + 1.0), value: None }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        let next = match self.value {
            Some(v) => v + self.alpha * (price - v),
            None => price,
        };
        self.value = Some(next);
        next
    }

    pub fn get(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

/// Rolling mean and standard deviation over a fixed window.
#[derive(Debug, Clone)]
pub struct RollingStd {
    period: usize,
    values: VecDeque<f64>,
}

impl RollingStd {
    pub fn new(period: usize) -> Self {
        Self { period, values: VecDeque::with_capacity(period) }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        self.values.push_back(value);
        if self.values.len() > self.period {
            self.values.pop_front();
        }
        self.get()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn get(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        var.sqrt()
    }

    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.period
    }
}

/// RSI with Wilder smoothing.
///
/// `value()` is `None` while warming up and when the window holds no losses
/// at all: RS = avg_gain / avg_loss is undefined there, and an "overbought"
/// reading computed from one-sided movement carries no information.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    avg_gain: f64,
    avg_loss: f64,
    prev_price: Option<f64>,
    count: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self { period, avg_gain: 0.0, avg_loss: 0.0, prev_price: None, count: 0 }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            self.count += 1;
            if self.count <= self.period {
                self.avg_gain = (self.avg_gain * (self.count - 1) as f64 + gain) / self.count as f64;
                self.avg_loss = (self.avg_loss * (self.count - 1) as f64 + loss) / self.count as f64;
            } else {
                let alpha = 1.0 / self.period as f64;
                self.avg_gain = self.avg_gain * (1.0 - alpha) + gain * alpha;
                self.avg_loss = self.avg_loss * (1.0 - alpha) + loss * alpha;
            }
        }
        self.prev_price = Some(price);
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.count < self.period || self.avg_loss == 0.0 {
            return None;
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// MACD with signal line and histogram.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            macd_line: 0.0,
            signal_line: 0.0,
            histogram: 0.0,
        }
    }

    pub fn default_12_26_9() -> Self {
        Self::new(12, 26, 9)
    }

    pub fn update(&mut self, price: f64) {
        let fast = self.fast.update(price);
        let slow = self.slow.update(price);
        self.macd_line = fast - slow;
        self.signal_line = self.signal.update(self.macd_line);
        self.histogram = self.macd_line - self.signal_line;
    }
}
