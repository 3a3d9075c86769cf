//! Deterministic single-position trading simulator.
//!
//! One campaign = one symbol + one named parameter set over one date window.
//! The bar loop is strictly sequential; given identical bars and params the
//! output is identical, field for field. There is no randomness anywhere in
//! this module.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::OhlcvBar;
use crate::indicators::{Macd, Rsi, Sma};
use crate::scenario::TradingParams;

/// Why a position was closed. Checked in this fixed priority order each bar;
/// the first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    EndOfData,
}

/// One entry-to-exit lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Shares held (fractional allowed).
    pub position_size: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
    pub trust_score: f64,
    pub forecast_confidence: f64,
}

/// Full output of one campaign. Immutable once produced; the simulator's
/// sole contract to the rest of the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignResult {
    pub campaign_name: String,
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub param_set: String,
    pub params: TradingParams,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub total_trades: usize,
    pub bars_processed: usize,
    pub trades: Vec<Trade>,
}

/// Entry signals computed from the trailing lookback window.
#[derive(Debug, Clone, Copy)]
pub struct EntrySignals {
    pub trust_score: f64,
    pub forecast_confidence: f64,
    pub target_price: f64,
}

#[derive(Debug, Clone)]
struct OpenPosition {
    entry_date: NaiveDate,
    entry_price: f64,
    shares: f64,
    bars_held: usize,
    trust_score: f64,
    forecast_confidence: f64,
}

/// The simulator. Thresholds that are properties of the engine rather than
/// of a strategy (lookback, hold limit, Kelly discipline) live here.
#[derive(Debug, Clone)]
pub struct Simulator {
    pub initial_capital: f64,
    /// Trailing window for trust/forecast signals.
    pub lookback: usize,
    /// Bars after which an open position is time-exited.
    pub max_hold_bars: usize,
    /// Forecast horizon in bars for the target price.
    pub forecast_horizon: f64,
    /// Fraction of full Kelly actually deployed.
    pub kelly_fraction: f64,
    /// Ceiling on the win probability fed into Kelly. Never assume more
    /// edge than this regardless of how confident the trust score is.
    pub win_prob_cap: f64,
    /// RSI ceiling for the quality-setup gate.
    pub rsi_ceiling: f64,
    /// Minimum volume relative to its 20-bar SMA.
    pub volume_floor_ratio: f64,
    /// Minimum target-price edge over the current close.
    pub min_target_edge: f64,
    /// Fraction of cash that may be deployed (cash-buffer rule).
    pub max_cash_deploy: f64,
    /// Dollar floor below which a trade is skipped.
    pub min_trade_dollars: f64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            lookback: 30,
            max_hold_bars: 10,
            forecast_horizon: 10.0,
            kelly_fraction: 0.25,
            win_prob_cap: 0.65,
            rsi_ceiling: 75.0,
            volume_floor_ratio: 0.5,
            min_target_edge: 1.02,
            max_cash_deploy: 0.95,
            min_trade_dollars: 100.0,
        }
    }
}

impl Simulator {
    pub fn new(initial_capital: f64) -> Self {
        Self { initial_capital, ..Self::default() }
    }

    /// Trust score and forecast from the trailing window of closes.
    ///
    /// Trust is trend strength relative to realized volatility, centered at
    /// 0.5 for a flat market. The forecast projects the recent mean per-bar
    /// return over the forecast horizon.
    pub fn entry_signals(&self, window: &[f64]) -> Option<EntrySignals> {
        if window.len() < 2 {
            return None;
        }
        let first = window[0];
        let last = *window.last()?;
        if first <= 0.0 || last <= 0.0 {
            return None;
        }
        let returns: Vec<f64> =
            window.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let n = returns.len() as f64;
        let mean_ret = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean_ret).powi(2)).sum::<f64>() / n;
        let vol = var.sqrt();

        let trend_strength = (last - first) / first;
        let trust_score = (0.5 + trend_strength / (vol * 20.0).max(1e-9)).clamp(0.0, 1.0);
        let forecast_confidence = (0.5 + mean_ret * 50.0).clamp(0.0, 1.0);
        let target_price = last * (1.0 + mean_ret * self.forecast_horizon);
        Some(EntrySignals { trust_score, forecast_confidence, target_price })
    }

    /// Quarter-Kelly fraction of cash to deploy, or `None` when the edge is
    /// non-positive. The win probability is the trust score capped at
    /// `win_prob_cap`; the payoff ratio is take-profit over stop-loss.
    pub fn kelly_pct(&self, trust_score: f64, params: &TradingParams) -> Option<f64> {
        if params.stop_loss <= 0.0 {
            return None;
        }
        let b = params.take_profit / params.stop_loss;
        let p = trust_score.min(self.win_prob_cap);
        let kelly = (p * b - (1.0 - p)) / b;
        if kelly <= 0.0 {
            return None;
        }
        Some(kelly * self.kelly_fraction)
    }

    /// Dollar position size after the Kelly fraction, the per-campaign max,
    /// the cash-buffer rule, and the minimum-trade floor.
    pub fn position_dollars(
        &self,
        trust_score: f64,
        params: &TradingParams,
        cash: f64,
    ) -> Option<f64> {
        let pct = self.kelly_pct(trust_score, params)?;
        let dollars = (cash * pct)
            .min(params.max_position_size)
            .min(cash * self.max_cash_deploy);
        if dollars < self.min_trade_dollars {
            return None;
        }
        Some(dollars)
    }

    /// Replay `bars` bar-by-bar and produce one `CampaignResult`.
    pub fn run_campaign(
        &self,
        symbol: &str,
        set_name: &str,
        params: &TradingParams,
        bars: &[OhlcvBar],
    ) -> Result<CampaignResult> {
        anyhow::ensure!(!bars.is_empty(), "campaign over empty bar series");

        let mut cash = self.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut cooldown_remaining: u32 = 0;
        let mut trades: Vec<Trade> = Vec::new();

        let mut peak_equity = self.initial_capital;
        let mut max_drawdown = 0.0f64;

        let mut rsi = Rsi::new(14);
        let mut macd = Macd::default_12_26_9();
        let mut trend_sma = Sma::new(20);
        let mut volume_sma = Sma::new(20);
        let mut closes: Vec<f64> = Vec::with_capacity(bars.len());

        for bar in bars {
            rsi.update(bar.close);
            macd.update(bar.close);
            let sma = trend_sma.update(bar.close);
            let vol_avg = volume_sma.update(bar.volume);
            closes.push(bar.close);

            // Exit checks first, fixed priority: stop -> take-profit -> time.
            if let Some(pos) = position.as_mut() {
                pos.bars_held += 1;
                let exit_reason = if bar.close <= pos.entry_price * (1.0 - params.stop_loss) {
                    Some(ExitReason::StopLoss)
                } else if bar.close >= pos.entry_price * (1.0 + params.take_profit) {
                    Some(ExitReason::TakeProfit)
                } else if pos.bars_held >= self.max_hold_bars {
                    Some(ExitReason::TimeExit)
                } else {
                    None
                };
                if let Some(reason) = exit_reason {
                    let pos = position.take().expect("position present");
                    cash += close_position(&pos, bar, reason, &mut trades);
                    cooldown_remaining = params.cooldown_days;
                }
            } else if cooldown_remaining > 0 {
                cooldown_remaining -= 1;
            } else if closes.len() > self.lookback {
                let window = &closes[closes.len() - self.lookback..];
                if let Some(signals) = self.entry_signals(window) {
                    let quality_ok = rsi.value().map_or(true, |r| r <= self.rsi_ceiling)
                        && (!volume_sma.is_ready() || bar.volume >= vol_avg * self.volume_floor_ratio)
                        && macd.histogram > 0.0
                        && bar.close >= sma;
                    let signals_ok = signals.trust_score >= params.trust_threshold
                        && signals.forecast_confidence >= params.min_confidence
                        && signals.target_price > bar.close * self.min_target_edge;
                    if signals_ok && quality_ok {
                        if let Some(dollars) =
                            self.position_dollars(signals.trust_score, params, cash)
                        {
                            let shares = dollars / bar.close;
                            cash -= dollars;
                            position = Some(OpenPosition {
                                entry_date: bar.date,
                                entry_price: bar.close,
                                shares,
                                bars_held: 0,
                                trust_score: signals.trust_score,
                                forecast_confidence: signals.forecast_confidence,
                            });
                        }
                    }
                }
            }

            // Mark-to-market drawdown over the whole run.
            let equity = cash + position.as_ref().map_or(0.0, |p| p.shares * bar.close);
            if equity > peak_equity {
                peak_equity = equity;
            }
            if peak_equity > 0.0 {
                max_drawdown = max_drawdown.max((peak_equity - equity) / peak_equity);
            }
        }

        // Force-close anything still open at the final bar's close.
        if let Some(pos) = position.take() {
            let last = bars.last().expect("non-empty bars");
            cash += close_position(&pos, last, ExitReason::EndOfData, &mut trades);
        }

        let final_equity = cash;
        let total_return_pct = (final_equity / self.initial_capital - 1.0) * 100.0;
        let (first, last) = (bars.first().expect("non-empty"), bars.last().expect("non-empty"));

        Ok(CampaignResult {
            campaign_name: format!("{}_{}", symbol, set_name),
            symbol: symbol.to_string(),
            start_date: first.date,
            end_date: last.date,
            param_set: set_name.to_string(),
            params: *params,
            initial_capital: self.initial_capital,
            final_equity,
            total_return_pct,
            max_drawdown_pct: max_drawdown * 100.0,
            sharpe_ratio: sharpe(&trades),
            profit_factor: profit_factor(&trades),
            win_rate: win_rate(&trades),
            avg_win_pct: avg_pct(&trades, true),
            avg_loss_pct: avg_pct(&trades, false),
            total_trades: trades.len(),
            bars_processed: bars.len(),
            trades,
        })
    }
}

fn close_position(
    pos: &OpenPosition,
    bar: &OhlcvBar,
    reason: ExitReason,
    trades: &mut Vec<Trade>,
) -> f64 {
    let proceeds = pos.shares * bar.close;
    let cost_basis = pos.shares * pos.entry_price;
    let pnl = proceeds - cost_basis;
    trades.push(Trade {
        entry_date: pos.entry_date,
        exit_date: bar.date,
        entry_price: pos.entry_price,
        exit_price: bar.close,
        position_size: pos.shares,
        pnl,
        pnl_pct: (bar.close / pos.entry_price - 1.0) * 100.0,
        exit_reason: reason,
        trust_score: pos.trust_score,
        forecast_confidence: pos.forecast_confidence,
    });
    proceeds
}

/// Mean over std of per-trade pct returns; no annualization, 0 under 2 trades.
fn sharpe(trades: &[Trade]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let n = trades.len() as f64;
    let mean = trades.iter().map(|t| t.pnl_pct).sum::<f64>() / n;
    let var = trades.iter().map(|t| (t.pnl_pct - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std <= 0.0 {
        0.0
    } else {
        mean / std
    }
}

/// Gross wins over absolute gross losses; gross wins alone when loss-free.
fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_win: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum();
    if gross_loss > 0.0 {
        gross_win / gross_loss
    } else {
        gross_win
    }
}

fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    wins as f64 / trades.len() as f64 * 100.0
}

fn avg_pct(trades: &[Trade], winners: bool) -> f64 {
    let pcts: Vec<f64> = trades
        .iter()
        .filter(|t| if winners { t.pnl > 0.0 } else { t.pnl < 0.0 })
        .map(|t| t.pnl_pct)
        .collect();
    if pcts.is_empty() {
        0.0
    } else {
        pcts.iter().sum::<f64>() / pcts.len() as f64
    }
}
