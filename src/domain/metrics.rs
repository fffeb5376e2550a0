//! Performance metrics over a closed-trade ledger.
//!
//! Every ratio works on per-trade `pnl` (net of commission). `risk_free` is in
//! the same units as a trade's pnl and defaults to zero.

use serde::Serialize;

use crate::domain::bars::NANOS_PER_DAY;
use crate::domain::position::{Direction, Trade};

/// Flat metrics record. Non-finite values (an infinite profit factor)
/// serialize as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub long_trades: usize,
    pub short_trades: usize,
    pub win_rate: f64,
    pub net_profit: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub total_commission: f64,
    pub profit_factor: f64,
    pub avg_trade: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub expectancy: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub sqn: f64,
    pub trades_per_day: f64,
    pub avg_bars_held: f64,
    pub avg_mae: f64,
    pub avg_mfe: f64,
    pub avg_r_multiple: f64,
}

impl Metrics {
    /// Zero state for a run without trades.
    pub fn empty(initial_capital: f64) -> Self {
        Metrics {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            breakeven_trades: 0,
            long_trades: 0,
            short_trades: 0,
            win_rate: 0.0,
            net_profit: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            total_commission: 0.0,
            profit_factor: 0.0,
            avg_trade: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            expectancy: 0.0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            initial_capital,
            final_equity: initial_capital,
            total_return_pct: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            sqn: 0.0,
            trades_per_day: 0.0,
            avg_bars_held: 0.0,
            avg_mae: 0.0,
            avg_mfe: 0.0,
            avg_r_multiple: 0.0,
        }
    }

    pub fn compute(trades: &[Trade], initial_capital: f64, risk_free: f64) -> Self {
        if trades.is_empty() {
            return Self::empty(initial_capital);
        }

        let mut ordered: Vec<&Trade> = trades.iter().collect();
        ordered.sort_by_key(|t| t.exit_time);
        let pnls: Vec<f64> = ordered.iter().map(|t| t.pnl).collect();
        let total = pnls.len();
        let n = total as f64;

        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut max_consecutive_wins = 0usize;
        let mut max_consecutive_losses = 0usize;
        let mut win_streak = 0usize;
        let mut loss_streak = 0usize;

        for &pnl in &pnls {
            if pnl > 0.0 {
                winning_trades += 1;
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
                win_streak += 1;
                loss_streak = 0;
            } else if pnl < 0.0 {
                losing_trades += 1;
                gross_loss += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
                loss_streak += 1;
                win_streak = 0;
            } else {
                win_streak = 0;
                loss_streak = 0;
            }
            max_consecutive_wins = max_consecutive_wins.max(win_streak);
            max_consecutive_losses = max_consecutive_losses.max(loss_streak);
        }

        let net_profit: f64 = pnls.iter().sum();
        let win_rate = winning_trades as f64 / n * 100.0;

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = ratio(gross_profit, winning_trades);
        let avg_loss = ratio(gross_loss, losing_trades);
        let loss_rate = losing_trades as f64 / n;
        let expectancy = win_rate / 100.0 * avg_win - loss_rate * avg_loss;

        let (max_drawdown, max_drawdown_pct) = compute_drawdown(&pnls, initial_capital);
        let (sharpe_ratio, sortino_ratio, sqn) = compute_risk_adjusted(&pnls, risk_free);

        let first_exit = ordered[0].exit_time;
        let last_exit = ordered[total - 1].exit_time;
        let day_span = (last_exit - first_exit) / NANOS_PER_DAY;
        let trades_per_day = if day_span == 0 {
            n
        } else {
            n / day_span.max(1) as f64
        };

        let r_multiples: Vec<f64> = ordered.iter().filter_map(|t| t.r_multiple).collect();

        Metrics {
            total_trades: total,
            winning_trades,
            losing_trades,
            breakeven_trades: total - winning_trades - losing_trades,
            long_trades: ordered
                .iter()
                .filter(|t| t.direction == Direction::Long)
                .count(),
            short_trades: ordered
                .iter()
                .filter(|t| t.direction == Direction::Short)
                .count(),
            win_rate,
            net_profit,
            gross_profit,
            gross_loss,
            total_commission: ordered.iter().map(|t| t.commission).sum(),
            profit_factor,
            avg_trade: net_profit / n,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            expectancy,
            max_consecutive_wins,
            max_consecutive_losses,
            initial_capital,
            final_equity: initial_capital + net_profit,
            total_return_pct: if initial_capital > 0.0 {
                net_profit / initial_capital * 100.0
            } else {
                0.0
            },
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            sqn,
            trades_per_day,
            avg_bars_held: ordered.iter().map(|t| t.bars_held as f64).sum::<f64>() / n,
            avg_mae: ordered.iter().map(|t| t.mae).sum::<f64>() / n,
            avg_mfe: ordered.iter().map(|t| t.mfe).sum::<f64>() / n,
            avg_r_multiple: ratio(r_multiples.iter().sum(), r_multiples.len()),
        }
    }
}

fn ratio(sum: f64, count: usize) -> f64 {
    if count > 0 { sum / count as f64 } else { 0.0 }
}

/// Equity curve `initial_capital, +pnl0, +pnl1, ...`; returns the deepest
/// drop below the running peak and that drop as a percent of the peak.
fn compute_drawdown(pnls: &[f64], initial_capital: f64) -> (f64, f64) {
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut worst = 0.0_f64;
    let mut peak_at_worst = initial_capital;

    for pnl in pnls {
        equity += pnl;
        peak = peak.max(equity);
        let dd = equity - peak;
        if dd < worst {
            worst = dd;
            peak_at_worst = peak;
        }
    }

    let max_dd = worst.abs();
    let max_dd_pct = if peak_at_worst > 0.0 {
        max_dd / peak_at_worst * 100.0
    } else {
        0.0
    };
    (max_dd, max_dd_pct)
}

/// Sharpe, Sortino and SQN over per-trade pnl.
fn compute_risk_adjusted(pnls: &[f64], risk_free: f64) -> (f64, f64, f64) {
    let n = pnls.len() as f64;
    let mean = pnls.iter().sum::<f64>() / n;

    let std_dev = if pnls.len() >= 2 {
        let variance = pnls.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    let downside = pnls
        .iter()
        .map(|p| (p - risk_free).min(0.0).powi(2))
        .sum::<f64>()
        / n;
    let downside_dev = downside.sqrt();

    let sharpe = if std_dev > 0.0 {
        (mean - risk_free) / std_dev
    } else {
        0.0
    };
    let sortino = if downside_dev > 0.0 {
        (mean - risk_free) / downside_dev
    } else {
        0.0
    };
    let sqn = if std_dev > 0.0 {
        n.sqrt() * mean / std_dev
    } else {
        0.0
    };

    (sharpe, sortino, sqn)
}
