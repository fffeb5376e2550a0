//! Open position tracking and the closed trade record.
//!
//! Both execution backends drive the same `OpenPosition` state so stop,
//! target and excursion rules live in exactly one place.

use serde::{Deserialize, Serialize};

use crate::domain::bars::BarSeries;
use crate::domain::execution::CommissionModel;
use crate::domain::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    EndOfData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: i64,
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub mae: f64,
    pub mfe: f64,
}

impl OpenPosition {
    /// Open at the close of bar `index`. `stop_loss`/`take_profit` are fixed
    /// for the life of the position; `NaN` disables them.
    pub fn open(
        direction: Direction,
        index: usize,
        bars: &BarSeries,
        stop_loss: f64,
        take_profit: f64,
        size: f64,
    ) -> Self {
        OpenPosition {
            direction,
            entry_index: index,
            entry_time: bars.timestamp[index],
            entry_price: bars.close[index],
            size,
            stop_loss,
            take_profit,
            mae: 0.0,
            mfe: 0.0,
        }
    }

    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    /// Fold one bar's range into MAE/MFE. Never called for the entry bar.
    pub fn track_excursion(&mut self, high: f64, low: f64) {
        let (favorable, adverse) = match self.direction {
            Direction::Long => (high - self.entry_price, self.entry_price - low),
            Direction::Short => (self.entry_price - low, high - self.entry_price),
        };
        // f64::max ignores a NaN operand
        self.mfe = self.mfe.max(favorable);
        self.mae = self.mae.max(adverse);
    }

    /// Stop first, then target. Fills happen at the configured level, not at
    /// the bar extreme.
    pub fn check_stops(&self, high: f64, low: f64) -> Option<(f64, ExitReason)> {
        match self.direction {
            Direction::Long => {
                if low <= self.stop_loss {
                    Some((self.stop_loss, ExitReason::StopLoss))
                } else if high >= self.take_profit {
                    Some((self.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
            Direction::Short => {
                if high >= self.stop_loss {
                    Some((self.stop_loss, ExitReason::StopLoss))
                } else if low <= self.take_profit {
                    Some((self.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
        }
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price) * self.size
    }

    pub fn trade_state(&self, bar_index: usize, price: f64, trade_count: usize) -> TradeState {
        TradeState {
            bar_index,
            bars_held: bar_index - self.entry_index,
            direction: self.direction,
            entry_index: self.entry_index,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            size: self.size,
            unrealized_pnl: self.unrealized_pnl(price),
            mae: self.mae,
            mfe: self.mfe,
            trade_count,
        }
    }

    /// Close the position into a complete trade record.
    pub fn close(
        self,
        exit_index: usize,
        exit_time: i64,
        exit_price: f64,
        exit_reason: ExitReason,
        commission: &CommissionModel,
    ) -> Trade {
        let gross_pnl = self.direction.sign() * (exit_price - self.entry_price) * self.size;
        let fees = commission.charge(self.entry_price, self.size)
            + commission.charge(exit_price, self.size);
        let pnl = gross_pnl - fees;

        let initial_risk = if self.stop_loss.is_finite() {
            Some((self.entry_price - self.stop_loss).abs())
        } else {
            None
        };
        let r_multiple = initial_risk.filter(|r| *r > 0.0).map(|r| pnl / r);

        Trade {
            entry_time: self.entry_time,
            exit_time,
            entry_index: self.entry_index,
            exit_index,
            entry_price: self.entry_price,
            exit_price,
            direction: self.direction,
            size: self.size,
            gross_pnl,
            commission: fees,
            pnl,
            exit_reason,
            duration: exit_time - self.entry_time,
            bars_held: exit_index - self.entry_index,
            mae: self.mae,
            mfe: self.mfe,
            initial_risk,
            r_multiple,
        }
    }
}

/// Snapshot of the open trade handed to the per-bar exit hook.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeState {
    pub bar_index: usize,
    pub bars_held: usize,
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
    pub unrealized_pnl: f64,
    pub mae: f64,
    pub mfe: f64,
    /// Trades closed earlier in this run.
    pub trade_count: usize,
}

impl TradeState {
    pub const FIELDS: [&'static str; 13] = [
        "bar_index",
        "bars_held",
        "direction",
        "is_long",
        "is_short",
        "entry_price",
        "stop_loss",
        "take_profit",
        "size",
        "unrealized_pnl",
        "mae",
        "mfe",
        "trade_count",
    ];

    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "bar_index" => Value::Num(self.bar_index as f64),
            "bars_held" => Value::Num(self.bars_held as f64),
            "direction" => Value::Num(self.direction.sign()),
            "is_long" => Value::Bool(self.direction == Direction::Long),
            "is_short" => Value::Bool(self.direction == Direction::Short),
            "entry_price" => Value::Num(self.entry_price),
            "stop_loss" => Value::Num(self.stop_loss),
            "take_profit" => Value::Num(self.take_profit),
            "size" => Value::Num(self.size),
            "unrealized_pnl" => Value::Num(self.unrealized_pnl),
            "mae" => Value::Num(self.mae),
            "mfe" => Value::Num(self.mfe),
            "trade_count" => Value::Num(self.trade_count as f64),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub direction: Direction,
    pub size: f64,
    pub gross_pnl: f64,
    pub commission: f64,
    pub pnl: f64,
    pub exit_reason: ExitReason,
    /// Nanoseconds between entry and exit.
    pub duration: i64,
    pub bars_held: usize,
    pub mae: f64,
    pub mfe: f64,
    pub initial_risk: Option<f64>,
    pub r_multiple: Option<f64>,
}
