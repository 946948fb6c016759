//! Shared domain types for the dashboard backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a trading position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An active (or just-closed) trading position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token_symbol: String,
    pub amount: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn new(token_symbol: impl Into<String>, amount: f64, entry_price: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token_symbol: token_symbol.into(),
            amount,
            entry_price,
            current_price: entry_price,
            pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
        }
    }

    /// Unrealized P&L at the given market price
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.amount
    }
}

/// Buy or sell side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Outcome of an execution attempt, immutable once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub token_symbol: String,
    pub amount: f64,
    pub price: f64,
    pub side: TradeSide,
    pub pnl: f64,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        token_symbol: impl Into<String>,
        amount: f64,
        price: f64,
        side: TradeSide,
        pnl: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token_symbol: token_symbol.into(),
            amount,
            price,
            side,
            pnl,
            success: pnl > 0.0,
            executed_at: Utc::now(),
        }
    }
}

/// Bot settings, mutable at runtime through the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSettings {
    pub max_positions: usize,
    pub risk_per_trade: f64,
    pub min_spread: f64,
    pub max_slippage: f64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            max_positions: 5,
            risk_per_trade: 1.5,
            min_spread: 0.05,
            max_slippage: 0.1,
        }
    }
}

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub max_positions: Option<usize>,
    pub risk_per_trade: Option<f64>,
    pub min_spread: Option<f64>,
    pub max_slippage: Option<f64>,
}

impl BotSettings {
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(v) = update.max_positions {
            self.max_positions = v;
        }
        if let Some(v) = update.risk_per_trade {
            self.risk_per_trade = v;
        }
        if let Some(v) = update.min_spread {
            self.min_spread = v;
        }
        if let Some(v) = update.max_slippage {
            self.max_slippage = v;
        }
    }
}

/// Aggregate bot performance counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStats {
    pub total_trades: usize,
    pub success_rate: f64,
    pub active_positions: usize,
    pub timestamp: DateTime<Utc>,
}

impl Default for BotStats {
    fn default() -> Self {
        Self {
            total_trades: 0,
            success_rate: 0.0,
            active_positions: 0,
            timestamp: Utc::now(),
        }
    }
}

/// A pending mempool transaction, as handed to the opportunity evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: f64,
    pub gas_price: f64,
}

// ==========================================
// Analysis payload (per-symbol producer)
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub score: f64,
    pub trend: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi: f64,
    pub macd: f64,
    pub ma: f64,
    pub volume: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLevels {
    pub support: f64,
    pub resistance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WyckoffAnalysis {
    pub phase: String,
    pub progress: f64,
    pub description: String,
    #[serde(rename = "keyLevels")]
    pub key_levels: KeyLevels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FibonacciLevel {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub level_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FibonacciAnalysis {
    pub levels: Vec<FibonacciLevel>,
    #[serde(rename = "currentPrice")]
    pub current_price: f64,
}

/// Full per-symbol analysis snapshot broadcast by the producer task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub sentiment: SentimentAnalysis,
    pub technical: TechnicalIndicators,
    pub wyckoff: WyckoffAnalysis,
    pub fibonacci: FibonacciAnalysis,
}
