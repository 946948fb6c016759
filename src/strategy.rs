//! Injectable strategy seams for the HFT bot
//!
//! The decision logic (opportunity detection, close policy) and the
//! chain-facing operations (mempool, prices, execution) are the parts meant
//! to vary, so the bot depends on them abstractly. The null implementations
//! here preserve the stub behavior: never trade, never close.

use crate::types::{BotSettings, PendingTx, Position, Trade};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown token: {0}")]
    UnknownToken(String),
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Trade execution not implemented")]
    NotImplemented,
    #[error("Execution failed: {0}")]
    Failed(String),
}

/// Blockchain/market-data provider: polled, never pushed
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn pending_transactions(&self) -> Result<Vec<PendingTx>, ProviderError>;
    async fn token_price(&self, token: &str) -> Result<f64, ProviderError>;
}

/// Decides whether a pending transaction is worth trading against
pub trait OpportunityEvaluator: Send + Sync {
    fn is_profitable(&self, tx: &PendingTx, settings: &BotSettings) -> bool;
}

/// Decides whether an open position should be closed at the current price
pub trait ClosePolicy: Send + Sync {
    fn should_close(&self, position: &Position, current_price: f64) -> bool;
}

/// Executes trades against the chain
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(
        &self,
        tx: &PendingTx,
        settings: &BotSettings,
    ) -> Result<Trade, ExecutorError>;

    async fn close_position(
        &self,
        position: &Position,
        price: f64,
    ) -> Result<Trade, ExecutorError>;
}

// ==========================================
// Null / stub defaults
// ==========================================

/// Never sees an opportunity
#[derive(Debug, Default)]
pub struct NullEvaluator;

impl OpportunityEvaluator for NullEvaluator {
    fn is_profitable(&self, _tx: &PendingTx, _settings: &BotSettings) -> bool {
        false
    }
}

/// Never closes a position
#[derive(Debug, Default)]
pub struct NullClosePolicy;

impl ClosePolicy for NullClosePolicy {
    fn should_close(&self, _position: &Position, _current_price: f64) -> bool {
        false
    }
}

/// Refuses every execution attempt
#[derive(Debug, Default)]
pub struct NullExecutor;

#[async_trait]
impl TradeExecutor for NullExecutor {
    async fn execute(
        &self,
        _tx: &PendingTx,
        _settings: &BotSettings,
    ) -> Result<Trade, ExecutorError> {
        Err(ExecutorError::NotImplemented)
    }

    async fn close_position(
        &self,
        _position: &Position,
        _price: f64,
    ) -> Result<Trade, ExecutorError> {
        Err(ExecutorError::NotImplemented)
    }
}

/// Empty mempool and a constant price for every token
#[derive(Debug, Default)]
pub struct StaticProvider {
    pub price: f64,
}

#[async_trait]
impl ChainProvider for StaticProvider {
    async fn pending_transactions(&self) -> Result<Vec<PendingTx>, ProviderError> {
        Ok(Vec::new())
    }

    async fn token_price(&self, _token: &str) -> Result<f64, ProviderError> {
        Ok(self.price)
    }
}
