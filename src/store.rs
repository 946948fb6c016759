//! Record store boundary
//!
//! Persistence lives behind this trait; the backend itself only depends on
//! the create/query surface. `MemoryStore` is the single-process, in-memory
//! implementation wired by the composition root.

use crate::types::{Position, Trade};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_trade(&self, trade: Trade) -> Result<(), StoreError>;

    /// Trades newest-first, paginated
    async fn trades(&self, limit: usize, offset: usize) -> Result<Vec<Trade>, StoreError>;

    /// (total, successful) trade counts
    async fn trade_counts(&self) -> Result<(usize, usize), StoreError>;

    async fn upsert_position(&self, position: Position) -> Result<(), StoreError>;
    async fn remove_position(&self, position_id: &str) -> Result<(), StoreError>;
    async fn positions(&self) -> Result<Vec<Position>, StoreError>;
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryStore {
    trades: Mutex<Vec<Trade>>,
    positions: Mutex<Vec<Position>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_trade(&self, trade: Trade) -> Result<(), StoreError> {
        self.trades.lock().push(trade);
        Ok(())
    }

    async fn trades(&self, limit: usize, offset: usize) -> Result<Vec<Trade>, StoreError> {
        let trades = self.trades.lock();
        Ok(trades.iter().rev().skip(offset).take(limit).cloned().collect())
    }

    async fn trade_counts(&self) -> Result<(usize, usize), StoreError> {
        let trades = self.trades.lock();
        let successful = trades.iter().filter(|t| t.success).count();
        Ok((trades.len(), successful))
    }

    async fn upsert_position(&self, position: Position) -> Result<(), StoreError> {
        let mut positions = self.positions.lock();
        match positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position,
            None => positions.push(position),
        }
        Ok(())
    }

    async fn remove_position(&self, position_id: &str) -> Result<(), StoreError> {
        let mut positions = self.positions.lock();
        let before = positions.len();
        positions.retain(|p| p.id != position_id);
        if positions.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.positions.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;

    #[tokio::test]
    async fn trades_paginate_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .insert_trade(Trade::new(format!("T{}", i), 1.0, 100.0, TradeSide::Buy, 1.0))
                .await
                .unwrap();
        }

        let page = store.trades(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].token_symbol, "T4");
        assert_eq!(page[1].token_symbol, "T3");

        let next = store.trades(2, 2).await.unwrap();
        assert_eq!(next[0].token_symbol, "T2");
    }

    #[tokio::test]
    async fn trade_counts_track_success() {
        let store = MemoryStore::new();
        store
            .insert_trade(Trade::new("ETH", 1.0, 100.0, TradeSide::Sell, 5.0))
            .await
            .unwrap();
        store
            .insert_trade(Trade::new("ETH", 1.0, 100.0, TradeSide::Sell, -2.0))
            .await
            .unwrap();

        assert_eq!(store.trade_counts().await.unwrap(), (2, 1));
    }

    #[tokio::test]
    async fn position_upsert_and_remove() {
        let store = MemoryStore::new();
        let mut position = Position::new("ETH", 1.0, 1800.0);
        store.upsert_position(position.clone()).await.unwrap();

        position.current_price = 1900.0;
        store.upsert_position(position.clone()).await.unwrap();

        let positions = store.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].current_price, 1900.0);

        store.remove_position(&position.id).await.unwrap();
        assert!(store.positions().await.unwrap().is_empty());
        assert!(matches!(
            store.remove_position(&position.id).await,
            Err(StoreError::NotFound)
        ));
    }
}
