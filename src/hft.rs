//! HFT Bot - multi-loop worker orchestrator
//!
//! One run/stop lifecycle over three concurrent monitoring loops: mempool
//! scanning, position tracking, and statistics aggregation. The decision
//! logic is injected through the strategy seams; by default the bot observes
//! and never trades.

use crate::registry::ConnectionRegistry;
use crate::store::RecordStore;
use crate::strategy::{ChainProvider, ClosePolicy, OpportunityEvaluator, TradeExecutor};
use crate::types::{
    BotSettings, BotStats, PendingTx, Position, PositionStatus, SettingsUpdate, Trade, TradeSide,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Delay between mempool scans, bounds the provider request rate
const MEMPOOL_INTERVAL: Duration = Duration::from_millis(100);
/// Delay between position monitoring passes
const POSITION_INTERVAL: Duration = Duration::from_secs(1);
/// Delay between statistics recomputations
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Bot status snapshot for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub is_running: bool,
    pub total_trades: usize,
    pub success_rate: f64,
    pub active_positions: usize,
    pub last_update: DateTime<Utc>,
}

/// Worker orchestrator for the trading bot
pub struct HftBot {
    settings: RwLock<BotSettings>,
    positions: RwLock<Vec<Position>>,
    history: RwLock<Vec<Trade>>,

    is_running: AtomicBool,
    run_token: parking_lot::Mutex<CancellationToken>,

    provider: Arc<dyn ChainProvider>,
    evaluator: Arc<dyn OpportunityEvaluator>,
    close_policy: Arc<dyn ClosePolicy>,
    executor: Arc<dyn TradeExecutor>,

    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn RecordStore>,
}

impl HftBot {
    pub fn new(
        settings: BotSettings,
        provider: Arc<dyn ChainProvider>,
        evaluator: Arc<dyn OpportunityEvaluator>,
        close_policy: Arc<dyn ClosePolicy>,
        executor: Arc<dyn TradeExecutor>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            positions: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            is_running: AtomicBool::new(false),
            run_token: parking_lot::Mutex::new(CancellationToken::new()),
            provider,
            evaluator,
            close_policy,
            executor,
            registry,
            store,
        }
    }

    /// Start the three monitoring loops. Returns false if already running.
    pub fn start(self: Arc<Self>) -> bool {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let token = CancellationToken::new();
        *self.run_token.lock() = token.clone();

        info!("HFT bot started");
        let bot = self;
        tokio::spawn(async move {
            let loops = tokio::spawn({
                let bot = Arc::clone(&bot);
                let token = token.clone();
                async move {
                    tokio::join!(
                        bot.run_mempool_loop(&token),
                        bot.run_position_loop(&token),
                        bot.run_stats_loop(&token),
                    );
                }
            });
            // A panic in the loops is a coordination fault: flip back to
            // Stopped rather than leaving a running flag with no workers.
            if let Err(e) = loops.await {
                warn!("HFT bot coordination failure: {}", e);
            }
            // The flag belongs to the newest run: once stop() has cancelled
            // this token, a fresh start() may already own it.
            if !token.is_cancelled() {
                bot.is_running.store(false, Ordering::SeqCst);
            }
            info!("HFT bot stopped");
        });
        true
    }

    /// Request a stop. Loops observe it within one of their own intervals.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.run_token.lock().cancel();
        info!("HFT bot stop requested");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Merge a partial settings update; safe while running
    pub async fn update_settings(&self, update: &SettingsUpdate) {
        let mut settings = self.settings.write().await;
        settings.apply(update);
        info!("Bot settings updated: {:?}", *settings);
    }

    pub async fn settings(&self) -> BotSettings {
        self.settings.read().await.clone()
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.positions.read().await.clone()
    }

    pub async fn trade_history(&self) -> Vec<Trade> {
        self.history.read().await.clone()
    }

    pub async fn status(&self) -> BotStatus {
        let stats = self.compute_stats().await;
        BotStatus {
            is_running: self.is_running(),
            total_trades: stats.total_trades,
            success_rate: stats.success_rate,
            active_positions: stats.active_positions,
            last_update: stats.timestamp,
        }
    }

    // ==========================================
    // Opportunity loop
    // ==========================================

    async fn run_mempool_loop(&self, token: &CancellationToken) {
        while self.is_running() {
            match self.provider.pending_transactions().await {
                Ok(txs) => {
                    let settings = self.settings.read().await.clone();
                    for tx in &txs {
                        if self.positions.read().await.len() >= settings.max_positions {
                            break;
                        }
                        if self.evaluator.is_profitable(tx, &settings) {
                            self.execute_opportunity(tx, &settings).await;
                        }
                    }
                }
                Err(e) => warn!("Error monitoring mempool: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(MEMPOOL_INTERVAL) => {}
            }
        }
    }

    async fn execute_opportunity(&self, tx: &PendingTx, settings: &BotSettings) {
        match self.executor.execute(tx, settings).await {
            Ok(trade) => {
                info!(
                    "Executed trade on {} ({} @ {})",
                    trade.token_symbol, trade.amount, trade.price
                );
                if trade.side == TradeSide::Buy {
                    let position =
                        Position::new(trade.token_symbol.clone(), trade.amount, trade.price);
                    self.open_position(position).await;
                }
                self.record_trade(trade).await;
            }
            Err(e) => warn!("Trade execution failed for {}: {}", tx.hash, e),
        }
    }

    async fn open_position(&self, position: Position) {
        if let Err(e) = self.store.upsert_position(position.clone()).await {
            warn!("Failed to persist position {}: {}", position.id, e);
        }
        self.registry.broadcast_position_update(&position, None);
        self.positions.write().await.push(position);
    }

    async fn record_trade(&self, trade: Trade) {
        if let Err(e) = self.store.insert_trade(trade.clone()).await {
            warn!("Failed to persist trade {}: {}", trade.id, e);
        }
        self.registry.broadcast_trade_update(&trade);
        self.history.write().await.push(trade);
    }

    // ==========================================
    // Position loop
    // ==========================================

    async fn run_position_loop(&self, token: &CancellationToken) {
        while self.is_running() {
            let snapshot = self.positions.read().await.clone();
            for position in snapshot {
                let price = match self.provider.token_price(&position.token_symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Price fetch failed for {}: {}", position.token_symbol, e);
                        continue;
                    }
                };

                let refreshed = {
                    let mut positions = self.positions.write().await;
                    match positions.iter_mut().find(|p| p.id == position.id) {
                        Some(p) => {
                            p.current_price = price;
                            p.pnl = p.pnl_at(price);
                            p.clone()
                        }
                        // Closed between snapshot and now
                        None => continue,
                    }
                };
                self.registry.broadcast_position_update(&refreshed, None);

                if self.close_policy.should_close(&refreshed, price) {
                    self.close_position(refreshed, price).await;
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(POSITION_INTERVAL) => {}
            }
        }
    }

    async fn close_position(&self, position: Position, price: f64) {
        match self.executor.close_position(&position, price).await {
            Ok(trade) => {
                self.positions.write().await.retain(|p| p.id != position.id);
                if let Err(e) = self.store.remove_position(&position.id).await {
                    warn!("Failed to remove position {}: {}", position.id, e);
                }

                let mut closed = position;
                closed.status = PositionStatus::Closed;
                closed.current_price = price;
                closed.pnl = trade.pnl;
                info!(
                    "Closed position {} on {} (pnl {:.4})",
                    closed.id, closed.token_symbol, closed.pnl
                );
                self.registry.broadcast_position_update(&closed, None);
                self.record_trade(trade).await;
            }
            Err(e) => warn!("Failed to close position {}: {}", position.id, e),
        }
    }

    // ==========================================
    // Statistics loop
    // ==========================================

    async fn run_stats_loop(&self, token: &CancellationToken) {
        while self.is_running() {
            let stats = self.compute_stats().await;
            info!(
                "Bot stats updated: trades={} success_rate={:.1}% active_positions={}",
                stats.total_trades, stats.success_rate, stats.active_positions
            );
            self.registry.broadcast_bot_status(serde_json::json!({
                "is_running": true,
                "total_trades": stats.total_trades,
                "success_rate": stats.success_rate,
                "active_positions": stats.active_positions,
            }));

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(STATS_INTERVAL) => {}
            }
        }
    }

    async fn compute_stats(&self) -> BotStats {
        let history = self.history.read().await;
        let total = history.len();
        let successful = history.iter().filter(|t| t.success).count();
        drop(history);

        BotStats {
            total_trades: total,
            success_rate: if total > 0 {
                successful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            active_positions: self.positions.read().await.len(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::strategy::{ExecutorError, NullClosePolicy, NullEvaluator, NullExecutor, ProviderError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::unbounded_channel;

    struct CountingProvider {
        txs: Vec<PendingTx>,
        price: f64,
        mempool_calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(txs: Vec<PendingTx>, price: f64) -> Arc<Self> {
            Arc::new(Self {
                txs,
                price,
                mempool_calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.mempool_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainProvider for CountingProvider {
        async fn pending_transactions(&self) -> Result<Vec<PendingTx>, ProviderError> {
            self.mempool_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.txs.clone())
        }

        async fn token_price(&self, _token: &str) -> Result<f64, ProviderError> {
            Ok(self.price)
        }
    }

    struct AlwaysProfitable;
    impl OpportunityEvaluator for AlwaysProfitable {
        fn is_profitable(&self, _tx: &PendingTx, _settings: &BotSettings) -> bool {
            true
        }
    }

    struct AlwaysClose;
    impl ClosePolicy for AlwaysClose {
        fn should_close(&self, _position: &Position, _price: f64) -> bool {
            true
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl TradeExecutor for EchoExecutor {
        async fn execute(
            &self,
            _tx: &PendingTx,
            _settings: &BotSettings,
        ) -> Result<Trade, ExecutorError> {
            Ok(Trade::new("ETH", 1.0, 1800.0, TradeSide::Buy, 0.0))
        }

        async fn close_position(
            &self,
            position: &Position,
            price: f64,
        ) -> Result<Trade, ExecutorError> {
            Ok(Trade::new(
                position.token_symbol.clone(),
                position.amount,
                price,
                TradeSide::Sell,
                position.pnl_at(price),
            ))
        }
    }

    fn sample_tx(hash: &str) -> PendingTx {
        PendingTx {
            hash: hash.into(),
            from: "0xsender".into(),
            to: Some("0xpool".into()),
            value: 10.0,
            gas_price: 25.0,
        }
    }

    struct TestBot {
        bot: Arc<HftBot>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryStore>,
        provider: Arc<CountingProvider>,
    }

    fn test_bot(
        settings: BotSettings,
        provider: Arc<CountingProvider>,
        evaluator: Arc<dyn OpportunityEvaluator>,
        close_policy: Arc<dyn ClosePolicy>,
        executor: Arc<dyn TradeExecutor>,
    ) -> TestBot {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let bot = Arc::new(HftBot::new(
            settings,
            provider.clone() as Arc<dyn ChainProvider>,
            evaluator,
            close_policy,
            executor,
            registry.clone(),
            store.clone(),
        ));
        TestBot {
            bot,
            registry,
            store,
            provider,
        }
    }

    fn null_bot() -> TestBot {
        test_bot(
            BotSettings::default(),
            CountingProvider::new(Vec::new(), 0.0),
            Arc::new(NullEvaluator),
            Arc::new(NullClosePolicy),
            Arc::new(NullExecutor),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_quiesces() {
        let t = null_bot();

        assert!(t.bot.clone().start());
        assert!(t.bot.is_running());
        assert!(!t.bot.clone().start());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(t.provider.calls() > 0);

        t.bot.stop();
        // Give every loop more than one interval to observe the stop.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!t.bot.is_running());

        let calls_at_stop = t.provider.calls();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(t.provider.calls(), calls_at_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_stays_running() {
        let t = null_bot();

        assert!(t.bot.clone().start());
        tokio::time::sleep(Duration::from_millis(350)).await;

        // Stop and restart back-to-back, before the first run's loops have
        // had an interval to wind down.
        t.bot.stop();
        assert!(t.bot.clone().start());

        // Long enough for the first run's supervisor to finish; it must not
        // clear the flag out from under the second run.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(t.bot.is_running());

        let calls_before = t.provider.calls();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(t.provider.calls() > calls_before);

        t.bot.stop();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!t.bot.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn null_strategies_never_trade() {
        let t = test_bot(
            BotSettings::default(),
            CountingProvider::new(vec![sample_tx("0x1")], 1850.0),
            Arc::new(NullEvaluator),
            Arc::new(NullClosePolicy),
            Arc::new(NullExecutor),
        );

        t.bot.clone().start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        t.bot.stop();

        assert!(t.bot.trade_history().await.is_empty());
        assert!(t.bot.positions().await.is_empty());
        assert_eq!(t.store.trade_counts().await.unwrap(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn opportunity_opens_position_up_to_limit() {
        let t = test_bot(
            BotSettings {
                max_positions: 1,
                ..Default::default()
            },
            CountingProvider::new(vec![sample_tx("0x1"), sample_tx("0x2")], 1850.0),
            Arc::new(AlwaysProfitable),
            Arc::new(NullClosePolicy),
            Arc::new(EchoExecutor),
        );

        let (tx, mut rx) = unbounded_channel();
        t.registry.connect("dash", tx, &["trades".into()]);

        t.bot.clone().start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        t.bot.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(t.bot.positions().await.len(), 1);
        assert_eq!(t.bot.trade_history().await.len(), 1);
        assert_eq!(t.store.trade_counts().await.unwrap().0, 1);

        let raw = rx.try_recv().expect("trade_update broadcast");
        let msg: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg["type"], "trade_update");
        assert_eq!(msg["data"]["side"], "buy");
    }

    #[tokio::test(start_paused = true)]
    async fn close_policy_closes_and_records() {
        let t = test_bot(
            BotSettings::default(),
            CountingProvider::new(Vec::new(), 2000.0),
            Arc::new(NullEvaluator),
            Arc::new(AlwaysClose),
            Arc::new(EchoExecutor),
        );

        let position = Position::new("ETH", 1.0, 1800.0);
        let position_id = position.id.clone();
        t.store.upsert_position(position.clone()).await.unwrap();
        t.bot.positions.write().await.push(position);

        let (tx, mut rx) = unbounded_channel();
        t.registry
            .connect("dash", tx, &["positions".into(), "trades".into()]);

        t.bot.clone().start();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        t.bot.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(t.bot.positions().await.is_empty());
        assert!(t.store.positions().await.unwrap().is_empty());

        let history = t.bot.trade_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].side, TradeSide::Sell);
        assert!(history[0].pnl > 0.0);
        assert!(history[0].success);

        let mut saw_closed_position = false;
        let mut saw_trade = false;
        while let Ok(raw) = rx.try_recv() {
            let msg: serde_json::Value = serde_json::from_str(&raw).unwrap();
            match msg["type"].as_str() {
                Some("position_update") if msg["data"]["status"] == "closed" => {
                    assert_eq!(msg["data"]["id"], position_id.as_str());
                    saw_closed_position = true;
                }
                Some("trade_update") => saw_trade = true,
                _ => {}
            }
        }
        assert!(saw_closed_position);
        assert!(saw_trade);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_update_applies_while_running() {
        let t = null_bot();
        t.bot.clone().start();

        t.bot
            .update_settings(&SettingsUpdate {
                risk_per_trade: Some(2.0),
                ..Default::default()
            })
            .await;

        let settings = t.bot.settings().await;
        assert_eq!(settings.risk_per_trade, 2.0);
        assert_eq!(settings.max_positions, 5);
        assert_eq!(settings.min_spread, 0.05);

        t.bot.stop();
    }

    #[tokio::test]
    async fn status_reflects_history_and_positions() {
        let t = null_bot();
        {
            let mut history = t.bot.history.write().await;
            history.push(Trade::new("ETH", 1.0, 100.0, TradeSide::Sell, 5.0));
            history.push(Trade::new("ETH", 1.0, 100.0, TradeSide::Sell, 3.0));
            history.push(Trade::new("ETH", 1.0, 100.0, TradeSide::Sell, -1.0));
        }
        t.bot.positions.write().await.push(Position::new("ETH", 1.0, 100.0));

        let status = t.bot.status().await;
        assert!(!status.is_running);
        assert_eq!(status.total_trades, 3);
        assert!((status.success_rate - 66.666).abs() < 0.1);
        assert_eq!(status.active_positions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_loop_broadcasts_bot_status() {
        let t = null_bot();
        let (tx, mut rx) = unbounded_channel();
        t.registry.connect("dash", tx, &["bot_status".into()]);

        t.bot.clone().start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        t.bot.stop();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let raw = rx.try_recv().expect("bot_status broadcast");
        let msg: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg["type"], "bot_status");
        assert_eq!(msg["data"]["total_trades"], 0);
        assert!(msg["timestamp"].is_string());
    }
}
