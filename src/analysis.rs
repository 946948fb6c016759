//! Topic Session Manager - per-symbol analysis broadcast sessions
//!
//! Each symbol with at least one subscriber gets exactly one background
//! producer task that synthesizes an analysis snapshot every interval and
//! fans it out to the symbol's subscribers. The producer starts with the
//! first subscriber and is cancelled when the last one leaves.

use crate::registry::{ConnectionId, ConnectionSender};
use crate::types::{
    AnalysisSnapshot, FibonacciAnalysis, FibonacciLevel, KeyLevels, SentimentAnalysis,
    TechnicalIndicators, WyckoffAnalysis,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between analysis snapshots for an active symbol
pub const ANALYSIS_INTERVAL: Duration = Duration::from_secs(5);

struct Producer {
    token: CancellationToken,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

struct TopicSession {
    subscribers: HashMap<ConnectionId, ConnectionSender>,
    producer: Producer,
}

/// Session map shared between the manager and its producer tasks
#[derive(Default)]
struct SessionMap {
    sessions: Mutex<HashMap<String, TopicSession>>,
}

impl SessionMap {
    /// One atomic delivery pass over the symbol's current subscriber set.
    /// Failed sends are removed afterward; if that drains the set the
    /// producer is cancelled as part of the same pass.
    fn broadcast_to(&self, symbol: &str, message: &serde_json::Value) {
        let payload = message.to_string();

        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(symbol) else {
            return;
        };

        let dead: Vec<ConnectionId> = session
            .subscribers
            .iter()
            .filter(|(_, sender)| sender.send(payload.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();

        for id in dead {
            warn!("Dropping dead analysis subscriber {} for {}", id, symbol);
            session.subscribers.remove(&id);
        }
        if session.subscribers.is_empty() {
            session.producer.token.cancel();
            sessions.remove(symbol);
        }
    }
}

/// Per-symbol subscriber sets plus their producer tasks
#[derive(Default)]
pub struct AnalysisSessionManager {
    map: Arc<SessionMap>,
    next_id: AtomicU64,
}

impl AnalysisSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber for `symbol`, starting the producer if this is the
    /// symbol's first one. Returns the subscriber's connection id.
    pub fn connect(&self, symbol: &str, sender: ConnectionSender) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.map.sessions.lock();
        let session = sessions.entry(symbol.to_string()).or_insert_with(|| {
            info!("Starting analysis producer for {}", symbol);
            TopicSession {
                subscribers: HashMap::new(),
                producer: spawn_producer(Arc::clone(&self.map), symbol),
            }
        });
        session.subscribers.insert(connection_id, sender);
        connection_id
    }

    /// Remove a subscriber; cancels and discards the producer when the
    /// symbol's subscriber set drains.
    pub fn disconnect(&self, symbol: &str, connection_id: ConnectionId) {
        let mut sessions = self.map.sessions.lock();
        let Some(session) = sessions.get_mut(symbol) else {
            debug!("Disconnect for unknown symbol {}", symbol);
            return;
        };
        session.subscribers.remove(&connection_id);
        if session.subscribers.is_empty() {
            info!("Last subscriber left {}, cancelling producer", symbol);
            session.producer.token.cancel();
            sessions.remove(symbol);
        }
    }

    /// Whether a producer session is live for `symbol`
    pub fn session_active(&self, symbol: &str) -> bool {
        self.map.sessions.lock().contains_key(symbol)
    }

    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.map
            .sessions
            .lock()
            .get(symbol)
            .map(|s| s.subscribers.len())
            .unwrap_or(0)
    }
}

fn spawn_producer(map: Arc<SessionMap>, symbol: &str) -> Producer {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let symbol = symbol.to_string();

    let handle = tokio::spawn(async move {
        loop {
            if task_token.is_cancelled() {
                break;
            }

            match serde_json::to_value(synthesize_snapshot()) {
                Ok(analysis) => {
                    let message = serde_json::json!({
                        "type": "analysis",
                        "symbol": symbol,
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "analysis": analysis,
                    });
                    map.broadcast_to(&symbol, &message);
                }
                Err(e) => warn!("Failed to build analysis for {}: {}", symbol, e),
            }

            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = tokio::time::sleep(ANALYSIS_INTERVAL) => {}
            }
        }
        debug!("Analysis producer for {} terminated", symbol);
    });

    Producer { token, handle }
}

/// Synthesize a plausible multi-field analysis snapshot
fn synthesize_snapshot() -> AnalysisSnapshot {
    let mut rng = rand::thread_rng();

    let price: f64 = 1850.0 * rng.gen_range(0.98..1.02);
    let score: f64 = rng.gen_range(25.0..90.0);
    let trend = if score >= 60.0 {
        "bullish"
    } else if score >= 40.0 {
        "neutral"
    } else {
        "bearish"
    };

    let support = price * 0.973;
    let resistance = price * 1.027;
    let range = resistance - support;

    let phases = ["accumulation", "markup", "distribution", "markdown"];
    let phase = phases[rng.gen_range(0..phases.len())];
    let description = match phase {
        "accumulation" => "Sideways range with absorption near support",
        "markup" => "Market showing strong momentum with increasing volume",
        "distribution" => "Supply overcoming demand near resistance",
        _ => "Downtrend with weak rallies and expanding volume",
    };

    let levels = [0.236, 0.382, 0.5, 0.618, 0.786]
        .iter()
        .map(|ratio| {
            let value = resistance - ratio * range;
            FibonacciLevel {
                name: ratio.to_string(),
                value: (value * 100.0).round() / 100.0,
                level_type: if value > price { "resistance" } else { "support" }.to_string(),
            }
        })
        .collect();

    AnalysisSnapshot {
        sentiment: SentimentAnalysis {
            score: score.round(),
            trend: trend.to_string(),
            confidence: rng.gen_range(60.0..95.0_f64).round(),
        },
        technical: TechnicalIndicators {
            rsi: rng.gen_range(28.0..72.0_f64).round(),
            macd: (rng.gen_range(-5.0..5.0_f64) * 10.0).round() / 10.0,
            ma: (price * 100.0).round() / 100.0,
            volume: ["LOW", "MEDIUM", "HIGH"][rng.gen_range(0..3)].to_string(),
        },
        wyckoff: WyckoffAnalysis {
            phase: phase.to_string(),
            progress: rng.gen_range(0.0..100.0_f64).round(),
            description: description.to_string(),
            key_levels: KeyLevels {
                support: (support * 100.0).round() / 100.0,
                resistance: (resistance * 100.0).round() / 100.0,
            },
        },
        fibonacci: FibonacciAnalysis {
            levels,
            current_price: (price * 100.0).round() / 100.0,
        },
    }
}
