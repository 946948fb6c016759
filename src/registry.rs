//! Connection Registry - identity-scoped websocket fan-out
//!
//! Tracks every live connection grouped by client identity, plus each
//! identity's channel subscriptions. All mutation and delivery runs under one
//! coarse registry lock; sends go through unbounded channels so the lock is
//! never held across an await.

use crate::types::{Position, Trade};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Registry-wide unique connection id. Monotonic counter, never time-based:
/// rapid reconnects must not collide.
pub type ConnectionId = u64;

/// Outbound half of a connection. The socket-writer task owns the receiver;
/// a closed receiver is the signal that the connection is dead.
pub type ConnectionSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct RegistryInner {
    /// client id -> connection id -> outbound sender
    connections: HashMap<String, HashMap<ConnectionId, ConnectionSender>>,
    /// client id -> subscribed channels
    subscriptions: HashMap<String, HashSet<String>>,
}

/// Identity-scoped connection and subscription registry
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `client_id`, optionally subscribing the
    /// identity to `channels`. Returns the new connection id.
    pub fn connect(
        &self,
        client_id: &str,
        sender: ConnectionSender,
        channels: &[String],
    ) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner
            .connections
            .entry(client_id.to_string())
            .or_default()
            .insert(connection_id, sender);
        let subs = inner
            .subscriptions
            .entry(client_id.to_string())
            .or_default();
        subs.extend(channels.iter().cloned());
        drop(inner);

        info!("Client {} connected (connection {})", client_id, connection_id);
        connection_id
    }

    /// Remove a connection; drops the identity entirely when its last
    /// connection goes. Unknown ids are logged, not fatal.
    pub fn disconnect(&self, client_id: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(client_id) {
            Some(conns) => {
                if conns.remove(&connection_id).is_none() {
                    debug!(
                        "Connection {} already gone for client {}",
                        connection_id, client_id
                    );
                }
                if conns.is_empty() {
                    inner.connections.remove(client_id);
                    inner.subscriptions.remove(client_id);
                }
            }
            None => debug!("Disconnect for unknown client {}", client_id),
        }
        drop(inner);

        info!("Client {} disconnected (connection {})", client_id, connection_id);
    }

    /// Subscribe an identity to channels. No-op if the identity is unknown.
    pub fn subscribe(&self, client_id: &str, channels: &[String]) {
        let mut inner = self.inner.lock();
        if let Some(subs) = inner.subscriptions.get_mut(client_id) {
            subs.extend(channels.iter().cloned());
        }
    }

    /// Unsubscribe an identity from channels. No-op if the identity is unknown.
    pub fn unsubscribe(&self, client_id: &str, channels: &[String]) {
        let mut inner = self.inner.lock();
        if let Some(subs) = inner.subscriptions.get_mut(client_id) {
            for channel in channels {
                subs.remove(channel);
            }
        }
    }

    /// Deliver `message` to subscribed connections, stamping a server
    /// timestamp first.
    ///
    /// With `client_id` set, delivery targets only that identity (still
    /// honoring the `channel` filter). Otherwise every identity subscribed to
    /// `channel` receives it, or everyone when no channel is given.
    ///
    /// A failed send means the writer task is gone: the connection is removed
    /// in the same pass, and the identity with it if that was its last one.
    pub fn broadcast(
        &self,
        mut message: serde_json::Value,
        channel: Option<&str>,
        client_id: Option<&str>,
    ) {
        if let Some(obj) = message.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        let payload = message.to_string();

        let mut inner = self.inner.lock();
        let mut dead: Vec<(String, ConnectionId)> = Vec::new();

        match client_id {
            Some(cid) => {
                if Self::is_subscribed(&inner.subscriptions, cid, channel) {
                    if let Some(conns) = inner.connections.get(cid) {
                        Self::send_all(cid, conns, &payload, &mut dead);
                    }
                }
            }
            None => {
                for (cid, conns) in &inner.connections {
                    if Self::is_subscribed(&inner.subscriptions, cid, channel) {
                        Self::send_all(cid, conns, &payload, &mut dead);
                    }
                }
            }
        }

        // Dead senders are implicit disconnects; clean them up before
        // releasing the lock.
        for (cid, conn_id) in dead {
            warn!(
                "Send failed for client {} connection {}, removing",
                cid, conn_id
            );
            if let Some(conns) = inner.connections.get_mut(&cid) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    inner.connections.remove(&cid);
                    inner.subscriptions.remove(&cid);
                }
            }
        }
    }

    fn is_subscribed(
        subscriptions: &HashMap<String, HashSet<String>>,
        client_id: &str,
        channel: Option<&str>,
    ) -> bool {
        match channel {
            None => true,
            Some(ch) => subscriptions
                .get(client_id)
                .is_some_and(|subs| subs.contains(ch)),
        }
    }

    fn send_all(
        client_id: &str,
        conns: &HashMap<ConnectionId, ConnectionSender>,
        payload: &str,
        dead: &mut Vec<(String, ConnectionId)>,
    ) {
        for (conn_id, sender) in conns {
            if sender.send(payload.to_string()).is_err() {
                dead.push((client_id.to_string(), *conn_id));
            }
        }
    }

    // ==========================================
    // Typed broadcast helpers
    // ==========================================

    pub fn broadcast_trade_update(&self, trade: &Trade) {
        let message = serde_json::json!({
            "type": "trade_update",
            "data": trade,
        });
        self.broadcast(message, Some("trades"), None);
    }

    pub fn broadcast_bot_status(&self, status: serde_json::Value) {
        let message = serde_json::json!({
            "type": "bot_status",
            "data": status,
        });
        self.broadcast(message, Some("bot_status"), None);
    }

    pub fn broadcast_position_update(&self, position: &Position, client_id: Option<&str>) {
        let message = serde_json::json!({
            "type": "position_update",
            "data": position,
        });
        self.broadcast(message, Some("positions"), client_id);
    }

    // ==========================================
    // Introspection
    // ==========================================

    pub fn client_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.values().map(|c| c.len()).sum()
    }

    pub fn subscriptions_of(&self, client_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .subscriptions
            .get(client_id)
            .map(|subs| {
                let mut channels: Vec<String> = subs.iter().cloned().collect();
                channels.sort();
                channels
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn recv_json(rx: &mut UnboundedReceiver<String>) -> serde_json::Value {
        let raw = rx.try_recv().expect("expected a delivered message");
        serde_json::from_str(&raw).expect("payload is JSON")
    }

    #[test]
    fn identity_exists_iff_it_has_connections() {
        let registry = ConnectionRegistry::new();
        let (tx_a, _rx_a) = unbounded_channel();
        let (tx_b, _rx_b) = unbounded_channel();

        let c1 = registry.connect("alice", tx_a, &["trades".into()]);
        let c2 = registry.connect("alice", tx_b, &[]);
        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.connection_count(), 2);
        assert_ne!(c1, c2);

        registry.disconnect("alice", c1);
        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.subscriptions_of("alice"), vec!["trades".to_string()]);

        registry.disconnect("alice", c2);
        assert_eq!(registry.client_count(), 0);
        assert!(registry.subscriptions_of("alice").is_empty());
    }

    #[test]
    fn disconnect_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.disconnect("ghost", 42);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn channel_filter_controls_delivery() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = unbounded_channel();
        registry.connect("alice", tx, &["trades".into()]);

        registry.broadcast(
            serde_json::json!({"type": "trade_update", "data": {}}),
            Some("trades"),
            None,
        );
        let msg = recv_json(&mut rx);
        assert_eq!(msg["type"], "trade_update");
        assert!(msg["timestamp"].is_string());

        registry.broadcast(
            serde_json::json!({"type": "position_update", "data": {}}),
            Some("positions"),
            None,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_channel_delivers_to_everyone() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        registry.connect("alice", tx_a, &["trades".into()]);
        registry.connect("bob", tx_b, &[]);

        registry.broadcast(serde_json::json!({"type": "error"}), None, None);
        assert_eq!(recv_json(&mut rx_a)["type"], "error");
        assert_eq!(recv_json(&mut rx_b)["type"], "error");
    }

    #[test]
    fn targeted_broadcast_reaches_every_connection_of_identity() {
        let registry = ConnectionRegistry::new();
        let (tx_1, mut rx_1) = unbounded_channel();
        let (tx_2, mut rx_2) = unbounded_channel();
        let (tx_other, mut rx_other) = unbounded_channel();
        registry.connect("alice", tx_1, &[]);
        registry.connect("alice", tx_2, &[]);
        registry.connect("bob", tx_other, &[]);

        registry.broadcast(
            serde_json::json!({"type": "bot_status", "data": {}}),
            None,
            Some("alice"),
        );
        assert_eq!(recv_json(&mut rx_1)["type"], "bot_status");
        assert_eq!(recv_json(&mut rx_2)["type"], "bot_status");
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = unbounded_channel();
        registry.connect("alice", tx, &["trades".into(), "positions".into()]);

        registry.unsubscribe("alice", &["trades".into()]);
        assert_eq!(registry.subscriptions_of("alice"), vec!["positions".to_string()]);

        registry.broadcast(serde_json::json!({"type": "trade_update"}), Some("trades"), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dead_send_removes_connection_and_drained_identity() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = unbounded_channel();
        registry.connect("alice", tx, &["trades".into()]);
        drop(rx);

        registry.broadcast(serde_json::json!({"type": "trade_update"}), Some("trades"), None);
        assert_eq!(registry.client_count(), 0);
        assert!(registry.subscriptions_of("alice").is_empty());
    }

    #[test]
    fn typed_helpers_route_to_their_channels() {
        use crate::types::{Trade, TradeSide};

        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = unbounded_channel();
        registry.connect("alice", tx, &["trades".into()]);

        let trade = Trade::new("ETH", 1.0, 1850.0, TradeSide::Buy, 4.2);
        registry.broadcast_trade_update(&trade);
        let msg = recv_json(&mut rx);
        assert_eq!(msg["type"], "trade_update");
        assert_eq!(msg["data"]["token_symbol"], "ETH");

        // Not subscribed to bot_status, so the helper must not deliver.
        registry.broadcast_bot_status(serde_json::json!({"is_running": true}));
        assert!(rx.try_recv().is_err());
    }
}
