//! Periodic sweep that disconnects peers silent past the idle timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{ConnectionRegistry, DisconnectReason, PeerId};

/// Run [`sweep`] every `interval` until shutdown is signalled.
pub(crate) async fn idle_monitor(
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry, timeout).await;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Idle monitor stopped");
}

/// Mark every connection whose last activity precedes `now - timeout` as
/// timed out and evict it. Returns the evicted identities.
pub async fn sweep(registry: &ConnectionRegistry, timeout: Duration) -> Vec<PeerId> {
    if registry.is_empty().await {
        return Vec::new();
    }
    let Some(cutoff) = Instant::now().checked_sub(timeout) else {
        return Vec::new();
    };

    let stale: Vec<_> = registry
        .snapshot()
        .await
        .into_iter()
        .filter(|conn| conn.last_seen() < cutoff)
        .collect();

    let mut evicted = Vec::with_capacity(stale.len());
    for conn in stale {
        // Already ending for another reason; whoever marked it tears it down.
        if !conn.mark(DisconnectReason::Timeout) {
            continue;
        }
        tracing::warn!("Connection {} timed out after {timeout:?} idle", conn.peer());
        registry.evict(&conn).await;
        evicted.push(conn.peer().clone());
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, Transport};
    use tokio::net::{TcpListener, TcpStream};

    async fn registered(registry: &ConnectionRegistry) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let (_, writer) = Transport::from(server).split();
        let conn = Arc::new(Connection::new(PeerId::from(peer), writer, false));
        registry.insert(Arc::clone(&conn)).await.unwrap();
        (conn, client)
    }

    #[tokio::test]
    async fn test_stale_connection_is_evicted() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _client) = registered(&registry).await;
        conn.set_last_seen(Instant::now() - Duration::from_secs(60));

        let evicted = sweep(&registry, Duration::from_secs(15)).await;

        assert_eq!(evicted, vec![conn.peer().clone()]);
        assert!(registry.is_empty().await);
        assert!(conn.is_closed());
        assert_eq!(conn.reason(), DisconnectReason::Timeout);
    }

    #[tokio::test]
    async fn test_recent_connection_survives() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _client) = registered(&registry).await;

        let evicted = sweep(&registry, Duration::from_secs(15)).await;

        assert!(evicted.is_empty());
        assert!(registry.contains(conn.peer()).await);
        assert_eq!(conn.reason(), DisconnectReason::Normal);
    }

    #[tokio::test]
    async fn test_only_stale_peers_are_swept() {
        let registry = ConnectionRegistry::new(8);
        let (stale, _c1) = registered(&registry).await;
        let (fresh, _c2) = registered(&registry).await;
        stale.set_last_seen(Instant::now() - Duration::from_secs(10));
        fresh.set_last_seen(Instant::now() - Duration::from_secs(1));

        sweep(&registry, Duration::from_secs(5)).await;

        assert!(!registry.contains(stale.peer()).await);
        assert!(registry.contains(fresh.peer()).await);
    }

    #[tokio::test]
    async fn test_kicked_mark_is_not_overwritten() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _client) = registered(&registry).await;
        conn.mark(DisconnectReason::Kicked);
        conn.set_last_seen(Instant::now() - Duration::from_secs(60));

        let evicted = sweep(&registry, Duration::from_secs(1)).await;
        assert!(evicted.is_empty());
        assert_eq!(conn.reason(), DisconnectReason::Kicked);
    }

    #[tokio::test]
    async fn test_monitor_exits_on_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(idle_monitor(
            registry,
            Duration::from_secs(1),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should stop")
            .unwrap();
    }
}
