//! Traffic poller: publishes engine traffic rates while the tunnel runs.

use crate::engine::ProxyEngine;
use crate::events::{EventBus, SessionEvent};
use crate::tunnel::TunnelState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::debug;

/// Background polling task; aborted on drop.
pub struct TrafficPoller {
    handle: JoinHandle<()>,
}

impl TrafficPoller {
    /// Spawn on the current runtime. The task exits by itself once the
    /// tunnel leaves `Running`.
    pub fn spawn(
        engine: Arc<dyn ProxyEngine>,
        state: Arc<RwLock<TunnelState>>,
        bus: EventBus,
        interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !state.read().await.is_running() {
                    debug!("Tunnel no longer running, traffic poller exiting");
                    break;
                }

                match timeout(request_timeout, engine.query_traffic()).await {
                    Ok(Ok(traffic)) => {
                        bus.publish(SessionEvent::EngineStatus(traffic));
                    }
                    Ok(Err(e)) => debug!("Traffic query failed: {}", e),
                    Err(_) => debug!("Traffic query timed out"),
                }
            }
        });

        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for TrafficPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TrafficSnapshot;
    use crate::fakes::FakeEngine;

    #[tokio::test]
    async fn test_publishes_while_running() {
        let engine = Arc::new(FakeEngine::default());
        engine.set_traffic(TrafficSnapshot { up: 10, down: 20 });
        let state = Arc::new(RwLock::new(TunnelState::Running));
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let poller = TrafficPoller::spawn(
            engine,
            state.clone(),
            bus,
            Duration::from_millis(10),
            Duration::from_millis(100),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::EngineStatus(TrafficSnapshot { up: 10, down: 20 })
        );

        *state.write().await = TunnelState::Stopped;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.is_finished());
    }

    #[tokio::test]
    async fn test_engine_errors_publish_nothing() {
        let state = Arc::new(RwLock::new(TunnelState::Running));
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let poller = TrafficPoller::spawn(
            Arc::new(FakeEngine::failing()),
            state,
            bus,
            Duration::from_millis(10),
            Duration::from_millis(100),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(rx.try_recv().is_err());
        assert!(!poller.is_finished());
        poller.abort();
    }
}
