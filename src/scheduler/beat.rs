//! Periodic expiry sweep.

use crate::engine::Engine;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Runs [`Engine::process_beat`] on a fixed interval.
pub struct BeatManager {
    engine: Arc<Engine>,
    interval: Duration,
    stop: broadcast::Sender<()>,
}

impl BeatManager {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            engine,
            interval,
            stop,
        }
    }

    /// Start the beat background task.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let mut rx = self.stop.subscribe();
        let period = self.interval;

        tracing::info!("Starting beat every {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        engine.process_beat(Utc::now().timestamp());
                    }
                }
            }
            tracing::info!("Beat stopped");
        })
    }

    /// Stop the beat task.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::{MemoryStore, StatusRecord, StatusStore, StatusValue};
    use crate::status::StatusConfiguration;

    #[tokio::test]
    async fn test_beat_resolves_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(Engine::with_store(
            store.clone(),
            StatusConfiguration::default(),
            EngineConfig::default(),
        ));

        let since = Utc::now().timestamp() - 1000;
        let mut record = StatusRecord::new(0, since);
        record.value = StatusValue::Stealthy;
        record.stealthy_time = Some(since);
        store.put_status("/component/c/n/host", &record).unwrap();

        let beat = BeatManager::new(engine, Duration::from_millis(10));
        let handle = beat.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        beat.stop();
        handle.await.unwrap();

        let record = store.get_status("/component/c/n/host").unwrap().unwrap();
        assert_eq!(record.value, StatusValue::Off);
    }
}
