//! Periodic topic fan-out.
//!
//! Every tick the publisher looks at which topics have subscribers, collects
//! only those, and hands each result to [`SessionRegistry::publish`].

use std::sync::Arc;
use std::time::Duration;

use tars_host::HostServices;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::ServerMessage;
use super::registry::SessionRegistry;

/// CPU, memory and disk utilisation.
pub const TOPIC_METRICS: &str = "metrics";
/// Host facts.
pub const TOPIC_SYSTEM_INFO: &str = "system_info";
/// Busiest processes.
pub const TOPIC_PROCESSES: &str = "processes";
/// Container list.
pub const TOPIC_CONTAINERS: &str = "containers";
/// Network counters.
pub const TOPIC_NETWORK: &str = "network";

/// Topics the publisher knows how to produce.
pub const KNOWN_TOPICS: [&str; 5] = [
    TOPIC_METRICS,
    TOPIC_SYSTEM_INFO,
    TOPIC_PROCESSES,
    TOPIC_CONTAINERS,
    TOPIC_NETWORK,
];

/// Pushes fresh data to topic subscribers on a fixed interval.
pub struct TopicPublisher {
    registry: Arc<SessionRegistry>,
    host: HostServices,
    interval: Duration,
    process_limit: usize,
}

impl TopicPublisher {
    /// Publisher over `registry`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        host: HostServices,
        interval: Duration,
        process_limit: usize,
    ) -> Self {
        Self {
            registry,
            host,
            interval,
            process_limit,
        }
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "topic publisher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.publish_once().await;
                }
            }
        }
        info!("topic publisher stopped");
    }

    /// Collect and publish every topic that has subscribers.
    ///
    /// Returns the total number of deliveries.
    pub async fn publish_once(&self) -> usize {
        let active = self.registry.active_topics();
        if active.is_empty() {
            return 0;
        }
        let mut delivered = 0;
        for topic in KNOWN_TOPICS.iter().copied().filter(|t| active.contains(*t)) {
            let Some(msg) = self.collect(topic).await else {
                continue;
            };
            let n = self.registry.publish(topic, &msg);
            debug!(topic, recipients = n, "published");
            delivered += n;
        }
        delivered
    }

    async fn collect(&self, topic: &str) -> Option<ServerMessage> {
        let result = match topic {
            TOPIC_METRICS => self
                .host
                .metrics
                .metrics()
                .await
                .map(|data| ServerMessage::Metrics { data }),
            TOPIC_SYSTEM_INFO => self
                .host
                .metrics
                .system_info()
                .await
                .map(|data| ServerMessage::SystemInfo { data }),
            TOPIC_PROCESSES => Ok(ServerMessage::ProcessesData {
                data: self.host.processes.list_processes(self.process_limit).await,
            }),
            TOPIC_CONTAINERS => Ok(ServerMessage::ContainersData {
                data: self.host.containers.list_containers().await,
            }),
            TOPIC_NETWORK => self
                .host
                .network
                .network_stats()
                .await
                .map(|data| ServerMessage::NetworkStats { data }),
            _ => return None,
        };
        match result {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(topic, error = %e, "topic collection failed");
                None
            }
        }
    }
}
