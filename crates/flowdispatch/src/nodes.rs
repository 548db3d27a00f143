use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use flowcore::dispatch::RegisterRequest;
use flowcore::{DispatchError, ProcessingLibraries, ProcessingNode, Schedule};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: DateTime<Utc>,
    last_persisted: DateTime<Utc>,
    cannot_run_until: Option<DateTime<Utc>>,
}

/// Node identities, liveness and eligibility
pub struct NodeRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
    live: Mutex<HashMap<Uuid, Liveness>>,
}

pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: DispatchConfig) -> Self {
        Self {
            store,
            clock,
            config,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent by address. Changed fields are written at once; an
    /// unchanged node only has `last_seen` persisted once per debounce window.
    pub async fn register(&self, request: RegisterRequest) -> Result<ProcessingNode, DispatchError> {
        let address = normalize_address(&request.address);
        let now = self.clock.now();
        // held across the lookup and insert so two registrations of one address cannot race
        let mut live = self.live.lock().await;

        let Some(mut node) = self.store.node_by_address(&address).await? else {
            let node = ProcessingNode {
                uid: Uuid::new_v4(),
                name: request.name.clone().unwrap_or_else(|| address.clone()),
                address,
                enabled: true,
                flow_runners: request
                    .flow_runners
                    .unwrap_or(self.config.default_flow_runners)
                    .max(1),
                schedule: Schedule::always(),
                all_libraries: ProcessingLibraries::All,
                libraries: Vec::new(),
                version: request.version,
                architecture: request.architecture,
                operating_system: request.operating_system,
                capabilities: request.capabilities,
                last_seen: now,
            };
            self.store.upsert_node(node.clone()).await?;
            live.insert(
                node.uid,
                Liveness {
                    last_seen: now,
                    last_persisted: now,
                    cannot_run_until: None,
                },
            );
            info!(node = %node.name, address = %node.address, "Registered new processing node");
            return Ok(node);
        };

        let changed = node.version != request.version
            || node.architecture != request.architecture
            || node.operating_system != request.operating_system
            || node.capabilities != request.capabilities;
        if changed {
            node.version = request.version;
            node.architecture = request.architecture;
            node.operating_system = request.operating_system;
            node.capabilities = request.capabilities;
            info!(node = %node.name, version = %node.version, "Processing node details changed");
        }

        let entry = live.entry(node.uid).or_insert(Liveness {
            last_seen: node.last_seen,
            last_persisted: node.last_seen,
            cannot_run_until: None,
        });
        entry.last_seen = now;
        if changed || now - entry.last_persisted >= self.config.last_seen_debounce {
            node.last_seen = now;
            self.store.upsert_node(node.clone()).await?;
            entry.last_persisted = now;
        } else {
            debug!(node = %node.name, "skipping durable last_seen write");
        }

        node.last_seen = now;
        Ok(node)
    }

    /// The stored node with its in-memory `last_seen`.
    pub async fn get(&self, uid: Uuid) -> Result<Option<ProcessingNode>, DispatchError> {
        let Some(mut node) = self.store.node(uid).await? else {
            return Ok(None);
        };
        if let Some(live) = self.live.lock().await.get(&uid) {
            node.last_seen = node.last_seen.max(live.last_seen);
        }
        Ok(Some(node))
    }

    /// Refresh `last_seen`, debounced like registration.
    pub async fn touch(&self, node: &ProcessingNode) -> Result<(), DispatchError> {
        let now = self.clock.now();
        let mut live = self.live.lock().await;
        let entry = live.entry(node.uid).or_insert(Liveness {
            last_seen: node.last_seen,
            last_persisted: node.last_seen,
            cannot_run_until: None,
        });
        entry.last_seen = now;
        if now - entry.last_persisted >= self.config.last_seen_debounce {
            let mut stored = node.clone();
            stored.last_seen = now;
            self.store.upsert_node(stored).await?;
            entry.last_persisted = now;
        }
        Ok(())
    }

    pub async fn mark_cannot_run(&self, uid: Uuid, seconds: u64) -> DateTime<Utc> {
        let ceiling = self.config.max_cannot_run.num_seconds().max(0) as u64;
        let duration = if seconds == 0 {
            self.config.default_cannot_run
        } else {
            Duration::seconds(seconds.min(ceiling) as i64)
        };
        let now = self.clock.now();
        let until = now + duration;
        let mut live = self.live.lock().await;
        let entry = live.entry(uid).or_insert(Liveness {
            last_seen: now,
            last_persisted: now,
            cannot_run_until: None,
        });
        entry.cannot_run_until = Some(until);
        info!(node = %uid, until = %until, "Node cannot run");
        until
    }

    pub async fn cannot_run_until(&self, uid: Uuid) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.live
            .lock()
            .await
            .get(&uid)
            .and_then(|l| l.cannot_run_until)
            .filter(|until| *until > now)
    }

    /// Enabled, not backing off, and inside its schedule.
    pub async fn can_run(&self, node: &ProcessingNode, now: DateTime<Utc>) -> bool {
        if !node.enabled {
            return false;
        }
        let blocked = self
            .live
            .lock()
            .await
            .get(&node.uid)
            .and_then(|l| l.cannot_run_until)
            .is_some_and(|until| until > now);
        !blocked && node.schedule.is_active_at(&now)
    }
}
