//! Shared fixtures for controller and API tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::engine::{ControllerOptions, FailoverController};
use crate::models::{Configuration, Server, ServerStatus};
use crate::probe::HealthProbe;
use crate::store::ConfigStore;

/// Probe that answers from a table keyed by ip. Unknown hosts are offline.
#[derive(Default)]
pub struct ScriptedProbe {
    statuses: Mutex<HashMap<String, ServerStatus>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn set(&self, ip: &str, status: ServerStatus) {
        self.statuses.lock().unwrap().insert(ip.to_string(), status);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, ip: &str, _port: u16) -> ServerStatus {
        self.calls.lock().unwrap().push(ip.to_string());
        self.statuses
            .lock()
            .unwrap()
            .get(ip)
            .copied()
            .unwrap_or(ServerStatus::Offline)
    }
}

pub fn server(id: u64, ip: &str) -> Server {
    Server {
        id,
        name: format!("Server {id}"),
        ip: ip.to_string(),
        port: 3000,
        active: false,
        status: ServerStatus::Unknown,
        last_checked: None,
        created_at: None,
        updated_at: None,
    }
}

/// Configuration with servers `10.0.0.<id>` for each id, current = first.
pub fn config_with(ids: &[u64]) -> Configuration {
    let mut cfg = Configuration::default();
    cfg.servers = ids.iter().map(|&id| server(id, &format!("10.0.0.{id}"))).collect();
    if let Some(&first) = ids.first() {
        cfg.select(first);
    }
    cfg
}

pub fn fast_options() -> ControllerOptions {
    ControllerOptions {
        save_attempts: 3,
        save_backoff: Duration::from_millis(1),
        verify_delay: Duration::from_millis(10),
        switch_delay: Duration::from_millis(10),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub probe: Arc<ScriptedProbe>,
    pub controller: Arc<FailoverController>,
}

impl Harness {
    pub fn new(cfg: Configuration) -> Self {
        Self::with_store(cfg, |dir| ConfigStore::new(dir.join("ip-config.json"), None))
    }

    /// Harness whose controller persists through a store built inside the
    /// harness's temp dir.
    pub fn with_store(cfg: Configuration, make_store: impl FnOnce(&Path) -> ConfigStore) -> Self {
        let dir = TempDir::new().unwrap();
        let store = make_store(dir.path());
        let probe = Arc::new(ScriptedProbe::default());
        let controller = Arc::new(FailoverController::new(
            store,
            cfg,
            probe.clone(),
            fast_options(),
        ));
        Self {
            dir,
            probe,
            controller,
        }
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(self.dir.path().join("ip-config.json"), None)
    }

    pub fn on_disk(&self) -> Configuration {
        self.store().read().unwrap().unwrap()
    }
}
