//! Failover controller: owns the in-memory [`Configuration`], drives probes
//! and decides which server is current.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, Result, StoreError, ValidationError};
use crate::models::{
    ConfigPatch, Configuration, CoreEvent, NewServer, Server, ServerPatch, ServerStatus,
};
use crate::probe::{probe, HealthProbe};
use crate::store::ConfigStore;
use crate::validation::{merge_patch, validate_new};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Save attempts made when switching servers.
    pub save_attempts: u32,
    pub save_backoff: Duration,
    /// Delay before a switch is read back from disk.
    pub verify_delay: Duration,
    /// Gap between the switching and switched notifications.
    pub switch_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            save_attempts: 3,
            save_backoff: Duration::from_millis(100),
            verify_delay: Duration::from_millis(500),
            switch_delay: Duration::from_millis(500),
        }
    }
}

pub struct FailoverController {
    store: ConfigStore,
    prober: Arc<dyn HealthProbe>,
    state: Mutex<Configuration>,
    events: broadcast::Sender<CoreEvent>,
    ready: AtomicBool,
    // Serialises manual sweeps and failover ticks.
    check_gate: Mutex<()>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    options: ControllerOptions,
}

impl FailoverController {
    pub fn new(
        store: ConfigStore,
        config: Configuration,
        prober: Arc<dyn HealthProbe>,
        options: ControllerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            prober,
            state: Mutex::new(config),
            events,
            ready: AtomicBool::new(false),
            check_gate: Mutex::new(()),
            periodic: Mutex::new(None),
            options,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CoreEvent) {
        // No listeners is fine.
        let _ = self.events.send(event);
    }

    /// Enables failover ticks. Until then they are no-ops.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn persist(&self, cfg: &mut Configuration) -> bool {
        match self.store.save(cfg) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Config not persisted, keeping in-memory state");
                false
            }
        }
    }

    pub async fn save_now(&self) -> std::result::Result<(), StoreError> {
        let mut cfg = self.state.lock().await;
        self.store.save(&mut cfg)
    }

    /// Best-effort save for contexts that cannot await, such as a panic hook.
    /// Returns `false` without saving when the state is locked elsewhere.
    pub fn try_save_now(&self) -> bool {
        let Ok(mut cfg) = self.state.try_lock() else {
            warn!("Config busy, skipping emergency save");
            return false;
        };
        match self.store.save(&mut cfg) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Emergency config save failed");
                false
            }
        }
    }

    pub async fn get_servers(&self) -> Vec<Server> {
        self.state.lock().await.servers.clone()
    }

    pub async fn get_config(&self) -> Configuration {
        self.state.lock().await.clone()
    }

    pub async fn get_current_server(&self) -> Option<Server> {
        let mut cfg = self.state.lock().await;
        self.resolve_current(&mut cfg)
    }

    pub async fn get_current_url(&self) -> Option<String> {
        self.get_current_server().await.map(|s| s.admin_url())
    }

    /// Current server with recovery: `current_server_id`, then
    /// `last_active_server_id`, then the first server. Any recovery is
    /// persisted straight away.
    fn resolve_current(&self, cfg: &mut Configuration) -> Option<Server> {
        if let Some(server) = cfg.current_server_id.and_then(|id| cfg.server(id)) {
            return Some(server.clone());
        }

        let id = match cfg.last_active_server_id {
            Some(last) if cfg.server(last).is_some() => {
                info!(server_id = last, "Recovered current server from last active");
                last
            }
            _ => {
                let Some(first) = cfg.servers.first() else {
                    error!("No current server could be resolved");
                    return None;
                };
                warn!(server_id = first.id, "Falling back to first server");
                first.id
            }
        };

        cfg.select(id);
        self.persist(cfg);
        cfg.server(id).cloned()
    }

    pub async fn add_server(&self, input: NewServer) -> Result<Server> {
        let (name, ip, port) = validate_new(&input)?;

        let mut cfg = self.state.lock().await;
        let server = Server {
            id: cfg.next_id(),
            name,
            ip,
            port,
            active: false,
            status: ServerStatus::Unknown,
            last_checked: None,
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        cfg.servers.push(server.clone());

        let saved = self.persist(&mut cfg);
        info!(server_id = server.id, name = %server.name, saved, "Server added");
        self.emit(CoreEvent::ServersUpdated(cfg.servers.clone()));
        Ok(server)
    }

    pub async fn update_server(&self, id: u64, patch: ServerPatch) -> Result<Server> {
        let mut cfg = self.state.lock().await;
        let existing = cfg.server(id).ok_or(ControllerError::NotFound(id))?;
        let mut merged = merge_patch(existing, &patch)?;
        merged.updated_at = Some(Utc::now());

        if let Some(slot) = cfg.server_mut(id) {
            *slot = merged;
        }
        let saved = self.persist(&mut cfg);
        let server = cfg.server(id).cloned().ok_or(ControllerError::NotFound(id))?;
        info!(server_id = id, name = %server.name, saved, "Server updated");
        self.emit(CoreEvent::ServersUpdated(cfg.servers.clone()));
        Ok(server)
    }

    /// Removes a server. The last remaining server cannot be removed; if the
    /// current server goes, the first remaining one takes over.
    pub async fn delete_server(&self, id: u64) -> Result<Server> {
        let mut cfg = self.state.lock().await;
        let index = cfg
            .servers
            .iter()
            .position(|s| s.id == id)
            .ok_or(ControllerError::NotFound(id))?;
        if cfg.servers.len() <= 1 {
            warn!(server_id = id, "Refusing to delete the last server");
            return Err(ControllerError::LastServer);
        }

        let removed = cfg.servers.remove(index);
        if cfg.current_server_id == Some(id) {
            if let Some(first) = cfg.servers.first().map(|s| s.id) {
                cfg.select(first);
                info!(server_id = first, "Deleted current server, switched to first");
            }
        }

        let saved = self.persist(&mut cfg);
        info!(server_id = id, name = %removed.name, saved, "Server deleted");
        self.emit(CoreEvent::ServersUpdated(cfg.servers.clone()));
        Ok(removed)
    }

    /// Makes `id` the current server and persists it with bounded retries.
    /// A read-back check runs after `verify_delay` and re-saves if the file
    /// disagrees.
    pub async fn set_active_server(self: &Arc<Self>, id: u64) -> Result<Server> {
        let server = {
            let mut cfg = self.state.lock().await;
            if cfg.server(id).is_none() {
                error!(server_id = id, "Server not found");
                return Err(ControllerError::NotFound(id));
            }
            cfg.select(id);

            let mut attempts = 0;
            let mut saved = false;
            while !saved && attempts < self.options.save_attempts {
                attempts += 1;
                saved = self.persist(&mut cfg);
                if !saved && attempts < self.options.save_attempts {
                    tokio::time::sleep(self.options.save_backoff).await;
                }
            }
            if !saved {
                error!(server_id = id, attempts, "Failed to persist active server");
            }

            let server = cfg.server(id).cloned().ok_or(ControllerError::NotFound(id))?;
            info!(server_id = id, name = %server.name, saved, attempts, "Active server changed");
            server
        };

        self.schedule_verification(id);
        Ok(server)
    }

    fn schedule_verification(self: &Arc<Self>, id: u64) {
        let this = Arc::clone(self);
        let delay = self.options.verify_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let on_disk = match this.store.read() {
                Ok(cfg) => cfg.and_then(|c| c.current_server_id),
                Err(e) => {
                    warn!(error = %e, "Could not read back config");
                    None
                }
            };
            if on_disk == Some(id) {
                debug!(server_id = id, "Config verification successful");
                return;
            }

            let mut cfg = this.state.lock().await;
            if cfg.current_server_id != Some(id) {
                debug!(server_id = id, "Selection superseded before verification");
                return;
            }
            warn!(server_id = id, ?on_disk, "Persisted selection disagrees, saving again");
            cfg.select(id);
            this.persist(&mut cfg);
        });
    }

    /// Switches to `id` and announces it: `ServerSwitching` now,
    /// `ServerSwitched` after `switch_delay`.
    pub async fn switch_to(self: &Arc<Self>, id: u64) -> Result<Server> {
        let server = self.set_active_server(id).await?;
        self.emit(CoreEvent::ServerSwitching(server.clone()));

        let this = Arc::clone(self);
        let delay = self.options.switch_delay;
        let switched = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.emit(CoreEvent::ServerSwitched(switched));
        });
        Ok(server)
    }

    async fn probe_detached(&self, mut server: Server) -> Server {
        probe(self.prober.as_ref(), &mut server).await;
        server
    }

    pub async fn check_server_status(&self, id: u64) -> Result<(Server, ServerStatus)> {
        let target = {
            let cfg = self.state.lock().await;
            cfg.server(id).cloned().ok_or(ControllerError::NotFound(id))?
        };

        let probed = self.probe_detached(target).await;

        let mut cfg = self.state.lock().await;
        record_probe(&mut cfg, &probed);
        self.persist(&mut cfg);
        let server = cfg.server(id).cloned().unwrap_or_else(|| probed.clone());
        Ok((server, probed.status))
    }

    /// Probes every server at once, waits for all of them, then persists
    /// once and publishes the new statuses.
    pub async fn check_all_servers(&self) -> Vec<Server> {
        let _gate = self.check_gate.lock().await;
        self.emit(CoreEvent::CheckingServers(true));

        let targets = self.state.lock().await.servers.clone();
        let mut probes: FuturesUnordered<_> =
            targets.into_iter().map(|s| self.probe_detached(s)).collect();

        let mut results = Vec::with_capacity(probes.len());
        while let Some(probed) = probes.next().await {
            results.push(probed);
        }

        let servers = {
            let mut cfg = self.state.lock().await;
            for probed in &results {
                record_probe(&mut cfg, probed);
            }
            self.persist(&mut cfg);
            cfg.servers.clone()
        };

        let online = servers
            .iter()
            .filter(|s| s.status == ServerStatus::Online)
            .count();
        info!(checked = results.len(), online, "Server check completed");

        self.emit(CoreEvent::ServersUpdated(servers.clone()));
        self.emit(CoreEvent::CheckingServers(false));
        servers
    }

    /// Probes the current server and, if it is offline or timed out, walks the
    /// other servers in list order and switches to the first one online.
    /// Returns the server switched to.
    pub async fn auto_failover_tick(self: &Arc<Self>) -> Option<Server> {
        if !self.is_ready() {
            return None;
        }
        let _gate = self.check_gate.lock().await;

        let (current, candidates) = {
            let mut cfg = self.state.lock().await;
            let current = self.resolve_current(&mut cfg)?;
            let candidates: Vec<Server> = cfg
                .servers
                .iter()
                .filter(|s| s.id != current.id)
                .cloned()
                .collect();
            (current, candidates)
        };

        let current = self.probe_detached(current).await;
        self.record(&current).await;
        if !current.status.is_unreachable() {
            debug!(server_id = current.id, status = ?current.status, "Current server reachable");
            return None;
        }

        warn!(
            server_id = current.id,
            status = ?current.status,
            "Current server unreachable, looking for an alternate"
        );

        for candidate in candidates {
            let candidate = self.probe_detached(candidate).await;
            self.record(&candidate).await;
            if candidate.status != ServerStatus::Online {
                continue;
            }
            match self.switch_to(candidate.id).await {
                Ok(server) => {
                    info!(from = current.id, to = server.id, name = %server.name, "Auto switched server");
                    self.emit(CoreEvent::ServersUpdated(self.get_servers().await));
                    return Some(server);
                }
                // Deleted while probing.
                Err(e) => warn!(server_id = candidate.id, error = %e, "Could not switch"),
            }
        }

        warn!(server_id = current.id, "No alternate server online, keeping current");
        let mut cfg = self.state.lock().await;
        self.persist(&mut cfg);
        self.emit(CoreEvent::ServersUpdated(cfg.servers.clone()));
        None
    }

    async fn record(&self, probed: &Server) {
        let mut cfg = self.state.lock().await;
        record_probe(&mut cfg, probed);
    }

    /// (Re)starts the fixed-interval failover loop. Any running loop is
    /// cancelled first; nothing is scheduled while auto-check is off.
    pub async fn start_periodic_check(self: &Arc<Self>) {
        let mut slot = self.periodic.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let (enabled, interval_ms) = {
            let cfg = self.state.lock().await;
            (cfg.auto_check, cfg.check_interval_ms)
        };
        if !enabled {
            info!("Automatic checks disabled");
            return;
        }

        let period = Duration::from_millis(interval_ms.max(1));
        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                this.auto_failover_tick().await;
            }
        }));
        info!(interval_ms, "Periodic check started");
    }

    pub async fn stop_periodic_check(&self) {
        if let Some(handle) = self.periodic.lock().await.take() {
            handle.abort();
            info!("Periodic check stopped");
        }
    }

    pub async fn is_periodic_running(&self) -> bool {
        self.periodic
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Merges settings, persists, and restarts the periodic loop so a new
    /// interval or toggle takes effect.
    pub async fn update_config(self: &Arc<Self>, patch: ConfigPatch) -> Result<Configuration> {
        if patch.check_interval_ms == Some(0) {
            return Err(ValidationError::InvalidInterval.into());
        }

        let snapshot = {
            let mut cfg = self.state.lock().await;
            if let Some(auto_check) = patch.auto_check {
                cfg.auto_check = auto_check;
            }
            if let Some(interval) = patch.check_interval_ms {
                cfg.check_interval_ms = interval;
            }
            if let Some(window) = patch.window_state {
                cfg.window_state = window;
            }
            let saved = self.persist(&mut cfg);
            info!(auto_check = cfg.auto_check, interval_ms = cfg.check_interval_ms, saved, "Config updated");
            cfg.clone()
        };

        self.start_periodic_check().await;
        Ok(snapshot)
    }
}

fn record_probe(cfg: &mut Configuration, probed: &Server) {
    if let Some(server) = cfg.server_mut(probed.id) {
        server.status = probed.status;
        server.last_checked = probed.last_checked;
    }
}
