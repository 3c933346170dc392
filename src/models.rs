use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed path probed on every server and displayed by the shell.
pub const ADMIN_PATH: &str = "/admin.html";

pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 30_000;
pub const CONFIG_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    Timeout,
    Error,
}

impl ServerStatus {
    /// Statuses that make the current server a failover candidate.
    /// `Error` means the host answered, so it does not trigger a switch.
    pub fn is_unreachable(self) -> bool {
        matches!(self, ServerStatus::Offline | ServerStatus::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub status: ServerStatus,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Server {
    pub fn admin_url(&self) -> String {
        format!("http://{}:{}{}", self.ip, self.port, ADMIN_PATH)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default)]
    pub is_maximized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_width() -> u32 { 1200 }
fn default_height() -> u32 { 800 }

impl Default for WindowState {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            x: None,
            y: None,
            is_maximized: false,
            last_updated: None,
        }
    }
}

/// The durable shell state. Owned by the controller; the store only
/// serializes it on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub current_server_id: Option<u64>,
    #[serde(default)]
    pub last_active_server_id: Option<u64>,
    #[serde(rename = "autoCheck", alias = "autoCheckEnabled", default = "default_auto_check")]
    pub auto_check: bool,
    #[serde(rename = "checkInterval", alias = "checkIntervalMs", default = "default_check_interval")]
    pub check_interval_ms: u64,
    #[serde(default)]
    pub window_state: WindowState,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
}

fn default_auto_check() -> bool { true }
fn default_check_interval() -> u64 { DEFAULT_CHECK_INTERVAL_MS }
fn default_version() -> String { CONFIG_VERSION.to_string() }

pub fn default_server() -> Server {
    Server {
        id: 1,
        name: "Main Server".into(),
        ip: "10.2.97.84".into(),
        port: 3000,
        active: true,
        status: ServerStatus::Unknown,
        last_checked: None,
        created_at: Some(Utc::now()),
        updated_at: None,
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            servers: vec![default_server()],
            current_server_id: Some(1),
            last_active_server_id: Some(1),
            auto_check: default_auto_check(),
            check_interval_ms: default_check_interval(),
            window_state: WindowState::default(),
            version: default_version(),
            last_saved: None,
        }
    }
}

impl Configuration {
    pub fn server(&self, id: u64) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn server_mut(&mut self, id: u64) -> Option<&mut Server> {
        self.servers.iter_mut().find(|s| s.id == id)
    }

    pub fn contains(&self, id: Option<u64>) -> bool {
        id.is_some_and(|id| self.server(id).is_some())
    }

    pub fn next_id(&self) -> u64 {
        self.servers.iter().map(|s| s.id).max().unwrap_or(0) + 1
    }

    /// Points both current pointers at `id`.
    pub fn select(&mut self, id: u64) {
        self.current_server_id = Some(id);
        self.last_active_server_id = Some(id);
        self.sync_active_flags();
    }

    /// `active` is derived from `current_server_id` and never trusted as input.
    pub fn sync_active_flags(&mut self) {
        let current = self.current_server_id;
        for server in &mut self.servers {
            server.active = Some(server.id) == current;
        }
    }
}

/// Fields accepted when adding a server. Port is wide so out-of-range
/// values reach validation instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewServer {
    pub name: String,
    pub ip: String,
    pub port: u32,
}

/// Caller-editable fields of a server. Anything else in the request
/// (`id`, `active`, `status`, ...) is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, rename = "autoCheck", alias = "autoCheckEnabled")]
    pub auto_check: Option<bool>,
    #[serde(default, rename = "checkInterval", alias = "checkIntervalMs")]
    pub check_interval_ms: Option<u64>,
    #[serde(default)]
    pub window_state: Option<WindowState>,
}

/// Notifications pushed from the controller to UI listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum CoreEvent {
    CheckingServers(bool),
    ServersUpdated(Vec<Server>),
    ServerSwitching(Server),
    ServerSwitched(Server),
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::CheckingServers(_) => "checking-servers",
            CoreEvent::ServersUpdated(_) => "servers-updated",
            CoreEvent::ServerSwitching(_) => "server-switching",
            CoreEvent::ServerSwitched(_) => "server-switched",
        }
    }
}
