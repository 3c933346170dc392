use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

const ALT_STATE_FILE: &str = ".failover-shell-config.json";

/// Runtime settings for the shell process. The server list itself lives in
/// the state file, not here.
#[derive(Debug, Clone, Parser)]
#[command(name = "failover-shell", version, about)]
pub struct Settings {
    /// Primary state file.
    #[arg(long, env = "FAILOVER_STATE_PATH", default_value = "ip-config.json")]
    pub state_path: PathBuf,

    /// Fallback state file, used when the primary location is unwritable.
    /// Defaults to a dotfile in the home directory.
    #[arg(long, env = "FAILOVER_ALT_STATE_PATH")]
    pub alt_state_path: Option<PathBuf>,

    #[arg(long, env = "FAILOVER_API_PORT", default_value_t = default_api_port())]
    pub api_port: u16,

    #[arg(long, env = "FAILOVER_PROBE_TIMEOUT_MS", default_value_t = default_probe_timeout_ms())]
    pub probe_timeout_ms: u64,

    /// Interval of the safety-net save.
    #[arg(long, env = "FAILOVER_SAFETY_SAVE_SECS", default_value_t = default_safety_save_secs())]
    pub safety_save_secs: u64,
}

fn default_api_port() -> u16 { 3000 }
fn default_probe_timeout_ms() -> u64 { 3000 }
fn default_safety_save_secs() -> u64 { 60 }

impl Settings {
    pub fn alternate_path(&self) -> Option<PathBuf> {
        self.alt_state_path.clone().or_else(|| {
            std::env::var_os("HOME")
                .or_else(|| std::env::var_os("USERPROFILE"))
                .map(|home| PathBuf::from(home).join(ALT_STATE_FILE))
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }

    pub fn safety_save_interval(&self) -> Duration {
        Duration::from_secs(self.safety_save_secs.max(1))
    }
}
