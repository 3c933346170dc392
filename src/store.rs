//! Durable storage for the shell [`Configuration`].
//!
//! Saves try an ordered list of backends until one succeeds, keep a
//! `.backup` sibling of the previous file, and verify every write by reading
//! it back. Loads never fail: unreadable state falls back to defaults and
//! structural damage is repaired and persisted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::{default_server, Configuration, DEFAULT_CHECK_INTERVAL_MS};

/// One way of getting the serialized configuration onto disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Overwrite the primary file in place.
    Direct,
    /// Write `<primary>.tmp`, then rename it over the primary file.
    TempRename,
    /// Write to a well-known fallback location.
    Alternate(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    backends: Vec<Backend>,
}

impl ConfigStore {
    /// Store with the standard strategy order: direct, temp+rename, then
    /// `alternate` when given.
    pub fn new(path: impl Into<PathBuf>, alternate: Option<PathBuf>) -> Self {
        let mut backends = vec![Backend::Direct, Backend::TempRename];
        if let Some(alt) = alternate {
            backends.push(Backend::Alternate(alt));
        }
        Self::with_backends(path, backends)
    }

    pub fn with_backends(path: impl Into<PathBuf>, backends: Vec<Backend>) -> Self {
        Self {
            path: path.into(),
            backends,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".backup")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn candidates(&self) -> Vec<&Path> {
        let mut paths = vec![self.path.as_path()];
        for backend in &self.backends {
            if let Backend::Alternate(alt) = backend {
                paths.push(alt.as_path());
            }
        }
        paths
    }

    /// Reads the stored configuration without repairing or writing anything.
    /// When several locations hold a readable file, the one with the latest
    /// `lastSaved` wins; ties go to the primary. Returns `Ok(None)` when no
    /// state file exists yet.
    pub fn read(&self) -> Result<Option<Configuration>, StoreError> {
        let mut newest: Option<(&Path, Configuration)> = None;
        let mut last_err = None;
        for path in self.candidates() {
            if !path.exists() {
                continue;
            }
            match read_file(path) {
                Ok(cfg) => {
                    let newer = match &newest {
                        Some((_, best)) => cfg.last_saved > best.last_saved,
                        None => true,
                    };
                    if newer {
                        newest = Some((path, cfg));
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Config file unreadable");
                    last_err = Some(e);
                }
            }
        }
        match (newest, last_err) {
            (Some((path, cfg)), _) => {
                if path != self.path {
                    info!(path = %path.display(), "Using config from alternate location");
                }
                Ok(Some(cfg))
            }
            (None, Some(e)) => Err(e),
            (None, None) => Ok(None),
        }
    }

    /// Loads, validates and repairs the stored configuration. Always returns
    /// something usable; defaults are persisted immediately.
    pub fn load(&self) -> Configuration {
        info!(path = %self.path.display(), "Loading config");

        let loaded = match self.read() {
            Ok(Some(cfg)) => Some(cfg),
            Ok(None) => {
                info!("Config file does not exist, creating default");
                None
            }
            Err(e) => {
                warn!(error = %e, "Config unreadable, falling back to defaults");
                None
            }
        };

        let Some(mut cfg) = loaded else {
            let mut cfg = Configuration::default();
            if let Err(e) = self.save(&mut cfg) {
                error!(error = %e, "Could not persist default config");
            }
            return cfg;
        };

        let repairs = repair(&mut cfg);
        if !repairs.is_empty() {
            warn!(?repairs, "Repaired stored config");
            if let Err(e) = self.save(&mut cfg) {
                error!(error = %e, "Could not persist repaired config");
            }
        }

        info!(
            current_server_id = ?cfg.current_server_id,
            last_active_server_id = ?cfg.last_active_server_id,
            servers = cfg.servers.len(),
            "Config loaded"
        );
        cfg
    }

    /// Serializes `cfg` through the first backend that works and verifies the
    /// result. Stamps `last_saved` and re-derives the pointer/flag fields first.
    pub fn save(&self, cfg: &mut Configuration) -> Result<(), StoreError> {
        prepare(cfg);
        let data = serde_json::to_string_pretty(cfg)?;
        self.commit(&data, cfg.current_server_id)
    }

    /// Writes `data`, then checks that the file read back carries `expected`
    /// as its current server. The previous primary is restored on failure.
    fn commit(&self, data: &str, expected: Option<u64>) -> Result<(), StoreError> {
        self.backup();

        let written = match self.write_any(data) {
            Ok(path) => path,
            Err(e) => {
                self.restore_backup();
                return Err(e);
            }
        };

        if let Err(e) = verify(&written, expected) {
            error!(path = %written.display(), error = %e, "Config verification failed");
            self.restore_backup();
            return Err(e);
        }

        debug!(
            path = %written.display(),
            current_server_id = ?expected,
            bytes = data.len(),
            "Config saved and verified"
        );
        Ok(())
    }

    fn backup(&self) {
        if !self.path.is_file() {
            return;
        }
        if let Err(e) = fs::copy(&self.path, self.backup_path()) {
            warn!(error = %e, "Could not create config backup");
        }
    }

    fn restore_backup(&self) {
        let backup = self.backup_path();
        if !backup.is_file() {
            return;
        }
        match fs::copy(&backup, &self.path) {
            Ok(_) => info!("Restored config from backup"),
            Err(e) => error!(error = %e, "Could not restore config from backup"),
        }
    }

    fn write_any(&self, data: &str) -> Result<PathBuf, StoreError> {
        for (i, backend) in self.backends.iter().enumerate() {
            match self.write_with(backend, data) {
                Ok(path) => {
                    if i > 0 {
                        info!(attempt = i + 1, ?backend, "Config saved by fallback backend");
                    }
                    return Ok(path);
                }
                Err(e) => warn!(attempt = i + 1, ?backend, error = %e, "Save attempt failed"),
            }
        }
        error!(attempts = self.backends.len(), "All save attempts failed");
        Err(StoreError::Exhausted {
            attempts: self.backends.len(),
        })
    }

    fn write_with(&self, backend: &Backend, data: &str) -> std::io::Result<PathBuf> {
        match backend {
            Backend::Direct => {
                ensure_parent(&self.path)?;
                fs::write(&self.path, data)?;
                Ok(self.path.clone())
            }
            Backend::TempRename => {
                ensure_parent(&self.path)?;
                let tmp = self.sibling(".tmp");
                fs::write(&tmp, data)?;
                if let Err(e) = fs::rename(&tmp, &self.path) {
                    let _ = fs::remove_file(&tmp);
                    return Err(e);
                }
                Ok(self.path.clone())
            }
            Backend::Alternate(alt) => {
                ensure_parent(alt)?;
                fs::write(alt, data)?;
                Ok(alt.clone())
            }
        }
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

fn read_file(path: &Path) -> Result<Configuration, StoreError> {
    let raw = fs::read_to_string(path)?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)?;
    if let Some(obj) = value.as_object_mut() {
        if !obj.get("servers").is_some_and(|s| s.is_array()) {
            obj.insert("servers".into(), serde_json::Value::Array(Vec::new()));
        }
    }
    Ok(serde_json::from_value(value)?)
}

fn verify(path: &Path, expected: Option<u64>) -> Result<(), StoreError> {
    let raw = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let found = value.get("currentServerId").and_then(|v| v.as_u64());
    if found != expected {
        return Err(StoreError::Verification { expected, found });
    }
    Ok(())
}

fn prepare(cfg: &mut Configuration) {
    cfg.last_saved = Some(Utc::now());
    if cfg.current_server_id.is_some() {
        cfg.last_active_server_id = cfg.current_server_id;
    }
    cfg.sync_active_flags();
}

/// Brings a deserialized configuration back within its invariants and
/// returns a short label for each fix applied.
pub fn repair(cfg: &mut Configuration) -> Vec<&'static str> {
    let mut repairs = Vec::new();

    if cfg.servers.is_empty() {
        cfg.servers.push(default_server());
        repairs.push("injected default server");
    }

    if !cfg.contains(cfg.current_server_id) {
        let recovered = if cfg.contains(cfg.last_active_server_id) {
            repairs.push("recovered current server from last active");
            cfg.last_active_server_id
        } else {
            repairs.push("reset current server to first entry");
            cfg.servers.first().map(|s| s.id)
        };
        cfg.current_server_id = recovered;
    }

    if !cfg.contains(cfg.last_active_server_id) {
        cfg.last_active_server_id = cfg.current_server_id;
        repairs.push("backfilled last active server");
    }

    let current = cfg.current_server_id;
    if cfg.servers.iter().any(|s| s.active != (Some(s.id) == current)) {
        cfg.sync_active_flags();
        repairs.push("fixed active flags");
    }

    if cfg.check_interval_ms == 0 {
        cfg.check_interval_ms = DEFAULT_CHECK_INTERVAL_MS;
        repairs.push("reset check interval");
    }

    repairs
}
