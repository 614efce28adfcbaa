//! Role and state registry for the radio pool.
//!
//! The in-process mapping is authoritative. When a mirror path is configured
//! the registry also upserts every record into a JSON file, but that mirror
//! is advisory: write failures are logged and swallowed, and the file is
//! never read back as truth.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioRole {
    Scanning,
    Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioRecord {
    pub interface: String,
    pub role: RadioRole,
    pub state: RadioState,
    pub leased: bool,
    pub connected_ssid: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub last_error: Option<String>,
}

pub struct RoleRegistry {
    records: Mutex<HashMap<String, RadioRecord>>,
    mirror: Option<PathBuf>,
}

impl RoleRegistry {
    pub fn new(mirror: Option<PathBuf>) -> Self {
        if let Some(path) = &mirror {
            debug!("registry mirror enabled at {}", path.display());
        }
        Self {
            records: Mutex::new(HashMap::new()),
            mirror,
        }
    }

    /// Register an interface with its role, resetting its state to idle.
    pub fn assign_role(&self, interface: &str, role: RadioRole) {
        self.mutate(interface, |record| {
            record.role = role;
            record.state = RadioState::Idle;
            record.leased = false;
            record.connected_ssid = None;
            record.last_error = None;
        });
    }

    pub fn set_state(&self, interface: &str, state: RadioState) {
        self.mutate(interface, |record| {
            record.state = state;
            if state != RadioState::Connected {
                record.connected_ssid = None;
            }
        });
    }

    pub fn set_connected(&self, interface: &str, ssid: &str) {
        self.mutate(interface, |record| {
            record.state = RadioState::Connected;
            record.connected_ssid = Some(ssid.to_string());
            record.last_error = None;
        });
    }

    pub fn set_leased(&self, interface: &str, leased: bool) {
        self.mutate(interface, |record| record.leased = leased);
    }

    pub fn record_error(&self, interface: &str, message: &str) {
        self.mutate(interface, |record| {
            record.state = RadioState::Error;
            record.last_error = Some(message.to_string());
        });
    }

    pub fn get(&self, interface: &str) -> Option<RadioRecord> {
        self.records
            .lock()
            .expect("registry poisoned")
            .get(interface)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<RadioRecord> {
        let records = self.records.lock().expect("registry poisoned");
        let mut all: Vec<RadioRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.interface.cmp(&b.interface));
        all
    }

    fn mutate<F>(&self, interface: &str, apply: F)
    where
        F: FnOnce(&mut RadioRecord),
    {
        let mirror_copy = {
            let mut records = self.records.lock().expect("registry poisoned");
            let record = records
                .entry(interface.to_string())
                .or_insert_with(|| RadioRecord {
                    interface: interface.to_string(),
                    role: RadioRole::Connection,
                    state: RadioState::Idle,
                    leased: false,
                    connected_ssid: None,
                    last_updated: Utc::now(),
                    last_error: None,
                });
            apply(record);
            record.last_updated = Utc::now();
            self.mirror.as_ref().map(|_| {
                let mut all: Vec<RadioRecord> = records.values().cloned().collect();
                all.sort_by(|a, b| a.interface.cmp(&b.interface));
                all
            })
        };

        if let Some(all) = mirror_copy {
            self.write_mirror(&all);
        }
    }

    fn write_mirror(&self, records: &[RadioRecord]) {
        let Some(path) = &self.mirror else { return };
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            let payload = serde_json::to_vec_pretty(records)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&tmp, payload)?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!("registry mirror write failed: {}", e);
        }
    }
}
