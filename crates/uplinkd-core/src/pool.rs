//! The radio pool: sole authority on which radio is doing what.
//!
//! All acquisition and release go through the pool's single mutex; no other
//! component caches the notion of "which radios are free". A lease is held
//! through a guard that releases on drop, so every exit path returns the
//! radio.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use uplinkd_netops::HostOps;

use crate::config::InterfacesConfig;
use crate::radio::Radio;
use crate::registry::{RadioRole, RoleRegistry};

/// Interface name prefixes recognisable as wireless.
const WIRELESS_PREFIXES: &[&str] = &["wlan", "wlp", "wifi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeasePurpose {
    Scanning,
    Connection,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub in_use: usize,
    pub scanning: Option<String>,
    pub degraded: bool,
}

struct Slot {
    radio: Arc<Radio>,
    role: RadioRole,
    leased: bool,
    /// The radio carries an adopted connection; it stays out of the lease
    /// pool until the monitor gives the binding up.
    engaged: bool,
}

pub struct RadioPool {
    slots: Mutex<Vec<Slot>>,
    registry: Arc<RoleRegistry>,
}

/// A held radio. Dropping the guard returns the radio to the pool.
pub struct RadioLease {
    pool: Arc<RadioPool>,
    radio: Arc<Radio>,
}

impl RadioLease {
    pub fn radio(&self) -> &Arc<Radio> {
        &self.radio
    }

    pub fn name(&self) -> &str {
        self.radio.name()
    }
}

impl Drop for RadioLease {
    fn drop(&mut self) {
        self.pool.release(self.radio.name());
    }
}

impl RadioPool {
    /// Enumerate host interfaces and build the pool.
    ///
    /// Interfaces are filtered by wireless name prefix and the config's
    /// excluded list, preferred names sort first, and each survivor is probed.
    /// Probe failures are dropped with a logged reason. Zero survivors put
    /// the pool in degraded mode: every lease returns `None`, nothing
    /// crashes.
    pub fn enumerate(
        config: &InterfacesConfig,
        ops: Arc<dyn HostOps>,
        registry: Arc<RoleRegistry>,
    ) -> Arc<RadioPool> {
        let host_interfaces = match ops.list_interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("interface enumeration failed: {}", e);
                Vec::new()
            }
        };

        let mut candidates: Vec<String> = host_interfaces
            .into_iter()
            .filter(|name| WIRELESS_PREFIXES.iter().any(|p| name.starts_with(p)))
            .filter(|name| !config.excluded.iter().any(|e| e == name))
            .collect();

        // Preferred interfaces first, in their configured order; the rest
        // keep host order.
        let mut ordered: Vec<String> = Vec::with_capacity(candidates.len());
        for preferred in &config.preferred {
            if let Some(pos) = candidates.iter().position(|c| c == preferred) {
                ordered.push(candidates.remove(pos));
            }
        }
        ordered.extend(candidates);

        let mut radios = Vec::new();
        for name in &ordered {
            match Radio::probe(name, Arc::clone(&ops)) {
                Ok(radio) => radios.push(Arc::new(radio)),
                Err(e) => warn!("dropping interface '{}': {}", name, e),
            }
        }

        if radios.is_empty() {
            warn!("no usable radios found, pool is degraded");
        }

        let scanning_name = config
            .scan_interface
            .as_ref()
            .filter(|pin| radios.iter().any(|r| r.name() == pin.as_str()))
            .cloned()
            .or_else(|| radios.first().map(|r| r.name().to_string()));

        let slots: Vec<Slot> = radios
            .into_iter()
            .map(|radio| {
                let role = if Some(radio.name()) == scanning_name.as_deref() {
                    RadioRole::Scanning
                } else {
                    RadioRole::Connection
                };
                registry.assign_role(radio.name(), role);
                info!("radio {} assigned role {:?}", radio.name(), role);
                Slot {
                    radio,
                    role,
                    leased: false,
                    engaged: false,
                }
            })
            .collect();

        Arc::new(RadioPool {
            slots: Mutex::new(slots),
            registry,
        })
    }

    /// Lease a radio for the given purpose, atomically marking it.
    ///
    /// Scanning leases return the scanning radio iff it is free. Connection
    /// leases never return the scanning radio, even when it is idle and no
    /// connection radio is free.
    pub fn lease(self: &Arc<Self>, purpose: LeasePurpose) -> Option<RadioLease> {
        let mut slots = self.slots.lock().expect("pool poisoned");
        let slot = match purpose {
            LeasePurpose::Scanning => slots
                .iter_mut()
                .find(|s| s.role == RadioRole::Scanning && !s.leased),
            LeasePurpose::Connection => slots
                .iter_mut()
                .find(|s| s.role == RadioRole::Connection && !s.leased && !s.engaged),
        }?;

        slot.leased = true;
        self.registry.set_leased(slot.radio.name(), true);
        Some(RadioLease {
            pool: Arc::clone(self),
            radio: Arc::clone(&slot.radio),
        })
    }

    /// Clear a lease. Idempotent.
    pub(crate) fn release(&self, name: &str) {
        let mut slots = self.slots.lock().expect("pool poisoned");
        if let Some(slot) = slots.iter_mut().find(|s| s.radio.name() == name) {
            if slot.leased {
                slot.leased = false;
                self.registry.set_leased(name, false);
            }
        }
    }

    /// Mark whether a radio carries an adopted connection.
    pub fn mark_engaged(&self, name: &str, engaged: bool) {
        let mut slots = self.slots.lock().expect("pool poisoned");
        if let Some(slot) = slots.iter_mut().find(|s| s.radio.name() == name) {
            slot.engaged = engaged;
        }
    }

    pub fn scanning_radio(&self) -> Option<Arc<Radio>> {
        self.slots
            .lock()
            .expect("pool poisoned")
            .iter()
            .find(|s| s.role == RadioRole::Scanning)
            .map(|s| Arc::clone(&s.radio))
    }

    pub fn connection_radios(&self) -> Vec<Arc<Radio>> {
        self.slots
            .lock()
            .expect("pool poisoned")
            .iter()
            .filter(|s| s.role == RadioRole::Connection)
            .map(|s| Arc::clone(&s.radio))
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Radio>> {
        self.slots
            .lock()
            .expect("pool poisoned")
            .iter()
            .find(|s| s.radio.name() == name)
            .map(|s| Arc::clone(&s.radio))
    }

    pub fn status(&self) -> PoolStatus {
        let slots = self.slots.lock().expect("pool poisoned");
        PoolStatus {
            total: slots.len(),
            in_use: slots.iter().filter(|s| s.leased || s.engaged).count(),
            scanning: slots
                .iter()
                .find(|s| s.role == RadioRole::Scanning)
                .map(|s| s.radio.name().to_string()),
            degraded: slots.is_empty(),
        }
    }
}
