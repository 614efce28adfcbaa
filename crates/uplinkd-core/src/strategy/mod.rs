//! Connection strategies.
//!
//! A strategy decides whether it can try an access point and, if so, leases
//! a connection radio, drives the association and any protocol-specific
//! post-association steps, measures the uplink, and reports an
//! [`AttemptResult`]. Strategies never panic outward and always return the
//! radio they leased.
//!
//! The set of strategies is a static registry keyed by tag; configuration
//! selects which constructors run.

mod open;
mod portal;
mod wpa2;
mod wpa3;

pub use open::OpenStrategy;
pub use portal::CaptivePortalStrategy;
pub use wpa2::Wpa2Strategy;
pub use wpa3::Wpa3Strategy;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use uplinkd_netops::{AccessPoint, Credential};

use crate::measure::Measurer;
use crate::pool::{LeasePurpose, RadioPool};
use crate::registry::RoleRegistry;

const DHCP_TIMEOUT: Duration = Duration::from_secs(20);

/// Outcome of one strategy attempt. Failures carry zeros and
/// `connected = false`; they are recorded, never raised.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub ap: AccessPoint,
    /// Name of the radio used, empty when none was leased.
    pub radio: String,
    pub strategy: &'static str,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub connected: bool,
}

impl AttemptResult {
    fn failed(ap: &AccessPoint, strategy: &'static str) -> Self {
        Self::failed_on(ap, strategy, "")
    }

    fn failed_on(ap: &AccessPoint, strategy: &'static str, radio: &str) -> Self {
        AttemptResult {
            ap: ap.clone(),
            radio: radio.to_string(),
            strategy,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            latency_ms: 0.0,
            connected: false,
        }
    }
}

pub trait Strategy: Send + Sync {
    fn tag(&self) -> &'static str;

    /// Pure predicate: can this strategy try the given AP?
    fn eligible(&self, ap: &AccessPoint) -> bool;

    /// Attempt a connection. Must not panic; every failure becomes a
    /// non-connected result, and any leased radio is released on every exit
    /// path.
    fn attempt(&self, ap: &AccessPoint) -> AttemptResult;
}

/// Shared handles a strategy needs to do its work.
pub struct StrategyContext {
    pub pool: Arc<RadioPool>,
    pub registry: Arc<RoleRegistry>,
    pub measurer: Arc<dyn Measurer>,
    /// SSID to passphrase map for protected networks.
    pub credentials: HashMap<String, String>,
    /// Optional captive-portal pattern memory file.
    pub portal_patterns_path: Option<PathBuf>,
}

type StrategyCtor = fn(Arc<StrategyContext>) -> Box<dyn Strategy>;

/// Built-in strategies in offer order: cheap attempts first, portal probing
/// last because it is the slowest path.
const BUILTIN: &[(&str, StrategyCtor)] = &[
    ("open", |ctx| Box::new(OpenStrategy::new(ctx))),
    ("wpa2", |ctx| Box::new(Wpa2Strategy::new(ctx))),
    ("wpa3", |ctx| Box::new(Wpa3Strategy::new(ctx))),
    ("captive_portal", |ctx| {
        Box::new(CaptivePortalStrategy::new(ctx))
    }),
];

/// Instantiate the configured strategies, preserving the built-in order
/// regardless of the order tags appear in the config.
pub fn build_strategies(
    ctx: Arc<StrategyContext>,
    enabled: Option<&[String]>,
) -> Vec<Box<dyn Strategy>> {
    let mut strategies = Vec::new();
    for (tag, ctor) in BUILTIN {
        let wanted = enabled.map_or(true, |tags| tags.iter().any(|t| t.as_str() == *tag));
        if wanted {
            strategies.push(ctor(Arc::clone(&ctx)));
        } else {
            debug!("strategy '{}' disabled by configuration", tag);
        }
    }
    strategies
}

/// The shared associate → DHCP → post-step → measure flow.
///
/// `post_associate` runs protocol-specific work (e.g. captive-portal
/// authentication) between DHCP and measurement. The leased radio is
/// released on every path by the lease guard; on success it is marked
/// engaged first so it cannot be re-leased out from under its connection.
pub(crate) fn establish_uplink(
    ctx: &StrategyContext,
    ap: &AccessPoint,
    credential: Option<Credential>,
    tag: &'static str,
    post_associate: impl FnOnce(&str) -> crate::error::Result<()>,
) -> AttemptResult {
    let Some(lease) = ctx.pool.lease(LeasePurpose::Connection) else {
        debug!("no connection radio free for '{}'", ap.ssid);
        return AttemptResult::failed(ap, tag);
    };

    let radio = Arc::clone(lease.radio());
    let name = radio.name().to_string();
    ctx.registry
        .set_state(&name, crate::registry::RadioState::Connecting);

    if let Err(e) = radio.associate(ap, credential.as_ref()) {
        warn!("{}: association with '{}' failed: {}", name, ap.ssid, e);
        ctx.registry.record_error(&name, &e.to_string());
        return AttemptResult::failed_on(ap, tag, &name);
    }

    if let Err(e) = radio.acquire_dhcp(DHCP_TIMEOUT) {
        warn!("{}: no DHCP lease on '{}': {}", name, ap.ssid, e);
        ctx.registry.record_error(&name, &e.to_string());
        let _ = radio.disassociate();
        radio.clear_last_association();
        return AttemptResult::failed_on(ap, tag, &name);
    }

    if let Err(e) = post_associate(&name) {
        warn!("{}: post-association step failed on '{}': {}", name, ap.ssid, e);
        ctx.registry.record_error(&name, &e.to_string());
        let _ = radio.disassociate();
        radio.clear_last_association();
        return AttemptResult::failed_on(ap, tag, &name);
    }

    match ctx.measurer.measure(&name) {
        Ok(m) => {
            ctx.registry.set_connected(&name, &ap.ssid);
            ctx.pool.mark_engaged(&name, true);
            AttemptResult {
                ap: ap.clone(),
                radio: name,
                strategy: tag,
                download_mbps: m.download_mbps,
                upload_mbps: m.upload_mbps,
                latency_ms: m.latency_ms,
                connected: true,
            }
        }
        Err(e) => {
            warn!("{}: measurement on '{}' failed: {}", name, ap.ssid, e);
            ctx.registry.record_error(&name, &e.to_string());
            let _ = radio.disassociate();
            radio.clear_last_association();
            AttemptResult::failed_on(ap, tag, &name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfacesConfig;
    use crate::testutil::{ap_encrypted, ap_open, MockHostOps, MockMeasurer};
    use uplinkd_netops::Encryption;

    fn context(ops: &MockHostOps) -> Arc<StrategyContext> {
        let registry = Arc::new(RoleRegistry::new(None));
        let pool = RadioPool::enumerate(&InterfacesConfig::default(), ops.shared(), registry.clone());
        Arc::new(StrategyContext {
            pool,
            registry,
            measurer: MockMeasurer::ok(40.0, 10.0, 30.0),
            credentials: HashMap::from([("HomeNet".to_string(), "hunter22".to_string())]),
            portal_patterns_path: None,
        })
    }

    fn two_radio_ops() -> MockHostOps {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.add_interface("wlan1", true);
        ops
    }

    #[test]
    fn eligibility_matrix() {
        let ops = two_radio_ops();
        let ctx = context(&ops);
        let strategies = build_strategies(Arc::clone(&ctx), None);
        assert_eq!(strategies.len(), 4);

        let open = ap_open("Cafe", "aa", 90);
        let wpa = ap_encrypted("Old", "bb", 50, Encryption::Wpa);
        let wpa2 = ap_encrypted("HomeNet", "cc", 70, Encryption::Wpa2);
        let wpa3 = ap_encrypted("NewNet", "dd", 70, Encryption::Wpa3);

        let matrix: Vec<(&str, Vec<bool>)> = strategies
            .iter()
            .map(|s| {
                (
                    s.tag(),
                    vec![
                        s.eligible(&open),
                        s.eligible(&wpa),
                        s.eligible(&wpa2),
                        s.eligible(&wpa3),
                    ],
                )
            })
            .collect();

        assert_eq!(matrix[0], ("open", vec![true, false, false, false]));
        // The WPA fallback classification must not satisfy wpa2/wpa3.
        assert_eq!(matrix[1], ("wpa2", vec![false, false, true, false]));
        assert_eq!(matrix[2], ("wpa3", vec![false, false, false, true]));
        assert_eq!(matrix[3], ("captive_portal", vec![true, false, false, false]));
    }

    #[test]
    fn enabled_filter_preserves_builtin_order() {
        let ops = two_radio_ops();
        let ctx = context(&ops);
        let enabled = vec!["captive_portal".to_string(), "open".to_string()];
        let strategies = build_strategies(ctx, Some(&enabled));
        let tags: Vec<&str> = strategies.iter().map(|s| s.tag()).collect();
        assert_eq!(tags, vec!["open", "captive_portal"]);
    }

    #[test]
    fn successful_attempt_reports_measurements_and_engages_radio() {
        let ops = two_radio_ops();
        let ctx = context(&ops);
        let strategies = build_strategies(Arc::clone(&ctx), None);

        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);
        let result = strategies[0].attempt(&ap);

        assert!(result.connected);
        assert_eq!(result.radio, "wlan1");
        assert_eq!(result.download_mbps, 40.0);
        // The radio carries a connection now: not leasable, but not leased.
        assert!(ctx.pool.lease(LeasePurpose::Connection).is_none());
        assert!(ctx.pool.lease(LeasePurpose::Scanning).is_some());
    }

    #[test]
    fn association_failure_yields_non_connected_result_and_frees_radio() {
        let ops = two_radio_ops();
        ops.fail_associations_to("Cafe");
        let ctx = context(&ops);
        let strategies = build_strategies(Arc::clone(&ctx), None);

        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);
        let result = strategies[0].attempt(&ap);

        assert!(!result.connected);
        assert_eq!(result.download_mbps, 0.0);
        // Released and not engaged: leasable again.
        assert!(ctx.pool.lease(LeasePurpose::Connection).is_some());
    }

    #[test]
    fn measurement_failure_yields_zeros_and_disassociates() {
        let ops = two_radio_ops();
        let registry = Arc::new(RoleRegistry::new(None));
        let pool = RadioPool::enumerate(&InterfacesConfig::default(), ops.shared(), registry.clone());
        let ctx = Arc::new(StrategyContext {
            pool: Arc::clone(&pool),
            registry,
            measurer: MockMeasurer::failing(),
            credentials: HashMap::new(),
            portal_patterns_path: None,
        });

        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);
        let result = OpenStrategy::new(Arc::clone(&ctx)).attempt(&ap);

        assert!(!result.connected);
        assert_eq!(result.radio, "wlan1");
        assert_eq!(result.download_mbps, 0.0);
        let radio = pool.find("wlan1").unwrap();
        assert!(!radio.is_associated());
        assert!(pool.lease(LeasePurpose::Connection).is_some());
    }

    #[test]
    fn wpa2_without_credential_fails_fast_without_leasing() {
        let ops = two_radio_ops();
        let ctx = context(&ops);
        let strategies = build_strategies(Arc::clone(&ctx), None);

        let ap = ap_encrypted("UnknownNet", "ee", 60, Encryption::Wpa2);
        let result = strategies[1].attempt(&ap);

        assert!(!result.connected);
        assert!(result.radio.is_empty());
        assert!(ops.associate_log().is_empty());
    }

    #[test]
    fn wpa2_with_credential_associates() {
        let ops = two_radio_ops();
        let ctx = context(&ops);
        let strategies = build_strategies(Arc::clone(&ctx), None);

        let ap = ap_encrypted("HomeNet", "cc", 70, Encryption::Wpa2);
        let result = strategies[1].attempt(&ap);

        assert!(result.connected);
        assert_eq!(result.strategy, "wpa2");
        assert_eq!(ops.associate_log(), vec![("wlan1".to_string(), "HomeNet".to_string())]);
    }

    #[test]
    fn no_free_radio_yields_failed_result() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        let ctx = context(&ops);
        let strategies = build_strategies(Arc::clone(&ctx), None);

        let ap = ap_open("Cafe", "aa", 90);
        let result = strategies[0].attempt(&ap);
        assert!(!result.connected);
        assert!(result.radio.is_empty());
        assert!(ops.associate_log().is_empty());
    }
}
