//! Captive-portal strategy: detect a portal behind an open AP, attempt
//! best-effort automatic authentication, then measure.
//!
//! Detection probes the well-known connectivity URLs and treats a redirect
//! as a portal. Authentication is heuristic: terms-acceptance portals get a
//! form POST, click-through portals get a page visit, and login/payment
//! portals are never auto-authenticated. What worked for an SSID is
//! remembered in an advisory pattern file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use uplinkd_netops::AccessPoint;

use super::{establish_uplink, AttemptResult, Strategy, StrategyContext};
use crate::error::{EngineError, Result};

/// Test URLs that answer predictably when not behind a portal.
const CAPTIVE_TEST_URLS: &[&str] = &[
    "http://captive.apple.com/hotspot-detect.html",
    "http://connectivitycheck.gstatic.com/generate_204",
    "http://clients3.google.com/generate_204",
    "http://www.msftconnecttest.com/connecttest.txt",
];

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) uplinkd/0.1";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    TermsAcceptance,
    ClickThrough,
    LoginRequired,
    PaymentRequired,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct PortalInfo {
    pub redirect_url: String,
    pub redirect_domain: String,
    pub portal_type: String,
    pub auth_method: AuthMethod,
}

/// Identify a portal vendor from its redirect domain.
fn classify_portal_type(domain: &str) -> String {
    let domain = domain.to_lowercase();
    if domain.contains("captive.apple") {
        return "apple".to_string();
    }
    if domain.contains("gstatic") || domain.contains("google") {
        return "google".to_string();
    }
    if domain.contains("msftconnecttest") || domain.contains("microsoft") {
        return "microsoft".to_string();
    }
    if domain.contains("wifi.id") {
        return "wifi.id".to_string();
    }
    if domain.contains("fon.com") {
        return "fon".to_string();
    }
    if domain.contains("hotspotsystem") {
        return "hotspotsystem".to_string();
    }
    if let Ok(re) = Regex::new(r"([\w-]+)\.(com|net|org)") {
        if let Some(caps) = re.captures(&domain) {
            return caps[1].to_string();
        }
    }
    "unknown".to_string()
}

/// Guess how a portal wants to be satisfied from its page content.
fn classify_auth_method(body: &str) -> AuthMethod {
    let text = body.to_lowercase();
    if text.contains("accept") && text.contains("terms") {
        AuthMethod::TermsAcceptance
    } else if text.contains("login") || text.contains("username") {
        AuthMethod::LoginRequired
    } else if text.contains("click") && (text.contains("continue") || text.contains("connect")) {
        AuthMethod::ClickThrough
    } else if text.contains("payment") || text.contains("purchase") {
        AuthMethod::PaymentRequired
    } else {
        AuthMethod::Unknown
    }
}

/// One remembered portal encounter, keyed by SSID.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortalPattern {
    redirect_domain: String,
    portal_type: String,
    auth_method: AuthMethod,
    success_count: u64,
    failure_count: u64,
    last_seen: DateTime<Utc>,
}

/// Advisory JSON-file memory of portal patterns. Every failure here is
/// swallowed; absence of the file changes nothing.
struct PortalMemory {
    path: Option<PathBuf>,
}

impl PortalMemory {
    fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn load(&self) -> std::collections::HashMap<String, PortalPattern> {
        let Some(path) = &self.path else {
            return Default::default();
        };
        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn known(&self, ssid: &str) -> Option<PortalPattern> {
        self.load().remove(ssid)
    }

    fn record(&self, ssid: &str, info: &PortalInfo, success: bool) {
        let Some(path) = &self.path else { return };
        let mut patterns = self.load();
        let entry = patterns
            .entry(ssid.to_string())
            .or_insert_with(|| PortalPattern {
                redirect_domain: info.redirect_domain.clone(),
                portal_type: info.portal_type.clone(),
                auth_method: info.auth_method,
                success_count: 0,
                failure_count: 0,
                last_seen: Utc::now(),
            });
        entry.redirect_domain = info.redirect_domain.clone();
        entry.portal_type = info.portal_type.clone();
        entry.auth_method = info.auth_method;
        entry.last_seen = Utc::now();
        if success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
        }

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            let payload = serde_json::to_vec_pretty(&patterns)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&tmp, payload)?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if let Err(e) = result {
            debug!("portal pattern store write failed: {}", e);
        }
    }
}

pub struct CaptivePortalStrategy {
    ctx: Arc<StrategyContext>,
    memory: PortalMemory,
}

impl CaptivePortalStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        let memory = PortalMemory::new(ctx.portal_patterns_path.clone());
        Self { ctx, memory }
    }

    fn probe_client(&self, iface: &str) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .interface(iface)
            .build()
            .map_err(|e| EngineError::AssociationFailed(format!("portal probe client: {e}")))
    }

    fn follow_client(&self, iface: &str) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(AUTH_TIMEOUT)
            .user_agent(USER_AGENT)
            .interface(iface)
            .build()
            .map_err(|e| EngineError::AssociationFailed(format!("portal auth client: {e}")))
    }

    /// Probe for a captive portal. `None` means the uplink looks open.
    fn detect(&self, iface: &str) -> Result<Option<PortalInfo>> {
        let probe = self.probe_client(iface)?;
        let follow = self.follow_client(iface)?;

        for test_url in CAPTIVE_TEST_URLS {
            let response = match probe.get(*test_url).send() {
                Ok(response) => response,
                Err(e) => {
                    debug!("connectivity probe {} failed: {}", test_url, e);
                    continue;
                }
            };

            let status = response.status().as_u16();
            if matches!(status, 301 | 302 | 303 | 307 | 308) {
                let redirect_url = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                info!("captive portal detected: {} -> {}", status, redirect_url);
                return Ok(Some(self.analyze(&follow, redirect_url)));
            }

            // Unexpected direct answers also indicate interception.
            let intercepted = if test_url.ends_with("generate_204") {
                status != 204
            } else if test_url.ends_with("hotspot-detect.html") {
                !response.text().unwrap_or_default().contains("Success")
            } else {
                false
            };
            if intercepted {
                info!("connectivity check intercepted via {}", test_url);
                return Ok(Some(self.analyze(&follow, String::new())));
            }

            debug!("no captive portal via {}", test_url);
            return Ok(None);
        }

        // Every probe errored out; the uplink is not usable.
        Err(EngineError::AssociationFailed(
            "all connectivity probes failed".to_string(),
        ))
    }

    fn analyze(&self, follow: &reqwest::blocking::Client, redirect_url: String) -> PortalInfo {
        let redirect_domain = reqwest::Url::parse(&redirect_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let portal_type = if redirect_domain.is_empty() {
            "unknown".to_string()
        } else {
            classify_portal_type(&redirect_domain)
        };

        let body = if redirect_url.is_empty() {
            String::new()
        } else {
            follow
                .get(&redirect_url)
                .send()
                .and_then(|r| r.text())
                .unwrap_or_default()
        };

        PortalInfo {
            redirect_url,
            redirect_domain,
            portal_type,
            auth_method: classify_auth_method(&body),
        }
    }

    fn authenticate(&self, iface: &str, info: &PortalInfo) -> bool {
        match info.auth_method {
            AuthMethod::TermsAcceptance => self.accept_terms(iface, info),
            AuthMethod::ClickThrough => self.click_through(iface, info),
            AuthMethod::LoginRequired => {
                warn!("portal requires login, cannot auto-authenticate");
                false
            }
            AuthMethod::PaymentRequired => {
                warn!("portal requires payment, cannot auto-authenticate");
                false
            }
            AuthMethod::Unknown => {
                debug!("unknown auth method, trying generic click-through");
                self.click_through(iface, info)
            }
        }
    }

    fn accept_terms(&self, iface: &str, info: &PortalInfo) -> bool {
        if info.redirect_url.is_empty() {
            return false;
        }
        let Ok(client) = self.follow_client(iface) else {
            return false;
        };
        let Ok(page) = client
            .get(&info.redirect_url)
            .send()
            .and_then(|r| r.text())
        else {
            return false;
        };

        let Ok(form_re) = Regex::new(r#"(?i)<form[^>]+action=["']([^"']+)["']"#) else {
            return false;
        };
        let Some(caps) = form_re.captures(&page) else {
            debug!("no form found on portal page");
            return false;
        };

        let action = &caps[1];
        let action_url = if action.starts_with("http") {
            action.to_string()
        } else {
            match reqwest::Url::parse(&info.redirect_url).and_then(|base| base.join(action)) {
                Ok(url) => url.to_string(),
                Err(_) => return false,
            }
        };

        debug!("posting terms acceptance to {}", action_url);
        match client
            .post(&action_url)
            .form(&[("accept", "1"), ("terms", "accepted"), ("continue", "1")])
            .send()
        {
            Ok(response) if response.status().is_success() => {
                info!("terms acceptance succeeded");
                true
            }
            Ok(response) => {
                debug!("terms acceptance answered {}", response.status());
                false
            }
            Err(e) => {
                debug!("terms acceptance failed: {}", e);
                false
            }
        }
    }

    fn click_through(&self, iface: &str, info: &PortalInfo) -> bool {
        if info.redirect_url.is_empty() {
            return false;
        }
        let Ok(client) = self.follow_client(iface) else {
            return false;
        };
        match client.get(&info.redirect_url).send() {
            Ok(response) if response.status().is_success() => {
                info!("click-through succeeded");
                true
            }
            _ => false,
        }
    }

    fn run_portal_flow(&self, iface: &str, ssid: &str) -> Result<()> {
        if let Some(known) = self.memory.known(ssid) {
            debug!(
                "known portal pattern for '{}': {} ({:?})",
                ssid, known.portal_type, known.auth_method
            );
        }

        let Some(info) = self.detect(iface)? else {
            debug!("no captive portal on '{}'", ssid);
            return Ok(());
        };

        info!(
            "portal on '{}': type={} method={:?}",
            ssid, info.portal_type, info.auth_method
        );
        let authenticated = self.authenticate(iface, &info);
        self.memory.record(ssid, &info, authenticated);

        if authenticated {
            Ok(())
        } else {
            Err(EngineError::AssociationFailed(format!(
                "captive portal authentication failed for '{ssid}'"
            )))
        }
    }
}

impl Strategy for CaptivePortalStrategy {
    fn tag(&self) -> &'static str {
        "captive_portal"
    }

    /// Open networks are where captive portals live.
    fn eligible(&self, ap: &AccessPoint) -> bool {
        ap.open
    }

    fn attempt(&self, ap: &AccessPoint) -> AttemptResult {
        let ssid = ap.ssid.clone();
        establish_uplink(&self.ctx, ap, None, self.tag(), |iface| {
            self.run_portal_flow(iface, &ssid)
        })
    }
}
