//! WPA3-SAE strategy.

use std::sync::Arc;

use tracing::debug;

use uplinkd_netops::{AccessPoint, Credential, Encryption};

use super::{AttemptResult, Strategy, StrategyContext};

pub struct Wpa3Strategy {
    ctx: Arc<StrategyContext>,
}

impl Wpa3Strategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }
}

impl Strategy for Wpa3Strategy {
    fn tag(&self) -> &'static str {
        "wpa3"
    }

    fn eligible(&self, ap: &AccessPoint) -> bool {
        ap.encryption == Encryption::Wpa3
    }

    fn attempt(&self, ap: &AccessPoint) -> AttemptResult {
        let Some(passphrase) = self.ctx.credentials.get(&ap.ssid) else {
            debug!("no passphrase configured for '{}'", ap.ssid);
            return AttemptResult::failed(ap, self.tag());
        };
        let credential = Credential::Sae {
            passphrase: passphrase.clone(),
        };
        super::establish_uplink(&self.ctx, ap, Some(credential), self.tag(), |_| Ok(()))
    }
}
