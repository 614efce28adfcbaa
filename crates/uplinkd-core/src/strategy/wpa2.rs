//! WPA2-PSK strategy.

use std::sync::Arc;

use tracing::debug;

use uplinkd_netops::{AccessPoint, Credential, Encryption};

use super::{AttemptResult, Strategy, StrategyContext};

pub struct Wpa2Strategy {
    ctx: Arc<StrategyContext>,
}

impl Wpa2Strategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }
}

impl Strategy for Wpa2Strategy {
    fn tag(&self) -> &'static str {
        "wpa2"
    }

    fn eligible(&self, ap: &AccessPoint) -> bool {
        ap.encryption == Encryption::Wpa2
    }

    fn attempt(&self, ap: &AccessPoint) -> AttemptResult {
        // Without a passphrase there is nothing to try; fail before leasing.
        let Some(passphrase) = self.ctx.credentials.get(&ap.ssid) else {
            debug!("no passphrase configured for '{}'", ap.ssid);
            return AttemptResult::failed(ap, self.tag());
        };
        let credential = Credential::WpaPsk {
            passphrase: passphrase.clone(),
        };
        super::establish_uplink(&self.ctx, ap, Some(credential), self.tag(), |_| Ok(()))
    }
}
