//! Open-network strategy: associate without credentials and measure.

use std::sync::Arc;

use uplinkd_netops::AccessPoint;

use super::{establish_uplink, AttemptResult, Strategy, StrategyContext};

pub struct OpenStrategy {
    ctx: Arc<StrategyContext>,
}

impl OpenStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }
}

impl Strategy for OpenStrategy {
    fn tag(&self) -> &'static str {
        "open"
    }

    fn eligible(&self, ap: &AccessPoint) -> bool {
        ap.open
    }

    fn attempt(&self, ap: &AccessPoint) -> AttemptResult {
        establish_uplink(&self.ctx, ap, None, self.tag(), |_| Ok(()))
    }
}
