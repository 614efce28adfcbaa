//! The engine: owns the pool, the catalog and every worker, and wires them
//! together. Components receive their handles at construction; there are no
//! globals.

use std::sync::Arc;

use tracing::{info, warn};

use uplinkd_netops::HostOps;

use crate::catalog::ConnectionCatalog;
use crate::config::UplinkConfig;
use crate::dispatcher::Dispatcher;
use crate::gateway::GatewayBridge;
use crate::measure::{HttpMeasurer, Measurer};
use crate::monitor::ConnectionMonitor;
use crate::pool::RadioPool;
use crate::registry::RoleRegistry;
use crate::scanner::Scanner;
use crate::selector::AutoSelector;
use crate::status::StatusBoard;
use crate::strategy::{build_strategies, StrategyContext};

pub struct Engine {
    config: UplinkConfig,
    pool: Arc<RadioPool>,
    registry: Arc<RoleRegistry>,
    catalog: Arc<ConnectionCatalog>,
    status: Arc<StatusBoard>,
    gateway: Arc<GatewayBridge>,
    scanner: Arc<Scanner>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<ConnectionMonitor>,
    selector: Arc<AutoSelector>,
}

impl Engine {
    pub fn new(config: UplinkConfig, ops: Arc<dyn HostOps>) -> Engine {
        let measurer = Arc::new(HttpMeasurer::new(config.measurement.clone()));
        Self::with_measurer(config, ops, measurer)
    }

    /// Build the engine with a custom measurer (tests substitute one).
    pub fn with_measurer(
        config: UplinkConfig,
        ops: Arc<dyn HostOps>,
        measurer: Arc<dyn Measurer>,
    ) -> Engine {
        let mirror_path = config
            .state_store
            .enabled
            .then(|| config.state_store.path.clone());
        let portal_patterns_path = config.state_store.enabled.then(|| {
            config
                .state_store
                .path
                .parent()
                .map(|dir| dir.join("portal_patterns.json"))
                .unwrap_or_else(|| "portal_patterns.json".into())
        });

        let registry = Arc::new(RoleRegistry::new(mirror_path));
        let pool = RadioPool::enumerate(&config.interfaces, Arc::clone(&ops), Arc::clone(&registry));
        let status = Arc::new(StatusBoard::new());
        let catalog = Arc::new(ConnectionCatalog::new());

        let pool_status = pool.status();
        status.set_radios(pool_status.total, pool_status.in_use);
        if pool_status.degraded {
            // Non-fatal: the daemon runs, leases just return nothing.
            warn!("engine starting with no usable radios");
        }

        let gateway = Arc::new(GatewayBridge::new(
            Arc::clone(&ops),
            config.gateway.clone(),
            Arc::clone(&status),
        ));

        let strategy_ctx = Arc::new(StrategyContext {
            pool: Arc::clone(&pool),
            registry: Arc::clone(&registry),
            measurer,
            credentials: config.strategies.credentials.clone(),
            portal_patterns_path,
        });
        let strategies = build_strategies(strategy_ctx, config.strategies.enabled.as_deref());

        let (scanner, snapshots) = Scanner::new(
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&status),
            std::time::Duration::from_secs(config.scanner.scan_interval_secs),
        );

        let monitor = ConnectionMonitor::new(&config.monitor, Arc::clone(&status));
        let dispatcher = Dispatcher::new(
            snapshots,
            strategies,
            Arc::clone(&pool),
            Arc::clone(&catalog),
            Arc::clone(&monitor),
            Arc::clone(&status),
        );
        let selector = AutoSelector::new(
            &config.auto_selection,
            Arc::clone(&catalog),
            Arc::clone(&gateway),
            Arc::clone(&status),
        );

        // Monitor policy: a given-up binding is pruned from the catalog and
        // its radio becomes leasable again.
        {
            let catalog = Arc::clone(&catalog);
            let pool = Arc::clone(&pool);
            let registry = Arc::clone(&registry);
            monitor.subscribe(move |iface, success| {
                if !success {
                    let removed = catalog.remove_for_radio(iface);
                    pool.mark_engaged(iface, false);
                    registry.record_error(iface, "connection abandoned after repeated failures");
                    info!("{}: pruned {} catalog entries after give-up", iface, removed);
                }
            });
        }

        Engine {
            config,
            pool,
            registry,
            catalog,
            status,
            gateway,
            scanner,
            dispatcher,
            monitor,
            selector,
        }
    }

    /// Start all workers. Idempotent.
    pub fn start(&self) {
        self.scanner.start();
        self.dispatcher.start();
        self.monitor.start();
        self.selector.start();
        info!("engine started");
    }

    /// Stop all workers and restore host state.
    pub fn shutdown(&self) {
        self.scanner.stop();
        self.dispatcher.stop();
        self.monitor.stop();
        self.selector.stop();

        if let Err(e) = self.gateway.unbind() {
            warn!("gateway teardown failed: {}", e);
        }
        for radio in self.pool.connection_radios() {
            let _ = radio.disassociate();
        }
        info!("engine stopped");
    }

    pub fn config(&self) -> &UplinkConfig {
        &self.config
    }

    pub fn catalog(&self) -> Arc<ConnectionCatalog> {
        Arc::clone(&self.catalog)
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    pub fn gateway(&self) -> Arc<GatewayBridge> {
        Arc::clone(&self.gateway)
    }

    pub fn selector(&self) -> Arc<AutoSelector> {
        Arc::clone(&self.selector)
    }

    pub fn registry(&self) -> Arc<RoleRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn pool(&self) -> Arc<RadioPool> {
        Arc::clone(&self.pool)
    }
}
