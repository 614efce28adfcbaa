use thiserror::Error;

use uplinkd_netops::HostError;

/// Error kinds recognized by the engine.
///
/// Only `Config` is fatal, and only at startup. Every worker loop catches the
/// rest and continues; nothing propagates across worker boundaries except via
/// the catalog and status structures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no usable radios")]
    NoRadios,

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("association failed: {0}")]
    AssociationFailed(String),

    #[error("measurement failed: {0}")]
    MeasurementFailed(String),

    #[error("monitor gave up on '{0}'")]
    MonitorGaveUp(String),

    #[error("gateway bind failed: {0}")]
    GatewayBindFailed(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
