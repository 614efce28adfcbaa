use thiserror::Error;

/// Failures surfaced by host call-outs.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("interface '{0}' is not a wireless device")]
    NotWireless(String),

    #[error("{op} failed on '{iface}': {reason}")]
    CallFailed {
        op: &'static str,
        iface: String,
        reason: String,
    },

    #[error("{op} timed out on '{iface}' after {timeout_secs}s")]
    Timeout {
        op: &'static str,
        iface: String,
        timeout_secs: u64,
    },

    #[error("no ethernet interface available")]
    NoEthernet,
}

impl HostError {
    pub fn call(op: &'static str, iface: &str, reason: impl Into<String>) -> Self {
        HostError::CallFailed {
            op,
            iface: iface.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
