//! Host network call-outs for the uplinkd engine.
//!
//! The engine talks to the host exclusively through the [`HostOps`] trait so
//! the userspace utilities behind it can be swapped out, e.g. for tests.

pub mod error;
pub mod ops;
pub mod scan;
pub mod shell;

pub use error::HostError;
pub use ops::{Credential, DhcpRange, HostOps, LinkStatus, RealHostOps};
pub use scan::{parse_scan_output, percent_from_dbm, percent_from_quality, AccessPoint, Encryption};
