//! Connection quality scoring.

/// Reference rates for a full score contribution.
const FULL_DOWNLOAD_MBPS: f64 = 100.0;
const FULL_UPLOAD_MBPS: f64 = 50.0;

/// Compute the quality score (0-100) for a set of measurements.
///
/// Pure and deterministic: the same inputs always produce the same score, so
/// it can be recomputed from a connection's stored fields at any time.
pub fn connection_score(
    download_mbps: f64,
    upload_mbps: f64,
    latency_ms: f64,
    signal_strength: u8,
) -> f64 {
    let download = (download_mbps / FULL_DOWNLOAD_MBPS * 100.0).clamp(0.0, 100.0);
    let upload = (upload_mbps / FULL_UPLOAD_MBPS * 100.0).clamp(0.0, 100.0);
    let latency = (100.0 - latency_ms / 2.0).max(0.0);

    0.40 * download + 0.30 * f64::from(signal_strength) + 0.20 * upload + 0.10 * latency
}
