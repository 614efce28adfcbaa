//! Throughput and latency measurement for freshly associated uplinks.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::MeasurementConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
}

/// Measures the uplink quality over a specific interface. Strategies call
/// this after association; tests substitute their own.
pub trait Measurer: Send + Sync {
    fn measure(&self, iface: &str) -> Result<Measurement>;
}

/// HTTP-based measurer: latency from small probe requests, rates from
/// bounded transfers, all bound to the radio's interface.
pub struct HttpMeasurer {
    config: MeasurementConfig,
}

impl HttpMeasurer {
    pub fn new(config: MeasurementConfig) -> Self {
        Self { config }
    }

    fn client(&self, iface: &str) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .interface(iface)
            .build()
            .map_err(|e| EngineError::MeasurementFailed(format!("client: {e}")))
    }

    fn latency_ms(&self, client: &reqwest::blocking::Client) -> Result<f64> {
        let mut samples = Vec::with_capacity(3);
        for _ in 0..3 {
            let start = Instant::now();
            let response = client
                .get(&self.config.latency_url)
                .send()
                .map_err(|e| EngineError::MeasurementFailed(format!("latency probe: {e}")))?;
            let _ = response.bytes();
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        samples.sort_by(|a, b| a.total_cmp(b));
        Ok(samples[samples.len() / 2])
    }

    fn download_mbps(&self, client: &reqwest::blocking::Client) -> Result<f64> {
        let cap = self.config.download_cap_bytes.max(1);
        let range = format!("bytes=0-{}", cap - 1);
        let start = Instant::now();
        let response = client
            .get(&self.config.download_url)
            .header(reqwest::header::RANGE, range)
            .send()
            .map_err(|e| EngineError::MeasurementFailed(format!("download: {e}")))?;
        let body = response
            .bytes()
            .map_err(|e| EngineError::MeasurementFailed(format!("download body: {e}")))?;
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return Ok(0.0);
        }
        Ok(body.len() as f64 * 8.0 / 1_000_000.0 / elapsed)
    }

    fn upload_mbps(&self, client: &reqwest::blocking::Client) -> Result<f64> {
        let payload = vec![0u8; self.config.upload_bytes.max(1) as usize];
        let bytes = payload.len();
        let start = Instant::now();
        let response = client
            .post(&self.config.upload_url)
            .body(payload)
            .send()
            .map_err(|e| EngineError::MeasurementFailed(format!("upload: {e}")))?;
        let _ = response.bytes();
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return Ok(0.0);
        }
        Ok(bytes as f64 * 8.0 / 1_000_000.0 / elapsed)
    }
}

impl Measurer for HttpMeasurer {
    fn measure(&self, iface: &str) -> Result<Measurement> {
        let client = self.client(iface)?;
        let latency_ms = self.latency_ms(&client)?;
        let download_mbps = self.download_mbps(&client)?;
        let upload_mbps = self.upload_mbps(&client)?;
        let measurement = Measurement {
            download_mbps,
            upload_mbps,
            latency_ms,
        };
        debug!(
            "{}: {:.1} Mbps down, {:.1} Mbps up, {:.0} ms",
            iface, download_mbps, upload_mbps, latency_ms
        );
        Ok(measurement)
    }
}
