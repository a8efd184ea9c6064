//! SDR device registry and hardware detection.
//!
//! The registry provides mutual exclusion over RTL-SDR device indices:
//! a mode must claim a device before spawning any child that opens it,
//! and every exit path releases exactly once (the [`DeviceClaim`] guard
//! is authoritative). HackRF under the SubGHz engine is deliberately
//! not tracked here; that controller serialises itself via its active
//! mode.

use intercept_core::sdr::{self, SdrDevice};
use log::{debug, info};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

/// Process-wide map of `device_index -> owner mode`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    claims: Mutex<HashMap<u32, String>>,
}

impl DeviceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(DeviceRegistry::default())
    }

    /// Claim `index` for `mode`. On success returns a guard that
    /// releases the claim when dropped; on failure returns the owning
    /// mode's human-readable error.
    pub fn claim(self: &Arc<Self>, index: u32, mode: &str) -> Result<DeviceClaim, String> {
        let mut claims = self.claims.lock().unwrap();
        if let Some(owner) = claims.get(&index) {
            return Err(format!(
                "Device {index} is in use by {owner}. Stop it first."
            ));
        }
        claims.insert(index, mode.to_string());
        info!("Device {} claimed by {}", index, mode);
        Ok(DeviceClaim {
            registry: Arc::clone(self),
            index,
            mode: mode.to_string(),
        })
    }

    /// Idempotent release; no-op when `index` is not held.
    fn release(&self, index: u32) {
        if self.claims.lock().unwrap().remove(&index).is_some() {
            info!("Device {} released", index);
        }
    }

    pub fn owner_of(&self, index: u32) -> Option<String> {
        self.claims.lock().unwrap().get(&index).cloned()
    }

    pub fn claimed(&self) -> HashMap<u32, String> {
        self.claims.lock().unwrap().clone()
    }
}

/// Scoped device ownership. Dropping the guard releases the device,
/// which makes release-on-failure structural rather than a convention.
#[derive(Debug)]
pub struct DeviceClaim {
    registry: Arc<DeviceRegistry>,
    index: u32,
    mode: String,
}

impl DeviceClaim {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        debug!("Releasing device {} ({})", self.index, self.mode);
        self.registry.release(self.index);
    }
}

async fn run_probe(tool: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let output = tokio::time::timeout(
        timeout,
        Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    Some(text)
}

/// Detect RTL-SDR devices with the native `rtl_test` probe.
pub async fn detect_rtlsdr_devices() -> Vec<SdrDevice> {
    if !crate::supervisor::tool_available("rtl_test") {
        debug!("rtl_test not found, skipping RTL-SDR detection");
        return Vec::new();
    }
    match run_probe("rtl_test", &["-t"], Duration::from_secs(5)).await {
        Some(output) => sdr::parse_rtl_test(&output),
        None => Vec::new(),
    }
}

/// Detect SoapySDR devices (LimeSDR, HackRF, Airspy...).
pub async fn detect_soapy_devices() -> Vec<SdrDevice> {
    if !crate::supervisor::tool_available("SoapySDRUtil") {
        debug!("SoapySDRUtil not found, skipping SoapySDR detection");
        return Vec::new();
    }
    match run_probe("SoapySDRUtil", &["--find"], Duration::from_secs(10)).await {
        Some(output) => sdr::parse_soapy_find(&output),
        None => Vec::new(),
    }
}

/// Detect HackRF devices with the native `hackrf_info` probe.
pub async fn detect_hackrf_devices() -> Vec<SdrDevice> {
    if !crate::supervisor::tool_available("hackrf_info") {
        return Vec::new();
    }
    match run_probe("hackrf_info", &[], Duration::from_secs(5)).await {
        Some(output) => sdr::parse_hackrf_info(&output),
        None => Vec::new(),
    }
}

/// Detect all connected SDR hardware. Native RTL detection is
/// preferred; native HackRF detection fills in when SoapySDR missed it.
pub async fn detect_all_devices() -> Vec<SdrDevice> {
    let mut devices = detect_rtlsdr_devices().await;

    let soapy = detect_soapy_devices().await;
    let soapy_has_hackrf = soapy
        .iter()
        .any(|d| d.sdr_type == intercept_core::sdr::SdrType::Hackrf);
    devices.extend(soapy);

    if !soapy_has_hackrf {
        devices.extend(detect_hackrf_devices().await);
    }

    devices.sort_by(|a, b| (a.sdr_type, a.index).cmp(&(b.sdr_type, b.index)));
    info!("Detected {} SDR device(s)", devices.len());
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_released() {
        let registry = DeviceRegistry::new();
        let claim = registry.claim(0, "pager").expect("first claim");
        assert_eq!(registry.owner_of(0).as_deref(), Some("pager"));

        let err = registry.claim(0, "acars").expect_err("device busy");
        assert!(err.contains("in use by pager"));

        drop(claim);
        assert!(registry.owner_of(0).is_none());
        // Second claimant succeeds after release.
        let _claim = registry.claim(0, "acars").expect("claim after release");
        assert_eq!(registry.owner_of(0).as_deref(), Some("acars"));
    }

    #[test]
    fn different_indices_are_independent() {
        let registry = DeviceRegistry::new();
        let _a = registry.claim(0, "pager").unwrap();
        let _b = registry.claim(1, "acars").unwrap();
        assert_eq!(registry.claimed().len(), 2);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = DeviceRegistry::new();
        let claim = registry.claim(3, "dsc").unwrap();
        drop(claim);
        registry.release(3);
        registry.release(3);
        assert!(registry.owner_of(3).is_none());
    }

    #[test]
    fn guard_releases_on_panic_path() {
        let registry = DeviceRegistry::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _claim = registry.claim(0, "pager").unwrap();
            panic!("reader thread died");
        }));
        assert!(result.is_err());
        assert!(registry.owner_of(0).is_none());
    }
}
