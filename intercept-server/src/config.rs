//! Server configuration: CLI arguments, data directories, and the
//! central table of tunable constants with their environment overrides.

use clap::Parser;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(name = "intercept-server", version)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 5050)]
    pub port: u16,

    /// Data directory (captures, recordings, store). Defaults to the
    /// platform data dir.
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Disable external tool detection at startup (useful in tests)
    #[arg(long, default_value_t = false)]
    pub no_detect: bool,
}

/// Platform data/config dirs for the service.
pub fn get_project_dirs() -> ProjectDirs {
    ProjectDirs::from("net", "intercept", "intercept").expect("no home directory found")
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Central constants table. One instance lives in the [`crate::Session`];
/// every mode reads its timing and limit values from here rather than
/// hard-coding them at the call site.
#[derive(Debug, Clone)]
pub struct Constants {
    // SSE
    pub sse_keepalive_interval: Duration,
    pub sse_queue_timeout: Duration,
    // Process lifecycle
    pub process_start_wait: Duration,
    pub process_terminate_timeout: Duration,
    pub dsc_terminate_timeout: Duration,
    pub ais_terminate_timeout: Duration,
    // Event queues
    pub event_queue_capacity: usize,
    // DSC
    pub dsc_vhf_frequency_mhz: f64,
    pub dsc_sample_rate: u32,
    // AIS
    pub ais_tcp_port: u16,
    pub ais_socket_timeout: Duration,
    pub ais_reconnect_delay: Duration,
    pub ais_update_interval: Duration,
    // SubGHz
    pub subghz_freq_min_mhz: f64,
    pub subghz_freq_max_mhz: f64,
    pub subghz_lna_gain_min: u32,
    pub subghz_lna_gain_max: u32,
    pub subghz_vga_gain_min: u32,
    pub subghz_vga_gain_max: u32,
    pub subghz_tx_vga_gain_min: u32,
    pub subghz_tx_vga_gain_max: u32,
    pub subghz_tx_max_duration: u64,
    /// Inclusive ISM bands (MHz) where replay transmit is permitted.
    pub subghz_tx_allowed_bands: Vec<(f64, f64)>,
    // Alerts
    pub alert_webhook_url: Option<String>,
    pub alert_webhook_secret: Option<String>,
    pub alert_webhook_timeout: Duration,
    pub alert_rule_cache_age: Duration,
    // Misc
    pub shared_observer_location_enabled: bool,
    pub correlator_max_messages: usize,
    pub pattern_ring_capacity: usize,
}

impl Constants {
    /// Build from the environment; unset variables take the defaults.
    pub fn from_env() -> Self {
        Constants {
            sse_keepalive_interval: Duration::from_secs_f64(env_f64(
                "SSE_KEEPALIVE_INTERVAL",
                30.0,
            )),
            sse_queue_timeout: Duration::from_secs_f64(env_f64("SSE_QUEUE_TIMEOUT", 1.0)),
            process_start_wait: Duration::from_secs_f64(env_f64("PROCESS_START_WAIT", 0.2)),
            process_terminate_timeout: Duration::from_secs_f64(env_f64(
                "PROCESS_TERMINATE_TIMEOUT",
                2.0,
            )),
            dsc_terminate_timeout: Duration::from_secs_f64(env_f64("DSC_TERMINATE_TIMEOUT", 3.0)),
            ais_terminate_timeout: Duration::from_secs_f64(env_f64("AIS_TERMINATE_TIMEOUT", 3.0)),
            event_queue_capacity: env_u64("EVENT_QUEUE_CAPACITY", 1000) as usize,
            dsc_vhf_frequency_mhz: intercept_core::dsc::DSC_VHF_FREQUENCY_MHZ,
            dsc_sample_rate: env_u64("DSC_SAMPLE_RATE", 48_000) as u32,
            ais_tcp_port: env_u64("AIS_TCP_PORT", 10110) as u16,
            ais_socket_timeout: Duration::from_secs_f64(env_f64("AIS_SOCKET_TIMEOUT", 5.0)),
            ais_reconnect_delay: Duration::from_secs_f64(env_f64("AIS_RECONNECT_DELAY", 2.0)),
            ais_update_interval: Duration::from_secs_f64(env_f64("AIS_UPDATE_INTERVAL", 2.0)),
            subghz_freq_min_mhz: env_f64("SUBGHZ_FREQ_MIN_MHZ", 1.0),
            subghz_freq_max_mhz: env_f64("SUBGHZ_FREQ_MAX_MHZ", 6000.0),
            subghz_lna_gain_min: env_u64("SUBGHZ_LNA_GAIN_MIN", 0) as u32,
            subghz_lna_gain_max: env_u64("SUBGHZ_LNA_GAIN_MAX", 40) as u32,
            subghz_vga_gain_min: env_u64("SUBGHZ_VGA_GAIN_MIN", 0) as u32,
            subghz_vga_gain_max: env_u64("SUBGHZ_VGA_GAIN_MAX", 62) as u32,
            subghz_tx_vga_gain_min: env_u64("SUBGHZ_TX_VGA_GAIN_MIN", 0) as u32,
            subghz_tx_vga_gain_max: env_u64("SUBGHZ_TX_VGA_GAIN_MAX", 47) as u32,
            subghz_tx_max_duration: env_u64("SUBGHZ_TX_MAX_DURATION", 30),
            subghz_tx_allowed_bands: parse_bands(
                std::env::var("SUBGHZ_TX_ALLOWED_BANDS").ok().as_deref(),
            ),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            alert_webhook_secret: std::env::var("ALERT_WEBHOOK_SECRET").ok(),
            alert_webhook_timeout: Duration::from_secs_f64(env_f64("ALERT_WEBHOOK_TIMEOUT", 5.0)),
            alert_rule_cache_age: Duration::from_secs_f64(env_f64("ALERT_RULE_CACHE_AGE", 10.0)),
            shared_observer_location_enabled: env_bool("SHARED_OBSERVER_LOCATION_ENABLED", false),
            correlator_max_messages: env_u64("FLIGHT_CORRELATOR_MAX_MESSAGES", 1000) as usize,
            pattern_ring_capacity: env_u64("PATTERN_RING_CAPACITY", 64) as usize,
        }
    }

    /// Is `frequency_hz` inside one of the allowed TX bands?
    pub fn tx_frequency_allowed(&self, frequency_hz: u64) -> bool {
        let mhz = frequency_hz as f64 / 1_000_000.0;
        self.subghz_tx_allowed_bands
            .iter()
            .any(|(low, high)| (*low..=*high).contains(&mhz))
    }

    /// Human-readable list of the allowed TX bands.
    pub fn tx_bands_description(&self) -> String {
        self.subghz_tx_allowed_bands
            .iter()
            .map(|(low, high)| format!("{low}-{high} MHz"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for Constants {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Parse `"433.05-434.79,868.0-868.6,902.0-928.0"` into band pairs.
/// Falls back to the region-1/2 ISM defaults when unset or malformed.
fn parse_bands(spec: Option<&str>) -> Vec<(f64, f64)> {
    let defaults = vec![(433.05, 434.79), (868.0, 868.6), (902.0, 928.0), (315.0, 315.25)];
    let Some(spec) = spec.filter(|s| !s.trim().is_empty()) else {
        return defaults;
    };
    let mut bands = Vec::new();
    for part in spec.split(',') {
        let Some((low, high)) = part.split_once('-') else {
            continue;
        };
        if let (Ok(low), Ok(high)) = (low.trim().parse::<f64>(), high.trim().parse::<f64>()) {
            if high > low {
                bands.push((low, high));
            }
        }
    }
    if bands.is_empty() {
        defaults
    } else {
        bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bands_cover_common_ism() {
        let constants = Constants::from_env();
        assert!(constants.tx_frequency_allowed(433_920_000));
        assert!(constants.tx_frequency_allowed(915_000_000));
        assert!(!constants.tx_frequency_allowed(100_000_000));
        assert!(!constants.tx_frequency_allowed(1_575_420_000));
    }

    #[test]
    fn band_spec_parsing() {
        assert_eq!(parse_bands(Some("400.0-410.0")), vec![(400.0, 410.0)]);
        assert_eq!(
            parse_bands(Some("400.0-410.0,500-501")),
            vec![(400.0, 410.0), (500.0, 501.0)]
        );
        // Malformed entries are skipped; fully malformed falls back.
        assert_eq!(parse_bands(Some("nonsense")).len(), 4);
        assert_eq!(parse_bands(None).len(), 4);
    }

    #[test]
    fn bands_description_is_readable() {
        let constants = Constants::from_env();
        assert!(constants.tx_bands_description().contains("MHz"));
    }
}
