//! SDR hardware models and probe-output parsers.
//!
//! Detection itself (running `rtl_test`, `hackrf_info`, `SoapySDRUtil`)
//! lives in the server crate; this module owns the device/capability
//! types and the parsing of each probe's output, plus the one-time
//! detection of external tool dialects (acarsdec forks).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported SDR hardware families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SdrType {
    RtlSdr,
    Hackrf,
    LimeSdr,
    Airspy,
}

/// Static capability record for an SDR type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SdrCapabilities {
    pub freq_min_mhz: f64,
    pub freq_max_mhz: f64,
    pub gain_min: f64,
    pub gain_max: f64,
    pub supports_bias_t: bool,
    pub supports_ppm: bool,
    pub tx_capable: bool,
}

impl SdrType {
    pub fn capabilities(self) -> SdrCapabilities {
        match self {
            SdrType::RtlSdr => SdrCapabilities {
                freq_min_mhz: 24.0,
                freq_max_mhz: 1766.0,
                gain_min: 0.0,
                gain_max: 49.6,
                supports_bias_t: true,
                supports_ppm: true,
                tx_capable: false,
            },
            SdrType::Hackrf => SdrCapabilities {
                freq_min_mhz: 1.0,
                freq_max_mhz: 6000.0,
                gain_min: 0.0,
                gain_max: 62.0,
                supports_bias_t: true,
                supports_ppm: false,
                tx_capable: true,
            },
            SdrType::LimeSdr => SdrCapabilities {
                freq_min_mhz: 0.1,
                freq_max_mhz: 3800.0,
                gain_min: 0.0,
                gain_max: 73.0,
                supports_bias_t: false,
                supports_ppm: false,
                tx_capable: true,
            },
            SdrType::Airspy => SdrCapabilities {
                freq_min_mhz: 24.0,
                freq_max_mhz: 1800.0,
                gain_min: 0.0,
                gain_max: 45.0,
                supports_bias_t: true,
                supports_ppm: false,
                tx_capable: false,
            },
        }
    }

    /// Map a SoapySDR driver string to a hardware family.
    pub fn from_soapy_driver(driver: &str) -> Option<SdrType> {
        match driver.to_ascii_lowercase().as_str() {
            "rtlsdr" => Some(SdrType::RtlSdr),
            "lime" | "limesdr" => Some(SdrType::LimeSdr),
            "hackrf" => Some(SdrType::Hackrf),
            "airspy" | "airspyhf" => Some(SdrType::Airspy),
            _ => None,
        }
    }
}

/// One detected SDR device. Never persisted; rebuilt on each scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdrDevice {
    pub sdr_type: SdrType,
    pub index: u32,
    pub name: String,
    pub serial: String,
    pub driver: String,
    pub capabilities: SdrCapabilities,
}

static RTL_DEVICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):\s+(.+?)(?:,\s*SN:\s*(\S+))?$").unwrap());
static RTL_FOUND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Found (\d+) device").unwrap());

/// Parse `rtl_test -t` output (stderr+stdout concatenated).
///
/// Device lines look like `0:  Realtek, RTL2838UHIDIR, SN: 00000001`.
/// When no per-device lines parse but a `Found N device(s)` banner is
/// present, placeholder entries are synthesised.
pub fn parse_rtl_test(output: &str) -> Vec<SdrDevice> {
    let mut devices = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if let Some(caps) = RTL_DEVICE_RE.captures(line) {
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            devices.push(SdrDevice {
                sdr_type: SdrType::RtlSdr,
                index,
                name: caps[2].trim().trim_end_matches(',').to_string(),
                serial: caps
                    .get(3)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                driver: "rtlsdr".to_string(),
                capabilities: SdrType::RtlSdr.capabilities(),
            });
        }
    }

    if devices.is_empty() {
        if let Some(caps) = RTL_FOUND_RE.captures(output) {
            let count: u32 = caps[1].parse().unwrap_or(0);
            for i in 0..count {
                devices.push(SdrDevice {
                    sdr_type: SdrType::RtlSdr,
                    index: i,
                    name: format!("RTL-SDR Device {i}"),
                    serial: "Unknown".to_string(),
                    driver: "rtlsdr".to_string(),
                    capabilities: SdrType::RtlSdr.capabilities(),
                });
            }
        }
    }

    devices
}

static HACKRF_SERIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Serial number:\s*(\S+)").unwrap());

/// Parse `hackrf_info` output into HackRF devices.
pub fn parse_hackrf_info(output: &str) -> Vec<SdrDevice> {
    let mut devices: Vec<SdrDevice> = HACKRF_SERIAL_RE
        .captures_iter(output)
        .enumerate()
        .map(|(i, caps)| SdrDevice {
            sdr_type: SdrType::Hackrf,
            index: i as u32,
            name: "HackRF One".to_string(),
            serial: caps[1].to_string(),
            driver: "hackrf".to_string(),
            capabilities: SdrType::Hackrf.capabilities(),
        })
        .collect();

    if devices.is_empty() && output.contains("Found HackRF") {
        devices.push(SdrDevice {
            sdr_type: SdrType::Hackrf,
            index: 0,
            name: "HackRF One".to_string(),
            serial: "Unknown".to_string(),
            driver: "hackrf".to_string(),
            capabilities: SdrType::Hackrf.capabilities(),
        });
    }

    devices
}

/// Parse `SoapySDRUtil --find` output.
///
/// Blocks start with `Found device` and carry `key = value` lines.
/// RTL-SDR entries are skipped (native detection is preferred); each
/// remaining family gets its own index sequence.
pub fn parse_soapy_find(output: &str) -> Vec<SdrDevice> {
    let mut devices = Vec::new();
    let mut counts: std::collections::HashMap<SdrType, u32> = std::collections::HashMap::new();
    let mut current: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    let mut flush =
        |current: &mut std::collections::HashMap<String, String>,
         devices: &mut Vec<SdrDevice>,
         counts: &mut std::collections::HashMap<SdrType, u32>| {
            let Some(driver) = current.get("driver").cloned() else {
                current.clear();
                return;
            };
            if let Some(sdr_type) = SdrType::from_soapy_driver(&driver) {
                if sdr_type != SdrType::RtlSdr {
                    let index = counts.entry(sdr_type).or_insert(0);
                    devices.push(SdrDevice {
                        sdr_type,
                        index: *index,
                        name: current
                            .get("label")
                            .or_else(|| current.get("driver"))
                            .cloned()
                            .unwrap_or_else(|| "Unknown".to_string()),
                        serial: current
                            .get("serial")
                            .cloned()
                            .unwrap_or_else(|| "N/A".to_string()),
                        driver: driver.to_ascii_lowercase(),
                        capabilities: sdr_type.capabilities(),
                    });
                    *index += 1;
                }
            }
            current.clear();
        };

    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("Found device") {
            flush(&mut current, &mut devices, &mut counts);
            continue;
        }
        if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    flush(&mut current, &mut devices, &mut counts);

    devices
}

/// The JSON-output dialect an acarsdec build speaks.
///
/// Three forks are in circulation: TLeconte v4+ takes `-j`, TLeconte
/// v3.x takes `-o 4`, and the f00b4r0 (DragonOS) fork takes
/// `--output json:file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcarsdecDialect {
    JFlag,
    OFlag,
    OutputFlag,
}

impl AcarsdecDialect {
    /// Arguments that select JSON-on-stdout for this dialect.
    pub fn json_args(self) -> Vec<String> {
        match self {
            AcarsdecDialect::JFlag => vec!["-j".to_string()],
            AcarsdecDialect::OFlag => vec!["-o".to_string(), "4".to_string()],
            AcarsdecDialect::OutputFlag => {
                vec!["--output".to_string(), "json:file".to_string()]
            }
        }
    }
}

static ACARSDEC_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)acarsdec[^\d]*v?(\d+)\.(\d+)").unwrap());

/// Detect the acarsdec fork from its no-argument usage output.
/// Defaults to the modern TLeconte `-j` dialect when nothing matches.
pub fn detect_acarsdec_dialect(help_output: &str) -> AcarsdecDialect {
    if help_output.contains("--output") || help_output.to_lowercase().contains("json:file:") {
        return AcarsdecDialect::OutputFlag;
    }
    if let Some(caps) = ACARSDEC_VERSION_RE.captures(help_output) {
        let major: u32 = caps[1].parse().unwrap_or(4);
        return if major >= 4 {
            AcarsdecDialect::JFlag
        } else {
            AcarsdecDialect::OFlag
        };
    }
    AcarsdecDialect::JFlag
}

/// How a tool addresses the SDR device on its command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFlag {
    /// `-r <index>` (acarsdec native RTL).
    RFlag,
    /// `-d <index>` (rtl_fm and friends).
    DFlag,
    /// SoapySDR device string (`driver=lime,serial=...`).
    Soapy,
}

/// SoapySDR device selection string for a detected device.
pub fn soapy_device_string(device: &SdrDevice) -> String {
    if device.serial.is_empty() || device.serial == "N/A" || device.serial == "Unknown" {
        format!("driver={}", device.driver)
    } else {
        format!("driver={},serial={}", device.driver, device.serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rtl_test_device_lines() {
        let output = "\
Found 2 device(s):
  0:  Realtek, RTL2838UHIDIR, SN: 00000001
  1:  Nooelec, NESDR SMArt v5, SN: 00000002

Using device 0: Generic RTL2832U OEM";
        let devices = parse_rtl_test(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].name, "Realtek, RTL2838UHIDIR");
        assert_eq!(devices[0].serial, "00000001");
        assert_eq!(devices[1].index, 1);
        assert!(!devices[0].capabilities.tx_capable);
    }

    #[test]
    fn falls_back_to_found_count() {
        let devices = parse_rtl_test("Found 1 device(s):\nusb_open error -3\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "RTL-SDR Device 0");
        assert_eq!(devices[0].serial, "Unknown");
    }

    #[test]
    fn no_devices_in_garbage() {
        assert!(parse_rtl_test("No supported devices found.").is_empty());
    }

    #[test]
    fn parses_hackrf_serials() {
        let output = "\
hackrf_info version: 2023.01.1
Found HackRF
Index: 0
Serial number: 0000000000000000457863c82f2d5a5f
";
        let devices = parse_hackrf_info(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "0000000000000000457863c82f2d5a5f");
        assert!(devices[0].capabilities.tx_capable);
    }

    #[test]
    fn hackrf_without_serial_still_detected() {
        let devices = parse_hackrf_info("Found HackRF\nboard_id: 2\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "Unknown");
    }

    #[test]
    fn parses_soapy_blocks_and_skips_rtlsdr() {
        let output = "\
Found device 0
  driver = lime
  label = LimeSDR Mini [USB 3.0] 0009060B00123456
  serial = 0009060B00123456

Found device 1
  driver = rtlsdr
  label = Generic RTL2832U
";
        let devices = parse_soapy_find(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].sdr_type, SdrType::LimeSdr);
        assert_eq!(devices[0].serial, "0009060B00123456");
        assert_eq!(
            soapy_device_string(&devices[0]),
            "driver=lime,serial=0009060B00123456"
        );
    }

    #[test]
    fn acarsdec_fork_detection() {
        assert_eq!(
            detect_acarsdec_dialect("Acarsdec/acarsserv 3.7 Copyright (c) 2022"),
            AcarsdecDialect::OFlag
        );
        assert_eq!(
            detect_acarsdec_dialect("Acarsdec v4.3.1\nUsage: acarsdec [-j]"),
            AcarsdecDialect::JFlag
        );
        assert_eq!(
            detect_acarsdec_dialect("usage: acarsdec [--output FORMAT:DESTINATION[:PARAMS]]"),
            AcarsdecDialect::OutputFlag
        );
        // Unknown output defaults to the modern dialect.
        assert_eq!(detect_acarsdec_dialect(""), AcarsdecDialect::JFlag);
    }

    #[test]
    fn dialect_json_args() {
        assert_eq!(AcarsdecDialect::JFlag.json_args(), vec!["-j"]);
        assert_eq!(AcarsdecDialect::OFlag.json_args(), vec!["-o", "4"]);
        assert_eq!(
            AcarsdecDialect::OutputFlag.json_args(),
            vec!["--output", "json:file"]
        );
    }

    #[test]
    fn sdr_type_strings() {
        assert_eq!(SdrType::RtlSdr.to_string(), "rtl_sdr");
        assert_eq!(SdrType::Hackrf.to_string(), "hackrf");
        assert_eq!("rtl_sdr".parse::<SdrType>().unwrap(), SdrType::RtlSdr);
    }
}
