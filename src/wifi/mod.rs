//! WiFi radio abstraction.
//!
//! This module provides the [`WifiDriver`] trait over the radio primitives
//! (scan, connect, access point on/off) and the bounded connection helper
//! shared by every provisioning transport.
//!
//! # Components
//!
//! - [`HostWifi`] - simulated radio for host runs
//! - `EspWifiDriver` - ESP-IDF WiFi driver wrapper (ESP32 only)

mod host;
#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "esp32")]
mod esp;

pub use host::HostWifi;

#[cfg(feature = "esp32")]
pub use esp::EspWifiDriver;

use crate::clock::Clock;
use crate::config::Credential;
use log::{info, warn};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// One network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i8,
    /// Whether the network requires a passphrase.
    pub secure: bool,
}

/// Access point settings used while the captive portal is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    /// Broadcast SSID.
    pub ssid: String,
    /// Device address on the access point network.
    pub ip: Ipv4Addr,
    /// Subnet prefix length.
    pub prefix_len: u8,
}

/// Snapshot of the station interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiStatus {
    /// Access point mode is up.
    pub active: bool,
    /// Station is associated and has an address.
    pub connected: bool,
    /// SSID of the joined network.
    pub ssid: Option<String>,
    /// Station address.
    pub ip: Option<Ipv4Addr>,
    /// Signal strength of the joined network in dBm.
    pub rssi: Option<i8>,
}

/// Radio primitives used by the provisioning subsystem.
///
/// Implementations must not block for long in any method except `scan`;
/// connection progress is observed by polling [`WifiDriver::is_connected`].
pub trait WifiDriver: Send {
    /// Station MAC address.
    fn mac_address(&self) -> [u8; 6];

    /// Scan for nearby networks.
    fn scan(&mut self) -> Result<Vec<ScanResult>, WifiError>;

    /// Start joining a network. Returns once the attempt is under way.
    fn begin_connect(&mut self, credential: &Credential) -> Result<(), WifiError>;

    /// Station is associated and has an IPv4 address.
    fn is_connected(&self) -> bool;

    /// Station address, if any.
    fn ip_addr(&self) -> Option<Ipv4Addr>;

    /// SSID of the network the station is joined to.
    fn connected_ssid(&self) -> Option<String>;

    /// Signal strength of the joined network.
    fn rssi(&self) -> Option<i8> {
        None
    }

    /// Leave the current network or abort a pending attempt.
    fn disconnect(&mut self) -> Result<(), WifiError>;

    /// Bring up the access point.
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError>;

    /// Take the access point down. Succeeds when it is already down.
    fn stop_access_point(&mut self) -> Result<(), WifiError>;

    /// Access point is currently up.
    fn access_point_active(&self) -> bool;

    /// Current interface snapshot.
    fn status(&self) -> WifiStatus {
        let connected = self.is_connected();
        WifiStatus {
            active: self.access_point_active(),
            connected,
            ssid: if connected { self.connected_ssid() } else { None },
            ip: if connected { self.ip_addr() } else { None },
            rssi: if connected { self.rssi() } else { None },
        }
    }
}

/// Errors that can occur during WiFi operations.
#[derive(Debug)]
pub enum WifiError {
    /// SSID cannot be handed to the driver.
    InvalidSsid,
    /// Passphrase cannot be handed to the driver.
    InvalidPassword,
    /// Association did not complete within the budget.
    ConnectTimeout { ssid: String, waited: Duration },
    /// Scan failed.
    ScanFailed(String),
    /// Driver-specific failure.
    Driver(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for WifiError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

impl std::fmt::Display for WifiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::ConnectTimeout { ssid, waited } => {
                write!(f, "could not join {:?} within {:?}", ssid, waited)
            }
            Self::ScanFailed(msg) => write!(f, "scan failed: {}", msg),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for WifiError {}

/// Order scan results strongest first, dropping hidden networks and
/// duplicate SSIDs (the strongest entry wins).
pub fn sort_scan_results(mut results: Vec<ScanResult>) -> Vec<ScanResult> {
    results.retain(|r| !r.ssid.is_empty());
    results.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    let mut seen = std::collections::HashSet::new();
    results.retain(|r| seen.insert(r.ssid.clone()));
    results
}

/// Poll until the station is connected or `timeout` elapses.
///
/// Status is checked every `poll_interval`; the final sleep is clipped to
/// the deadline so the wait never overruns its budget.
pub fn wait_for_connection(
    wifi: &dyn WifiDriver,
    clock: &dyn Clock,
    timeout: Duration,
    poll_interval: Duration,
) -> Option<Ipv4Addr> {
    let start = clock.now();
    let deadline = start + timeout;
    loop {
        if wifi.is_connected() {
            if let Some(ip) = wifi.ip_addr() {
                return Some(ip);
            }
        }
        let now = clock.now();
        if now >= deadline {
            return None;
        }
        clock.sleep(poll_interval.min(deadline - now));
    }
}

/// Join a network with a bounded wait.
///
/// Returns the station address. A station that is already joined is
/// disconnected first, even from the same SSID, so the passphrase is always
/// verified by a fresh association. On timeout the pending attempt is
/// aborted and the station is left down.
pub fn connect(
    wifi: &mut dyn WifiDriver,
    clock: &dyn Clock,
    credential: &Credential,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Ipv4Addr, WifiError> {
    if wifi.is_connected() {
        info!("Disconnecting from {:?}", wifi.connected_ssid());
        wifi.disconnect()?;
    }

    info!("Connecting to WiFi: {}...", credential.ssid);
    wifi.begin_connect(credential)?;

    match wait_for_connection(wifi, clock, timeout, poll_interval) {
        Some(ip) => {
            info!("WiFi connected: {}", ip);
            Ok(ip)
        }
        None => {
            warn!("Connection timeout after {:?}", timeout);
            if let Err(e) = wifi.disconnect() {
                warn!("Failed to abort connection attempt: {}", e);
            }
            Err(WifiError::ConnectTimeout {
                ssid: credential.ssid.clone(),
                waited: timeout,
            })
        }
    }
}

/// Parse a MAC address written as six colon- or dash-separated hex bytes.
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.trim().split([':', '-']);
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
