//! Scripted WiFi driver for unit tests.

use super::{AccessPointConfig, ScanResult, WifiDriver, WifiError};
use crate::clock::{Clock, ManualClock};
use crate::config::Credential;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Driver whose connection attempts complete after a fixed delay on a
/// [`ManualClock`], or never.
pub(crate) struct MockWifi {
    clock: Arc<ManualClock>,
    connect_delay: Option<Duration>,
    rejected: Vec<String>,
    passphrases: Vec<(String, String)>,
    attempt: Option<(Credential, Instant)>,
    scan_results: Vec<ScanResult>,
    access_point: Option<AccessPointConfig>,
    fail_access_point: bool,
    connect_attempts: u32,
    disconnects: u32,
    scans: u32,
    ap_starts: u32,
}

impl MockWifi {
    pub(crate) const IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    pub(crate) const MAC: [u8; 6] = [0x24, 0x6F, 0x28, 0x01, 0xAB, 0x0C];

    fn with_delay(clock: Arc<ManualClock>, connect_delay: Option<Duration>) -> Self {
        Self {
            clock,
            connect_delay,
            rejected: Vec::new(),
            passphrases: Vec::new(),
            attempt: None,
            scan_results: Vec::new(),
            access_point: None,
            fail_access_point: false,
            connect_attempts: 0,
            disconnects: 0,
            scans: 0,
            ap_starts: 0,
        }
    }

    /// Attempts succeed `delay` after they start.
    pub(crate) fn connects_after(clock: Arc<ManualClock>, delay: Duration) -> Self {
        Self::with_delay(clock, Some(delay))
    }

    /// Attempts never complete.
    pub(crate) fn never_connects(clock: Arc<ManualClock>) -> Self {
        Self::with_delay(clock, None)
    }

    /// Attempts on `ssid` never complete.
    pub(crate) fn rejecting(mut self, ssid: &str) -> Self {
        self.reject(ssid);
        self
    }

    /// Attempts on `ssid` only complete with `passphrase`.
    pub(crate) fn requiring(mut self, ssid: &str, passphrase: &str) -> Self {
        self.passphrases.push((ssid.to_string(), passphrase.to_string()));
        self
    }

    /// From now on, attempts on `ssid` never complete.
    pub(crate) fn reject(&mut self, ssid: &str) {
        self.rejected.push(ssid.to_string());
    }

    fn accepts(&self, credential: &Credential) -> bool {
        !self.rejected.contains(&credential.ssid)
            && self
                .passphrases
                .iter()
                .filter(|(ssid, _)| *ssid == credential.ssid)
                .all(|(_, passphrase)| *passphrase == credential.passphrase)
    }

    pub(crate) fn with_networks(mut self, networks: Vec<ScanResult>) -> Self {
        self.scan_results = networks;
        self
    }

    pub(crate) fn failing_access_point(mut self) -> Self {
        self.fail_access_point = true;
        self
    }

    pub(crate) fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub(crate) fn disconnects(&self) -> u32 {
        self.disconnects
    }

    pub(crate) fn scans(&self) -> u32 {
        self.scans
    }

    pub(crate) fn ap_starts(&self) -> u32 {
        self.ap_starts
    }

    pub(crate) fn access_point(&self) -> Option<&AccessPointConfig> {
        self.access_point.as_ref()
    }
}

impl WifiDriver for MockWifi {
    fn mac_address(&self) -> [u8; 6] {
        Self::MAC
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, WifiError> {
        self.scans += 1;
        Ok(self.scan_results.clone())
    }

    fn begin_connect(&mut self, credential: &Credential) -> Result<(), WifiError> {
        self.connect_attempts += 1;
        self.attempt = Some((credential.clone(), self.clock.now()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        match (&self.attempt, self.connect_delay) {
            (Some((credential, started)), Some(delay)) => {
                self.accepts(credential) && self.clock.now() >= *started + delay
            }
            _ => false,
        }
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        self.is_connected().then_some(Self::IP)
    }

    fn connected_ssid(&self) -> Option<String> {
        if self.is_connected() {
            self.attempt.as_ref().map(|(c, _)| c.ssid.clone())
        } else {
            None
        }
    }

    fn rssi(&self) -> Option<i8> {
        self.is_connected().then_some(-55)
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        self.disconnects += 1;
        self.attempt = None;
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
        if self.fail_access_point {
            return Err(WifiError::Driver("access point refused".into()));
        }
        self.ap_starts += 1;
        self.access_point = Some(config.clone());
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), WifiError> {
        self.access_point = None;
        Ok(())
    }

    fn access_point_active(&self) -> bool {
        self.access_point.is_some()
    }
}
