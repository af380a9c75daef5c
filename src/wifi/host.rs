//! Host WiFi simulation.
//!
//! On host systems the OS owns networking. This driver pretends to join
//! whatever network it is asked to and reports the machine's primary local
//! address, which is enough to exercise the full provisioning flow.

use super::{AccessPointConfig, ScanResult, WifiDriver, WifiError};
use crate::config::Credential;
use log::info;
use std::net::{IpAddr, Ipv4Addr};

/// Simulated radio for host runs.
pub struct HostWifi {
    mac: [u8; 6],
    networks: Vec<ScanResult>,
    joined: Option<(String, Ipv4Addr)>,
    access_point: Option<AccessPointConfig>,
}

impl HostWifi {
    /// Locally administered MAC used when none is configured.
    pub const DEFAULT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

    /// Create a driver reporting `mac` as the station address.
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            networks: Vec::new(),
            joined: None,
            access_point: None,
        }
    }

    /// Networks returned by every scan.
    pub fn with_networks(mut self, networks: Vec<ScanResult>) -> Self {
        self.networks = networks;
        self
    }

    /// Get the primary local IPv4 address.
    ///
    /// Creates a UDP socket and "connects" it to a public IP (nothing is
    /// sent), then reads back which local address the OS picked.
    fn detect_local_ip() -> Option<Ipv4Addr> {
        use std::net::UdpSocket;

        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

impl Default for HostWifi {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAC)
    }
}

impl WifiDriver for HostWifi {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, WifiError> {
        Ok(self.networks.clone())
    }

    fn begin_connect(&mut self, credential: &Credential) -> Result<(), WifiError> {
        let ip = Self::detect_local_ip().unwrap_or(Ipv4Addr::LOCALHOST);
        info!("Host network joined as {:?}, local IP: {}", credential.ssid, ip);
        self.joined = Some((credential.ssid.clone(), ip));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.joined.is_some()
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        self.joined.as_ref().map(|(_, ip)| *ip)
    }

    fn connected_ssid(&self) -> Option<String> {
        self.joined.as_ref().map(|(ssid, _)| ssid.clone())
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        self.joined = None;
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
        info!(
            "Simulated access point {:?} at {}/{}",
            config.ssid, config.ip, config.prefix_len
        );
        self.access_point = Some(config.clone());
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), WifiError> {
        if self.access_point.take().is_some() {
            info!("Simulated access point stopped");
        }
        Ok(())
    }

    fn access_point_active(&self) -> bool {
        self.access_point.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_wifi_starts_disconnected() {
        let wifi = HostWifi::default();
        assert!(!wifi.is_connected());
        assert_eq!(wifi.mac_address(), HostWifi::DEFAULT_MAC);
    }

    #[test]
    fn test_host_wifi_join_and_leave() {
        let mut wifi = HostWifi::default();
        wifi.begin_connect(&Credential::new("HomeNet", "secret123").unwrap())
            .unwrap();
        assert!(wifi.is_connected());
        assert_eq!(wifi.connected_ssid().as_deref(), Some("HomeNet"));
        // IP detection might fail in air-gapped environments; loopback is the fallback
        assert!(wifi.ip_addr().is_some());

        wifi.disconnect().unwrap();
        assert!(!wifi.is_connected());
        assert_eq!(wifi.ip_addr(), None);
    }

    #[test]
    fn test_host_wifi_access_point() {
        let mut wifi = HostWifi::default();
        let config = AccessPointConfig {
            ssid: "Onboard-000001".into(),
            ip: Ipv4Addr::new(192, 168, 4, 1),
            prefix_len: 24,
        };
        wifi.start_access_point(&config).unwrap();
        assert!(wifi.status().active);
        wifi.stop_access_point().unwrap();
        wifi.stop_access_point().unwrap();
        assert!(!wifi.access_point_active());
    }
}
