//! ESP-IDF WiFi driver.
//!
//! Wraps the non-blocking `EspWifi` driver. The radio runs in mixed mode
//! while the captive portal is up so the station can try submitted
//! credentials without dropping the access point.

use super::{AccessPointConfig, ScanResult, WifiDriver, WifiError};
use crate::config::Credential;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::ipv4::{self, Mask, RouterConfiguration, Subnet};
use esp_idf_svc::netif::{EspNetif, NetifConfiguration, NetifStack};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{info, warn};
use std::net::Ipv4Addr;

/// Maximum number of portal clients on the access point.
const AP_MAX_CONNECTIONS: u16 = 4;

/// Channel used for the access point.
const AP_CHANNEL: u8 = 1;

/// WiFi driver for ESP32.
pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    access_point: Option<AccessPointConfiguration>,
    joined_ssid: Option<String>,
}

impl EspWifiDriver {
    /// Create and start the driver in station mode.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, WifiError> {
        let mut wifi = EspWifi::new(modem, sysloop, nvs)?;
        let client = ClientConfiguration::default();
        wifi.set_configuration(&Configuration::Client(client.clone()))?;
        wifi.start()?;

        Ok(Self {
            wifi,
            client,
            access_point: None,
            joined_ssid: None,
        })
    }

    fn apply_configuration(&mut self) -> Result<(), WifiError> {
        let configuration = match &self.access_point {
            Some(ap) => Configuration::Mixed(self.client.clone(), ap.clone()),
            None => Configuration::Client(self.client.clone()),
        };
        self.wifi.set_configuration(&configuration)?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl WifiDriver for EspWifiDriver {
    fn mac_address(&self) -> [u8; 6] {
        self.wifi.sta_netif().get_mac().unwrap_or([0; 6])
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, WifiError> {
        let aps = self
            .wifi
            .scan()
            .map_err(|e| WifiError::ScanFailed(format!("{:?}", e)))?;
        Ok(aps
            .into_iter()
            .map(|ap| ScanResult {
                ssid: ap.ssid.as_str().to_string(),
                rssi: ap.signal_strength,
                secure: !matches!(ap.auth_method, None | Some(AuthMethod::None)),
            })
            .collect())
    }

    fn begin_connect(&mut self, credential: &Credential) -> Result<(), WifiError> {
        let auth_method = if credential.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        self.client = ClientConfiguration {
            ssid: credential
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            password: credential
                .passphrase
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        };
        self.apply_configuration()?;

        self.wifi.connect()?;
        self.joined_ssid = Some(credential.ssid.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.ip_addr().is_some()
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        let info = self.wifi.sta_netif().get_ip_info().ok()?;
        let ip: Ipv4Addr = format!("{}", info.ip).parse().ok()?;
        (!ip.is_unspecified()).then_some(ip)
    }

    fn connected_ssid(&self) -> Option<String> {
        if self.wifi.is_connected().unwrap_or(false) {
            self.joined_ssid.clone()
        } else {
            None
        }
    }

    fn rssi(&self) -> Option<i8> {
        let mut info = esp_idf_sys::wifi_ap_record_t::default();
        // SAFETY: `info` is a valid out-pointer for the duration of the call.
        let result = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut info) };
        (result == esp_idf_sys::ESP_OK).then_some(info.rssi)
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        self.joined_ssid = None;
        if self.wifi.is_connected().unwrap_or(false) {
            info!("Disconnecting from WiFi");
        }
        // Aborting a pending attempt reports an error when nothing is pending
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi disconnect: {:?}", e);
        }
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
        // Router netif whose DHCP server hands out the gateway as DNS
        let netif = EspNetif::new_with_conf(&NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: config.ip,
                    mask: Mask(config.prefix_len),
                },
                dhcp_enabled: true,
                dns: Some(config.ip),
                secondary_dns: None,
            })),
            stack: NetifStack::Ap,
            ..NetifConfiguration::wifi_default_router()
        })?;
        self.wifi.swap_netif_ap(netif)?;

        self.access_point = Some(AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            auth_method: AuthMethod::None,
            channel: AP_CHANNEL,
            max_connections: AP_MAX_CONNECTIONS,
            ..Default::default()
        });
        self.apply_configuration()?;

        info!("Access point {:?} up at {}", config.ssid, config.ip);
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), WifiError> {
        if self.access_point.take().is_some() {
            self.apply_configuration()?;
            info!("Access point stopped");
        }
        Ok(())
    }

    fn access_point_active(&self) -> bool {
        self.access_point.is_some()
    }
}
