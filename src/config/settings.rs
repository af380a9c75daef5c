//! Provisioning settings.
//!
//! [`ProvisioningConfig`] gathers the device identity, access point
//! addressing, ports and every timeout used by the provisioning loop. The
//! defaults match the device behaviour; host builds may override individual
//! values from `ONBOARD_*` environment variables.

use super::ConfigError;
use log::warn;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Default access point address (also gateway and DNS server).
pub const DEFAULT_AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Default access point subnet prefix length.
pub const DEFAULT_AP_PREFIX_LEN: u8 = 24;

/// Standard DNS port.
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Standard HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Budget for connecting with stored credentials at boot.
pub const BOOT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for a connection attempt started over the serial protocol.
pub const IMPROV_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between connection status checks.
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Longest a single serial read may block the loop.
pub const SERIAL_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifetime of one serial listening session.
pub const SERIAL_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest SSID prefix that still leaves room for `-XXXX` within 32 bytes.
const MAX_NAME_PREFIX_LEN: usize = 27;

/// Firmware and hardware identity reported to provisioning clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Firmware name.
    pub firmware_name: String,
    /// Firmware version.
    pub firmware_version: String,
    /// Chip identifier.
    pub chip: String,
    /// Prefix for the device name and access point SSID.
    pub name_prefix: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            firmware_name: "Onboard".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            chip: default_chip().to_string(),
            name_prefix: "Onboard".to_string(),
        }
    }
}

impl DeviceIdentity {
    /// Device name derived from the hardware MAC address.
    ///
    /// Rendered as `<prefix>-<last two MAC bytes as 4 uppercase hex chars>`.
    pub fn device_name(&self, mac: [u8; 6]) -> String {
        format!("{}-{:02X}{:02X}", self.name_prefix, mac[4], mac[5])
    }

    /// Hostname used for `<hostname>.local` links.
    pub fn hostname(&self, mac: [u8; 6]) -> String {
        self.device_name(mac).to_lowercase()
    }
}

#[cfg(feature = "esp32")]
fn default_chip() -> &'static str {
    "ESP32"
}

#[cfg(not(feature = "esp32"))]
fn default_chip() -> &'static str {
    "host"
}

/// Settings for the whole provisioning subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Identity reported over the serial protocol.
    pub device: DeviceIdentity,
    /// Access point address; also the gateway and the forged DNS answer.
    pub ap_ip: Ipv4Addr,
    /// Access point subnet prefix length.
    pub ap_prefix_len: u8,
    /// UDP port of the DNS responder.
    pub dns_port: u16,
    /// TCP port of the portal HTTP server (`None` disables it).
    pub http_port: Option<u16>,
    /// Connection budget with stored credentials at boot.
    pub boot_connect_timeout: Duration,
    /// Connection budget for portal-submitted credentials.
    pub portal_connect_timeout: Duration,
    /// Connection budget for serial-submitted credentials.
    pub improv_connect_timeout: Duration,
    /// Interval between connection status checks.
    pub connect_poll_interval: Duration,
    /// Maximum time one serial read may block.
    pub serial_poll_timeout: Duration,
    /// Lifetime of a serial listening session.
    pub serial_session_timeout: Duration,
    /// Pause between loop iterations when no transport blocked.
    pub tick_interval: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            device: DeviceIdentity::default(),
            ap_ip: DEFAULT_AP_IP,
            ap_prefix_len: DEFAULT_AP_PREFIX_LEN,
            dns_port: DEFAULT_DNS_PORT,
            http_port: Some(DEFAULT_HTTP_PORT),
            boot_connect_timeout: BOOT_CONNECT_TIMEOUT,
            portal_connect_timeout: BOOT_CONNECT_TIMEOUT,
            improv_connect_timeout: IMPROV_CONNECT_TIMEOUT,
            connect_poll_interval: CONNECT_POLL_INTERVAL,
            serial_poll_timeout: SERIAL_POLL_TIMEOUT,
            serial_session_timeout: SERIAL_SESSION_TIMEOUT,
            tick_interval: Duration::from_millis(20),
        }
    }
}

impl ProvisioningConfig {
    /// Defaults with overrides from `ONBOARD_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `ONBOARD_AP_IP` | `ap_ip` |
    /// | `ONBOARD_DNS_PORT` | `dns_port` |
    /// | `ONBOARD_HTTP_PORT` | `http_port` (`0` disables) |
    /// | `ONBOARD_SESSION_SECS` | `serial_session_timeout` |
    /// | `ONBOARD_NAME_PREFIX` | `device.name_prefix` |
    /// | `ONBOARD_CHIP` | `device.chip` |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ip) = env_value("ONBOARD_AP_IP") {
            config.ap_ip = ip;
        }
        if let Some(port) = env_value("ONBOARD_DNS_PORT") {
            config.dns_port = port;
        }
        if let Some(port) = env_value::<u16>("ONBOARD_HTTP_PORT") {
            config.http_port = (port != 0).then_some(port);
        }
        if let Some(secs) = env_value("ONBOARD_SESSION_SECS") {
            config.serial_session_timeout = Duration::from_secs(secs);
        }
        if let Some(prefix) = env_value("ONBOARD_NAME_PREFIX") {
            config.device.name_prefix = prefix;
        }
        if let Some(chip) = env_value("ONBOARD_CHIP") {
            config.device.chip = chip;
        }
        config
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name_prefix.is_empty() {
            return Err(ConfigError::InvalidSetting("name_prefix must not be empty"));
        }
        if self.device.name_prefix.len() > MAX_NAME_PREFIX_LEN {
            return Err(ConfigError::InvalidSetting(
                "name_prefix must leave room for the MAC suffix in a 32-byte SSID",
            ));
        }
        if self.ap_prefix_len == 0 || self.ap_prefix_len > 30 {
            return Err(ConfigError::InvalidSetting("ap_prefix_len must be 1..=30"));
        }
        if self.connect_poll_interval.is_zero() {
            return Err(ConfigError::InvalidSetting("connect_poll_interval must be > 0"));
        }
        for timeout in [
            self.boot_connect_timeout,
            self.portal_connect_timeout,
            self.improv_connect_timeout,
        ] {
            if timeout < self.connect_poll_interval {
                return Err(ConfigError::InvalidSetting(
                    "connect timeouts must be >= connect_poll_interval",
                ));
            }
        }
        if self.serial_session_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting("serial_session_timeout must be > 0"));
        }
        Ok(())
    }

    /// Access point netmask derived from the prefix length.
    pub fn ap_netmask(&self) -> Ipv4Addr {
        let bits = u32::MAX
            .checked_shl(32 - u32::from(self.ap_prefix_len))
            .unwrap_or(0);
        Ipv4Addr::from(bits)
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}: cannot parse {:?}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x24, 0x6F, 0x28, 0x01, 0xAB, 0x0C];

    #[test]
    fn test_defaults_are_valid() {
        let config = ProvisioningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ap_ip, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(config.dns_port, 53);
        assert_eq!(config.serial_poll_timeout, Duration::from_millis(100));
        assert_eq!(config.serial_session_timeout, Duration::from_secs(30));
        assert_eq!(config.improv_connect_timeout, Duration::from_secs(10));
        assert_eq!(config.boot_connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_device_name_from_mac() {
        let device = DeviceIdentity::default();
        assert_eq!(device.device_name(MAC), "Onboard-AB0C");
        assert_eq!(device.hostname(MAC), "onboard-ab0c");
    }

    #[test]
    fn test_device_name_is_deterministic() {
        let device = DeviceIdentity {
            name_prefix: "Sensor".to_string(),
            ..Default::default()
        };
        assert_eq!(device.device_name(MAC), device.device_name(MAC));
        assert_eq!(device.device_name([0; 6]), "Sensor-0000");
    }

    #[test]
    fn test_netmask() {
        let mut config = ProvisioningConfig::default();
        assert_eq!(config.ap_netmask(), Ipv4Addr::new(255, 255, 255, 0));
        config.ap_prefix_len = 16;
        assert_eq!(config.ap_netmask(), Ipv4Addr::new(255, 255, 0, 0));
    }

    #[test]
    fn test_validate_rejects_long_prefix() {
        let mut config = ProvisioningConfig::default();
        config.device.name_prefix = "x".repeat(28);
        assert!(config.validate().is_err());
        config.device.name_prefix = "x".repeat(27);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let config = ProvisioningConfig {
            connect_poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidSetting("connect_poll_interval must be > 0"))
        );
    }

    #[test]
    fn test_validate_rejects_timeout_below_poll_interval() {
        let config = ProvisioningConfig {
            improv_connect_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
