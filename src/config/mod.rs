//! Provisioning configuration.
//!
//! # Components
//!
//! - `credential` - WiFi credential pair and its persisted layout
//! - `settings` - Device identity, addressing and timing settings

mod credential;
mod settings;

pub use credential::{ConfigError, Credential, MAX_PASSPHRASE_LEN, MAX_SSID_LEN};
pub use settings::{
    DeviceIdentity, ProvisioningConfig, BOOT_CONNECT_TIMEOUT, CONNECT_POLL_INTERVAL,
    DEFAULT_AP_IP, DEFAULT_DNS_PORT, DEFAULT_HTTP_PORT, IMPROV_CONNECT_TIMEOUT,
    SERIAL_POLL_TIMEOUT, SERIAL_SESSION_TIMEOUT,
};
