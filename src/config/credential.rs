//! WiFi credential type.
//!
//! This module contains the platform-independent credential pair handed
//! between the provisioning transports and the credential store.
//!
//! # Example
//!
//! ```
//! use onboard_esp32::config::Credential;
//!
//! let credential = Credential::new("HomeNet", "secret123").unwrap();
//! assert!(!credential.is_open());
//!
//! let bytes = credential.to_bytes();
//! assert_eq!(Credential::from_bytes(&bytes).unwrap(), credential);
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA2 passphrase length.
pub const MAX_PASSPHRASE_LEN: usize = 63;

/// WiFi credentials for joining an access point.
///
/// The passphrase is zeroed when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network passphrase (0-63 bytes, empty for open networks).
    pub passphrase: String,
}

impl Credential {
    /// Create a validated credential.
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Result<Self, ConfigError> {
        let credential = Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Create a credential for an open network.
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Validate field lengths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if self.passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(ConfigError::PassphraseTooLong {
                len: self.passphrase.len(),
                max: MAX_PASSPHRASE_LEN,
            });
        }
        Ok(())
    }

    /// Check if this is an open network (no passphrase).
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }

    /// Serialize to the persisted record layout.
    ///
    /// Format: `[ssid_len:1][ssid:N][passphrase_len:1][passphrase:M]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.ssid.len() + self.passphrase.len());
        bytes.push(self.ssid.len() as u8);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(self.passphrase.len() as u8);
        bytes.extend_from_slice(self.passphrase.as_bytes());
        bytes
    }

    /// Deserialize from the persisted record layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let (&ssid_len, rest) = bytes
            .split_first()
            .ok_or_else(|| ConfigError::InvalidFormat("empty record".into()))?;
        let ssid_len = ssid_len as usize;
        if rest.len() < ssid_len + 1 {
            return Err(ConfigError::InvalidFormat("truncated SSID".into()));
        }

        let ssid = std::str::from_utf8(&rest[..ssid_len])
            .map_err(|_| ConfigError::InvalidFormat("invalid SSID UTF-8".into()))?;

        let pass_len = rest[ssid_len] as usize;
        let pass_bytes = &rest[ssid_len + 1..];
        if pass_bytes.len() < pass_len {
            return Err(ConfigError::InvalidFormat("truncated passphrase".into()));
        }

        let passphrase = std::str::from_utf8(&pass_bytes[..pass_len])
            .map_err(|_| ConfigError::InvalidFormat("invalid passphrase UTF-8".into()))?;

        Self::new(ssid, passphrase)
    }
}

// Keep passphrases out of log lines.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ssid", &self.ssid)
            .field("passphrase", &"****")
            .finish()
    }
}

/// Errors that can occur while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Passphrase exceeds maximum length.
    PassphraseTooLong { len: usize, max: usize },
    /// Invalid data format during deserialization.
    InvalidFormat(String),
    /// A settings value is out of range.
    InvalidSetting(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PassphraseTooLong { len, max } => {
                write!(f, "passphrase too long: {} bytes (max {})", len, max)
            }
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            Self::InvalidSetting(msg) => write!(f, "invalid setting: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
