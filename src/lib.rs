//! Onboard-ESP32 WiFi provisioning library.
//!
//! Gets a headless device onto a WiFi network through two concurrent
//! channels: the Improv serial protocol and a captive portal served from the
//! device's own access point. Everything except the ESP32 driver and NVS
//! backend is platform-independent and tested on the host.

pub mod clock;
pub mod config;
pub mod improv;
pub mod orchestrator;
pub mod portal;
pub mod serial;
pub mod storage;
pub mod wifi;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, Credential, DeviceIdentity, ProvisioningConfig};
pub use improv::{ImprovEngine, ImprovPacket, PacketError};
pub use orchestrator::{OrchestratorState, ProvisioningOrchestrator};
pub use portal::{CaptivePortal, DnsResponder};
pub use serial::{MemorySerial, SerialTransport, StdioSerial};
pub use storage::{CredentialStore, MemoryRecordStore, RecordStore};
pub use wifi::{WifiDriver, WifiError, WifiStatus};
