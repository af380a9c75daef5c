//! WiFi provisioning binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin onboard`
//! - **ESP32**: `cargo espflash flash --bin onboard --features esp32 --release`
//!
//! On boot the device tries stored credentials. Without working credentials
//! it raises an open access point with a captive portal and listens for
//! Improv packets on the serial console until either channel succeeds.
//!
//! ## Endpoints (while provisioning)
//!
//! - Setup page: http://192.168.4.1/setup
//! - DNS: every A query answers with the access point address
//!
//! On host, the ports default to 53/80 and need privileges; override them
//! with `ONBOARD_DNS_PORT` / `ONBOARD_HTTP_PORT`. `ONBOARD_MAC` sets the
//! simulated station MAC.

use log::{error, info, warn};
use onboard_esp32::clock::SystemClock;
use onboard_esp32::config::ProvisioningConfig;
use onboard_esp32::serial::{MemorySerial, SerialTransport, StdioSerial};
use onboard_esp32::storage::{CredentialStore, MemoryRecordStore, RecordStore};
use onboard_esp32::{OrchestratorState, ProvisioningOrchestrator};
use tokio_util::sync::CancellationToken;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Open the persistent credential backend, falling back to memory so
/// provisioning still works (without persistence) when flash is unusable.
#[cfg(feature = "esp32")]
fn open_record_store(
    partition: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
) -> Box<dyn RecordStore> {
    use onboard_esp32::storage::{NvsRecordStore, CREDENTIAL_NAMESPACE};

    let opened = match partition {
        Some(partition) => NvsRecordStore::open(partition, CREDENTIAL_NAMESPACE),
        None => NvsRecordStore::open_default(CREDENTIAL_NAMESPACE),
    };
    match opened {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!("NVS unavailable ({}), credentials will not persist", e);
            Box::new(MemoryRecordStore::new())
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn open_record_store() -> Box<dyn RecordStore> {
    use onboard_esp32::storage::{FileRecordStore, CREDENTIAL_NAMESPACE};

    match FileRecordStore::open_default(CREDENTIAL_NAMESPACE) {
        Ok(store) => {
            info!("Credentials stored under {}", store.dir().display());
            Box::new(store)
        }
        Err(e) => {
            warn!("File storage unavailable ({}), credentials will not persist", e);
            Box::new(MemoryRecordStore::new())
        }
    }
}

fn open_serial() -> Box<dyn SerialTransport> {
    match StdioSerial::spawn() {
        Ok(serial) => Box::new(serial),
        Err(e) => {
            warn!("Serial console unavailable ({}), Improv disabled", e);
            Box::new(MemorySerial::new())
        }
    }
}

fn load_config() -> Option<ProvisioningConfig> {
    let config = ProvisioningConfig::from_env();
    match config.validate() {
        Ok(()) => Some(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            None
        }
    }
}

/// Run the provisioning loop on a blocking thread and wait for it.
async fn provision<W>(
    orchestrator: ProvisioningOrchestrator<W, SystemClock>,
    cancel: CancellationToken,
) -> Option<ProvisioningOrchestrator<W, SystemClock>>
where
    W: onboard_esp32::WifiDriver + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let mut orchestrator = orchestrator;
        orchestrator.boot();
        orchestrator.run(&cancel);
        orchestrator
    });

    match task.await {
        Ok(orchestrator) => Some(orchestrator),
        Err(e) => {
            error!("Provisioning task failed: {}", e);
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== Onboard provisioning starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    let Some(config) = load_config() else {
        return;
    };

    #[cfg(feature = "esp32")]
    let (wifi, store) = {
        use esp_idf_hal::peripherals::Peripherals;
        use esp_idf_svc::eventloop::EspSystemEventLoop;
        use esp_idf_svc::nvs::EspDefaultNvsPartition;
        use onboard_esp32::wifi::EspWifiDriver;

        let peripherals = match Peripherals::take() {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to take peripherals: {}", e);
                return;
            }
        };
        let sysloop = match EspSystemEventLoop::take() {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to take system event loop: {}", e);
                return;
            }
        };
        let nvs = EspDefaultNvsPartition::take()
            .map_err(|e| warn!("NVS partition unavailable: {}", e))
            .ok();

        let store = CredentialStore::new(open_record_store(nvs.clone()));
        let wifi = match EspWifiDriver::new(peripherals.modem, sysloop, nvs) {
            Ok(wifi) => wifi,
            Err(e) => {
                error!("Failed to initialize WiFi: {}", e);
                return;
            }
        };
        (wifi, store)
    };

    #[cfg(not(feature = "esp32"))]
    let (wifi, store) = {
        use onboard_esp32::wifi::{parse_mac, HostWifi};

        let mac = match std::env::var("ONBOARD_MAC") {
            Ok(raw) => parse_mac(&raw).unwrap_or_else(|| {
                warn!("Ignoring ONBOARD_MAC: cannot parse {:?}", raw);
                HostWifi::DEFAULT_MAC
            }),
            Err(_) => HostWifi::DEFAULT_MAC,
        };
        (HostWifi::new(mac), CredentialStore::new(open_record_store()))
    };

    let orchestrator =
        ProvisioningOrchestrator::new(config, wifi, store, open_serial(), SystemClock);

    let cancel = CancellationToken::new();

    #[cfg(not(target_os = "espidf"))]
    {
        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, shutting down");
                ctrl_c_cancel.cancel();
            }
        });
    }

    let Some(orchestrator) = provision(orchestrator, cancel).await else {
        return;
    };

    match (orchestrator.state(), orchestrator.ip()) {
        (OrchestratorState::Connected, Some(ip)) => {
            info!("=== Provisioned, station address {} ===", ip);
        }
        (state, _) => {
            info!("Provisioning stopped in state {:?}", state);
            return;
        }
    }

    // The application proper would start here; keep the radio joined.
    #[cfg(feature = "esp32")]
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
