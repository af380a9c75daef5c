//! WiFi configuration utility.
//!
//! Stores WiFi credentials in the same record the provisioning flow reads at
//! boot, skipping the portal/serial step.
//!
//! Usage (ESP32, credentials baked in at compile time):
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo configure-wifi
//!
//! Usage (host, file store under `~/.onboard-esp32/`):
//!   cargo run --bin configure-wifi -- MyNetwork secret
//!   cargo run --bin configure-wifi -- --clear
//!
//! For open networks pass an empty password.

use onboard_esp32::config::Credential;
use onboard_esp32::storage::{CredentialStore, RecordStore, CREDENTIAL_NAMESPACE};

/// WiFi SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// WiFi password - set via WIFI_PASSWORD environment variable at compile time.
/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Print error message and exit. On ESP32, we pause briefly first so the
/// output reaches the serial monitor.
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    #[cfg(feature = "esp32")]
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

/// Validate and persist one credential pair.
fn store_credentials(backend: Box<dyn RecordStore>, ssid: &str, password: &str) {
    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() { "(none)" } else { "****" },
        password.len()
    );

    let credential = match Credential::new(ssid, password) {
        Ok(credential) => credential,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };

    let mut store = CredentialStore::new(backend);
    if !store.save_credential(&credential) {
        halt_with_error("Error: credentials could not be written");
    }

    println!("\n=== WiFi configuration saved ===");
    println!("Credentials persist across reboots.");
}

#[cfg(feature = "esp32")]
fn main() {
    use onboard_esp32::storage::NvsRecordStore;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== WiFi Configuration Utility ===\n");

    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => {
            halt_with_error(
                "Error: WIFI_SSID environment variable not set at compile time.\n\n\
                 Usage:\n  \
                 WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-wifi\n\n\
                 For open networks:\n  \
                 WIFI_SSID=\"OpenNetwork\" WIFI_PASSWORD=\"\" cargo configure-wifi",
            );
        }
    };
    let password = WIFI_PASSWORD.unwrap_or("");

    let backend = match NvsRecordStore::open_default(CREDENTIAL_NAMESPACE) {
        Ok(backend) => backend,
        Err(e) => halt_with_error(&format!("Error initializing NVS: {}", e)),
    };
    store_credentials(Box::new(backend), ssid, password);

    println!("\n=== Done - you can disconnect the device ===\n");

    // Brief pause to ensure serial output is visible, then exit cleanly
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    use onboard_esp32::storage::FileRecordStore;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    println!("\n=== WiFi Configuration Utility ===\n");

    let backend = match FileRecordStore::open_default(CREDENTIAL_NAMESPACE) {
        Ok(backend) => backend,
        Err(e) => halt_with_error(&format!("Error opening credential store: {}", e)),
    };
    println!("Store: {}", backend.dir().display());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [flag] if flag == "--clear" => {
            let mut store = CredentialStore::new(Box::new(backend));
            if !store.clear() {
                halt_with_error("Error: credentials could not be cleared");
            }
            println!("\n=== WiFi configuration cleared ===");
        }
        [ssid] => store_credentials(Box::new(backend), ssid, ""),
        [ssid, password] => store_credentials(Box::new(backend), ssid, password),
        [] => match std::env::var("WIFI_SSID") {
            Ok(ssid) if !ssid.is_empty() => {
                let password = std::env::var("WIFI_PASSWORD").unwrap_or_default();
                store_credentials(Box::new(backend), &ssid, &password);
            }
            _ => halt_with_error(
                "Usage:\n  \
                 configure-wifi <ssid> [password]\n  \
                 configure-wifi --clear\n  \
                 WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" configure-wifi",
            ),
        },
        _ => halt_with_error("Error: too many arguments"),
    }
}
