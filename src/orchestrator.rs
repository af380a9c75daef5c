//! Top-level provisioning state machine.
//!
//! The orchestrator decides at boot whether stored credentials work and,
//! if not, runs the captive portal and the serial listener side by side
//! until one of them delivers working credentials.
//!
//! ```text
//!  CheckCredentials ──stored──► Connecting ──ok──► Connected
//!        │                          │                  ▲
//!        │ none                     │ failed           │ either transport
//!        ▼                          ▼                  │ succeeds
//!   PortalActive / ListeningSerial ◄───────────────────┘
//! ```
//!
//! The orchestrator is the only writer of the radio mode and of the
//! credential store. The portal's HTTP thread talks to it through
//! [`PortalRequest`] messages that are drained once per [`tick`].
//!
//! [`tick`]: ProvisioningOrchestrator::tick

use crate::clock::Clock;
use crate::config::{Credential, ProvisioningConfig};
use crate::improv::{ImprovEngine, ImprovPoll, ProvisioningContext};
use crate::portal::{CaptivePortal, ConfigureResponse, PortalRequest};
use crate::serial::SerialTransport;
use crate::storage::CredentialStore;
use crate::wifi::{self, WifiDriver};
use log::{error, info, warn};
use std::net::Ipv4Addr;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where the orchestrator is in the provisioning flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Looking for stored credentials.
    CheckCredentials,
    /// Trying credentials.
    Connecting,
    /// Station is joined; provisioning transports are down.
    Connected,
    /// Captive portal is up, serial listener runs alongside.
    PortalActive,
    /// The access point could not be raised; serial only.
    ListeningSerial,
}

/// Runs the provisioning flow over a radio, a credential store, a serial
/// transport and a clock.
pub struct ProvisioningOrchestrator<W: WifiDriver, C: Clock> {
    config: ProvisioningConfig,
    wifi: W,
    store: CredentialStore,
    clock: C,
    engine: ImprovEngine,
    portal: CaptivePortal,
    state: OrchestratorState,
    ip: Option<Ipv4Addr>,
}

impl<W: WifiDriver, C: Clock> ProvisioningOrchestrator<W, C> {
    /// Assemble an orchestrator. Nothing happens until [`Self::boot`].
    pub fn new(
        config: ProvisioningConfig,
        wifi: W,
        store: CredentialStore,
        serial: Box<dyn SerialTransport>,
        clock: C,
    ) -> Self {
        let engine = ImprovEngine::new(serial, &config);
        let portal = CaptivePortal::new(&config, wifi.mac_address());
        Self {
            config,
            wifi,
            store,
            clock,
            engine,
            portal,
            state: OrchestratorState::CheckCredentials,
            ip: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Station address once connected.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    /// Radio driver.
    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    /// Credential store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Captive portal.
    pub fn portal(&self) -> &CaptivePortal {
        &self.portal
    }

    /// Serial protocol engine.
    pub fn engine(&self) -> &ImprovEngine {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn wifi_mut(&mut self) -> &mut W {
        &mut self.wifi
    }

    /// Try stored credentials, falling back to provisioning.
    ///
    /// Credentials that fail to connect within the boot budget are cleared.
    pub fn boot(&mut self) -> OrchestratorState {
        self.state = OrchestratorState::CheckCredentials;

        let Some(credential) = self.store.load() else {
            info!("WiFi not configured - starting provisioning");
            self.enter_provisioning();
            return self.state;
        };

        self.state = OrchestratorState::Connecting;
        match wifi::connect(
            &mut self.wifi,
            &self.clock,
            &credential,
            self.config.boot_connect_timeout,
            self.config.connect_poll_interval,
        ) {
            Ok(ip) => {
                self.ip = Some(ip);
                self.state = OrchestratorState::Connected;
            }
            Err(e) => {
                warn!("Stored credentials did not work: {}", e);
                self.store.clear();
                self.enter_provisioning();
            }
        }
        self.state
    }

    /// Bring up the captive portal and open a serial session.
    ///
    /// Falls back to serial only when the access point cannot be raised.
    pub fn enter_provisioning(&mut self) {
        self.ip = None;
        match self.portal.start(&mut self.wifi) {
            Ok(()) => self.state = OrchestratorState::PortalActive,
            Err(e) => {
                error!("Captive portal unavailable: {}", e);
                self.state = OrchestratorState::ListeningSerial;
            }
        }
        self.engine.start(self.clock.now());
    }

    /// Open a new serial session, whatever the current state.
    pub fn listen_serial(&mut self, now: Instant) {
        self.engine.start(now);
    }

    /// One cooperative iteration over both transports.
    pub fn tick(&mut self) -> OrchestratorState {
        if self.portal.is_running() {
            self.portal.process_dns();
            while let Some(request) = self.portal.poll_request() {
                self.handle_portal_request(request);
                if !self.portal.is_running() {
                    break;
                }
            }
        }

        let mut ctx = ProvisioningContext {
            wifi: &mut self.wifi,
            store: &mut self.store,
            clock: &self.clock,
        };
        match self.engine.poll(&mut ctx) {
            ImprovPoll::Provisioned(ip) => self.finish(ip),
            ImprovPoll::Expired if self.state == OrchestratorState::ListeningSerial => {
                // Serial is the only way in; keep listening
                self.engine.start(self.clock.now());
            }
            ImprovPoll::Expired | ImprovPoll::Idle | ImprovPoll::Dormant => {}
        }

        // A failed re-provisioning attempt leaves the station down
        if self.state == OrchestratorState::Connected && !self.wifi.is_connected() {
            self.restore_station();
        }

        self.state
    }

    /// Tick until connected (with no serial session open) or cancelled.
    pub fn run(&mut self, cancel: &CancellationToken) -> OrchestratorState {
        loop {
            if cancel.is_cancelled() {
                info!("Provisioning loop cancelled in state {:?}", self.state);
                break;
            }
            if self.tick() == OrchestratorState::Connected && !self.engine.is_listening() {
                break;
            }
            self.clock.sleep(self.config.tick_interval);
        }
        self.state
    }

    fn handle_portal_request(&mut self, request: PortalRequest) {
        match request {
            PortalRequest::Scan { reply } => {
                let networks = match self.wifi.scan() {
                    Ok(networks) => wifi::sort_scan_results(networks),
                    Err(e) => {
                        warn!("WiFi scan error: {}", e);
                        Vec::new()
                    }
                };
                let _ = reply.send(networks);
            }
            PortalRequest::Status { reply } => {
                let _ = reply.send(self.wifi.status());
            }
            PortalRequest::Configure {
                ssid,
                password,
                reply,
            } => {
                match self.configure_from_portal(ssid, password.as_str()) {
                    Ok(ip) => {
                        // Answer before the teardown takes the HTTP server down
                        let _ = reply.send(ConfigureResponse::ok());
                        self.finish(ip);
                    }
                    Err(message) => {
                        let _ = reply.send(ConfigureResponse::failed(message));
                    }
                }
            }
        }
    }

    fn configure_from_portal(&mut self, ssid: String, password: &str) -> Result<Ipv4Addr, String> {
        let credential = Credential::new(ssid, password).map_err(|e| e.to_string())?;

        let previous = self.state;
        self.state = OrchestratorState::Connecting;
        let ip = wifi::connect(
            &mut self.wifi,
            &self.clock,
            &credential,
            self.config.portal_connect_timeout,
            self.config.connect_poll_interval,
        )
        .map_err(|e| {
            warn!("Portal credentials did not work: {}", e);
            self.state = previous;
            format!("Unable to connect to {}", credential.ssid)
        })?;

        if !self.store.save_credential(&credential) {
            warn!("Connected but credentials were not persisted");
        }
        Ok(ip)
    }

    /// Rejoin with the stored credential, or fall back to provisioning.
    fn restore_station(&mut self) {
        warn!("Station is down, rejoining with stored credentials");
        self.ip = None;

        if let Some(credential) = self.store.load() {
            match wifi::connect(
                &mut self.wifi,
                &self.clock,
                &credential,
                self.config.boot_connect_timeout,
                self.config.connect_poll_interval,
            ) {
                Ok(ip) => {
                    info!("Rejoined {}, IP: {}", credential.ssid, ip);
                    self.ip = Some(ip);
                    return;
                }
                Err(e) => warn!("Stored credentials did not work: {}", e),
            }
        }

        self.enter_provisioning();
    }

    fn finish(&mut self, ip: Ipv4Addr) {
        info!("WiFi provisioned, IP: {}", ip);
        self.ip = Some(ip);
        self.state = OrchestratorState::Connected;
        self.portal.stop(&mut self.wifi);
        self.engine.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::improv::packet::{decode, encode, encode_strings};
    use crate::improv::{PacketType, State};
    use crate::serial::MemorySerial;
    use crate::wifi::mock::MockWifi;
    use crate::wifi::ScanResult;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use zeroize::Zeroizing;

    type TestOrchestrator = ProvisioningOrchestrator<MockWifi, Arc<ManualClock>>;

    fn test_config() -> ProvisioningConfig {
        ProvisioningConfig {
            ap_ip: Ipv4Addr::LOCALHOST,
            dns_port: 0,
            http_port: None,
            ..ProvisioningConfig::default()
        }
    }

    fn orchestrator(
        wifi: impl FnOnce(Arc<ManualClock>) -> MockWifi,
        store: CredentialStore,
    ) -> (TestOrchestrator, MemorySerial, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let serial = MemorySerial::new();
        let orchestrator = ProvisioningOrchestrator::new(
            test_config(),
            wifi(clock.clone()),
            store,
            Box::new(serial.clone()),
            clock.clone(),
        );
        (orchestrator, serial, clock)
    }

    fn stored(ssid: &str, passphrase: &str) -> CredentialStore {
        let mut store = CredentialStore::in_memory();
        assert!(store.save(ssid, passphrase));
        store
    }

    fn wifi_settings_frame(ssid: &str, passphrase: &str) -> Vec<u8> {
        let mut payload = vec![0x01];
        payload.extend(encode_strings(&[ssid, passphrase]).unwrap());
        encode(PacketType::RpcCommand, &payload).unwrap()
    }

    // ==================== Boot Tests ====================

    #[test]
    fn test_boot_with_working_credentials() {
        let (mut o, serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::from_secs(3)),
            stored("HomeNet", "secret123"),
        );

        assert_eq!(o.boot(), OrchestratorState::Connected);
        assert_eq!(o.ip(), Some(MockWifi::IP));
        assert_eq!(o.wifi().ap_starts(), 0);
        assert!(!o.engine().is_listening());
        assert!(serial.take_output().is_empty());
    }

    #[test]
    fn test_boot_with_failing_credentials_clears_them() {
        let (mut o, serial, clock) = orchestrator(
            |clock| MockWifi::never_connects(clock),
            stored("HomeNet", "stale"),
        );

        assert_eq!(o.boot(), OrchestratorState::PortalActive);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
        assert!(!o.store().has());
        assert!(o.portal().is_running());
        assert!(o.engine().is_listening());
        // The session opens with CURRENT_STATE(Authorized)
        let (frame, _) = decode(&serial.take_output()).unwrap();
        assert_eq!(frame.payload, vec![State::Authorized as u8]);
    }

    #[test]
    fn test_boot_without_credentials_starts_portal() {
        let (mut o, _serial, clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            CredentialStore::in_memory(),
        );

        assert_eq!(o.boot(), OrchestratorState::PortalActive);
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(o.wifi().access_point().unwrap().ssid, "Onboard-AB0C");
        assert_eq!(o.wifi().connect_attempts(), 0);
    }

    #[test]
    fn test_boot_falls_back_to_serial_when_ap_fails() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO).failing_access_point(),
            CredentialStore::in_memory(),
        );

        assert_eq!(o.boot(), OrchestratorState::ListeningSerial);
        assert!(!o.portal().is_running());
        assert!(o.engine().is_listening());
    }

    // ==================== Serial Provisioning Tests ====================

    #[test]
    fn test_serial_provisioning_tears_down_portal() {
        let (mut o, serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::from_secs(2)),
            CredentialStore::in_memory(),
        );
        o.boot();

        serial.push_input(&wifi_settings_frame("HomeNet", "secret123"));
        assert_eq!(o.tick(), OrchestratorState::Connected);

        assert_eq!(o.ip(), Some(MockWifi::IP));
        assert!(!o.portal().is_running());
        assert!(!o.wifi().access_point_active());
        assert!(!o.engine().is_listening());
        assert_eq!(o.store().load().unwrap().ssid, "HomeNet");
    }

    #[test]
    fn test_serial_session_rearmed_without_portal() {
        let (mut o, _serial, clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO).failing_access_point(),
            CredentialStore::in_memory(),
        );
        o.boot();

        clock.advance(Duration::from_secs(31));
        assert_eq!(o.tick(), OrchestratorState::ListeningSerial);
        assert!(o.engine().is_listening());
    }

    #[test]
    fn test_serial_session_expires_beside_portal() {
        let (mut o, _serial, clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            CredentialStore::in_memory(),
        );
        o.boot();

        clock.advance(Duration::from_secs(31));
        assert_eq!(o.tick(), OrchestratorState::PortalActive);
        assert!(!o.engine().is_listening());
        assert!(o.portal().is_running());
    }

    // ==================== Portal Provisioning Tests ====================

    /// Tick until `client` finishes, as the device loop would.
    fn drive<T: Send + 'static>(
        o: &mut TestOrchestrator,
        client: thread::JoinHandle<T>,
    ) -> T {
        while !client.is_finished() {
            o.tick();
            thread::sleep(Duration::from_millis(1));
        }
        client.join().unwrap()
    }

    #[test]
    fn test_portal_configure_success() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::from_secs(4)),
            CredentialStore::in_memory(),
        );
        o.boot();

        let handle = o.portal().handle();
        let client = thread::spawn(move || {
            handle.configure("HomeNet".into(), Zeroizing::new("secret123".into()))
        });
        let response = drive(&mut o, client).unwrap();

        assert_eq!(response, ConfigureResponse::ok());
        assert_eq!(o.state(), OrchestratorState::Connected);
        assert!(!o.portal().is_running());
        assert!(!o.engine().is_listening());
        assert_eq!(o.store().load().unwrap().passphrase, "secret123");
    }

    #[test]
    fn test_portal_configure_failure_stores_nothing() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO).rejecting("BadNet"),
            CredentialStore::in_memory(),
        );
        o.boot();

        let handle = o.portal().handle();
        let client = thread::spawn(move || {
            handle.configure("BadNet".into(), Zeroizing::new("whatever".into()))
        });
        let response = drive(&mut o, client).unwrap();

        assert_eq!(response, ConfigureResponse::failed("Unable to connect to BadNet"));
        assert_eq!(o.state(), OrchestratorState::PortalActive);
        assert!(o.portal().is_running());
        assert!(!o.store().has());
    }

    #[test]
    fn test_portal_configure_rejects_invalid_ssid() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            CredentialStore::in_memory(),
        );
        o.boot();

        let handle = o.portal().handle();
        let client =
            thread::spawn(move || handle.configure(String::new(), Zeroizing::new(String::new())));
        let response = drive(&mut o, client).unwrap();

        assert!(!response.success);
        assert_eq!(o.wifi().connect_attempts(), 0);
        assert_eq!(o.state(), OrchestratorState::PortalActive);
    }

    #[test]
    fn test_portal_scan_and_status() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| {
                MockWifi::connects_after(clock, Duration::ZERO).with_networks(vec![
                    ScanResult { ssid: "B".into(), rssi: -70, secure: true },
                    ScanResult { ssid: "A".into(), rssi: -30, secure: false },
                ])
            },
            CredentialStore::in_memory(),
        );
        o.boot();

        let handle = o.portal().handle();
        let client = thread::spawn(move || (handle.scan(), handle.status()));
        let (scan, status) = drive(&mut o, client);

        let names: Vec<_> = scan.unwrap().into_iter().map(|n| n.ssid).collect();
        assert_eq!(names, vec!["A", "B"]);
        let status = status.unwrap();
        assert!(status.active);
        assert!(!status.connected);
    }

    // ==================== Re-entry Tests ====================

    #[test]
    fn test_no_automatic_reentry_after_connect() {
        let (mut o, serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            stored("HomeNet", "secret123"),
        );
        o.boot();

        serial.push_input(&wifi_settings_frame("Other", "secret123"));
        assert_eq!(o.tick(), OrchestratorState::Connected);
        assert_eq!(o.wifi().connect_attempts(), 1);
        assert!(serial.take_output().is_empty());
    }

    #[test]
    fn test_listen_serial_after_connect() {
        let (mut o, serial, clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            stored("HomeNet", "secret123"),
        );
        o.boot();

        o.listen_serial(clock.now());
        serial.push_input(&wifi_settings_frame("Office", "hunter22"));
        assert_eq!(o.tick(), OrchestratorState::Connected);
        assert_eq!(o.store().load().unwrap().ssid, "Office");
        assert!(!o.engine().is_listening());
    }

    #[test]
    fn test_wrong_passphrase_for_joined_network_keeps_credential() {
        let (mut o, serial, clock) = orchestrator(
            |clock| {
                MockWifi::connects_after(clock, Duration::ZERO).requiring("HomeNet", "secret123")
            },
            stored("HomeNet", "secret123"),
        );
        o.boot();

        o.listen_serial(clock.now());
        serial.push_input(&wifi_settings_frame("HomeNet", "WRONG-pass"));
        assert_eq!(o.tick(), OrchestratorState::Connected);

        assert_eq!(o.store().load().unwrap().passphrase, "secret123");
        assert!(o.wifi().is_connected());
        assert_eq!(o.ip(), Some(MockWifi::IP));
    }

    #[test]
    fn test_failed_reprovision_rejoins_stored_network() {
        let (mut o, serial, clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO).rejecting("BadNet"),
            stored("HomeNet", "secret123"),
        );
        o.boot();

        o.listen_serial(clock.now());
        serial.push_input(&wifi_settings_frame("BadNet", "whatever"));
        assert_eq!(o.tick(), OrchestratorState::Connected);

        // boot, BadNet, rejoin
        assert_eq!(o.wifi().connect_attempts(), 3);
        assert!(o.wifi().is_connected());
        assert_eq!(o.wifi().connected_ssid().as_deref(), Some("HomeNet"));
        assert_eq!(o.ip(), Some(MockWifi::IP));
        assert_eq!(o.store().load().unwrap().ssid, "HomeNet");

        clock.advance(Duration::from_secs(31));
        assert_eq!(o.tick(), OrchestratorState::Connected);
        assert!(o.wifi().is_connected());
    }

    #[test]
    fn test_failed_reprovision_without_working_network_reenters_provisioning() {
        let (mut o, serial, clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO).rejecting("BadNet"),
            stored("HomeNet", "secret123"),
        );
        o.boot();
        // The stored network disappears
        o.wifi_mut().reject("HomeNet");

        o.listen_serial(clock.now());
        serial.push_input(&wifi_settings_frame("BadNet", "whatever"));
        assert_eq!(o.tick(), OrchestratorState::PortalActive);

        assert_eq!(o.ip(), None);
        assert!(o.portal().is_running());
        assert!(o.engine().is_listening());
        assert!(o.store().has());

        clock.advance(Duration::from_secs(31));
        o.tick();
        assert!(o.portal().is_running());
    }

    #[test]
    fn test_portal_failure_keeps_previous_credential() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO).rejecting("BadNet"),
            stored("HomeNet", "secret123"),
        );
        o.boot();
        o.enter_provisioning();

        let handle = o.portal().handle();
        let client = thread::spawn(move || {
            handle.configure("BadNet".into(), Zeroizing::new("whatever".into()))
        });
        let response = drive(&mut o, client).unwrap();

        assert_eq!(response, ConfigureResponse::failed("Unable to connect to BadNet"));
        assert_eq!(o.state(), OrchestratorState::PortalActive);
        let credential = o.store().load().unwrap();
        assert_eq!(credential.ssid, "HomeNet");
        assert_eq!(credential.passphrase, "secret123");
    }

    #[test]
    fn test_enter_provisioning_after_connect() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            stored("HomeNet", "secret123"),
        );
        o.boot();

        o.enter_provisioning();
        assert_eq!(o.state(), OrchestratorState::PortalActive);
        assert_eq!(o.ip(), None);
        assert!(o.portal().is_running());
    }

    // ==================== Run Loop Tests ====================

    #[test]
    fn test_run_stops_when_cancelled() {
        let (mut o, _serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::ZERO),
            CredentialStore::in_memory(),
        );
        o.boot();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(o.run(&cancel), OrchestratorState::PortalActive);
    }

    #[test]
    fn test_run_until_connected() {
        let (mut o, serial, _clock) = orchestrator(
            |clock| MockWifi::connects_after(clock, Duration::from_secs(1)),
            CredentialStore::in_memory(),
        );
        o.boot();
        serial.push_input(&wifi_settings_frame("HomeNet", "secret123"));

        assert_eq!(o.run(&CancellationToken::new()), OrchestratorState::Connected);
        assert_eq!(o.ip(), Some(MockWifi::IP));
    }
}
