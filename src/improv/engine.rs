//! Improv protocol engine.
//!
//! The engine owns the protocol state, the receive buffer and the serial
//! transport. It is driven by [`ImprovEngine::poll`], one bounded iteration
//! per call, so it can share a cooperative loop with the captive portal.
//!
//! ```text
//!   start(now)                     SEND_WIFI_SETTINGS
//!  ───────────► Authorized ──────────────────────────► Provisioning
//!                   ▲                                      │
//!                   │  connect failed                      │ connected
//!                   └──────────────────────────────────────┤
//!                                                          ▼
//!                                                     Provisioned
//! ```

use super::packet::{self, PacketError};
use super::{ErrorCode, PacketType, RpcCommand, State};
use crate::clock::Clock;
use crate::config::{Credential, DeviceIdentity, ProvisioningConfig};
use crate::serial::SerialTransport;
use crate::storage::CredentialStore;
use crate::wifi::{self, WifiDriver};
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Bytes requested from the transport per poll.
const READ_CHUNK: usize = 256;

/// Collaborators an RPC handler may touch.
pub struct ProvisioningContext<'a> {
    pub wifi: &'a mut dyn WifiDriver,
    pub store: &'a mut CredentialStore,
    pub clock: &'a dyn Clock,
}

/// Outcome of one [`ImprovEngine::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovPoll {
    /// Session still open, nothing decisive happened.
    Idle,
    /// Credentials were applied, persisted and the station has this address.
    /// The session stays open until the owner stops it.
    Provisioned(Ipv4Addr),
    /// Session deadline passed without provisioning.
    Expired,
    /// No session is open.
    Dormant,
}

/// Serial provisioning state machine.
pub struct ImprovEngine {
    transport: Box<dyn SerialTransport>,
    device: DeviceIdentity,
    state: State,
    last_error: ErrorCode,
    deadline: Option<Instant>,
    rx: Vec<u8>,
    session_timeout: Duration,
    read_timeout: Duration,
    connect_timeout: Duration,
    connect_poll_interval: Duration,
}

impl ImprovEngine {
    /// Create a dormant engine.
    pub fn new(transport: Box<dyn SerialTransport>, config: &ProvisioningConfig) -> Self {
        Self {
            transport,
            device: config.device.clone(),
            state: State::Authorized,
            last_error: ErrorCode::None,
            deadline: None,
            rx: Vec::new(),
            session_timeout: config.serial_session_timeout,
            read_timeout: config.serial_poll_timeout,
            connect_timeout: config.improv_connect_timeout,
            connect_poll_interval: config.connect_poll_interval,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Last error code reported to the host.
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// A listening session is open.
    pub fn is_listening(&self) -> bool {
        self.deadline.is_some()
    }

    /// Open a listening session that expires `session_timeout` after `now`.
    pub fn start(&mut self, now: Instant) {
        info!(
            "Improv serial: listening for provisioning commands ({:?})",
            self.session_timeout
        );
        self.rx.clear();
        self.last_error = ErrorCode::None;
        self.deadline = Some(now + self.session_timeout);
        self.send_state(State::Authorized);
    }

    /// Close the session without emitting anything.
    pub fn stop(&mut self) {
        self.deadline = None;
        self.rx.clear();
    }

    /// Run one bounded iteration: deadline check, one transport read, then
    /// every complete frame in the buffer.
    pub fn poll(&mut self, ctx: &mut ProvisioningContext<'_>) -> ImprovPoll {
        let Some(deadline) = self.deadline else {
            return ImprovPoll::Dormant;
        };
        if ctx.clock.now() >= deadline {
            info!("Improv serial: session timed out");
            self.stop();
            return ImprovPoll::Expired;
        }

        let mut buf = [0u8; READ_CHUNK];
        match self.transport.read(&mut buf, self.read_timeout) {
            Ok(n) => self.rx.extend_from_slice(&buf[..n]),
            Err(e) => warn!("Improv serial: read failed: {}", e),
        }

        while !self.rx.is_empty() {
            match packet::decode(&self.rx) {
                Ok((frame, consumed)) => {
                    self.rx.drain(..consumed);
                    if frame.packet_type != PacketType::RpcCommand {
                        debug!("Improv serial: ignoring {:?} frame", frame.packet_type);
                        continue;
                    }
                    if let Some(ip) = self.handle_rpc(&frame.payload, ctx) {
                        // Frames buffered behind this one are handled next poll
                        return ImprovPoll::Provisioned(ip);
                    }
                }
                Err(PacketError::Incomplete) => break,
                Err(PacketError::Checksum { consumed, .. }) => {
                    warn!("Improv serial: checksum mismatch, frame dropped");
                    self.rx.drain(..consumed);
                }
                Err(PacketError::UnknownType {
                    packet_type,
                    consumed,
                }) => {
                    debug!("Improv serial: unknown frame type {:#04x}", packet_type);
                    self.rx.drain(..consumed);
                }
                Err(PacketError::Framing) | Err(PacketError::PayloadTooLong(_)) => {
                    // Resynchronise one byte at a time
                    self.rx.remove(0);
                }
            }
        }

        ImprovPoll::Idle
    }

    fn handle_rpc(&mut self, payload: &[u8], ctx: &mut ProvisioningContext<'_>) -> Option<Ipv4Addr> {
        self.send_error(ErrorCode::None);

        let Some((&command_id, data)) = payload.split_first() else {
            self.send_error(ErrorCode::InvalidRpc);
            return None;
        };

        match RpcCommand::try_from(command_id) {
            Ok(RpcCommand::SendWifiSettings) => return self.handle_wifi_settings(data, ctx),
            Ok(RpcCommand::RequestCurrentState) => self.send_state(self.state),
            Ok(RpcCommand::RequestDeviceInfo) => {
                let device_name = self.device.device_name(ctx.wifi.mac_address());
                let info = [
                    self.device.firmware_name.clone(),
                    self.device.firmware_version.clone(),
                    self.device.chip.clone(),
                    device_name,
                ];
                self.send_rpc_result(&info);
            }
            Ok(RpcCommand::RequestScanNetworks) => self.handle_scan(ctx),
            Err(unknown) => {
                debug!("Improv serial: unknown command {:#04x}", unknown);
                self.send_error(ErrorCode::UnknownCommand);
            }
        }
        None
    }

    fn handle_wifi_settings(
        &mut self,
        data: &[u8],
        ctx: &mut ProvisioningContext<'_>,
    ) -> Option<Ipv4Addr> {
        if self.state != State::Authorized {
            warn!("Improv serial: settings rejected in state {:?}", self.state);
            self.send_error(ErrorCode::InvalidRpc);
            return None;
        }

        let strings = packet::decode_strings(data);
        let credential = match strings.as_slice() {
            [ssid, passphrase, ..] => Credential::new(ssid.as_str(), passphrase.as_str()),
            _ => {
                self.send_error(ErrorCode::InvalidRpc);
                return None;
            }
        };
        let credential = match credential {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Improv serial: rejected settings: {}", e);
                self.send_error(ErrorCode::InvalidRpc);
                return None;
            }
        };

        info!("Improv: Connecting to '{}'...", credential.ssid);
        self.send_state(State::Provisioning);

        match wifi::connect(
            &mut *ctx.wifi,
            ctx.clock,
            &credential,
            self.connect_timeout,
            self.connect_poll_interval,
        ) {
            Ok(ip) => {
                self.send_state(State::Provisioned);
                self.send_rpc_result(&[format!("http://{}/", ip)]);
                if !ctx.store.save_credential(&credential) {
                    warn!("Improv serial: connected but credentials were not persisted");
                }
                info!("Improv: WiFi provisioned successfully");
                Some(ip)
            }
            Err(e) => {
                warn!("Improv serial: {}", e);
                self.send_error(ErrorCode::UnableToConnect);
                self.send_state(State::Authorized);
                None
            }
        }
    }

    fn handle_scan(&mut self, ctx: &mut ProvisioningContext<'_>) {
        match ctx.wifi.scan() {
            Ok(networks) => {
                for network in wifi::sort_scan_results(networks) {
                    let secure = if network.secure { "YES" } else { "NO" };
                    self.send_rpc_result(&[network.ssid, network.rssi.to_string(), secure.into()]);
                }
            }
            Err(e) => warn!("Improv serial: {}", e),
        }
        // Empty result terminates the list
        self.send_rpc_result(&[]);
    }

    fn send_state(&mut self, state: State) {
        self.state = state;
        self.send(PacketType::CurrentState, &[state as u8]);
    }

    fn send_error(&mut self, error: ErrorCode) {
        self.last_error = error;
        self.send(PacketType::ErrorState, &[error as u8]);
    }

    fn send_rpc_result(&mut self, strings: &[String]) {
        let strs: Vec<&str> = strings.iter().map(String::as_str).collect();
        match packet::encode_strings(&strs) {
            Ok(payload) => self.send(PacketType::RpcResult, &payload),
            Err(e) => warn!("Improv serial: result not sent: {}", e),
        }
    }

    fn send(&mut self, packet_type: PacketType, payload: &[u8]) {
        let frame = match packet::encode(packet_type, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Improv serial: {:?} frame not sent: {}", packet_type, e);
                return;
            }
        };
        if let Err(e) = self.transport.write_all(&frame) {
            warn!("Improv serial: write failed: {}", e);
        }
    }
}
