//! Captive portal provisioning.
//!
//! While active the device runs an open access point, answers every DNS
//! query with its own address and serves a setup page over HTTP. Client
//! operating systems detect the portal and open the setup page on their own.
//!
//! # Components
//!
//! - [`dns`] - catch-all DNS answer forging
//! - [`pages`] - setup and success HTML
//! - [`api`] - HTTP routes over the portal request channel
//! - [`server`] - `tiny_http` server thread

pub mod api;
pub mod dns;
pub mod pages;
pub mod server;

pub use api::{ConfigureResponse, PortalHandle, PortalRequest};
pub use dns::{DnsError, DnsResponder};
pub use server::PortalServer;

use crate::config::ProvisioningConfig;
use crate::wifi::{AccessPointConfig, WifiDriver, WifiError};
use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

/// Datagrams handled per [`CaptivePortal::process_dns`] call.
pub const DNS_BATCH: usize = 8;

/// Largest DNS datagram read.
const DNS_BUFFER_LEN: usize = 512;

/// Poll interval while waiting for the HTTP thread to exit.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Errors raised while starting the portal.
#[derive(Debug)]
pub enum PortalError {
    /// The access point could not be raised.
    AccessPoint(WifiError),
}

impl std::fmt::Display for PortalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessPoint(e) => write!(f, "access point failed: {}", e),
        }
    }
}

impl std::error::Error for PortalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AccessPoint(e) => Some(e),
        }
    }
}

impl From<WifiError> for PortalError {
    fn from(e: WifiError) -> Self {
        Self::AccessPoint(e)
    }
}

/// Access point, DNS responder and HTTP server lifecycle.
pub struct CaptivePortal {
    access_point: AccessPointConfig,
    hostname: String,
    dns_port: u16,
    http_port: Option<u16>,
    responder: DnsResponder,
    handle: PortalHandle,
    requests: Receiver<PortalRequest>,
    dns_socket: Option<UdpSocket>,
    server: Option<PortalServer>,
    running: bool,
}

impl CaptivePortal {
    /// Prepare a portal for the device with station MAC `mac`.
    pub fn new(config: &ProvisioningConfig, mac: [u8; 6]) -> Self {
        let hostname = config.device.hostname(mac);
        let (tx, requests) = mpsc::channel();
        let handle = PortalHandle::new(
            tx,
            hostname.clone(),
            config.ap_ip,
            config.portal_connect_timeout,
        );

        Self {
            access_point: AccessPointConfig {
                ssid: config.device.device_name(mac),
                ip: config.ap_ip,
                prefix_len: config.ap_prefix_len,
            },
            hostname,
            dns_port: config.dns_port,
            http_port: config.http_port,
            responder: DnsResponder::new(config.ap_ip),
            handle,
            requests,
            dns_socket: None,
            server: None,
            running: false,
        }
    }

    /// Access point SSID.
    pub fn ssid(&self) -> &str {
        &self.access_point.ssid
    }

    /// Hostname used on the pages.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Portal is up.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Sending side of the request channel, as used by the HTTP server.
    pub fn handle(&self) -> PortalHandle {
        self.handle.clone()
    }

    /// Address of the DNS socket, if bound.
    pub fn dns_local_addr(&self) -> Option<SocketAddr> {
        self.dns_socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Address of the HTTP server, if running.
    pub fn http_local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(PortalServer::local_addr)
    }

    /// Raise the access point, then the DNS responder and HTTP server.
    ///
    /// Only an access point failure is fatal; DNS and HTTP failures are
    /// logged and the portal runs without them.
    pub fn start(&mut self, wifi: &mut dyn WifiDriver) -> Result<(), PortalError> {
        if self.running {
            return Ok(());
        }

        wifi.start_access_point(&self.access_point)?;
        info!(
            "Access Point started, SSID: {}, IP: {} (no password)",
            self.access_point.ssid, self.access_point.ip
        );

        match Self::bind_dns(SocketAddr::from((self.access_point.ip, self.dns_port))) {
            Ok(socket) => {
                info!("DNS server started on {}:{}", self.access_point.ip, self.dns_port);
                self.dns_socket = Some(socket);
            }
            Err(e) => error!("Failed to start DNS server: {}", e),
        }

        if let Some(port) = self.http_port {
            let addr = SocketAddr::from((self.access_point.ip, port));
            match PortalServer::start(addr, self.handle.clone()) {
                Ok(server) => self.server = Some(server),
                Err(e) => error!("Failed to start portal HTTP server on {}: {}", addr, e),
            }
        }

        info!(
            "Captive portal active: connect to '{}' and visit http://{}/setup",
            self.access_point.ssid, self.access_point.ip
        );
        self.running = true;
        Ok(())
    }

    fn bind_dns(addr: SocketAddr) -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    /// Answer up to [`DNS_BATCH`] pending queries. Returns how many were
    /// answered.
    pub fn process_dns(&mut self) -> usize {
        let Some(socket) = &self.dns_socket else {
            return 0;
        };

        let mut answered = 0;
        let mut buf = [0u8; DNS_BUFFER_LEN];
        for _ in 0..DNS_BATCH {
            let (len, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("DNS receive error: {}", e);
                    break;
                }
            };

            match self.responder.build_response(&buf[..len]) {
                Ok(response) => match socket.send_to(&response, peer) {
                    Ok(_) => answered += 1,
                    Err(e) => warn!("DNS send to {} failed: {}", peer, e),
                },
                Err(e) => debug!("Dropping DNS datagram from {}: {}", peer, e),
            }
        }
        answered
    }

    /// Next request from the HTTP side, if any.
    pub fn poll_request(&mut self) -> Option<PortalRequest> {
        match self.requests.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) => None,
            // The portal itself holds a sender, so this cannot happen
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Stop HTTP, DNS and the access point. Safe when never started.
    pub fn stop(&mut self, wifi: &mut dyn WifiDriver) {
        if let Some(mut server) = self.server.take() {
            server.request_stop();
            // A handler blocked on a queued request unblocks once it is dropped
            while !server.is_finished() {
                while self.requests.try_recv().is_ok() {}
                thread::sleep(STOP_POLL);
            }
            server.stop();
        }
        self.dns_socket = None;
        // Requests queued behind the teardown get no reply
        while self.requests.try_recv().is_ok() {}

        if self.running {
            if let Err(e) = wifi.stop_access_point() {
                warn!("Failed to stop access point: {}", e);
            }
            self.running = false;
            info!("Captive portal stopped");
        }
    }

    /// Setup page body.
    pub fn setup_page_html(&self) -> String {
        pages::setup_page_html(&self.hostname)
    }

    /// Success page body for `ssid`.
    pub fn success_page_html(&self, ssid: &str) -> String {
        pages::success_page_html(&self.hostname, ssid)
    }
}
