//! HTTP server for the captive portal.
//!
//! Uses `tiny_http` which works on both host and ESP32 (via std::net). The
//! server runs in a background thread and hands every request to
//! [`api::handle_request`].

use super::api::{self, PortalHandle};
use log::{error, info, warn};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

/// Largest request body read from a client.
const MAX_BODY_LEN: u64 = 1024;

/// How often the server loop checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Stack for the server thread; page rendering and JSON need some headroom.
const SERVER_STACK_SIZE: usize = 16 * 1024;

/// Running portal HTTP server.
pub struct PortalServer {
    /// Server thread handle.
    handle: Option<thread::JoinHandle<()>>,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl PortalServer {
    /// Bind `addr` and start serving in a background thread.
    pub fn start(addr: SocketAddr, portal: PortalHandle) -> Result<Self, std::io::Error> {
        let server = Server::http(addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let addr = server.server_addr().to_ip().unwrap_or(addr);

        info!("Portal HTTP server listening on http://{}/setup", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("portal-http".into())
            .stack_size(SERVER_STACK_SIZE)
            .spawn(move || Self::run_server(server, portal, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            addr,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn run_server(server: Server, portal: PortalHandle, shutdown: Arc<AtomicBool>) {
        loop {
            // Acquire pairs with the Release store in stop()
            if shutdown.load(Ordering::Acquire) {
                info!("Portal HTTP server shutting down");
                break;
            }

            match server.recv_timeout(SHUTDOWN_POLL) {
                Ok(Some(mut request)) => {
                    let mut body = Vec::new();
                    if let Err(e) = request
                        .as_reader()
                        .take(MAX_BODY_LEN)
                        .read_to_end(&mut body)
                    {
                        warn!("Failed to read request body: {}", e);
                        continue;
                    }

                    let reply = api::handle_request(
                        request.method().as_str(),
                        request.url(),
                        &body,
                        &portal,
                    );

                    // from_data carries no default Content-Type
                    let mut response = Response::from_data(reply.body.into_bytes())
                        .with_status_code(reply.status);
                    for (name, value) in &reply.headers {
                        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                            Ok(header) => response.add_header(header),
                            Err(()) => warn!("Dropping malformed header {}", name),
                        }
                    }

                    if let Err(e) = request.respond(response) {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {
                    // Timeout, check shutdown flag and continue
                }
                Err(e) => {
                    error!("Portal HTTP server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Ask the server loop to exit after the request in flight.
    pub fn request_stop(&self) {
        // Release pairs with the Acquire load in the server loop
        self.shutdown.store(true, Ordering::Release);
    }

    /// The server thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the server and wait for its thread. A request in flight is
    /// answered first.
    ///
    /// May take up to 100ms due to polling interval.
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PortalServer {
    fn drop(&mut self) {
        self.stop();
    }
}
