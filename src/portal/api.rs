//! Portal HTTP routes.
//!
//! Requests are handled by pure functions over a [`PortalHandle`]. The
//! handle never touches the radio or the credential store; it sends
//! [`PortalRequest`] messages to the orchestrator and waits for the reply.
//!
//! | Method | Path             | Response                                  |
//! |--------|------------------|-------------------------------------------|
//! | GET    | `/setup`         | setup page                                |
//! | GET    | `/api/scan`      | `[{"ssid","rssi","secure"}]`              |
//! | POST   | `/api/configure` | `{"success", "error"?}`                   |
//! | GET    | `/success?ssid=` | success page                              |
//! | GET    | `/api/status`    | `{"active","connected","ssid","ip","rssi"}` |
//! | GET    | anything else    | 302 to `/setup`                           |

use super::pages;
use crate::wifi::{ScanResult, WifiStatus};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;
use zeroize::Zeroizing;

/// Wait for scan and status replies.
const QUERY_REPLY_TIMEOUT: Duration = Duration::from_secs(15);

/// Headroom on top of the connect budget for configure replies.
const CONFIGURE_REPLY_SLACK: Duration = Duration::from_secs(10);

/// Work the HTTP thread asks the orchestrator to do.
pub enum PortalRequest {
    /// Scan for networks.
    Scan { reply: Sender<Vec<ScanResult>> },
    /// Store and try a credential.
    Configure {
        ssid: String,
        password: Zeroizing<String>,
        reply: Sender<ConfigureResponse>,
    },
    /// Report the station status.
    Status { reply: Sender<WifiStatus> },
}

impl std::fmt::Debug for PortalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scan { .. } => write!(f, "Scan"),
            Self::Configure { ssid, .. } => write!(f, "Configure({:?})", ssid),
            Self::Status { .. } => write!(f, "Status"),
        }
    }
}

/// Body of `POST /api/configure`.
#[derive(Deserialize)]
pub struct ConfigureRequest {
    pub ssid: String,
    #[serde(default)]
    pub password: Zeroizing<String>,
}

/// Reply to `POST /api/configure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigureResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConfigureResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Sending side of the portal request channel, shared with the HTTP thread.
#[derive(Debug, Clone)]
pub struct PortalHandle {
    tx: Sender<PortalRequest>,
    hostname: String,
    gateway: Ipv4Addr,
    configure_timeout: Duration,
}

impl PortalHandle {
    pub(crate) fn new(
        tx: Sender<PortalRequest>,
        hostname: String,
        gateway: Ipv4Addr,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            tx,
            hostname,
            gateway,
            configure_timeout: connect_timeout + CONFIGURE_REPLY_SLACK,
        }
    }

    /// Hostname shown on the pages.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn call<T>(
        &self,
        request: impl FnOnce(Sender<T>) -> PortalRequest,
        timeout: Duration,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.tx.send(request(reply_tx)).is_err() {
            debug!("Portal request channel closed");
            return None;
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!("No reply to portal request: {}", e);
                None
            }
        }
    }

    /// Ask for a scan.
    pub fn scan(&self) -> Option<Vec<ScanResult>> {
        self.call(|reply| PortalRequest::Scan { reply }, QUERY_REPLY_TIMEOUT)
    }

    /// Ask the orchestrator to store and try a credential.
    pub fn configure(&self, ssid: String, password: Zeroizing<String>) -> Option<ConfigureResponse> {
        self.call(
            |reply| PortalRequest::Configure {
                ssid,
                password,
                reply,
            },
            self.configure_timeout,
        )
    }

    /// Ask for the station status.
    pub fn status(&self) -> Option<WifiStatus> {
        self.call(|reply| PortalRequest::Status { reply }, QUERY_REPLY_TIMEOUT)
    }
}

/// Response produced by a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl HttpResponse {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type", "text/html; charset=utf-8".into())],
            body,
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                headers: vec![("Content-Type", "application/json".into())],
                body,
            },
            Err(e) => Self::text(500, format!("serialization failed: {}", e)),
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "text/plain".into())],
            body: body.into(),
        }
    }

    fn redirect(location: String) -> Self {
        Self {
            status: 302,
            headers: vec![("Location", location)],
            body: String::new(),
        }
    }

    fn method_not_allowed(allow: &'static str) -> Self {
        Self {
            status: 405,
            headers: vec![("Allow", allow.into())],
            body: "Method Not Allowed".into(),
        }
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Route one request. `target` is the request path with optional query.
pub fn handle_request(method: &str, target: &str, body: &[u8], portal: &PortalHandle) -> HttpResponse {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let is_get = method.eq_ignore_ascii_case("GET");
    let is_post = method.eq_ignore_ascii_case("POST");

    match path {
        "/setup" if is_get => HttpResponse::html(pages::setup_page_html(&portal.hostname)),
        "/success" if is_get => {
            let ssid = url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "ssid")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            HttpResponse::html(pages::success_page_html(&portal.hostname, &ssid))
        }
        "/api/scan" if is_get => match portal.scan() {
            Some(networks) => HttpResponse::json(200, &networks),
            None => HttpResponse::json(503, &Vec::<ScanResult>::new()),
        },
        "/api/status" if is_get => match portal.status() {
            Some(status) => HttpResponse::json(200, &status),
            None => HttpResponse::text(503, "status unavailable"),
        },
        "/api/configure" if is_post => configure(body, portal),
        "/api/configure" => HttpResponse::method_not_allowed("POST"),
        "/setup" | "/success" | "/api/scan" | "/api/status" => HttpResponse::method_not_allowed("GET"),
        // OS connectivity checks land here
        _ if is_get => HttpResponse::redirect(format!("http://{}/setup", portal.gateway)),
        _ => HttpResponse::method_not_allowed("GET"),
    }
}

fn configure(body: &[u8], portal: &PortalHandle) -> HttpResponse {
    let request: ConfigureRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::json(
                400,
                &ConfigureResponse::failed(format!("invalid request body: {}", e)),
            )
        }
    };

    match portal.configure(request.ssid, request.password) {
        Some(response) => HttpResponse::json(200, &response),
        None => HttpResponse::json(503, &ConfigureResponse::failed("device busy")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;
    use std::thread;

    fn portal() -> (PortalHandle, Receiver<PortalRequest>) {
        let (tx, rx) = mpsc::channel();
        let handle = PortalHandle::new(
            tx,
            "onboard-ab0c".into(),
            Ipv4Addr::new(192, 168, 4, 1),
            Duration::from_secs(1),
        );
        (handle, rx)
    }

    /// Answer requests the way a connected orchestrator would.
    fn serve(rx: Receiver<PortalRequest>) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Ok(request) = rx.recv() {
                seen.push(format!("{:?}", request));
                match request {
                    PortalRequest::Scan { reply } => {
                        let _ = reply.send(vec![ScanResult {
                            ssid: "HomeNet".into(),
                            rssi: -42,
                            secure: true,
                        }]);
                    }
                    PortalRequest::Configure {
                        ssid,
                        password,
                        reply,
                    } => {
                        let response = if password.as_str() == "secret123" {
                            ConfigureResponse::ok()
                        } else {
                            ConfigureResponse::failed(format!("Unable to connect to {}", ssid))
                        };
                        let _ = reply.send(response);
                    }
                    PortalRequest::Status { reply } => {
                        let _ = reply.send(WifiStatus {
                            active: true,
                            connected: false,
                            ssid: None,
                            ip: None,
                            rssi: None,
                        });
                    }
                }
            }
            seen
        })
    }

    // ==================== Page Tests ====================

    #[test]
    fn test_setup_page() {
        let (handle, _rx) = portal();
        let response = handle_request("GET", "/setup", b"", &handle);
        assert_eq!(response.status, 200);
        assert!(response.header("content-type").unwrap().starts_with("text/html"));
        assert!(response.body.contains("onboard-ab0c"));
    }

    #[test]
    fn test_success_page_decodes_ssid() {
        let (handle, _rx) = portal();
        let response = handle_request("GET", "/success?ssid=Home%20Net%20%3C5G%3E", b"", &handle);
        assert_eq!(response.status, 200);
        assert!(response.body.contains("Successfully connected to Home Net &lt;5G&gt;"));
    }

    #[test]
    fn test_unknown_get_redirects_to_setup() {
        let (handle, _rx) = portal();
        for path in ["/", "/generate_204", "/hotspot-detect.html", "/ncsi.txt"] {
            let response = handle_request("GET", path, b"", &handle);
            assert_eq!(response.status, 302, "{}", path);
            assert_eq!(response.header("Location"), Some("http://192.168.4.1/setup"));
        }
    }

    #[test]
    fn test_wrong_methods_rejected() {
        let (handle, _rx) = portal();
        assert_eq!(handle_request("POST", "/setup", b"", &handle).status, 405);
        assert_eq!(handle_request("DELETE", "/", b"", &handle).status, 405);
        let response = handle_request("GET", "/api/configure", b"", &handle);
        assert_eq!(response.status, 405);
        assert_eq!(response.header("Allow"), Some("POST"));
    }

    // ==================== API Tests ====================

    #[test]
    fn test_scan_returns_json() {
        let (handle, rx) = portal();
        let server = serve(rx);

        let response = handle_request("GET", "/api/scan", b"", &handle);
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            r#"[{"ssid":"HomeNet","rssi":-42,"secure":true}]"#
        );

        drop(handle);
        assert_eq!(server.join().unwrap(), vec!["Scan"]);
    }

    #[test]
    fn test_configure_roundtrip() {
        let (handle, rx) = portal();
        let server = serve(rx);

        let ok = handle_request(
            "POST",
            "/api/configure",
            br#"{"ssid":"HomeNet","password":"secret123"}"#,
            &handle,
        );
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body, r#"{"success":true}"#);

        let failed = handle_request(
            "POST",
            "/api/configure",
            br#"{"ssid":"HomeNet","password":"nope"}"#,
            &handle,
        );
        assert_eq!(
            failed.body,
            r#"{"success":false,"error":"Unable to connect to HomeNet"}"#
        );

        drop(handle);
        let seen = server.join().unwrap();
        assert_eq!(seen, vec![r#"Configure("HomeNet")"#, r#"Configure("HomeNet")"#]);
    }

    #[test]
    fn test_configure_password_optional() {
        let (handle, rx) = portal();
        let server = serve(rx);
        let response = handle_request("POST", "/api/configure", br#"{"ssid":"Cafe"}"#, &handle);
        assert_eq!(response.status, 200);
        assert!(response.body.contains(r#""success":false"#));
        drop(handle);
        server.join().unwrap();
    }

    #[test]
    fn test_configure_rejects_bad_body() {
        let (handle, rx) = portal();
        let response = handle_request("POST", "/api/configure", b"ssid=HomeNet", &handle);
        assert_eq!(response.status, 400);
        assert!(response.body.contains(r#""success":false"#));
        // Nothing reached the orchestrator
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_json() {
        let (handle, rx) = portal();
        let server = serve(rx);
        let response = handle_request("GET", "/api/status", b"", &handle);
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            r#"{"active":true,"connected":false,"ssid":null,"ip":null,"rssi":null}"#
        );
        drop(handle);
        server.join().unwrap();
    }

    #[test]
    fn test_orchestrator_gone_reports_unavailable() {
        let (handle, rx) = portal();
        drop(rx);
        assert_eq!(handle_request("GET", "/api/scan", b"", &handle).status, 503);
        let response = handle_request(
            "POST",
            "/api/configure",
            br#"{"ssid":"HomeNet","password":"secret123"}"#,
            &handle,
        );
        assert_eq!(response.status, 503);
    }
}
