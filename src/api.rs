// OMERO.web client: a small blocking HTTP client that implements the
// session contract from `session.rs` on top of the OMERO.web JSON API.
//
// Login follows the JSON API handshake (CSRF token, server list, login
// form). Group switching, region creation, keep-alive and logout go
// through the webclient and iviewer endpoints that share the same Django
// session cookie.

use crate::config::Config;
use crate::error::{ImportError, Result};
use crate::session::{Connector, Credentials, Group, Rectangle, RemoteSession};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Port used for every connection unless the host names an `https://` URL
/// with its own port.
pub const SECURE_PORT: u16 = 443;

const CSRF_HEADER: &str = "X-CSRFToken";
const RECTANGLE_TYPE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06#Rectangle";
/// Built-in group every user belongs to; never offered for selection.
const SYSTEM_USER_GROUP: &str = "user";

/// Base URL for `host`. Always HTTPS: an explicit `https://` prefix is kept
/// as given, a plain `http://` one is upgraded to the secure port.
pub fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("https://") {
        return host.to_string();
    }
    let bare = match host.strip_prefix("http://") {
        Some(rest) => {
            warn!(host, "plain http is not supported, connecting over https");
            rest.split(':').next().unwrap_or(rest)
        }
        None => host,
    };
    format!("https://{}:{}", bare, SECURE_PORT)
}

/// Blocking HTTP client bound to one OMERO.web server. Holds the cookie
/// store for the Django session and the CSRF token needed for POSTs.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    csrf_token: Option<String>,
}

/// Generic `{"data": ...}` wrapper used by the JSON API.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize, Debug)]
struct ServerEntry {
    id: i64,
}

/// Login form payload.
#[derive(Serialize, Debug)]
struct LoginForm<'a> {
    server: i64,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize, Debug)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "eventContext")]
    event_context: Option<EventContext>,
    #[serde(default)]
    message: Option<String>,
}

/// Identity and group context returned by a successful login.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "groupId")]
    pub group_id: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct GroupEntry {
    #[serde(rename = "@id")]
    id: i64,
    #[serde(rename = "Name")]
    name: String,
}

impl ApiClient {
    /// Create a client for `host` with a cookie store enabled.
    pub fn new(host: &str) -> Result<Self> {
        Self::with_base_url(base_url(host))
    }

    fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(ApiClient {
            client,
            base_url,
            csrf_token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Headers Django's CSRF check wants on unsafe requests.
    fn csrf_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.csrf_token {
            if let Ok(val) = HeaderValue::from_str(token) {
                headers.insert(CSRF_HEADER, val);
            }
        }
        if let Ok(referer) = HeaderValue::from_str(&self.url("/")) {
            headers.insert(REFERER, referer);
        }
        headers
    }

    /// Turn a non-success status into `ImportError::Server` with the body.
    fn check(res: Response, operation: &'static str) -> Result<Response> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().unwrap_or_default();
        Err(ImportError::Server {
            operation,
            status,
            body,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, operation: &'static str) -> Result<T> {
        let res = self.client.get(self.url(path)).send()?;
        Ok(Self::check(res, operation)?.json()?)
    }

    /// Fetch and remember the CSRF token.
    pub fn fetch_csrf_token(&mut self) -> Result<()> {
        let token: Envelope<String> = self.get_json("/api/v0/token/", "Fetch CSRF token")?;
        self.csrf_token = Some(token.data);
        Ok(())
    }

    /// ID of the first OMERO server configured behind this web host.
    pub fn first_server_id(&self) -> Result<i64> {
        let servers: Envelope<Vec<ServerEntry>> = self.get_json("/api/v0/servers/", "List servers")?;
        Ok(servers.data.first().map(|s| s.id).unwrap_or(1))
    }

    /// Perform the login handshake and return the session's event context.
    pub fn login(&mut self, username: &str, password: &str) -> Result<EventContext> {
        self.fetch_csrf_token()?;
        let server = self.first_server_id()?;
        let form = LoginForm {
            server,
            username,
            password,
        };
        let res = self
            .client
            .post(self.url("/api/v0/login/"))
            .headers(self.csrf_headers())
            .form(&form)
            .send()?;
        let status = res.status().as_u16();
        let resp: LoginResponse = res.json()?;
        match resp.event_context {
            Some(context) if resp.success => Ok(context),
            _ => Err(ImportError::Server {
                operation: "Login",
                status,
                body: resp.message.unwrap_or_else(|| "login rejected".into()),
            }),
        }
    }

    /// Groups `user_id` is a member of, excluding the system `user` group.
    pub fn experimenter_groups(&self, user_id: i64) -> Result<Vec<Group>> {
        let path = format!("/api/v0/m/experimenters/{}/experimentergroups/", user_id);
        let groups: Envelope<Vec<GroupEntry>> = self.get_json(&path, "List groups")?;
        Ok(groups
            .data
            .into_iter()
            .filter(|g| g.name != SYSTEM_USER_GROUP)
            .map(|g| Group {
                id: g.id,
                name: g.name,
            })
            .collect())
    }

    /// Switch the web session's active group.
    pub fn switch_group(&self, group_id: i64) -> Result<()> {
        let res = self
            .client
            .get(self.url("/webclient/active_group/"))
            .query(&[("active_group", group_id)])
            .send()?;
        Self::check(res, "Switch group")?;
        Ok(())
    }

    /// Save one rectangle on `image_id` through the iviewer ROI endpoint.
    pub fn persist_rectangle(&self, image_id: i64, rect: &Rectangle) -> Result<()> {
        let payload = persist_payload(image_id, rect);
        debug!(%payload, "persisting ROI");
        let res = self
            .client
            .post(self.url("/iviewer/persist_rois/"))
            .headers(self.csrf_headers())
            .json(&payload)
            .send()?;
        let res = Self::check(res, "Add ROI")?;
        let body: Value = res.json()?;
        if let Some(err) = body.get("error") {
            return Err(ImportError::Server {
                operation: "Add ROI",
                status: 200,
                body: err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string()),
            });
        }
        Ok(())
    }

    pub fn keepalive_ping(&self) -> Result<()> {
        let res = self.client.get(self.url("/webclient/keepalive_ping/")).send()?;
        Self::check(res, "Keep-alive")?;
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        let res = self
            .client
            .post(self.url("/webclient/logout/"))
            .headers(self.csrf_headers())
            .send()?;
        Self::check(res, "Logout")?;
        Ok(())
    }
}

/// JSON body for `/iviewer/persist_rois/` carrying a single new ROI. The
/// shape has no `TheZ`/`TheT`, so it applies to every plane.
pub fn persist_payload(image_id: i64, rect: &Rectangle) -> Value {
    let shape = json!({
        "@type": RECTANGLE_TYPE,
        "oldId": "-1:-1",
        "X": rect.x,
        "Y": rect.y,
        "Width": rect.width,
        "Height": rect.height,
        "Text": rect.label,
    });
    json!({
        "imageId": image_id,
        "rois": {
            "count": 1,
            "new": [shape],
            "modified": [],
            "deleted": {},
            "empty_rois": {},
            "new_and_deleted": [],
        }
    })
}

/// Background ticker pinging the server until stopped.
#[derive(Debug)]
struct KeepAlive {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    fn start(api: ApiClient, interval: Duration) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("omero-keepalive".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = api.keepalive_ping() {
                            warn!(error = %e, "keep-alive ping failed");
                        }
                    }
                    _ => break,
                }
            });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "could not start keep-alive thread");
                None
            }
        };
        KeepAlive { stop, handle }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Opens `OmeroSession`s.
#[derive(Debug, Clone)]
pub struct OmeroConnector {
    keepalive: Duration,
}

impl OmeroConnector {
    pub fn new(config: &Config) -> Self {
        OmeroConnector {
            keepalive: config.keepalive,
        }
    }
}

impl Connector for OmeroConnector {
    type Session = OmeroSession;

    fn open_session(&self, credentials: &Credentials) -> Result<OmeroSession> {
        let connection_error = |e: ImportError| ImportError::Connection {
            host: credentials.host.clone(),
            reason: e.to_string(),
        };

        let mut api = ApiClient::new(&credentials.host).map_err(connection_error)?;
        info!(url = api.base_url(), user = %credentials.username, "connecting");
        let context = api
            .login(&credentials.username, &credentials.password)
            .map_err(connection_error)?;
        info!(user_id = context.user_id, group_id = ?context.group_id, "logged in");

        let keepalive = KeepAlive::start(api.clone(), self.keepalive);
        Ok(OmeroSession {
            api,
            user_id: context.user_id,
            active_group: context.group_id,
            keepalive: Some(keepalive),
            closed: false,
        })
    }
}

/// Logged-in session against an OMERO.web server.
#[derive(Debug)]
pub struct OmeroSession {
    api: ApiClient,
    user_id: i64,
    active_group: Option<i64>,
    keepalive: Option<KeepAlive>,
    closed: bool,
}

impl RemoteSession for OmeroSession {
    fn list_groups(&self) -> Result<Vec<Group>> {
        self.api.experimenter_groups(self.user_id)
    }

    fn active_group(&self) -> Option<i64> {
        self.active_group
    }

    fn set_active_group(&mut self, group_id: i64) -> Result<()> {
        if self.active_group == Some(group_id) {
            debug!(group_id, "group already active");
            return Ok(());
        }
        self.api.switch_group(group_id)?;
        self.active_group = Some(group_id);
        Ok(())
    }

    fn submit_rectangle(&self, image_id: i64, rect: &Rectangle) -> Result<()> {
        self.api.persist_rectangle(image_id, rect)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Stop pinging before the session goes away.
        drop(self.keepalive.take());
        match self.api.logout() {
            Ok(()) => info!("logged out"),
            Err(e) => warn!(error = %e, "logout failed"),
        }
    }
}

impl Drop for OmeroSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Local HTTP server answering every request with an empty 200 and
    /// recording its request line.
    fn local_server() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let Ok(reader) = stream.try_clone() else { continue };
                let mut reader = BufReader::new(reader);
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let mut content_length = 0usize;
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap_or(0) == 0 || header == "\r\n" {
                        break;
                    }
                    if let Some(v) = header.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body);
                log.lock().unwrap().push(request_line.trim_end().to_string());
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
            }
        });
        (url, seen)
    }

    fn count(seen: &Arc<Mutex<Vec<String>>>, path: &str) -> usize {
        seen.lock().unwrap().iter().filter(|l| l.contains(path)).count()
    }

    fn session_at(url: String, active_group: Option<i64>) -> OmeroSession {
        OmeroSession {
            api: ApiClient::with_base_url(url).unwrap(),
            user_id: 52,
            active_group,
            keepalive: None,
            closed: false,
        }
    }

    #[test]
    fn switching_to_the_active_group_sends_nothing() {
        let (url, seen) = local_server();
        let mut session = session_at(url, Some(3));

        session.set_active_group(3).unwrap();
        session.set_active_group(5).unwrap();
        session.set_active_group(5).unwrap();

        assert_eq!(session.active_group(), Some(5));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["GET /webclient/active_group/?active_group=5 HTTP/1.1".to_string()]
        );
    }

    #[test]
    fn session_logs_out_exactly_once() {
        let (url, seen) = local_server();
        let mut session = session_at(url, Some(3));

        session.close();
        session.close();
        drop(session);

        assert_eq!(count(&seen, "/webclient/logout/"), 1);
    }

    #[test]
    fn unreachable_host_is_a_connection_error() {
        let connector = OmeroConnector::new(&Config::default());
        let credentials = Credentials::new(
            Some("https://127.0.0.1:1".into()),
            Some("jo".into()),
            Some("secret".into()),
        )
        .unwrap();

        let err = connector.open_session(&credentials).unwrap_err();
        assert!(matches!(err, ImportError::Connection { ref host, .. } if host == "https://127.0.0.1:1"));
    }

    #[test]
    fn keepalive_pings_until_dropped() {
        let (url, seen) = local_server();
        let api = ApiClient::with_base_url(url).unwrap();
        let keepalive = KeepAlive::start(api, Duration::from_millis(20));

        let deadline = Instant::now() + Duration::from_secs(5);
        while count(&seen, "/webclient/keepalive_ping/") < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        drop(keepalive);
        let pings = count(&seen, "/webclient/keepalive_ping/");
        assert!(pings >= 2, "only {pings} pings");

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count(&seen, "/webclient/keepalive_ping/"), pings);
    }

    #[test]
    fn base_url_uses_fixed_secure_port() {
        assert_eq!(base_url("omero.example.org"), "https://omero.example.org:443");
        assert_eq!(base_url(" omero.example.org/ "), "https://omero.example.org:443");
        assert_eq!(base_url("https://omero.example.org/"), "https://omero.example.org");
        assert_eq!(base_url("http://localhost:4080/"), "https://localhost:443");
        assert_eq!(base_url("http://omero.example.org"), "https://omero.example.org:443");
    }

    #[test]
    fn payload_has_no_plane_for_all_layer_rectangles() {
        let rect = Rectangle::all_layers(10, 20, 30, 40, "5");
        let payload = persist_payload(1, &rect);
        assert_eq!(payload["imageId"], json!(1));
        assert_eq!(payload["rois"]["count"], json!(1));
        let shape = &payload["rois"]["new"][0];
        assert_eq!(shape["@type"], json!(RECTANGLE_TYPE));
        assert_eq!(shape["X"], json!(10));
        assert_eq!(shape["Y"], json!(20));
        assert_eq!(shape["Width"], json!(30));
        assert_eq!(shape["Height"], json!(40));
        assert_eq!(shape["Text"], json!("Rectangle 5"));
        assert!(shape.get("TheZ").is_none());
    }


    #[test]
    fn login_response_parses_event_context() {
        let resp: LoginResponse = serde_json::from_str(
            r#"{"success": true, "eventContext": {"userId": 52, "groupId": 3, "userName": "jo"}}"#,
        )
        .unwrap();
        assert!(resp.success);
        assert_eq!(
            resp.event_context,
            Some(EventContext {
                user_id: 52,
                group_id: Some(3)
            })
        );

        let failed: LoginResponse =
            serde_json::from_str(r#"{"message": "Connection not available"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.message.as_deref(), Some("Connection not available"));
    }

    #[test]
    fn group_entries_use_json_ld_ids() {
        let groups: Envelope<Vec<GroupEntry>> = serde_json::from_str(
            r#"{"data": [{"@id": 1, "Name": "lab-A"}, {"@id": 0, "Name": "system"}]}"#,
        )
        .unwrap();
        assert_eq!(groups.data[0].id, 1);
        assert_eq!(groups.data[1].name, "system");
    }
}
