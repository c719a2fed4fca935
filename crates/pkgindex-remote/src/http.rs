use crate::RemoteError;
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully described request handed to an [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP round-trip.
///
/// Non-2xx statuses are returned as responses; only transport failures are
/// errors. Timeouts belong to the implementation.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError>;
}

/// `ureq`-backed transport.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn decorate<B>(mut req: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (k, v) in &request.query {
        req = req.query(k, v);
    }
    for (k, v) in &request.headers {
        req = req.header(k.as_str(), v.as_str());
    }
    req
}

impl HttpTransport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError> {
        tracing::debug!("{:?} {}", request.method, request.url);
        let result = match request.method {
            HttpMethod::Get => decorate(self.agent.get(&request.url), request).call(),
            HttpMethod::Post => {
                let body = request.body.as_deref().unwrap_or_default();
                decorate(self.agent.post(&request.url), request)
                    .header("Content-Type", "application/json")
                    .send(body)
            }
        };
        let resp = result.map_err(|e| RemoteError::Http(format!("{}: {e}", request.url)))?;

        let status = resp.status().as_u16();
        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// A captured HTTP request for header inspection.
    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    /// Serves canned `(status, body)` pairs keyed by path without query.
    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start(routes: Vec<(&str, u16, &str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
                routes
                    .into_iter()
                    .map(|(p, s, b)| (p.to_owned(), (s, b.to_owned())))
                    .collect(),
            );
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let method = parts[0].to_owned();
                        let path = parts[1].to_owned();

                        let mut content_length: usize = 0;
                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                            let lower = line.to_lowercase();
                            if let Some(val) = lower.strip_prefix("content-length: ") {
                                content_length = val.trim().parse().unwrap_or(0);
                            }
                        }

                        let mut body = vec![0u8; content_length];
                        if content_length > 0 {
                            let _ = reader.read_exact(&mut body);
                        }
                        reqs.lock().unwrap().push(CapturedRequest {
                            method,
                            path: path.clone(),
                            headers,
                            body,
                        });

                        let route = path.split('?').next().unwrap_or_default();
                        let (status, payload) = routes
                            .get(route)
                            .cloned()
                            .unwrap_or((404, String::new()));
                        let response = format!(
                            "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                            payload.len()
                        );
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[test]
    fn get_sends_query_and_headers() {
        let server = MockServer::start(vec![("/packageManifests/Foo", 200, "{}")]);
        let transport = UreqTransport::new();

        let mut request = HttpRequest::get(format!("{}/packageManifests/Foo", server.addr));
        request.query.push(("Version".to_owned(), "1.0".to_owned()));
        request
            .headers
            .push(("Contract-Version".to_owned(), "1.1.0".to_owned()));
        let response = transport.execute(&request).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, b"{}");

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "GET");
        assert_eq!(reqs[0].path, "/packageManifests/Foo?Version=1.0");
        assert_eq!(
            reqs[0].headers.get("contract-version").map(String::as_str),
            Some("1.1.0")
        );
    }

    #[test]
    fn post_delivers_json_body() {
        let server = MockServer::start(vec![("/manifestSearch", 200, r#"{"Data":[]}"#)]);
        let transport = UreqTransport::new();

        let request = HttpRequest::post(
            format!("{}/manifestSearch", server.addr),
            br#"{"MaximumResults":1}"#.to_vec(),
        );
        let response = transport.execute(&request).unwrap();
        assert_eq!(response.status, 200);

        let reqs = server.captured_requests();
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(reqs[0].body, br#"{"MaximumResults":1}"#);
        assert_eq!(
            reqs[0].headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn error_status_is_a_response_not_an_error() {
        let server = MockServer::start(vec![(
            "/packageManifests/Missing",
            404,
            r#"{"code":"404","message":"no package"}"#,
        )]);
        let transport = UreqTransport::new();
        let response = transport
            .execute(&HttpRequest::get(format!(
                "{}/packageManifests/Missing",
                server.addr
            )))
            .unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert!(String::from_utf8(response.body).unwrap().contains("no package"));
    }

    #[test]
    fn connection_refused_returns_error() {
        let transport = UreqTransport::with_timeout(Duration::from_secs(2));
        let result = transport.execute(&HttpRequest::get("http://127.0.0.1:1/information"));
        assert!(matches!(result, Err(RemoteError::Http(_))));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut request = HttpRequest::get("http://localhost/");
        request
            .headers
            .push(("ContinuationToken".to_owned(), "abc".to_owned()));
        assert_eq!(request.header("continuationtoken"), Some("abc"));
        assert_eq!(request.header("Authorization"), None);
    }
}
