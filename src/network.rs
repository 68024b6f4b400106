/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::HeaderMap, header::HeaderValue, header::ACCEPT, header::CONTENT_TYPE,
    Client as HttpClient, ClientBuilder as HttpClientBuilder, Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::HostEntry;
use crate::{jsonmap, BiosError, ManagementSession, SessionConnector};

pub const REDFISH_ENDPOINT: &str = "/redfish/v1";
const SESSIONS_ENDPOINT: &str = "SessionService/Sessions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MAX_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RedfishClientPoolBuilder {
    timeout: Duration,
    accept_invalid_certs: bool,
    max_retries: u32,
}

impl RedfishClientPoolBuilder {
    /// Prevents the Redfish Client from accepting self signed certificates
    /// and other invalid certificates.
    ///
    /// By default self signed certificates will be accepted, since BMCs usually
    /// use those.
    pub fn reject_invalid_certs(mut self) -> RedfishClientPoolBuilder {
        self.accept_invalid_certs = false;
        self
    }

    /// Overwrites the timeout that will be applied to every request
    pub fn timeout(mut self, timeout: Duration) -> RedfishClientPoolBuilder {
        self.timeout = timeout;
        self
    }

    /// How many times a read, logout or login that got no answer is sent again
    pub fn max_retries(mut self, max_retries: u32) -> RedfishClientPoolBuilder {
        self.max_retries = max_retries;
        self
    }

    /// Builds a Redfish Client Network Configuration
    pub fn build(&self) -> Result<RedfishClientPool, BiosError> {
        let http_client = HttpClientBuilder::new()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .timeout(self.timeout)
            .build()
            .map_err(|e| BiosError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(RedfishClientPool {
            http_client,
            max_retries: self.max_retries,
        })
    }
}

/// The endpoint that the redfish client connects to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP address of BMC
    pub host: String,
    /// BMC port. If absent the default HTTPS port 443 will be used
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
}

impl From<&HostEntry> for Endpoint {
    fn from(entry: &HostEntry) -> Self {
        Endpoint {
            host: entry.name.clone(),
            port: None,
            user: entry.user.clone(),
            password: entry.password.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedfishClientPool {
    http_client: HttpClient,
    max_retries: u32,
}

impl RedfishClientPool {
    /// Returns Builder for configuring a Redfish HTTP connection pool
    pub fn builder() -> RedfishClientPoolBuilder {
        RedfishClientPoolBuilder {
            timeout: DEFAULT_TIMEOUT,
            // BMCs often have a self-signed cert, so usually this has to be true
            accept_invalid_certs: true,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// A HTTP client for one BMC. No request is made until it is used.
    pub fn create_client(&self, endpoint: Endpoint) -> RedfishHttpClient {
        RedfishHttpClient::new(self.http_client.clone(), endpoint, self.max_retries)
    }
}

#[async_trait]
impl SessionConnector for RedfishClientPool {
    /// Logs in and discovers the server. Several HTTP calls are made before this returns.
    async fn connect(&self, host: &HostEntry) -> Result<Box<dyn ManagementSession>, BiosError> {
        let client = self.create_client(Endpoint::from(host));
        let session = crate::standard::RedfishSession::open(client).await?;
        Ok(Box::new(session))
    }
}

/// What came back from one request.
#[derive(Debug)]
pub struct Response<T> {
    pub status_code: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<T>,
}

/// A HTTP client which targets a single BMC
pub struct RedfishHttpClient {
    endpoint: Endpoint,
    http_client: HttpClient,
    max_retries: u32,
    auth_token: Option<String>,
}

impl RedfishHttpClient {
    pub fn new(http_client: HttpClient, endpoint: Endpoint, max_retries: u32) -> Self {
        Self {
            endpoint,
            http_client,
            max_retries,
            auth_token: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    /// Create a Redfish session. Later requests carry its `X-Auth-Token` instead of basic auth.
    /// Returns the session's path, needed to log out.
    pub async fn login(&mut self) -> Result<Option<String>, BiosError> {
        let mut creds = HashMap::new();
        creds.insert("UserName", self.endpoint.user.clone());
        creds.insert("Password", self.endpoint.password.clone());
        let resp = self.post(SESSIONS_ENDPOINT, creds).await?;

        let header = |name: &str| {
            resp.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        match header("X-Auth-Token") {
            Some(token) => self.auth_token = Some(token),
            None => warn!(
                "{}: BMC did not return a session token, using basic auth",
                self.endpoint.host
            ),
        }
        // Location may be a full URL or just the path
        Ok(header("Location").map(|loc| match loc.find(REDFISH_ENDPOINT) {
            Some(i) => loc[i..].to_string(),
            None => loc,
        }))
    }

    pub async fn logout(&self, session_location: &str) -> Result<(), BiosError> {
        self.delete(session_location).await.map(|_status_code| ())
    }

    pub async fn get<T>(&self, api: &str) -> Result<T, BiosError>
    where
        T: DeserializeOwned + ::std::fmt::Debug,
    {
        let resp = self.req::<T, ()>(Method::GET, api, None, None).await?;
        resp.body.ok_or(BiosError::NoContent)
    }

    pub async fn post<B>(&self, api: &str, data: B) -> Result<Response<serde_json::Value>, BiosError>
    where
        B: Serialize + ::std::fmt::Debug,
    {
        self.req(Method::POST, api, Some(data), None).await
    }

    pub async fn patch<B>(
        &self,
        api: &str,
        data: B,
        timeout: Option<Duration>,
    ) -> Result<StatusCode, BiosError>
    where
        B: Serialize + ::std::fmt::Debug,
    {
        let resp: Response<serde_json::Value> =
            self.req(Method::PATCH, api, Some(data), timeout).await?;
        Ok(resp.status_code)
    }

    pub async fn delete(&self, api: &str) -> Result<StatusCode, BiosError> {
        let resp: Response<serde_json::Value> =
            self.req::<_, ()>(Method::DELETE, api, None, None).await?;
        Ok(resp.status_code)
    }

    /// `api` is either an absolute Redfish path as found in `@odata.id` or a path
    /// relative to the service root.
    pub fn url(&self, api: &str) -> String {
        let authority = match self.endpoint.port {
            Some(p) => format!("{}:{}", self.endpoint.host, p),
            None => self.endpoint.host.clone(),
        };
        if api.starts_with('/') {
            format!("https://{authority}{api}")
        } else {
            format!("https://{authority}{REDFISH_ENDPOINT}/{api}")
        }
    }

    // All the HTTP requests happen from here.
    pub async fn req<T, B>(
        &self,
        method: Method,
        api: &str,
        body: Option<B>,
        override_timeout: Option<Duration>,
    ) -> Result<Response<T>, BiosError>
    where
        T: DeserializeOwned + ::std::fmt::Debug,
        B: Serialize + ::std::fmt::Debug,
    {
        let url = self.url(api);
        let body_enc = match body {
            Some(b) => {
                let body_enc =
                    serde_json::to_string(&b).map_err(|e| BiosError::JsonSerializeError {
                        url: url.clone(),
                        object_debug: format!("{b:?}"),
                        source: e,
                    })?;
                Some(body_enc)
            }
            None => None,
        };

        // A PATCH or action POST that timed out may still have been applied, so only
        // reads, logout and login are sent again.
        let max_retries = match &method {
            &Method::GET | &Method::DELETE => self.max_retries,
            &Method::POST if api == SESSIONS_ENDPOINT => self.max_retries,
            _ => 0,
        };
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            // Never log the login body, it carries the password
            let logged_body = match (&method, api == SESSIONS_ENDPOINT) {
                (&Method::POST, true) => "<credentials>",
                _ => body_enc.as_deref().unwrap_or_default(),
            };
            debug!("TX {} {} {}", method, url, logged_body);

            let mut req_b = self
                .http_client
                .request(method.clone(), &url)
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            req_b = match &self.auth_token {
                Some(token) => req_b.header("X-Auth-Token", token),
                None => req_b.basic_auth(&self.endpoint.user, Some(&self.endpoint.password)),
            };
            if let Some(t) = override_timeout {
                req_b = req_b.timeout(t);
            }
            if let Some(b) = &body_enc {
                req_b = req_b.body(b.clone());
            }
            match req_b.send().await {
                Ok(r) => break r,
                Err(e) if attempt <= max_retries => {
                    warn!(
                        "{}: {method} {url} failed ({e}), retry {attempt} of {max_retries}",
                        self.endpoint.host
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(BiosError::TransportError {
                        host: self.endpoint.host.clone(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        };

        let status_code = response.status();
        let headers = response.headers().clone();
        // read the body even if not status 2XX, because BMCs give useful error messages as JSON
        let response_body = response.text().await.map_err(|e| BiosError::NetworkError {
            url: url.clone(),
            source: e,
        })?;
        if response_body.is_empty() {
            debug!("RX {status_code}");
        } else {
            debug!("RX {status_code} {response_body}");
        }

        if status_code == StatusCode::UNAUTHORIZED || status_code == StatusCode::FORBIDDEN {
            let diagnostic = jsonmap::body_diagnostic(&response_body, &url);
            return Err(BiosError::AuthError {
                host: self.endpoint.host.clone(),
                url,
                status_code,
                diagnostic,
            });
        }
        if !status_code.is_success() {
            return Err(BiosError::HTTPErrorCode {
                url,
                status_code,
                response_body,
            });
        }

        let mut body = None;
        if !response_body.is_empty() {
            match serde_json::from_str(&response_body) {
                Ok(v) => body = Some(v),
                Err(e) => {
                    return Err(BiosError::JsonDeserializeError {
                        url,
                        body: response_body,
                        source: e,
                    });
                }
            }
        }
        Ok(Response {
            status_code,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn client(port: Option<u16>) -> RedfishHttpClient {
        let pool = RedfishClientPool::builder()
            .timeout(Duration::from_secs(5))
            .max_retries(0)
            .build()
            .unwrap();
        pool.create_client(Endpoint {
            host: "10.1.2.3".to_string(),
            port,
            user: "ADMIN".to_string(),
            password: "pw".to_string(),
        })
    }

    #[test]
    fn test_url_building() {
        let c = client(None);
        assert_eq!(c.url("Systems"), "https://10.1.2.3/redfish/v1/Systems");
        assert_eq!(
            c.url("/redfish/v1/Systems/1/Bios"),
            "https://10.1.2.3/redfish/v1/Systems/1/Bios"
        );
        assert_eq!(client(Some(8443)).url(""), "https://10.1.2.3:8443/redfish/v1/");
    }

    #[test]
    fn test_endpoint_from_host_entry() {
        let entry = HostEntry {
            name: "bmc1".to_string(),
            user: "root".to_string(),
            password: "calvin".to_string(),
        };
        let ep = Endpoint::from(&entry);
        assert_eq!(ep.host, "bmc1");
        assert_eq!(ep.port, None);
        assert_eq!(ep.user, "root");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let pool = RedfishClientPool::builder()
            .timeout(Duration::from_millis(200))
            .max_retries(0)
            .build()
            .unwrap();
        let c = pool.create_client(Endpoint {
            // TEST-NET-1, never routed
            host: "192.0.2.1".to_string(),
            port: Some(9),
            user: "u".to_string(),
            password: "p".to_string(),
        });
        let err = c.get::<serde_json::Value>("").await.unwrap_err();
        assert!(matches!(err, BiosError::TransportError { attempts: 1, .. }));
        assert!(err.is_connection_failure());
    }

    /// Accepts connections and never answers. Returns the port and the connection count.
    async fn hung_listener() -> (u16, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (port, count)
    }

    fn local_client(port: u16) -> RedfishHttpClient {
        let pool = RedfishClientPool::builder()
            .timeout(Duration::from_millis(300))
            .max_retries(2)
            .build()
            .unwrap();
        pool.create_client(Endpoint {
            host: "127.0.0.1".to_string(),
            port: Some(port),
            user: "u".to_string(),
            password: "p".to_string(),
        })
    }

    #[tokio::test]
    async fn test_write_to_hung_bmc_is_sent_once() {
        let (port, connections) = hung_listener().await;
        let c = local_client(port);
        let err = c
            .patch(
                "/redfish/v1/Systems/1/Bios/Settings",
                serde_json::json!({"Attributes": {"PowerProfile": "Performance"}}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BiosError::TransportError { attempts: 1, .. }));
        assert_eq!(connections.load(Ordering::SeqCst), 1);

        let err = c
            .post("/redfish/v1/Systems/1/Actions/ComputerSystem.Reset", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BiosError::TransportError { attempts: 1, .. }));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_from_hung_bmc_is_retried() {
        let (port, connections) = hung_listener().await;
        let err = local_client(port)
            .get::<serde_json::Value>("Systems/1/Bios")
            .await
            .unwrap_err();
        assert!(matches!(err, BiosError::TransportError { attempts: 3, .. }));
        assert_eq!(connections.load(Ordering::SeqCst), 3);
    }
}
