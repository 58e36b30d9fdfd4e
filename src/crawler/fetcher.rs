//! HTTP fetcher implementation
//!
//! This module defines the content-fetching contract the runtime consumes and a
//! reqwest-backed implementation:
//! - Building HTTP clients with a per-session cookie jar
//! - GET and form-encoded POST requests with optional referer
//! - Classifying responses as HTML or JSON
//! - SOCKS proxy, TLS-verification and dump-to-disk transport knobs

use crate::config::TransportConfig;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, Proxy};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors produced while fetching content
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Unparseable content from {url}: {message}")]
    Content { url: String, message: String },

    #[error("Probe failed for {url}: {reason}")]
    Probe { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Everything needed to issue one request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub url: Url,
    /// Query parameters for GET, form body for POST
    pub form: Vec<(String, String)>,
    pub referer: Option<String>,
}

impl RequestOptions {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            form: Vec::new(),
            referer: None,
        }
    }

    pub fn post(url: Url, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url,
            form,
            referer: None,
        }
    }

    pub fn with_form(mut self, form: Vec<(String, String)>) -> Self {
        self.form = form;
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// Undecoded response as returned by the transport
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Decodes the body as JSON when the content type says so, HTML otherwise
    pub fn into_result(self) -> Result<FetchResult, FetchError> {
        if self.content_type.contains("json") {
            let value = serde_json::from_slice(&self.body).map_err(|e| FetchError::Content {
                url: self.url.to_string(),
                message: e.to_string(),
            })?;
            Ok(FetchResult::Json {
                url: self.url,
                status: self.status,
                value,
            })
        } else {
            Ok(FetchResult::Html {
                url: self.url,
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }
}

/// Typed result of a fetch
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// An HTML document; parsed on demand because parsed DOMs are not `Send`
    Html { url: Url, status: u16, body: String },

    /// A decoded JSON body
    Json {
        url: Url,
        status: u16,
        value: serde_json::Value,
    },
}

impl FetchResult {
    /// Final URL after redirects
    pub fn url(&self) -> &Url {
        match self {
            Self::Html { url, .. } | Self::Json { url, .. } => url,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Html { status, .. } | Self::Json { status, .. } => *status,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    pub fn is_html(&self) -> bool {
        matches!(self, Self::Html { .. })
    }

    /// Converts a non-2xx result into [`FetchError::Status`]
    pub fn ensure_success(self) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                url: self.url().to_string(),
                status: self.status(),
            })
        }
    }

    /// The HTML body, if this is an HTML result
    pub fn html(&self) -> Option<&str> {
        match self {
            Self::Html { body, .. } => Some(body),
            Self::Json { .. } => None,
        }
    }
}

/// Performs requests on behalf of one browsing session
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Issues the request and returns the undecoded response
    async fn fetch_raw(&self, request: &RequestOptions) -> Result<RawResponse, FetchError>;

    /// Injects cookies (`name=value; other=value`) for `url` into the session jar
    fn set_cookies(&self, url: &Url, cookies: &str);

    /// Issues the request and decodes the response as HTML or JSON
    async fn fetch(&self, request: &RequestOptions) -> Result<FetchResult, FetchError> {
        self.fetch_raw(request).await?.into_result()
    }
}

/// Creates one fetcher (with its own cookie jar) per browsing session
pub trait FetcherFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn ContentFetcher>, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - Transport settings (timeouts, proxy, TLS verification)
/// * `jar` - Cookie jar owned by the session using this client
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use reqwest::cookie::Jar;
/// use sumi_trawl::config::TransportConfig;
/// use sumi_trawl::crawler::build_http_client;
///
/// let client = build_http_client(&TransportConfig::default(), Arc::new(Jar::default())).unwrap();
/// ```
pub fn build_http_client(config: &TransportConfig, jar: Arc<Jar>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .cookie_provider(jar)
        .danger_accept_invalid_certs(config.skip_tls_verify)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// reqwest-backed [`ContentFetcher`]
pub struct HttpFetcher {
    client: Client,
    jar: Arc<Jar>,
    dump_dir: Option<PathBuf>,
    dump_counter: AtomicU64,
}

impl HttpFetcher {
    pub fn new(config: &TransportConfig) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let client = build_http_client(config, Arc::clone(&jar))
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            jar,
            dump_dir: config.dump_dir.as_ref().map(PathBuf::from),
            dump_counter: AtomicU64::new(0),
        })
    }

    /// Writes the request and response to the dump directory
    async fn dump(&self, request: &RequestOptions, response: &RawResponse) -> Result<(), FetchError> {
        let Some(dir) = &self.dump_dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;

        let sequence = self.dump_counter.fetch_add(1, Ordering::SeqCst);
        let host = request.url.host_str().unwrap_or("unknown");
        let path = dir.join(format!("{:05}-{}.txt", sequence, host));

        let mut text = format!("{:?} {}\n", request.method, request.url);
        for (name, value) in &request.form {
            text.push_str(&format!("> {}={}\n", name, value));
        }
        text.push_str(&format!(
            "\n{} {} ({})\n\n",
            response.status, response.url, response.content_type
        ));
        text.push_str(&String::from_utf8_lossy(&response.body));

        tokio::fs::write(&path, text).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch_raw(&self, request: &RequestOptions) -> Result<RawResponse, FetchError> {
        let url = request.url.clone();
        let mut builder = match request.method {
            Method::Get => {
                let builder = self.client.get(url.clone());
                if request.form.is_empty() {
                    builder
                } else {
                    builder.query(&request.form)
                }
            }
            Method::Post => self.client.post(url.clone()).form(&request.form),
        };
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer.as_str());
        }

        tracing::debug!("{:?} {}", request.method, url);
        let response = builder.send().await.map_err(|e| classify_error(&url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_error(&url, e))?
            .to_vec();

        let raw = RawResponse {
            url: final_url,
            status,
            content_type,
            body,
        };

        if let Err(e) = self.dump(request, &raw).await {
            tracing::warn!("Failed to dump response for {}: {}", url, e);
        }

        Ok(raw)
    }

    fn set_cookies(&self, url: &Url, cookies: &str) {
        for cookie in cookies.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.jar.add_cookie_str(cookie, url);
        }
    }
}

/// Maps transport failures onto [`FetchError`]
fn classify_error(url: &Url, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source: error,
        }
    }
}

/// Factory producing [`HttpFetcher`]s from shared transport settings
#[derive(Debug, Clone)]
pub struct HttpFetcherFactory {
    config: TransportConfig,
}

impl HttpFetcherFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl FetcherFactory for HttpFetcherFactory {
    fn create(&self) -> Result<Arc<dyn ContentFetcher>, FetchError> {
        Ok(Arc::new(HttpFetcher::new(&self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&TransportConfig::default(), Arc::new(Jar::default()));
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_http_client_with_socks_proxy() {
        let config = TransportConfig {
            proxy: Some("socks5://127.0.0.1:9050".to_string()),
            skip_tls_verify: true,
            ..Default::default()
        };
        assert!(build_http_client(&config, Arc::new(Jar::default())).is_ok());
    }

    #[test]
    fn test_raw_response_classification() {
        let html = RawResponse {
            url: Url::parse("https://example.com/").unwrap(),
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            body: b"<p>hi</p>".to_vec(),
        };
        assert!(html.into_result().unwrap().is_html());

        let json = RawResponse {
            url: Url::parse("https://example.com/api").unwrap(),
            status: 200,
            content_type: "application/json".to_string(),
            body: br#"{"a": 1}"#.to_vec(),
        };
        match json.into_result().unwrap() {
            FetchResult::Json { value, .. } => assert_eq!(value["a"], 1),
            other => panic!("expected JSON, got {:?}", other),
        }

        let broken = RawResponse {
            url: Url::parse("https://example.com/api").unwrap(),
            status: 200,
            content_type: "application/json".to_string(),
            body: b"{not json".to_vec(),
        };
        assert!(matches!(
            broken.into_result(),
            Err(FetchError::Content { .. })
        ));
    }

    #[test]
    fn test_ensure_success() {
        let ok = FetchResult::Html {
            url: Url::parse("https://example.com/").unwrap(),
            status: 204,
            body: String::new(),
        };
        assert!(ok.ensure_success().is_ok());

        let missing = FetchResult::Html {
            url: Url::parse("https://example.com/").unwrap(),
            status: 404,
            body: String::new(),
        };
        assert!(matches!(
            missing.ensure_success(),
            Err(FetchError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_sends_query_and_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "ubuntu"))
            .and(header("referer", "https://example.com/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>ok</html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let request = RequestOptions::get(url(&server, "/search"))
            .with_form(vec![("q".to_string(), "ubuntu".to_string())])
            .with_referer("https://example.com/");
        let result = fetcher.fetch(&request).await.unwrap();

        assert_eq!(result.status(), 200);
        assert_eq!(result.html(), Some("<html>ok</html>"));
    }

    #[tokio::test]
    async fn test_post_sends_form_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("username=alice"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"ok": true}"#)
                    .insert_header("content-type", "application/json"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let request = RequestOptions::post(
            url(&server, "/login"),
            vec![("username".to_string(), "alice".to_string())],
        );
        match fetcher.fetch(&request).await.unwrap() {
            FetchResult::Json { value, .. } => assert_eq!(value["ok"], true),
            other => panic!("expected JSON, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_injected_cookies_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .and(header("cookie", "uid=42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let target = url(&server, "/private");

        let before = fetcher.fetch(&RequestOptions::get(target.clone())).await.unwrap();
        assert_eq!(before.status(), 403);

        fetcher.set_cookies(&target, "uid=42");
        let after = fetcher.fetch(&RequestOptions::get(target)).await.unwrap();
        assert_eq!(after.status(), 200);
    }

    #[tokio::test]
    async fn test_dump_dir_receives_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("dumped body"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = TransportConfig {
            dump_dir: Some(dir.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        fetcher
            .fetch(&RequestOptions::get(url(&server, "/page")))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let text = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("dumped body"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let result = fetcher
            .fetch(&RequestOptions::get(Url::parse("http://127.0.0.1:9/").unwrap()))
            .await;
        assert!(matches!(
            result,
            Err(FetchError::Transport { .. }) | Err(FetchError::Timeout { .. })
        ));
    }
}
