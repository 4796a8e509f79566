//! HTTP delivery of encoded lines to the ingestion endpoint.

mod errors;

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
pub use errors::DeliveryError;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::CONTENT_ENCODING;
use reqwest::header::CONTENT_TYPE;
use reqwest::Certificate;
use reqwest::Client;
use reqwest::Proxy;
use reqwest::StatusCode;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::metrics::encoders::WireLine;

pub const CONTENT_TYPE_LOG: &str = "text/plain";
pub const CONTENT_TYPE_CARBON2: &str = "application/vnd.sumologic.carbon2";
pub const HEADER_CATEGORY: &str = "X-Sumo-Category";
pub const HEADER_NAME: &str = "X-Sumo-Name";
pub const HEADER_HOST: &str = "X-Sumo-Host";
pub const HEADER_CLIENT: &str = "X-Sumo-Client";
pub const CLIENT_NAME: &str = "docker-metrics-plugin";
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives the lines of one family in a single call.
pub trait LineSink: Send + Sync + 'static {
    fn deliver(
        &self,
        lines: &[WireLine],
    ) -> impl Future<Output = Result<(), Report<DeliveryError>>> + Send;
}

/// How the ingestion endpoint should interpret the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentMode {
    /// lines are ingested as plain log text
    Log,
    #[default]
    Carbon2,
}

impl ContentMode {
    pub fn from_as_log(as_log: bool) -> Self {
        if as_log {
            Self::Log
        } else {
            Self::Carbon2
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Log => CONTENT_TYPE_LOG,
            Self::Carbon2 => CONTENT_TYPE_CARBON2,
        }
    }
}

/// Values of the identification headers sent with every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceIdentity {
    pub category: String,
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub url: Url,
    pub content_mode: ContentMode,
    pub compress: bool,
    pub identity: SourceIdentity,
    /// PEM bundle replacing the built-in trust roots
    pub root_ca_pem: Option<Vec<u8>>,
    pub proxy_url: Option<Url>,
    pub timeout: Duration,
}

impl DeliverySettings {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            content_mode: ContentMode::default(),
            compress: true,
            identity: SourceIdentity::default(),
            root_ca_pem: None,
            proxy_url: None,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Trust anchors for HTTPS endpoints.
enum TrustRoots {
    BuiltIn,
    /// replaces the built-in roots entirely
    Custom(Vec<Certificate>),
}

/// An unusable bundle falls back to the built-in roots.
fn trust_roots(pem: Option<&[u8]>) -> TrustRoots {
    let Some(pem) = pem else {
        return TrustRoots::BuiltIn;
    };
    match Certificate::from_pem_bundle(pem) {
        Ok(certs) if !certs.is_empty() => TrustRoots::Custom(certs),
        Ok(_) => {
            warn!("Root CA bundle holds no certificate, using built-in roots");
            TrustRoots::BuiltIn
        }
        Err(e) => {
            warn!("Invalid root CA bundle, using built-in roots: {e}");
            TrustRoots::BuiltIn
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryClient {
    http: Client,
    settings: DeliverySettings,
}

impl DeliveryClient {
    pub fn new(settings: DeliverySettings) -> Result<Self, Report<DeliveryError>> {
        let mut builder = Client::builder().use_rustls_tls().timeout(settings.timeout);

        builder = match trust_roots(settings.root_ca_pem.as_deref()) {
            TrustRoots::BuiltIn => builder,
            TrustRoots::Custom(certs) => {
                info!(count = certs.len(), "Trusting only the configured root certificates");
                certs
                    .into_iter()
                    .fold(builder.tls_built_in_root_certs(false), |builder, cert| {
                        builder.add_root_certificate(cert)
                    })
            }
        };

        builder = match &settings.proxy_url {
            Some(proxy_url) => match Proxy::all(proxy_url.as_str()) {
                Ok(proxy) => builder.proxy(proxy),
                Err(e) => {
                    warn!(proxy = %proxy_url, "Ignoring proxy: {e}");
                    builder.no_proxy()
                }
            },
            None => builder.no_proxy(),
        };

        let http = builder.build().change_context(DeliveryError::ClientBuild)?;
        Ok(Self { http, settings })
    }

    /// POST an empty plain text body; anything but HTTP 200 means the
    /// endpoint cannot be used.
    pub async fn check_connectivity(&self) -> Result<(), Report<DeliveryError>> {
        let request = self
            .identified(self.http.post(self.settings.url.clone()))
            .header(CONTENT_TYPE, CONTENT_TYPE_LOG)
            .body(Vec::new());
        self.send(request)
            .await
            .change_context_lazy(|| DeliveryError::Connectivity {
                url: self.settings.url.to_string(),
            })?;
        info!(url = %self.settings.url, "Ingestion endpoint is reachable");
        Ok(())
    }

    /// POST `lines` as one body.
    pub async fn deliver_lines(&self, lines: &[WireLine]) -> Result<(), Report<DeliveryError>> {
        let body = render_body(lines);
        let mut request = self
            .identified(self.http.post(self.settings.url.clone()))
            .header(CONTENT_TYPE, self.settings.content_mode.content_type());

        request = if self.settings.compress {
            request
                .header(CONTENT_ENCODING, "gzip")
                .body(gzip(body.as_bytes())?)
        } else {
            request.body(body)
        };

        self.send(request)
            .await
            .attach_printable_lazy(|| format!("lines: {}", lines.len()))
    }

    fn identified(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let identity = &self.settings.identity;
        request
            .header(HEADER_CATEGORY, &identity.category)
            .header(HEADER_NAME, &identity.name)
            .header(HEADER_HOST, &identity.host)
            .header(HEADER_CLIENT, CLIENT_NAME)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), Report<DeliveryError>> {
        let response = request.send().await.map_err(|e| {
            let context = if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Transport
            };
            Report::new(e).change_context(context)
        })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        Err(Report::new(DeliveryError::Status {
            status: status.as_u16(),
            body,
        }))
    }
}

impl LineSink for DeliveryClient {
    async fn deliver(&self, lines: &[WireLine]) -> Result<(), Report<DeliveryError>> {
        self.deliver_lines(lines).await
    }
}

/// Every line followed by a newline.
pub fn render_body(lines: &[WireLine]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(&line.to_string());
        body.push('\n');
    }
    body
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, Report<DeliveryError>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .change_context(DeliveryError::Compress)?;
    encoder.finish().change_context(DeliveryError::Compress)
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::atomic::AtomicU16;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;

    use flate2::read::GzDecoder;
    use poem::handler;
    use poem::http::HeaderMap;
    use poem::listener::TcpAcceptor;
    use poem::post;
    use poem::web::Data;
    use poem::EndpointExt;
    use poem::Request;
    use poem::Response;
    use poem::Route;
    use poem::Server;
    use similar_asserts::assert_eq;
    use test_log::test;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio_rustls::rustls::crypto::ring;
    use tokio_rustls::rustls::pki_types::pem::PemObject;
    use tokio_rustls::rustls::pki_types::CertificateDer;
    use tokio_rustls::rustls::pki_types::PrivateKeyDer;
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::TlsAcceptor;

    use super::*;

    const CA_PEM: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/ca.pem"));
    const OTHER_CA_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/other-ca.pem"));
    const SERVER_CERT_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/localhost.pem"));
    const SERVER_KEY_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/localhost.key"));

    #[derive(Debug, Clone)]
    struct Captured {
        uri: String,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    impl Captured {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).and_then(|v| v.to_str().ok())
        }

        fn text(&self) -> String {
            if self.header("content-encoding") == Some("gzip") {
                let mut text = String::new();
                GzDecoder::new(self.body.as_slice())
                    .read_to_string(&mut text)
                    .expect("valid gzip body");
                text
            } else {
                String::from_utf8(self.body.clone()).expect("utf8 body")
            }
        }
    }

    #[derive(Clone)]
    struct Ingest {
        requests: Arc<Mutex<Vec<Captured>>>,
        status: Arc<AtomicU16>,
    }

    impl Ingest {
        fn captured(&self) -> Vec<Captured> {
            self.requests.lock().expect("poisoned").clone()
        }
    }

    #[handler]
    fn ingest_handler(req: &Request, body: Vec<u8>, Data(state): Data<&Ingest>) -> Response {
        state.requests.lock().expect("poisoned").push(Captured {
            uri: req.uri().to_string(),
            headers: req.headers().clone(),
            body,
        });
        let status = state.status.load(Ordering::SeqCst);
        Response::builder()
            .status(poem::http::StatusCode::from_u16(status).expect("valid status"))
            .body("backend says no")
    }

    async fn start_ingest(status: u16) -> (Url, Ingest) {
        let state = Ingest {
            requests: Arc::default(),
            status: Arc::new(AtomicU16::new(status)),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("local addr");
        let acceptor = TcpAcceptor::from_tokio(listener).expect("acceptor");
        let app = Route::new()
            .at("/receiver/v1/http/token", post(ingest_handler))
            .data(state.clone());
        tokio::spawn(Server::new_with_acceptor(acceptor).run(app));

        let url = Url::parse(&format!("http://{addr}/receiver/v1/http/token")).expect("url");
        (url, state)
    }

    fn settings(url: Url) -> DeliverySettings {
        DeliverySettings {
            identity: SourceIdentity {
                category: "docker/metrics".into(),
                name: "engine".into(),
                host: "node-1".into(),
            },
            ..DeliverySettings::new(url)
        }
    }

    fn lines() -> Vec<WireLine> {
        vec![
            WireLine::new(
                vec!["container=a".into(), "metric=cpu_usage".into()],
                vec!["host=x".into()],
                0.42,
                1_700_000_000_000,
            ),
            WireLine::new(vec!["metric=up".into()], Vec::new(), 1.0, 1_700_000_000_000),
        ]
    }

    #[test]
    fn content_type_follows_the_mode() {
        assert_eq!(ContentMode::from_as_log(true).content_type(), "text/plain");
        assert_eq!(
            ContentMode::from_as_log(false).content_type(),
            "application/vnd.sumologic.carbon2"
        );
    }

    #[test]
    fn body_is_newline_terminated_lines() {
        assert_eq!(
            render_body(&lines()),
            "container=a metric=cpu_usage  host=x 0.420000 1700000000000\nmetric=up 1.000000 1700000000000\n"
        );
    }

    #[test(tokio::test)]
    async fn delivers_compressed_lines_with_identity_headers() {
        let (url, ingest) = start_ingest(200).await;
        let client = DeliveryClient::new(settings(url)).expect("client");

        client.deliver(&lines()).await.expect("delivery should succeed");

        let captured = ingest.captured();
        assert_eq!(captured.len(), 1);
        let request = &captured[0];
        assert_eq!(request.header("content-type"), Some(CONTENT_TYPE_CARBON2));
        assert_eq!(request.header("content-encoding"), Some("gzip"));
        assert_eq!(request.header("x-sumo-category"), Some("docker/metrics"));
        assert_eq!(request.header("x-sumo-name"), Some("engine"));
        assert_eq!(request.header("x-sumo-host"), Some("node-1"));
        assert_eq!(request.header("x-sumo-client"), Some("docker-metrics-plugin"));
        assert_eq!(request.text(), render_body(&lines()));
    }

    #[test(tokio::test)]
    async fn uncompressed_log_mode() {
        let (url, ingest) = start_ingest(200).await;
        let client = DeliveryClient::new(DeliverySettings {
            content_mode: ContentMode::Log,
            compress: false,
            ..settings(url)
        })
        .expect("client");

        client.deliver(&lines()).await.expect("delivery should succeed");

        let request = &ingest.captured()[0];
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("content-encoding"), None);
        assert_eq!(request.text(), render_body(&lines()));
    }

    #[test(tokio::test)]
    async fn non_200_status_carries_the_body() {
        let (url, _ingest) = start_ingest(503).await;
        let client = DeliveryClient::new(settings(url)).expect("client");

        let err = client.deliver(&lines()).await.expect_err("should fail");
        match err.current_context() {
            DeliveryError::Status { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "backend says no");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test(tokio::test)]
    async fn connectivity_check_posts_an_empty_plain_body() {
        let (url, ingest) = start_ingest(200).await;
        let client = DeliveryClient::new(settings(url)).expect("client");

        client.check_connectivity().await.expect("endpoint is up");

        let request = &ingest.captured()[0];
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("content-encoding"), None);
        assert!(request.body.is_empty());
    }

    #[test(tokio::test)]
    async fn connectivity_check_fails_on_rejection() {
        let (url, _ingest) = start_ingest(401).await;
        let client = DeliveryClient::new(settings(url)).expect("client");

        let err = client.check_connectivity().await.expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            DeliveryError::Connectivity { .. }
        ));
    }

    #[test(tokio::test)]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let url = Url::parse(&format!("http://{addr}/")).expect("url");
        let client = DeliveryClient::new(settings(url)).expect("client");

        let err = client.deliver(&lines()).await.expect_err("should fail");
        assert!(matches!(err.current_context(), DeliveryError::Transport));
    }

    /// HTTPS endpoint presenting a `127.0.0.1` certificate signed by `ca.pem`.
    /// Every request is answered with an empty 200.
    async fn start_tls_ingest() -> Url {
        let certs = CertificateDer::pem_slice_iter(SERVER_CERT_PEM)
            .collect::<Result<Vec<_>, _>>()
            .expect("server certificate");
        let key = PrivateKeyDer::from_pem_slice(SERVER_KEY_PEM).expect("server key");
        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .expect("server config");
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = tls
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Url::parse(&format!("https://{addr}/receiver")).expect("url")
    }

    fn tls_client(url: Url, root_ca_pem: Option<&[u8]>) -> DeliveryClient {
        DeliveryClient::new(DeliverySettings {
            root_ca_pem: root_ca_pem.map(<[u8]>::to_vec),
            ..settings(url)
        })
        .expect("client")
    }

    #[test(tokio::test)]
    async fn configured_root_ca_is_trusted() {
        let url = start_tls_ingest().await;
        let client = tls_client(url, Some(CA_PEM));

        client
            .check_connectivity()
            .await
            .expect("certificate signed by the configured CA should verify");
    }

    #[test(tokio::test)]
    async fn private_ca_is_unknown_to_built_in_roots() {
        let url = start_tls_ingest().await;
        let client = tls_client(url, None);

        let err = client.check_connectivity().await.expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            DeliveryError::Connectivity { .. }
        ));
    }

    #[test(tokio::test)]
    async fn unrelated_root_ca_is_rejected() {
        let url = start_tls_ingest().await;
        let client = tls_client(url, Some(OTHER_CA_PEM));

        client
            .check_connectivity()
            .await
            .expect_err("only the configured roots are trusted");
    }

    #[test]
    fn valid_bundle_replaces_built_in_roots() {
        assert!(matches!(
            trust_roots(Some(CA_PEM)),
            TrustRoots::Custom(ref certs) if certs.len() == 1
        ));

        let bundle = [CA_PEM, OTHER_CA_PEM].concat();
        assert!(matches!(
            trust_roots(Some(&bundle)),
            TrustRoots::Custom(ref certs) if certs.len() == 2
        ));
    }

    #[test]
    fn unusable_bundle_keeps_built_in_roots() {
        assert!(matches!(trust_roots(None), TrustRoots::BuiltIn));
        assert!(matches!(
            trust_roots(Some(b"not a certificate")),
            TrustRoots::BuiltIn
        ));

        let url = Url::parse("https://collectors.example.com/receiver").expect("url");
        let client = DeliveryClient::new(DeliverySettings {
            root_ca_pem: Some(b"not a certificate".to_vec()),
            ..DeliverySettings::new(url)
        });
        assert!(client.is_ok());
    }

    #[test(tokio::test)]
    async fn requests_go_through_the_configured_proxy() {
        let (ingest_url, proxy) = start_ingest(200).await;
        let proxy_url = Url::parse(&ingest_url.origin().ascii_serialization()).expect("proxy url");
        let target =
            Url::parse("http://collectors.invalid/receiver/v1/http/token").expect("target url");
        let client = DeliveryClient::new(DeliverySettings {
            proxy_url: Some(proxy_url),
            ..settings(target.clone())
        })
        .expect("client");

        client.deliver(&lines()).await.expect("proxy accepts the lines");

        let captured = proxy.captured();
        assert_eq!(captured.len(), 1);
        let request = &captured[0];
        // forwarded requests carry the absolute target
        assert_eq!(request.uri, target.as_str());
        assert_eq!(request.header("host"), Some("collectors.invalid"));
        assert_eq!(request.header("x-sumo-client"), Some("docker-metrics-plugin"));
        assert_eq!(request.text(), render_body(&lines()));
    }
}
