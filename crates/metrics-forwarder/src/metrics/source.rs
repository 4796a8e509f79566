//! Client for the local metrics endpoint exposed on a Unix domain socket.

use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use http_body_util::BodyExt;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use super::exposition;
use super::family::MetricFamily;

pub const DEFAULT_METRICS_SOCKET: &str = "/run/docker/metrics.sock";
const METRICS_PATH: &str = "/metrics";
const METRICS_HOST: &str = "docker";

#[derive(Debug, Display)]
pub enum SourceError {
    #[display("failed to connect to metrics source")]
    Connect,
    #[display("metrics source request failed")]
    Request,
    #[display("metrics source {stage} timed out")]
    Timeout { stage: &'static str },
    #[display("metrics source responded with HTTP {status}")]
    Status { status: u16 },
    #[display("failed to parse metrics payload")]
    Parse,
}

impl core::error::Error for SourceError {}

/// Anything able to produce one snapshot of metric families per call.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Vec<MetricFamily>, Report<SourceError>>> + Send;
}

/// Timeouts applied to every poll.
#[derive(Debug, Clone, Copy)]
pub struct SourceTimeouts {
    pub connect: Duration,
    pub response_header: Duration,
    /// bound on the whole exchange, headers and body included
    pub request: Duration,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(100),
            response_header: Duration::from_millis(500),
            request: Duration::from_millis(500),
        }
    }
}

/// Issues `GET /metrics` over HTTP/1.1 on a Unix socket.
#[derive(Debug, Clone)]
pub struct MetricsSource {
    socket_path: PathBuf,
    timeouts: SourceTimeouts,
}

impl MetricsSource {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeouts: SourceTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SourceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Fetch the raw exposition payload.
    pub async fn fetch_payload(&self) -> Result<Bytes, Report<SourceError>> {
        let stream = timeout(self.timeouts.connect, UnixStream::connect(&self.socket_path))
            .await
            .change_context(SourceError::Timeout { stage: "connect" })?
            .change_context(SourceError::Connect)
            .attach_printable_lazy(|| format!("socket: {}", self.socket_path.display()))?;

        timeout(self.timeouts.request, self.exchange(stream))
            .await
            .change_context(SourceError::Timeout { stage: "request" })?
    }

    async fn exchange(&self, stream: UnixStream) -> Result<Bytes, Report<SourceError>> {
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .change_context(SourceError::Request)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("metrics source connection closed with error: {e}");
            }
        });

        let request = Request::get(METRICS_PATH)
            .header(header::HOST, METRICS_HOST)
            .header(header::ACCEPT, "text/plain")
            .body(Empty::<Bytes>::new())
            .change_context(SourceError::Request)?;

        let response = timeout(self.timeouts.response_header, sender.send_request(request))
            .await
            .change_context(SourceError::Timeout {
                stage: "response header",
            })?
            .change_context(SourceError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Report::new(SourceError::Status {
                status: status.as_u16(),
            }));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .change_context(SourceError::Request)?
            .to_bytes();
        Ok(body)
    }
}

impl SnapshotSource for MetricsSource {
    async fn fetch(&self) -> Result<Vec<MetricFamily>, Report<SourceError>> {
        let payload = self.fetch_payload().await?;
        let text = std::str::from_utf8(&payload).change_context(SourceError::Parse)?;
        exposition::parse(text).change_context(SourceError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    use super::*;

    /// Serve a single canned HTTP response on a fresh socket.
    fn serve_once(dir: &tempfile::TempDir, response: String) -> PathBuf {
        let path = dir.path().join("metrics.sock");
        let listener = UnixListener::bind(&path).expect("should bind socket");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("should accept");
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(response.as_bytes())
                .await
                .expect("should write response");
            let _ = stream.shutdown().await;
        });
        path
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test(tokio::test)]
    async fn fetches_and_parses_families() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = "# TYPE engine_daemon_engine_cpus_cpus gauge\nengine_daemon_engine_cpus_cpus 4\n";
        let path = serve_once(&dir, http_response("200 OK", body));

        let families = MetricsSource::new(&path)
            .fetch()
            .await
            .expect("should fetch families");
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "engine_daemon_engine_cpus_cpus");
    }

    #[test(tokio::test)]
    async fn non_success_status_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = serve_once(&dir, http_response("500 Internal Server Error", "boom"));

        let err = MetricsSource::new(&path)
            .fetch()
            .await
            .expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            SourceError::Status { status: 500 }
        ));
    }

    #[test(tokio::test)]
    async fn malformed_payload_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = serve_once(&dir, http_response("200 OK", "broken{ 1\n"));

        let err = MetricsSource::new(&path)
            .fetch()
            .await
            .expect_err("should fail");
        assert!(matches!(err.current_context(), SourceError::Parse));
    }

    #[test(tokio::test)]
    async fn missing_socket_is_a_connect_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MetricsSource::new(dir.path().join("absent.sock"))
            .fetch()
            .await
            .expect_err("should fail");
        assert!(matches!(err.current_context(), SourceError::Connect));
    }

    #[test(tokio::test)]
    async fn silent_server_hits_the_header_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metrics.sock");
        let listener = UnixListener::bind(&path).expect("should bind socket");
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.expect("should accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = MetricsSource::new(&path)
            .with_timeouts(SourceTimeouts {
                connect: Duration::from_millis(100),
                response_header: Duration::from_millis(50),
                request: Duration::from_millis(500),
            })
            .fetch()
            .await
            .expect_err("should time out");
        assert!(matches!(
            err.current_context(),
            SourceError::Timeout {
                stage: "response header"
            }
        ));
    }
}
