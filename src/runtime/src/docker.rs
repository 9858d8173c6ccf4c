//! Docker Engine API client.
//!
//! Speaks plain HTTP/1.1 to the daemon over its Unix socket (or a TCP
//! endpoint). Each call opens its own connection, so one client can be
//! shared by every in-flight request.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::TryStreamExt;
use hyper::client::conn;
use hyper::header::HOST;
use hyper::{Body, Method, Request, Response};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::io::StreamReader;

use packer_core::error::{PackerError, Result};

use crate::engine::{ByteStream, ImageRuntime};

/// Where the Docker daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// Unix domain socket path
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl DockerEndpoint {
    /// Parse a `DOCKER_HOST`-style value.
    ///
    /// Supports `unix:///path`, `tcp://host:port`, `http://host:port`
    /// and bare absolute socket paths.
    pub fn parse(host: &str) -> Result<Self> {
        let host = host.trim();
        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(PackerError::Config(format!(
                    "Empty socket path in docker host '{}'",
                    host
                )));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
        {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(PackerError::Config(format!(
                    "Empty address in docker host '{}'",
                    host
                )));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        if host.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(host)));
        }
        Err(PackerError::Config(format!(
            "Unsupported docker host '{}' (expected unix:// or tcp://)",
            host
        )))
    }
}

impl std::fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Error body returned by the daemon on non-success responses.
#[derive(Debug, Deserialize)]
struct DaemonMessage {
    message: String,
}

/// Client for the Docker Engine HTTP API.
#[derive(Debug, Clone)]
pub struct DockerClient {
    endpoint: DockerEndpoint,
    /// Negotiated API version; unversioned paths are used when unknown
    api_version: Option<String>,
}

impl DockerClient {
    /// Create a client without contacting the daemon.
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self {
            endpoint,
            api_version: None,
        }
    }

    /// Connect to the daemon, verifying it answers and negotiating the API version.
    pub async fn connect(endpoint: DockerEndpoint) -> Result<Self> {
        let mut client = Self::new(endpoint);
        client.api_version = client.ping().await?;
        tracing::info!(
            endpoint = %client.endpoint,
            api_version = client.api_version.as_deref().unwrap_or("unversioned"),
            "Connected to Docker daemon"
        );
        Ok(client)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// Ping the daemon, returning the API version it advertises.
    pub async fn ping(&self) -> Result<Option<String>> {
        let response = self.request(Method::GET, "/_ping").await?;
        Ok(response
            .headers()
            .get("api-version")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()))
    }

    /// Build a request path, prefixed with the negotiated API version.
    fn versioned(&self, path: &str) -> String {
        match &self.api_version {
            Some(version) => format!("/v{}{}", version, path),
            None => path.to_string(),
        }
    }

    /// Send a body-less request, failing on non-success status.
    async fn request(&self, method: Method, path: &str) -> Result<Response<Body>> {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "docker")
            .body(Body::empty())
            .map_err(|e| PackerError::Connection(format!("Invalid request {}: {}", path, e)))?;

        let response = match &self.endpoint {
            DockerEndpoint::Unix(socket) => {
                let io = UnixStream::connect(socket).await.map_err(|e| {
                    PackerError::Connection(format!(
                        "cannot connect to {}: {}",
                        socket.display(),
                        e
                    ))
                })?;
                send(io, request).await?
            }
            DockerEndpoint::Tcp(addr) => {
                let io = TcpStream::connect(addr.as_str()).await.map_err(|e| {
                    PackerError::Connection(format!("cannot connect to {}: {}", addr, e))
                })?;
                send(io, request).await?
            }
        };

        if !response.status().is_success() {
            return Err(daemon_error(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageRuntime for DockerClient {
    async fn pull(&self, reference: &str) -> Result<ByteStream> {
        let (name, tag) = split_tag(reference);
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("fromImage", name)
            .append_pair("tag", tag)
            .finish();
        let path = self.versioned(&format!("/images/create?{}", query));
        tracing::debug!(reference, path = %path, "Requesting image pull");
        let response = self.request(Method::POST, &path).await?;
        Ok(into_byte_stream(response.into_body()))
    }

    async fn export(&self, references: &[String]) -> Result<ByteStream> {
        let query = {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for reference in references {
                let (name, tag) = split_tag(reference);
                query.append_pair("names", &format!("{}:{}", name, tag));
            }
            query.finish()
        };
        let path = self.versioned(&format!("/images/get?{}", query));
        tracing::debug!(references = ?references, path = %path, "Requesting image export");
        let response = self.request(Method::GET, &path).await?;
        Ok(into_byte_stream(response.into_body()))
    }
}

/// Split a reference into repository and tag.
///
/// Only a `:` in the last path component separates a tag, so a registry
/// port (`localhost:5000/app`) stays part of the repository. A reference
/// without a tag gets `latest`; the daemon would otherwise pull every tag.
fn split_tag(reference: &str) -> (&str, &str) {
    let last_component = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[last_component..].rfind(':') {
        Some(i) => {
            let colon = last_component + i;
            (&reference[..colon], &reference[colon + 1..])
        }
        None => (reference, crate::reference::DEFAULT_TAG),
    }
}

/// Run one HTTP/1.1 exchange over an established connection.
async fn send<T>(io: T, request: Request<Body>) -> Result<Response<Body>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = conn::handshake(io)
        .await
        .map_err(|e| PackerError::Connection(format!("handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Docker connection closed with error");
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| PackerError::Connection(format!("request failed: {}", e)))
}

/// Convert a non-success response into a daemon error.
async fn daemon_error(response: Response<Body>) -> PackerError {
    let status = response.status().as_u16();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap_or_default();
    PackerError::Daemon {
        status,
        message: daemon_message(&body),
    }
}

/// Extract the daemon's `message` field, falling back to the raw body.
fn daemon_message(body: &[u8]) -> String {
    match serde_json::from_slice::<DaemonMessage>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

fn into_byte_stream(body: Body) -> ByteStream {
    let stream = body.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    Box::pin(StreamReader::new(stream))
}
