//! libpod REST client over the Podman API socket.
//!
//! One HTTP/1 connection per request, the same way the daemon CLI clients
//! talk to a Unix socket. Paths are relative to `/<api version>/libpod`,
//! where the version prefix follows the daemon's major version.

use crate::constants::{
    LIBPOD_API_MAJOR_VERSION, LIBPOD_API_VERSION, LIBPOD_LEGACY_API_VERSION, PODMAN_BACKEND,
};
use crate::error::{Error, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(Vec<u8>),
    Tar(Vec<u8>),
}

impl Payload {
    /// Serializes `value` as a JSON payload.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_vec(value)?))
    }

    fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some("application/json"),
            Self::Tar(_) => Some("application/x-tar"),
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Json(b) | Self::Tar(b) => Bytes::from(b),
        }
    }
}

#[derive(Deserialize)]
struct ServerVersion {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

/// Minimal libpod API client.
#[derive(Debug, Clone)]
pub struct LibpodClient {
    socket_path: PathBuf,
    timeout: Duration,
    api_version: &'static str,
}

impl LibpodClient {
    /// Creates a client for `socket_path`; `timeout` bounds the wait for
    /// response headers.
    pub fn new(socket_path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout,
            api_version: LIBPOD_API_VERSION,
        }
    }

    /// Uses the API prefix served by a daemon of `major` version.
    pub fn with_major_version(mut self, major: u64) -> Self {
        self.api_version = api_version_for(major);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn api_version(&self) -> &'static str {
        self.api_version
    }

    /// Asks the daemon for its version through the unversioned
    /// `/version` endpoint and returns the major component.
    pub async fn server_major_version(&self) -> Result<u64> {
        let response = self
            .send_raw(Method::GET, "/version", Payload::Empty, &[])
            .await?;
        let status = response.status();
        let body = collect(response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        parse_server_major(&body)
    }

    /// Sends a request and returns the response with its body unread.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
        headers: &[(&str, String)],
    ) -> Result<Response<Incoming>> {
        let versioned = format!("/{}/libpod{}", self.api_version, path);
        self.send_raw(method, &versioned, payload, headers).await
    }

    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
        headers: &[(&str, String)],
    ) -> Result<Response<Incoming>> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| Error::Connection {
                backend: PODMAN_BACKEND.to_string(),
                endpoint: self.socket_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::backend(PODMAN_BACKEND, format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("libpod connection closed: {}", e);
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header("Host", "d");
        if let Some(content_type) = payload.content_type() {
            builder = builder.header("Content-Type", content_type);
        }
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(Full::new(payload.into_bytes()))
            .map_err(|e| Error::Internal(format!("failed to build request: {}", e)))?;

        debug!("libpod {} {}", method, path);
        tokio::time::timeout(self.timeout, sender.send_request(request))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("{} {}", method, path),
                duration: self.timeout,
            })?
            .map_err(|e| Error::backend(PODMAN_BACKEND, format!("request failed: {}", e)))
    }

    /// Sends a request, fails on non-2xx, returns the response body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
        headers: &[(&str, String)],
    ) -> Result<Bytes> {
        let response = self.send(method, path, payload, headers).await?;
        let status = response.status();
        let body = collect(response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }

    /// Sends a request, fails on non-2xx, returns the unread body.
    pub async fn request_stream(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
        headers: &[(&str, String)],
    ) -> Result<Incoming> {
        let response = self.send(method, path, payload, headers).await?;
        let status = response.status();
        if !status.is_success() {
            let body = collect(response).await?;
            return Err(api_error(status, &body));
        }
        Ok(response.into_body())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.request(Method::GET, path, Payload::Empty, &[]).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, payload: Payload) -> Result<T> {
        let body = self.request(Method::POST, path, payload, &[]).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// POST ignoring the response body.
    pub async fn post(&self, path: &str, payload: Payload) -> Result<()> {
        self.request(Method::POST, path, payload, &[]).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<Bytes> {
        self.request(Method::DELETE, path, Payload::Empty, &[]).await
    }
}

async fn collect(response: Response<Incoming>) -> Result<Bytes> {
    Ok(response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::backend(PODMAN_BACKEND, format!("failed to read body: {}", e)))?
        .to_bytes())
}

/// Maps a non-success response to [`Error::Api`], keeping the daemon's
/// message when the body is a libpod error object.
pub fn api_error(status: StatusCode, body: &[u8]) -> Error {
    let message = match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) if !err.message.is_empty() => err.message,
        Ok(err) if !err.cause.is_empty() => err.cause,
        _ => String::from_utf8_lossy(body).trim().to_string(),
    };
    Error::Api {
        backend: PODMAN_BACKEND.to_string(),
        status: status.as_u16(),
        message,
    }
}

/// API path prefix for a daemon of `major` version.
pub fn api_version_for(major: u64) -> &'static str {
    if major >= LIBPOD_API_MAJOR_VERSION {
        LIBPOD_API_VERSION
    } else {
        LIBPOD_LEGACY_API_VERSION
    }
}

/// Extracts the major version from a `/version` response body.
pub fn parse_server_major(body: &[u8]) -> Result<u64> {
    let parsed: ServerVersion = serde_json::from_slice(body)?;
    parsed
        .version
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .ok_or_else(|| {
            Error::backend(
                PODMAN_BACKEND,
                format!("unparseable server version '{}'", parsed.version),
            )
        })
}

/// Builds `?k=v&...`, percent-encoding values.
pub fn query(params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode(v)))
        .collect();
    format!("?{}", pairs.join("&"))
}

/// Percent-encodes everything outside the URI unreserved set.
pub fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_encoding() {
        assert_eq!(query(&[]), "");
        assert_eq!(
            query(&[("reference", "ghcr.io/a/b:1"), ("arch", "arm64")]),
            "?reference=ghcr.io%2Fa%2Fb%3A1&arch=arm64"
        );
        assert_eq!(query(&[("filters", "{\"a\": 1}")]), "?filters=%7B%22a%22%3A%201%7D");
    }

    #[test]
    fn test_api_version_follows_major() {
        assert_eq!(api_version_for(3), "v3.0.0");
        assert_eq!(api_version_for(4), "v4.0.0");
        assert_eq!(api_version_for(5), "v4.0.0");

        let client = LibpodClient::new("/run/podman.sock", Duration::from_secs(1));
        assert_eq!(client.api_version(), "v4.0.0");
        assert_eq!(client.with_major_version(3).api_version(), "v3.0.0");
    }

    #[test]
    fn test_server_major() {
        let v3 = br#"{"Platform":{"Name":"linux/amd64/ubuntu-22.04"},"Version":"3.4.4","ApiVersion":"1.40"}"#;
        assert_eq!(parse_server_major(v3).unwrap(), 3);
        assert_eq!(parse_server_major(br#"{"Version":"5.2.1"}"#).unwrap(), 5);
        assert!(parse_server_major(br#"{"Version":"dev"}"#).is_err());
        assert!(parse_server_major(b"<html>").is_err());
    }

    #[test]
    fn test_api_error_prefers_message() {
        let body = br#"{"cause":"no such container","message":"container abc: no such container","response":404}"#;
        let err = api_error(StatusCode::NOT_FOUND, body);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "podman API returned 404: container abc: no such container"
        );
    }

    #[test]
    fn test_api_error_plain_body() {
        let err = api_error(StatusCode::INTERNAL_SERVER_ERROR, b"boom\n");
        assert!(matches!(err, Error::Api { status: 500, ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_error() {
        let client = LibpodClient::new("/nonexistent/podman.sock", Duration::from_secs(1));
        let err = client.get_json::<serde_json::Value>("/_ping").await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }
}
