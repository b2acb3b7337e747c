//! Readiness probes.
//!
//! Polls a container's HTTP endpoint until the probe's validator accepts a
//! response or the probe deadline passes.

use crate::constants::{DEFAULT_PROBE_TIMEOUT, PROBE_INTERVAL};
use crate::error::{Error, Result};
use crate::manager::ReadinessProbe;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Request, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

/// Waits until `probe` reports the container ready.
pub async fn wait_ready(probe: &ReadinessProbe) -> Result<()> {
    let uri: Uri = probe
        .endpoint
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| Error::InvalidProbeEndpoint {
            endpoint: probe.endpoint.clone(),
            reason: e.to_string(),
        })?;

    if uri.scheme_str().is_some_and(|s| s != "http") {
        return Err(Error::NotSupported(format!(
            "probe scheme in '{}' (only http is supported)",
            probe.endpoint
        )));
    }

    let timeout = if probe.timeout.is_zero() {
        DEFAULT_PROBE_TIMEOUT
    } else {
        probe.timeout
    };
    let deadline = Instant::now() + timeout;

    loop {
        match attempt(&uri).await {
            Ok((status, body)) if probe.accepts(status, &body) => {
                info!("Probe {} ready (status {})", probe.endpoint, status);
                return Ok(());
            }
            Ok((status, _)) => debug!("Probe {} not ready: status {}", probe.endpoint, status),
            Err(e) => debug!("Probe {} not ready: {}", probe.endpoint, e),
        }

        if Instant::now() + PROBE_INTERVAL > deadline {
            return Err(Error::Timeout {
                operation: format!("readiness probe {}", probe.endpoint),
                duration: timeout,
            });
        }
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}

/// Performs one GET and returns status and body.
async fn attempt(uri: &Uri) -> Result<(u16, Vec<u8>)> {
    let host = uri.host().unwrap_or("localhost");
    let port = uri.port_u16().unwrap_or(80);

    let stream = TcpStream::connect((host, port)).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::Internal(format!("probe handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Probe connection closed: {}", e);
        }
    });

    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let request = Request::get(path)
        .header("Host", host)
        .body(Empty::<Bytes>::new())
        .map_err(|e| Error::Internal(format!("failed to build probe request: {}", e)))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| Error::Internal(format!("probe request failed: {}", e)))?;

    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Internal(format!("probe body read failed: {}", e)))?
        .to_bytes();

    Ok((status, body.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unreachable_endpoint_times_out() {
        // Port 9 (discard) is closed on test hosts.
        let probe = ReadinessProbe::new("http://127.0.0.1:9/health", Duration::from_millis(200));
        let err = wait_ready(&probe).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_input_error() {
        for endpoint in ["http://exa mple/health", "http://[::1/health", ""] {
            let probe = ReadinessProbe::new(endpoint, Duration::from_millis(200));
            match wait_ready(&probe).await.unwrap_err() {
                Error::InvalidProbeEndpoint { endpoint: e, .. } => assert_eq!(e, endpoint),
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_https_rejected() {
        let probe = ReadinessProbe::new("https://127.0.0.1/health", Duration::from_millis(200));
        assert!(matches!(
            wait_ready(&probe).await,
            Err(Error::NotSupported(_))
        ));
    }
}
