//! Tests for error display and classification.

use buildrig::{BoxError, Error};
use std::error::Error as _;
use std::time::Duration;

// =============================================================================
// Display Messages
// =============================================================================

#[test]
fn test_connection_message() {
    let err = Error::Connection {
        backend: "podman".to_string(),
        endpoint: "/run/podman/podman.sock".to_string(),
        reason: "No such file or directory".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "failed to connect to podman at /run/podman/podman.sock: No such file or directory"
    );
}

#[test]
fn test_unknown_backend_lists_available() {
    let err = Error::UnknownBackend {
        name: "containerd".to_string(),
        available: "docker, podman".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "unknown container runtime 'containerd' (available: docker, podman)"
    );
}

#[test]
fn test_backend_message_kept_verbatim() {
    let err = Error::backend("docker", "manifest unknown: manifest unknown");
    assert_eq!(err.to_string(), "docker: manifest unknown: manifest unknown");
}

#[test]
fn test_multi_arch_message() {
    let err = Error::MultiArchBuild {
        platform: "linux/arm64".to_string(),
        reason: "exec format error".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "multi-arch build failed for platform linux/arm64: exec format error"
    );
}

#[test]
fn test_timeout_message() {
    let err = Error::Timeout {
        operation: "GET /_ping".to_string(),
        duration: Duration::from_secs(5),
    };
    assert_eq!(err.to_string(), "operation timed out after 5s: GET /_ping");
}

#[test]
fn test_invalid_mount_message() {
    let err = Error::InvalidMount {
        target: "/cache".to_string(),
        option: "z".to_string(),
        reason: "not supported on bind mounts".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "invalid mount option 'z' for /cache: not supported on bind mounts"
    );
}

// =============================================================================
// Step Failures
// =============================================================================

#[test]
fn test_step_failure_keeps_source() {
    let source: BoxError = "npm ci exited with 1".into();
    let err = Error::StepFailed {
        step: "node-build".to_string(),
        source,
    };

    assert_eq!(
        err.to_string(),
        "step 'node-build' failed: npm ci exited with 1"
    );
    assert_eq!(
        err.source().map(ToString::to_string).as_deref(),
        Some("npm ci exited with 1")
    );
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn test_not_found_family() {
    assert!(Error::ContainerNotFound("abc".to_string()).is_not_found());
    assert!(Error::ImageNotFound("app:1".to_string()).is_not_found());
    assert!(
        Error::Api {
            backend: "podman".to_string(),
            status: 404,
            message: "no such image".to_string(),
        }
        .is_not_found()
    );
    assert!(
        !Error::Api {
            backend: "podman".to_string(),
            status: 500,
            message: "boom".to_string(),
        }
        .is_not_found()
    );
    assert!(!Error::Internal("x".to_string()).is_not_found());
}

#[test]
fn test_io_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: Error = io.into();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.to_string(), "I/O error: denied");
}

#[test]
fn test_json_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Serialization(_)));
}
