//! # Build Engine Constants
//!
//! Defaults, limits and well-known names shared by the backends, the
//! archive codec and the multi-arch assembler. These constants are the
//! single source of truth; modules import them rather than repeating
//! literals.
//!
//! ## Cross-References
//!
//! - [`crate::archive`]: file modes and size limits for tar transfers
//! - [`crate::backends`]: socket paths, API versions, discovery commands
//! - [`crate::multiarch`]: manifest naming
//! - [`crate::config`]: configuration file locations and env overrides

use std::time::Duration;

// =============================================================================
// Archive Transfer
// =============================================================================

/// File mode for single-file archive entries.
pub const ARCHIVE_FILE_MODE: u32 = 0o755;

/// Maximum size of a single file read back out of a container (256 MiB).
///
/// Bounds memory use of [`crate::archive::read_single_file`].
pub const MAX_COPY_OUT_SIZE: u64 = 256 * 1024 * 1024;

/// Name under which the Dockerfile is placed in a build context archive.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

// =============================================================================
// Docker Backend
// =============================================================================

/// Registered name of the daemon-socket backend.
pub const DOCKER_BACKEND: &str = "docker";

/// Default daemon socket on Unix hosts.
pub const DOCKER_DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Request timeout for daemon calls, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Podman Backend
// =============================================================================

/// Registered name of the binding backend.
pub const PODMAN_BACKEND: &str = "podman";

/// Executable queried during socket discovery.
pub const PODMAN_BINARY: &str = "podman";

/// First major version whose socket is exposed by `podman machine inspect`.
pub const PODMAN_MACHINE_MAJOR_VERSION: u64 = 4;

/// libpod REST API version prefix for Podman 4 and later.
pub const LIBPOD_API_VERSION: &str = "v4.0.0";

/// libpod REST API version prefix for Podman 3, which rejects `v4.0.0`.
pub const LIBPOD_LEGACY_API_VERSION: &str = "v3.0.0";

/// First Podman major version serving the `v4.0.0` API.
pub const LIBPOD_API_MAJOR_VERSION: u64 = 4;

/// Header carrying base64 registry credentials on libpod requests.
pub const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Timeout for each discovery subprocess.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Containers
// =============================================================================

/// Prefix for generated container names.
pub const CONTAINER_NAME_PREFIX: &str = "buildrig";

/// CFS period used when translating fractional CPU limits (microseconds).
pub const CPU_PERIOD_MICROS: i64 = 100_000;

/// Grace period passed to the daemon on stop, in seconds.
pub const STOP_TIMEOUT_SECS: i32 = 10;

// =============================================================================
// Readiness Probes
// =============================================================================

/// Interval between readiness probe attempts.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Default readiness timeout when a probe does not set one.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Configuration
// =============================================================================

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "BUILDRIG_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "BUILDRIG_";

/// Configuration directory name under the user config dir.
pub const CONFIG_DIR_NAME: &str = "buildrig";

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.yaml";
