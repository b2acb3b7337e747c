//! Platform detection and resolution.
//!
//! Detects the host OS and architecture at compile time and translates it
//! into the platform(s) a build container must target.
//!
//! ## Virtualization Boundary
//!
//! Desktop hosts that cannot run Linux containers natively (macOS, Windows)
//! run them inside a Linux VM. For those hosts the container platform is
//! always `linux/amd64`, and builds additionally cross-compile for the
//! host's own architecture so artifacts run on both sides of the boundary.
//!
//! ```text
//!   host            container       build platforms
//!   linux/amd64  →  linux/amd64  →  [linux/amd64]
//!   linux/arm64  →  linux/arm64  →  [linux/arm64]
//!   darwin/arm64 →  linux/amd64  →  [linux/amd64, linux/arm64]
//!   darwin/amd64 →  linux/amd64  →  [linux/amd64, linux/arm64]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    Unknown,
}

impl Os {
    /// Detects the operating system.
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        return Os::Linux;

        #[cfg(target_os = "macos")]
        return Os::Darwin;

        #[cfg(target_os = "windows")]
        return Os::Windows;

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        return Os::Unknown;
    }

    /// Returns the OCI name of this OS.
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
            Os::Unknown => "unknown",
        }
    }

    /// Parses an OCI OS name.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "linux" => Os::Linux,
            "darwin" | "macos" => Os::Darwin,
            "windows" => Os::Windows,
            _ => Os::Unknown,
        }
    }

    /// Returns true if Linux containers on this OS run inside a VM.
    pub fn is_virtualized(&self) -> bool {
        matches!(self, Os::Darwin | Os::Windows)
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    Unknown,
}

impl Arch {
    /// Detects the CPU architecture.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        return Arch::Amd64;

        #[cfg(target_arch = "aarch64")]
        return Arch::Arm64;

        #[cfg(target_arch = "arm")]
        return Arch::Arm;

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
        return Arch::Unknown;
    }

    /// Returns the OCI name of this architecture.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
            Arch::Unknown => "unknown",
        }
    }

    /// Parses an architecture name, accepting kernel and toolchain aliases.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x86-64" | "x64" => Arch::Amd64,
            "arm64" | "aarch64" | "arm64v8" => Arch::Arm64,
            "arm" | "armv7l" | "armhf" | "armv7" => Arch::Arm,
            _ => Arch::Unknown,
        }
    }

    /// The other half of the amd64/arm64 pair used for cross builds.
    fn counterpart(&self) -> Arch {
        match self {
            Arch::Amd64 => Arch::Arm64,
            _ => Arch::Amd64,
        }
    }
}

/// Maps an architecture name to its canonical OCI spelling.
///
/// Intel maps to `amd64`, ARM to `arm64`. Names that are not recognised are
/// passed through lowercased so exotic platforms still round-trip.
pub fn canonical_arch(name: &str) -> String {
    match Arch::parse(name) {
        Arch::Unknown => name.to_ascii_lowercase(),
        arch => arch.as_str().to_string(),
    }
}

// =============================================================================
// Platform Spec
// =============================================================================

/// An `{os, architecture, variant}` triple identifying an executable target.
///
/// Canonical string form is `os/arch` or `os/arch/variant`; parsing and
/// formatting are symmetric for both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformSpec {
    os: String,
    architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variant: Option<String>,
}

impl PlatformSpec {
    /// Creates a platform spec without a variant.
    pub fn new(os: impl AsRef<str>, architecture: impl AsRef<str>) -> Self {
        Self {
            os: os.as_ref().to_ascii_lowercase(),
            architecture: canonical_arch(architecture.as_ref()),
            variant: None,
        }
    }

    /// Returns a copy with the given variant.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// `linux/<arch>`.
    pub fn linux(arch: Arch) -> Self {
        Self::new(Os::Linux.as_str(), arch.as_str())
    }

    /// Detects the host platform.
    pub fn host() -> Self {
        Self::new(Os::detect().as_str(), Arch::detect().as_str())
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Returns true if os and architecture match (variant ignored).
    pub fn same_as(&self, other: &PlatformSpec) -> bool {
        self.os == other.os && self.architecture == other.architecture
    }
}

impl fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.architecture, variant),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

impl FromStr for PlatformSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPlatform {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty segment"));
        }

        match parts.as_slice() {
            [os, arch] => Ok(PlatformSpec::new(os, arch)),
            [os, arch, variant] => Ok(PlatformSpec::new(os, arch).with_variant(*variant)),
            _ => Err(invalid("expected os/arch or os/arch/variant")),
        }
    }
}

// =============================================================================
// Platform (host + container)
// =============================================================================

/// Host platform paired with the container platform derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    host: PlatformSpec,
    container: PlatformSpec,
}

impl Platform {
    /// Builds a platform for `host`, deriving the container platform.
    pub fn for_host(host: PlatformSpec) -> Self {
        let container = resolve_container_platform(&host);
        Self { host, container }
    }

    /// Detects the current host and derives its container platform.
    pub fn detect() -> Self {
        Self::for_host(PlatformSpec::host())
    }

    pub fn host(&self) -> &PlatformSpec {
        &self.host
    }

    pub fn container(&self) -> &PlatformSpec {
        &self.container
    }

    /// Returns true if host and container share os and architecture.
    pub fn same(&self) -> bool {
        self.host.same_as(&self.container)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host={} container={}", self.host, self.container)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves the container platform for a host.
///
/// Virtualized hosts always get `linux/amd64`; everything else runs
/// containers for its own platform.
pub fn resolve_container_platform(host: &PlatformSpec) -> PlatformSpec {
    if Os::parse(host.os()).is_virtualized() {
        return PlatformSpec::linux(Arch::Amd64);
    }
    host.clone()
}

/// Resolves the platforms a build must produce artifacts for, in order.
///
/// A native host yields its container platform only. A virtualized host
/// yields the container platform followed by a Linux platform for the host's
/// own architecture. When both would be identical (an Intel desktop host),
/// the companion becomes the opposite architecture so the list always holds
/// two distinct targets.
pub fn resolve_build_platforms(platform: &Platform) -> Vec<PlatformSpec> {
    let container = platform.container().clone();
    if platform.same() {
        return vec![container];
    }

    let host_arch = Arch::parse(platform.host().architecture());
    let mut companion = PlatformSpec::linux(host_arch);
    if companion.same_as(&container) {
        companion = PlatformSpec::linux(host_arch.counterpart());
    }

    vec![container, companion]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_detection() {
        let host = PlatformSpec::host();
        assert!(!host.os().is_empty());
        assert!(!host.architecture().is_empty());
    }

    #[test]
    fn test_arch_aliases() {
        assert_eq!(canonical_arch("x86_64"), "amd64");
        assert_eq!(canonical_arch("aarch64"), "arm64");
        assert_eq!(canonical_arch("riscv64"), "riscv64");
    }

    #[test]
    fn test_variant_round_trip() {
        let spec: PlatformSpec = "linux/arm/v7".parse().unwrap();
        assert_eq!(spec.variant(), Some("v7"));
        assert_eq!(spec.to_string(), "linux/arm/v7");
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!("linux".parse::<PlatformSpec>().is_err());
        assert!("linux//amd64".parse::<PlatformSpec>().is_err());
        assert!("a/b/c/d".parse::<PlatformSpec>().is_err());
    }
}
