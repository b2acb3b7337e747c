//! Tests for platform detection and build-platform resolution.

use buildrig::platform::{resolve_build_platforms, resolve_container_platform};
use buildrig::{Arch, Error, Os, Platform, PlatformSpec, canonical_arch};

fn spec(s: &str) -> PlatformSpec {
    s.parse().unwrap()
}

// =============================================================================
// Parsing and Formatting
// =============================================================================

#[test]
fn test_format_parse_roundtrip() {
    for raw in ["linux/amd64", "linux/arm64", "darwin/arm64", "linux/arm/v7"] {
        let parsed = spec(raw);
        assert_eq!(parsed.to_string(), raw);
        assert_eq!(spec(&parsed.to_string()), parsed);
    }
}

#[test]
fn test_parse_normalizes_aliases() {
    let p = spec("Linux/x86_64");
    assert_eq!(p.os(), "linux");
    assert_eq!(p.architecture(), "amd64");
    assert_eq!(p.variant(), None);

    assert_eq!(spec("linux/aarch64").to_string(), "linux/arm64");
}

#[test]
fn test_variant_kept() {
    let p = spec("linux/arm64/v8");
    assert_eq!(p.variant(), Some("v8"));
    assert!(p.same_as(&spec("linux/arm64")));
    assert_ne!(p, spec("linux/arm64"));
}

#[test]
fn test_invalid_platforms_rejected() {
    for raw in ["", "linux", "linux/", "/amd64", "linux/arm/v7/extra"] {
        let err = raw.parse::<PlatformSpec>().unwrap_err();
        assert!(
            matches!(err, Error::InvalidPlatform { .. }),
            "{:?} should be rejected",
            raw
        );
    }
}

#[test]
fn test_canonical_arch_passthrough() {
    assert_eq!(canonical_arch("X86_64"), "amd64");
    assert_eq!(canonical_arch("arm64v8"), "arm64");
    assert_eq!(canonical_arch("s390x"), "s390x");
}

#[test]
fn test_serde_shape() {
    let json = serde_json::to_string(&spec("linux/amd64")).unwrap();
    assert_eq!(json, r#"{"os":"linux","architecture":"amd64"}"#);

    let back: PlatformSpec =
        serde_json::from_str(r#"{"os":"linux","architecture":"arm","variant":"v7"}"#).unwrap();
    assert_eq!(back.to_string(), "linux/arm/v7");
}

// =============================================================================
// Host and Container Resolution
// =============================================================================

#[test]
fn test_virtualized_hosts() {
    assert!(Os::Darwin.is_virtualized());
    assert!(Os::Windows.is_virtualized());
    assert!(!Os::Linux.is_virtualized());
}

#[test]
fn test_container_platform_for_virtualized_host() {
    assert_eq!(
        resolve_container_platform(&spec("darwin/arm64")),
        spec("linux/amd64")
    );
    assert_eq!(
        resolve_container_platform(&spec("windows/amd64")),
        spec("linux/amd64")
    );
}

#[test]
fn test_container_platform_for_linux_host() {
    assert_eq!(
        resolve_container_platform(&spec("linux/arm64")),
        spec("linux/arm64")
    );
}

#[test]
fn test_detected_platform_is_consistent() {
    let platform = Platform::detect();
    assert_eq!(
        platform.container(),
        &resolve_container_platform(platform.host())
    );
}

// =============================================================================
// Build Platform Resolution
// =============================================================================

#[test]
fn test_linux_host_builds_once() {
    let platform = Platform::for_host(spec("linux/amd64"));
    assert!(platform.same());
    assert_eq!(resolve_build_platforms(&platform), vec![spec("linux/amd64")]);

    let arm = Platform::for_host(PlatformSpec::linux(Arch::Arm64));
    assert_eq!(resolve_build_platforms(&arm), vec![spec("linux/arm64")]);
}

#[test]
fn test_apple_silicon_builds_both() {
    let platform = Platform::for_host(spec("darwin/arm64"));
    assert!(!platform.same());
    assert_eq!(
        resolve_build_platforms(&platform),
        vec![spec("linux/amd64"), spec("linux/arm64")]
    );
}

#[test]
fn test_intel_desktop_builds_distinct_pair() {
    let platform = Platform::for_host(spec("darwin/amd64"));
    let builds = resolve_build_platforms(&platform);
    assert_eq!(builds, vec![spec("linux/amd64"), spec("linux/arm64")]);
    assert!(!builds[0].same_as(&builds[1]));
}

#[test]
fn test_windows_arm_builds_both() {
    let platform = Platform::for_host(spec("windows/arm64"));
    assert_eq!(
        resolve_build_platforms(&platform),
        vec![spec("linux/amd64"), spec("linux/arm64")]
    );
}

#[test]
fn test_platform_display() {
    let platform = Platform::for_host(spec("darwin/arm64"));
    assert_eq!(
        platform.to_string(),
        "host=darwin/arm64 container=linux/amd64"
    );
}
