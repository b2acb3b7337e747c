//! Image references.
//!
//! Parses `registry/repository:tag` (registry optional, digest optional) and
//! derives the per-platform temporary tags used during multi-arch assembly.

use crate::error::{Error, Result};
use crate::platform::PlatformSpec;
use std::fmt;
use std::str::FromStr;

/// Default tag when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Tag, or `latest` when none was given.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Temporary per-platform reference `<name>-<arch>:<tag>`.
    ///
    /// The architecture lives in the repository name rather than the tag
    /// because sequential builds reusing one name only keep the last image
    /// tagged. A variant, when present, is appended to the architecture.
    pub fn for_platform(&self, platform: &PlatformSpec) -> ImageReference {
        let suffix = match platform.variant() {
            Some(variant) => format!("{}-{}", platform.architecture(), variant),
            None => platform.architecture().to_string(),
        };
        ImageReference {
            registry: self.registry.clone(),
            repository: format!("{}-{}", self.repository, suffix),
            tag: Some(self.tag_or_latest().to_string()),
            digest: None,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidImageReference {
            reference: s.to_string(),
            reason: reason.to_string(),
        };

        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty reference"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => return Err(invalid("empty digest")),
            None => (s, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are ports.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };
        if tag.as_deref() == Some("") {
            return Err(invalid("empty tag"));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), remainder.to_string())
            }
            _ => (None, name.to_string()),
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository segment"));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_reference() {
        let r: ImageReference = "ghcr.io/acme/app:1.2".parse().unwrap();
        assert_eq!(r.registry(), Some("ghcr.io"));
        assert_eq!(r.repository(), "acme/app");
        assert_eq!(r.tag(), Some("1.2"));
        assert_eq!(r.to_string(), "ghcr.io/acme/app:1.2");
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let r: ImageReference = "localhost:5000/app".parse().unwrap();
        assert_eq!(r.registry(), Some("localhost:5000"));
        assert_eq!(r.tag(), None);
        assert_eq!(r.tag_or_latest(), "latest");
    }

    #[test]
    fn test_docker_hub_short_name() {
        let r: ImageReference = "library/alpine:3.19".parse().unwrap();
        assert_eq!(r.registry(), None);
        assert_eq!(r.repository(), "library/alpine");
    }

    #[test]
    fn test_for_platform() {
        let r: ImageReference = "registry.local/team/app:v3".parse().unwrap();
        let arm = r.for_platform(&"linux/arm64".parse().unwrap());
        assert_eq!(arm.to_string(), "registry.local/team/app-arm64:v3");

        let v7 = r.for_platform(&"linux/arm/v7".parse().unwrap());
        assert_eq!(v7.to_string(), "registry.local/team/app-arm-v7:v3");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<ImageReference>().is_err());
        assert!("app:".parse::<ImageReference>().is_err());
        assert!("my app".parse::<ImageReference>().is_err());
    }
}
