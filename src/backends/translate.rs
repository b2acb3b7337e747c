//! Backend-neutral translation of [`ContainerConfig`] fields.
//!
//! Both backends map the same declarative config onto their own request
//! types. The pieces that must agree between them (env validation, secret
//! injection, CPU units, naming, mount options) live here.

use crate::constants::{CONTAINER_NAME_PREFIX, CPU_PERIOD_MICROS};
use crate::error::{Error, Result};
use crate::manager::{ContainerConfig, Volume, VolumeKind};
use std::collections::BTreeMap;

/// Returns the configured name or a generated `buildrig-<id>` one.
pub fn container_name(config: &ContainerConfig) -> String {
    match &config.name {
        Some(name) if !name.is_empty() => name.clone(),
        _ => {
            let id = uuid::Uuid::now_v7().simple().to_string();
            format!("{}-{}", CONTAINER_NAME_PREFIX, &id[id.len() - 12..])
        }
    }
}

/// Splits `KEY=VALUE` entries. An entry without `=` or with an empty key
/// is rejected; values may contain further `=` characters.
pub fn parse_env(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(Error::InvalidEnv {
                entry: entry.clone(),
            }),
        })
        .collect()
}

/// Validated env entries followed by secrets, as `KEY=VALUE` strings.
pub fn environment(config: &ContainerConfig) -> Result<Vec<String>> {
    let mut env: Vec<String> = parse_env(&config.env)?
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.extend(config.secrets.iter().map(|(k, v)| format!("{}={}", k, v)));
    Ok(env)
}

/// Same as [`environment`] as a map; secrets win over plain entries.
pub fn environment_map(config: &ContainerConfig) -> Result<BTreeMap<String, String>> {
    let mut env: BTreeMap<String, String> = parse_env(&config.env)?.into_iter().collect();
    for (key, value) in &config.secrets {
        env.insert(key.clone(), value.clone());
    }
    Ok(env)
}

/// Fractional CPUs in units of 1e-9 CPUs.
pub fn nano_cpus(cpus: f64) -> i64 {
    (cpus * 1e9).round() as i64
}

/// Fractional CPUs as a CFS quota over [`CPU_PERIOD_MICROS`].
pub fn cpu_quota(cpus: f64) -> i64 {
    (cpus * CPU_PERIOD_MICROS as f64).round() as i64
}

/// Bind mount propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Private,
    RPrivate,
    Shared,
    RShared,
    Slave,
    RSlave,
}

impl Propagation {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "private" => Some(Self::Private),
            "rprivate" => Some(Self::RPrivate),
            "shared" => Some(Self::Shared),
            "rshared" => Some(Self::RShared),
            "slave" => Some(Self::Slave),
            "rslave" => Some(Self::RSlave),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::RPrivate => "rprivate",
            Self::Shared => "shared",
            Self::RShared => "rshared",
            Self::Slave => "slave",
            Self::RSlave => "rslave",
        }
    }
}

/// Mount options understood by every backend.
///
/// | option              | kinds  |
/// |---------------------|--------|
/// | `ro`, `readonly`, `rw` | all |
/// | propagation modes   | bind   |
/// | `nocopy`            | volume |
/// | `size=`, `mode=`    | tmpfs  |
///
/// Anything else is rejected so a config never mounts differently
/// depending on the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub read_only: bool,
    pub propagation: Option<Propagation>,
    pub no_copy: bool,
    /// Tmpfs size in bytes.
    pub tmpfs_size: Option<i64>,
    /// Tmpfs permission bits.
    pub tmpfs_mode: Option<u32>,
}

impl MountOptions {
    /// Renders the options in libpod's mount option syntax.
    pub fn libpod_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        if self.read_only {
            options.push("ro".to_string());
        }
        if let Some(propagation) = self.propagation {
            options.push(propagation.as_str().to_string());
        }
        if self.no_copy {
            options.push("nocopy".to_string());
        }
        if let Some(size) = self.tmpfs_size {
            options.push(format!("size={}", size));
        }
        if let Some(mode) = self.tmpfs_mode {
            options.push(format!("mode={:o}", mode));
        }
        options
    }
}

/// Parses and validates the options of `volume` for its kind.
pub fn mount_options(volume: &Volume) -> Result<MountOptions> {
    let mut parsed = MountOptions::default();
    for option in &volume.options {
        let reject = |reason: &str| Error::InvalidMount {
            target: volume.target.clone(),
            option: option.clone(),
            reason: reason.to_string(),
        };

        match (volume.kind, option.split_once('=')) {
            (_, None) if option == "ro" || option == "readonly" => parsed.read_only = true,
            (_, None) if option == "rw" => parsed.read_only = false,
            (VolumeKind::Bind, None) if Propagation::parse(option).is_some() => {
                parsed.propagation = Propagation::parse(option);
            }
            (VolumeKind::Volume, None) if option == "nocopy" => parsed.no_copy = true,
            (VolumeKind::Tmpfs, Some(("size", size))) => {
                parsed.tmpfs_size =
                    Some(parse_size(size).ok_or_else(|| reject("expected a size such as 64m"))?);
            }
            (VolumeKind::Tmpfs, Some(("mode", mode))) => {
                parsed.tmpfs_mode = Some(
                    u32::from_str_radix(mode, 8).map_err(|_| reject("expected an octal mode"))?,
                );
            }
            _ => {
                return Err(reject(&format!(
                    "not supported on {} mounts",
                    volume.kind.as_str()
                )));
            }
        }
    }
    Ok(parsed)
}

/// Parses `1024`, `512k`, `64m`, `1g` (binary units) into bytes.
fn parse_size(value: &str) -> Option<i64> {
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let scale: i64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return None,
    };
    digits.parse::<i64>().ok()?.checked_mul(scale)
}

/// Non-empty optional vector.
pub fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_keeps_extra_equals() {
        let parsed = parse_env(&["A=1".into(), "B=x=y".into(), "C=".into()]).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("A".into(), "1".into()),
                ("B".into(), "x=y".into()),
                ("C".into(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_env_rejects_missing_separator() {
        let err = parse_env(&["PATH".into()]).unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { entry } if entry == "PATH"));
        assert!(parse_env(&["=value".into()]).is_err());
    }

    #[test]
    fn test_secrets_injected_into_env() {
        let mut config = ContainerConfig::new("alpine");
        config.env = vec!["MODE=ci".into(), "TOKEN=plain".into()];
        config.secrets.insert("TOKEN".into(), "s3cret".into());

        assert_eq!(
            environment(&config).unwrap(),
            vec!["MODE=ci", "TOKEN=plain", "TOKEN=s3cret"]
        );
        assert_eq!(environment_map(&config).unwrap()["TOKEN"], "s3cret");
    }

    #[test]
    fn test_cpu_units() {
        assert_eq!(nano_cpus(1.5), 1_500_000_000);
        assert_eq!(cpu_quota(0.5), 50_000);
    }

    #[test]
    fn test_mount_options_per_kind() {
        let volume = |kind, options: &[&str]| Volume {
            kind,
            source: "src".into(),
            target: "/dst".into(),
            options: options.iter().map(ToString::to_string).collect(),
        };

        let bind = mount_options(&volume(VolumeKind::Bind, &["readonly", "rshared"])).unwrap();
        assert!(bind.read_only);
        assert_eq!(bind.propagation, Some(Propagation::RShared));

        let tmpfs = mount_options(&volume(VolumeKind::Tmpfs, &["size=64m", "mode=1777"])).unwrap();
        assert_eq!(tmpfs.tmpfs_size, Some(64 * 1024 * 1024));
        assert_eq!(tmpfs.tmpfs_mode, Some(0o1777));
        assert_eq!(tmpfs.libpod_options(), vec!["size=67108864", "mode=1777"]);

        let err = mount_options(&volume(VolumeKind::Bind, &["z"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid mount option 'z' for /dst: not supported on bind mounts"
        );
        assert!(mount_options(&volume(VolumeKind::Volume, &["shared"])).is_err());
        assert!(mount_options(&volume(VolumeKind::Tmpfs, &["size=lots"])).is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("512K"), Some(512 * 1024));
        assert_eq!(parse_size("1g"), Some(1 << 30));
        assert_eq!(parse_size("m"), None);
        assert_eq!(parse_size("10t"), None);
    }

    #[test]
    fn test_generated_name() {
        let name = container_name(&ContainerConfig::new("alpine"));
        assert!(name.starts_with("buildrig-"));
        assert_eq!(name.len(), "buildrig-".len() + 12);

        let mut named = ContainerConfig::new("alpine");
        named.name = Some("builder".into());
        assert_eq!(container_name(&named), "builder");
    }
}
