//! Target platform specifiers (`os/arch[/variant]`).
//!
//! Formatting and normalization follow the containerd conventions so that
//! platforms advertised by different backends compare equal.

use crate::error::{BrigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A build target platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self { os: os.into(), architecture: architecture.into(), variant: None }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    pub fn linux_arm64() -> Self {
        Self::new("linux", "arm64")
    }

    /// Canonical string form used as the resolver's index key.
    pub fn format(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}/{}/{}", self.os, self.architecture, variant),
            None => format!("{}/{}", self.os, self.architecture),
        }
    }

    /// Normalize OS and architecture aliases (`x86_64` → `amd64`,
    /// `aarch64` → `arm64`, `armhf` → `arm/v7`, ...).
    pub fn normalize(&self) -> Self {
        let os = self.os.to_lowercase();
        let (architecture, variant) =
            normalize_arch(&self.architecture.to_lowercase(), self.variant.as_deref());
        Self { os, architecture, variant }
    }
}

fn normalize_arch(arch: &str, variant: Option<&str>) -> (String, Option<String>) {
    let variant = variant.map(str::to_lowercase);
    match arch {
        "i386" | "i486" | "i586" | "i686" => ("386".to_string(), None),
        "x86_64" | "x86-64" | "amd64" => {
            // v1 is the baseline and carries no information
            let variant = variant.filter(|v| v != "v1");
            ("amd64".to_string(), variant)
        }
        "aarch64" | "arm64" => {
            let variant = variant.filter(|v| v != "8" && v != "v8");
            ("arm64".to_string(), variant)
        }
        "armhf" => ("arm".to_string(), Some("v7".to_string())),
        "armel" => ("arm".to_string(), Some("v6".to_string())),
        "arm" => {
            let variant = match variant.as_deref() {
                None | Some("") | Some("7") | Some("v7") => "v7".to_string(),
                Some(v @ ("5" | "6" | "8")) => format!("v{}", v),
                Some(other) => other.to_string(),
            };
            ("arm".to_string(), Some(variant))
        }
        other => (other.to_string(), variant),
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl FromStr for Platform {
    type Err = BrigError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| BrigError::InvalidPlatform {
            platform: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty component"));
        }
        let platform = match parts.as_slice() {
            [os, arch] => Platform::new(*os, *arch),
            [os, arch, variant] => Platform::new(*os, *arch).with_variant(*variant),
            _ => return Err(invalid("expected os/arch[/variant]")),
        };
        Ok(platform.normalize())
    }
}

/// Parse a comma separated platform list (`linux/amd64,linux/arm64`).
pub fn parse_platforms(spec: &str) -> Result<Vec<Platform>> {
    spec.split(',').map(str::trim).filter(|s| !s.is_empty()).map(Platform::from_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let p: Platform = "linux/arm/v7".parse().unwrap();
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant.as_deref(), Some("v7"));
        assert_eq!(p.format(), "linux/arm/v7");
    }

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(Platform::new("Linux", "x86_64").normalize(), Platform::linux_amd64());
        assert_eq!(
            Platform::new("linux", "aarch64").with_variant("v8").normalize(),
            Platform::linux_arm64()
        );
        assert_eq!(Platform::new("linux", "armhf").normalize().format(), "linux/arm/v7");
        assert_eq!(Platform::new("linux", "arm").normalize().format(), "linux/arm/v7");
        assert_eq!(Platform::new("linux", "i686").normalize().format(), "linux/386");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("linux".parse::<Platform>().is_err());
        assert!("linux//v7".parse::<Platform>().is_err());
        assert!("a/b/c/d".parse::<Platform>().is_err());
    }

    #[test]
    fn test_parse_platform_list() {
        let list = parse_platforms("linux/amd64, linux/arm64,").unwrap();
        assert_eq!(list, vec![Platform::linux_amd64(), Platform::linux_arm64()]);
    }
}
