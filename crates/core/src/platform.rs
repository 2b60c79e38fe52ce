//! Host platform identification.
//!
//! A [`Platform`] is the triple (operating system, CPU architecture, libc
//! variant) that selects which distribution archive gets installed. It is
//! computed once from host introspection by [`HostPlatformResolver`], or
//! injected through [`FixedPlatformResolver`] so that every platform branch can
//! be exercised on any machine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{Error, Result};

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" => Some(Self::Darwin),
            "windows" | "win" | "win32" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Name used in distribution file names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "win",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    X86,
    Arm64,
    Armv7l,
    Ppc64le,
    S390x,
}

impl Arch {
    /// Parse from string, accepting both Rust and Node.js spellings.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Some(Self::X64),
            "x86" | "ia32" | "i386" | "i686" => Some(Self::X86),
            "arm64" | "aarch64" => Some(Self::Arm64),
            "armv7l" | "armv7" | "arm" => Some(Self::Armv7l),
            "ppc64le" | "powerpc64le" => Some(Self::Ppc64le),
            "s390x" => Some(Self::S390x),
            _ => None,
        }
    }

    /// Name used in distribution file names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
            Self::Arm64 => "arm64",
            Self::Armv7l => "armv7l",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// C library flavour on Linux hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Libc {
    Gnu,
    Musl,
}

/// Platform triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    /// Only meaningful on Linux.
    pub libc: Option<Libc>,
}

impl Platform {
    /// Create a platform; Linux defaults to glibc.
    #[must_use]
    pub fn new(os: Os, arch: Arch) -> Self {
        let libc = (os == Os::Linux).then_some(Libc::Gnu);
        Self { os, arch, libc }
    }

    /// Same platform with another libc variant (ignored outside Linux).
    #[must_use]
    pub fn with_libc(mut self, libc: Libc) -> Self {
        if self.os == Os::Linux {
            self.libc = Some(libc);
        }
        self
    }

    /// Map host identifiers (as in `std::env::consts`) to a platform.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` for any OS or architecture outside the
    /// known set.
    pub fn from_host(os: &str, arch: &str, musl: bool) -> Result<Self> {
        let unsupported = || Error::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let parsed_os = Os::parse(os).ok_or_else(unsupported)?;
        let parsed_arch = Arch::parse(arch).ok_or_else(unsupported)?;
        let platform = Self::new(parsed_os, parsed_arch);
        Ok(if musl {
            platform.with_libc(Libc::Musl)
        } else {
            platform
        })
    }

    /// Parse from string like "linux-x64" or "linux-x64-musl".
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` when a component is not recognised.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            [os, arch] => Self::from_host(os, arch, false),
            [os, arch, "musl"] => Self::from_host(os, arch, true),
            [os, arch, "gnu"] => Self::from_host(os, arch, false),
            _ => Err(Error::UnsupportedPlatform {
                os: s.to_string(),
                arch: String::new(),
            }),
        }
    }

    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }

    #[must_use]
    pub fn is_musl(&self) -> bool {
        self.libc == Some(Libc::Musl)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)?;
        if self.is_musl() {
            f.write_str("-musl")?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Source of the platform triple used for resolution.
pub trait PlatformResolver: Send + Sync {
    /// Resolve the platform to install for.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` when the host is not supported.
    fn resolve(&self) -> Result<Platform>;
}

/// Resolves the platform of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatformResolver;

impl PlatformResolver for HostPlatformResolver {
    fn resolve(&self) -> Result<Platform> {
        let arch = match std::env::consts::ARCH {
            "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
            other => other,
        };
        let platform = Platform::from_host(std::env::consts::OS, arch, host_uses_musl())?;
        tracing::debug!(%platform, "Resolved host platform");
        Ok(platform)
    }
}

/// Always resolves to the same platform.
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatformResolver(pub Platform);

impl PlatformResolver for FixedPlatformResolver {
    fn resolve(&self) -> Result<Platform> {
        Ok(self.0)
    }
}

fn host_uses_musl() -> bool {
    if cfg!(target_env = "musl") {
        return true;
    }
    cfg!(target_os = "linux") && musl_loader_present(Path::new("/lib"))
}

/// A musl dynamic loader (`ld-musl-<arch>.so.1`) marks a musl userland even
/// when this binary itself was linked against glibc.
fn musl_loader_present(lib_dir: &Path) -> bool {
    std::fs::read_dir(lib_dir).is_ok_and(|entries| {
        entries
            .flatten()
            .any(|entry| entry.file_name().to_string_lossy().starts_with("ld-musl-"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_parse() {
        assert_eq!(Os::parse("linux"), Some(Os::Linux));
        assert_eq!(Os::parse("macos"), Some(Os::Darwin));
        assert_eq!(Os::parse("Darwin"), Some(Os::Darwin));
        assert_eq!(Os::parse("windows"), Some(Os::Windows));
        assert_eq!(Os::parse("win"), Some(Os::Windows));
        assert_eq!(Os::parse("freebsd"), None);
    }

    #[test]
    fn test_arch_parse() {
        assert_eq!(Arch::parse("x86_64"), Some(Arch::X64));
        assert_eq!(Arch::parse("amd64"), Some(Arch::X64));
        assert_eq!(Arch::parse("aarch64"), Some(Arch::Arm64));
        assert_eq!(Arch::parse("arm"), Some(Arch::Armv7l));
        assert_eq!(Arch::parse("i686"), Some(Arch::X86));
        assert_eq!(Arch::parse("s390x"), Some(Arch::S390x));
        assert_eq!(Arch::parse("riscv64"), None);
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::new(Os::Linux, Arch::X64).to_string(), "linux-x64");
        assert_eq!(
            Platform::new(Os::Darwin, Arch::Arm64).to_string(),
            "darwin-arm64"
        );
        assert_eq!(Platform::new(Os::Windows, Arch::X64).to_string(), "win-x64");
        assert_eq!(
            Platform::new(Os::Linux, Arch::X64)
                .with_libc(Libc::Musl)
                .to_string(),
            "linux-x64-musl"
        );
    }

    #[test]
    fn test_with_libc_ignored_outside_linux() {
        let platform = Platform::new(Os::Darwin, Arch::Arm64).with_libc(Libc::Musl);
        assert_eq!(platform.libc, None);
        assert!(!platform.is_musl());
    }

    #[test]
    fn test_from_host() {
        let p = Platform::from_host("linux", "x86_64", false).unwrap();
        assert_eq!(p, Platform::new(Os::Linux, Arch::X64));
        assert_eq!(p.libc, Some(Libc::Gnu));

        let p = Platform::from_host("macos", "aarch64", false).unwrap();
        assert_eq!(p.to_string(), "darwin-arm64");

        let p = Platform::from_host("linux", "x86_64", true).unwrap();
        assert!(p.is_musl());
    }

    #[test]
    fn test_from_host_unsupported() {
        let err = Platform::from_host("freebsd", "x86_64", false).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedPlatform { ref os, .. } if os == "freebsd"
        ));

        let err = Platform::from_host("linux", "riscv64", false).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedPlatform { ref arch, .. } if arch == "riscv64"
        ));
    }

    #[test]
    fn test_platform_parse_roundtrip() {
        for s in ["linux-x64", "linux-x64-musl", "darwin-arm64", "win-x86"] {
            assert_eq!(Platform::parse(s).unwrap().to_string(), s);
        }
        assert!(Platform::parse("linux").is_err());
        assert!(Platform::parse("linux-x64-uclibc").is_err());
    }

    #[test]
    fn test_platform_serde_as_string() {
        let p = Platform::new(Os::Windows, Arch::Arm64);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"win-arm64\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_fixed_resolver() {
        let p = Platform::new(Os::Linux, Arch::Arm64);
        assert_eq!(FixedPlatformResolver(p).resolve().unwrap(), p);
    }

    #[test]
    fn test_host_resolver_matches_consts() {
        // Every CI host this crate is built on is supported.
        let p = HostPlatformResolver.resolve().unwrap();
        assert_eq!(Some(p.os), Os::parse(std::env::consts::OS));
    }

    #[test]
    fn test_musl_loader_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!musl_loader_present(dir.path()));
        std::fs::write(dir.path().join("ld-musl-x86_64.so.1"), b"").unwrap();
        assert!(musl_loader_present(dir.path()));
        assert!(!musl_loader_present(&dir.path().join("missing")));
    }
}
