use crate::console::print_result;
use crate::errors::CliResult;
use nodekit_core::{Config, FixedPlatformResolver, HostPlatformResolver, Platform, PlatformResolver};
use std::path::Path;

/// Platform distributions are resolved for: the configured override when a
/// configuration declares one, otherwise the host.
pub fn resolve(config_path: &Path) -> CliResult<Platform> {
    let configured = if config_path.is_file() {
        Config::load(config_path)?.platform
    } else {
        None
    };
    let platform = match configured {
        Some(platform) => FixedPlatformResolver(platform).resolve()?,
        None => HostPlatformResolver.resolve()?,
    };
    Ok(platform)
}

pub fn execute(config_path: &Path) -> CliResult<()> {
    print_result(resolve(config_path)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodekit_core::{Arch, Libc, Os};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_configured_platform_wins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nodekit.toml");
        fs::write(
            &path,
            "platform = \"linux-arm64-musl\"\n[node]\nversion = \"18.17.1\"\n",
        )
        .unwrap();

        let platform = resolve(&path).unwrap();
        assert_eq!(
            platform,
            Platform::new(Os::Linux, Arch::Arm64).with_libc(Libc::Musl)
        );
    }

    #[test]
    fn test_host_platform_without_configuration() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve(&tmp.path().join("missing.toml"));
        assert_eq!(resolved.ok(), HostPlatformResolver.resolve().ok());
    }
}
