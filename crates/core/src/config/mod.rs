//! Configuration types for nodekit
//!
//! A project is described by a `nodekit.toml` file. Relative paths in the file
//! are resolved against the directory containing it.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manifest::PackageJson;
use crate::paths;
use crate::platform::Platform;
use crate::retry::RetryConfig;
use crate::tool::ToolSpec;
use crate::{Error, Result};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "nodekit.toml";

/// Official Node.js distribution mirror
pub const DEFAULT_NODE_URL_ROOT: &str = "https://nodejs.org/dist/";

/// Mirror publishing musl builds of Node.js
pub const DEFAULT_NODE_MUSL_URL_ROOT: &str = "https://unofficial-builds.nodejs.org/download/release/";

/// Path below the root; `VERSION`, `ARCH` and `TYPE` are substituted
pub const DEFAULT_NODE_URL_PATH_PATTERN: &str = "vVERSION/node-vVERSION-ARCH.TYPE";

/// Public npm registry
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org/";

/// Yarn 1.x release downloads
pub const DEFAULT_YARN_URL_ROOT: &str = "https://github.com/yarnpkg/yarn/releases/download/";

/// Main configuration structure for nodekit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory containing `package.json`
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,

    /// Cache root for installed toolchains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,

    /// Force a platform instead of detecting the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    /// Verify downloads against published SHA-256 sums
    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    /// Node.js runtime
    pub node: NodeConfig,

    /// Package manager
    #[serde(default)]
    pub package_manager: PackageManagerConfig,

    /// Scripts run after dependencies are installed, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptConfig>,

    /// Network settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Install cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Node.js runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Exact version, e.g. `18.17.1`
    pub version: String,

    /// Use an already provided distribution instead of downloading one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_directory: Option<PathBuf>,

    #[serde(default = "default_node_url_root")]
    pub distribution_url_root: String,

    #[serde(default = "default_node_url_path_pattern")]
    pub distribution_url_path_pattern: String,

    #[serde(default = "default_node_musl_url_root")]
    pub musl_distribution_url_root: String,
}

/// Package manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackageManagerConfig {
    /// `name@version`; falls back to the `packageManager` field of `package.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,

    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    #[serde(default = "default_yarn_url_root")]
    pub yarn_url_root: String,

    /// Arguments used to install dependencies
    #[serde(default = "default_install_script")]
    pub install_script: String,
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            spec: None,
            registry_url: default_registry_url(),
            yarn_url_root: default_yarn_url_root(),
            install_script: default_install_script(),
        }
    }
}

/// A script run through the package manager, e.g. `run build`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    pub name: String,
    /// Package manager arguments
    pub command: String,
    /// Files or directories, relative to the working directory, whose
    /// content decides whether the script must run again
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PathBuf>,
    /// Extra environment for the child process
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_redirects: default_max_redirects(),
            proxy_url: None,
            retry: RetryConfig::default(),
            auth: None,
        }
    }
}

/// Mirror credentials; secrets are read from the named environment variables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

/// Resolved mirror credentials
#[derive(Debug)]
pub enum Credentials {
    /// HTTP basic authentication
    Basic {
        /// User name
        username: String,
        /// Password
        password: SecretString,
    },
    /// `Authorization: Bearer <token>`
    Bearer(SecretString),
}

/// Install cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// How long to wait for another process installing the same tool
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

const fn default_true() -> bool {
    true
}

fn default_node_url_root() -> String {
    DEFAULT_NODE_URL_ROOT.to_string()
}

fn default_node_url_path_pattern() -> String {
    DEFAULT_NODE_URL_PATH_PATTERN.to_string()
}

fn default_node_musl_url_root() -> String {
    DEFAULT_NODE_MUSL_URL_ROOT.to_string()
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

fn default_yarn_url_root() -> String {
    DEFAULT_YARN_URL_ROOT.to_string()
}

fn default_install_script() -> String {
    "install".to_string()
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_connect_timeout_secs() -> u64 {
    30
}

const fn default_max_redirects() -> usize {
    10
}

const fn default_lock_timeout_secs() -> u64 {
    600
}

impl Config {
    /// Minimal configuration for a Node.js version, everything else defaulted.
    #[must_use]
    pub fn for_node(version: impl Into<String>) -> Self {
        Self {
            working_directory: default_working_directory(),
            cache_directory: None,
            platform: None,
            verify_checksums: true,
            node: NodeConfig {
                version: version.into(),
                install_directory: None,
                distribution_url_root: default_node_url_root(),
                distribution_url_path_pattern: default_node_url_path_pattern(),
                musl_distribution_url_root: default_node_musl_url_root(),
            },
            package_manager: PackageManagerConfig::default(),
            scripts: Vec::new(),
            http: HttpConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        let absolute = std::path::absolute(path).map_err(|e| Error::io(e, path, "resolve"))?;
        let base_dir = absolute.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base_dir).map_err(|e| match e {
            Error::Configuration { message } => {
                Error::configuration(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Parse configuration text, resolving relative paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("invalid configuration: {e}")))?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let absolutize = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };
        self.working_directory = absolutize(&self.working_directory);
        self.cache_directory = self.cache_directory.as_deref().map(absolutize);
        self.node.install_directory = self.node.install_directory.as_deref().map(absolutize);
    }

    /// Check semantic constraints that TOML typing cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.node_spec().semver()?;
        if !self
            .node
            .distribution_url_path_pattern
            .contains("VERSION")
        {
            return Err(Error::configuration(
                "node.distribution_url_path_pattern must contain VERSION",
            ));
        }
        if let Some(spec) = &self.package_manager.spec {
            ToolSpec::parse_package_manager(spec)?;
        }
        if self.package_manager.install_script.trim().is_empty() {
            return Err(Error::configuration(
                "package_manager.install_script must not be empty",
            ));
        }
        let mut names = BTreeSet::new();
        for script in &self.scripts {
            if script.name.trim().is_empty() || script.command.trim().is_empty() {
                return Err(Error::configuration(
                    "every script needs a non-empty name and command",
                ));
            }
            if !names.insert(script.name.as_str()) {
                return Err(Error::configuration(format!(
                    "script '{}' is declared more than once",
                    script.name
                )));
            }
        }
        if self.http.retry.max_attempts == 0 {
            return Err(Error::configuration(
                "http.retry.max_attempts must be at least 1",
            ));
        }
        if let Some(auth) = &self.http.auth
            && auth.password_env.is_some()
            && auth.username.is_none()
        {
            return Err(Error::configuration(
                "http.auth.password_env requires http.auth.username",
            ));
        }
        Ok(())
    }

    /// Requested Node.js runtime
    #[must_use]
    pub fn node_spec(&self) -> ToolSpec {
        ToolSpec::node(self.node.version.clone())
    }

    /// Package manager to install, from configuration or `package.json`.
    ///
    /// # Errors
    ///
    /// Returns an error when a declaration is malformed or `package.json`
    /// cannot be parsed.
    pub fn package_manager_spec(&self) -> Result<Option<ToolSpec>> {
        if let Some(spec) = &self.package_manager.spec {
            return ToolSpec::parse_package_manager(spec).map(Some);
        }
        match PackageJson::read(&self.working_directory)? {
            Some(manifest) => manifest.declared_package_manager(),
            None => Ok(None),
        }
    }

    /// Cache root: `NODEKIT_CACHE_DIR`, then the configured directory, then
    /// the platform default.
    ///
    /// # Errors
    ///
    /// Returns an error if no writable cache directory can be found.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if std::env::var_os(paths::CACHE_DIR_ENV).is_none_or(|v| v.is_empty())
            && let Some(dir) = &self.cache_directory
        {
            return Ok(dir.clone());
        }
        paths::cache_dir()
    }

    /// Look up a script by name
    #[must_use]
    pub fn script(&self, name: &str) -> Option<&ScriptConfig> {
        self.scripts.iter().find(|s| s.name == name)
    }
}

impl HttpConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Resolve credentials from the configured environment variables.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a referenced variable is unset.
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        if let Some(var) = &auth.token_env {
            return read_secret(var).map(|token| Some(Credentials::Bearer(token)));
        }
        match (&auth.username, &auth.password_env) {
            (Some(username), Some(var)) => Ok(Some(Credentials::Basic {
                username: username.clone(),
                password: read_secret(var)?,
            })),
            (Some(username), None) => Ok(Some(Credentials::Basic {
                username: username.clone(),
                password: SecretString::from(String::new()),
            })),
            _ => Ok(None),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

fn read_secret(var: &str) -> Result<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| {
            Error::configuration(format!("environment variable {var} is not set"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const FULL: &str = r#"
working_directory = "frontend"
cache_directory = "/opt/nodekit-cache"
platform = "linux-x64-musl"
verify_checksums = false

[node]
version = "18.17.1"
distribution_url_root = "https://mirror.example.com/node/"

[package_manager]
spec = "pnpm@8.6.0"
install_script = "install --frozen-lockfile"

[[scripts]]
name = "assemble"
command = "run build"
inputs = ["src", "vite.config.ts"]

[[scripts]]
name = "check"
command = "run test"
env = { CI = "true" }

[http]
timeout_secs = 60
proxy_url = "http://proxy:3128"

[http.retry]
max_attempts = 5
initial_delay_ms = 100

[http.auth]
token_env = "MIRROR_TOKEN"

[cache]
lock_timeout_secs = 30
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(FULL, Path::new("/work")).unwrap();
        assert_eq!(config.working_directory, PathBuf::from("/work/frontend"));
        assert_eq!(
            config.cache_directory,
            Some(PathBuf::from("/opt/nodekit-cache"))
        );
        assert_eq!(config.platform.unwrap().to_string(), "linux-x64-musl");
        assert!(!config.verify_checksums);
        assert_eq!(config.node.version, "18.17.1");
        assert_eq!(
            config.node.distribution_url_path_pattern,
            DEFAULT_NODE_URL_PATH_PATTERN
        );
        assert_eq!(config.package_manager.registry_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.scripts.len(), 2);
        assert_eq!(config.script("check").unwrap().env["CI"], "true");
        assert_eq!(config.http.timeout(), Duration::from_secs(60));
        assert_eq!(config.http.retry.max_attempts, 5);
        assert_eq!(config.http.retry.max_delay_ms, 10_000);
        assert_eq!(config.cache.lock_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config =
            Config::from_toml_str("[node]\nversion = \"16.14.0\"\n", Path::new("/p")).unwrap();
        assert_eq!(config.working_directory, PathBuf::from("/p/."));
        assert!(config.verify_checksums);
        assert_eq!(config.http.retry, RetryConfig::default());
        assert_eq!(config.http.max_redirects, 10);
        assert_eq!(config.package_manager.install_script, "install");
        assert!(config.scripts.is_empty());
    }

    #[test]
    fn test_rejects_invalid_version() {
        let err = Config::from_toml_str("[node]\nversion = \"lts\"\n", Path::new("/")).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = Config::from_toml_str(
            "[node]\nversion = \"16.14.0\"\nflavour = \"x\"\n",
            Path::new("/"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn test_rejects_duplicate_scripts() {
        let content = r#"
[node]
version = "16.14.0"
[[scripts]]
name = "build"
command = "run build"
[[scripts]]
name = "build"
command = "run build:prod"
"#;
        let err = Config::from_toml_str(content, Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let content = "[node]\nversion = \"16.14.0\"\n[http.retry]\nmax_attempts = 0\n";
        assert!(Config::from_toml_str(content, Path::new("/")).is_err());
    }

    #[test]
    fn test_package_manager_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"packageManager":"yarn@1.22.19"}"#,
        )
        .unwrap();
        let config = Config::from_toml_str("[node]\nversion = \"16.14.0\"\n", dir.path()).unwrap();
        let spec = config.package_manager_spec().unwrap().unwrap();
        assert_eq!(spec.to_string(), "yarn@1.22.19");
    }

    #[test]
    fn test_package_manager_config_wins_over_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"packageManager":"yarn@1.22.19"}"#,
        )
        .unwrap();
        let config = Config::from_toml_str(
            "[node]\nversion = \"16.14.0\"\n[package_manager]\nspec = \"npm@9.6.7\"\n",
            dir.path(),
        )
        .unwrap();
        assert_eq!(
            config.package_manager_spec().unwrap().unwrap().to_string(),
            "npm@9.6.7"
        );
    }

    #[test]
    fn test_no_package_manager_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_toml_str("[node]\nversion = \"16.14.0\"\n", dir.path()).unwrap();
        assert!(config.package_manager_spec().unwrap().is_none());
    }

    #[test]
    fn test_bearer_credentials_from_env() {
        let config = Config::from_toml_str(FULL, Path::new("/work")).unwrap();
        temp_env::with_var("MIRROR_TOKEN", Some("s3cret"), || {
            match config.http.credentials().unwrap() {
                Some(Credentials::Bearer(token)) => assert_eq!(token.expose_secret(), "s3cret"),
                other => panic!("unexpected credentials: {other:?}"),
            }
        });
        temp_env::with_var_unset("MIRROR_TOKEN", || {
            let err = config.http.credentials().unwrap_err();
            assert!(err.to_string().contains("MIRROR_TOKEN is not set"));
        });
    }

    #[test]
    fn test_basic_credentials_from_env() {
        let http = HttpConfig {
            auth: Some(AuthConfig {
                username: Some("ci".to_string()),
                password_env: Some("MIRROR_PASSWORD".to_string()),
                token_env: None,
            }),
            ..HttpConfig::default()
        };
        temp_env::with_var("MIRROR_PASSWORD", Some("hunter2"), || {
            match http.credentials().unwrap() {
                Some(Credentials::Basic { username, password }) => {
                    assert_eq!(username, "ci");
                    assert_eq!(password.expose_secret(), "hunter2");
                }
                other => panic!("unexpected credentials: {other:?}"),
            }
        });
    }

    #[test]
    fn test_cache_root_prefers_env_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_node("16.14.0");
        config.cache_directory = Some(dir.path().join("configured"));
        temp_env::with_var_unset(paths::CACHE_DIR_ENV, || {
            assert_eq!(config.cache_root().unwrap(), dir.path().join("configured"));
        });
        let env_dir = dir.path().join("from-env");
        temp_env::with_var(paths::CACHE_DIR_ENV, Some(&env_dir), || {
            assert_eq!(config.cache_root().unwrap(), env_dir);
        });
    }
}
