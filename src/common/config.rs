//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Locations of the external programs the harness drives
    #[serde(default)]
    pub binaries: Binaries,

    /// Polling and shutdown timings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Namespace and link naming
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Directory holding the `test_*` scenario directories
    #[serde(default = "default_testcases")]
    pub testcases: PathBuf,
}

/// External programs
#[derive(Debug, Deserialize, Clone)]
pub struct Binaries {
    /// Control-bus daemon (ubusd)
    #[serde(default = "default_control_daemon")]
    pub control_daemon: PathBuf,

    /// Control-bus client (ubus)
    #[serde(default = "default_control_client")]
    pub control_client: PathBuf,

    /// DHCP server
    #[serde(default = "default_dhcp_server")]
    pub dhcp_server: PathBuf,

    /// The daemon under test (netifd)
    #[serde(default = "default_daemon")]
    pub daemon: PathBuf,

    /// iproute2 `ip`, used for introspection and the namespace exec wrapper
    #[serde(default = "default_ip")]
    pub ip: PathBuf,

    /// Shell spawned by `--shell`
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            control_daemon: default_control_daemon(),
            control_client: default_control_client(),
            dhcp_server: default_dhcp_server(),
            daemon: default_daemon(),
            ip: default_ip(),
            shell: default_shell(),
        }
    }
}

fn default_control_daemon() -> PathBuf {
    PathBuf::from("/opt/netifd/sbin/ubusd")
}
fn default_control_client() -> PathBuf {
    PathBuf::from("/opt/netifd/bin/ubus")
}
fn default_dhcp_server() -> PathBuf {
    PathBuf::from("/usr/sbin/dhcpd")
}
fn default_daemon() -> PathBuf {
    PathBuf::from("/opt/netifd/sbin/netifd")
}
fn default_ip() -> PathBuf {
    PathBuf::from("ip")
}
fn default_shell() -> PathBuf {
    PathBuf::from("bash")
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Sleep between readiness polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Deadline for the control bus to answer `list`
    #[serde(default = "default_control_ready")]
    pub control_ready_ms: u64,

    /// Deadline for all `waitfor` interfaces to report up
    #[serde(default = "default_interfaces_up")]
    pub interfaces_up_ms: u64,

    /// Time a process gets to exit after SIGTERM before it is killed
    #[serde(default = "default_process_grace")]
    pub process_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            control_ready_ms: default_control_ready(),
            interfaces_up_ms: default_interfaces_up(),
            process_grace_ms: default_process_grace(),
        }
    }
}

impl Timeouts {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn control_ready(&self) -> Duration {
        Duration::from_millis(self.control_ready_ms)
    }

    pub fn interfaces_up(&self) -> Duration {
        Duration::from_millis(self.interfaces_up_ms)
    }

    pub fn process_grace(&self) -> Duration {
        Duration::from_millis(self.process_grace_ms)
    }
}

fn default_poll_interval() -> u64 {
    500
}
fn default_control_ready() -> u64 {
    1_000
}
fn default_interfaces_up() -> u64 {
    15_000
}
fn default_process_grace() -> u64 {
    3_000
}

/// Namespace and link naming
#[derive(Debug, Deserialize, Clone)]
pub struct NamespaceConfig {
    /// Name of the isolated network namespace
    #[serde(default = "default_ns_name")]
    pub name: String,

    /// Prefix for the host end of every veth pair
    #[serde(default = "default_host_prefix")]
    pub host_prefix: String,

    /// Interface name of the primary link inside the namespace
    #[serde(default = "default_primary_interface")]
    pub primary_interface: String,

    /// MAC address assigned to the namespace end of the primary link
    #[serde(default = "default_primary_mac")]
    pub primary_mac: Option<String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            name: default_ns_name(),
            host_prefix: default_host_prefix(),
            primary_interface: default_primary_interface(),
            primary_mac: default_primary_mac(),
        }
    }
}

impl NamespaceConfig {
    /// Name of the host end of the veth pair leading to `interface`
    pub fn host_link(&self, interface: &str) -> String {
        format!("{}{}", self.host_prefix, interface)
    }
}

fn default_ns_name() -> String {
    "test".to_string()
}
fn default_host_prefix() -> String {
    "netifd_".to_string()
}
fn default_primary_interface() -> String {
    "eth0".to_string()
}
fn default_primary_mac() -> Option<String> {
    Some("02:eb:eb:eb:eb:eb".to_string())
}
fn default_testcases() -> PathBuf {
    PathBuf::from("testcases")
}

impl Config {
    /// Load configuration
    ///
    /// An explicitly given path must exist. Without one, the default config
    /// file is used if present and built-in defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match config_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve a configured program to an executable path
    ///
    /// Bare names are searched in PATH; paths are taken as given.
    pub fn resolve_binary(&self, program: &Path) -> Result<PathBuf> {
        if program.components().count() > 1 {
            return Ok(program.to_path_buf());
        }
        which::which(program).map_err(|e| {
            Error::Config(format!("Program '{}' not found: {}", program.display(), e))
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binaries: Binaries::default(),
            timeouts: Timeouts::default(),
            namespace: NamespaceConfig::default(),
            testcases: default_testcases(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = Config::default();
        assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.timeouts.control_ready(), Duration::from_secs(1));
        assert_eq!(config.timeouts.interfaces_up(), Duration::from_secs(15));
        assert_eq!(config.timeouts.process_grace(), Duration::from_secs(3));
        assert_eq!(config.namespace.host_link("eth0"), "netifd_eth0");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
testcases = "/srv/cases"

[binaries]
daemon = "/usr/local/sbin/netifd"

[timeouts]
interfaces_up_ms = 30000
"#,
        )
        .unwrap();
        assert_eq!(config.testcases, PathBuf::from("/srv/cases"));
        assert_eq!(config.binaries.daemon, PathBuf::from("/usr/local/sbin/netifd"));
        assert_eq!(config.binaries.dhcp_server, PathBuf::from("/usr/sbin/dhcpd"));
        assert_eq!(config.timeouts.interfaces_up_ms, 30_000);
        assert_eq!(config.timeouts.poll_interval_ms, 500);
        assert_eq!(config.namespace.name, "test");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(Error::FileRead { .. })));
    }

    #[test]
    fn test_resolve_binary_keeps_paths() {
        let config = Config::default();
        let resolved = config.resolve_binary(Path::new("/opt/x/bin/ubus")).unwrap();
        assert_eq!(resolved, PathBuf::from("/opt/x/bin/ubus"));
    }
}
