//! Scenario directory loading
//!
//! A scenario is a `test_<name>` directory holding the daemon's network
//! configuration plus the fixtures the converged state is checked against.
//! Every file in the directory must be recognized here; anything else is a
//! load error so that typos in fixture names cannot silently skip checks.

use std::fs;
use std::path::{Path, PathBuf};

use super::address::Address;
use crate::common::{Error, Result};

/// File every scenario directory must contain
pub const NETWORK_CONFIG_NAME: &str = "network";

/// Directory name prefix marking a scenario
pub const SCENARIO_DIR_PREFIX: &str = "test_";

const WAITFOR_NAME: &str = "waitfor";
const NAMESERVERS_NAME: &str = "nameservers";
const DHCP_ADDR_MARKER: &str = "#addr";

/// IP version a check is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
    /// Not scoped to a protocol family
    Any,
}

impl IpVersion {
    /// `ip` command line flag selecting the family
    pub fn ip_flag(self) -> Option<&'static str> {
        match self {
            IpVersion::V4 => Some("-4"),
            IpVersion::V6 => Some("-6"),
            IpVersion::Any => None,
        }
    }

    /// Numeric version, as used in sysctl and dhcpd paths
    pub fn number(self) -> Option<u8> {
        match self {
            IpVersion::V4 => Some(4),
            IpVersion::V6 => Some(6),
            IpVersion::Any => None,
        }
    }
}

/// What a validation file checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// `ip addr` output, compared inside `addr_info`
    Address,
    /// `ip -d link` output
    Link,
    /// `ip route ... protocol static` output
    Route,
    /// Key/value mapping of sysctl entries
    Sysctl,
    /// Expected resolver addresses, one per line
    Nameservers,
}

impl ValidationKind {
    /// Map a JSON fixture filename prefix to its kind and version
    pub fn from_prefix(prefix: &str) -> Option<(Self, IpVersion)> {
        let resolved = match prefix {
            "ipaddr4" => (ValidationKind::Address, IpVersion::V4),
            "ipaddr6" => (ValidationKind::Address, IpVersion::V6),
            "iplink" => (ValidationKind::Link, IpVersion::Any),
            "iproute4" => (ValidationKind::Route, IpVersion::V4),
            "iproute6" => (ValidationKind::Route, IpVersion::V6),
            "sysctl4" => (ValidationKind::Sysctl, IpVersion::V4),
            "sysctl6" => (ValidationKind::Sysctl, IpVersion::V6),
            _ => return None,
        };
        Some(resolved)
    }
}

/// One piece of expected post-convergence state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFile {
    /// File stem, used as the report suite name
    pub name: String,
    /// Interface the check is scoped to; `None` for global checks
    pub interface: Option<String>,
    pub kind: ValidationKind,
    pub version: IpVersion,
    pub path: PathBuf,
}

impl ValidationFile {
    /// Recognize a `<prefix>_<interface>.json` fixture
    fn from_fixture(path: &Path, file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;
        let (prefix, interface) = stem.split_once('_')?;
        let (kind, version) = ValidationKind::from_prefix(prefix)?;
        if interface.is_empty() {
            return None;
        }
        Some(Self {
            name: stem.to_string(),
            interface: Some(interface.to_string()),
            kind,
            version,
            path: path.to_path_buf(),
        })
    }

    fn nameservers(path: &Path) -> Self {
        Self {
            name: NAMESERVERS_NAME.to_string(),
            interface: None,
            kind: ValidationKind::Nameservers,
            version: IpVersion::Any,
            path: path.to_path_buf(),
        }
    }
}

/// DHCP server configuration for one interface and IP version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpConfig {
    pub name: String,
    pub interface: String,
    pub version: IpVersion,
    pub path: PathBuf,
    /// Address for the host end of the link, from the `#addr` marker line
    pub addr: Option<Address>,
}

impl DhcpConfig {
    /// Recognize a `dhcpd{4|6}_<interface>.conf` file name
    fn matches(file_name: &str) -> Option<(IpVersion, &str)> {
        let stem = file_name.strip_suffix(".conf")?;
        let (version, interface) = if let Some(rest) = stem.strip_prefix("dhcpd4_") {
            (IpVersion::V4, rest)
        } else if let Some(rest) = stem.strip_prefix("dhcpd6_") {
            (IpVersion::V6, rest)
        } else {
            return None;
        };
        (!interface.is_empty()).then_some((version, interface))
    }

    fn load(path: &Path, version: IpVersion, interface: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        let addr = content
            .lines()
            .find_map(|line| line.strip_prefix(DHCP_ADDR_MARKER))
            .map(|cidr| cidr.trim().parse::<Address>())
            .transpose()?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            interface: interface.to_string(),
            version,
            path: path.to_path_buf(),
            addr,
        })
    }
}

/// A named test case backed by a fixture directory
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    path: PathBuf,
    pub validation_files: Vec<ValidationFile>,
    pub waitfor_interfaces: Vec<String>,
    pub dhcp_configs: Vec<DhcpConfig>,
}

impl Scenario {
    /// Load a scenario from its directory
    pub fn load(dir: &Path) -> Result<Self> {
        let dir_name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = dir_name
            .strip_prefix(SCENARIO_DIR_PREFIX)
            .unwrap_or(&dir_name)
            .to_string();

        let mut entries: Vec<String> = fs::read_dir(dir)
            .map_err(|e| Error::file_read(dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        let Some(pos) = entries.iter().position(|e| e == NETWORK_CONFIG_NAME) else {
            return Err(Error::MissingFile {
                scenario: name,
                file: NETWORK_CONFIG_NAME.to_string(),
            });
        };
        entries.remove(pos);

        let mut scenario = Self {
            name,
            path: dir.to_path_buf(),
            validation_files: Vec::new(),
            waitfor_interfaces: Vec::new(),
            dhcp_configs: Vec::new(),
        };

        for entry in entries {
            let full_path = dir.join(&entry);
            if let Some((version, interface)) = DhcpConfig::matches(&entry) {
                scenario
                    .dhcp_configs
                    .push(DhcpConfig::load(&full_path, version, interface)?);
            } else if entry == WAITFOR_NAME {
                let content = fs::read_to_string(&full_path)
                    .map_err(|e| Error::file_read(&full_path, e))?;
                scenario.waitfor_interfaces = parse_waitfor(&content);
            } else if entry == NAMESERVERS_NAME {
                scenario
                    .validation_files
                    .push(ValidationFile::nameservers(&full_path));
            } else if let Some(file) = ValidationFile::from_fixture(&full_path, &entry) {
                scenario.validation_files.push(file);
            } else {
                return Err(Error::UnknownFile {
                    scenario: scenario.name,
                    file: entry,
                });
            }
        }

        Ok(scenario)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory handed to the daemon as its configuration directory
    pub fn config_dir(&self) -> &Path {
        &self.path
    }

    pub fn network_config(&self) -> PathBuf {
        self.path.join(NETWORK_CONFIG_NAME)
    }
}

/// Interface names, one per line; blank lines and `#` comments are skipped
fn parse_waitfor(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Load every `test_*` directory below `testcases`, in name order
pub fn discover(testcases: &Path) -> Result<Vec<Scenario>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(testcases)
        .map_err(|e| Error::file_read(testcases, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(SCENARIO_DIR_PREFIX)
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let scenarios = dirs
        .iter()
        .map(|dir| Scenario::load(dir))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!("Discovered {} scenarios in {}", scenarios.len(), testcases.display());
    Ok(scenarios)
}

/// Look a scenario up by name, with or without the `test_` prefix
pub fn find<'a>(scenarios: &'a [Scenario], name: &str) -> Option<&'a Scenario> {
    let name = name.strip_prefix(SCENARIO_DIR_PREFIX).unwrap_or(name);
    scenarios.iter().find(|s| s.name == name)
}
