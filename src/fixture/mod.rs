//! Fixture model
//!
//! Typed, immutable description of a scenario directory: which checks to
//! run, which interfaces to wait for and which DHCP servers to start.

mod address;
mod scenario;

pub use address::Address;
pub use scenario::{
    discover, find, DhcpConfig, IpVersion, Scenario, ValidationFile, ValidationKind,
    NETWORK_CONFIG_NAME, SCENARIO_DIR_PREFIX,
};
