//! Network namespace and link capabilities
//!
//! The orchestrator only talks to [`NetPlatform`]; [`IpPlatform`] implements
//! it with iproute2 and `setns(2)`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::{Error, Result};
use crate::fixture::Address;

/// Platform operations needed to build and tear down a test environment
#[async_trait]
pub trait NetPlatform: Send + Sync {
    async fn create_namespace(&self, name: &str) -> Result<()>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Create a veth pair with `peer` moved into `netns`, and bring `host` up
    async fn add_veth_pair(&self, host: &str, peer: &str, netns: &str) -> Result<()>;

    /// Set the MAC address of a link inside `netns`
    async fn set_mac(&self, netns: &str, link: &str, mac: &str) -> Result<()>;

    /// Delete a host-side link (removes its veth peer as well)
    async fn delete_link(&self, name: &str) -> Result<()>;

    async fn add_address(&self, link: &str, addr: &Address) -> Result<()>;

    /// Mount a spare sysfs at `target`
    async fn mount_sysfs(&self, target: &Path) -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;

    /// Arrange for `cmd` to run inside `netns`
    fn enter_namespace(&self, cmd: &mut Command, netns: &str) -> Result<()>;

    /// Argument prefix for programs that must be started through the
    /// namespace exec wrapper so that `/sys` is remounted for them
    fn exec_wrapper(&self, netns: &str) -> Vec<OsString>;
}

/// [`NetPlatform`] backed by the `ip` tool
#[derive(Debug, Clone)]
pub struct IpPlatform {
    ip: PathBuf,
}

impl IpPlatform {
    pub fn new(ip: PathBuf) -> Self {
        Self { ip }
    }

    async fn ip(&self, operation: &str, args: &[&str]) -> Result<()> {
        let mut cmd = Command::new(&self.ip);
        cmd.args(args);
        run_checked(cmd, operation).await
    }
}

/// Run a command to completion, turning a non-zero exit into an error
async fn run_checked(mut cmd: Command, operation: &str) -> Result<()> {
    tracing::debug!("{}: {:?}", operation, cmd.as_std());
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::platform(operation, e.to_string()))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(Error::platform(
            operation,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

#[async_trait]
impl NetPlatform for IpPlatform {
    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.ip("create namespace", &["netns", "add", name]).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.ip("delete namespace", &["netns", "delete", name]).await
    }

    async fn add_veth_pair(&self, host: &str, peer: &str, netns: &str) -> Result<()> {
        self.ip(
            "add veth pair",
            &["link", "add", host, "type", "veth", "peer", "name", peer, "netns", netns],
        )
        .await?;
        self.ip("set link up", &["link", "set", "dev", host, "up"]).await
    }

    async fn set_mac(&self, netns: &str, link: &str, mac: &str) -> Result<()> {
        self.ip(
            "set mac address",
            &["-n", netns, "link", "set", "dev", link, "address", mac],
        )
        .await
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        self.ip("delete link", &["link", "del", "dev", name]).await
    }

    async fn add_address(&self, link: &str, addr: &Address) -> Result<()> {
        let cidr = addr.to_string();
        self.ip("add address", &["addr", "add", &cidr, "dev", link]).await
    }

    async fn mount_sysfs(&self, target: &Path) -> Result<()> {
        let mut cmd = Command::new("mount");
        cmd.args(["-t", "sysfs", "none"]).arg(target);
        run_checked(cmd, "mount sysfs").await
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let mut cmd = Command::new("umount");
        cmd.arg(target);
        run_checked(cmd, "unmount").await
    }

    #[cfg(target_os = "linux")]
    fn enter_namespace(&self, cmd: &mut Command, netns: &str) -> Result<()> {
        use std::os::fd::AsRawFd;

        let path = Path::new("/run/netns").join(netns);
        let ns = std::fs::File::open(&path)
            .map_err(|e| Error::platform("open namespace", format!("{}: {}", path.display(), e)))?;

        // SAFETY: setns is async-signal-safe; the closure only touches the
        // namespace fd it owns.
        unsafe {
            cmd.pre_exec(move || {
                if libc::setns(ns.as_raw_fd(), libc::CLONE_NEWNET) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn enter_namespace(&self, _cmd: &mut Command, _netns: &str) -> Result<()> {
        Err(Error::platform(
            "enter namespace",
            "network namespaces are only supported on Linux",
        ))
    }

    fn exec_wrapper(&self, netns: &str) -> Vec<OsString> {
        vec![
            self.ip.clone().into_os_string(),
            "netns".into(),
            "exec".into(),
            netns.into(),
        ]
    }
}
