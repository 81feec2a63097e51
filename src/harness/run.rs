//! Per-scenario environment orchestration
//!
//! A [`ScenarioRun`] walks one scenario through its setup states, validates
//! the converged state and tears everything down again. Setup errors abort
//! the scenario; validation mismatches are recorded per check.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tempfile::TempDir;
use tokio::process::Command;

use super::platform::NetPlatform;
use super::process::{run_command, ProcessSet};
use super::timer::Timer;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::compare::compare;
use crate::fixture::{IpVersion, Scenario, ValidationFile, ValidationKind};
use crate::report::{Outcome, ResultWriter};

const RESOLV_CONF: &str = "resolv.conf";
const SYSFS_MOUNT: &str = "dummy_sys_mount";

/// Setup progress of a scenario environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    NamespaceCreated,
    InterfacesWired,
    DhcpServersStarted,
    ControlDaemonStarted,
    ControlDaemonReady,
    MainDaemonStarted,
    NetworkConverged,
    InterfacesUp,
    Validated,
    TornDown,
}

/// Resources and state of one scenario execution
pub struct ScenarioRun<'a> {
    config: &'a Config,
    platform: &'a dyn NetPlatform,
    scenario: &'a Scenario,
    state: RunState,
    scratch: Option<TempDir>,
    sysfs_mount: Option<PathBuf>,
    namespace: Option<String>,
    /// Host ends of created veth pairs
    links: Vec<String>,
    processes: ProcessSet,
}

impl<'a> ScenarioRun<'a> {
    pub fn new(config: &'a Config, platform: &'a dyn NetPlatform, scenario: &'a Scenario) -> Self {
        Self {
            config,
            platform,
            scenario,
            state: RunState::Idle,
            scratch: None,
            sysfs_mount: None,
            namespace: None,
            links: Vec::new(),
            processes: ProcessSet::new(config.timeouts.process_grace()),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Set up the environment, recorded as the `Setup` test
    ///
    /// A setup error is recorded as fatal; returns whether validation
    /// should follow.
    pub async fn prepare(&mut self, rw: &mut ResultWriter) -> bool {
        let mut test = rw.start_test("Setup");
        match self.setup().await {
            Ok(()) => true,
            Err(e) => {
                test.fatal(e.to_string());
                false
            }
        }
    }

    /// Bring the environment from `Idle` up to `InterfacesUp`
    pub async fn setup(&mut self) -> Result<()> {
        let scratch = tempfile::Builder::new().prefix("netharness-").tempdir()?;
        let sysfs = scratch.path().join(SYSFS_MOUNT);
        self.scratch = Some(scratch);

        // `ip netns exec` lazily unmounts /sys before remounting it, which
        // fails with EPERM if that was the only sysfs mount.
        std::fs::create_dir(&sysfs)?;
        self.platform.mount_sysfs(&sysfs).await?;
        self.sysfs_mount = Some(sysfs);

        let ns = self.config.namespace.name.clone();
        self.platform.create_namespace(&ns).await?;
        self.namespace = Some(ns);
        self.advance(RunState::NamespaceCreated);

        self.wire_primary_link().await?;
        self.advance(RunState::InterfacesWired);

        self.start_dhcp_servers().await?;
        self.advance(RunState::DhcpServersStarted);

        let cmd = self.ns_command(&self.config.binaries.control_daemon)?;
        self.processes.spawn(cmd, "control daemon", None)?;
        self.advance(RunState::ControlDaemonStarted);

        self.wait_for_control_bus().await?;
        self.advance(RunState::ControlDaemonReady);

        let mut monitor = self.ns_command(&self.config.binaries.control_client)?;
        monitor.arg("monitor");
        let log = self.scratch_file("ubus.monitor")?;
        self.processes.spawn(monitor, "control bus monitor", Some(log.as_path()))?;

        self.start_daemon()?;
        self.advance(RunState::MainDaemonStarted);

        if !self.control(&["wait_for", "network"]).await?.status.success() {
            return Err(Error::Timeout("Timeout waiting for network daemon".to_string()));
        }
        self.advance(RunState::NetworkConverged);

        self.wait_for_interfaces().await?;
        self.advance(RunState::InterfacesUp);
        Ok(())
    }

    async fn wire_primary_link(&mut self) -> Result<()> {
        let ns_config = &self.config.namespace;
        let host = ns_config.host_link(&ns_config.primary_interface);
        let ns = self.namespace()?.to_string();

        self.platform
            .add_veth_pair(&host, &ns_config.primary_interface, &ns)
            .await?;
        self.links.push(host);

        if let Some(mac) = &ns_config.primary_mac {
            self.platform
                .set_mac(&ns, &ns_config.primary_interface, mac)
                .await?;
        }
        Ok(())
    }

    async fn start_dhcp_servers(&mut self) -> Result<()> {
        let scenario = self.scenario;
        if scenario.dhcp_configs.is_empty() {
            return Ok(());
        }
        let ns = self.namespace()?.to_string();
        let dhcp_server = self.config.resolve_binary(&self.config.binaries.dhcp_server)?;

        for dhcp in &scenario.dhcp_configs {
            let host = self.config.namespace.host_link(&dhcp.interface);
            if !self.links.contains(&host) {
                self.platform
                    .add_veth_pair(&host, &dhcp.interface, &ns)
                    .await?;
                self.links.push(host.clone());
            }
            if let Some(addr) = &dhcp.addr {
                self.platform.add_address(&host, addr).await?;
            }

            let version = dhcp.version.number().unwrap_or(4);
            let base = format!("dhcpd{}_{}", version, dhcp.interface);
            let lease = self.scratch_file(&format!("{base}.lease"))?;
            let log = self.scratch_file(&format!("{base}.log"))?;
            // dhcpd refuses to start without an existing lease file
            std::fs::File::create(&lease)?;

            let mut cmd = Command::new(&dhcp_server);
            cmd.arg("-d")
                .arg(format!("-{version}"))
                .arg("-f")
                .arg("-cf")
                .arg(&dhcp.path)
                .arg("-lf")
                .arg(&lease)
                .arg(&host);
            self.processes.spawn(cmd, &base, Some(log.as_path()))?;
        }
        Ok(())
    }

    fn start_daemon(&mut self) -> Result<()> {
        let daemon = self.config.resolve_binary(&self.config.binaries.daemon)?;
        let mut argv: Vec<OsString> = self.platform.exec_wrapper(self.namespace()?);
        argv.push(daemon.into_os_string());
        argv.extend([
            OsString::from("-c"),
            self.scenario.config_dir().as_os_str().to_owned(),
            OsString::from("-r"),
            self.scratch_file(RESOLV_CONF)?.into_os_string(),
            OsString::from("-S"),
            OsString::from("-p"),
            OsString::from("/"),
            OsString::from("-l"),
            OsString::from("4"),
        ]);

        let program = self.config.resolve_binary(Path::new(&argv[0]))?;
        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]);
        let log = self.scratch_file("netifd.log")?;
        self.processes.spawn(cmd, "network daemon", Some(log.as_path()))
    }

    async fn wait_for_control_bus(&self) -> Result<()> {
        let mut timer = Timer::new(self.config.timeouts.control_ready());
        tracing::debug!("Waiting for control bus to start");
        loop {
            if self.control(&["list"]).await?.status.success() {
                return Ok(());
            }
            tokio::time::sleep(self.config.timeouts.poll_interval()).await;
            if timer.expired() {
                return Err(Error::Timeout("Timeout waiting for ubus".to_string()));
            }
        }
    }

    async fn wait_for_interfaces(&self) -> Result<()> {
        let mut pending = self.scenario.waitfor_interfaces.clone();
        if pending.is_empty() {
            return Ok(());
        }

        let mut timer = Timer::new(self.config.timeouts.interfaces_up());
        tracing::debug!("Waiting for interfaces to come up: {}", pending.join(", "));
        while !pending.is_empty() {
            let mut still_down = Vec::with_capacity(pending.len());
            for interface in pending {
                if self.interface_is_up(&interface).await? {
                    tracing::debug!("Interface {} is up", interface);
                } else {
                    still_down.push(interface);
                }
            }
            pending = still_down;
            if pending.is_empty() {
                break;
            }

            tokio::time::sleep(self.config.timeouts.poll_interval()).await;
            if timer.expired() {
                return Err(Error::Timeout(format!(
                    "Timeout waiting for interfaces: {}",
                    pending.join(", ")
                )));
            }
        }
        Ok(())
    }

    async fn interface_is_up(&self, interface: &str) -> Result<bool> {
        let object = format!("network.interface.{interface}");
        let output = self.control(&["call", object.as_str(), "status"]).await?;
        if !output.status.success() {
            return Ok(false);
        }
        let up = serde_json::from_slice::<Value>(&output.stdout)
            .ok()
            .and_then(|status| status.get("up").and_then(Value::as_bool))
            .unwrap_or(false);
        Ok(up)
    }

    /// Drop into an interactive shell inside the namespace
    pub async fn shell(&self) -> Result<()> {
        let mut cmd = self.ns_command(&self.config.binaries.shell)?;
        let status = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::spawn("shell", e))?;
        tracing::debug!("Shell exited with {}", status);
        Ok(())
    }

    /// Run every validation file of the scenario
    pub async fn validate(&mut self, rw: &mut ResultWriter) {
        let scenario = self.scenario;
        for file in &scenario.validation_files {
            match file.kind {
                ValidationKind::Nameservers => {
                    let mut test = rw.start_test("Nameserver");
                    test.record(self.check_nameservers(file));
                }
                ValidationKind::Address => {
                    let mut args = vec!["addr", "show", "dev", interface(file)];
                    if file.version == IpVersion::V6 {
                        args.extend(["scope", "global"]);
                    }
                    self.validate_ip(rw, file, &args, Some("addr_info")).await;
                }
                ValidationKind::Link => {
                    let args = ["-d", "link", "show", "dev", interface(file)];
                    self.validate_ip(rw, file, &args, None).await;
                }
                ValidationKind::Route => {
                    let args = ["route", "show", "dev", interface(file), "protocol", "static"];
                    self.validate_ip(rw, file, &args, None).await;
                }
                ValidationKind::Sysctl => self.validate_sysctl(rw, file).await,
            }
        }
        self.advance(RunState::Validated);
    }

    async fn validate_ip(
        &self,
        rw: &mut ResultWriter,
        file: &ValidationFile,
        args: &[&str],
        select: Option<&str>,
    ) {
        let mut suite = rw.start_suite(&file.name);
        let loaded = {
            let mut test = suite.start_test("Setup");
            match self.load_ip_state(file, args).await {
                Ok(loaded) => loaded,
                Err(message) => {
                    test.fatal(message);
                    return;
                }
            }
        };
        let (expected, actual) = loaded;
        compare(&mut suite, &expected, &actual, select);
    }

    /// Fetch introspection output and the expected fixture
    async fn load_ip_state(
        &self,
        file: &ValidationFile,
        args: &[&str],
    ) -> std::result::Result<(Value, Value), String> {
        let mut cmd = self
            .ns_command(&self.config.binaries.ip)
            .map_err(|e| e.to_string())?;
        if let Some(flag) = file.version.ip_flag() {
            cmd.arg(flag);
        }
        cmd.arg("-j").args(args);

        let output = run_command(cmd, "ip").await.map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!(
                "Error getting current config: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let actual: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("Invalid introspection output: {e}"))?;
        let expected = read_json(&file.path)?;
        Ok((expected, actual))
    }

    async fn validate_sysctl(&self, rw: &mut ResultWriter, file: &ValidationFile) {
        let mut suite = rw.start_suite(&file.name);
        let expected = match read_json(&file.path) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                suite
                    .start_test("Setup")
                    .fatal("Sysctl fixture must be a JSON object");
                return;
            }
            Err(message) => {
                suite.start_test("Setup").fatal(message);
                return;
            }
        };

        let interface = match interface(file) {
            "global" => "..",
            other => other,
        };
        let version = file.version.number().unwrap_or(4);
        let dir = PathBuf::from(format!("/proc/sys/net/ipv{version}/conf/{interface}"));

        for (key, value) in &expected {
            let mut test = suite.start_test(key);
            test.record(self.check_sysctl(&dir.join(key), value).await);
        }
    }

    async fn check_sysctl(&self, path: &Path, expected: &Value) -> Outcome {
        let output = match self.ns_command(Path::new("cat")) {
            Ok(mut cmd) => {
                cmd.arg(path);
                run_command(cmd, "cat").await
            }
            Err(e) => Err(e),
        };
        let output = match output {
            Ok(output) if output.status.success() => output,
            _ => return Outcome::Fatal("Cannot access sysctl file".to_string()),
        };

        let actual = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let expected = match expected {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if actual == expected {
            Outcome::Pass
        } else {
            Outcome::Fail(format!(
                "Value '{actual}' does not match expected value '{expected}'"
            ))
        }
    }

    fn check_nameservers(&self, file: &ValidationFile) -> Outcome {
        let expected: BTreeSet<String> = match std::fs::read_to_string(&file.path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => return Outcome::Fatal(format!("Cannot read {}: {}", file.path.display(), e)),
        };

        let resolv = match self.scratch_file(RESOLV_CONF) {
            Ok(path) => path,
            Err(e) => return Outcome::Fatal(e.to_string()),
        };
        let actual: BTreeSet<String> = match std::fs::read_to_string(&resolv) {
            Ok(content) => content
                .lines()
                .filter(|l| l.starts_with("nameserver"))
                .filter_map(|l| l.split_whitespace().nth(1))
                .map(str::to_string)
                .collect(),
            Err(e) => return Outcome::Fatal(format!("Cannot read resolver output: {e}")),
        };

        nameserver_outcome(&expected, &actual)
    }

    /// Release every resource; safe to call repeatedly and from any state
    pub async fn teardown(&mut self) {
        for link in self.links.drain(..) {
            if let Err(e) = self.platform.delete_link(&link).await {
                tracing::warn!("Teardown: {}", e);
            }
        }
        if let Some(ns) = self.namespace.take() {
            if let Err(e) = self.platform.delete_namespace(&ns).await {
                tracing::warn!("Teardown: {}", e);
            }
        }
        self.processes.terminate_all().await;
        if let Some(mount) = self.sysfs_mount.take() {
            if let Err(e) = self.platform.unmount(&mount).await {
                tracing::warn!("Teardown: {}", e);
            }
        }
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                tracing::warn!("Teardown: failed to remove scratch directory: {}", e);
            }
        }
        self.advance(RunState::TornDown);
    }

    fn advance(&mut self, state: RunState) {
        tracing::debug!("{}: {:?} -> {:?}", self.scenario.name(), self.state, state);
        self.state = state;
    }

    fn namespace(&self) -> Result<&str> {
        self.namespace
            .as_deref()
            .ok_or_else(|| Error::platform("enter namespace", "namespace not created"))
    }

    fn scratch_file(&self, name: &str) -> Result<PathBuf> {
        self.scratch
            .as_ref()
            .map(|dir| dir.path().join(name))
            .ok_or_else(|| Error::Config("scratch directory not created".to_string()))
    }

    /// Command for `program` that runs inside the namespace
    fn ns_command(&self, program: &Path) -> Result<Command> {
        let mut cmd = Command::new(self.config.resolve_binary(program)?);
        self.platform.enter_namespace(&mut cmd, self.namespace()?)?;
        Ok(cmd)
    }

    /// Query the control bus inside the namespace
    async fn control(&self, args: &[&str]) -> Result<std::process::Output> {
        let mut cmd = self.ns_command(&self.config.binaries.control_client)?;
        cmd.args(args);
        run_command(cmd, "control client").await
    }
}

impl Drop for ScenarioRun<'_> {
    fn drop(&mut self) {
        if self.namespace.is_some() || !self.links.is_empty() || self.scratch.is_some() {
            tracing::warn!(
                "Scenario {} dropped without teardown in state {:?}",
                self.scenario.name(),
                self.state
            );
        }
    }
}

fn interface(file: &ValidationFile) -> &str {
    file.interface.as_deref().unwrap_or("global")
}

fn read_json(path: &Path) -> std::result::Result<Value, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid fixture {}: {}", path.display(), e))
}

fn nameserver_outcome(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> Outcome {
    let missing: Vec<&str> = expected.difference(actual).map(String::as_str).collect();
    let unexpected: Vec<&str> = actual.difference(expected).map(String::as_str).collect();

    let mut messages = Vec::new();
    if !missing.is_empty() {
        messages.push(format!("Nameservers are missing: {}", missing.join(", ")));
    }
    if !unexpected.is_empty() {
        messages.push(format!("Nameservers are not expected: {}", unexpected.join(", ")));
    }

    if messages.is_empty() {
        Outcome::Pass
    } else {
        Outcome::Fail(messages.join("\n"))
    }
}
