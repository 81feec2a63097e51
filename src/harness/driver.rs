//! Sequential execution of selected scenarios

use tokio::signal::unix::{signal, Signal, SignalKind};

use super::platform::NetPlatform;
use super::run::ScenarioRun;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::fixture::{self, Scenario};
use crate::report::ResultWriter;

/// Discovered scenarios plus the configuration to run them with
pub struct Runner {
    config: Config,
    scenarios: Vec<Scenario>,
}

impl Runner {
    /// Discover every scenario below the configured testcases directory
    pub fn load(config: Config) -> Result<Self> {
        let scenarios = fixture::discover(&config.testcases)?;
        Ok(Self { config, scenarios })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Resolve scenario names; an empty selection means every scenario
    ///
    /// Names may be given with or without the `test_` prefix. All unknown
    /// names are reported together.
    pub fn select(&self, names: &[String]) -> Result<Vec<&Scenario>> {
        if names.is_empty() {
            return Ok(self.scenarios.iter().collect());
        }

        let mut selected = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for name in names {
            match fixture::find(&self.scenarios, name) {
                Some(scenario) => selected.push(scenario),
                None => unknown.push(name.clone()),
            }
        }

        if unknown.is_empty() {
            Ok(selected)
        } else {
            Err(Error::UnknownScenarios(unknown))
        }
    }

    /// Run `selected` in order, one suite per scenario
    ///
    /// Every scenario ends with a `Teardown` test, even when setup failed or
    /// a shutdown signal arrived. A signal stops the run after that teardown
    /// with [`Error::Interrupted`]. Signals raised while the debug shell runs
    /// belong to the shell and are discarded.
    pub async fn run(
        &self,
        platform: &dyn NetPlatform,
        rw: &mut ResultWriter,
        selected: &[&Scenario],
        shell: bool,
    ) -> Result<()> {
        let mut shutdown = Shutdown::new()?;

        for scenario in selected {
            tracing::info!("Running {}", scenario.name());
            let mut suite = rw.start_suite(scenario.name());
            let mut run = ScenarioRun::new(&self.config, platform, scenario);

            let (ready, mut interrupted) = tokio::select! {
                ready = run.prepare(&mut suite) => (ready, false),
                _ = shutdown.recv() => (false, true),
            };

            if ready && shell {
                if let Err(e) = run.shell().await {
                    tracing::warn!("Shell failed: {}", e);
                }
                shutdown.discard_pending().await;
            }

            if ready {
                interrupted = tokio::select! {
                    _ = run.validate(&mut suite) => false,
                    _ = shutdown.recv() => true,
                };
            }

            {
                let _test = suite.start_test("Teardown");
                run.teardown().await;
            }

            if interrupted || shutdown.pending().await {
                return Err(Error::Interrupted);
            }
        }
        Ok(())
    }
}

/// SIGINT and SIGTERM listeners, installed once per run
struct Shutdown {
    sigint: Signal,
    sigterm: Signal,
}

impl Shutdown {
    fn new() -> Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => tracing::info!("Received SIGINT, stopping"),
            _ = self.sigterm.recv() => tracing::info!("Received SIGTERM, stopping"),
        }
    }

    /// Consume a signal that already arrived, without waiting for one
    async fn pending(&mut self) -> bool {
        // let the runtime deliver signals raised just before this call
        tokio::task::yield_now().await;
        tokio::select! {
            biased;
            _ = self.recv() => true,
            _ = std::future::ready(()) => false,
        }
    }

    async fn discard_pending(&mut self) {
        while self.pending().await {
            tracing::debug!("Ignoring signal raised inside the shell");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn testcases(names: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            let scenario = dir.path().join(name);
            fs::create_dir(&scenario).unwrap();
            fs::write(scenario.join("network"), "").unwrap();
        }
        dir
    }

    fn runner(dir: &TempDir) -> Runner {
        let config = Config {
            testcases: dir.path().to_path_buf(),
            ..Config::default()
        };
        Runner::load(config).unwrap()
    }

    #[test]
    fn test_empty_selection_runs_everything() {
        let dir = testcases(&["test_static", "test_dhcp"]);
        let runner = runner(&dir);
        let names: Vec<_> = runner
            .select(&[])
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["dhcp", "static"]);
    }

    #[test]
    fn test_select_keeps_requested_order() {
        let dir = testcases(&["test_a", "test_b"]);
        let runner = runner(&dir);
        let selected = runner
            .select(&["b".to_string(), "test_a".to_string()])
            .unwrap();
        assert_eq!(selected[0].name(), "b");
        assert_eq!(selected[1].name(), "a");
    }

    #[test]
    fn test_unknown_names_reported_together() {
        let dir = testcases(&["test_a"]);
        let runner = runner(&dir);
        let err = runner
            .select(&["x".to_string(), "a".to_string(), "y".to_string()])
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown tests: x, y");
    }
}
